//! Session (C): one client connection's server-side state.

use std::{io::Write, net::SocketAddr, os::fd::RawFd};

use mio::{event::Source, Interest, Token};
use wire::{DecryptionContext, EncryptionContext, FrameDecoder, FrameEncoder};

use crate::{buffer::Buffer, net::tcp_stream::TcpStream, room::RoomId};

/// Default capacity, in bytes, of a session's inbound and outbound buffers.
pub const BUFFER_CAPACITY: usize = 16 * 1024;

/// Maximum decoded frame body size this session's decoder will accept
/// before treating the frame as a protocol violation.
pub const MAX_FRAME_BODY: u16 = u16::MAX;

/// A session's lifecycle state, per §3.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Accepted, handshake not yet sent.
    Connecting,
    /// Handshake sent, normal operation.
    Connected,
    /// Application asked to close; waiting on a pending suspension (or
    /// none, in which case teardown happens immediately).
    Kicking,
    /// Peer closed (or reset); waiting on a pending suspension before
    /// destruction.
    Disconnecting,
}

/// A pending wait on an external descriptor, installed by `set_event` and
/// resolved by the worker when that descriptor becomes ready.
pub struct Suspension {
    /// The external descriptor being waited on (e.g. a database socket).
    pub fd: RawFd,
    /// Which readiness events to wait for.
    pub interest: Interest,
}

impl std::fmt::Debug for Suspension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Suspension")
            .field("fd", &self.fd)
            .field("interest", &self.interest)
            .finish()
    }
}

/// One client connection.
pub struct Session<S: TcpStream + std::io::Read + Write + Source> {
    addr: SocketAddr,
    token: u32,
    state: SessionState,
    in_cipher: DecryptionContext,
    out_cipher: EncryptionContext,
    decoder: FrameDecoder,
    encoder: FrameEncoder,
    in_buf: Buffer,
    out_buf: Buffer,
    stream: S,
    mio_token: Token,
    room: Option<RoomId>,
    suspension: Option<Suspension>,
    /// Set once `OnClientJoin` has completed; gates `broadcast_in_room`.
    write_enabled: bool,
}

impl<S: TcpStream + std::io::Read + Write + Source> std::fmt::Debug for Session<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("addr", &self.addr)
            .field("token", &self.token)
            .field("state", &self.state)
            .field("room", &self.room)
            .field("suspension", &self.suspension)
            .finish()
    }
}

impl<S: TcpStream + std::io::Read + Write + Source> Session<S> {
    /// Constructs a new session immediately after accept, with ciphers
    /// seeded from the handshake IVs.
    pub fn new(
        addr: SocketAddr,
        stream: S,
        mio_token: Token,
        version: u16,
        recv_iv: [u8; 4],
        send_iv: [u8; 4],
    ) -> Self {
        Self {
            addr,
            token: 0,
            state: SessionState::Connecting,
            in_cipher: DecryptionContext::new(recv_iv, version),
            out_cipher: EncryptionContext::new(send_iv, version),
            decoder: FrameDecoder::new(MAX_FRAME_BODY),
            encoder: FrameEncoder::new(),
            in_buf: Buffer::new(BUFFER_CAPACITY),
            out_buf: Buffer::new(BUFFER_CAPACITY),
            stream,
            mio_token,
            room: None,
            suspension: None,
            write_enabled: false,
        }
    }

    /// Remote address: stable cross-thread identity for this session.
    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    /// The single-use token this session redeemed, or 0 if none yet.
    pub fn token(&self) -> u32 {
        self.token
    }

    /// Records the token this session redeemed.
    pub fn set_token(&mut self, token: u32) {
        self.token = token;
    }

    /// Current lifecycle state.
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Forces a new lifecycle state. Used by the worker's transition logic.
    pub fn set_state(&mut self, state: SessionState) {
        self.state = state;
    }

    /// This session's mio registration token.
    pub fn mio_token(&self) -> Token {
        self.mio_token
    }

    /// The room this session currently belongs to, if any.
    pub fn room(&self) -> Option<RoomId> {
        self.room
    }

    /// Assigns this session to a room (or clears its room with `None`).
    pub fn set_room(&mut self, room: Option<RoomId>) {
        self.room = room;
    }

    /// Whether this session is visible to `broadcast_in_room` calls from
    /// its roommates yet.
    pub fn write_enabled(&self) -> bool {
        self.write_enabled
    }

    /// Marks this session visible to roommates' broadcasts. Called once
    /// `OnClientJoin` has returned.
    pub fn enable_write(&mut self) {
        self.write_enabled = true;
    }

    /// The pending external-descriptor wait, if any.
    pub fn suspension(&self) -> Option<&Suspension> {
        self.suspension.as_ref()
    }

    /// Installs a suspension. Overwrites any previous one — the contract in
    /// §4.2 only allows at most one to be live at a time.
    pub fn set_event(&mut self, fd: RawFd, interest: Interest) {
        self.suspension = Some(Suspension { fd, interest });
    }

    /// Drops a previously-installed suspension.
    pub fn close_event(&mut self) {
        self.suspension = None;
    }

    /// Queues `bytes` on the outbound buffer, framed and encrypted. Never
    /// blocks on socket I/O; may apply backpressure on the buffer itself.
    pub fn write(&mut self, bytes: &[u8]) {
        let frame = self.encoder.encode(&mut self.out_cipher, bytes);
        let _ = self.out_buf.write_all(&frame);
    }

    /// Number of undrained outbound bytes.
    pub fn pending_write_bytes(&self) -> usize {
        self.out_buf.remaining()
    }

    /// Attempts to drain the outbound buffer to the socket. Returns the
    /// number of bytes written; `WouldBlock` is treated as 0 written, not
    /// an error.
    pub fn flush(&mut self) -> std::io::Result<usize> {
        if self.out_buf.remaining() == 0 {
            return Ok(0);
        }
        match self.stream.write(&self.out_buf) {
            Ok(n) => {
                self.out_buf.mark_read(n);
                Ok(n)
            }
            Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => Ok(0),
            Err(e) => Err(e),
        }
    }

    /// Reads available bytes from the socket into the inbound buffer.
    /// Returns `Ok(true)` if the peer closed (EOF).
    pub fn fill(&mut self) -> std::io::Result<bool> {
        loop {
            if self.in_buf.remaining_mut() == 0 {
                self.in_buf.reserve(BUFFER_CAPACITY);
            }
            match std::io::Read::read(&mut self.stream, self.in_buf.borrow_mut_slice()) {
                Ok(0) => return Ok(true),
                Ok(n) => self.in_buf.mark_written(n),
                Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => return Ok(false),
                Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
                Err(e) => return Err(e),
            }
        }
    }

    /// Attempts to decode one complete inbound frame, decrypting its body.
    pub fn decode_one(&mut self) -> wire::Result<Option<Vec<u8>>> {
        self.decoder.decode(&mut self.in_buf, &mut self.in_cipher)
    }

    /// Borrows the underlying stream, for registering with a poll registry.
    pub fn stream_mut(&mut self) -> &mut S {
        &mut self.stream
    }

    /// Sends the handshake packet and transitions to `Connected`.
    pub fn send_handshake(&mut self, version: u16) -> std::io::Result<()> {
        let handshake = wire::handshake::Handshake {
            version,
            recv_iv: self.in_cipher.iv(),
            send_iv: self.out_cipher.iv(),
        };
        let bytes = handshake.encode();
        let _ = self.out_buf.write_all(&bytes);
        self.state = SessionState::Connected;
        self.flush()?;
        Ok(())
    }
}

impl Buffer {
    /// Convenience used by `Session::fill`: a mutable slice view into the
    /// writable region, distinct from `BorrowMut<[u8]>::borrow_mut` only in
    /// name, kept to avoid an ambiguous-method-call at the call site above.
    pub(crate) fn borrow_mut_slice(&mut self) -> &mut [u8] {
        use std::borrow::BorrowMut;
        self.borrow_mut()
    }
}
