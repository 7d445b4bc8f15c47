//! Frame codec: produces/consumes the 4-byte encrypted header and
//! variable-length ciphertext body described in the framing layer.
//!
//! The decoder is a small resumable state machine, in the spirit of the
//! teacher's [`H1Request`]-style incremental parsing: it is fed whatever
//! bytes are currently available and reports "not enough yet" rather than
//! blocking, so a worker's event loop can call it once per readable event.
//!
//! [`H1Request`]: https://docs.rs/rask (teacher crate; not a real link target here)

use crate::{DecryptionContext, EncryptionContext};

/// A read cursor over bytes accumulated by some caller-owned buffer.
///
/// This is the seam between this crate (which knows nothing about buffer
/// management) and a reactor's session buffer (which does). A reactor's
/// buffer type implements this trait; the frame decoder only ever peeks and
/// consumes through it.
pub trait ByteSource {
    /// Number of bytes currently available to read.
    fn remaining(&self) -> usize;

    /// A slice over the currently available bytes. Must be at least
    /// `remaining()` bytes long.
    fn peek(&self) -> &[u8];

    /// Marks `n` bytes as consumed, removing them from the front of the
    /// source.
    fn consume(&mut self, n: usize);
}

#[derive(Debug, Clone, Copy)]
enum DecodeState {
    WaitingHeader,
    WaitingBody { len: u16 },
}

/// Decodes the stream of encrypted frames arriving on one direction of a
/// session.
#[derive(Debug)]
pub struct FrameDecoder {
    state: DecodeState,
    max_body_len: u16,
}

impl FrameDecoder {
    /// Creates a decoder that will refuse bodies longer than `max_body_len`.
    pub fn new(max_body_len: u16) -> Self {
        Self {
            state: DecodeState::WaitingHeader,
            max_body_len,
        }
    }

    /// Attempts to decode one complete frame from `source`, decrypting its
    /// body in place with `cipher`.
    ///
    /// Returns `Ok(None)` if not enough bytes are available yet to make
    /// progress; the caller should retry after more bytes arrive. Returns
    /// `Ok(Some(body))` with the decrypted plaintext body on success. Any
    /// `Err` is fatal to the session per the framing layer's contract.
    pub fn decode(
        &mut self,
        source: &mut dyn ByteSource,
        cipher: &mut DecryptionContext,
    ) -> crate::Result<Option<Vec<u8>>> {
        loop {
            match self.state {
                DecodeState::WaitingHeader => {
                    if source.remaining() < 4 {
                        return Ok(None);
                    }
                    let mut header = [0u8; 4];
                    header.copy_from_slice(&source.peek()[0..4]);
                    let len = cipher.check_header(header)?;
                    if len > self.max_body_len {
                        return Err(crate::Error::BodyTooLarge(len, self.max_body_len));
                    }
                    source.consume(4);
                    self.state = DecodeState::WaitingBody { len };
                }
                DecodeState::WaitingBody { len } => {
                    let len = len as usize;
                    if source.remaining() < len {
                        return Ok(None);
                    }
                    let mut body = source.peek()[0..len].to_vec();
                    source.consume(len);
                    cipher.decrypt(&mut body);
                    self.state = DecodeState::WaitingHeader;
                    return Ok(Some(body));
                }
            }
        }
    }
}

/// Encodes application packets into the on-wire frame format.
#[derive(Debug, Default)]
pub struct FrameEncoder {
    _private: (),
}

impl FrameEncoder {
    /// Creates a new encoder. Stateless: all state lives in the cipher.
    pub fn new() -> Self {
        Self::default()
    }

    /// Encodes `body` (plaintext) into `[header][ciphertext]`, advancing
    /// `cipher`'s IV by `body.len()` steps.
    ///
    /// # Panics
    /// Panics if `body.len()` does not fit in a `u16`; callers are expected
    /// to have validated this against the application protocol's own packet
    /// size limits before calling.
    pub fn encode(&self, cipher: &mut EncryptionContext, body: &[u8]) -> Vec<u8> {
        let len: u16 = body
            .len()
            .try_into()
            .expect("frame body must fit in a u16");
        let header = cipher.header_for(len);

        let mut out = Vec::with_capacity(4 + body.len());
        out.extend_from_slice(&header);
        out.extend_from_slice(body);
        cipher.encrypt(&mut out[4..]);
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct VecSource(Vec<u8>);

    impl ByteSource for VecSource {
        fn remaining(&self) -> usize {
            self.0.len()
        }

        fn peek(&self) -> &[u8] {
            &self.0
        }

        fn consume(&mut self, n: usize) {
            self.0.drain(0..n);
        }
    }

    #[test]
    fn encode_then_decode_round_trips() {
        let iv = [4, 3, 2, 1];
        let version = 83;
        let mut enc_cipher = EncryptionContext::new(iv, version);
        let mut dec_cipher = DecryptionContext::new(iv, version);

        let encoder = FrameEncoder::new();
        let mut decoder = FrameDecoder::new(u16::MAX);

        let packets: [&[u8]; 3] = [b"hello", b"", b"a slightly longer packet body"];
        for packet in packets {
            let wire_bytes = encoder.encode(&mut enc_cipher, packet);
            let mut source = VecSource(wire_bytes);
            let decoded = decoder
                .decode(&mut source, &mut dec_cipher)
                .unwrap()
                .unwrap();
            assert_eq!(decoded, packet);
        }

        assert_eq!(enc_cipher.iv(), dec_cipher.iv());
    }

    #[test]
    fn decode_waits_for_more_bytes() {
        let iv = [0, 0, 0, 0];
        let mut enc_cipher = EncryptionContext::new(iv, 1);
        let mut dec_cipher = DecryptionContext::new(iv, 1);
        let encoder = FrameEncoder::new();
        let mut decoder = FrameDecoder::new(u16::MAX);

        let wire_bytes = encoder.encode(&mut enc_cipher, b"split me");

        let mut source = VecSource(wire_bytes[0..2].to_vec());
        assert!(decoder
            .decode(&mut source, &mut dec_cipher)
            .unwrap()
            .is_none());

        source.0.extend_from_slice(&wire_bytes[2..]);
        let decoded = decoder
            .decode(&mut source, &mut dec_cipher)
            .unwrap()
            .unwrap();
        assert_eq!(decoded, b"split me");
    }

    #[test]
    fn oversized_body_is_rejected() {
        let iv = [0, 0, 0, 0];
        let mut enc_cipher = EncryptionContext::new(iv, 1);
        let mut dec_cipher = DecryptionContext::new(iv, 1);
        let encoder = FrameEncoder::new();
        let mut decoder = FrameDecoder::new(4);

        let wire_bytes = encoder.encode(&mut enc_cipher, b"too long for the limit");
        let mut source = VecSource(wire_bytes);
        assert!(decoder.decode(&mut source, &mut dec_cipher).is_err());
    }
}
