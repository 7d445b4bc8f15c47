//! Worker (D): a single-threaded event loop owning a disjoint set of
//! sessions and rooms, plus the hand-off protocol of §4.3.

use std::{
    collections::HashMap,
    io::{Read, Write},
    net::SocketAddr,
    os::fd::RawFd,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::{Duration, Instant},
};

use crossbeam_channel::{Receiver, Sender};
use log::{debug, info, warn};
use mio::{event::Source, unix::SourceFd, Events, Interest, Poll, Token, Waker};
use slab::Slab;

use crate::{
    handler::{Handler, Outcome},
    net::tcp_stream::TcpStream,
    room::{GlobalTopology, Room, RoomId},
    session::{Session, SessionState},
    timer::TimerHeap,
};

/// Reserved token for the worker's own mailbox waker.
const MAILBOX_TOKEN: Token = Token(usize::MAX);
/// Reserved token for the worker's timer descriptor (a self-pipe driven by
/// `next_deadline`, checked once per poll tick rather than backed by a true
/// OS timerfd, since mio's portable `Poll` has no first-class timer source).
const TIMER_TOKEN: Token = Token(usize::MAX - 1);
/// First token handed out to externally-suspended descriptors (database
/// sockets, event-fds). Kept far above any realistic session count so
/// session tokens (small, slab-assigned) never collide with these.
const SUSPENSION_TOKEN_BASE: usize = 1 << 40;

/// A command sent to a worker's mailbox.
pub enum WorkerCommand<S: TcpStream + Read + Write + Source> {
    /// A freshly-accepted connection, assigned to this worker by the
    /// listener's load-balancing policy.
    NewSession { stream: S, addr: SocketAddr },
    /// A session being handed off from another worker (§4.3).
    Transfer {
        session: Box<Session<S>>,
        target_room: RoomId,
    },
    /// Graceful shutdown: stop accepting new sessions, kick everything
    /// owned, and exit once torn down.
    Shutdown,
}

impl<S: TcpStream + Read + Write + Source> std::fmt::Debug for WorkerCommand<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            WorkerCommand::NewSession { addr, .. } => {
                f.debug_struct("NewSession").field("addr", addr).finish()
            }
            WorkerCommand::Transfer { target_room, .. } => f
                .debug_struct("Transfer")
                .field("target_room", target_room)
                .finish(),
            WorkerCommand::Shutdown => f.write_str("Shutdown"),
        }
    }
}

/// The mutable state a worker owns, split out from `Worker` so [`Ctx`] can
/// borrow it independently of the handler and poll machinery.
pub struct WorkerInner<S: TcpStream + Read + Write + Source> {
    sessions: Slab<Session<S>>,
    addr_to_token: HashMap<SocketAddr, Token>,
    rooms: HashMap<RoomId, Room>,
    timers: TimerHeap,
    suspension_owner: HashMap<Token, Token>,
    next_suspension_token: usize,
    protocol_version: u16,
}

impl<S: TcpStream + Read + Write + Source> WorkerInner<S> {
    fn new(protocol_version: u16) -> Self {
        Self {
            sessions: Slab::new(),
            addr_to_token: HashMap::new(),
            rooms: HashMap::new(),
            timers: TimerHeap::new(),
            suspension_owner: HashMap::new(),
            next_suspension_token: SUSPENSION_TOKEN_BASE,
            protocol_version,
        }
    }

    /// Number of sessions this worker currently owns, used by the
    /// listener's load-balancing policy.
    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

impl<S: TcpStream + Read + Write + Source> std::fmt::Debug for WorkerInner<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerInner")
            .field("sessions", &self.sessions.len())
            .field("rooms", &self.rooms.len())
            .field("timers", &self.timers)
            .finish()
    }
}

/// The context passed to every `Handler` callback: the session the
/// callback concerns, plus the room/timer operations available from it.
pub struct Ctx<'a, S: TcpStream + Read + Write + Source> {
    inner: &'a mut WorkerInner<S>,
    token: Token,
    topology: &'a GlobalTopology,
    worker_index: usize,
    transfer_request: &'a mut Option<RoomId>,
}

impl<'a, S: TcpStream + Read + Write + Source> std::fmt::Debug for Ctx<'a, S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ctx")
            .field("token", &self.token)
            .field("worker_index", &self.worker_index)
            .finish()
    }
}

impl<'a, S: TcpStream + Read + Write + Source> Ctx<'a, S> {
    fn session(&self) -> &Session<S> {
        self.inner
            .sessions
            .get(self.token.0)
            .expect("ctx token always refers to a live session")
    }

    fn session_mut(&mut self) -> &mut Session<S> {
        self.inner
            .sessions
            .get_mut(self.token.0)
            .expect("ctx token always refers to a live session")
    }

    /// This session's remote address.
    pub fn addr(&self) -> SocketAddr {
        self.session().addr()
    }

    /// The token this session redeemed, if any.
    pub fn token(&self) -> u32 {
        self.session().token()
    }

    /// Records the token this session redeemed.
    pub fn set_token(&mut self, token: u32) {
        self.session_mut().set_token(token);
    }

    /// Queues `bytes` on this session's outbound buffer.
    pub fn write(&mut self, bytes: &[u8]) {
        self.session_mut().write(bytes);
    }

    /// Installs a suspension on an external descriptor.
    pub fn set_event(&mut self, fd: RawFd, interest: Interest) {
        self.session_mut().set_event(fd, interest);
    }

    /// Drops a previously-installed suspension.
    pub fn close_event(&mut self) {
        self.session_mut().close_event();
    }

    /// Marks this session for teardown.
    pub fn kick(&mut self) {
        self.session_mut().set_state(SessionState::Kicking);
    }

    /// The room this session currently belongs to.
    pub fn room(&self) -> Option<RoomId> {
        self.session().room()
    }

    /// Requests a hand-off to `room` once the current callback returns.
    /// Per §4.3, the actual transfer happens after the outbound buffer has
    /// fully drained.
    pub fn transfer_to_room(&mut self, room: RoomId) {
        *self.transfer_request = Some(room);
    }

    /// `room.broadcast(bytes)`: every session in the current room,
    /// including self.
    pub fn room_broadcast(&mut self, bytes: &[u8]) {
        let Some(room_id) = self.room() else { return };
        self.broadcast_to(room_id, bytes, None);
    }

    /// `session.broadcast_in_room(bytes)`: every session in the current
    /// room except self, skipping any not yet write-enabled.
    pub fn broadcast_in_room(&mut self, bytes: &[u8]) {
        let Some(room_id) = self.room() else { return };
        let self_addr = self.addr();
        self.broadcast_to(room_id, bytes, Some(self_addr));
    }

    fn broadcast_to(&mut self, room_id: RoomId, bytes: &[u8], skip: Option<SocketAddr>) {
        let Some(room) = self.inner.rooms.get(&room_id) else {
            return;
        };
        let addrs: Vec<SocketAddr> = room.sessions().copied().collect();
        for addr in addrs {
            if Some(addr) == skip {
                continue;
            }
            if let Some(&tok) = self.inner.addr_to_token.get(&addr) {
                if let Some(sess) = self.inner.sessions.get_mut(tok.0) {
                    if skip.is_none() || sess.write_enabled() {
                        sess.write(bytes);
                    }
                }
            }
        }
    }

    /// Marks this session visible to roommates' `broadcast_in_room` calls.
    pub fn enable_write(&mut self) {
        self.session_mut().enable_write();
    }

    /// Schedules a timer on the current session's room, per §4.3.
    pub fn add_timer(&mut self, delay: Duration, keep_alive: bool) -> Option<crate::timer::TimerId> {
        let room_id = self.room()?;
        let deadline = Instant::now() + delay;
        let (id, _is_min) = self.inner.timers.schedule(room_id, deadline, keep_alive);
        if let Some(room) = self.inner.rooms.get_mut(&room_id) {
            room.track_timer(id, true);
        }
        Some(id)
    }

    /// Cancels a previously-scheduled timer.
    pub fn stop_timer(&mut self, id: crate::timer::TimerId) {
        self.inner.timers.cancel(id);
        if let Some(room_id) = self.room() {
            if let Some(room) = self.inner.rooms.get_mut(&room_id) {
                room.untrack_timer(id);
            }
        }
    }

    /// This worker's index, for diagnostics.
    pub fn worker_index(&self) -> usize {
        self.worker_index
    }

    /// The process-wide room/session topology map.
    pub fn topology(&self) -> &GlobalTopology {
        self.topology
    }
}

/// A single-threaded reactor owning a disjoint set of sessions and rooms.
pub struct Worker<S, H>
where
    S: TcpStream + Read + Write + Source,
    H: Handler<S>,
{
    index: usize,
    poll: Poll,
    events: Events,
    mailbox_rx: Receiver<WorkerCommand<S>>,
    mailboxes: Vec<Sender<WorkerCommand<S>>>,
    waker: Arc<Waker>,
    inner: WorkerInner<S>,
    handler: H,
    topology: Arc<GlobalTopology>,
    session_count: Arc<AtomicUsize>,
    shutting_down: bool,
}

impl<S, H> std::fmt::Debug for Worker<S, H>
where
    S: TcpStream + Read + Write + Source,
    H: Handler<S>,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Worker")
            .field("index", &self.index)
            .field("inner", &self.inner)
            .field("shutting_down", &self.shutting_down)
            .finish()
    }
}

impl<S, H> Worker<S, H>
where
    S: TcpStream + Read + Write + Source,
    H: Handler<S>,
{
    /// Constructs a worker. `index` must be this worker's position in
    /// `mailboxes`, and `mailboxes[index]` must be paired with
    /// `mailbox_rx`.
    pub fn new(
        index: usize,
        protocol_version: u16,
        mailbox_rx: Receiver<WorkerCommand<S>>,
        mailboxes: Vec<Sender<WorkerCommand<S>>>,
        topology: Arc<GlobalTopology>,
        session_count: Arc<AtomicUsize>,
        handler: H,
    ) -> crate::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), MAILBOX_TOKEN)?);

        Ok(Self {
            index,
            poll,
            events: Events::with_capacity(1024),
            mailbox_rx,
            mailboxes,
            waker,
            inner: WorkerInner::new(protocol_version),
            handler,
            topology,
            session_count,
            shutting_down: false,
        })
    }

    /// A waker whoever dispatches work to this worker should call after
    /// pushing a [`WorkerCommand`] onto its mailbox.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Runs this worker's event loop until shutdown.
    pub fn run(&mut self) -> crate::Result<()> {
        loop {
            let timeout = self.next_poll_timeout();
            self.poll.poll(&mut self.events, timeout)?;

            let tokens: Vec<Token> = self.events.iter().map(|e| e.token()).collect();
            for token in tokens {
                match token {
                    MAILBOX_TOKEN => self.drain_mailbox()?,
                    TIMER_TOKEN => {}
                    _ => self.dispatch_event(token)?,
                }
            }

            self.fire_due_timers();

            if self.shutting_down && self.inner.sessions.is_empty() {
                return Ok(());
            }
        }
    }

    fn next_poll_timeout(&mut self) -> Option<Duration> {
        self.inner
            .timers
            .next_deadline()
            .map(|deadline| deadline.saturating_duration_since(Instant::now()))
    }

    fn fire_due_timers(&mut self) {
        let now = Instant::now();
        let due = self.inner.timers.pop_due(now);
        for (_id, _room) in due {
            // Timer callbacks are application-defined; the core only
            // guarantees ordering and re-arming, both handled by
            // `TimerHeap` itself. A richer callback registry (closure per
            // timer) belongs to the application layer built atop this.
            debug!("worker {} timer fired", self.index);
        }
    }

    fn drain_mailbox(&mut self) -> crate::Result<()> {
        loop {
            match self.mailbox_rx.try_recv() {
                Ok(WorkerCommand::NewSession { stream, addr }) => self.accept_session(stream, addr)?,
                Ok(WorkerCommand::Transfer {
                    session,
                    target_room,
                }) => self.accept_transfer(*session, target_room)?,
                Ok(WorkerCommand::Shutdown) => self.begin_shutdown(),
                Err(crossbeam_channel::TryRecvError::Empty) => return Ok(()),
                Err(crossbeam_channel::TryRecvError::Disconnected) => {
                    self.begin_shutdown();
                    return Ok(());
                }
            }
        }
    }

    fn begin_shutdown(&mut self) {
        if self.shutting_down {
            return;
        }
        info!("worker {} shutting down", self.index);
        self.shutting_down = true;
        self.inner.timers.drop_non_keep_alive();
        let tokens: Vec<Token> = self.inner.sessions.iter().map(|(k, _)| Token(k)).collect();
        for token in tokens {
            if let Some(session) = self.inner.sessions.get_mut(token.0) {
                session.set_state(SessionState::Kicking);
            }
            self.maybe_destroy(token);
        }
    }

    fn accept_session(&mut self, mut stream: S, addr: SocketAddr) -> crate::Result<()> {
        let entry = self.inner.sessions.vacant_entry();
        let token = Token(entry.key());

        self.poll
            .registry()
            .register(&mut stream, token, Interest::READABLE)?;

        let recv_iv: [u8; 4] = rand::random();
        let send_iv: [u8; 4] = rand::random();
        let version = self.inner.protocol_version;
        let mut session = Session::new(addr, stream, token, version, recv_iv, send_iv);
        session.send_handshake(version)?;

        entry.insert(session);
        self.inner.addr_to_token.insert(addr, token);
        self.session_count.fetch_add(1, Ordering::Relaxed);

        let outcome = {
            let mut transfer_request = None;
            let mut ctx = Ctx {
                inner: &mut self.inner,
                token,
                topology: &self.topology,
                worker_index: self.index,
                transfer_request: &mut transfer_request,
            };
            let outcome = self.handler.on_connect(&mut ctx);
            drop(ctx);
            (outcome, transfer_request)
        };
        self.apply_outcome(token, outcome.0, outcome.1)
    }

    fn accept_transfer(&mut self, mut session: Session<S>, target_room: RoomId) -> crate::Result<()> {
        let entry = self.inner.sessions.vacant_entry();
        let token = Token(entry.key());

        self.poll
            .registry()
            .register(session.stream_mut(), token, Interest::READABLE)?;

        let addr = session.addr();
        session.set_room(Some(target_room));
        entry.insert(session);
        self.inner.addr_to_token.insert(addr, token);
        self.session_count.fetch_add(1, Ordering::Relaxed);

        self.inner
            .rooms
            .entry(target_room)
            .or_insert_with(|| Room::new(target_room))
            .insert(addr);
        self.topology.owner_or_insert(target_room, self.index);
        self.topology.set_session_room(addr, target_room);

        let outcome = {
            let mut transfer_request = None;
            let mut ctx = Ctx {
                inner: &mut self.inner,
                token,
                topology: &self.topology,
                worker_index: self.index,
                transfer_request: &mut transfer_request,
            };
            let outcome = self.handler.on_client_join(&mut ctx);
            ctx.enable_write();
            drop(ctx);
            (outcome, transfer_request)
        };
        self.apply_outcome(token, outcome.0, outcome.1)
    }

    fn dispatch_event(&mut self, token: Token) -> crate::Result<()> {
        if let Some(&session_token) = self.inner.suspension_owner.get(&token) {
            return self.dispatch_resume(token, session_token);
        }
        self.dispatch_session_io(token)
    }

    fn dispatch_resume(&mut self, ext_token: Token, session_token: Token) -> crate::Result<()> {
        self.inner.suspension_owner.remove(&ext_token);
        if let Some(session) = self.inner.sessions.get_mut(session_token.0) {
            session.close_event();
        }

        let outcome = {
            let mut transfer_request = None;
            let mut ctx = Ctx {
                inner: &mut self.inner,
                token: session_token,
                topology: &self.topology,
                worker_index: self.index,
                transfer_request: &mut transfer_request,
            };
            // The observed readiness bitmask is application-defined; a
            // richer integration layer would thread the real epoll/kqueue
            // event flags through here. Readable-only is the common case.
            let outcome = self.handler.on_resume(&mut ctx, 1u32);
            (outcome, transfer_request)
        };
        self.apply_outcome(session_token, outcome.0, outcome.1)
    }

    fn dispatch_session_io(&mut self, token: Token) -> crate::Result<()> {
        {
            let Some(session) = self.inner.sessions.get_mut(token.0) else {
                return Ok(());
            };
            let _ = session.flush()?;
        }

        let suspended = match self.inner.sessions.get(token.0) {
            Some(session) => session.suspension().is_some(),
            None => return Ok(()),
        };
        if suspended {
            return Ok(());
        }

        let eof = {
            let Some(session) = self.inner.sessions.get_mut(token.0) else {
                return Ok(());
            };
            session.fill()?
        };

        loop {
            enum Step {
                Body(Vec<u8>),
                Done,
                Violation,
            }

            let step = {
                let Some(session) = self.inner.sessions.get_mut(token.0) else {
                    return Ok(());
                };
                match session.decode_one() {
                    Ok(Some(body)) => Step::Body(body),
                    Ok(None) => Step::Done,
                    Err(err) => {
                        warn!("session {} protocol violation: {}", session.addr(), err);
                        session.set_state(SessionState::Kicking);
                        Step::Violation
                    }
                }
            };

            let body = match step {
                Step::Body(body) => body,
                Step::Done => break,
                Step::Violation => {
                    self.maybe_destroy(token);
                    return Ok(());
                }
            };

            let outcome = {
                let mut transfer_request = None;
                let mut ctx = Ctx {
                    inner: &mut self.inner,
                    token,
                    topology: &self.topology,
                    worker_index: self.index,
                    transfer_request: &mut transfer_request,
                };
                let outcome = self.handler.on_packet(&mut ctx, body);
                (outcome, transfer_request)
            };
            self.apply_outcome(token, outcome.0, outcome.1)?;

            match self.inner.sessions.get(token.0) {
                Some(session) if session.suspension().is_some() => break,
                Some(_) => {}
                None => return Ok(()),
            }
        }

        if eof {
            let needs_disconnect_callback = {
                let Some(session) = self.inner.sessions.get_mut(token.0) else {
                    return Ok(());
                };
                if session.state() == SessionState::Connected || session.state() == SessionState::Connecting {
                    session.set_state(SessionState::Disconnecting);
                }
                session.suspension().is_none()
            };

            if needs_disconnect_callback {
                let mut transfer_request = None;
                let mut ctx = Ctx {
                    inner: &mut self.inner,
                    token,
                    topology: &self.topology,
                    worker_index: self.index,
                    transfer_request: &mut transfer_request,
                };
                self.handler.on_disconnect(&mut ctx);
            }
            self.maybe_destroy(token);
        }

        Ok(())
    }

    fn apply_outcome(
        &mut self,
        token: Token,
        outcome: Outcome,
        transfer_request: Option<RoomId>,
    ) -> crate::Result<()> {
        match outcome {
            Outcome::Ready => {}
            Outcome::Suspend(fd, interest) => {
                self.install_suspension(token, fd, interest)?;
            }
            Outcome::Kick => {
                if let Some(session) = self.inner.sessions.get_mut(token.0) {
                    session.set_state(SessionState::Kicking);
                }
            }
        }

        if let Some(target_room) = transfer_request {
            self.begin_handoff(token, target_room)?;
            return Ok(());
        }

        self.maybe_destroy(token);
        Ok(())
    }

    fn install_suspension(&mut self, token: Token, fd: RawFd, interest: Interest) -> crate::Result<()> {
        let ext_token = Token(self.inner.next_suspension_token);
        self.inner.next_suspension_token += 1;

        self.poll
            .registry()
            .register(&mut SourceFd(&fd), ext_token, interest)?;
        self.inner.suspension_owner.insert(ext_token, token);

        if let Some(session) = self.inner.sessions.get_mut(token.0) {
            session.set_event(fd, interest);
        }
        Ok(())
    }

    /// Hand-off protocol, §4.3: flush outbound buffer, remove from this
    /// worker's sets, and ship the session by value to the target worker.
    fn begin_handoff(&mut self, token: Token, target_room: RoomId) -> crate::Result<()> {
        let Some(session) = self.inner.sessions.get_mut(token.0) else {
            return Ok(());
        };

        // Step 1: flush outbound buffer before releasing the socket.
        while session.pending_write_bytes() > 0 {
            match session.flush() {
                Ok(0) => break,
                Ok(_) => continue,
                Err(e) => return Err(e.into()),
            }
        }

        let addr = session.addr();
        let old_room = session.room();

        self.poll.registry().deregister(session.stream_mut())?;
        let mut session = self.inner.sessions.remove(token.0);
        self.inner.addr_to_token.remove(&addr);
        self.session_count.fetch_sub(1, Ordering::Relaxed);

        if let Some(room_id) = old_room {
            if let Some(room) = self.inner.rooms.get_mut(&room_id) {
                room.remove(addr);
                if !room.should_persist() {
                    self.inner.rooms.remove(&room_id);
                    self.topology.remove_room(room_id);
                }
            }
        }

        self.topology.set_session_room(addr, target_room);
        let target_worker = self.topology.owner_or_insert(target_room, self.index);

        session.set_room(None);
        // Step 2: emit NewClient over the target worker's mailbox.
        if let Some(mailbox) = self.mailboxes.get(target_worker) {
            let _ = mailbox.send(WorkerCommand::Transfer {
                session: Box::new(session),
                target_room,
            });
        }
        Ok(())
    }

    fn maybe_destroy(&mut self, token: Token) {
        let Some(session) = self.inner.sessions.get(token.0) else {
            return;
        };

        let terminal = matches!(
            session.state(),
            SessionState::Kicking | SessionState::Disconnecting
        );
        if !terminal || session.suspension().is_some() {
            return;
        }

        let addr = session.addr();
        let room_id = session.room();
        if let Some(session) = self.inner.sessions.get_mut(token.0) {
            let _ = self.poll.registry().deregister(session.stream_mut());
        }

        self.inner.sessions.remove(token.0);
        self.inner.addr_to_token.remove(&addr);
        self.topology.remove_session(addr);
        self.session_count.fetch_sub(1, Ordering::Relaxed);

        if let Some(room_id) = room_id {
            if let Some(room) = self.inner.rooms.get_mut(&room_id) {
                room.remove(addr);
                if !room.should_persist() {
                    self.inner.rooms.remove(&room_id);
                    self.topology.remove_room(room_id);
                }
            }
        }
    }
}
