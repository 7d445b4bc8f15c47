//! Listener (E): accepts inbound connections and dispatches each to the
//! least-busy worker.

use std::{
    io::ErrorKind,
    marker::PhantomData,
    sync::{atomic::Ordering, Arc},
};

use log::warn;
use mio::{event::Source, Events, Interest, Poll, Token};

use crate::{
    net::{tcp_listener::TcpListener, tcp_stream::TcpStream},
    worker::WorkerCommand,
};

const LISTEN_TOKEN: Token = Token(usize::MAX);

/// A handle the listener uses to hand a freshly-accepted connection to a
/// worker: its mailbox, its waker, and a shared counter used for
/// least-busy selection.
pub struct WorkerHandle<S: TcpStream + std::io::Read + std::io::Write + Source> {
    mailbox: crossbeam_channel::Sender<WorkerCommand<S>>,
    waker: Arc<mio::Waker>,
    session_count: Arc<std::sync::atomic::AtomicUsize>,
}

impl<S: TcpStream + std::io::Read + std::io::Write + Source> std::fmt::Debug for WorkerHandle<S> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerHandle")
            .field("session_count", &self.session_count.load(Ordering::Relaxed))
            .finish()
    }
}

impl<S: TcpStream + std::io::Read + std::io::Write + Source> WorkerHandle<S> {
    /// Builds a handle for a worker's mailbox.
    pub fn new(
        mailbox: crossbeam_channel::Sender<WorkerCommand<S>>,
        waker: Arc<mio::Waker>,
        session_count: Arc<std::sync::atomic::AtomicUsize>,
    ) -> Self {
        Self {
            mailbox,
            waker,
            session_count,
        }
    }
}

/// Accepts connections and dispatches each one to whichever worker
/// currently owns the fewest sessions, resolving the worker-selection
/// policy left open by the design notes.
pub struct Listener<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + std::io::Read + std::io::Write + Source,
{
    inner: T,
    poll: Poll,
    workers: Vec<WorkerHandle<S>>,
    _marker: PhantomData<S>,
}

impl<T, S> std::fmt::Debug for Listener<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + std::io::Read + std::io::Write + Source,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Listener")
            .field("workers", &self.workers)
            .finish()
    }
}

impl<T, S> Listener<T, S>
where
    T: TcpListener<S> + Source,
    S: TcpStream + std::io::Read + std::io::Write + Source,
{
    /// Builds a listener bound to an already-listening socket, dispatching
    /// accepted connections across `workers`.
    pub fn new(mut tcp_listener: T, workers: Vec<WorkerHandle<S>>) -> crate::Result<Self> {
        let poll = Poll::new()?;
        poll.registry()
            .register(&mut tcp_listener, LISTEN_TOKEN, Interest::READABLE)?;

        Ok(Self {
            inner: tcp_listener,
            poll,
            workers,
            _marker: PhantomData,
        })
    }

    /// Index of the worker with the fewest currently-owned sessions.
    fn least_busy(&self) -> usize {
        self.workers
            .iter()
            .enumerate()
            .min_by_key(|(_, w)| w.session_count.load(Ordering::Relaxed))
            .map(|(i, _)| i)
            .expect("at least one worker configured")
    }

    fn accept(&mut self) -> std::io::Result<()> {
        loop {
            match self.inner.accept() {
                Ok((stream, addr)) => {
                    let idx = self.least_busy();
                    let worker = &self.workers[idx];
                    // `session_count` is incremented by the owning worker
                    // once it actually dequeues the command, not here —
                    // this keeps the counter a single source of truth
                    // shared with hand-off and teardown bookkeeping.
                    if worker
                        .mailbox
                        .send(WorkerCommand::NewSession { stream, addr })
                        .is_ok()
                    {
                        let _ = worker.waker.wake();
                    }
                }
                Err(ref err) if err.kind() == ErrorKind::WouldBlock => return Ok(()),
                Err(err) => return Err(err),
            }
        }
    }

    /// Runs the accept loop until the listening socket errors out.
    pub fn run(&mut self) -> crate::Result<()> {
        let mut events = Events::with_capacity(256);
        loop {
            self.poll.poll(&mut events, None)?;
            for event in events.iter() {
                if event.token() == LISTEN_TOKEN {
                    if let Err(err) = self.accept() {
                        warn!("listener accept failed: {}", err);
                        return Err(err.into());
                    }
                }
            }
        }
    }
}
