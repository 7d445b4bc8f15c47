//! The application-facing seam (§4.2's suspension contract, generalized):
//! a `Handler` implements the actual login/channel callbacks, and gets a
//! [`Ctx`] that exposes exactly `session.write`, `session.set_event`,
//! `session.close_event`, plus the room operations from §4.3.

use std::os::fd::RawFd;

use mio::Interest;

use crate::{net::tcp_stream::TcpStream, worker::Ctx};

/// What a callback wants to happen next, per §4.2.
#[derive(Debug)]
pub enum Outcome {
    /// Ready for the next inbound packet.
    Ready,
    /// Suspend: wait on `fd` for `interest`, then call `on_resume`.
    Suspend(RawFd, Interest),
    /// Tear the session down (transitions it to `Kicking`).
    Kick,
}

/// Application callbacks invoked by a worker's event loop.
///
/// Exactly one `Handler` instance is shared by all sessions a worker owns;
/// it is expected to keep any per-session scratch state (e.g. an in-flight
/// database request) in a map keyed by the session's address.
pub trait Handler<S>: Send
where
    S: TcpStream + std::io::Read + std::io::Write + mio::event::Source,
{
    /// Invoked once, right after the handshake is sent.
    fn on_connect(&mut self, ctx: &mut Ctx<'_, S>) -> Outcome;

    /// Invoked once per fully-decoded inbound packet.
    fn on_packet(&mut self, ctx: &mut Ctx<'_, S>, body: Vec<u8>) -> Outcome;

    /// Invoked once the peer disconnects (or the session is kicked), after
    /// any pending suspension has resolved and before destruction.
    fn on_disconnect(&mut self, ctx: &mut Ctx<'_, S>);

    /// Invoked when a previously-installed `set_event` descriptor fires.
    /// `status` is the observed readiness bitmask.
    fn on_resume(&mut self, ctx: &mut Ctx<'_, S>, status: u32) -> Outcome;

    /// Invoked on the target worker once a hand-off lands and the session
    /// has been inserted into its new room.
    fn on_client_join(&mut self, ctx: &mut Ctx<'_, S>) -> Outcome;
}

/// Re-exported so application crates can name these without importing
/// `worker` directly. Kept here for discoverability alongside `Handler`.
pub type Context<'a, S> = Ctx<'a, S>;
