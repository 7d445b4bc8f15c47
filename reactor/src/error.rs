//! Error taxonomy for the reactor crate.

/// Errors the reactor itself can report. Handler-level protocol/game errors
/// are represented through [`crate::session::Outcome::Kick`] instead, since
/// per §7 they must not tear down the worker.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// A lower-level framing error; fatal to the offending session only.
    #[error(transparent)]
    Wire(#[from] wire::Error),

    /// An I/O error setting up or running the reactor itself (bind, poll
    /// registration). These are startup-fatal, unlike per-session I/O
    /// errors which are handled inline by the worker.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
