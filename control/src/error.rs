//! Error taxonomy for the control channel, covering §7 kind 6 (control
//! channel failure) and the framing violations a malformed peer can cause.

/// Errors the control channel can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The peer sent a frame this crate doesn't recognize or that violates
    /// the fixed-size layout of its tag.
    #[error("malformed control frame: {0}")]
    MalformedFrame(&'static str),

    /// The pending token table has no room for another token.
    #[error("pending token table is full")]
    TokenTableFull,

    /// An I/O error on the underlying stream.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
