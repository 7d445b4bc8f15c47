//! Error taxonomy for the database request engine.

/// Errors a [`crate::request::DatabaseRequest`] or [`crate::connection::DatabaseConnection`]
/// can report.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The underlying driver reported a MySQL error; carries the negated
    /// code the way `database_request_execute` returns it on the wire.
    #[error("mysql error {0}")]
    Mysql(i32),

    /// A row did not have the shape a request's mapping expected (wrong
    /// column count/type). Distinct from a driver-reported MySQL error.
    #[error("unexpected row shape: {0}")]
    RowShape(&'static str),

    /// `execute` was called on a request that had already reached
    /// `Finished`.
    #[error("request already finished")]
    AlreadyFinished,

    /// Raised creating or signaling the per-connection wait primitive.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
