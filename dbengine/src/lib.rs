//! Non-blocking database request engine (K, L): a single pipelined
//! connection handle guarded by a FIFO lock queue, and a resumable
//! request state machine whose suspension points compose with the
//! reactor's own (§4.5). The engine is deliberately indifferent to which
//! MySQL client library backs [`driver::QueryDriver`]; it only depends on
//! `mysql_common` for wire-level value/error types.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms, unused_imports)]

pub mod connection;
pub mod driver;
mod error;
pub mod request;
pub mod types;

pub use error::Error;

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
