//! login↔channel control channel (§4.4): a tiny unencrypted framed
//! protocol for token issuance and logout notification, plus the pending
//! token table and reconnect-reconciliation bookkeeping built on top of it.

#![deny(missing_docs, missing_debug_implementations, rust_2018_idioms, unused_imports)]

mod error;
mod link;
mod message;
mod token_table;

pub use error::Error;
pub use link::{ControlLink, CONNECT_TIMEOUT, MAX_CONSECUTIVE_FAILURES};
pub use message::{Handshake, Message};
pub use token_table::{PendingTokenTable, TokenGenerator, MAX_PENDING_TOKENS};

/// Result type used throughout this crate.
pub type Result<T> = std::result::Result<T, Error>;
