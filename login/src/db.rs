//! Glue between `dbengine`'s FIFO-queued [`DatabaseConnection`] and the
//! reactor's suspension contract: [`Database::try_run`] either finishes a
//! request outright or hands back the `eventfd` the caller must suspend on
//! via `Outcome::Suspend`, exactly as §4.5 describes.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use dbengine::connection::{DatabaseConnection, LockOutcome};
use dbengine::driver::memory::MemoryDriver;
use dbengine::request::{DatabaseRequest, DatabaseResult, RequestParams};

/// Outcome of [`Database::try_run`].
pub enum DbOutcome {
    /// The request ran to completion inside this call.
    Ready(DatabaseResult),
    /// Another caller is mid-request; wait for `fd` to become readable,
    /// then retry the same `RequestParams`.
    Suspend(RawFd),
}

/// A shared handle to the one database connection a login process keeps,
/// cloned into every worker's handler.
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<DatabaseConnection<MemoryDriver>>>,
}

impl Database {
    /// Wraps a fresh, empty in-memory store.
    pub fn new() -> Self {
        Self { conn: Arc::new(Mutex::new(DatabaseConnection::new(MemoryDriver::new()))) }
    }

    /// Attempts to run `params` to completion. The `Mutex` here only ever
    /// guards the O(1) `lock`/`take`/`restore`/`unlock` bookkeeping calls;
    /// the request itself runs outside it so a slow statement on one
    /// worker never blocks another's bookkeeping.
    pub fn try_run(&self, params: RequestParams) -> dbengine::Result<DbOutcome> {
        let driver = {
            let mut conn = self.conn.lock().unwrap();
            match conn.lock()? {
                LockOutcome::Acquired => conn.take(),
                LockOutcome::Queued(fd) => return Ok(DbOutcome::Suspend(fd)),
            }
        };

        let mut request = DatabaseRequest::new(driver, params);
        let mut status = 0;
        loop {
            match request.execute(status)? {
                0 => break,
                mask if mask > 0 => {
                    // `MemoryDriver` never truly suspends (§4.5's Non-goal
                    // that this engine doesn't pick a MySQL client), so a
                    // positive mask never actually occurs in practice; if
                    // it did, a real driver's socket would be registered
                    // here instead of looping.
                    status = mask;
                    continue;
                }
                neg => return Err(dbengine::Error::Mysql(neg)),
            }
        }

        let result = request.result().expect("execute returned 0").clone();
        let driver = request.into_driver();
        let mut conn = self.conn.lock().unwrap();
        conn.restore(driver);
        conn.unlock()?;
        Ok(DbOutcome::Ready(result))
    }
}

impl Default for Database {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Database {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Database").finish()
    }
}
