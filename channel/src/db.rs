//! Glue between `dbengine`'s FIFO-queued [`DatabaseConnection`] and the
//! reactor's suspension contract, identical in shape to `login::db` — see
//! that module's doc comment for the `Mutex` scoping rationale.

use std::os::unix::io::RawFd;
use std::sync::{Arc, Mutex};

use dbengine::connection::{DatabaseConnection, LockOutcome};
use dbengine::driver::memory::MemoryDriver;
use dbengine::request::{DatabaseRequest, DatabaseResult, RequestParams};

pub enum DbOutcome {
    Ready(DatabaseResult),
    Suspend(RawFd),
}

#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<DatabaseConnection<MemoryDriver>>>,
}

impl Database {
    pub fn new() -> Self {
        Self { conn: Arc::new(Mutex::new(DatabaseConnection::new(MemoryDriver::new()))) }
    }

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
