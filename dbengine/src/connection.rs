//! Database connection (K): a single pipelined handle with a FIFO lock
//! queue (§4.5, §5's "each database connection has its FIFO lock queue").
//!
//! The engine never multiplexes requests over one handle; at most one
//! caller may be mid-request against a connection at a time. Waiters queue
//! on an `eventfd`, mirroring `database_connection_lock`/`_unlock` in
//! `original_source/src/database.c`.

use std::collections::VecDeque;
use std::os::unix::io::{AsRawFd, RawFd};

use crate::error::Result;

/// A one-shot, level-triggered wakeup descriptor usable with any reactor
/// that can register a raw fd for readability (mirrors the C engine's
/// `eventfd(0, 0)` calls).
pub struct EventFd(RawFd);

impl EventFd {
    /// Creates a fresh, unsignaled eventfd.
    pub fn new() -> Result<Self> {
        let fd = unsafe { libc::eventfd(0, 0) };
        if fd < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(Self(fd))
    }

    /// Signals the fd, waking whatever has it registered for readability.
    pub fn notify(&self) -> Result<()> {
        let one: u64 = 1;
        let ret = unsafe {
            libc::write(self.0, &one as *const u64 as *const libc::c_void, std::mem::size_of::<u64>())
        };
        if ret < 0 {
            return Err(std::io::Error::last_os_error().into());
        }
        Ok(())
    }
}

impl AsRawFd for EventFd {
    fn as_raw_fd(&self) -> RawFd {
        self.0
    }
}

impl std::fmt::Debug for EventFd {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("EventFd").field(&self.0).finish()
    }
}

impl Drop for EventFd {
    fn drop(&mut self) {
        unsafe {
            libc::close(self.0);
        }
    }
}

/// The result of calling [`DatabaseConnection::lock`].
#[derive(Debug)]
pub enum LockOutcome {
    /// The connection was idle; the caller now holds it.
    Acquired,
    /// Another holder is mid-request. The caller must register this fd
    /// for readability and retry `lock` (which will return `Acquired`)
    /// once it fires.
    Queued(RawFd),
}

/// Wraps a single driver handle `T` with the FIFO mutual-exclusion queue
/// described in §4.5. `T` is typically a [`crate::driver::QueryDriver`]
/// implementation; the connection itself is agnostic to what `T` is.
pub struct DatabaseConnection<T> {
    handle: T,
    locked: bool,
    waiters: VecDeque<EventFd>,
}

impl<T> DatabaseConnection<T> {
    /// Wraps `handle` in a fresh, unlocked connection.
    pub fn new(handle: T) -> Self {
        Self { handle, locked: false, waiters: VecDeque::new() }
    }

    /// Attempts to acquire exclusive access. If already held, the caller
    /// is queued behind every earlier waiter and must wait for its fd to
    /// become readable before calling `lock` again.
    pub fn lock(&mut self) -> Result<LockOutcome> {
        if !self.locked {
            self.locked = true;
            return Ok(LockOutcome::Acquired);
        }
        let fd = EventFd::new()?;
        let raw = fd.as_raw_fd();
        self.waiters.push_back(fd);
        Ok(LockOutcome::Queued(raw))
    }

    /// Releases the connection. If another caller is queued, the
    /// connection is handed directly to it (it remains logically locked,
    /// held now by the next waiter) rather than going idle.
    pub fn unlock(&mut self) -> Result<()> {
        match self.waiters.pop_front() {
            Some(fd) => fd.notify(),
            None => {
                self.locked = false;
                Ok(())
            }
        }
    }

    /// Whether the connection is currently held by anyone.
    pub fn is_locked(&self) -> bool {
        self.locked
    }

    /// Number of callers queued behind the current holder.
    pub fn queue_len(&self) -> usize {
        self.waiters.len()
    }

    /// Borrows the underlying driver handle.
    pub fn handle(&self) -> &T {
        &self.handle
    }

    /// Mutably borrows the underlying driver handle.
    pub fn handle_mut(&mut self) -> &mut T {
        &mut self.handle
    }
}

impl<T: Default> DatabaseConnection<T> {
    /// Removes the driver handle so it can be moved into a
    /// [`crate::request::DatabaseRequest`], leaving a default-constructed
    /// one in its place until [`Self::restore`] puts the real one back.
    /// Callers must only do this while holding the connection (i.e. after
    /// `lock` returns [`LockOutcome::Acquired`]).
    pub fn take(&mut self) -> T {
        std::mem::take(&mut self.handle)
    }

    /// Restores a handle previously removed with [`Self::take`].
    pub fn restore(&mut self, handle: T) {
        self.handle = handle;
    }
}

impl<T> std::fmt::Debug for DatabaseConnection<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DatabaseConnection")
            .field("locked", &self.locked)
            .field("queue_len", &self.waiters.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn first_lock_is_acquired_immediately() {
        let mut conn = DatabaseConnection::new(());
        assert!(matches!(conn.lock().unwrap(), LockOutcome::Acquired));
    }

    #[test]
    fn concurrent_lock_queues_fifo() {
        let mut conn = DatabaseConnection::new(());
        assert!(matches!(conn.lock().unwrap(), LockOutcome::Acquired));
        let first = match conn.lock().unwrap() {
            LockOutcome::Queued(fd) => fd,
            LockOutcome::Acquired => panic!("expected queued"),
        };
        let second = match conn.lock().unwrap() {
            LockOutcome::Queued(fd) => fd,
            LockOutcome::Acquired => panic!("expected queued"),
        };
        assert_ne!(first, second);
        assert_eq!(conn.queue_len(), 2);
    }

    #[test]
    fn unlock_with_no_waiters_goes_idle() {
        let mut conn = DatabaseConnection::new(());
        conn.lock().unwrap();
        conn.unlock().unwrap();
        assert!(!conn.is_locked());
    }

    #[test]
    fn unlock_with_waiters_stays_locked() {
        let mut conn = DatabaseConnection::new(());
        conn.lock().unwrap();
        conn.lock().unwrap();
        conn.unlock().unwrap();
        assert!(conn.is_locked());
        assert_eq!(conn.queue_len(), 0);
    }
}
