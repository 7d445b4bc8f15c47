// Copyright 2022 Ryan Seipp
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Growable, contiguous byte buffer used for both a session's inbound and
//! outbound byte queues.
//!
//! Growth doubles capacity when space is exhausted. Shrinking halves
//! capacity once occupancy drops below 25%, with a floor at the buffer's
//! initial capacity — the policy called for when re-deriving the worker's
//! receive-buffer sizing behavior, since the source's own condition against
//! `nextCapacity` could not be trusted as written.

use std::{
    alloc::{self, Layout},
    borrow::{Borrow, BorrowMut},
    io::Write,
    ops::{Deref, DerefMut},
    ptr::{copy, copy_nonoverlapping, NonNull},
};

/// A growable, contiguous byte buffer.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    cap: usize,
    read_offset: usize,
    write_offset: usize,
    initial_capacity: usize,
}

impl Buffer {
    /// Creates a new `Buffer` whose capacity never shrinks below
    /// `initial_capacity`.
    pub fn new(initial_capacity: usize) -> Self {
        let initial_capacity = initial_capacity.next_power_of_two().max(1);
        let mut result = Self {
            ptr: NonNull::dangling(),
            cap: 0,
            read_offset: 0,
            write_offset: 0,
            initial_capacity,
        };
        result.grow_to_capacity(initial_capacity);
        result
    }

    /// Reserves space for at least `capacity` additional bytes.
    pub fn reserve(&mut self, capacity: usize) {
        self.grow_to_capacity(self.write_offset + capacity);
    }

    /// Bytes currently available to read.
    pub fn remaining(&self) -> usize {
        self.write_offset - self.read_offset
    }

    /// Bytes of capacity currently available for writing without growing.
    pub fn remaining_mut(&self) -> usize {
        self.cap - self.write_offset
    }

    /// Current write position.
    pub fn write_pos(&self) -> usize {
        self.write_offset
    }

    /// Pointer to the next unread byte. Valid for `remaining()` bytes.
    pub fn read_ptr(&self) -> *mut u8 {
        // Safety: offsets are kept within the allocation by `compact` and
        // the mutators below; the result never exceeds `isize::MAX` since we
        // never allocate more than that.
        unsafe { self.ptr.as_ptr().add(self.read_offset) }
    }

    /// Pointer to the next writable byte. Valid for `remaining_mut()` bytes.
    pub fn write_ptr(&self) -> *mut u8 {
        // Safety: see `read_ptr`.
        unsafe { self.ptr.as_ptr().add(self.write_offset) }
    }

    /// Marks `amount` bytes as read, freeing them for eventual reuse, and
    /// triggers a shrink check.
    pub fn mark_read(&mut self, amount: usize) {
        self.read_offset = self.write_offset.min(self.read_offset + amount);
        self.compact();
        self.maybe_shrink();
    }

    /// Marks `amount` bytes as written.
    pub fn mark_written(&mut self, amount: usize) {
        self.write_offset = self.cap.min(self.write_offset + amount);
    }

    fn grow(&mut self) {
        let new_cap = if self.cap == 0 { self.initial_capacity } else { 2 * self.cap };
        self.grow_to_capacity(new_cap);
    }

    fn grow_to_capacity(&mut self, capacity: usize) {
        assert!(capacity <= isize::MAX as usize);
        let new_cap = capacity.next_power_of_two().min(isize::MAX as usize);
        if new_cap <= self.cap {
            return;
        }

        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        let new_ptr = if self.cap == 0 {
            // Safety: allocation failure handled below; layout non-zero-sized.
            unsafe { alloc::alloc(new_layout) }
        } else {
            let old_layout = Layout::array::<u8>(self.cap).unwrap();
            let old_ptr = self.ptr.as_ptr();
            // Safety: allocation failure handled below; layout non-zero-sized.
            unsafe { alloc::realloc(old_ptr, old_layout, new_layout.size()) }
        };

        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    fn shrink_to_capacity(&mut self, capacity: usize) {
        let new_cap = capacity.max(self.initial_capacity).next_power_of_two();
        if new_cap >= self.cap {
            return;
        }

        let old_layout = Layout::array::<u8>(self.cap).unwrap();
        let new_layout = Layout::array::<u8>(new_cap).unwrap();
        // Safety: allocation failure handled below; layout non-zero-sized.
        let new_ptr = unsafe { alloc::realloc(self.ptr.as_ptr(), old_layout, new_layout.size()) };
        self.ptr = match NonNull::new(new_ptr) {
            Some(p) => p,
            None => alloc::handle_alloc_error(new_layout),
        };
        self.cap = new_cap;
    }

    /// Halves capacity once occupancy drops below 25%, never below
    /// `initial_capacity`.
    fn maybe_shrink(&mut self) {
        if self.cap <= self.initial_capacity {
            return;
        }
        if self.remaining() * 4 < self.cap {
            self.shrink_to_capacity(self.cap / 2);
        }
    }

    fn clear(&mut self) {
        self.read_offset = 0;
        self.write_offset = 0;
        self.shrink_to_capacity(self.initial_capacity);
    }

    /// Slides unread bytes to the front of the buffer when there is enough
    /// slack ahead of `read_offset` to make further writes land without
    /// growing.
    fn compact(&mut self) {
        if self.remaining() == 0 {
            self.clear();
            return;
        }

        if self.read_offset > self.cap / 2 {
            if self.remaining() < self.read_offset {
                // Safety: regions do not overlap since remaining < read_offset.
                unsafe { copy_nonoverlapping(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            } else {
                // Safety: both regions are within the single allocation.
                unsafe { copy(self.read_ptr(), self.ptr.as_ptr(), self.remaining()) }
            }
            self.write_offset = self.remaining();
            self.read_offset = 0;
        }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        if self.cap != 0 {
            let layout = Layout::array::<u8>(self.cap).unwrap();
            // Safety: `u8` needs no drop glue; `ptr`/`cap` describe the live allocation.
            unsafe { alloc::dealloc(self.ptr.as_ptr(), layout) }
        }
    }
}

impl Borrow<[u8]> for Buffer {
    fn borrow(&self) -> &[u8] {
        // Safety: see `read_ptr`; no mutable borrow can coexist with this one.
        unsafe { std::slice::from_raw_parts(self.read_ptr(), self.remaining()) }
    }
}

impl BorrowMut<[u8]> for Buffer {
    fn borrow_mut(&mut self) -> &mut [u8] {
        // Safety: see `write_ptr`; exclusive borrow of `self` is held.
        unsafe { std::slice::from_raw_parts_mut(self.write_ptr(), self.remaining_mut()) }
    }
}

impl Deref for Buffer {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.borrow()
    }
}

impl DerefMut for Buffer {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.borrow_mut()
    }
}

impl Write for Buffer {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        if self.remaining_mut() < buf.len() {
            self.reserve(buf.len());
        }
        self.deref_mut()[0..buf.len()].copy_from_slice(buf);
        self.mark_written(buf.len());
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl wire::ByteSource for Buffer {
    fn remaining(&self) -> usize {
        Buffer::remaining(self)
    }

    fn peek(&self) -> &[u8] {
        self.borrow()
    }

    fn consume(&mut self, n: usize) {
        self.mark_read(n);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn write_then_read_round_trips() {
        let mut buf = Buffer::new(16);
        buf.write_all(b"hello world").unwrap();
        assert_eq!(buf.remaining(), 11);
        assert_eq!(&*buf, b"hello world");
        buf.mark_read(11);
        assert_eq!(buf.remaining(), 0);
    }

    #[test]
    fn grows_past_initial_capacity() {
        let mut buf = Buffer::new(4);
        let data = vec![0xAAu8; 1000];
        buf.write_all(&data).unwrap();
        assert_eq!(buf.remaining(), 1000);
    }

    #[test]
    fn shrinks_back_toward_initial_capacity_when_drained() {
        let mut buf = Buffer::new(8);
        let data = vec![0xAAu8; 10_000];
        buf.write_all(&data).unwrap();
        let grown_cap = buf.cap;
        assert!(grown_cap > 8);

        buf.mark_read(10_000);
        assert_eq!(buf.remaining(), 0);
        assert!(buf.cap < grown_cap);
        assert!(buf.cap >= 8);
    }
}
