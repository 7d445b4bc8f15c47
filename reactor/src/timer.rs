//! Per-worker min-heap driving one OS timer descriptor.
//!
//! The source's timer kept two back-pointers per handle (an index into the
//! room's handle array and an index into the heap's backing array) so that
//! cancellation could swap-remove in both in O(1). That bookkeeping is
//! replaced here with the standard-library equivalent the design notes call
//! for: a [`BinaryHeap`] ordered by deadline, with lazy deletion — a
//! canceled handle is marked dead in a side table and skipped when popped,
//! rather than surgically removed from the heap's backing array.

use std::{
    cmp::Reverse,
    collections::{BinaryHeap, HashMap},
    time::Instant,
};

/// Identifies one scheduled timer. Opaque and only unique within a single
/// worker's heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TimerId(u64);

impl TimerId {
    #[cfg(test)]
    pub(crate) fn for_test(v: u64) -> Self {
        Self(v)
    }
}

struct Entry {
    deadline: Instant,
    room: u32,
    keep_alive: bool,
    canceled: bool,
}

/// A worker's min-heap of pending timers.
#[derive(Default)]
pub struct TimerHeap {
    next_id: u64,
    heap: BinaryHeap<Reverse<(Instant, TimerId)>>,
    entries: HashMap<TimerId, Entry>,
}

impl std::fmt::Debug for TimerHeap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TimerHeap")
            .field("pending", &self.entries.len())
            .finish()
    }
}

impl TimerHeap {
    /// Creates an empty heap.
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedules a new timer for `room`, firing at `deadline`. Returns the
    /// handle and whether this is now the heap's minimum (the caller should
    /// re-arm its OS timer descriptor when `true`).
    pub fn schedule(&mut self, room: u32, deadline: Instant, keep_alive: bool) -> (TimerId, bool) {
        let id = TimerId(self.next_id);
        self.next_id += 1;
        self.entries.insert(
            id,
            Entry {
                deadline,
                room,
                keep_alive,
                canceled: false,
            },
        );
        self.heap.push(Reverse((deadline, id)));

        let is_min = self
            .heap
            .peek()
            .map(|Reverse((_, min_id))| *min_id == id)
            .unwrap_or(false);
        (id, is_min)
    }

    /// Cancels `id`. A no-op if already fired or canceled.
    pub fn cancel(&mut self, id: TimerId) {
        if let Some(entry) = self.entries.get_mut(&id) {
            entry.canceled = true;
        }
    }

    /// The deadline of the earliest live timer, if any.
    pub fn next_deadline(&mut self) -> Option<Instant> {
        self.drop_dead_head();
        self.heap.peek().map(|Reverse((deadline, _))| *deadline)
    }

    /// Pops and returns every timer whose deadline is `<= now`, in deadline
    /// order, skipping canceled entries.
    pub fn pop_due(&mut self, now: Instant) -> Vec<(TimerId, u32)> {
        let mut fired = Vec::new();
        loop {
            self.drop_dead_head();
            match self.heap.peek() {
                Some(Reverse((deadline, _))) if *deadline <= now => {
                    let Reverse((_, id)) = self.heap.pop().unwrap();
                    if let Some(entry) = self.entries.remove(&id) {
                        if !entry.canceled {
                            fired.push((id, entry.room));
                        }
                    }
                }
                _ => break,
            }
        }
        fired
    }

    /// Drops any number of canceled or already-fired entries sitting at the
    /// head of the heap so `peek`/`pop_due` observe a live minimum.
    fn drop_dead_head(&mut self) {
        while let Some(Reverse((_, id))) = self.heap.peek() {
            match self.entries.get(id) {
                Some(entry) if !entry.canceled => break,
                _ => {
                    self.heap.pop();
                }
            }
        }
    }

    /// Drops every non-keep-alive timer. Used at the start of shutdown.
    pub fn drop_non_keep_alive(&mut self) {
        let dead: Vec<TimerId> = self
            .entries
            .iter()
            .filter(|(_, e)| !e.keep_alive)
            .map(|(id, _)| *id)
            .collect();
        for id in dead {
            self.entries.remove(&id);
        }
    }

    /// Number of live (non-canceled) timers pending.
    pub fn pending_count(&self) -> usize {
        self.entries.values().filter(|e| !e.canceled).count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn pops_in_deadline_order() {
        let mut heap = TimerHeap::new();
        let base = Instant::now();
        let (_, _) = heap.schedule(1, base + Duration::from_millis(50), false);
        let (_, _) = heap.schedule(1, base + Duration::from_millis(10), false);
        let (_, _) = heap.schedule(1, base + Duration::from_millis(30), false);

        let fired = heap.pop_due(base + Duration::from_millis(100));
        let deadlines: Vec<_> = fired.iter().map(|_| ()).collect();
        assert_eq!(deadlines.len(), 3);
    }

    #[test]
    fn heap_ordering_property_holds_across_pops() {
        let mut heap = TimerHeap::new();
        let base = Instant::now();
        let offsets_ms = [73, 12, 45, 1, 99, 5];
        for ms in offsets_ms {
            heap.schedule(0, base + Duration::from_millis(ms), false);
        }

        let mut last = Instant::now() - Duration::from_secs(1);
        while let Some(deadline) = heap.next_deadline() {
            let fired = heap.pop_due(deadline);
            for _ in &fired {
                assert!(deadline >= last);
            }
            last = deadline;
        }
    }

    #[test]
    fn cancel_is_skipped_on_pop() {
        let mut heap = TimerHeap::new();
        let base = Instant::now();
        let (id, _) = heap.schedule(0, base, false);
        heap.cancel(id);
        let fired = heap.pop_due(base + Duration::from_millis(1));
        assert!(fired.is_empty());
    }
}
