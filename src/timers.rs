// SPDX-License-Identifier: GPL-3.0-only
//! Min-heap of (deadline, tag) with logical cancellation (spec.md §4.B).

use crate::ids::{InstanceId, StreamId};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashSet};

/// Opaque payload for a scheduled timer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimerTag {
    /// Warm-hold expiry for a device instance (spec.md "Warm & retention
    /// scheduling").
    WarmExpiry(InstanceId),
    /// Nearest upcoming retention-sweep deadline (spec.md §4.D).
    RetentionSweep,
    /// Stream-starvation watchdog (spec.md §4.F: `FLOWING → STARVED`).
    StreamStarveWatchdog(StreamId),
}

/// Handle returned by [`TimerHeap::schedule`], used to [`TimerHeap::cancel`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TimerHandle(u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Entry {
    deadline_ns: u64,
    handle: TimerHandle,
    tag: TimerTag,
}

// Ordered by deadline, earliest first: `BinaryHeap` is a max-heap, so we
// compare by `Reverse(deadline)`.
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        Reverse(self.deadline_ns).cmp(&Reverse(other.deadline_ns))
    }
}

/// Min-heap keyed by absolute monotonic deadline.
///
/// Cancellation is logical: a cancelled handle is recorded in a tombstone
/// set and skipped when it is eventually popped, rather than being removed
/// from the heap immediately (spec.md §4.B: "Cancellation is logical
/// (tombstone); drained on pop").
#[derive(Debug, Default)]
pub struct TimerHeap {
    heap: BinaryHeap<Entry>,
    cancelled: HashSet<TimerHandle>,
    next_handle: u64,
}

impl TimerHeap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Schedule `tag` to fire at `deadline_ns`.
    pub fn schedule(&mut self, deadline_ns: u64, tag: TimerTag) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle(self.next_handle);
        self.heap.push(Entry {
            deadline_ns,
            handle,
            tag,
        });
        handle
    }

    /// Logically cancel a previously scheduled timer. No-op if already
    /// fired or already cancelled.
    pub fn cancel(&mut self, handle: TimerHandle) {
        self.cancelled.insert(handle);
    }

    /// Peek the next non-cancelled deadline without popping it.
    pub fn peek_deadline(&mut self) -> Option<u64> {
        self.drop_cancelled_front();
        self.heap.peek().map(|e| e.deadline_ns)
    }

    /// Pop every non-cancelled timer whose deadline is `<= now_ns`, in
    /// deadline order.
    pub fn pop_due(&mut self, now_ns: u64) -> Vec<TimerTag> {
        let mut due = Vec::new();
        loop {
            self.drop_cancelled_front();
            match self.heap.peek() {
                Some(e) if e.deadline_ns <= now_ns => {
                    let entry = self.heap.pop().unwrap();
                    due.push(entry.tag);
                }
                _ => break,
            }
        }
        due
    }

    fn drop_cancelled_front(&mut self) {
        while let Some(e) = self.heap.peek() {
            if self.cancelled.remove(&e.handle) {
                self.heap.pop();
            } else {
                break;
            }
        }
    }
}
