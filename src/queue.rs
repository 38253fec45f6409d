// SPDX-License-Identifier: GPL-3.0-only
//! Bounded MPSC-style queues draining into the core thread (spec.md §4.C).
//!
//! Hand-rolled rather than pulled from a channel crate: the core loop needs
//! to block on a *single* condition variable shared across the command
//! queue, the event queue, and the timer heap's nearest deadline (spec.md
//! §4.C: "core loop waits on a condition variable signalled by either queue,
//! timer deadline, or shutdown"). No off-the-shelf MPSC channel exposes that
//! shape, so `BoundedQueue` exists purely to be woken by an externally-held
//! `Condvar` it shares with its siblings.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// Error returned by [`BoundedQueue::try_enqueue`] when the queue is at
/// capacity. Producers never block (spec.md §4.C: "Enqueue returns
/// QUEUE_FULL rather than blocking indefinitely").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueFull;

impl std::fmt::Display for QueueFull {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "queue full")
    }
}

impl std::error::Error for QueueFull {}

/// A bounded FIFO queue that notifies a shared [`Condvar`] on every push.
pub struct BoundedQueue<T> {
    capacity: usize,
    inner: Mutex<VecDeque<T>>,
    signal: Arc<Condvar>,
}

impl<T> BoundedQueue<T> {
    /// Create a new queue with the given capacity, notifying `signal`
    /// whenever an item is pushed.
    pub fn new(capacity: usize, signal: Arc<Condvar>) -> Self {
        Self {
            capacity,
            inner: Mutex::new(VecDeque::with_capacity(capacity.min(64))),
            signal,
        }
    }

    /// Enqueue `item`, returning [`QueueFull`] if the queue is at capacity.
    /// Never blocks.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueFull> {
        let mut guard = self.inner.lock().unwrap();
        if guard.len() >= self.capacity {
            return Err(QueueFull);
        }
        guard.push_back(item);
        drop(guard);
        self.signal.notify_all();
        Ok(())
    }

    /// Pop up to `max` items in FIFO order. Never blocks; returns an empty
    /// `Vec` if the queue is empty.
    pub fn drain(&self, max: usize) -> Vec<T> {
        let mut guard = self.inner.lock().unwrap();
        let n = guard.len().min(max);
        guard.drain(..n).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.lock().unwrap().is_empty()
    }

    pub fn len(&self) -> usize {
        self.inner.lock().unwrap().len()
    }
}

/// The shared wait primitive the core loop blocks on: a mutex-protected
/// "something happened" flag plus a condition variable, wired into both
/// queues and signalled by shutdown.
///
/// Step 1 of the core loop (spec.md §4.J): "Wait on CV until: command
/// enqueued, event enqueued, nearest timer deadline, or shutdown requested."
pub struct WaitSignal {
    condvar: Arc<Condvar>,
    gate: Mutex<()>,
}

impl WaitSignal {
    pub fn new() -> Self {
        Self {
            condvar: Arc::new(Condvar::new()),
            gate: Mutex::new(()),
        }
    }

    /// Clone of the underlying `Condvar`, to be shared with queues that must
    /// notify this wait point.
    pub fn condvar(&self) -> Arc<Condvar> {
        Arc::clone(&self.condvar)
    }

    /// Block until notified or `timeout` elapses, whichever comes first.
    /// Used with a timeout computed from the nearest timer deadline so the
    /// loop wakes up in time to process it even if no queue is touched.
    pub fn wait(&self, timeout: Option<Duration>) {
        let guard = self.gate.lock().unwrap();
        match timeout {
            Some(d) => {
                let _ = self.condvar.wait_timeout(guard, d).unwrap();
            }
            None => {
                let _ = self.condvar.wait(guard).unwrap();
            }
        }
    }

    /// Wake up anyone waiting (used by shutdown).
    pub fn notify(&self) {
        self.condvar.notify_all();
    }
}

impl Default for WaitSignal {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn enqueue_and_drain_preserve_fifo_order() {
        let signal = Arc::new(Condvar::new());
        let q: BoundedQueue<u32> = BoundedQueue::new(4, signal);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        q.try_enqueue(3).unwrap();
        assert_eq!(q.drain(usize::MAX), vec![1, 2, 3]);
    }

    #[test]
    fn enqueue_fails_when_full() {
        let signal = Arc::new(Condvar::new());
        let q: BoundedQueue<u32> = BoundedQueue::new(2, signal);
        q.try_enqueue(1).unwrap();
        q.try_enqueue(2).unwrap();
        assert_eq!(q.try_enqueue(3), Err(QueueFull));
    }

    #[test]
    fn drain_respects_max() {
        let signal = Arc::new(Condvar::new());
        let q: BoundedQueue<u32> = BoundedQueue::new(8, signal);
        for i in 0..5 {
            q.try_enqueue(i).unwrap();
        }
        let first = q.drain(2);
        assert_eq!(first, vec![0, 1]);
        let rest = q.drain(usize::MAX);
        assert_eq!(rest, vec![2, 3, 4]);
    }

    #[test]
    fn notify_wakes_a_waiter() {
        use std::thread;
        use std::time::Duration as StdDuration;

        let signal = Arc::new(WaitSignal::new());
        let s2 = Arc::clone(&signal);
        let handle = thread::spawn(move || {
            s2.wait(Some(StdDuration::from_secs(5)));
        });
        thread::sleep(StdDuration::from_millis(20));
        signal.notify();
        handle.join().unwrap();
    }
}
