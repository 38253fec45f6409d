// SPDX-License-Identifier: GPL-3.0-only
//! Lock-free snapshot publication (spec.md §4.I).

use crate::snapshot::Snapshot;
use arc_swap::ArcSwap;
use std::sync::{Arc, Mutex};

type Observer = Box<dyn Fn(u64, u64) + Send + Sync>;

/// Holds the current [`Snapshot`] behind an `ArcSwap` so readers never block
/// on the core thread's publish and the core thread never blocks on a slow
/// reader.
pub struct Publisher {
    current: ArcSwap<Snapshot>,
    observers: Mutex<Vec<Observer>>,
}

impl Publisher {
    pub fn new() -> Self {
        Self {
            current: ArcSwap::from_pointee(Snapshot::empty()),
            observers: Mutex::new(Vec::new()),
        }
    }

    /// Current snapshot. Cheap: one atomic load plus an `Arc` clone.
    pub fn load(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Publish a new snapshot and notify observers synchronously on the
    /// calling (core) thread. Observers must not reenter the publisher or
    /// the core (spec.md §4.I: documented contract, not runtime-enforced).
    pub fn publish(&self, snapshot: Snapshot) {
        let generation = snapshot.generation;
        let topology_gen = snapshot.topology_gen;
        self.current.store(Arc::new(snapshot));
        for observer in self.observers.lock().unwrap().iter() {
            observer(generation, topology_gen);
        }
    }

    /// Register an observer invoked as `(generation, topology_gen)` after
    /// every publish.
    pub fn subscribe(&self, observer: Observer) {
        self.observers.lock().unwrap().push(observer);
    }
}

impl Default for Publisher {
    fn default() -> Self {
        Self::new()
    }
}
