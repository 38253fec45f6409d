// SPDX-License-Identifier: GPL-3.0-only
//! Monotonic identity allocation (spec.md §3, §4.A).
//!
//! Six identity spaces exist: `instance_id`, `root_id`, `stream_id`,
//! `capture_id`, `native_id`, `rig_id`. Each is a `NonZeroU64` newtype so
//! that "0 is the documented sentinel" is enforced by the type system: there
//! is no way to construct e.g. an `InstanceId` with value 0 outside this
//! module, and `Option<InstanceId>` already has the same size as `u64`.

use std::fmt;
use std::num::NonZeroU64;

macro_rules! id_type {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(NonZeroU64);

        impl $name {
            /// Construct from a raw value. Panics if `raw == 0`; only the
            /// [`IdAllocator`] should ever call this in production code.
            pub fn from_raw(raw: u64) -> Self {
                Self(NonZeroU64::new(raw).expect(concat!(
                    stringify!($name),
                    ": 0 is the reserved sentinel, not a valid id"
                )))
            }

            pub fn get(self) -> u64 {
                self.0.get()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}", self.0)
            }
        }

        impl serde::Serialize for $name {
            fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
            where
                S: serde::Serializer,
            {
                serializer.serialize_u64(self.0.get())
            }
        }
    };
}

id_type!(InstanceId);
id_type!(RootId);
id_type!(StreamId);
id_type!(CaptureId);
id_type!(NativeId);
id_type!(RigId);

/// Issues monotonic ids, one independent cursor per identity space.
///
/// All `allocate_*` methods must only be called from the core thread (spec.md
/// §4.A: "incremented only on the core thread").
#[derive(Debug, Default)]
pub struct IdAllocator {
    instance: u64,
    root: u64,
    stream: u64,
    capture: u64,
    native: u64,
    rig: u64,
}

impl IdAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allocate_instance(&mut self) -> InstanceId {
        self.instance += 1;
        InstanceId::from_raw(self.instance)
    }

    pub fn allocate_root(&mut self) -> RootId {
        self.root += 1;
        RootId::from_raw(self.root)
    }

    pub fn allocate_stream(&mut self) -> StreamId {
        self.stream += 1;
        StreamId::from_raw(self.stream)
    }

    pub fn allocate_capture(&mut self) -> CaptureId {
        self.capture += 1;
        CaptureId::from_raw(self.capture)
    }

    pub fn allocate_native(&mut self) -> NativeId {
        self.native += 1;
        NativeId::from_raw(self.native)
    }

    pub fn allocate_rig(&mut self) -> RigId {
        self.rig += 1;
        RigId::from_raw(self.rig)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ids_start_at_one_and_increase_monotonically() {
        let mut alloc = IdAllocator::new();
        let a = alloc.allocate_instance();
        let b = alloc.allocate_instance();
        let c = alloc.allocate_instance();
        assert_eq!(a.get(), 1);
        assert_eq!(b.get(), 2);
        assert_eq!(c.get(), 3);
        assert!(a < b && b < c);
    }

    #[test]
    fn id_spaces_are_independent() {
        let mut alloc = IdAllocator::new();
        let inst = alloc.allocate_instance();
        let stream = alloc.allocate_stream();
        assert_eq!(inst.get(), 1);
        assert_eq!(stream.get(), 1);
    }

    #[test]
    fn never_returns_zero() {
        let mut alloc = IdAllocator::new();
        for _ in 0..1000 {
            assert_ne!(alloc.allocate_native().get(), 0);
        }
    }

    proptest::proptest! {
        #[test]
        fn instance_ids_are_strictly_increasing_over_any_allocation_count(n in 1u32..500) {
            let mut alloc = IdAllocator::new();
            let mut previous = None;
            for _ in 0..n {
                let id = alloc.allocate_instance();
                if let Some(previous) = previous {
                    prop_assert!(id > previous);
                }
                previous = Some(id);
            }
        }

        #[test]
        fn independent_spaces_never_observe_each_others_counters(n in 1u32..200) {
            let mut alloc = IdAllocator::new();
            for _ in 0..n {
                alloc.allocate_instance();
            }
            let stream = alloc.allocate_stream();
            prop_assert_eq!(stream.get(), 1, "stream space must not be perturbed by instance allocations");
        }
    }
}
