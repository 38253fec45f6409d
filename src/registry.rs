// SPDX-License-Identifier: GPL-3.0-only
//! Lifecycle registry for native objects (spec.md §4.D).
//!
//! Indexes `NativeObjectRecord`s by `root_id`, by owning device instance, and
//! by phase, so the core loop can answer "what belongs to this root" and
//! "what is still torn-down-pending" without a linear scan.

use crate::ids::{InstanceId, NativeId, RootId};
use crate::model::{NativeObjectInfo, NativeObjectPhase, NativeObjectRecord};
use std::collections::HashMap;

#[derive(Debug, Default)]
pub struct Registry {
    records: HashMap<NativeId, NativeObjectRecord>,
    by_root: HashMap<RootId, Vec<NativeId>>,
    by_owner_device: HashMap<InstanceId, Vec<NativeId>>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly created native object. Duplicate `native_id` is a
    /// programming error, not a recoverable condition (spec.md §4.D: "Reject
    /// duplicate native_id as a bug").
    pub fn on_created(&mut self, info: NativeObjectInfo, now_ns: u64) {
        assert!(
            !self.records.contains_key(&info.native_id),
            "duplicate native_id {:?}: provider reported a create for an id already tracked",
            info.native_id
        );
        let record = NativeObjectRecord {
            native_id: info.native_id,
            object_type: info.object_type,
            phase: info.phase,
            owner_rig_id: info.owner_rig_id,
            owner_device_instance_id: info.owner_device_instance_id,
            owner_stream_id: info.owner_stream_id,
            root_id: info.root_id,
            created_ns: now_ns,
            destroyed_ns: None,
            bytes_allocated: info.bytes_allocated,
            buffers_in_use: 0,
        };
        self.by_root.entry(record.root_id).or_default().push(record.native_id);
        if let Some(owner) = record.owner_device_instance_id {
            self.by_owner_device.entry(owner).or_default().push(record.native_id);
        }
        self.records.insert(record.native_id, record);
    }

    /// Mark a native object destroyed. Unknown `native_id` is ignored:
    /// providers may report destruction for objects this registry never
    /// learned about during startup races, which is not itself a bug.
    pub fn on_destroyed(&mut self, native_id: NativeId, now_ns: u64) {
        if let Some(record) = self.records.get_mut(&native_id) {
            record.phase = NativeObjectPhase::Destroyed;
            record.destroyed_ns = Some(now_ns);
        }
    }

    pub fn get(&self, native_id: NativeId) -> Option<&NativeObjectRecord> {
        self.records.get(&native_id)
    }

    pub fn by_root(&self, root_id: RootId) -> impl Iterator<Item = &NativeObjectRecord> {
        self.by_root
            .get(&root_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.records.get(id))
    }

    pub fn by_owner_device(&self, instance_id: InstanceId) -> impl Iterator<Item = &NativeObjectRecord> {
        self.by_owner_device
            .get(&instance_id)
            .into_iter()
            .flatten()
            .filter_map(move |id| self.records.get(id))
    }

    pub fn iter(&self) -> impl Iterator<Item = &NativeObjectRecord> {
        self.records.values()
    }

    /// Roots with at least one record still present (not yet `Destroyed`)
    /// whose owner (rig or device instance) no longer exists among the
    /// given live ids (spec.md §4.H "detached_root_ids").
    pub fn detached_roots(
        &self,
        live_instance_ids: &[InstanceId],
        live_rig_ids: &[crate::ids::RigId],
        live_stream_ids: &[crate::ids::StreamId],
    ) -> Vec<RootId> {
        let mut detached = Vec::new();
        for (&root_id, native_ids) in &self.by_root {
            let present = native_ids.iter().filter_map(|id| self.records.get(id)).any(|r| r.phase != NativeObjectPhase::Destroyed);
            if !present {
                continue;
            }
            let orphaned = native_ids.iter().filter_map(|id| self.records.get(id)).any(|r| {
                if r.phase == NativeObjectPhase::Destroyed {
                    return false;
                }
                let has_owner = r.owner_device_instance_id.is_some() || r.owner_rig_id.is_some() || r.owner_stream_id.is_some();
                if !has_owner {
                    return false;
                }
                let owner_alive = r.owner_device_instance_id.is_some_and(|owner| live_instance_ids.contains(&owner))
                    || r.owner_rig_id.is_some_and(|owner| live_rig_ids.contains(&owner))
                    || r.owner_stream_id.is_some_and(|owner| live_stream_ids.contains(&owner));
                !owner_alive
            });
            if orphaned {
                detached.push(root_id);
            }
        }
        detached
    }

    /// Drop bookkeeping for records destroyed at least `retention_ms` ago,
    /// freeing the registry's memory for objects no one will query again
    /// (spec.md §4.D: retention-bounded sweep). Returns the count reaped.
    pub fn sweep(&mut self, now_ns: u64, retention_ms: u64) -> usize {
        let retention_ns = retention_ms.saturating_mul(1_000_000);
        let expired: Vec<NativeId> = self
            .records
            .values()
            .filter(|r| {
                r.destroyed_ns
                    .is_some_and(|destroyed| now_ns.saturating_sub(destroyed) >= retention_ns)
            })
            .map(|r| r.native_id)
            .collect();
        for native_id in &expired {
            if let Some(record) = self.records.remove(native_id) {
                if let Some(ids) = self.by_root.get_mut(&record.root_id) {
                    ids.retain(|id| id != native_id);
                    if ids.is_empty() {
                        self.by_root.remove(&record.root_id);
                    }
                }
                if let Some(owner) = record.owner_device_instance_id {
                    if let Some(ids) = self.by_owner_device.get_mut(&owner) {
                        ids.retain(|id| id != native_id);
                        if ids.is_empty() {
                            self.by_owner_device.remove(&owner);
                        }
                    }
                }
            }
        }
        expired.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use crate::model::NativeObjectType;

    fn info(native_id: NativeId, root_id: RootId, owner: Option<InstanceId>) -> NativeObjectInfo {
        NativeObjectInfo {
            native_id,
            object_type: NativeObjectType::Buffer,
            phase: NativeObjectPhase::Created,
            owner_rig_id: None,
            owner_device_instance_id: owner,
            owner_stream_id: None,
            root_id,
            bytes_allocated: 4096,
        }
    }

    #[test]
    #[should_panic(expected = "duplicate native_id")]
    fn duplicate_create_panics() {
        let mut alloc = IdAllocator::new();
        let mut reg = Registry::new();
        let native_id = alloc.allocate_native();
        let root_id = alloc.allocate_root();
        reg.on_created(info(native_id, root_id, None), 0);
        reg.on_created(info(native_id, root_id, None), 0);
    }

    #[test]
    fn destroy_unknown_id_is_ignored() {
        let mut alloc = IdAllocator::new();
        let mut reg = Registry::new();
        reg.on_destroyed(alloc.allocate_native(), 10);
    }

    #[test]
    fn sweep_reaps_only_past_retention() {
        let mut alloc = IdAllocator::new();
        let mut reg = Registry::new();
        let native_id = alloc.allocate_native();
        let root_id = alloc.allocate_root();
        reg.on_created(info(native_id, root_id, None), 0);
        reg.on_destroyed(native_id, 1_000);
        assert_eq!(reg.sweep(1_000 + 500_000_000, 1_000), 0);
        assert_eq!(reg.sweep(1_000 + 1_000_000_000, 1_000), 1);
        assert!(reg.get(native_id).is_none());
    }

    #[test]
    fn detached_root_detects_orphaned_owner() {
        let mut alloc = IdAllocator::new();
        let mut reg = Registry::new();
        let owner = alloc.allocate_instance();
        let native_id = alloc.allocate_native();
        let root_id = alloc.allocate_root();
        reg.on_created(info(native_id, root_id, Some(owner)), 0);
        assert_eq!(reg.detached_roots(&[], &[], &[]), vec![root_id]);
        assert_eq!(reg.detached_roots(&[owner], &[], &[]), Vec::<RootId>::new());
    }

    #[test]
    fn by_root_and_by_owner_indexes_return_matching_records() {
        let mut alloc = IdAllocator::new();
        let mut reg = Registry::new();
        let owner = alloc.allocate_instance();
        let root_id = alloc.allocate_root();
        let n1 = alloc.allocate_native();
        let n2 = alloc.allocate_native();
        reg.on_created(info(n1, root_id, Some(owner)), 0);
        reg.on_created(info(n2, root_id, None), 0);
        assert_eq!(reg.by_root(root_id).count(), 2);
        assert_eq!(reg.by_owner_device(owner).count(), 1);
    }
}
