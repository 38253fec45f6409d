// SPDX-License-Identifier: GPL-3.0-only
//! Immutable snapshot builder (spec.md §4.H).
//!
//! A `Snapshot` is the one thing host threads ever read. It is built fresh
//! on the core thread each time state changes and handed to the
//! [`crate::publish::Publisher`] as an `Arc` so readers never see a
//! partially-updated view.

use crate::error::CommandError;
use crate::ids::{CaptureId, InstanceId, NativeId, RigId, RootId, StreamId};
use crate::model::{
    Device, DeviceMode, DevicePhase, NativeObjectPhase, NativeObjectType, Rig, RigMode, Stream,
    StreamIntent, StreamMode, StreamPhase, StopReason,
};
use crate::pixel_format::Fourcc;
use crate::registry::Registry;
use serde::Serialize;
use std::sync::Arc;

/// Schema version of the published [`Snapshot`] shape itself, bumped when a
/// field is added or removed (spec.md §3: hosts may branch on this).
pub const SCHEMA_VERSION: u64 = 1;

#[derive(Debug, Clone, Serialize)]
pub struct RigView {
    pub rig_id: RigId,
    pub name: String,
    pub mode: RigMode,
    pub member_hardware_ids: Vec<String>,
    pub active_capture_id: Option<CaptureId>,
    pub capture_profile_version: u64,
    pub triggered: u64,
    pub completed: u64,
    pub failed: u64,
    pub last_capture_id: Option<CaptureId>,
    pub last_capture_latency_ns: u64,
    pub last_capture_sync_skew_ns: u64,
    pub error_code: Option<CommandError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeviceView {
    pub hardware_id: String,
    pub instance_id: InstanceId,
    pub root_id: RootId,
    pub phase: DevicePhase,
    pub mode: DeviceMode,
    pub engaged: bool,
    pub rig_id: Option<RigId>,
    pub camera_spec_version: u64,
    pub capture_profile_version: u64,
    pub warm_hold_ms: u64,
    /// Milliseconds remaining before the device's warm-hold timer fires and
    /// it is torn down, `None` if no warm timer is scheduled.
    pub warm_remaining_ms: Option<u64>,
    pub rebuild_count: u64,
    pub errors_count: u64,
    pub last_error_code: Option<CommandError>,
}

#[derive(Debug, Clone, Serialize)]
pub struct StreamView {
    pub stream_id: StreamId,
    pub device_instance_id: InstanceId,
    pub phase: StreamPhase,
    pub intent: StreamIntent,
    pub mode: StreamMode,
    pub stop_reason: StopReason,
    pub profile_version: u64,
    pub width: u32,
    pub height: u32,
    pub format_fourcc: Fourcc,
    pub target_fps_min: u32,
    pub target_fps_max: u32,
    pub frames_received: u64,
    pub frames_delivered: u64,
    pub frames_dropped: u64,
    pub queue_depth: u32,
    pub last_frame_ts_ns: Option<u64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct NativeObjectView {
    pub native_id: NativeId,
    pub object_type: NativeObjectType,
    pub phase: NativeObjectPhase,
    pub owner_rig_id: Option<RigId>,
    pub owner_device_instance_id: Option<InstanceId>,
    pub owner_stream_id: Option<StreamId>,
    pub root_id: RootId,
    pub created_ns: u64,
    pub destroyed_ns: Option<u64>,
    pub bytes_allocated: u64,
    pub buffers_in_use: u32,
}

/// The entire observable state of the system at one instant (spec.md §3
/// "Snapshot").
#[derive(Debug, Clone, Serialize)]
pub struct Snapshot {
    pub schema_version: u64,
    /// Bumped on every publish.
    pub generation: u64,
    /// Bumped only when the topology (the *set* of rigs/devices/streams)
    /// changed, not merely their field values.
    pub topology_gen: u64,
    pub timestamp_ns: u64,
    pub imaging_spec_version: u64,
    pub rigs: Arc<[RigView]>,
    pub devices: Arc<[DeviceView]>,
    pub streams: Arc<[StreamView]>,
    pub native_objects: Arc<[NativeObjectView]>,
    /// Roots with native objects still alive under an instance that no
    /// longer exists in the current topology (spec.md §4.H).
    pub detached_root_ids: Arc<[RootId]>,
}

impl Snapshot {
    pub fn empty() -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            generation: 0,
            topology_gen: 0,
            timestamp_ns: 0,
            imaging_spec_version: 0,
            rigs: Arc::from([]),
            devices: Arc::from([]),
            streams: Arc::from([]),
            native_objects: Arc::from([]),
            detached_root_ids: Arc::from([]),
        }
    }

    /// Render this snapshot as a JSON document for diagnostics/logging.
    ///
    /// This is the one place an embedder would reach for the published
    /// state outside of the typed `Snapshot` fields themselves, e.g. to
    /// attach it to a bug report or pipe it to a log sink.
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// A stable fingerprint of the topology (the set of live entities, not their
/// field values), used to decide whether `topology_gen` must advance.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
struct TopologyFingerprint {
    rig_ids: Vec<RigId>,
    rig_memberships: Vec<(RigId, Vec<InstanceId>)>,
    device_instance_ids: Vec<InstanceId>,
    stream_ids: Vec<StreamId>,
    root_ids: Vec<RootId>,
}

#[derive(Default)]
pub struct SnapshotBuilder {
    last_topology: TopologyFingerprint,
    last_generation: u64,
    last_topology_gen: u64,
}

impl SnapshotBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn build(
        &mut self,
        now_ns: u64,
        imaging_spec_version: u64,
        rigs: &[Rig],
        devices: &[Device],
        streams: &[Stream],
        registry: &Registry,
    ) -> Snapshot {
        let rig_views: Vec<RigView> = rigs
            .iter()
            .map(|r| RigView {
                rig_id: r.rig_id,
                name: r.name.clone(),
                mode: r.mode,
                member_hardware_ids: r.member_hardware_ids.clone(),
                active_capture_id: r.active_capture_id,
                capture_profile_version: r.capture_profile_version,
                triggered: r.counters.triggered,
                completed: r.counters.completed,
                failed: r.counters.failed,
                last_capture_id: r.last_capture.id,
                last_capture_latency_ns: r.last_capture.latency_ns,
                last_capture_sync_skew_ns: r.last_capture.sync_skew_ns,
                error_code: r.error_code,
            })
            .collect();

        let device_views: Vec<DeviceView> = devices
            .iter()
            .map(|d| DeviceView {
                hardware_id: d.hardware_id.clone(),
                instance_id: d.instance_id,
                root_id: d.root_id,
                phase: d.phase,
                mode: d.mode,
                engaged: d.engaged,
                rig_id: d.rig_id,
                camera_spec_version: d.camera_spec_version,
                capture_profile_version: d.capture_profile_version,
                warm_hold_ms: d.warm_hold_ms,
                warm_remaining_ms: d.warm_deadline_ns.map(|deadline| deadline.saturating_sub(now_ns) / 1_000_000),
                rebuild_count: d.rebuild_count,
                errors_count: d.errors_count,
                last_error_code: d.last_error_code,
            })
            .collect();

        let stream_views: Vec<StreamView> = streams
            .iter()
            .map(|s| StreamView {
                stream_id: s.stream_id,
                device_instance_id: s.device_instance_id,
                phase: s.phase,
                intent: s.intent,
                mode: s.mode,
                stop_reason: s.stop_reason,
                profile_version: s.profile_version,
                width: s.width,
                height: s.height,
                format_fourcc: s.format_fourcc,
                target_fps_min: s.target_fps_min,
                target_fps_max: s.target_fps_max,
                frames_received: s.frames_received,
                frames_delivered: s.frames_delivered,
                frames_dropped: s.frames_dropped,
                queue_depth: s.queue_depth,
                last_frame_ts_ns: s.last_frame_ts_ns,
            })
            .collect();

        let native_object_views: Vec<NativeObjectView> = registry
            .iter()
            .map(|r| NativeObjectView {
                native_id: r.native_id,
                object_type: r.object_type,
                phase: r.phase,
                owner_rig_id: r.owner_rig_id,
                owner_device_instance_id: r.owner_device_instance_id,
                owner_stream_id: r.owner_stream_id,
                root_id: r.root_id,
                created_ns: r.created_ns,
                destroyed_ns: r.destroyed_ns,
                bytes_allocated: r.bytes_allocated,
                buffers_in_use: r.buffers_in_use,
            })
            .collect();

        let live_instance_ids: Vec<InstanceId> = devices.iter().map(|d| d.instance_id).collect();
        let live_rig_ids: Vec<RigId> = rigs.iter().map(|r| r.rig_id).collect();
        let live_stream_ids: Vec<StreamId> = streams.iter().map(|s| s.stream_id).collect();
        let detached: Vec<RootId> = registry.detached_roots(&live_instance_ids, &live_rig_ids, &live_stream_ids);

        // A root_id is part of the topology as long as either a live device
        // carries it or the registry still holds a record under it; once
        // neither is true it has fully disappeared (spec.md §8 S5: sweeping
        // the last record for a root bumps `topology_gen`).
        let mut root_ids: Vec<RootId> = devices.iter().map(|d| d.root_id).chain(registry.iter().map(|r| r.root_id)).collect();
        root_ids.sort();
        root_ids.dedup();

        let mut rig_memberships: Vec<(RigId, Vec<InstanceId>)> = rigs
            .iter()
            .map(|r| {
                let mut members = r.member_instance_ids.clone();
                members.sort();
                (r.rig_id, members)
            })
            .collect();
        rig_memberships.sort_by_key(|(rig_id, _)| *rig_id);

        let mut fingerprint = TopologyFingerprint {
            rig_ids: live_rig_ids,
            rig_memberships,
            device_instance_ids: live_instance_ids,
            stream_ids: live_stream_ids,
            root_ids,
        };
        fingerprint.rig_ids.sort();
        fingerprint.device_instance_ids.sort();
        fingerprint.stream_ids.sort();
        fingerprint.root_ids.sort();

        self.last_generation += 1;
        if fingerprint != self.last_topology {
            self.last_topology_gen += 1;
            self.last_topology = fingerprint;
        }

        Snapshot {
            schema_version: SCHEMA_VERSION,
            generation: self.last_generation,
            topology_gen: self.last_topology_gen,
            timestamp_ns: now_ns,
            imaging_spec_version,
            rigs: Arc::from(rig_views),
            devices: Arc::from(device_views),
            streams: Arc::from(stream_views),
            native_objects: Arc::from(native_object_views),
            detached_root_ids: Arc::from(detached),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;

    #[test]
    fn generation_advances_every_build_topology_gen_only_on_change() {
        let mut alloc = IdAllocator::new();
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let device = Device::new("cam0".into(), alloc.allocate_instance(), alloc.allocate_root());

        let s1 = builder.build(0, 0, &[], &[device.clone()], &[], &registry);
        assert_eq!(s1.generation, 1);
        assert_eq!(s1.topology_gen, 1);

        let mut device2 = device.clone();
        device2.errors_count = 7;
        let s2 = builder.build(0, 0, &[], &[device2], &[], &registry);
        assert_eq!(s2.generation, 2);
        assert_eq!(s2.topology_gen, 1, "field-only change must not bump topology_gen");
    }

    #[test]
    fn topology_gen_bumps_when_a_device_is_added() {
        let mut alloc = IdAllocator::new();
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let d1 = Device::new("cam0".into(), alloc.allocate_instance(), alloc.allocate_root());
        let d2 = Device::new("cam1".into(), alloc.allocate_instance(), alloc.allocate_root());

        let s1 = builder.build(0, 0, &[], &[d1.clone()], &[], &registry);
        let s2 = builder.build(0, 0, &[], &[d1, d2], &[], &registry);
        assert_eq!(s1.topology_gen, 1);
        assert_eq!(s2.topology_gen, 2);
    }

    #[test]
    fn warm_remaining_ms_derived_from_deadline() {
        let mut alloc = IdAllocator::new();
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let mut device = Device::new("cam0".into(), alloc.allocate_instance(), alloc.allocate_root());
        device.warm_deadline_ns = Some(5_000_000_000);
        let snap = builder.build(2_000_000_000, 0, &[], &[device], &[], &registry);
        assert_eq!(snap.devices[0].warm_remaining_ms, Some(3_000));
    }

    #[test]
    fn timestamp_and_imaging_spec_version_are_carried_through() {
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let snap = builder.build(42_000, 3, &[], &[], &[], &registry);
        assert_eq!(snap.timestamp_ns, 42_000);
        assert_eq!(snap.imaging_spec_version, 3);
        assert_eq!(snap.schema_version, SCHEMA_VERSION);
    }

    #[test]
    fn topology_gen_bumps_when_rig_membership_changes_without_rig_set_changing() {
        use crate::model::{Rig, RigConfig};

        let mut alloc = IdAllocator::new();
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let mut rig = Rig::new(alloc.allocate_rig(), "stereo".into(), vec!["camA".into(), "camB".into()], RigConfig::default());

        let s1 = builder.build(0, 0, &[rig.clone()], &[], &[], &registry);
        rig.member_instance_ids.push(alloc.allocate_instance());
        let s2 = builder.build(0, 0, &[rig], &[], &[], &registry);

        assert_eq!(s1.topology_gen, 1);
        assert_eq!(
            s2.topology_gen, 2,
            "arming a rig (populating member_instance_ids) must bump topology_gen even though rig_ids is unchanged"
        );
    }

    #[test]
    fn snapshot_round_trips_through_json() {
        let mut alloc = IdAllocator::new();
        let mut builder = SnapshotBuilder::new();
        let registry = Registry::new();
        let device = Device::new("cam0".into(), alloc.allocate_instance(), alloc.allocate_root());
        let snap = builder.build(0, 0, &[], &[device], &[], &registry);

        let json = snap.to_json_string().expect("snapshot must serialize to JSON");
        assert!(json.contains("\"schema_version\""));
        assert!(json.contains("cam0"));
    }
}
