// SPDX-License-Identifier: GPL-3.0-only
//! Core data model (spec.md §3): rigs, devices, streams and native-object
//! records, plus the profile/capability value types arbitration validates
//! against.

use crate::ids::{CaptureId, InstanceId, NativeId, RigId, RootId, StreamId};
use crate::pixel_format::Fourcc;
use serde::Serialize;

// ---------------------------------------------------------------------
// Rig
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum RigMode {
    Off,
    Armed,
    Triggering,
    Collecting,
    Error,
}

#[derive(Debug, Clone, Default)]
pub struct RigCounters {
    pub triggered: u64,
    pub completed: u64,
    pub failed: u64,
}

#[derive(Debug, Clone, Default)]
pub struct LastCapture {
    pub id: Option<CaptureId>,
    pub latency_ns: u64,
    pub sync_skew_ns: u64,
}

/// Configuration supplied at `create_rig` time (spec.md §6.1).
#[derive(Debug, Clone, Default)]
pub struct RigConfig {
    pub allow_device_capture_override: bool,
}

#[derive(Debug, Clone)]
pub struct Rig {
    pub rig_id: RigId,
    pub name: String,
    pub mode: RigMode,
    /// Fixed once the rig is `ARMED` or later (spec.md §3 invariant).
    pub member_hardware_ids: Vec<String>,
    pub member_instance_ids: Vec<InstanceId>,
    pub active_capture_id: Option<CaptureId>,
    pub capture_profile_version: u64,
    pub counters: RigCounters,
    pub last_capture: LastCapture,
    pub error_code: Option<crate::error::CommandError>,
    pub config: RigConfig,
    /// Timestamp the in-flight sync capture was accepted, used to derive
    /// `last_capture.latency_ns` once every member completes.
    pub capture_started_ns: u64,
    /// Frame timestamps collected so far from completed members of the
    /// in-flight sync capture; cleared once every member has reported.
    pub capture_frame_timestamps: Vec<u64>,
}

impl Rig {
    pub fn new(rig_id: RigId, name: String, member_hardware_ids: Vec<String>, config: RigConfig) -> Self {
        Self {
            rig_id,
            name,
            mode: RigMode::Off,
            member_hardware_ids,
            member_instance_ids: Vec::new(),
            active_capture_id: None,
            capture_profile_version: 0,
            counters: RigCounters::default(),
            last_capture: LastCapture::default(),
            error_code: None,
            config,
            capture_started_ns: 0,
            capture_frame_timestamps: Vec::new(),
        }
    }
}

// ---------------------------------------------------------------------
// Device
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DevicePhase {
    Created,
    Live,
    TearingDown,
    Destroyed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum DeviceMode {
    Idle,
    Streaming,
    Capturing,
    Error,
}

#[derive(Debug, Clone)]
pub struct Device {
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
    /// Absolute deadline (ns) at which the warm timer fires, if scheduled.
    pub warm_deadline_ns: Option<u64>,
    /// Handle of the currently scheduled warm-expiry timer, if any, so it can
    /// be cancelled in the heap rather than merely ignored (spec.md "Warm &
    /// retention scheduling": "any engage / new stream / new capture on that
    /// device cancels the warm timer").
    pub warm_timer: Option<crate::timers::TimerHandle>,
    pub rebuild_count: u64,
    pub errors_count: u64,
    pub last_error_code: Option<crate::error::CommandError>,
    /// `stream_id` of the one stream currently `LIVE ∧ mode≠STOPPED` on this
    /// device, if any (enforces the per-device single-active-stream
    /// invariant, spec.md §3).
    pub active_stream_id: Option<StreamId>,
    pub active_capture_id: Option<CaptureId>,
    /// Last profile accepted by `set_still_capture_profile`, used by
    /// `trigger_device_capture` (spec.md §6.1). `None` until the host
    /// configures one.
    pub still_profile: Option<StillProfile>,
}

impl Device {
    pub fn new(hardware_id: String, instance_id: InstanceId, root_id: RootId) -> Self {
        Self {
            hardware_id,
            instance_id,
            root_id,
            phase: DevicePhase::Created,
            mode: DeviceMode::Idle,
            engaged: true,
            rig_id: None,
            camera_spec_version: 0,
            capture_profile_version: 0,
            warm_hold_ms: 0,
            warm_deadline_ns: None,
            warm_timer: None,
            rebuild_count: 0,
            errors_count: 0,
            last_error_code: None,
            active_stream_id: None,
            active_capture_id: None,
            still_profile: None,
        }
    }

    pub fn is_idle_or_streaming(&self) -> bool {
        matches!(self.mode, DeviceMode::Idle | DeviceMode::Streaming)
    }
}

// ---------------------------------------------------------------------
// Stream
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamPhase {
    Created,
    Live,
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamMode {
    Stopped,
    Flowing,
    Starved,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StreamIntent {
    Preview,
    Viewfinder,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum StopReason {
    None,
    User,
    Preempted,
    Provider,
}

/// Requested stream configuration (spec.md §6.1 `create_stream`).
#[derive(Debug, Clone, PartialEq)]
pub struct StreamProfile {
    pub intent: StreamIntent,
    pub width: u32,
    pub height: u32,
    pub format_fourcc: Fourcc,
    pub target_fps_min: u32,
    pub target_fps_max: u32,
}

#[derive(Debug, Clone)]
pub struct Stream {
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
    pub starve_timer: Option<crate::timers::TimerHandle>,
}

impl Stream {
    pub fn new(stream_id: StreamId, device_instance_id: InstanceId, profile: &StreamProfile) -> Self {
        Self {
            stream_id,
            device_instance_id,
            phase: StreamPhase::Created,
            intent: profile.intent,
            mode: StreamMode::Stopped,
            stop_reason: StopReason::None,
            profile_version: 1,
            width: profile.width,
            height: profile.height,
            format_fourcc: profile.format_fourcc,
            target_fps_min: profile.target_fps_min,
            target_fps_max: profile.target_fps_max,
            frames_received: 0,
            frames_delivered: 0,
            frames_dropped: 0,
            queue_depth: 0,
            last_frame_ts_ns: None,
            starve_timer: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.phase == StreamPhase::Live && self.mode != StreamMode::Stopped
    }
}

/// Requested still-capture configuration (spec.md §6.1
/// `set_still_capture_profile`).
#[derive(Debug, Clone, PartialEq)]
pub struct StillProfile {
    pub width: u32,
    pub height: u32,
    pub format_fourcc: Fourcc,
}

// ---------------------------------------------------------------------
// Native object records
// ---------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NativeObjectType {
    Request,
    Buffer,
    Stream,
    Other,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum NativeObjectPhase {
    Created,
    Live,
    TearingDown,
    Destroyed,
}

/// Information a provider supplies when reporting a new native object
/// (spec.md §4.D `on_created`).
#[derive(Debug, Clone)]
pub struct NativeObjectInfo {
    pub native_id: NativeId,
    pub object_type: NativeObjectType,
    pub phase: NativeObjectPhase,
    pub owner_rig_id: Option<RigId>,
    pub owner_device_instance_id: Option<InstanceId>,
    pub owner_stream_id: Option<StreamId>,
    pub root_id: RootId,
    pub bytes_allocated: u64,
}

#[derive(Debug, Clone)]
pub struct NativeObjectRecord {
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

// ---------------------------------------------------------------------
// Capability model used by arbitration (spec.md §4.G)
// ---------------------------------------------------------------------

/// A single supported resolution/format/fps-range combination reported by a
/// provider for a device.
#[derive(Debug, Clone, PartialEq)]
pub struct CapabilityEntry {
    pub width: u32,
    pub height: u32,
    pub format_fourcc: Fourcc,
    pub fps_min: u32,
    pub fps_max: u32,
}

impl CapabilityEntry {
    pub fn covers_stream_profile(&self, profile: &StreamProfile) -> bool {
        self.width == profile.width
            && self.height == profile.height
            && self.format_fourcc == profile.format_fourcc
            && profile.target_fps_min >= self.fps_min
            && profile.target_fps_max <= self.fps_max
    }

    pub fn covers_still_profile(&self, profile: &StillProfile) -> bool {
        self.width == profile.width
            && self.height == profile.height
            && self.format_fourcc == profile.format_fourcc
    }
}
