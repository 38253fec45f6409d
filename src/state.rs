// SPDX-License-Identifier: GPL-3.0-only
//! Rig / Device / Stream state machines (spec.md §4.F).
//!
//! Transition tables are closed; illegal transitions are programming
//! errors, asserted rather than propagated as a `Result` — the generalized
//! form of the teacher's `RecordingState` two-state enum
//! (`src/app/state.rs`), which also encoded "what can happen next" directly
//! in its transition methods rather than a side table.

use crate::model::{Device, DeviceMode, DevicePhase, Rig, RigMode, Stream, StreamMode, StreamPhase, StopReason};

/// Rig transitions (spec.md §4.F "Rig").
pub mod rig {
    use super::*;

    pub fn arm(rig: &mut Rig, member_instance_ids: Vec<crate::ids::InstanceId>) {
        debug_assert_eq!(rig.mode, RigMode::Off, "arm() requires OFF");
        rig.member_instance_ids = member_instance_ids;
        rig.mode = RigMode::Armed;
    }

    pub fn disarm(rig: &mut Rig) {
        debug_assert_eq!(rig.mode, RigMode::Armed, "disarm() requires ARMED with no capture in flight");
        debug_assert!(rig.active_capture_id.is_none());
        rig.mode = RigMode::Off;
        rig.member_instance_ids.clear();
    }

    pub fn accept_capture(rig: &mut Rig, capture_id: crate::ids::CaptureId) {
        debug_assert_eq!(rig.mode, RigMode::Armed);
        rig.mode = RigMode::Triggering;
        rig.active_capture_id = Some(capture_id);
        rig.counters.triggered += 1;
    }

    pub fn first_member_frame(rig: &mut Rig) {
        debug_assert_eq!(rig.mode, RigMode::Triggering);
        rig.mode = RigMode::Collecting;
    }

    pub fn all_members_complete(rig: &mut Rig, latency_ns: u64, sync_skew_ns: u64) {
        debug_assert_eq!(rig.mode, RigMode::Collecting);
        rig.last_capture.id = rig.active_capture_id;
        rig.last_capture.latency_ns = latency_ns;
        rig.last_capture.sync_skew_ns = sync_skew_ns;
        rig.counters.completed += 1;
        rig.active_capture_id = None;
        rig.mode = RigMode::Armed;
    }

    pub fn fail(rig: &mut Rig, code: crate::error::CommandError) {
        rig.mode = RigMode::Error;
        rig.error_code = Some(code);
        rig.counters.failed += 1;
        rig.active_capture_id = None;
    }
}

/// Device transitions (spec.md §4.F "Device").
pub mod device {
    use super::*;

    pub fn opened(device: &mut Device) {
        debug_assert_eq!(device.phase, DevicePhase::Created, "on_device_opened requires CREATED");
        device.phase = DevicePhase::Live;
    }

    pub fn stream_started(device: &mut Device) {
        debug_assert_eq!(device.mode, DeviceMode::Idle);
        device.mode = DeviceMode::Streaming;
    }

    pub fn stream_stopped(device: &mut Device) {
        debug_assert_eq!(device.mode, DeviceMode::Streaming);
        device.mode = DeviceMode::Idle;
    }

    /// Returns the mode to restore to once the capture completes.
    pub fn capture_accepted(device: &mut Device) -> DeviceMode {
        debug_assert!(matches!(device.mode, DeviceMode::Idle | DeviceMode::Streaming));
        let previous = device.mode;
        device.mode = DeviceMode::Capturing;
        previous
    }

    pub fn capture_finished(device: &mut Device, previous: DeviceMode) {
        debug_assert_eq!(device.mode, DeviceMode::Capturing);
        device.mode = previous;
    }

    pub fn error(device: &mut Device, code: crate::error::CommandError) {
        device.mode = DeviceMode::Error;
        device.last_error_code = Some(code);
        device.errors_count += 1;
    }

    pub fn begin_teardown(device: &mut Device) {
        debug_assert_eq!(device.phase, DevicePhase::Live);
        device.phase = DevicePhase::TearingDown;
    }

    pub fn destroyed(device: &mut Device) {
        debug_assert_eq!(device.phase, DevicePhase::TearingDown);
        device.phase = DevicePhase::Destroyed;
        device.engaged = false;
    }
}

/// Stream transitions (spec.md §4.F "Stream").
pub mod stream {
    use super::*;

    pub fn created(stream: &mut Stream) {
        debug_assert_eq!(stream.phase, StreamPhase::Created);
        stream.phase = StreamPhase::Live;
    }

    pub fn started(stream: &mut Stream) {
        debug_assert_eq!(stream.mode, StreamMode::Stopped);
        stream.mode = StreamMode::Flowing;
    }

    pub fn starved(stream: &mut Stream) {
        debug_assert_eq!(stream.mode, StreamMode::Flowing);
        stream.mode = StreamMode::Starved;
    }

    pub fn frame_arrived(stream: &mut Stream, ts_ns: u64) {
        if stream.mode == StreamMode::Starved {
            stream.mode = StreamMode::Flowing;
        }
        stream.frames_received += 1;
        stream.last_frame_ts_ns = Some(ts_ns);
    }

    pub fn stopped(stream: &mut Stream, reason: StopReason) {
        stream.mode = StreamMode::Stopped;
        stream.phase = StreamPhase::Stopped;
        stream.stop_reason = reason;
    }

    pub fn error(stream: &mut Stream) {
        stream.mode = StreamMode::Error;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use crate::model::{RigConfig, StreamIntent, StreamProfile};
    use crate::pixel_format::Fourcc;

    #[test]
    fn rig_lifecycle_off_to_armed_to_triggering_to_collecting_to_armed() {
        let mut alloc = IdAllocator::new();
        let mut r = Rig::new(alloc.allocate_rig(), "r1".into(), vec!["a".into()], RigConfig::default());
        rig::arm(&mut r, vec![alloc.allocate_instance()]);
        assert_eq!(r.mode, RigMode::Armed);
        let capture = alloc.allocate_capture();
        rig::accept_capture(&mut r, capture);
        assert_eq!(r.mode, RigMode::Triggering);
        rig::first_member_frame(&mut r);
        assert_eq!(r.mode, RigMode::Collecting);
        rig::all_members_complete(&mut r, 1000, 50);
        assert_eq!(r.mode, RigMode::Armed);
        assert_eq!(r.counters.completed, 1);
        assert_eq!(r.last_capture.sync_skew_ns, 50);
    }

    #[test]
    #[should_panic]
    fn disarm_while_capture_in_flight_panics_in_debug() {
        let mut alloc = IdAllocator::new();
        let mut r = Rig::new(alloc.allocate_rig(), "r1".into(), vec!["a".into()], RigConfig::default());
        rig::arm(&mut r, vec![]);
        rig::accept_capture(&mut r, alloc.allocate_capture());
        rig::disarm(&mut r);
    }

    #[test]
    fn device_lifecycle() {
        let mut alloc = IdAllocator::new();
        let mut d = Device::new("cam0".into(), alloc.allocate_instance(), alloc.allocate_root());
        device::opened(&mut d);
        assert_eq!(d.phase, DevicePhase::Live);
        device::stream_started(&mut d);
        assert_eq!(d.mode, DeviceMode::Streaming);
        let prev = device::capture_accepted(&mut d);
        assert_eq!(d.mode, DeviceMode::Capturing);
        device::capture_finished(&mut d, prev);
        assert_eq!(d.mode, DeviceMode::Streaming);
        device::begin_teardown(&mut d);
        device::destroyed(&mut d);
        assert_eq!(d.phase, DevicePhase::Destroyed);
        assert!(!d.engaged);
    }

    #[test]
    fn stream_starvation_and_recovery() {
        let mut alloc = IdAllocator::new();
        let profile = StreamProfile {
            intent: StreamIntent::Viewfinder,
            width: 1280,
            height: 720,
            format_fourcc: Fourcc::NV12,
            target_fps_min: 30,
            target_fps_max: 30,
        };
        let mut s = Stream::new(alloc.allocate_stream(), alloc.allocate_instance(), &profile);
        stream::created(&mut s);
        stream::started(&mut s);
        assert_eq!(s.mode, StreamMode::Flowing);
        stream::starved(&mut s);
        assert_eq!(s.mode, StreamMode::Starved);
        stream::frame_arrived(&mut s, 1_000_000);
        assert_eq!(s.mode, StreamMode::Flowing);
        stream::stopped(&mut s, StopReason::Preempted);
        assert_eq!(s.mode, StreamMode::Stopped);
        assert_eq!(s.stop_reason, StopReason::Preempted);
    }
}
