// SPDX-License-Identifier: GPL-3.0-only
//! The core loop (spec.md §4.J): the single thread that owns all mutable
//! runtime state. Nothing outside this module ever mutates a `Rig`,
//! `Device`, or `Stream` directly — commands and provider events are
//! queued, and this loop is the only reader/writer.

use crate::arbitration::{self, Admission};
use crate::clock::Clock;
use crate::command::{Command, Event};
use crate::config::RuntimeConfig;
use crate::error::{CommandError, CommandResult, ProviderErrorCode};
use crate::ids::{IdAllocator, InstanceId, RigId, StreamId};
use crate::model::{Device, DevicePhase, Rig, RigConfig, StopReason, Stream};
use crate::provider::{Provider, ProviderCallbacks};
use crate::publish::Publisher;
use crate::queue::{BoundedQueue, WaitSignal};
use crate::registry::Registry;
use crate::snapshot::SnapshotBuilder;
use crate::specs::SpecStore;
use crate::state::{device as device_fsm, rig as rig_fsm, stream as stream_fsm};
use crate::timers::{TimerHeap, TimerTag};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Everything the loop thread owns exclusively. Never shared, never locked:
/// single-writer state (spec.md §5).
struct CoreState {
    ids: IdAllocator,
    clock: Arc<dyn Clock>,
    config: RuntimeConfig,
    timers: TimerHeap,
    registry: Registry,
    specs: SpecStore,
    provider: Box<dyn Provider>,
    rigs: HashMap<RigId, Rig>,
    devices: HashMap<InstanceId, Device>,
    streams: HashMap<StreamId, Stream>,
    hardware_to_instance: HashMap<String, InstanceId>,
    snapshot_builder: SnapshotBuilder,
    dirty: bool,
    shutting_down: bool,
}

impl CoreState {
    fn device_by_hardware(&self, hardware_id: &str) -> Option<&Device> {
        self.hardware_to_instance.get(hardware_id).and_then(|id| self.devices.get(id))
    }

    fn rig_for_device(&self, instance_id: InstanceId) -> Option<&Rig> {
        self.devices
            .get(&instance_id)
            .and_then(|d| d.rig_id)
            .and_then(|rig_id| self.rigs.get(&rig_id))
    }

    fn schedule_warm_expiry(&mut self, instance_id: InstanceId) {
        let Some(device) = self.devices.get(&instance_id) else { return };
        if device.warm_hold_ms == 0 {
            return;
        }
        let deadline = self.clock.now_ns() + device.warm_hold_ms * 1_000_000;
        let handle = self.timers.schedule(deadline, TimerTag::WarmExpiry(instance_id));
        let device = self.devices.get_mut(&instance_id).unwrap();
        device.warm_deadline_ns = Some(deadline);
        device.warm_timer = Some(handle);
    }

    fn cancel_warm_expiry(&mut self, instance_id: InstanceId) {
        if let Some(device) = self.devices.get_mut(&instance_id) {
            if let Some(handle) = device.warm_timer.take() {
                self.timers.cancel(handle);
            }
            device.warm_deadline_ns = None;
        }
    }

    // -- Command handlers ------------------------------------------------

    fn handle_engage_device(&mut self, hardware_id: String) -> CommandResult<InstanceId> {
        if let Some(&instance_id) = self.hardware_to_instance.get(&hardware_id) {
            self.cancel_warm_expiry(instance_id);
            return Ok(instance_id);
        }
        let instance_id = self.ids.allocate_instance();
        let root_id = self.ids.allocate_root();
        let mut device = Device::new(hardware_id.clone(), instance_id, root_id);
        device_fsm::opened(&mut device);
        self.devices.insert(instance_id, device);
        self.hardware_to_instance.insert(hardware_id.clone(), instance_id);
        match self.provider.open_device(&hardware_id, instance_id) {
            Ok(()) => {
                if let Ok(capabilities) = self.provider.capabilities(&hardware_id) {
                    self.specs.camera_spec_or_insert(&hardware_id).capabilities = capabilities;
                }
                self.dirty = true;
                Ok(instance_id)
            }
            Err(code) => {
                self.devices.remove(&instance_id);
                self.hardware_to_instance.remove(&hardware_id);
                Err(code.into())
            }
        }
    }

    fn handle_set_warm_policy(&mut self, instance_id: InstanceId, warm_hold_ms: u64) -> CommandResult<()> {
        let device = self.devices.get_mut(&instance_id).ok_or(CommandError::InvalidArgument)?;
        device.warm_hold_ms = warm_hold_ms;
        let device_idle = device.mode == crate::model::DeviceMode::Idle;
        let has_timer = device.warm_deadline_ns.is_some();
        if device_idle && (has_timer || warm_hold_ms > 0) {
            self.cancel_warm_expiry(instance_id);
            self.schedule_warm_expiry(instance_id);
        }
        Ok(())
    }

    fn handle_set_still_capture_profile(&mut self, instance_id: InstanceId, profile: crate::model::StillProfile) -> CommandResult<()> {
        let device = self.devices.get(&instance_id).ok_or(CommandError::InvalidArgument)?;
        let capabilities = self
            .specs
            .camera_specs
            .get(&device.hardware_id)
            .map(|s| s.capabilities.clone())
            .unwrap_or_default();
        let normalized = arbitration::validate_still_profile(&capabilities, &profile)?;
        let device = self.devices.get_mut(&instance_id).unwrap();
        device.still_profile = Some(normalized);
        device.capture_profile_version += 1;
        self.dirty = true;
        Ok(())
    }

    fn handle_disengage_device(&mut self, instance_id: InstanceId) -> CommandResult<()> {
        let device = self.devices.get_mut(&instance_id).ok_or(CommandError::InvalidArgument)?;
        if !device.is_idle_or_streaming() {
            return Err(CommandError::BadState);
        }
        device_fsm::begin_teardown(device);
        self.cancel_warm_expiry(instance_id);
        self.provider.close_device(instance_id).map_err(CommandError::from)?;
        self.dirty = true;
        Ok(())
    }

    fn handle_create_stream(&mut self, instance_id: InstanceId, profile: crate::model::StreamProfile) -> CommandResult<StreamId> {
        let device = self.devices.get(&instance_id).ok_or(CommandError::InvalidArgument)?;
        let rig = device.rig_id.and_then(|rig_id| self.rigs.get(&rig_id));
        arbitration::decide_create_stream(device, rig)?;
        let capabilities = self
            .specs
            .camera_specs
            .get(&device.hardware_id)
            .map(|s| s.capabilities.clone())
            .unwrap_or_default();
        let normalized = arbitration::validate_stream_profile(&capabilities, &profile)?;
        let stream_id = self.ids.allocate_stream();
        let mut stream = Stream::new(stream_id, instance_id, &normalized);
        stream_fsm::created(&mut stream);
        self.provider
            .create_stream(instance_id, stream_id, &normalized)
            .map_err(CommandError::from)?;
        self.streams.insert(stream_id, stream);
        self.dirty = true;
        Ok(stream_id)
    }

    fn handle_start_stream(&mut self, stream_id: StreamId) -> CommandResult<()> {
        let stream = self.streams.get(&stream_id).ok_or(CommandError::InvalidArgument)?;
        let device_instance_id = stream.device_instance_id;
        let device = self.devices.get(&device_instance_id).ok_or(CommandError::InvalidArgument)?;
        if device.active_stream_id.is_some_and(|active| active != stream_id) {
            // spec.md §3: at most one LIVE∧mode≠STOPPED stream per device.
            // The host must stop the current one before starting another.
            return Err(CommandError::Busy);
        }
        match arbitration::decide_start_stream(device) {
            Admission::Allowed => {}
            Admission::PreemptStreams(_) => {}
            Admission::Denied(err) => return Err(err),
        }
        self.provider.start_stream(stream_id).map_err(CommandError::from)?;
        let stream = self.streams.get_mut(&stream_id).unwrap();
        stream_fsm::started(stream);
        let starve_deadline = self.clock.now_ns() + self.config.starve_ms * 1_000_000;
        let handle = self.timers.schedule(starve_deadline, TimerTag::StreamStarveWatchdog(stream_id));
        self.streams.get_mut(&stream_id).unwrap().starve_timer = Some(handle);
        let device = self.devices.get_mut(&device_instance_id).unwrap();
        device_fsm::stream_started(device);
        device.active_stream_id = Some(stream_id);
        self.cancel_warm_expiry(device_instance_id);
        self.dirty = true;
        Ok(())
    }

    fn stop_stream_internal(&mut self, stream_id: StreamId, reason: StopReason) -> CommandResult<()> {
        let stream = self.streams.get_mut(&stream_id).ok_or(CommandError::InvalidArgument)?;
        if let Some(handle) = stream.starve_timer.take() {
            self.timers.cancel(handle);
        }
        let device_instance_id = stream.device_instance_id;
        stream_fsm::stopped(stream, reason);
        self.provider.stop_stream(stream_id).map_err(CommandError::from)?;
        if let Some(device) = self.devices.get_mut(&device_instance_id) {
            device_fsm::stream_stopped(device);
            device.active_stream_id = None;
            self.schedule_warm_expiry(device_instance_id);
        }
        self.dirty = true;
        Ok(())
    }

    fn handle_stop_stream(&mut self, stream_id: StreamId) -> CommandResult<()> {
        self.stop_stream_internal(stream_id, StopReason::User)
    }

    fn handle_destroy_stream(&mut self, stream_id: StreamId) -> CommandResult<()> {
        if self.streams.get(&stream_id).is_some_and(|s| s.is_active()) {
            self.stop_stream_internal(stream_id, StopReason::User)?;
        }
        self.provider.destroy_stream(stream_id).map_err(CommandError::from)?;
        self.streams.remove(&stream_id);
        self.dirty = true;
        Ok(())
    }

    fn handle_trigger_capture(&mut self, instance_id: InstanceId) -> CommandResult<crate::ids::CaptureId> {
        let device = self.devices.get(&instance_id).ok_or(CommandError::InvalidArgument)?;
        let profile = device.still_profile.clone().ok_or(CommandError::InvalidArgument)?;
        let rig = device.rig_id.and_then(|rig_id| self.rigs.get(&rig_id));
        let active_stream = device
            .active_stream_id
            .and_then(|stream_id| self.streams.get(&stream_id));
        let admission = arbitration::decide_trigger_capture(device, rig, active_stream);
        let to_preempt = match admission {
            Admission::Allowed => Vec::new(),
            Admission::PreemptStreams(ids) => ids,
            Admission::Denied(err) => return Err(err),
        };
        for stream_id in to_preempt {
            self.stop_stream_internal(stream_id, StopReason::Preempted)?;
        }
        let capture_id = self.ids.allocate_capture();
        let device = self.devices.get_mut(&instance_id).unwrap();
        let previous_mode = device_fsm::capture_accepted(device);
        device.active_capture_id = Some(capture_id);
        self.provider
            .trigger_capture(instance_id, capture_id, &profile)
            .map_err(|code| {
                let device = self.devices.get_mut(&instance_id).unwrap();
                device_fsm::capture_finished(device, previous_mode);
                device.active_capture_id = None;
                CommandError::from(code)
            })?;
        self.dirty = true;
        Ok(capture_id)
    }

    fn handle_create_rig(&mut self, name: String, member_hardware_ids: Vec<String>, allow_override: bool) -> CommandResult<RigId> {
        let rig_id = self.ids.allocate_rig();
        let config = RigConfig { allow_device_capture_override: allow_override };
        let rig = Rig::new(rig_id, name, member_hardware_ids, config);
        self.rigs.insert(rig_id, rig);
        self.dirty = true;
        Ok(rig_id)
    }

    fn handle_destroy_rig(&mut self, rig_id: RigId) -> CommandResult<()> {
        let rig = self.rigs.get(&rig_id).ok_or(CommandError::InvalidArgument)?;
        if rig.mode != crate::model::RigMode::Off {
            return Err(CommandError::BadState);
        }
        for device in self.devices.values_mut() {
            if device.rig_id == Some(rig_id) {
                device.rig_id = None;
            }
        }
        self.rigs.remove(&rig_id);
        self.dirty = true;
        Ok(())
    }

    fn handle_arm_rig(&mut self, rig_id: RigId) -> CommandResult<()> {
        let rig = self.rigs.get(&rig_id).ok_or(CommandError::InvalidArgument)?;
        let member_hardware_ids = rig.member_hardware_ids.clone();
        let mut member_instance_ids = Vec::with_capacity(member_hardware_ids.len());
        for hardware_id in &member_hardware_ids {
            let device = self.device_by_hardware(hardware_id).ok_or(CommandError::BadState)?;
            member_instance_ids.push(device.instance_id);
        }
        for instance_id in &member_instance_ids {
            if let Some(device) = self.devices.get_mut(instance_id) {
                device.rig_id = Some(rig_id);
            }
        }
        let rig = self.rigs.get_mut(&rig_id).unwrap();
        rig_fsm::arm(rig, member_instance_ids);
        self.dirty = true;
        Ok(())
    }

    fn handle_disarm_rig(&mut self, rig_id: RigId) -> CommandResult<()> {
        let rig = self.rigs.get_mut(&rig_id).ok_or(CommandError::InvalidArgument)?;
        if rig.active_capture_id.is_some() {
            return Err(CommandError::BadState);
        }
        let member_instance_ids = rig.member_instance_ids.clone();
        rig_fsm::disarm(rig);
        for instance_id in member_instance_ids {
            if let Some(device) = self.devices.get_mut(&instance_id) {
                device.rig_id = None;
            }
        }
        self.dirty = true;
        Ok(())
    }

    fn handle_trigger_sync_capture(&mut self, rig_id: RigId) -> CommandResult<crate::ids::CaptureId> {
        let rig = self.rigs.get(&rig_id).ok_or(CommandError::InvalidArgument)?;
        let members: Vec<InstanceId> = rig.member_instance_ids.clone();
        let member_views: Vec<(InstanceId, Option<StreamId>)> = members
            .iter()
            .map(|id| (*id, self.devices.get(id).and_then(|d| d.active_stream_id)))
            .collect();
        let device_refs: Vec<Device> = members
            .iter()
            .filter_map(|id| self.devices.get(id).cloned())
            .collect();
        let stream_refs: Vec<Option<Stream>> = member_views
            .iter()
            .map(|(_, sid)| sid.and_then(|s| self.streams.get(&s).cloned()))
            .collect();
        let pairs: Vec<(&Device, Option<&Stream>)> = device_refs
            .iter()
            .zip(stream_refs.iter().map(|s| s.as_ref()))
            .collect();
        let admission = arbitration::decide_trigger_sync_capture(rig, &pairs);
        let to_preempt = match admission {
            Admission::Allowed => Vec::new(),
            Admission::PreemptStreams(ids) => ids,
            Admission::Denied(err) => return Err(err),
        };
        for stream_id in to_preempt {
            self.stop_stream_internal(stream_id, StopReason::Preempted)?;
        }
        let capture_id = self.ids.allocate_capture();
        let rig = self.rigs.get_mut(&rig_id).unwrap();
        rig_fsm::accept_capture(rig, capture_id);
        rig.capture_started_ns = self.clock.now_ns();
        rig.capture_frame_timestamps.clear();
        self.provider
            .trigger_sync_capture(rig_id, capture_id, &members)
            .map_err(|code| {
                let rig = self.rigs.get_mut(&rig_id).unwrap();
                rig_fsm::fail(rig, code.into());
                CommandError::from(code)
            })?;
        self.dirty = true;
        Ok(capture_id)
    }

    fn handle_apply_camera_spec_patch(
        &mut self,
        hardware_id: String,
        new_version: u64,
        patch: Vec<u8>,
        apply_mode: crate::specs::ApplyMode,
    ) -> CommandResult<()> {
        let is_safe = {
            let safe = self
                .device_by_hardware(&hardware_id)
                .is_none_or(|d| d.is_idle_or_streaming());
            move || safe
        };
        let outcome = self
            .specs
            .apply_camera_spec_patch(&hardware_id, new_version, patch.clone(), apply_mode, is_safe)?;
        if outcome == crate::specs::PatchOutcome::Applied {
            self.provider
                .apply_camera_spec_patch(&hardware_id, new_version, &patch)
                .map_err(CommandError::from)?;
            self.dirty = true;
        }
        Ok(())
    }

    fn handle_apply_imaging_spec_patch(&mut self, new_version: u64, patch: Vec<u8>, apply_mode: crate::specs::ApplyMode) -> CommandResult<()> {
        let outcome = self
            .specs
            .apply_imaging_spec_patch(new_version, patch.clone(), apply_mode, || true)?;
        if outcome == crate::specs::PatchOutcome::Applied {
            self.provider.apply_imaging_spec_patch(new_version, &patch).map_err(CommandError::from)?;
            self.dirty = true;
        }
        Ok(())
    }

    fn dispatch_command(&mut self, command: Command) {
        match command {
            Command::EnumerateEndpoints { reply, .. } => {
                let result = self.provider.enumerate_endpoints().map_err(CommandError::from);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::EngageDevice { hardware_id, reply, .. } => {
                let result = self.handle_engage_device(hardware_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::DisengageDevice { instance_id, reply, .. } => {
                let result = self.handle_disengage_device(instance_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::SetWarmPolicy { instance_id, warm_hold_ms, reply, .. } => {
                let result = self.handle_set_warm_policy(instance_id, warm_hold_ms);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::CreateStream { instance_id, profile, reply, .. } => {
                let result = self.handle_create_stream(instance_id, profile);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::StartStream { stream_id, reply, .. } => {
                let result = self.handle_start_stream(stream_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::StopStream { stream_id, reply, .. } => {
                let result = self.handle_stop_stream(stream_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::DestroyStream { stream_id, reply, .. } => {
                let result = self.handle_destroy_stream(stream_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::SetStillCaptureProfile { instance_id, profile, reply, .. } => {
                let result = self.handle_set_still_capture_profile(instance_id, profile);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::TriggerCapture { instance_id, reply, .. } => {
                let result = self.handle_trigger_capture(instance_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::CreateRig {
                name,
                member_hardware_ids,
                allow_device_capture_override,
                reply,
                ..
            } => {
                let result = self.handle_create_rig(name, member_hardware_ids, allow_device_capture_override);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::DestroyRig { rig_id, reply, .. } => {
                let result = self.handle_destroy_rig(rig_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::ArmRig { rig_id, reply, .. } => {
                let result = self.handle_arm_rig(rig_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::DisarmRig { rig_id, reply, .. } => {
                let result = self.handle_disarm_rig(rig_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::TriggerSyncCapture { rig_id, reply, .. } => {
                let result = self.handle_trigger_sync_capture(rig_id);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::ApplyCameraSpecPatch {
                hardware_id,
                new_version,
                patch,
                apply_mode,
                reply,
                ..
            } => {
                let result = self.handle_apply_camera_spec_patch(hardware_id, new_version, patch, apply_mode);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::ApplyImagingSpecPatch {
                new_version,
                patch,
                apply_mode,
                reply,
                ..
            } => {
                let result = self.handle_apply_imaging_spec_patch(new_version, patch, apply_mode);
                if let Some(reply) = reply {
                    reply.send(result);
                }
            }
            Command::Shutdown { reply, .. } => {
                info!("core accepted shutdown");
                self.shutting_down = true;
                let active_streams: Vec<StreamId> = self
                    .streams
                    .iter()
                    .filter(|(_, s)| s.is_active())
                    .map(|(&stream_id, _)| stream_id)
                    .collect();
                for stream_id in active_streams {
                    let _ = self.stop_stream_internal(stream_id, StopReason::Provider);
                }
                let device_ids: Vec<InstanceId> = self.devices.keys().copied().collect();
                for instance_id in device_ids {
                    self.maybe_teardown_for_shutdown(instance_id);
                }
                self.provider.shutdown();
                self.dirty = true;
                if let Some(reply) = reply {
                    reply.send(());
                }
            }
        }
    }

    // -- Event handlers ----------------------------------------------------

    fn dispatch_event(&mut self, event: Event) {
        match event {
            Event::DeviceOpened { .. } => {}
            Event::DeviceClosed { instance_id } => {
                if self.devices.get(&instance_id).is_some_and(|d| d.phase == DevicePhase::TearingDown) {
                    let device = self.devices.get_mut(&instance_id).unwrap();
                    device_fsm::destroyed(device);
                    let hardware_id = device.hardware_id.clone();
                    self.hardware_to_instance.remove(&hardware_id);
                    self.devices.remove(&instance_id);
                    self.dirty = true;
                }
            }
            Event::DeviceError { instance_id, code, .. } => {
                if let Some(device) = self.devices.get_mut(&instance_id) {
                    device_fsm::error(device, code.into());
                    self.dirty = true;
                }
            }
            Event::StreamStarted { .. } => {}
            Event::StreamStopped { stream_id, .. } => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    if stream.mode != crate::model::StreamMode::Stopped {
                        stream_fsm::stopped(stream, StopReason::Provider);
                        self.dirty = true;
                    }
                }
            }
            Event::StreamError { stream_id, .. } => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    stream_fsm::error(stream);
                    self.dirty = true;
                }
            }
            Event::Frame { frame } => {
                if let Some(stream_id) = frame.stream_id {
                    if let Some(stream) = self.streams.get_mut(&stream_id) {
                        stream_fsm::frame_arrived(stream, frame.timestamp_ns);
                        self.dirty = true;
                    }
                }
            }
            Event::CaptureStarted { .. } => {}
            Event::CaptureCompleted { capture_id, frame } => {
                self.complete_capture_bookkeeping(capture_id, frame.timestamp_ns);
            }
            Event::CaptureFailed { capture_id, code, .. } => {
                self.fail_capture_bookkeeping(capture_id, code);
            }
            Event::NativeCreated { info } => {
                self.registry.on_created(info, self.clock.now_ns());
                self.dirty = true;
            }
            Event::NativeDestroyed { native_id } => {
                self.registry.on_destroyed(native_id, self.clock.now_ns());
                self.dirty = true;
            }
            Event::CameraSpecChanged { hardware_id, .. } => {
                let safe = self.device_by_hardware(&hardware_id).is_none_or(|d| d.is_idle_or_streaming());
                if safe {
                    let _ = self.specs.retry_pending_camera_patch(&hardware_id, || true);
                    self.dirty = true;
                }
            }
            Event::ImagingSpecChanged { .. } => {
                self.dirty = true;
            }
        }
    }

    fn rig_holding_capture(&self, capture_id: crate::ids::CaptureId) -> Option<RigId> {
        self.rigs
            .iter()
            .find(|(_, r)| r.active_capture_id == Some(capture_id))
            .map(|(&rig_id, _)| rig_id)
    }

    fn device_holding_capture(&self, capture_id: crate::ids::CaptureId) -> Option<InstanceId> {
        self.devices
            .iter()
            .find(|(_, d)| d.active_capture_id == Some(capture_id))
            .map(|(&instance_id, _)| instance_id)
    }

    /// Records one member's completed frame for a capture. For a rig-owned
    /// capture this only finalizes (transitions out of `COLLECTING` and
    /// computes `last_capture.latency_ns`/`sync_skew_ns`) once every member
    /// has reported; earlier calls just move `TRIGGERING` to `COLLECTING`
    /// and stash the timestamp (spec.md §8 S4: "sync_skew_ns = |tsA − tsB|").
    fn complete_capture_bookkeeping(&mut self, capture_id: crate::ids::CaptureId, frame_ts_ns: u64) {
        if let Some(rig_id) = self.rig_holding_capture(capture_id) {
            let expected_members = self.rigs[&rig_id].member_instance_ids.len().max(1);
            let rig = self.rigs.get_mut(&rig_id).unwrap();
            if rig.mode == crate::model::RigMode::Triggering {
                rig_fsm::first_member_frame(rig);
            }
            rig.capture_frame_timestamps.push(frame_ts_ns);
            if rig.capture_frame_timestamps.len() >= expected_members {
                let min = *rig.capture_frame_timestamps.iter().min().unwrap();
                let max = *rig.capture_frame_timestamps.iter().max().unwrap();
                let sync_skew_ns = max - min;
                let latency_ns = self.clock.now_ns().saturating_sub(rig.capture_started_ns);
                rig.capture_frame_timestamps.clear();
                rig_fsm::all_members_complete(rig, latency_ns, sync_skew_ns);
            }
            self.dirty = true;
            return;
        }
        if let Some(instance_id) = self.device_holding_capture(capture_id) {
            let device = self.devices.get(&instance_id).unwrap();
            let previous_mode = if device.mode == crate::model::DeviceMode::Capturing {
                crate::model::DeviceMode::Idle
            } else {
                device.mode
            };
            let device = self.devices.get_mut(&instance_id).unwrap();
            device_fsm::capture_finished(device, previous_mode);
            device.active_capture_id = None;
            self.dirty = true;
            self.maybe_teardown_for_shutdown(instance_id);
        }
    }

    fn fail_capture_bookkeeping(&mut self, capture_id: crate::ids::CaptureId, code: ProviderErrorCode) {
        if let Some(rig_id) = self.rig_holding_capture(capture_id) {
            let rig = self.rigs.get_mut(&rig_id).unwrap();
            rig_fsm::fail(rig, code.into());
            self.dirty = true;
            return;
        }
        if let Some(instance_id) = self.device_holding_capture(capture_id) {
            let device = self.devices.get(&instance_id).unwrap();
            let previous_mode = if device.mode == crate::model::DeviceMode::Capturing {
                crate::model::DeviceMode::Idle
            } else {
                device.mode
            };
            let device = self.devices.get_mut(&instance_id).unwrap();
            device_fsm::capture_finished(device, previous_mode);
            device.last_error_code = Some(code.into());
            device.errors_count += 1;
            device.active_capture_id = None;
            self.dirty = true;
            self.maybe_teardown_for_shutdown(instance_id);
        }
    }

    /// Begins tearing down a device left `CAPTURING` when shutdown was
    /// requested, once its in-flight capture has resolved. A normal
    /// `disengage_device` cannot run for a device that is still busy, so
    /// `Command::Shutdown`'s own teardown pass skips it and this catches up
    /// as soon as the capture completes or fails.
    fn maybe_teardown_for_shutdown(&mut self, instance_id: InstanceId) {
        if !self.shutting_down {
            return;
        }
        if let Some(device) = self.devices.get(&instance_id) {
            if device.is_idle_or_streaming() && device.phase == DevicePhase::Live {
                let device = self.devices.get_mut(&instance_id).unwrap();
                device_fsm::begin_teardown(device);
                self.cancel_warm_expiry(instance_id);
                let _ = self.provider.close_device(instance_id);
            }
        }
    }

    // -- Timers --------------------------------------------------------

    fn process_timer(&mut self, tag: TimerTag) {
        match tag {
            TimerTag::WarmExpiry(instance_id) => {
                if let Some(device) = self.devices.get(&instance_id) {
                    if device.mode == crate::model::DeviceMode::Idle && device.phase == DevicePhase::Live {
                        debug!(instance_id = instance_id.get(), "warm hold expired, tearing down");
                        let device = self.devices.get_mut(&instance_id).unwrap();
                        device_fsm::begin_teardown(device);
                        let hardware_id = device.hardware_id.clone();
                        if let Err(code) = self.provider.close_device(instance_id) {
                            warn!(%hardware_id, ?code, "provider close_device failed during warm expiry");
                        }
                        let device = self.devices.get_mut(&instance_id).unwrap();
                        device_fsm::destroyed(device);
                        self.hardware_to_instance.remove(&hardware_id);
                        self.devices.remove(&instance_id);
                        self.dirty = true;
                    }
                }
            }
            TimerTag::RetentionSweep => {
                let reaped = self.registry.sweep(self.clock.now_ns(), self.config.retention_ms);
                if reaped > 0 {
                    self.dirty = true;
                }
                let deadline = self.clock.now_ns() + self.config.retention_ms * 1_000_000;
                self.timers.schedule(deadline, TimerTag::RetentionSweep);
            }
            TimerTag::StreamStarveWatchdog(stream_id) => {
                if let Some(stream) = self.streams.get_mut(&stream_id) {
                    if stream.mode == crate::model::StreamMode::Flowing {
                        stream_fsm::starved(stream);
                        self.dirty = true;
                    }
                    let deadline = self.clock.now_ns() + self.config.starve_ms * 1_000_000;
                    let handle = self.timers.schedule(deadline, TimerTag::StreamStarveWatchdog(stream_id));
                    stream.starve_timer = Some(handle);
                }
            }
        }
    }

    fn maybe_publish(&mut self, publisher: &Publisher) {
        if !self.dirty {
            return;
        }
        let rigs: Vec<Rig> = self.rigs.values().cloned().collect();
        let devices: Vec<Device> = self.devices.values().cloned().collect();
        let streams: Vec<Stream> = self.streams.values().cloned().collect();
        let snapshot = self.snapshot_builder.build(
            self.clock.now_ns(),
            self.specs.imaging_spec.version,
            &rigs,
            &devices,
            &streams,
            &self.registry,
        );
        publisher.publish(snapshot);
        self.dirty = false;
    }
}

/// Handle to the running core. Cheap to clone-share via `Arc`; the loop
/// thread itself is joined once, by whoever calls [`Core::shutdown_and_join`].
pub struct Core {
    cmd_queue: Arc<BoundedQueue<Command>>,
    evt_queue: Arc<BoundedQueue<Event>>,
    wait_signal: Arc<WaitSignal>,
    publisher: Arc<Publisher>,
    shutdown_flag: Arc<AtomicBool>,
    join_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Core {
    /// Spawn the core loop on a dedicated thread, matching the teacher's
    /// `CaptureLoopController` pattern (`thread::spawn` plus an
    /// `Arc<AtomicBool>` stop flag and a `JoinHandle`), generalized from a
    /// caller-supplied closure to this crate's fixed five-step algorithm.
    pub fn spawn(mut provider: Box<dyn Provider>, clock: Arc<dyn Clock>, config: RuntimeConfig) -> Arc<Core> {
        let wait_signal = Arc::new(WaitSignal::new());
        let cmd_queue = Arc::new(BoundedQueue::new(config.cmd_queue_capacity, wait_signal.condvar()));
        let evt_queue = Arc::new(BoundedQueue::new(config.evt_queue_capacity, wait_signal.condvar()));
        let publisher = Arc::new(Publisher::new());
        let shutdown_flag = Arc::new(AtomicBool::new(false));

        let core = Arc::new(Core {
            cmd_queue: Arc::clone(&cmd_queue),
            evt_queue: Arc::clone(&evt_queue),
            wait_signal: Arc::clone(&wait_signal),
            publisher: Arc::clone(&publisher),
            shutdown_flag: Arc::clone(&shutdown_flag),
            join_handle: Mutex::new(None),
        });

        let mut provider = provider;
        provider.initialize(Arc::clone(&core) as Arc<dyn ProviderCallbacks>);

        let mut state = CoreState {
            ids: IdAllocator::new(),
            clock,
            config,
            timers: TimerHeap::new(),
            registry: Registry::new(),
            specs: SpecStore::new(Box::new(crate::specs::AcceptAllValidator)),
            provider,
            rigs: HashMap::new(),
            devices: HashMap::new(),
            streams: HashMap::new(),
            hardware_to_instance: HashMap::new(),
            snapshot_builder: SnapshotBuilder::new(),
            dirty: true,
            shutting_down: false,
        };
        let first_sweep_deadline = state.clock.now_ns() + state.config.retention_ms * 1_000_000;
        state.timers.schedule(first_sweep_deadline, TimerTag::RetentionSweep);

        let run_core = Arc::clone(&core);
        let handle = std::thread::Builder::new()
            .name("cambang-core".into())
            .spawn(move || run_core.run(state))
            .expect("failed to spawn core loop thread");
        *core.join_handle.lock().unwrap() = Some(handle);
        core
    }

    fn run(&self, mut state: CoreState) {
        info!("core loop started");
        loop {
            let timeout = state.timers.peek_deadline().map(|deadline| {
                let now = state.clock.now_ns();
                Duration::from_nanos(deadline.saturating_sub(now))
            });
            if self.cmd_queue.is_empty() && self.evt_queue.is_empty() && !self.shutdown_flag.load(Ordering::SeqCst) {
                self.wait_signal.wait(timeout);
            }

            for event in self.evt_queue.drain(state.config.drain_max) {
                state.dispatch_event(event);
            }
            for command in self.cmd_queue.drain(state.config.drain_max) {
                state.dispatch_command(command);
            }

            let now = state.clock.now_ns();
            for tag in state.timers.pop_due(now) {
                state.process_timer(tag);
            }

            state.maybe_publish(&self.publisher);

            if state.shutting_down && self.cmd_queue.is_empty() && self.evt_queue.is_empty() {
                break;
            }
            if self.shutdown_flag.load(Ordering::SeqCst) && self.cmd_queue.is_empty() && self.evt_queue.is_empty() {
                break;
            }
        }
        info!("core loop stopped");
    }

    /// Non-blocking submission; the single entry point host threads use.
    pub fn submit(&self, command: Command) -> CommandResult<()> {
        if self.shutdown_flag.load(Ordering::SeqCst) {
            return Err(CommandError::Shutdown);
        }
        self.cmd_queue.try_enqueue(command).map_err(|_| CommandError::QueueFull)
    }

    pub fn snapshot(&self) -> Arc<crate::snapshot::Snapshot> {
        self.publisher.load()
    }

    pub fn subscribe(&self, observer: Box<dyn Fn(u64, u64) + Send + Sync>) {
        self.publisher.subscribe(observer);
    }

    /// Request shutdown and block until the core thread exits.
    pub fn shutdown_and_join(&self) {
        self.shutdown_flag.store(true, Ordering::SeqCst);
        self.wait_signal.notify();
        if let Some(handle) = self.join_handle.lock().unwrap().take() {
            let _ = handle.join();
        }
    }
}

impl ProviderCallbacks for Core {
    fn on_device_opened(&self, instance_id: InstanceId) {
        let _ = self.evt_queue.try_enqueue(Event::DeviceOpened { instance_id });
        self.wait_signal.notify();
    }

    fn on_device_closed(&self, instance_id: InstanceId) {
        let _ = self.evt_queue.try_enqueue(Event::DeviceClosed { instance_id });
        self.wait_signal.notify();
    }

    fn on_device_error(&self, instance_id: InstanceId, code: ProviderErrorCode, message: Option<String>) {
        let _ = self.evt_queue.try_enqueue(Event::DeviceError { instance_id, code, message });
        self.wait_signal.notify();
    }

    fn on_stream_started(&self, stream_id: StreamId) {
        let _ = self.evt_queue.try_enqueue(Event::StreamStarted { stream_id });
        self.wait_signal.notify();
    }

    fn on_stream_stopped(&self, stream_id: StreamId, reason: ProviderErrorCode) {
        let _ = self.evt_queue.try_enqueue(Event::StreamStopped { stream_id, reason });
        self.wait_signal.notify();
    }

    fn on_stream_error(&self, stream_id: StreamId, code: ProviderErrorCode, message: Option<String>) {
        let _ = self.evt_queue.try_enqueue(Event::StreamError { stream_id, code, message });
        self.wait_signal.notify();
    }

    fn on_frame(&self, frame: crate::provider::FrameHandle) {
        let _ = self.evt_queue.try_enqueue(Event::Frame { frame });
        self.wait_signal.notify();
    }

    fn on_capture_started(&self, capture_id: crate::ids::CaptureId) {
        let _ = self.evt_queue.try_enqueue(Event::CaptureStarted { capture_id });
        self.wait_signal.notify();
    }

    fn on_capture_completed(&self, capture_id: crate::ids::CaptureId, frame: crate::provider::FrameHandle) {
        let _ = self.evt_queue.try_enqueue(Event::CaptureCompleted { capture_id, frame });
        self.wait_signal.notify();
    }

    fn on_capture_failed(&self, capture_id: crate::ids::CaptureId, code: ProviderErrorCode, message: Option<String>) {
        let _ = self.evt_queue.try_enqueue(Event::CaptureFailed { capture_id, code, message });
        self.wait_signal.notify();
    }

    fn on_native_created(&self, info: crate::model::NativeObjectInfo) {
        let _ = self.evt_queue.try_enqueue(Event::NativeCreated { info });
        self.wait_signal.notify();
    }

    fn on_native_destroyed(&self, native_id: crate::ids::NativeId) {
        let _ = self.evt_queue.try_enqueue(Event::NativeDestroyed { native_id });
        self.wait_signal.notify();
    }

    fn on_camera_spec_changed(&self, hardware_id: String, version: u64) {
        let _ = self.evt_queue.try_enqueue(Event::CameraSpecChanged { hardware_id, version });
        self.wait_signal.notify();
    }

    fn on_imaging_spec_changed(&self, version: u64) {
        let _ = self.evt_queue.try_enqueue(Event::ImagingSpecChanged { version });
        self.wait_signal.notify();
    }
}
