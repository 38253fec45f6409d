// SPDX-License-Identifier: GPL-3.0-only
//! Arbitration engine (spec.md §4.G): who gets the device, and in what
//! order competing requests are allowed to preempt one another.
//!
//! Priority, highest first: a rig's synchronized capture outranks a device's
//! own still capture, which outranks any repeating stream. A higher-priority
//! request may preempt (stop) a lower-priority stream already running on the
//! same device; nothing may preempt a rig capture in flight.

use crate::error::CommandError;
use crate::model::{CapabilityEntry, Device, DeviceMode, Rig, RigMode, Stream, StillProfile, StreamProfile};

/// Relative priority of the activity a device may be engaged in. Ordering
/// matters: derives `Ord` so `>` means "outranks".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Priority {
    Stream,
    DeviceCapture,
    RigSyncCapture,
}

/// What the caller must do to admit a request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Admission {
    /// Nothing else needs to stop; the request may proceed immediately.
    Allowed,
    /// The request may proceed only after the named stream(s) are stopped
    /// with [`crate::model::StopReason::Preempted`].
    PreemptStreams(Vec<crate::ids::StreamId>),
    /// The request cannot be admitted at all.
    Denied(CommandError),
}

/// Validate a requested stream profile against a device's reported
/// capability union. Pure, side-effect free (spec.md §4.G: "independently
/// unit testable").
pub fn validate_stream_profile(
    capabilities: &[CapabilityEntry],
    profile: &StreamProfile,
) -> Result<StreamProfile, CommandError> {
    if !profile.format_fourcc.is_valid_for_stream() {
        return Err(CommandError::NotSupported);
    }
    if profile.target_fps_min == 0 || profile.target_fps_min > profile.target_fps_max {
        return Err(CommandError::InvalidArgument);
    }
    if capabilities.iter().any(|c| c.covers_stream_profile(profile)) {
        Ok(profile.clone())
    } else {
        Err(CommandError::ProfileIncompatible)
    }
}

/// Validate a requested still-capture profile the same way.
pub fn validate_still_profile(
    capabilities: &[CapabilityEntry],
    profile: &StillProfile,
) -> Result<StillProfile, CommandError> {
    if !profile.format_fourcc.is_valid_for_still() {
        return Err(CommandError::NotSupported);
    }
    if capabilities.iter().any(|c| c.covers_still_profile(profile)) {
        Ok(profile.clone())
    } else {
        Err(CommandError::ProfileIncompatible)
    }
}

fn device_priority(device: &Device) -> Option<Priority> {
    match device.mode {
        DeviceMode::Idle | DeviceMode::Error => None,
        DeviceMode::Streaming => Some(Priority::Stream),
        DeviceMode::Capturing => Some(Priority::DeviceCapture),
    }
}

/// Decide whether `create_stream` (which implies an eventual `start_stream`)
/// may be admitted on `device`, given the rig that may hold authority over
/// it.
pub fn decide_create_stream(device: &Device, rig: Option<&Rig>) -> Result<(), CommandError> {
    if let Some(rig) = rig {
        if rig.mode != RigMode::Off && !rig.config.allow_device_capture_override {
            return Err(CommandError::RigAuthoritative);
        }
    }
    if device.phase != crate::model::DevicePhase::Live {
        return Err(CommandError::BadState);
    }
    Ok(())
}

/// Decide whether `start_stream` may run now, possibly preempting whatever
/// is currently engaging the device.
pub fn decide_start_stream(device: &Device) -> Admission {
    match device_priority(device) {
        None => Admission::Allowed,
        Some(Priority::Stream) => {
            // A device has at most one active stream (spec.md §3 invariant):
            // starting a new one always implies stopping the old one first,
            // which the caller does explicitly rather than via preemption.
            Admission::Allowed
        }
        // spec.md §4.G item 2: `start_stream` denies `ERR_BAD_STATE` if any
        // capture is in-flight on the device.
        Some(Priority::DeviceCapture) => Admission::Denied(CommandError::BadState),
        Some(Priority::RigSyncCapture) => Admission::Denied(CommandError::RigAuthoritative),
    }
}

/// Decide whether `trigger_capture` (a device-local still capture) may run,
/// possibly preempting an active repeating stream.
pub fn decide_trigger_capture(device: &Device, rig: Option<&Rig>, active_stream: Option<&Stream>) -> Admission {
    if let Some(rig) = rig {
        if rig.mode != RigMode::Off && !rig.config.allow_device_capture_override {
            return Admission::Denied(CommandError::RigAuthoritative);
        }
    }
    match device_priority(device) {
        None => Admission::Allowed,
        Some(Priority::Stream) => match active_stream {
            Some(stream) if stream.is_active() => Admission::PreemptStreams(vec![stream.stream_id]),
            _ => Admission::Allowed,
        },
        Some(Priority::DeviceCapture) => Admission::Denied(CommandError::Busy),
        Some(Priority::RigSyncCapture) => Admission::Denied(CommandError::RigAuthoritative),
    }
}

/// Decide whether a rig may trigger a synchronized capture across its
/// members, the highest-priority activity in the system: it preempts any
/// repeating stream or device-local capture on every member device.
pub fn decide_trigger_sync_capture(rig: &Rig, members: &[(&Device, Option<&Stream>)]) -> Admission {
    if rig.mode != RigMode::Armed {
        return Admission::Denied(CommandError::BadState);
    }
    let mut to_preempt = Vec::new();
    for (device, active_stream) in members {
        match device_priority(device) {
            None => {}
            Some(Priority::Stream) => {
                if let Some(stream) = active_stream {
                    if stream.is_active() {
                        to_preempt.push(stream.stream_id);
                    }
                }
            }
            Some(Priority::DeviceCapture) => return Admission::Denied(CommandError::Busy),
            Some(Priority::RigSyncCapture) => return Admission::Denied(CommandError::Busy),
        }
    }
    if to_preempt.is_empty() {
        Admission::Allowed
    } else {
        Admission::PreemptStreams(to_preempt)
    }
}
