// SPDX-License-Identifier: GPL-3.0-only
//! Host-facing command and event types (spec.md §6.1).
//!
//! Commands flow host → core through [`crate::queue::BoundedQueue`]; each
//! carries a `correlation_id` the host chose and an optional [`ReplyTx`] it
//! can block on (or ignore, for fire-and-forget submissions).

use crate::error::CommandResult;
use crate::ids::{CaptureId, InstanceId, RigId, StreamId};
use crate::model::{StillProfile, StreamProfile};
use crate::specs::ApplyMode;
use std::sync::{Arc, Condvar, Mutex};

/// A one-shot reply channel, hand-rolled rather than pulled from an async
/// runtime (this crate carries none — see `config` module docs). A host
/// binding built on `tokio` bridges this to a `tokio::sync::oneshot` itself.
pub struct ReplyTx<T> {
    slot: Arc<(Mutex<Option<T>>, Condvar)>,
}

pub struct ReplyRx<T> {
    slot: Arc<(Mutex<Option<T>>, Condvar)>,
}

pub fn reply_channel<T>() -> (ReplyTx<T>, ReplyRx<T>) {
    let slot = Arc::new((Mutex::new(None), Condvar::new()));
    (ReplyTx { slot: Arc::clone(&slot) }, ReplyRx { slot })
}

impl<T> ReplyTx<T> {
    /// Deliver the reply. Called at most once, from the core thread.
    pub fn send(self, value: T) {
        let (lock, cvar) = &*self.slot;
        *lock.lock().unwrap() = Some(value);
        cvar.notify_all();
    }
}

impl<T> ReplyRx<T> {
    /// Block the calling (host) thread until the reply arrives.
    pub fn recv(self) -> T {
        let (lock, cvar) = &*self.slot;
        let mut guard = lock.lock().unwrap();
        while guard.is_none() {
            guard = cvar.wait(guard).unwrap();
        }
        guard.take().unwrap()
    }
}

/// Every request a host may submit to the core (spec.md §6.1).
pub enum Command {
    EnumerateEndpoints {
        correlation_id: u64,
        reply: Option<ReplyTx<CommandResult<Vec<String>>>>,
    },
    EngageDevice {
        correlation_id: u64,
        hardware_id: String,
        reply: Option<ReplyTx<CommandResult<InstanceId>>>,
    },
    DisengageDevice {
        correlation_id: u64,
        instance_id: InstanceId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    SetWarmPolicy {
        correlation_id: u64,
        instance_id: InstanceId,
        warm_hold_ms: u64,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    CreateStream {
        correlation_id: u64,
        instance_id: InstanceId,
        profile: StreamProfile,
        reply: Option<ReplyTx<CommandResult<StreamId>>>,
    },
    StartStream {
        correlation_id: u64,
        stream_id: StreamId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    StopStream {
        correlation_id: u64,
        stream_id: StreamId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    DestroyStream {
        correlation_id: u64,
        stream_id: StreamId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    SetStillCaptureProfile {
        correlation_id: u64,
        instance_id: InstanceId,
        profile: StillProfile,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    TriggerCapture {
        correlation_id: u64,
        instance_id: InstanceId,
        reply: Option<ReplyTx<CommandResult<CaptureId>>>,
    },
    CreateRig {
        correlation_id: u64,
        name: String,
        member_hardware_ids: Vec<String>,
        allow_device_capture_override: bool,
        reply: Option<ReplyTx<CommandResult<RigId>>>,
    },
    DestroyRig {
        correlation_id: u64,
        rig_id: RigId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    ArmRig {
        correlation_id: u64,
        rig_id: RigId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    DisarmRig {
        correlation_id: u64,
        rig_id: RigId,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    TriggerSyncCapture {
        correlation_id: u64,
        rig_id: RigId,
        reply: Option<ReplyTx<CommandResult<CaptureId>>>,
    },
    ApplyCameraSpecPatch {
        correlation_id: u64,
        hardware_id: String,
        new_version: u64,
        patch: Vec<u8>,
        apply_mode: ApplyMode,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    ApplyImagingSpecPatch {
        correlation_id: u64,
        new_version: u64,
        patch: Vec<u8>,
        apply_mode: ApplyMode,
        reply: Option<ReplyTx<CommandResult<()>>>,
    },
    Shutdown {
        correlation_id: u64,
        reply: Option<ReplyTx<()>>,
    },
}

impl Command {
    pub fn correlation_id(&self) -> u64 {
        match self {
            Command::EnumerateEndpoints { correlation_id, .. }
            | Command::EngageDevice { correlation_id, .. }
            | Command::DisengageDevice { correlation_id, .. }
            | Command::SetWarmPolicy { correlation_id, .. }
            | Command::CreateStream { correlation_id, .. }
            | Command::StartStream { correlation_id, .. }
            | Command::StopStream { correlation_id, .. }
            | Command::DestroyStream { correlation_id, .. }
            | Command::SetStillCaptureProfile { correlation_id, .. }
            | Command::TriggerCapture { correlation_id, .. }
            | Command::CreateRig { correlation_id, .. }
            | Command::DestroyRig { correlation_id, .. }
            | Command::ArmRig { correlation_id, .. }
            | Command::DisarmRig { correlation_id, .. }
            | Command::TriggerSyncCapture { correlation_id, .. }
            | Command::ApplyCameraSpecPatch { correlation_id, .. }
            | Command::ApplyImagingSpecPatch { correlation_id, .. }
            | Command::Shutdown { correlation_id, .. } => *correlation_id,
        }
    }
}

/// Provider-callback-originated facts, enqueued onto `evt_queue` and drained
/// by the core loop (spec.md §4.C, §6.2).
pub enum Event {
    DeviceOpened { instance_id: InstanceId },
    DeviceClosed { instance_id: InstanceId },
    DeviceError { instance_id: InstanceId, code: crate::error::ProviderErrorCode, message: Option<String> },
    StreamStarted { stream_id: StreamId },
    StreamStopped { stream_id: StreamId, reason: crate::error::ProviderErrorCode },
    StreamError { stream_id: StreamId, code: crate::error::ProviderErrorCode, message: Option<String> },
    Frame { frame: crate::provider::FrameHandle },
    CaptureStarted { capture_id: CaptureId },
    CaptureCompleted { capture_id: CaptureId, frame: crate::provider::FrameHandle },
    CaptureFailed { capture_id: CaptureId, code: crate::error::ProviderErrorCode, message: Option<String> },
    NativeCreated { info: crate::model::NativeObjectInfo },
    NativeDestroyed { native_id: crate::ids::NativeId },
    CameraSpecChanged { hardware_id: String, version: u64 },
    ImagingSpecChanged { version: u64 },
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    #[test]
    fn reply_channel_delivers_value_across_threads() {
        let (tx, rx) = reply_channel::<u32>();
        let handle = thread::spawn(move || rx.recv());
        thread::sleep(std::time::Duration::from_millis(10));
        tx.send(99);
        assert_eq!(handle.join().unwrap(), 99);
    }

    #[test]
    fn correlation_id_is_readable_without_matching_the_full_variant() {
        let cmd = Command::Shutdown { correlation_id: 5, reply: None };
        assert_eq!(cmd.correlation_id(), 5);
    }
}
