// SPDX-License-Identifier: GPL-3.0-only
//! Provider interface (spec.md §6.2): the seam between the core and a
//! concrete platform camera backend (PipeWire, libcamera, v4l2, ...).
//! Concrete providers are out of scope for this crate; [`synthetic`]
//! supplies a deterministic in-process one for the crate's own tests.

pub mod synthetic;

use crate::error::ProviderErrorCode;
use crate::ids::{CaptureId, InstanceId, NativeId, RigId, StreamId};
use crate::model::{CapabilityEntry, NativeObjectInfo, StillProfile, StreamProfile};
use std::fmt;

pub type ProviderResult = Result<(), ProviderErrorCode>;

/// A received frame, valid only until [`FrameHandle::release`] (or drop) is
/// called. `data` points into provider-owned memory; the core never copies
/// it, only forwards the handle to whichever host consumer asked for it.
pub struct FrameHandle {
    pub device_instance_id: InstanceId,
    pub stream_id: Option<StreamId>,
    pub capture_id: Option<CaptureId>,
    pub width: u32,
    pub height: u32,
    pub format_fourcc: crate::pixel_format::Fourcc,
    pub timestamp_ns: u64,
    pub data: *const u8,
    pub size_bytes: usize,
    pub stride_bytes: u32,
    release: Option<Box<dyn FnOnce() + Send>>,
}

// SAFETY: `data` is a borrowed view into provider-owned memory that is only
// read, never mutated, and the handle's sole owner is the core thread until
// `release` runs; the raw pointer itself carries no thread affinity.
unsafe impl Send for FrameHandle {}

impl fmt::Debug for FrameHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FrameHandle")
            .field("device_instance_id", &self.device_instance_id)
            .field("stream_id", &self.stream_id)
            .field("capture_id", &self.capture_id)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("timestamp_ns", &self.timestamp_ns)
            .finish_non_exhaustive()
    }
}

impl FrameHandle {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        device_instance_id: InstanceId,
        stream_id: Option<StreamId>,
        capture_id: Option<CaptureId>,
        width: u32,
        height: u32,
        format_fourcc: crate::pixel_format::Fourcc,
        timestamp_ns: u64,
        data: *const u8,
        size_bytes: usize,
        stride_bytes: u32,
        release: Box<dyn FnOnce() + Send>,
    ) -> Self {
        Self {
            device_instance_id,
            stream_id,
            capture_id,
            width,
            height,
            format_fourcc,
            timestamp_ns,
            data,
            size_bytes,
            stride_bytes,
            release: Some(release),
        }
    }

    /// Release the underlying provider buffer. Idempotent: calling it twice
    /// is a no-op, matching the spec's "callable from the core thread,
    /// exactly once" by making a second call harmless rather than relying on
    /// callers to track it.
    pub fn release(&mut self) {
        if let Some(release) = self.release.take() {
            release();
        }
    }
}

impl Drop for FrameHandle {
    fn drop(&mut self) {
        self.release();
    }
}

/// Platform camera backend, driven entirely from the core thread. Every
/// method must return promptly; completion that takes real time is reported
/// asynchronously through [`ProviderCallbacks`].
pub trait Provider: Send {
    fn initialize(&mut self, callbacks: std::sync::Arc<dyn ProviderCallbacks>);

    fn enumerate_endpoints(&mut self) -> Result<Vec<String>, ProviderErrorCode>;
    fn capabilities(&mut self, hardware_id: &str) -> Result<Vec<CapabilityEntry>, ProviderErrorCode>;

    fn open_device(&mut self, hardware_id: &str, instance_id: InstanceId) -> ProviderResult;
    fn close_device(&mut self, instance_id: InstanceId) -> ProviderResult;

    fn create_stream(&mut self, instance_id: InstanceId, stream_id: StreamId, profile: &StreamProfile) -> ProviderResult;
    fn start_stream(&mut self, stream_id: StreamId) -> ProviderResult;
    fn stop_stream(&mut self, stream_id: StreamId) -> ProviderResult;
    fn destroy_stream(&mut self, stream_id: StreamId) -> ProviderResult;

    fn trigger_capture(&mut self, instance_id: InstanceId, capture_id: CaptureId, profile: &StillProfile) -> ProviderResult;
    fn trigger_sync_capture(&mut self, rig_id: RigId, capture_id: CaptureId, members: &[InstanceId]) -> ProviderResult;

    fn apply_camera_spec_patch(&mut self, hardware_id: &str, version: u64, patch: &[u8]) -> ProviderResult;
    fn apply_imaging_spec_patch(&mut self, version: u64, patch: &[u8]) -> ProviderResult;

    fn shutdown(&mut self);
}

/// Sink the core hands to a [`Provider`] so it can report facts back.
/// Implementations must be cheap and non-blocking: they only construct an
/// [`crate::command::Event`] and enqueue it (spec.md §5's
/// single-serialized-callback-context contract).
pub trait ProviderCallbacks: Send + Sync {
    fn on_device_opened(&self, instance_id: InstanceId);
    fn on_device_closed(&self, instance_id: InstanceId);
    fn on_device_error(&self, instance_id: InstanceId, code: ProviderErrorCode, message: Option<String>);

    fn on_stream_started(&self, stream_id: StreamId);
    fn on_stream_stopped(&self, stream_id: StreamId, reason: ProviderErrorCode);
    fn on_stream_error(&self, stream_id: StreamId, code: ProviderErrorCode, message: Option<String>);
    fn on_frame(&self, frame: FrameHandle);

    fn on_capture_started(&self, capture_id: CaptureId);
    fn on_capture_completed(&self, capture_id: CaptureId, frame: FrameHandle);
    fn on_capture_failed(&self, capture_id: CaptureId, code: ProviderErrorCode, message: Option<String>);

    fn on_native_created(&self, info: NativeObjectInfo);
    fn on_native_destroyed(&self, native_id: NativeId);

    fn on_camera_spec_changed(&self, hardware_id: String, version: u64);
    fn on_imaging_spec_changed(&self, version: u64);
}
