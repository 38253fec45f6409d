// SPDX-License-Identifier: GPL-3.0-only
//! A deterministic in-process [`Provider`] used by this crate's own
//! integration tests (spec.md §8 scenarios S1–S6). It never touches real
//! hardware or wall-clock time: every completion is driven explicitly by
//! the test calling one of its `complete_*`/`fail_*` methods.

use super::{Provider, ProviderCallbacks, ProviderResult};
use crate::error::ProviderErrorCode;
use crate::ids::{CaptureId, InstanceId, NativeId, RigId, StreamId};
use crate::model::{CapabilityEntry, StillProfile, StreamProfile};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

#[derive(Default)]
struct Inner {
    callbacks: Option<Arc<dyn ProviderCallbacks>>,
    capabilities: HashMap<String, Vec<CapabilityEntry>>,
    /// Hardware ids that should fail the next `open_device` call with this
    /// code, so tests can exercise provider-reported failures without a
    /// real backend.
    fail_open: HashMap<String, ProviderErrorCode>,
}

/// Cloneable handle: the test keeps one clone to drive completions while
/// handing another (boxed as `dyn Provider`) to the `Core`.
#[derive(Clone, Default)]
pub struct SyntheticProvider {
    inner: Arc<Mutex<Inner>>,
}

impl SyntheticProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_capabilities(&self, hardware_id: &str, capabilities: Vec<CapabilityEntry>) {
        self.inner.lock().unwrap().capabilities.insert(hardware_id.to_string(), capabilities);
    }

    pub fn fail_next_open(&self, hardware_id: &str, code: ProviderErrorCode) {
        self.inner.lock().unwrap().fail_open.insert(hardware_id.to_string(), code);
    }

    fn callbacks(&self) -> Arc<dyn ProviderCallbacks> {
        self.inner
            .lock()
            .unwrap()
            .callbacks
            .clone()
            .expect("SyntheticProvider used before Provider::initialize was called")
    }

    pub fn deliver_frame(&self, frame: super::FrameHandle) {
        self.callbacks().on_frame(frame);
    }

    pub fn complete_capture(&self, capture_id: CaptureId, frame: super::FrameHandle) {
        self.callbacks().on_capture_completed(capture_id, frame);
    }

    pub fn fail_capture(&self, capture_id: CaptureId, code: ProviderErrorCode) {
        self.callbacks().on_capture_failed(capture_id, code, None);
    }

    pub fn stop_stream_from_below(&self, stream_id: StreamId, reason: ProviderErrorCode) {
        self.callbacks().on_stream_stopped(stream_id, reason);
    }

    pub fn fail_stream(&self, stream_id: StreamId, code: ProviderErrorCode) {
        self.callbacks().on_stream_error(stream_id, code, None);
    }
}

impl Provider for SyntheticProvider {
    fn initialize(&mut self, callbacks: Arc<dyn ProviderCallbacks>) {
        self.inner.lock().unwrap().callbacks = Some(callbacks);
    }

    fn enumerate_endpoints(&mut self) -> Result<Vec<String>, ProviderErrorCode> {
        Ok(self.inner.lock().unwrap().capabilities.keys().cloned().collect())
    }

    fn capabilities(&mut self, hardware_id: &str) -> Result<Vec<CapabilityEntry>, ProviderErrorCode> {
        self.inner
            .lock()
            .unwrap()
            .capabilities
            .get(hardware_id)
            .cloned()
            .ok_or(ProviderErrorCode::NotSupported)
    }

    fn open_device(&mut self, hardware_id: &str, instance_id: InstanceId) -> ProviderResult {
        if let Some(code) = self.inner.lock().unwrap().fail_open.remove(hardware_id) {
            return Err(code);
        }
        self.callbacks().on_device_opened(instance_id);
        Ok(())
    }

    fn close_device(&mut self, instance_id: InstanceId) -> ProviderResult {
        self.callbacks().on_device_closed(instance_id);
        Ok(())
    }

    fn create_stream(&mut self, _instance_id: InstanceId, _stream_id: StreamId, _profile: &StreamProfile) -> ProviderResult {
        Ok(())
    }

    fn start_stream(&mut self, stream_id: StreamId) -> ProviderResult {
        self.callbacks().on_stream_started(stream_id);
        Ok(())
    }

    fn stop_stream(&mut self, stream_id: StreamId) -> ProviderResult {
        self.callbacks().on_stream_stopped(stream_id, ProviderErrorCode::ShuttingDown);
        Ok(())
    }

    fn destroy_stream(&mut self, _stream_id: StreamId) -> ProviderResult {
        Ok(())
    }

    fn trigger_capture(&mut self, _instance_id: InstanceId, capture_id: CaptureId, _profile: &StillProfile) -> ProviderResult {
        self.callbacks().on_capture_started(capture_id);
        Ok(())
    }

    fn trigger_sync_capture(&mut self, _rig_id: RigId, capture_id: CaptureId, _members: &[InstanceId]) -> ProviderResult {
        self.callbacks().on_capture_started(capture_id);
        Ok(())
    }

    fn apply_camera_spec_patch(&mut self, hardware_id: &str, version: u64, _patch: &[u8]) -> ProviderResult {
        self.callbacks().on_camera_spec_changed(hardware_id.to_string(), version);
        Ok(())
    }

    fn apply_imaging_spec_patch(&mut self, version: u64, _patch: &[u8]) -> ProviderResult {
        self.callbacks().on_imaging_spec_changed(version);
        Ok(())
    }

    fn shutdown(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::IdAllocator;
    use crate::pixel_format::Fourcc;
    use std::sync::atomic::{AtomicU64, Ordering};

    struct RecordingCallbacks {
        opened: AtomicU64,
    }

    impl ProviderCallbacks for RecordingCallbacks {
        fn on_device_opened(&self, _instance_id: InstanceId) {
            self.opened.fetch_add(1, Ordering::SeqCst);
        }
        fn on_device_closed(&self, _instance_id: InstanceId) {}
        fn on_device_error(&self, _instance_id: InstanceId, _code: ProviderErrorCode, _message: Option<String>) {}
        fn on_stream_started(&self, _stream_id: StreamId) {}
        fn on_stream_stopped(&self, _stream_id: StreamId, _reason: ProviderErrorCode) {}
        fn on_stream_error(&self, _stream_id: StreamId, _code: ProviderErrorCode, _message: Option<String>) {}
        fn on_frame(&self, _frame: super::super::FrameHandle) {}
        fn on_capture_started(&self, _capture_id: CaptureId) {}
        fn on_capture_completed(&self, _capture_id: CaptureId, _frame: super::super::FrameHandle) {}
        fn on_capture_failed(&self, _capture_id: CaptureId, _code: ProviderErrorCode, _message: Option<String>) {}
        fn on_native_created(&self, _info: crate::model::NativeObjectInfo) {}
        fn on_native_destroyed(&self, _native_id: NativeId) {}
        fn on_camera_spec_changed(&self, _hardware_id: String, _version: u64) {}
        fn on_imaging_spec_changed(&self, _version: u64) {}
    }

    #[test]
    fn open_device_invokes_callback() {
        let mut alloc = IdAllocator::new();
        let mut provider = SyntheticProvider::new();
        let callbacks = Arc::new(RecordingCallbacks { opened: AtomicU64::new(0) });
        provider.initialize(callbacks.clone());
        provider.open_device("cam0", alloc.allocate_instance()).unwrap();
        assert_eq!(callbacks.opened.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn fail_next_open_reports_configured_error() {
        let mut alloc = IdAllocator::new();
        let mut provider = SyntheticProvider::new();
        provider.initialize(Arc::new(RecordingCallbacks { opened: AtomicU64::new(0) }));
        provider.fail_next_open("cam0", ProviderErrorCode::Busy);
        let result = provider.open_device("cam0", alloc.allocate_instance());
        assert_eq!(result, Err(ProviderErrorCode::Busy));
    }

    #[test]
    fn capabilities_round_trip() {
        let mut provider = SyntheticProvider::new();
        let entry = CapabilityEntry {
            width: 640,
            height: 480,
            format_fourcc: Fourcc::NV12,
            fps_min: 15,
            fps_max: 30,
        };
        provider.set_capabilities("cam0", vec![entry.clone()]);
        assert_eq!(provider.capabilities("cam0").unwrap(), vec![entry]);
    }
}
