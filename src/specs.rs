// SPDX-License-Identifier: GPL-3.0-only
//! Spec stores: `CameraSpec[hardware_id]` and the global `ImagingSpec`, each
//! with a monotonic version (spec.md §4.E).

use crate::error::CommandError;
use crate::model::CapabilityEntry;
use std::collections::HashMap;

/// How a patch should be admitted (spec.md §4.E).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApplyMode {
    /// Defer until no affected device is engaged and no in-flight capture
    /// depends on it; retried after each relevant state transition.
    WhenSafe,
    /// Apply immediately; fails with `BadState` if currently unsafe.
    Now,
}

/// Validates opaque patch payloads before they are applied. The store
/// treats patch content as content-addressed bytes; bit-level validation is
/// explicitly out of scope (spec.md §4.E), so this is a pluggable seam
/// rather than a fixed parser.
pub trait PatchValidator: Send {
    fn validate(&self, patch: &[u8]) -> bool;
}

/// Default validator used by tests and by embedders with no stricter
/// requirement: accepts any non-empty payload.
pub struct AcceptAllValidator;

impl PatchValidator for AcceptAllValidator {
    fn validate(&self, patch: &[u8]) -> bool {
        !patch.is_empty()
    }
}

/// One hardware device's effective capability/configuration spec.
#[derive(Debug, Clone)]
pub struct CameraSpec {
    pub hardware_id: String,
    pub version: u64,
    pub capabilities: Vec<CapabilityEntry>,
    pub content: Vec<u8>,
    pending_patch: Option<(u64, Vec<u8>)>,
}

impl CameraSpec {
    pub fn new(hardware_id: String) -> Self {
        Self {
            hardware_id,
            version: 0,
            capabilities: Vec::new(),
            content: Vec::new(),
            pending_patch: None,
        }
    }
}

/// Global imaging policy spec.
#[derive(Debug, Clone, Default)]
pub struct ImagingSpec {
    pub version: u64,
    pub content: Vec<u8>,
    pending_patch: Option<(u64, Vec<u8>)>,
}

/// Outcome of a successful patch application: the caller uses this to know
/// whether to forward the patch to the provider and mark the snapshot
/// dirty.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PatchOutcome {
    /// Applied now; version bumped.
    Applied,
    /// Deferred (`ApplyMode::WhenSafe` while unsafe); stored as pending.
    Deferred,
    /// Content was identical to the current version; no-op, no version
    /// bump (spec.md §4.E: "Patch application updates version iff the
    /// patch changed observable content").
    Unchanged,
}

pub struct SpecStore {
    pub camera_specs: HashMap<String, CameraSpec>,
    pub imaging_spec: ImagingSpec,
    validator: Box<dyn PatchValidator>,
}

impl SpecStore {
    pub fn new(validator: Box<dyn PatchValidator>) -> Self {
        Self {
            camera_specs: HashMap::new(),
            imaging_spec: ImagingSpec::default(),
            validator,
        }
    }

    pub fn camera_spec_or_insert(&mut self, hardware_id: &str) -> &mut CameraSpec {
        self.camera_specs
            .entry(hardware_id.to_string())
            .or_insert_with(|| CameraSpec::new(hardware_id.to_string()))
    }

    /// Apply a patch to a device's `CameraSpec`. `is_safe` is supplied by
    /// the caller (the core loop), which alone knows whether the device is
    /// currently engaged or has an in-flight capture.
    pub fn apply_camera_spec_patch(
        &mut self,
        hardware_id: &str,
        new_version: u64,
        patch: Vec<u8>,
        apply_mode: ApplyMode,
        is_safe: impl Fn() -> bool,
    ) -> Result<PatchOutcome, CommandError> {
        if !self.validator.validate(&patch) {
            return Err(CommandError::InvalidArgument);
        }
        let spec = self.camera_spec_or_insert(hardware_id);
        if spec.content == patch {
            return Ok(PatchOutcome::Unchanged);
        }
        match apply_mode {
            ApplyMode::Now => {
                if !is_safe() {
                    return Err(CommandError::BadState);
                }
                spec.content = patch;
                spec.version = new_version;
                Ok(PatchOutcome::Applied)
            }
            ApplyMode::WhenSafe => {
                if is_safe() {
                    spec.content = patch;
                    spec.version = new_version;
                    spec.pending_patch = None;
                    Ok(PatchOutcome::Applied)
                } else {
                    spec.pending_patch = Some((new_version, patch));
                    Ok(PatchOutcome::Deferred)
                }
            }
        }
    }

    /// Retry any pending `CameraSpec` patch for `hardware_id` now that a
    /// relevant state transition may have made it safe.
    pub fn retry_pending_camera_patch(
        &mut self,
        hardware_id: &str,
        is_safe: impl Fn() -> bool,
    ) -> Option<PatchOutcome> {
        let spec = self.camera_specs.get_mut(hardware_id)?;
        let (version, patch) = spec.pending_patch.clone()?;
        if is_safe() {
            spec.content = patch;
            spec.version = version;
            spec.pending_patch = None;
            Some(PatchOutcome::Applied)
        } else {
            None
        }
    }

    pub fn apply_imaging_spec_patch(
        &mut self,
        new_version: u64,
        patch: Vec<u8>,
        apply_mode: ApplyMode,
        is_safe: impl Fn() -> bool,
    ) -> Result<PatchOutcome, CommandError> {
        if !self.validator.validate(&patch) {
            return Err(CommandError::InvalidArgument);
        }
        if self.imaging_spec.content == patch {
            return Ok(PatchOutcome::Unchanged);
        }
        match apply_mode {
            ApplyMode::Now => {
                if !is_safe() {
                    return Err(CommandError::BadState);
                }
                self.imaging_spec.content = patch;
                self.imaging_spec.version = new_version;
                Ok(PatchOutcome::Applied)
            }
            ApplyMode::WhenSafe => {
                if is_safe() {
                    self.imaging_spec.content = patch;
                    self.imaging_spec.version = new_version;
                    self.imaging_spec.pending_patch = None;
                    Ok(PatchOutcome::Applied)
                } else {
                    self.imaging_spec.pending_patch = Some((new_version, patch));
                    Ok(PatchOutcome::Deferred)
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn apply_now_fails_with_bad_state_when_unsafe() {
        let mut store = SpecStore::new(Box::new(AcceptAllValidator));
        let result =
            store.apply_camera_spec_patch("cam0", 2, vec![1, 2, 3], ApplyMode::Now, || false);
        assert_eq!(result, Err(CommandError::BadState));
    }

    #[test]
    fn apply_when_safe_defers_until_safe() {
        let mut store = SpecStore::new(Box::new(AcceptAllValidator));
        let result =
            store.apply_camera_spec_patch("cam0", 2, vec![1, 2, 3], ApplyMode::WhenSafe, || false);
        assert_eq!(result, Ok(PatchOutcome::Deferred));
        assert_eq!(store.camera_specs["cam0"].version, 0);

        let retried = store.retry_pending_camera_patch("cam0", || true);
        assert_eq!(retried, Some(PatchOutcome::Applied));
        assert_eq!(store.camera_specs["cam0"].version, 2);
    }

    #[test]
    fn identical_content_does_not_bump_version() {
        let mut store = SpecStore::new(Box::new(AcceptAllValidator));
        store
            .apply_camera_spec_patch("cam0", 1, vec![9], ApplyMode::Now, || true)
            .unwrap();
        let result = store.apply_camera_spec_patch("cam0", 2, vec![9], ApplyMode::Now, || true);
        assert_eq!(result, Ok(PatchOutcome::Unchanged));
        assert_eq!(store.camera_specs["cam0"].version, 1);
    }

    #[test]
    fn rejects_empty_patch_as_invalid_argument() {
        let mut store = SpecStore::new(Box::new(AcceptAllValidator));
        let result = store.apply_camera_spec_patch("cam0", 1, vec![], ApplyMode::Now, || true);
        assert_eq!(result, Err(CommandError::InvalidArgument));
    }
}
