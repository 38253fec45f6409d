// SPDX-License-Identifier: GPL-3.0-only
//! Runtime-tunable constants.
//!
//! spec.md §9 leaves `RETENTION_MS`, `STARVE_MS` and `DRAIN_MAX` as "constants
//! to be tuned, not fixed here". This module collects them into one `Copy`
//! struct so an embedder can tune them without touching core logic, and
//! supports round-tripping through TOML the way the original GUI app's
//! `cosmic_config`-backed `Config` persisted user-tunable settings.

use serde::{Deserialize, Serialize};

/// Tunable knobs for the core loop, retention sweep and starvation watchdog.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// How long a `DESTROYED` native-object record is retained before the
    /// retention sweep removes it (spec.md §4.D).
    pub retention_ms: u64,
    /// How long a `FLOWING` stream may go without a frame before the
    /// starvation watchdog transitions it to `STARVED` (spec.md §4.F).
    pub starve_ms: u64,
    /// Maximum events/commands drained per core-loop iteration.
    /// `usize::MAX` means "unbounded full drain" (spec.md §4.C v1 default).
    pub drain_max: usize,
    /// Bound on the host → core command queue (spec.md §4.C).
    pub cmd_queue_capacity: usize,
    /// Bound on the provider → core event queue (spec.md §4.C).
    pub evt_queue_capacity: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            retention_ms: 30_000,
            starve_ms: 2_000,
            drain_max: usize::MAX,
            cmd_queue_capacity: 256,
            evt_queue_capacity: 1024,
        }
    }
}

impl RuntimeConfig {
    /// Parse a `RuntimeConfig` from a TOML document.
    pub fn from_toml_str(s: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(s)
    }

    /// Serialize this config to a TOML document.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_matches_documented_values() {
        let cfg = RuntimeConfig::default();
        assert_eq!(cfg.retention_ms, 30_000);
        assert_eq!(cfg.starve_ms, 2_000);
        assert_eq!(cfg.drain_max, usize::MAX);
    }

    #[test]
    fn round_trips_through_toml() {
        let cfg = RuntimeConfig {
            retention_ms: 1_000,
            starve_ms: 500,
            drain_max: 64,
            cmd_queue_capacity: 8,
            evt_queue_capacity: 16,
        };
        let s = cfg.to_toml_string().unwrap();
        let parsed = RuntimeConfig::from_toml_str(&s).unwrap();
        assert_eq!(cfg, parsed);
    }
}
