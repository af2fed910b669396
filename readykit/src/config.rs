//! Engine configuration, loadable from TOML.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::catalog::FallbackEntry;
use crate::error::ReadinessError;

/// Timing and capacity knobs for the coordinator and loader.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Fixed interval between re-checks of `Failed` capabilities.
    pub check_interval_ms: u64,
    /// Per-candidate timeout inside a fallback sequence.
    pub candidate_timeout_ms: u64,
    /// Consecutive settled intervals before the re-check task stops.
    pub settle_intervals: u32,
    /// Event broadcast channel capacity.
    pub event_capacity: usize,
    /// Client-level timeout for the HTTP source loader.
    pub http_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            check_interval_ms: 100,
            candidate_timeout_ms: 5_000,
            settle_intervals: 2,
            event_capacity: 128,
            http_timeout_ms: 8_000,
        }
    }
}

impl EngineConfig {
    pub fn check_interval(&self) -> Duration {
        Duration::from_millis(self.check_interval_ms.max(1))
    }

    pub fn candidate_timeout(&self) -> Duration {
        Duration::from_millis(self.candidate_timeout_ms.max(1))
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.max(1))
    }

    pub fn with_check_interval_ms(mut self, ms: u64) -> Self {
        self.check_interval_ms = ms;
        self
    }

    pub fn with_candidate_timeout_ms(mut self, ms: u64) -> Self {
        self.candidate_timeout_ms = ms;
        self
    }

    pub fn with_settle_intervals(mut self, intervals: u32) -> Self {
        self.settle_intervals = intervals;
        self
    }

    pub fn with_event_capacity(mut self, capacity: usize) -> Self {
        self.event_capacity = capacity;
        self
    }
}

/// Top-level configuration document: engine settings plus fallback entries.
///
/// ```toml
/// [engine]
/// check_interval_ms = 100
///
/// [fallbacks."charts.js"]
/// candidates = [
///     { url = "https://cdn-a.example.com/charts.js", integrity = "sha256-..." },
///     { url = "https://cdn-b.example.com/charts.js" },
/// ]
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReadinessConfig {
    pub engine: EngineConfig,
    pub fallbacks: HashMap<String, FallbackEntry>,
}

impl ReadinessConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ReadinessError> {
        Ok(toml::from_str(input)?)
    }

    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self, ReadinessError> {
        let contents = std::fs::read_to_string(path)?;
        Self::from_toml_str(&contents)
    }
}
