//! Structured failure records for the external error-reporting collaborator.
//!
//! The engine defines the record shape and the emission points; persistence
//! and transport belong to whoever implements the sink.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sequencer::Attempt;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// One concrete source failed to load (per candidate).
    LoadFailure,
    /// Every candidate for the asset's fallback key failed.
    FallbackExhausted,
}

/// One emitted error record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TelemetryRecord {
    pub id: Uuid,
    /// Asset identifier (the fallback key).
    pub asset: String,
    pub failure: FailureKind,
    pub timestamp: DateTime<Utc>,
    /// URL of the failed source, when the failure concerns a single load.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
    /// Per-candidate attempt records, when the failure is an exhaustion.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attempts: Vec<Attempt>,
}

impl TelemetryRecord {
    pub fn load_failure(asset: impl Into<String>, url: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset: asset.into(),
            failure: FailureKind::LoadFailure,
            timestamp: Utc::now(),
            url: Some(url.into()),
            attempts: Vec::new(),
        }
    }

    pub fn fallback_exhausted(asset: impl Into<String>, attempts: Vec<Attempt>) -> Self {
        Self {
            id: Uuid::new_v4(),
            asset: asset.into(),
            failure: FailureKind::FallbackExhausted,
            timestamp: Utc::now(),
            url: None,
            attempts,
        }
    }
}

/// Receives emitted records. Implementations must not block.
pub trait TelemetrySink: Send + Sync {
    fn record(&self, record: &TelemetryRecord);
}

/// Reference sink that logs each record as one JSON line.
#[derive(Debug, Default)]
pub struct LoggingTelemetrySink;

impl TelemetrySink for LoggingTelemetrySink {
    fn record(&self, record: &TelemetryRecord) {
        match serde_json::to_string(record) {
            Ok(json) => tracing::warn!(target: "readykit::telemetry", "{}", json),
            Err(e) => tracing::warn!(
                target: "readykit::telemetry",
                asset = %record.asset,
                "failed to serialize telemetry record: {}",
                e
            ),
        }
    }
}
