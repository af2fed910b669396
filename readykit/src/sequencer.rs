//! Ordered multi-source fallback.
//!
//! Walks a fallback key's candidate list through the source loader until one
//! candidate succeeds or the list is exhausted. Candidates are never retried
//! within one sequence, so the worst case is bounded by
//! `candidate_timeout * candidate_count`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::catalog::FallbackCatalog;
use crate::error::ReadinessError;
use crate::loader::{AssetKind, LoadRequest, SourceLoader};

/// Record of one loader call within a sequence. Owned by the sequencer for
/// the duration of the sequence and handed off only for logging/telemetry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attempt {
    pub url: String,
    pub started_at: DateTime<Utc>,
    pub outcome: AttemptOutcome,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttemptOutcome {
    Success,
    Failure,
    Timeout,
}

/// Result of walking one fallback key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// A candidate loaded; `attempts` covers every candidate tried,
    /// including the successful one.
    Success { url: String, attempts: Vec<Attempt> },
    /// Every candidate failed or timed out (or the entry was empty).
    Exhausted { attempts: Vec<Attempt> },
}

pub struct FallbackSequencer {
    catalog: Arc<FallbackCatalog>,
    loader: Arc<dyn SourceLoader>,
    candidate_timeout: Duration,
}

impl FallbackSequencer {
    pub fn new(
        catalog: Arc<FallbackCatalog>,
        loader: Arc<dyn SourceLoader>,
        candidate_timeout: Duration,
    ) -> Self {
        Self {
            catalog,
            loader,
            candidate_timeout,
        }
    }

    /// Walk the candidates for `key` in order.
    ///
    /// Fails fast with `NoFallbackAvailable` when the key was never
    /// registered; an empty entry exhausts immediately.
    pub async fn attempt(
        &self,
        key: &str,
        kind: AssetKind,
    ) -> Result<SequenceOutcome, ReadinessError> {
        let entry = self
            .catalog
            .lookup(key)
            .ok_or_else(|| ReadinessError::NoFallbackAvailable(key.to_string()))?;

        let mut attempts = Vec::with_capacity(entry.candidates.len());
        for candidate in entry.candidates {
            let request = LoadRequest {
                asset: key.to_string(),
                url: candidate.url.clone(),
                kind,
                integrity: candidate.integrity.clone(),
            };
            let started_at = Utc::now();
            let outcome = match tokio::time::timeout(
                self.candidate_timeout,
                self.loader.load(&request),
            )
            .await
            {
                Ok(true) => AttemptOutcome::Success,
                Ok(false) => AttemptOutcome::Failure,
                Err(_) => AttemptOutcome::Timeout,
            };
            tracing::debug!(
                key = %key,
                url = %candidate.url,
                outcome = ?outcome,
                "fallback candidate attempted"
            );
            attempts.push(Attempt {
                url: candidate.url.clone(),
                started_at,
                outcome,
            });

            if outcome == AttemptOutcome::Success {
                return Ok(SequenceOutcome::Success {
                    url: candidate.url,
                    attempts,
                });
            }
        }

        tracing::warn!(key = %key, candidates = attempts.len(), "fallback exhausted");
        Ok(SequenceOutcome::Exhausted { attempts })
    }
}
