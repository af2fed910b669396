use thiserror::Error;

use crate::capability::CapabilityState;

/// Error type for the readiness engine.
///
/// Duplicate names, unknown capabilities, and invalid transitions are
/// configuration or programmer errors: surfaced immediately, never retried.
/// Fallback exhaustion is an expected runtime condition and is represented as
/// the `Failed` state, not as an error. A wait timeout is delivered only to
/// the registration it belongs to and does not affect shared state.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReadinessError {
    #[error("capability '{0}' is already declared")]
    DuplicateName(String),
    #[error("unknown capability '{0}'")]
    UnknownCapability(String),
    #[error("invalid transition for '{name}': {from} -> {to}")]
    InvalidTransition {
        name: String,
        from: CapabilityState,
        to: CapabilityState,
    },
    #[error("no fallback candidates registered for key '{0}'")]
    NoFallbackAvailable(String),
    #[error("wait for '{0}' timed out")]
    WaitTimeout(String),
    #[error("configuration error: {0}")]
    Config(String),
}

impl From<toml::de::Error> for ReadinessError {
    fn from(e: toml::de::Error) -> Self {
        ReadinessError::Config(e.to_string())
    }
}

impl From<std::io::Error> for ReadinessError {
    fn from(e: std::io::Error) -> Self {
        ReadinessError::Config(e.to_string())
    }
}
