//! Capability model and the per-capability state machine.
//!
//! A capability is a named, checkable requirement on the host environment
//! (e.g. "the charting library is loaded"). The engine is agnostic to what a
//! predicate inspects; callers inject a closure per capability.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

use crate::loader::AssetKind;

/// Readiness predicate: a side-effect-free probe of the host environment.
pub type Predicate = Arc<dyn Fn() -> bool + Send + Sync>;

/// Lifecycle state of a declared capability.
///
/// A capability never re-enters `Pending` once it leaves it; `Ready` and
/// `Failed` are the only states observable by external consumers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CapabilityState {
    Pending,
    Checking,
    WaitingOnPrerequisites,
    Ready,
    Failed,
}

impl CapabilityState {
    /// Whether waiting consumers are notified from this state.
    pub fn is_resolved(self) -> bool {
        matches!(self, CapabilityState::Ready | CapabilityState::Failed)
    }

    /// Validate one edge of the state machine.
    ///
    /// `Failed -> Checking` is the re-check edge (manual or periodic) and
    /// `Ready -> Checking` is reserved for explicit forced re-validation;
    /// neither is ever taken automatically on a resolved registry.
    pub fn can_transition(self, to: CapabilityState) -> bool {
        use CapabilityState::*;
        matches!(
            (self, to),
            (Pending, Checking)
                | (Pending, WaitingOnPrerequisites)
                | (WaitingOnPrerequisites, Checking)
                | (Checking, Ready)
                | (Checking, Failed)
                | (Failed, Checking)
                | (Ready, Checking)
        )
    }
}

impl fmt::Display for CapabilityState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            CapabilityState::Pending => "pending",
            CapabilityState::Checking => "checking",
            CapabilityState::WaitingOnPrerequisites => "waiting_on_prerequisites",
            CapabilityState::Ready => "ready",
            CapabilityState::Failed => "failed",
        };
        write!(f, "{}", label)
    }
}

/// A named, checkable requirement with optional prerequisites and fallback.
#[derive(Clone)]
pub struct Capability {
    /// Unique identifier within one registry.
    pub name: String,
    /// Returns whether the capability is currently satisfied in the host.
    pub predicate: Predicate,
    /// Capability names that must be `Ready` before this one is checked.
    pub prerequisites: Vec<String>,
    /// Optional key into the fallback catalog.
    pub fallback_key: Option<String>,
    /// Asset kind handed to the loader when the fallback runs.
    pub fallback_kind: AssetKind,
    /// Lower runs first when no prerequisite relation orders two capabilities.
    pub priority: i32,
}

impl Capability {
    pub fn new(
        name: impl Into<String>,
        predicate: impl Fn() -> bool + Send + Sync + 'static,
    ) -> Self {
        Self {
            name: name.into(),
            predicate: Arc::new(predicate),
            prerequisites: Vec::new(),
            fallback_key: None,
            fallback_kind: AssetKind::Script,
            priority: 0,
        }
    }

    pub fn with_prerequisite(mut self, name: impl Into<String>) -> Self {
        self.prerequisites.push(name.into());
        self
    }

    pub fn with_prerequisites<I, T>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        self.prerequisites
            .extend(names.into_iter().map(|n| n.into()));
        self
    }

    pub fn with_fallback(mut self, key: impl Into<String>) -> Self {
        self.fallback_key = Some(key.into());
        self
    }

    pub fn with_fallback_kind(mut self, kind: AssetKind) -> Self {
        self.fallback_kind = kind;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl fmt::Debug for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Capability")
            .field("name", &self.name)
            .field("prerequisites", &self.prerequisites)
            .field("fallback_key", &self.fallback_key)
            .field("fallback_kind", &self.fallback_kind)
            .field("priority", &self.priority)
            .finish()
    }
}
