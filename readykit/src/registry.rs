// Dependency registry
// Declares named capabilities and exclusively owns their state machine.
// Coordination (when to check, fallback, notification) lives in the
// coordinator; the registry only validates and records transitions.

use indexmap::IndexMap;
use std::collections::HashMap;
use std::sync::RwLock;

use crate::capability::{Capability, CapabilityState};
use crate::error::ReadinessError;

struct CapabilityEntry {
    capability: Capability,
    state: CapabilityState,
}

#[derive(Default)]
pub struct DependencyRegistry {
    entries: RwLock<IndexMap<String, CapabilityEntry>>,
    /// Reverse prerequisite index: prerequisite name -> dependent names.
    dependents: RwLock<HashMap<String, Vec<String>>>,
}

impl DependencyRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a capability.
    ///
    /// Every prerequisite must already be declared, which keeps the
    /// dependent index complete and makes prerequisite cycles
    /// unrepresentable. Declare leaves first.
    pub fn declare(&self, capability: Capability) -> Result<(), ReadinessError> {
        let mut entries = self.entries.write().expect("registry poisoned");
        if entries.contains_key(&capability.name) {
            return Err(ReadinessError::DuplicateName(capability.name));
        }
        for prerequisite in &capability.prerequisites {
            if !entries.contains_key(prerequisite) {
                return Err(ReadinessError::UnknownCapability(prerequisite.clone()));
            }
        }

        let mut dependents = self.dependents.write().expect("registry poisoned");
        for prerequisite in &capability.prerequisites {
            dependents
                .entry(prerequisite.clone())
                .or_default()
                .push(capability.name.clone());
        }

        tracing::debug!(capability = %capability.name, "capability declared");
        entries.insert(
            capability.name.clone(),
            CapabilityEntry {
                capability,
                state: CapabilityState::Pending,
            },
        );
        Ok(())
    }

    pub fn state(&self, name: &str) -> Result<CapabilityState, ReadinessError> {
        self.entries
            .read()
            .expect("registry poisoned")
            .get(name)
            .map(|entry| entry.state)
            .ok_or_else(|| ReadinessError::UnknownCapability(name.to_string()))
    }

    /// Clone of the declared capability (the predicate is shared via `Arc`).
    pub fn capability(&self, name: &str) -> Result<Capability, ReadinessError> {
        self.entries
            .read()
            .expect("registry poisoned")
            .get(name)
            .map(|entry| entry.capability.clone())
            .ok_or_else(|| ReadinessError::UnknownCapability(name.to_string()))
    }

    /// Apply a transition after validating it against the state machine.
    /// Invalid transitions are errors for the caller to log and ignore.
    pub fn transition(&self, name: &str, to: CapabilityState) -> Result<(), ReadinessError> {
        let mut entries = self.entries.write().expect("registry poisoned");
        let entry = entries
            .get_mut(name)
            .ok_or_else(|| ReadinessError::UnknownCapability(name.to_string()))?;
        if !entry.state.can_transition(to) {
            return Err(ReadinessError::InvalidTransition {
                name: name.to_string(),
                from: entry.state,
                to,
            });
        }
        tracing::debug!(capability = %name, from = %entry.state, to = %to, "state transition");
        entry.state = to;
        Ok(())
    }

    /// Declared names sorted by priority; ties keep declaration order.
    pub fn names_by_priority(&self) -> Vec<String> {
        let entries = self.entries.read().expect("registry poisoned");
        let mut names: Vec<(i32, String)> = entries
            .iter()
            .map(|(name, entry)| (entry.capability.priority, name.clone()))
            .collect();
        names.sort_by_key(|(priority, _)| *priority);
        names.into_iter().map(|(_, name)| name).collect()
    }

    pub fn dependents_of(&self, name: &str) -> Vec<String> {
        self.dependents
            .read()
            .expect("registry poisoned")
            .get(name)
            .cloned()
            .unwrap_or_default()
    }

    /// Whether every prerequisite of `name` is `Ready`.
    pub fn prerequisites_ready(&self, name: &str) -> Result<bool, ReadinessError> {
        let entries = self.entries.read().expect("registry poisoned");
        let entry = entries
            .get(name)
            .ok_or_else(|| ReadinessError::UnknownCapability(name.to_string()))?;
        Ok(entry
            .capability
            .prerequisites
            .iter()
            .all(|p| matches!(entries.get(p), Some(e) if e.state == CapabilityState::Ready)))
    }

    pub fn failed_names(&self) -> Vec<String> {
        self.entries
            .read()
            .expect("registry poisoned")
            .iter()
            .filter(|(_, entry)| entry.state == CapabilityState::Failed)
            .map(|(name, _)| name.clone())
            .collect()
    }

    /// Whether every declared capability is `Ready` or `Failed`.
    pub fn all_resolved(&self) -> bool {
        self.entries
            .read()
            .expect("registry poisoned")
            .values()
            .all(|entry| entry.state.is_resolved())
    }

    /// Declaration-ordered snapshot of every capability's state.
    pub fn snapshot(&self) -> IndexMap<String, CapabilityState> {
        self.entries
            .read()
            .expect("registry poisoned")
            .iter()
            .map(|(name, entry)| (name.clone(), entry.state))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().expect("registry poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn declare_rejects_duplicates() {
        let registry = DependencyRegistry::new();
        registry
            .declare(Capability::new("ui-kit", || true))
            .expect("first declare");
        let err = registry
            .declare(Capability::new("ui-kit", || false))
            .unwrap_err();
        assert_eq!(err, ReadinessError::DuplicateName("ui-kit".to_string()));
    }

    #[test]
    fn declare_rejects_unknown_prerequisite() {
        let registry = DependencyRegistry::new();
        let err = registry
            .declare(Capability::new("charts", || true).with_prerequisite("ui-kit"))
            .unwrap_err();
        assert_eq!(err, ReadinessError::UnknownCapability("ui-kit".to_string()));
    }

    #[test]
    fn unknown_lookups_error() {
        let registry = DependencyRegistry::new();
        assert_eq!(
            registry.state("missing").unwrap_err(),
            ReadinessError::UnknownCapability("missing".to_string())
        );
        assert!(registry.capability("missing").is_err());
        assert!(registry
            .transition("missing", CapabilityState::Checking)
            .is_err());
    }

    #[test]
    fn transition_validates_edges() {
        let registry = DependencyRegistry::new();
        registry
            .declare(Capability::new("ui-kit", || true))
            .expect("declare");

        // Pending -> Ready skips Checking and must be rejected without
        // mutating the state.
        let err = registry
            .transition("ui-kit", CapabilityState::Ready)
            .unwrap_err();
        assert!(matches!(err, ReadinessError::InvalidTransition { .. }));
        assert_eq!(registry.state("ui-kit").unwrap(), CapabilityState::Pending);

        registry
            .transition("ui-kit", CapabilityState::Checking)
            .expect("pending -> checking");
        registry
            .transition("ui-kit", CapabilityState::Ready)
            .expect("checking -> ready");
        assert_eq!(registry.state("ui-kit").unwrap(), CapabilityState::Ready);
    }

    #[test]
    fn priority_order_is_stable() {
        let registry = DependencyRegistry::new();
        registry
            .declare(Capability::new("b", || true).with_priority(10))
            .unwrap();
        registry
            .declare(Capability::new("a", || true).with_priority(0))
            .unwrap();
        registry
            .declare(Capability::new("c", || true).with_priority(10))
            .unwrap();

        // "b" and "c" share a priority; declaration order breaks the tie.
        assert_eq!(registry.names_by_priority(), vec!["a", "b", "c"]);
    }

    #[test]
    fn dependents_index_tracks_prerequisites() {
        let registry = DependencyRegistry::new();
        registry.declare(Capability::new("ui-kit", || true)).unwrap();
        registry
            .declare(Capability::new("charts", || true).with_prerequisite("ui-kit"))
            .unwrap();
        registry
            .declare(Capability::new("tables", || true).with_prerequisite("ui-kit"))
            .unwrap();

        assert_eq!(registry.dependents_of("ui-kit"), vec!["charts", "tables"]);
        assert!(registry.dependents_of("charts").is_empty());
    }

    #[test]
    fn prerequisites_ready_reflects_state() {
        let registry = DependencyRegistry::new();
        registry.declare(Capability::new("ui-kit", || true)).unwrap();
        registry
            .declare(Capability::new("charts", || true).with_prerequisite("ui-kit"))
            .unwrap();

        assert!(!registry.prerequisites_ready("charts").unwrap());
        registry
            .transition("ui-kit", CapabilityState::Checking)
            .unwrap();
        registry
            .transition("ui-kit", CapabilityState::Ready)
            .unwrap();
        assert!(registry.prerequisites_ready("charts").unwrap());
        // A capability with no prerequisites is trivially ready to check.
        assert!(registry.prerequisites_ready("ui-kit").unwrap());
    }

    #[test]
    fn snapshot_and_resolution_queries() {
        let registry = DependencyRegistry::new();
        registry.declare(Capability::new("a", || true)).unwrap();
        registry.declare(Capability::new("b", || true)).unwrap();
        assert!(!registry.all_resolved());

        registry.transition("a", CapabilityState::Checking).unwrap();
        registry.transition("a", CapabilityState::Ready).unwrap();
        registry.transition("b", CapabilityState::Checking).unwrap();
        registry.transition("b", CapabilityState::Failed).unwrap();

        assert!(registry.all_resolved());
        assert_eq!(registry.failed_names(), vec!["b"]);
        let snapshot = registry.snapshot();
        assert_eq!(snapshot.get("a"), Some(&CapabilityState::Ready));
        assert_eq!(snapshot.get("b"), Some(&CapabilityState::Failed));
    }
}
