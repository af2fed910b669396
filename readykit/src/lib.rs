// readykit
// Dependency readiness and fallback engine: decides whether named
// third-party capabilities are usable in the host environment and, when they
// are not, drives a bounded multi-source fallback sequence. Consumers wait
// on readiness signals or subscribe to events; they never poll internals.

pub mod capability;
pub mod catalog;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod loader;
pub mod registry;
pub mod sequencer;
pub mod telemetry;

pub use capability::{Capability, CapabilityState, Predicate};
pub use catalog::{FallbackCandidate, FallbackCatalog, FallbackEntry};
pub use config::{EngineConfig, ReadinessConfig};
pub use coordinator::{DependencyCoordinator, WaitOutcome};
pub use error::ReadinessError;
pub use events::EngineEvent;
pub use loader::{AssetKind, HttpSourceLoader, InstalledAsset, LoadRequest, SourceLoader};
pub use registry::DependencyRegistry;
pub use sequencer::{Attempt, AttemptOutcome, FallbackSequencer, SequenceOutcome};
pub use telemetry::{FailureKind, LoggingTelemetrySink, TelemetryRecord, TelemetrySink};
