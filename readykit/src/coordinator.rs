//! Coordination: drives every declared capability through its state machine.
//!
//! Responsibilities:
//! - Initial checks in priority order, prerequisite gating, fallback
//!   sequencing, and resolution notifications.
//! - Deferred re-checks of dependents when a prerequisite becomes ready
//!   (task spawn, never re-entrant in the same call stack).
//! - Periodic re-check of `Failed` capabilities on a fixed interval; the
//!   task handle is owned here and the loop stops once the registry has
//!   settled for the configured number of consecutive intervals.
//! - The wait/notify surface for external consumers.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use indexmap::IndexMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;

use crate::capability::{Capability, CapabilityState};
use crate::catalog::{FallbackCatalog, FallbackEntry};
use crate::config::{EngineConfig, ReadinessConfig};
use crate::error::ReadinessError;
use crate::events::{EngineEvent, EventBus};
use crate::loader::SourceLoader;
use crate::registry::DependencyRegistry;
use crate::sequencer::{Attempt, AttemptOutcome, FallbackSequencer, SequenceOutcome};
use crate::telemetry::{TelemetryRecord, TelemetrySink};

/// Delivered to a wait registration when its capability resolves or the
/// registration times out. A timeout affects only that waiter, never the
/// capability itself.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Ready,
    Failed,
    TimedOut,
}

impl WaitOutcome {
    pub fn is_ready(self) -> bool {
        self == WaitOutcome::Ready
    }
}

type WaitCallback = Box<dyn FnOnce(WaitOutcome) + Send>;

struct WaitRegistration {
    id: u64,
    callback: WaitCallback,
    timeout_task: Option<JoinHandle<()>>,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum CheckMode {
    /// Initial pass or a deferred dependent re-check; prerequisite gating
    /// applies.
    Scheduled,
    /// Periodic re-check of a `Failed` capability; predicate only, no new
    /// fallback sequence.
    Periodic,
    /// Explicit `recheck`/`force_recheck`; full protocol.
    Manual,
}

impl CheckMode {
    fn gates_on_prerequisites(self) -> bool {
        self == CheckMode::Scheduled
    }

    fn allows_fallback(self) -> bool {
        self != CheckMode::Periodic
    }
}

/// The engine facade. Cheap to clone; clones share one registry, catalog,
/// and event surface. Constructed explicitly and passed by reference to
/// consumers, so independent instances never share hidden state.
#[derive(Clone)]
pub struct DependencyCoordinator {
    inner: Arc<CoordinatorInner>,
}

struct CoordinatorInner {
    registry: DependencyRegistry,
    catalog: Arc<FallbackCatalog>,
    sequencer: FallbackSequencer,
    config: EngineConfig,
    events: EventBus,
    waiters: Mutex<HashMap<String, Vec<WaitRegistration>>>,
    telemetry: RwLock<Vec<Arc<dyn TelemetrySink>>>,
    recheck_task: Mutex<Option<JoinHandle<()>>>,
    next_waiter_id: AtomicU64,
    started: AtomicBool,
}

impl DependencyCoordinator {
    pub fn new(loader: Arc<dyn SourceLoader>) -> Self {
        Self::with_config(EngineConfig::default(), loader)
    }

    pub fn with_config(config: EngineConfig, loader: Arc<dyn SourceLoader>) -> Self {
        let catalog = Arc::new(FallbackCatalog::new());
        let sequencer =
            FallbackSequencer::new(Arc::clone(&catalog), loader, config.candidate_timeout());
        let events = EventBus::new(config.event_capacity);
        Self {
            inner: Arc::new(CoordinatorInner {
                registry: DependencyRegistry::new(),
                catalog,
                sequencer,
                config,
                events,
                waiters: Mutex::new(HashMap::new()),
                telemetry: RwLock::new(Vec::new()),
                recheck_task: Mutex::new(None),
                next_waiter_id: AtomicU64::new(0),
                started: AtomicBool::new(false),
            }),
        }
    }

    /// Build from a configuration document, seeding the catalog with its
    /// fallback entries.
    pub fn from_config(config: ReadinessConfig, loader: Arc<dyn SourceLoader>) -> Self {
        let coordinator = Self::with_config(config.engine, loader);
        for (key, entry) in config.fallbacks {
            coordinator.inner.catalog.add_entry(key, entry);
        }
        coordinator
    }

    /// Declare a capability. After `start`, newly declared capabilities are
    /// checked as they arrive.
    pub fn declare(&self, capability: Capability) -> Result<(), ReadinessError> {
        let name = capability.name.clone();
        self.inner.registry.declare(capability)?;
        if self.inner.started.load(Ordering::SeqCst) {
            let inner = Arc::clone(&self.inner);
            tokio::spawn(async move {
                inner.run_check(name, CheckMode::Scheduled).await;
            });
        }
        Ok(())
    }

    /// Register candidate URLs for a fallback key; visible to the next
    /// sequence without restarting the coordinator.
    pub fn add_fallback<I, S>(&self, key: impl Into<String>, urls: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inner.catalog.add_fallback(key, urls);
    }

    pub fn add_fallback_entry(&self, key: impl Into<String>, entry: FallbackEntry) {
        self.inner.catalog.add_entry(key, entry);
    }

    pub fn register_telemetry_sink(&self, sink: Arc<dyn TelemetrySink>) {
        self.inner
            .telemetry
            .write()
            .expect("telemetry sinks poisoned")
            .push(sink);
    }

    /// Subscribe to capability and fallback events.
    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.inner.events.subscribe()
    }

    /// Run the initial checks in priority order, then start the periodic
    /// re-check task if anything is left unresolved or failed.
    pub async fn start(&self) {
        self.inner.started.store(true, Ordering::SeqCst);
        for name in self.inner.registry.names_by_priority() {
            Arc::clone(&self.inner)
                .run_check(name, CheckMode::Scheduled)
                .await;
        }
        Arc::clone(&self.inner).ensure_recheck_task();
    }

    pub fn is_ready(&self, name: &str) -> bool {
        matches!(self.inner.registry.state(name), Ok(CapabilityState::Ready))
    }

    pub fn has_failed(&self, name: &str) -> bool {
        matches!(self.inner.registry.state(name), Ok(CapabilityState::Failed))
    }

    pub fn status(&self, name: &str) -> Result<CapabilityState, ReadinessError> {
        self.inner.registry.state(name)
    }

    /// Declaration-ordered snapshot of every capability's state.
    pub fn all_statuses(&self) -> IndexMap<String, CapabilityState> {
        self.inner.registry.snapshot()
    }

    /// Request notification when `name` resolves.
    ///
    /// Already-resolved capabilities invoke the callback synchronously with
    /// no loader activity. An unknown name fails synchronously. With a
    /// timeout, an unresolved capability delivers `TimedOut` to this waiter
    /// only; the capability's own state is untouched.
    pub fn wait_for<F>(
        &self,
        name: &str,
        callback: F,
        timeout: Option<Duration>,
    ) -> Result<(), ReadinessError>
    where
        F: FnOnce(WaitOutcome) + Send + 'static,
    {
        let mut waiters = self.inner.waiters.lock().expect("waiters poisoned");
        // Read under the waiters lock: resolution drains waiters after
        // setting the state, so an unresolved state seen here means our
        // registration will be drained too.
        let state = self.inner.registry.state(name)?;
        if state.is_resolved() {
            drop(waiters);
            callback(if state == CapabilityState::Ready {
                WaitOutcome::Ready
            } else {
                WaitOutcome::Failed
            });
            return Ok(());
        }

        let id = self.inner.next_waiter_id.fetch_add(1, Ordering::Relaxed);
        let timeout_task = timeout.map(|after| {
            let inner = Arc::clone(&self.inner);
            let name = name.to_string();
            tokio::spawn(async move {
                tokio::time::sleep(after).await;
                inner.expire_waiter(&name, id);
            })
        });
        waiters
            .entry(name.to_string())
            .or_default()
            .push(WaitRegistration {
                id,
                callback: Box::new(callback),
                timeout_task,
            });
        Ok(())
    }

    /// Async convenience wrapper over `wait_for`.
    pub async fn wait_until_resolved(
        &self,
        name: &str,
        timeout: Option<Duration>,
    ) -> Result<WaitOutcome, ReadinessError> {
        let (tx, rx) = tokio::sync::oneshot::channel();
        self.wait_for(
            name,
            move |outcome| {
                let _ = tx.send(outcome);
            },
            timeout,
        )?;
        rx.await
            .map_err(|_| ReadinessError::WaitTimeout(name.to_string()))
    }

    /// Manually re-check a `Failed` capability, including its fallback.
    pub async fn recheck(&self, name: &str) -> Result<(), ReadinessError> {
        let state = self.inner.registry.state(name)?;
        if state != CapabilityState::Failed {
            return Err(ReadinessError::InvalidTransition {
                name: name.to_string(),
                from: state,
                to: CapabilityState::Checking,
            });
        }
        Arc::clone(&self.inner)
            .run_check(name.to_string(), CheckMode::Manual)
            .await;
        Arc::clone(&self.inner).ensure_recheck_task();
        Ok(())
    }

    /// Forced re-validation of a `Ready` capability. Never happens
    /// automatically.
    pub async fn force_recheck(&self, name: &str) -> Result<(), ReadinessError> {
        let state = self.inner.registry.state(name)?;
        if state != CapabilityState::Ready {
            return Err(ReadinessError::InvalidTransition {
                name: name.to_string(),
                from: state,
                to: CapabilityState::Checking,
            });
        }
        Arc::clone(&self.inner)
            .run_check(name.to_string(), CheckMode::Manual)
            .await;
        Arc::clone(&self.inner).ensure_recheck_task();
        Ok(())
    }

    /// Stop the periodic re-check task. Declared state is kept; `recheck`
    /// remains available.
    pub fn shutdown(&self) {
        let mut guard = self
            .inner
            .recheck_task
            .lock()
            .expect("recheck task poisoned");
        if let Some(handle) = guard.take() {
            handle.abort();
            tracing::debug!("periodic re-check task stopped");
        }
    }
}

impl CoordinatorInner {
    /// Steps 1-5 of the per-capability protocol.
    async fn run_check(self: Arc<Self>, name: String, mode: CheckMode) {
        let capability = match self.registry.capability(&name) {
            Ok(capability) => capability,
            Err(e) => {
                tracing::warn!(capability = %name, "check dropped: {}", e);
                return;
            }
        };

        // Step 1: prerequisite gating.
        if mode.gates_on_prerequisites() && !capability.prerequisites.is_empty() {
            match self.registry.prerequisites_ready(&name) {
                Ok(true) => {}
                Ok(false) => {
                    if let Err(e) = self
                        .registry
                        .transition(&name, CapabilityState::WaitingOnPrerequisites)
                    {
                        tracing::debug!(capability = %name, "already waiting: {}", e);
                    }
                    return;
                }
                Err(e) => {
                    tracing::warn!(capability = %name, "prerequisite check failed: {}", e);
                    return;
                }
            }
        }

        // Step 2: enter Checking. A concurrent check or an already-resolved
        // state makes this transition invalid; log and stand down.
        if let Err(e) = self.registry.transition(&name, CapabilityState::Checking) {
            tracing::debug!(capability = %name, "check skipped: {}", e);
            return;
        }

        if evaluate_predicate(&capability) {
            self.resolve(&name, CapabilityState::Ready);
            return;
        }

        // Steps 4-5: fallback, or straight to Failed.
        let fallback_key = if mode.allows_fallback() {
            capability.fallback_key.clone()
        } else {
            None
        };
        let Some(key) = fallback_key else {
            self.resolve(&name, CapabilityState::Failed);
            return;
        };

        let outcome = self.sequencer.attempt(&key, capability.fallback_kind).await;
        match outcome {
            Ok(SequenceOutcome::Success { url, attempts }) => {
                self.emit_attempt_failures(&key, &attempts);
                self.events.publish(EngineEvent::FallbackSucceeded {
                    key: key.clone(),
                    url,
                });
                self.resolve(&name, CapabilityState::Ready);
            }
            Ok(SequenceOutcome::Exhausted { attempts }) => {
                self.emit_attempt_failures(&key, &attempts);
                self.events.publish(EngineEvent::FallbackExhausted {
                    key: key.clone(),
                    attempts: attempts.len(),
                });
                self.emit_telemetry(TelemetryRecord::fallback_exhausted(&key, attempts));
                self.resolve(&name, CapabilityState::Failed);
            }
            Err(e) => {
                // Unknown fallback key is treated like having no fallback.
                tracing::warn!(capability = %name, "fallback unavailable: {}", e);
                self.resolve(&name, CapabilityState::Failed);
            }
        }
    }

    /// Final transition plus notification fan-out. No awaits: observers see
    /// either the pre-resolution state or the final one, never a
    /// mid-notification intermediate.
    fn resolve(self: Arc<Self>, name: &str, state: CapabilityState) {
        if let Err(e) = self.registry.transition(name, state) {
            tracing::warn!(capability = %name, "resolution dropped: {}", e);
            return;
        }
        tracing::info!(capability = %name, state = %state, "capability resolved");

        let registrations = self
            .waiters
            .lock()
            .expect("waiters poisoned")
            .remove(name)
            .unwrap_or_default();
        let outcome = if state == CapabilityState::Ready {
            WaitOutcome::Ready
        } else {
            WaitOutcome::Failed
        };
        // Registration order, with per-waiter timeout timers cancelled first.
        for registration in registrations {
            if let Some(handle) = registration.timeout_task {
                handle.abort();
            }
            (registration.callback)(outcome);
        }

        if state == CapabilityState::Ready {
            self.events.publish(EngineEvent::CapabilityReady {
                name: name.to_string(),
            });
            // Dependents re-enter the protocol on the event loop, never
            // recursively in this call stack.
            for dependent in self.registry.dependents_of(name) {
                let waiting = matches!(
                    self.registry.state(&dependent),
                    Ok(CapabilityState::WaitingOnPrerequisites)
                );
                if waiting && self.registry.prerequisites_ready(&dependent).unwrap_or(false) {
                    let inner = Arc::clone(&self);
                    tokio::spawn(async move {
                        inner.run_check(dependent, CheckMode::Scheduled).await;
                    });
                }
            }
        } else {
            self.events.publish(EngineEvent::CapabilityFailed {
                name: name.to_string(),
            });
            self.ensure_recheck_task();
        }
    }

    fn emit_attempt_failures(&self, key: &str, attempts: &[Attempt]) {
        for attempt in attempts {
            if attempt.outcome != AttemptOutcome::Success {
                self.emit_telemetry(TelemetryRecord::load_failure(key, &attempt.url));
            }
        }
    }

    fn emit_telemetry(&self, record: TelemetryRecord) {
        let sinks = self
            .telemetry
            .read()
            .expect("telemetry sinks poisoned")
            .clone();
        for sink in sinks {
            sink.record(&record);
        }
    }

    fn expire_waiter(&self, name: &str, id: u64) {
        let registration = {
            let mut waiters = self.waiters.lock().expect("waiters poisoned");
            waiters.get_mut(name).and_then(|list| {
                list.iter()
                    .position(|registration| registration.id == id)
                    .map(|index| list.remove(index))
            })
        };
        if let Some(registration) = registration {
            tracing::debug!(capability = %name, "wait registration timed out");
            (registration.callback)(WaitOutcome::TimedOut);
        }
    }

    /// Start the periodic re-check task unless one is already running or
    /// there is nothing left to re-check. The stored handle is the single
    /// source of truth for whether the loop is alive.
    fn ensure_recheck_task(self: Arc<Self>) {
        let mut guard = self.recheck_task.lock().expect("recheck task poisoned");
        if let Some(handle) = guard.as_ref() {
            if !handle.is_finished() {
                return;
            }
        }
        if self.registry.all_resolved() && self.registry.failed_names().is_empty() {
            return;
        }
        let inner = Arc::clone(&self);
        *guard = Some(tokio::spawn(async move {
            inner.recheck_loop().await;
        }));
    }

    /// Fixed-interval re-check of `Failed` capabilities. Stops once every
    /// capability is resolved and nothing has changed for the configured
    /// number of consecutive intervals.
    async fn recheck_loop(self: Arc<Self>) {
        tracing::debug!(
            interval_ms = self.config.check_interval_ms,
            "periodic re-check started"
        );
        let mut ticker = tokio::time::interval(self.config.check_interval());
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The first tick of a fresh interval completes immediately.
        ticker.tick().await;

        let mut previous = self.registry.snapshot();
        let mut settled_ticks = 0u32;
        loop {
            ticker.tick().await;
            for name in self.registry.failed_names() {
                Arc::clone(&self)
                    .run_check(name, CheckMode::Periodic)
                    .await;
            }

            let current = self.registry.snapshot();
            if self.registry.all_resolved() && current == previous {
                settled_ticks += 1;
            } else {
                settled_ticks = 0;
            }
            previous = current;

            if settled_ticks >= self.config.settle_intervals.max(1) {
                tracing::debug!("registry settled; periodic re-check stopped");
                return;
            }
        }
    }
}

impl Drop for CoordinatorInner {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.recheck_task.lock() {
            if let Some(handle) = guard.take() {
                handle.abort();
            }
        }
    }
}

/// Predicate evaluation never crashes the coordinator: a panicking predicate
/// counts as unsatisfied.
fn evaluate_predicate(capability: &Capability) -> bool {
    let predicate = Arc::clone(&capability.predicate);
    match catch_unwind(AssertUnwindSafe(move || predicate())) {
        Ok(satisfied) => satisfied,
        Err(_) => {
            tracing::warn!(
                capability = %capability.name,
                "readiness predicate panicked; treating as unsatisfied"
            );
            false
        }
    }
}
