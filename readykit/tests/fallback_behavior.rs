use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use pretty_assertions::assert_eq;

use readykit::{
    AssetKind, Capability, DependencyCoordinator, EngineConfig, EngineEvent, FailureKind,
    FallbackCandidate, FallbackEntry, LoadRequest, SourceLoader, TelemetryRecord, TelemetrySink,
    WaitOutcome,
};

/// Loader that records every request it sees.
struct RecordingLoader {
    outcomes: Mutex<HashMap<String, bool>>,
    requests: Mutex<Vec<LoadRequest>>,
}

impl RecordingLoader {
    fn new<I>(outcomes: I) -> Arc<Self>
    where
        I: IntoIterator<Item = (&'static str, bool)>,
    {
        Arc::new(Self {
            outcomes: Mutex::new(
                outcomes
                    .into_iter()
                    .map(|(url, ok)| (url.to_string(), ok))
                    .collect(),
            ),
            requests: Mutex::new(Vec::new()),
        })
    }

    fn script(&self, url: &str, outcome: bool) {
        self.outcomes
            .lock()
            .expect("outcomes poisoned")
            .insert(url.to_string(), outcome);
    }

    fn requests(&self) -> Vec<LoadRequest> {
        self.requests.lock().expect("requests poisoned").clone()
    }
}

#[async_trait]
impl SourceLoader for RecordingLoader {
    async fn load(&self, request: &LoadRequest) -> bool {
        self.requests
            .lock()
            .expect("requests poisoned")
            .push(request.clone());
        self.outcomes
            .lock()
            .expect("outcomes poisoned")
            .get(&request.url)
            .copied()
            .unwrap_or(false)
    }
}

/// Sink that keeps every emitted record for inspection.
#[derive(Default)]
struct CapturingSink {
    records: Mutex<Vec<TelemetryRecord>>,
}

impl CapturingSink {
    fn records(&self) -> Vec<TelemetryRecord> {
        self.records.lock().expect("records poisoned").clone()
    }
}

impl TelemetrySink for CapturingSink {
    fn record(&self, record: &TelemetryRecord) {
        self.records
            .lock()
            .expect("records poisoned")
            .push(record.clone());
    }
}

fn fast_config() -> EngineConfig {
    EngineConfig::default()
        .with_check_interval_ms(50)
        .with_candidate_timeout_ms(200)
}

#[tokio::test]
async fn exhaustion_emits_telemetry_events_and_failure_notifications() {
    let loader = RecordingLoader::new([("cdn-a", false), ("cdn-b", false)]);
    let sink = Arc::new(CapturingSink::default());
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader.clone());
    coordinator.register_telemetry_sink(sink.clone());
    coordinator.add_fallback("charts.js", vec!["cdn-a", "cdn-b"]);
    coordinator
        .declare(Capability::new("charts", || false).with_fallback("charts.js"))
        .unwrap();

    let mut events = coordinator.subscribe();
    let delivered = Arc::new(Mutex::new(None));
    let slot = Arc::clone(&delivered);
    coordinator
        .wait_for(
            "charts",
            move |outcome| {
                *slot.lock().expect("slot poisoned") = Some(outcome);
            },
            None,
        )
        .unwrap();

    coordinator.start().await;

    assert!(coordinator.has_failed("charts"));
    assert_eq!(
        *delivered.lock().expect("slot poisoned"),
        Some(WaitOutcome::Failed)
    );

    // Two per-candidate load failures, then the exhaustion record.
    let records = sink.records();
    assert_eq!(records.len(), 3);
    assert_eq!(records[0].failure, FailureKind::LoadFailure);
    assert_eq!(records[0].url.as_deref(), Some("cdn-a"));
    assert_eq!(records[1].failure, FailureKind::LoadFailure);
    assert_eq!(records[1].url.as_deref(), Some("cdn-b"));
    assert_eq!(records[2].failure, FailureKind::FallbackExhausted);
    assert_eq!(records[2].asset, "charts.js");
    assert_eq!(records[2].attempts.len(), 2);

    assert_eq!(
        events.recv().await.unwrap(),
        EngineEvent::FallbackExhausted {
            key: "charts.js".to_string(),
            attempts: 2,
        }
    );
    assert_eq!(
        events.recv().await.unwrap(),
        EngineEvent::CapabilityFailed {
            name: "charts".to_string(),
        }
    );
    coordinator.shutdown();
}

#[tokio::test]
async fn unknown_fallback_key_fails_like_no_fallback_at_all() {
    let loader = RecordingLoader::new([]);
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader.clone());
    coordinator
        .declare(Capability::new("charts", || false).with_fallback("never-registered"))
        .unwrap();
    coordinator.start().await;

    assert!(coordinator.has_failed("charts"));
    assert!(loader.requests().is_empty());
    coordinator.shutdown();
}

#[tokio::test]
async fn fallback_registered_at_runtime_is_visible_to_the_next_attempt() {
    let loader = RecordingLoader::new([]);
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader.clone());
    coordinator
        .declare(Capability::new("charts", || false).with_fallback("charts.js"))
        .unwrap();
    coordinator.start().await;
    assert!(coordinator.has_failed("charts"));

    // The catalog gains an entry without any coordinator restart.
    loader.script("https://cdn-late.example.com/charts.js", true);
    coordinator.add_fallback("charts.js", vec!["https://cdn-late.example.com/charts.js"]);
    coordinator.recheck("charts").await.unwrap();

    assert!(coordinator.is_ready("charts"));
    assert_eq!(loader.requests().len(), 1);
    coordinator.shutdown();
}

#[tokio::test]
async fn load_requests_carry_asset_kind_and_integrity() {
    let loader = RecordingLoader::new([("https://cdn-a.example.com/ui.css", true)]);
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader.clone());
    coordinator.add_fallback_entry(
        "ui.css",
        FallbackEntry {
            candidates: vec![FallbackCandidate::new("https://cdn-a.example.com/ui.css")
                .with_integrity("sha256-AAAA")],
        },
    );
    coordinator
        .declare(
            Capability::new("ui-theme", || false)
                .with_fallback("ui.css")
                .with_fallback_kind(AssetKind::Stylesheet),
        )
        .unwrap();
    coordinator.start().await;

    assert!(coordinator.is_ready("ui-theme"));
    let requests = loader.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].asset, "ui.css");
    assert_eq!(requests[0].kind, AssetKind::Stylesheet);
    assert_eq!(requests[0].integrity.as_deref(), Some("sha256-AAAA"));
    coordinator.shutdown();
}

#[tokio::test]
async fn empty_fallback_entry_exhausts_without_load_attempts() {
    let loader = RecordingLoader::new([]);
    let sink = Arc::new(CapturingSink::default());
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader.clone());
    coordinator.register_telemetry_sink(sink.clone());
    coordinator.add_fallback("charts.js", Vec::<String>::new());
    coordinator
        .declare(Capability::new("charts", || false).with_fallback("charts.js"))
        .unwrap();
    coordinator.start().await;

    assert!(coordinator.has_failed("charts"));
    assert!(loader.requests().is_empty());

    let records = sink.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].failure, FailureKind::FallbackExhausted);
    assert!(records[0].attempts.is_empty());
    coordinator.shutdown();
}

#[tokio::test]
async fn fallback_success_resolves_waiters_with_ready() {
    let loader = RecordingLoader::new([("cdn-b", true)]);
    let coordinator = DependencyCoordinator::with_config(fast_config(), loader);
    coordinator.add_fallback("lib.js", vec!["cdn-a", "cdn-b"]);
    coordinator
        .declare(Capability::new("Lib", || false).with_fallback("lib.js"))
        .unwrap();

    let waiter = {
        let coordinator = coordinator.clone();
        tokio::spawn(async move { coordinator.wait_until_resolved("Lib", None).await })
    };
    // Let the waiter register before the initial pass resolves anything.
    tokio::task::yield_now().await;

    coordinator.start().await;
    assert_eq!(waiter.await.unwrap().unwrap(), WaitOutcome::Ready);
    coordinator.shutdown();
}
