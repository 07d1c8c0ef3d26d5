use super::*;
use crate::adapter::{AdapterRegistry, OpenAIAdapter};
use crate::cache::{CacheConfig, MultiLevelCache};
use crate::events::{Event, EventBus, EventHandler, EventType, Severity};
use crate::probe::{
    Credential, FeatureKind, Model, ModelFeatures, ProbeClient, ProbeKind, ProbeSettings, Provider,
};
use crate::scoring::{CapabilityCategory, ScoreCalculator};
use async_trait::async_trait;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::mpsc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

struct EventRecorder {
    seen: mpsc::UnboundedSender<Event>,
}

#[async_trait]
impl EventHandler for EventRecorder {
    fn name(&self) -> &str {
        "recorder"
    }

    async fn handle(&self, event: &Event) -> anyhow::Result<()> {
        self.seen.send(event.clone())?;
        Ok(())
    }
}

struct Harness {
    orchestrator: Arc<VerificationOrchestrator>,
    store: Arc<InMemoryStore>,
    events: mpsc::UnboundedReceiver<Event>,
}

fn harness() -> Harness {
    let registry = AdapterRegistry::new();
    registry.register(Arc::new(OpenAIAdapter::named("synthetic")));
    let client = ProbeClient::new(registry, ProbeSettings::default()).unwrap();

    let store = Arc::new(InMemoryStore::new());
    let bus = EventBus::new();
    let (tx, events) = mpsc::unbounded_channel();
    bus.subscribe(
        Arc::new(EventRecorder { seen: tx }),
        vec![
            EventType::VerificationCompleted,
            EventType::VerificationFailed,
            EventType::ScoreChanged,
        ],
    );

    let cache = Arc::new(MultiLevelCache::new(&CacheConfig::default()));
    let orchestrator = VerificationOrchestrator::new(
        client,
        ScoreCalculator::new(),
        cache,
        store.clone(),
        bus,
    );

    Harness {
        orchestrator: Arc::new(orchestrator),
        store,
        events,
    }
}

/// Chat-only model: existence, responsiveness and compression probes
fn plain_model() -> Model {
    Model::new("m1", "synthetic").with_features(ModelFeatures {
        streaming: false,
        function_calling: false,
        vision: false,
        embeddings: false,
    })
}

fn provider(server: &MockServer) -> Provider {
    Provider::new("synthetic", &server.uri(), Credential::new("k")).unwrap()
}

async fn mount_chat(server: &MockServer) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "choices": [{"message": {"role": "assistant", "content": "pong"}}]
        })))
        .mount(server)
        .await;
}

async fn next_event(events: &mut mpsc::UnboundedReceiver<Event>) -> Event {
    tokio::time::timeout(Duration::from_secs(2), events.recv())
        .await
        .expect("event published")
        .expect("bus alive")
}

#[tokio::test]
async fn test_probe_plan_follows_declared_features() {
    let h = harness();

    assert_eq!(
        h.orchestrator.probe_plan(&plain_model()),
        vec![
            ProbeKind::Existence,
            ProbeKind::Responsiveness,
            ProbeKind::Compression
        ]
    );

    let vision_only = Model::new("v", "synthetic").with_features(ModelFeatures {
        streaming: true,
        function_calling: false,
        vision: true,
        embeddings: false,
    });
    let plan = h.orchestrator.probe_plan(&vision_only);
    assert!(plan.contains(&ProbeKind::Streaming));
    assert!(plan.contains(&ProbeKind::Feature(FeatureKind::Vision)));
    assert!(!plan.contains(&ProbeKind::Feature(FeatureKind::Embeddings)));
    assert_eq!(plan.len(), 5);
}

#[tokio::test]
async fn test_verify_scores_and_records() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({"id": "m1"})))
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let mut h = harness();
    let result = h.orchestrator.verify(&provider(&server), &plain_model()).await;

    assert_eq!(result.provider, "synthetic");
    assert_eq!(result.model, "m1");
    assert_eq!(result.probes.len(), 3);
    assert!(result.probe(ProbeKind::Existence).unwrap().passed);
    assert!(result.probe(ProbeKind::Responsiveness).unwrap().passed);
    assert!(!result.probe(ProbeKind::Compression).unwrap().passed);
    // existence 20 + responsiveness 25 + latency up to 15
    assert!((45..=60).contains(&result.score), "score {}", result.score);
    assert_eq!(result.category, CapabilityCategory::from_score(result.score));

    assert_eq!(h.store.len().await, 1);
    let event = next_event(&mut h.events).await;
    assert_eq!(event.event_type, EventType::VerificationCompleted);
    assert_eq!(event.payload["score"], json!(result.score));
    assert_eq!(
        h.orchestrator.state("synthetic", "m1"),
        VerificationState::Idle
    );
}

#[tokio::test]
async fn test_cached_result_skips_network() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(1)
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let h = harness();
    let first = h.orchestrator.verify(&provider(&server), &plain_model()).await;
    let second = h.orchestrator.verify(&provider(&server), &plain_model()).await;

    assert_eq!(first.id, second.id);
    assert_eq!(h.store.len().await, 1);
}

#[tokio::test]
async fn test_reverify_always_probes() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200))
        .expect(2)
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let h = harness();
    let first = h.orchestrator.verify(&provider(&server), &plain_model()).await;
    let refreshed = h.orchestrator.reverify(&provider(&server), &plain_model()).await;

    assert_ne!(first.id, refreshed.id);
    let cached = h.orchestrator.verify(&provider(&server), &plain_model()).await;
    assert_eq!(cached.id, refreshed.id);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_callers_share_one_verification() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(100)))
        .expect(1)
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let h = harness();
    let target = provider(&server);
    let mut handles = Vec::new();
    for _ in 0..8 {
        let orchestrator = Arc::clone(&h.orchestrator);
        let target = target.clone();
        handles.push(tokio::spawn(async move {
            orchestrator.verify(&target, &plain_model()).await.id
        }));
    }

    let mut ids = Vec::new();
    for handle in handles {
        ids.push(handle.await.unwrap());
    }
    ids.dedup();
    assert_eq!(ids.len(), 1);
    assert_eq!(h.store.len().await, 1);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
}

#[tokio::test]
async fn test_finished_keys_leave_no_lock_behind() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .respond_with(ResponseTemplate::new(200))
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let h = harness();
    let target = provider(&server);
    for id in ["a", "b", "c"] {
        let model = Model::new(id, "synthetic").with_features(plain_model().features);
        h.orchestrator.reverify(&target, &model).await;
    }

    assert_eq!(h.store.len().await, 3);
    assert_eq!(h.orchestrator.in_flight_count(), 0);
    assert_eq!(h.orchestrator.provider_capacity("SYNTHETIC"), Some(20));
}

#[tokio::test]
async fn test_state_is_observable_while_probing() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200).set_delay(Duration::from_millis(400)))
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let h = harness();
    assert_eq!(h.orchestrator.state("synthetic", "m1"), VerificationState::Idle);

    let orchestrator = Arc::clone(&h.orchestrator);
    let target = provider(&server);
    let running = tokio::spawn(async move { orchestrator.verify(&target, &plain_model()).await });

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(
        h.orchestrator.state("SYNTHETIC", "m1"),
        VerificationState::Probing
    );

    running.await.unwrap();
    assert_eq!(h.orchestrator.state("synthetic", "m1"), VerificationState::Idle);
}

#[tokio::test]
async fn test_unknown_provider_fails_every_probe() {
    let mut h = harness();
    let unknown = Provider::new("nowhere", "http://127.0.0.1:1", Credential::default()).unwrap();

    let result = h.orchestrator.verify(&unknown, &plain_model()).await;

    assert_eq!(result.score, 0);
    assert_eq!(result.category, CapabilityCategory::ChatOnly);
    assert_eq!(result.probes.len(), 3);
    assert!(result.all_failed());
    assert!(
        result
            .probes
            .iter()
            .all(|p| matches!(p.error, Some(crate::adapter::ProviderError::NotFound { .. })))
    );
    assert!(h.orchestrator.cache().get(&VerificationOrchestrator::cache_key("nowhere", "m1")).await.is_none());

    let event = next_event(&mut h.events).await;
    assert_eq!(event.event_type, EventType::VerificationFailed);
    assert_eq!(event.severity, Severity::Error);
}

#[tokio::test]
async fn test_score_change_is_published() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(200))
        .up_to_n_times(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/models/m1"))
        .respond_with(ResponseTemplate::new(404))
        .mount(&server)
        .await;
    mount_chat(&server).await;

    let mut h = harness();
    let first = h.orchestrator.verify(&provider(&server), &plain_model()).await;
    assert_eq!(next_event(&mut h.events).await.event_type, EventType::VerificationCompleted);

    let second = h.orchestrator.reverify(&provider(&server), &plain_model()).await;
    assert!(second.score < first.score);

    let mut changed = None;
    for _ in 0..2 {
        let event = next_event(&mut h.events).await;
        if event.event_type == EventType::ScoreChanged {
            changed = Some(event);
        }
    }
    let changed = changed.expect("score change event");
    assert_eq!(changed.severity, Severity::Warning);
    assert_eq!(changed.payload["previous_score"], json!(first.score));
    assert_eq!(changed.payload["score"], json!(second.score));
}

#[tokio::test]
async fn test_verify_many_and_history() {
    let server = MockServer::start().await;
    for model in ["a", "b", "c"] {
        Mock::given(method("GET"))
            .and(path(format!("/models/{model}")))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;
    }
    mount_chat(&server).await;

    let h = harness();
    let targets: Vec<(Provider, Model)> = ["a", "b", "c"]
        .into_iter()
        .map(|id| {
            (
                provider(&server),
                Model::new(id, "synthetic").with_features(plain_model().features),
            )
        })
        .collect();

    let results = h.orchestrator.verify_many(&targets).await;
    assert_eq!(results.len(), 3);
    assert!(results.iter().all(|r| r.probe(ProbeKind::Existence).unwrap().passed));

    let everything = h
        .orchestrator
        .history(&ResultFilter::default(), 10, 0)
        .await
        .unwrap();
    assert_eq!(everything.len(), 3);
    assert!(everything.windows(2).all(|w| w[0].verified_at >= w[1].verified_at));

    let page = h
        .orchestrator
        .history(&ResultFilter::default(), 2, 2)
        .await
        .unwrap();
    assert_eq!(page.len(), 1);

    let only_b = h
        .orchestrator
        .history(&ResultFilter::for_model("SYNTHETIC", "b"), 10, 0)
        .await
        .unwrap();
    assert_eq!(only_b.len(), 1);
    assert_eq!(only_b[0].model, "b");
}

fn stored_result(model: &str, score: u8) -> VerificationResult {
    let calculator = ScoreCalculator::new();
    let mut result = VerificationResult::new("synthetic", model, Vec::new(), calculator.score(&[]));
    result.score = score;
    result
}

#[tokio::test]
async fn test_file_store_round_trip_and_filters() {
    let dir = TempDir::new().unwrap();
    let store = FileStore::open(dir.path().join("results")).await.unwrap();

    store.save(&stored_result("a", 90)).await.unwrap();
    store.save(&stored_result("b", 30)).await.unwrap();
    std::fs::write(store.directory().join("broken.json"), "{not json").unwrap();

    let all = store.list(&ResultFilter::default(), 10, 0).await.unwrap();
    assert_eq!(all.len(), 2);

    let strong = store
        .list(
            &ResultFilter {
                min_score: Some(50),
                ..ResultFilter::default()
            },
            10,
            0,
        )
        .await
        .unwrap();
    assert_eq!(strong.len(), 1);
    assert_eq!(strong[0].model, "a");

    // Reopening sees the same history
    let reopened = FileStore::open(dir.path().join("results")).await.unwrap();
    assert_eq!(reopened.list(&ResultFilter::default(), 10, 0).await.unwrap().len(), 2);
}

#[tokio::test]
async fn test_in_memory_store_orders_newest_first() {
    let store = InMemoryStore::new();
    let older = stored_result("m", 10);
    tokio::time::sleep(Duration::from_millis(5)).await;
    let newer = stored_result("m", 20);

    store.save(&older).await.unwrap();
    store.save(&newer).await.unwrap();

    let listed = store.list(&ResultFilter::default(), 1, 0).await.unwrap();
    assert_eq!(listed[0].id, newer.id);
    assert!(store.list(&ResultFilter::default(), 5, 5).await.unwrap().is_empty());
}
