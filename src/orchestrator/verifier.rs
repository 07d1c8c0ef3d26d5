use super::store::{ResultFilter, StoreError, VerificationStore};
use super::types::{VerificationResult, VerificationState};
use crate::adapter::ProviderError;
use crate::cache::MultiLevelCache;
use crate::events::{Event, EventBus, EventType, Severity};
use crate::probe::{Model, ProbeClient, ProbeKind, ProbeLatency, ProbeResult, Provider};
use crate::scoring::ScoreCalculator;
use dashmap::DashMap;
use futures::future::join_all;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::{Mutex, Semaphore};
use tracing::{debug, info, warn};

const EVENT_SOURCE: &str = "verification-orchestrator";

/// Score below which a completed verification is reported as a warning
const WARNING_SCORE: u8 = 40;

/// Concurrency ceiling for one provider, sized from its adapter
struct ProviderPermits {
    size: usize,
    semaphore: Arc<Semaphore>,
}

impl ProviderPermits {
    fn new(size: usize) -> Self {
        Self {
            size,
            semaphore: Arc::new(Semaphore::new(size)),
        }
    }
}

/// Runs the probe set for a (provider, model) pair, scores it and records
/// the outcome in the cache, the store and on the event bus.
///
/// At most one verification per key is in flight. A caller that arrives
/// while one is running waits for it and is then served from the cache.
pub struct VerificationOrchestrator {
    client: ProbeClient,
    calculator: ScoreCalculator,
    cache: Arc<MultiLevelCache<VerificationResult>>,
    store: Arc<dyn VerificationStore>,
    bus: EventBus,
    provider_permits: DashMap<String, ProviderPermits>,
    in_flight: DashMap<String, Arc<Mutex<()>>>,
    states: DashMap<String, VerificationState>,
}

impl VerificationOrchestrator {
    pub fn new(
        client: ProbeClient,
        calculator: ScoreCalculator,
        cache: Arc<MultiLevelCache<VerificationResult>>,
        store: Arc<dyn VerificationStore>,
        bus: EventBus,
    ) -> Self {
        Self {
            client,
            calculator,
            cache,
            store,
            bus,
            provider_permits: DashMap::new(),
            in_flight: DashMap::new(),
            states: DashMap::new(),
        }
    }

    pub fn cache_key(provider: &str, model: &str) -> String {
        format!("verification:{}:{}", provider.to_lowercase(), model)
    }

    pub fn client(&self) -> &ProbeClient {
        &self.client
    }

    pub fn cache(&self) -> &MultiLevelCache<VerificationResult> {
        &self.cache
    }

    pub fn state(&self, provider: &str, model: &str) -> VerificationState {
        self.states
            .get(&Self::cache_key(provider, model))
            .map(|state| *state)
            .unwrap_or_default()
    }

    /// Probes to run for a model: the base set plus every configured
    /// feature probe the model declares
    pub fn probe_plan(&self, model: &Model) -> Vec<ProbeKind> {
        let mut plan = vec![
            ProbeKind::Existence,
            ProbeKind::Responsiveness,
            ProbeKind::Compression,
        ];
        if model.features.streaming {
            plan.push(ProbeKind::Streaming);
        }
        plan.extend(
            self.client
                .settings()
                .features
                .iter()
                .filter(|feature| model.features.declares(**feature))
                .map(|feature| ProbeKind::Feature(*feature)),
        );
        plan
    }

    /// Cached result when still valid, otherwise a fresh verification
    pub async fn verify(&self, provider: &Provider, model: &Model) -> VerificationResult {
        self.run(provider, model, false).await
    }

    /// Always probe and overwrite the cached entry
    pub async fn reverify(&self, provider: &Provider, model: &Model) -> VerificationResult {
        self.run(provider, model, true).await
    }

    pub async fn verify_many(&self, targets: &[(Provider, Model)]) -> Vec<VerificationResult> {
        join_all(
            targets
                .iter()
                .map(|(provider, model)| self.verify(provider, model)),
        )
        .await
    }

    pub async fn history(
        &self,
        filter: &ResultFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VerificationResult>, StoreError> {
        self.store.list(filter, limit, offset).await
    }

    async fn run(&self, provider: &Provider, model: &Model, force: bool) -> VerificationResult {
        let key = Self::cache_key(&provider.name, &model.id);

        if !force && let Some(cached) = self.cache.get(&key).await {
            debug!(provider = %provider.name, model = %model.id, "Serving cached verification");
            return cached;
        }

        let lock = self
            .in_flight
            .entry(key.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        let guard = lock.lock().await;
        let result = self.run_exclusive(&key, provider, model, force).await;
        drop(guard);

        // The map and this call hold the only references when nobody waits
        self.in_flight
            .remove_if(&key, |_, entry| Arc::strong_count(entry) <= 2);
        result
    }

    /// Body of [`Self::run`] while holding the per-key lock
    async fn run_exclusive(
        &self,
        key: &str,
        provider: &Provider,
        model: &Model,
        force: bool,
    ) -> VerificationResult {
        // An earlier caller may have finished while this one waited
        if !force && let Some(cached) = self.cache.get(key).await {
            debug!(provider = %provider.name, model = %model.id, "Verification finished by an earlier caller");
            return cached;
        }

        let result = match self.client.registry().resolve(&provider.name) {
            Ok(adapter) => {
                let permits = self.permits_for(&provider.name, adapter.optimal_batch_size());
                self.probe_and_score(key, provider, model, permits).await
            }
            Err(err) => {
                warn!(provider = %provider.name, model = %model.id, "{}", err);
                self.unresolved(provider, model, &err.to_string())
            }
        };

        self.record(key, &result).await;
        self.states.remove(key);
        result
    }

    /// Semaphore for a provider. A replaced adapter with a different batch
    /// size gets a fresh semaphore; runs holding the old one finish on it.
    fn permits_for(&self, provider: &str, batch_size: usize) -> Arc<Semaphore> {
        let size = batch_size.max(1);
        let mut entry = self
            .provider_permits
            .entry(provider.to_lowercase())
            .or_insert_with(|| ProviderPermits::new(size));
        if entry.size != size {
            debug!(provider, from = entry.size, to = size, "Resizing provider concurrency");
            *entry = ProviderPermits::new(size);
        }
        Arc::clone(&entry.semaphore)
    }

    /// Current concurrency ceiling for a provider, once it has been verified
    pub fn provider_capacity(&self, provider: &str) -> Option<usize> {
        self.provider_permits
            .get(&provider.to_lowercase())
            .map(|permits| permits.size)
    }

    /// Keys with a verification running or waited on
    pub fn in_flight_count(&self) -> usize {
        self.in_flight.len()
    }

    async fn probe_and_score(
        &self,
        key: &str,
        provider: &Provider,
        model: &Model,
        permits: Arc<Semaphore>,
    ) -> VerificationResult {
        let _permit = permits.acquire_owned().await.ok();
        self.states.insert(key.to_string(), VerificationState::Probing);
        self.bus.publish(
            Event::new(
                EventType::VerificationStarted,
                Severity::Info,
                EVENT_SOURCE,
                format!("Verifying {}/{}", provider.name, model.id),
            )
            .with_payload(json!({"provider": provider.name, "model": model.id})),
        );

        let plan = self.probe_plan(model);
        info!(
            provider = %provider.name,
            model = %model.id,
            "Running {} probes",
            plan.len()
        );

        let requests = plan.into_iter().map(|kind| {
            let mut request = self.client.request(provider, &model.id, kind);
            if kind == ProbeKind::Responsiveness {
                request.payload = request.payload.streaming(model.features.streaming);
            }
            self.client.run(request)
        });
        let probes = join_all(requests).await;

        self.states.insert(key.to_string(), VerificationState::Scoring);
        let score = self.calculator.score(&probes);
        self.states.insert(key.to_string(), VerificationState::Done);

        VerificationResult::new(provider.name.clone(), model.id.clone(), probes, score)
    }

    /// Every planned probe failed with `NotFound`; nothing is sent
    fn unresolved(&self, provider: &Provider, model: &Model, reason: &str) -> VerificationResult {
        let probes: Vec<ProbeResult> = self
            .probe_plan(model)
            .into_iter()
            .map(|kind| {
                ProbeResult::failure(
                    kind,
                    None,
                    ProbeLatency::default(),
                    ProviderError::NotFound {
                        message: reason.to_string(),
                    },
                    "",
                )
            })
            .collect();
        let score = self.calculator.score(&probes);
        VerificationResult::new(provider.name.clone(), model.id.clone(), probes, score)
    }

    async fn record(&self, key: &str, result: &VerificationResult) {
        let previous = match self
            .store
            .list(&ResultFilter::for_model(&result.provider, &result.model), 1, 0)
            .await
        {
            Ok(mut latest) => latest.pop(),
            Err(err) => {
                warn!("Could not read previous verification for {}: {}", key, err);
                None
            }
        };

        // Unknown providers are not cached so a later registration applies
        if self.client.registry().contains(&result.provider)
            && let Err(err) = self.cache.set(key, result.clone(), None).await
        {
            warn!("Could not cache verification {}: {}", result.id, err);
        }

        if let Err(err) = self.store.save(result).await {
            warn!("Could not store verification {}: {}", result.id, err);
        }

        info!(
            provider = %result.provider,
            model = %result.model,
            score = result.score,
            "Verification finished: {} ({}/{} probes passed)",
            result.category,
            result.passed_count(),
            result.probes.len()
        );

        self.bus.publish(completion_event(result));
        if let Some(previous) = previous
            && previous.score != result.score
        {
            self.bus.publish(score_changed_event(&previous, result));
        }
    }
}

fn result_payload(result: &VerificationResult) -> serde_json::Value {
    json!({
        "result_id": result.id,
        "provider": result.provider,
        "model": result.model,
        "score": result.score,
        "category": result.category.label(),
        "passed": result.passed_count(),
        "attempted": result.probes.len(),
    })
}

fn completion_event(result: &VerificationResult) -> Event {
    let (event_type, severity, message) = if result.all_failed() {
        (
            EventType::VerificationFailed,
            Severity::Error,
            format!("{}/{} failed every probe", result.provider, result.model),
        )
    } else {
        let severity = if result.score < WARNING_SCORE {
            Severity::Warning
        } else {
            Severity::Info
        };
        (
            EventType::VerificationCompleted,
            severity,
            format!(
                "{}/{} scored {} ({})",
                result.provider, result.model, result.score, result.category
            ),
        )
    };

    Event::new(event_type, severity, EVENT_SOURCE, message).with_payload(result_payload(result))
}

fn score_changed_event(previous: &VerificationResult, current: &VerificationResult) -> Event {
    let severity = if current.score < previous.score {
        Severity::Warning
    } else {
        Severity::Info
    };
    let mut payload = result_payload(current);
    payload["previous_score"] = json!(previous.score);
    payload["previous_category"] = json!(previous.category.label());

    Event::new(
        EventType::ScoreChanged,
        severity,
        EVENT_SOURCE,
        format!(
            "{}/{} score changed from {} to {}",
            current.provider, current.model, previous.score, current.score
        ),
    )
    .with_payload(payload)
}
