//! # Verification Engine
//!
//! Owns every long-lived component and wires them together from an
//! [`EngineConfig`]. Nothing here is global: build one engine, use it, and
//! call [`VerificationEngine::shutdown`] when done.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                     VerificationEngine                       │
//! │  ┌──────────────┐  ┌──────────────┐  ┌──────────────────────┐│
//! │  │   Adapter    │  │ Verification │  │  Multi-Level Cache   ││
//! │  │   Registry   │◀─│ Orchestrator │─▶│  fast ▸ distributed  ││
//! │  └──────────────┘  └──────┬───────┘  └──────────────────────┘│
//! │         ▲                 │ events          ┌──────────────┐ │
//! │  ┌──────┴───────┐  ┌──────▼───────┐         │    Store     │ │
//! │  │ Probe Client │  │  Event Bus   │────────▶│ Notification │ │
//! │  └──────────────┘  └──────────────┘         │  Dispatcher  │ │
//! │                                             └──────────────┘ │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use modelprobe::{EngineConfig, VerificationEngine};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let engine = VerificationEngine::new(EngineConfig::default()).await?;
//!
//!     let result = engine.verify("openai", "gpt-4o-mini", false).await?;
//!     println!("{} scored {} ({})", result.model, result.score, result.category);
//!
//!     engine.shutdown().await;
//!     Ok(())
//! }
//! ```

use crate::adapter::{AdapterRegistry, ProviderAdapter, ProviderError, adapter_for_family};
use crate::cache::{CacheConfig, CacheStats, MultiLevelCache};
use crate::cli::{ConfigError, EngineConfig};
use crate::events::{EventBus, EventType};
use crate::notify::{NotificationDispatcher, NotifyError};
use crate::orchestrator::{
    FileStore, InMemoryStore, ResultFilter, StoreError, VerificationOrchestrator,
    VerificationResult, VerificationStore,
};
use crate::probe::{Model, ProbeClient};
use crate::scoring::ScoreCalculator;
use futures::future::join_all;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// How long shutdown waits for event handlers before stopping the dispatcher
const EVENT_FLUSH_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    #[error(transparent)]
    Config(#[from] ConfigError),
    #[error(transparent)]
    Provider(#[from] ProviderError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Notify(#[from] NotifyError),
}

pub struct VerificationEngine {
    config: EngineConfig,
    registry: AdapterRegistry,
    orchestrator: Arc<VerificationOrchestrator>,
    cache: Arc<MultiLevelCache<VerificationResult>>,
    bus: EventBus,
    dispatcher: Option<Arc<NotificationDispatcher>>,
}

impl VerificationEngine {
    pub async fn new(config: EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;

        let registry = AdapterRegistry::with_builtin();
        for entry in &config.providers {
            registry.register(adapter_for_family(entry.family()?, &entry.name));
        }

        let client = ProbeClient::new(registry.clone(), config.probe.clone())?;
        let calculator = ScoreCalculator::new()
            .with_weights(config.scoring.clone())
            .map_err(ConfigError::Invalid)?;
        let cache = Arc::new(build_cache(&config.cache).await);

        let store: Arc<dyn VerificationStore> = match &config.store.directory {
            Some(directory) => Arc::new(FileStore::open(directory).await?),
            None => Arc::new(InMemoryStore::new()),
        };

        let bus = EventBus::new();
        let dispatcher = if config.notifications.configured_channels().is_empty() {
            None
        } else {
            let dispatcher =
                Arc::new(NotificationDispatcher::from_settings(config.notifications.clone())?);
            bus.subscribe(
                dispatcher.clone(),
                vec![
                    EventType::VerificationCompleted,
                    EventType::VerificationFailed,
                    EventType::ScoreChanged,
                ],
            );
            Some(dispatcher)
        };

        let orchestrator = Arc::new(VerificationOrchestrator::new(
            client,
            calculator,
            Arc::clone(&cache),
            store,
            bus.clone(),
        ));

        info!(
            "Verification engine ready: {} adapters, notifications {}",
            registry.len(),
            if dispatcher.is_some() { "on" } else { "off" }
        );

        Ok(Self {
            config,
            registry,
            orchestrator,
            cache,
            bus,
            dispatcher,
        })
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn registry(&self) -> &AdapterRegistry {
        &self.registry
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn orchestrator(&self) -> &Arc<VerificationOrchestrator> {
        &self.orchestrator
    }

    pub fn dispatcher(&self) -> Option<&Arc<NotificationDispatcher>> {
        self.dispatcher.as_ref()
    }

    /// Add or replace an adapter at runtime
    pub fn register_adapter(
        &self,
        adapter: Arc<dyn ProviderAdapter>,
    ) -> Option<Arc<dyn ProviderAdapter>> {
        self.registry.register(adapter)
    }

    /// Verify a configured provider's model. `force` bypasses the cache.
    pub async fn verify(
        &self,
        provider: &str,
        model: &str,
        force: bool,
    ) -> Result<VerificationResult, EngineError> {
        let entry = self.config.provider(provider)?;
        let provider = entry.to_provider()?;
        let model = entry.model(model);

        Ok(if force {
            self.orchestrator.reverify(&provider, &model).await
        } else {
            self.orchestrator.verify(&provider, &model).await
        })
    }

    /// Verify several models of one provider concurrently
    pub async fn verify_models(
        &self,
        provider: &str,
        models: &[String],
        force: bool,
    ) -> Result<Vec<VerificationResult>, EngineError> {
        let entry = self.config.provider(provider)?;
        let provider = entry.to_provider()?;
        let targets: Vec<_> = models
            .iter()
            .map(|id| (provider.clone(), entry.model(id)))
            .collect();

        if force {
            Ok(join_all(
                targets
                    .iter()
                    .map(|(provider, model)| self.orchestrator.reverify(provider, model)),
            )
            .await)
        } else {
            Ok(self.orchestrator.verify_many(&targets).await)
        }
    }

    pub async fn discover(&self, provider: &str) -> Result<Vec<Model>, EngineError> {
        let provider = self.config.provider(provider)?.to_provider()?;
        Ok(self.orchestrator.client().discover_models(&provider).await?)
    }

    pub async fn history(
        &self,
        filter: &ResultFilter,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<VerificationResult>, EngineError> {
        Ok(self.orchestrator.history(filter, limit, offset).await?)
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Let pending event handlers finish, drain the notification queue and
    /// stop the cache sweep
    pub async fn shutdown(&self) {
        info!("Shutting down verification engine...");
        self.bus.flush(EVENT_FLUSH_GRACE).await;
        self.bus.shutdown();
        if let Some(dispatcher) = &self.dispatcher {
            dispatcher.shutdown().await;
        }
        self.cache.close().await;
        info!("Verification engine shutdown complete");
    }
}

#[cfg(feature = "redis-tier")]
async fn build_cache(config: &CacheConfig) -> MultiLevelCache<VerificationResult> {
    use crate::cache::RedisTier;

    if let Some(url) = &config.redis_url {
        match RedisTier::connect(url, &config.key_prefix).await {
            Ok(tier) => return MultiLevelCache::with_distributed(config, Arc::new(tier)),
            Err(err) => warn!(
                "Distributed cache unavailable, continuing with the fast tier only: {}",
                err
            ),
        }
    }
    MultiLevelCache::new(config)
}

#[cfg(not(feature = "redis-tier"))]
async fn build_cache(config: &CacheConfig) -> MultiLevelCache<VerificationResult> {
    if config.redis_url.is_some() {
        warn!("cache.redis_url is set but this build lacks the redis-tier feature; ignoring it");
    }
    MultiLevelCache::new(config)
}
