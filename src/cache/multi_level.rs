use super::distributed::{DisabledTier, DistributedTier};
use super::memory::FastTier;
use super::types::{CacheConfig, CacheError, CacheStats};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

const MIN_SWEEP_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Default)]
struct Counters {
    hits: AtomicU64,
    misses: AtomicU64,
    promotions: AtomicU64,
    distributed_errors: AtomicU64,
}

/// Two-tier cache: an in-process map in front of an optional distributed
/// store. Distributed-tier failures are logged and never reach the caller.
pub struct MultiLevelCache<V> {
    fast: Arc<FastTier<V>>,
    distributed: Arc<dyn DistributedTier>,
    default_ttl: Duration,
    counters: Counters,
    shutdown: watch::Sender<bool>,
    sweeper: Mutex<Option<JoinHandle<()>>>,
}

impl<V> MultiLevelCache<V>
where
    V: Clone + Serialize + DeserializeOwned + Send + Sync + 'static,
{
    /// Fast tier only. Spawns the sweep task, so a tokio runtime must be
    /// running.
    pub fn new(config: &CacheConfig) -> Self {
        Self::with_distributed(config, Arc::new(DisabledTier))
    }

    pub fn with_distributed(config: &CacheConfig, distributed: Arc<dyn DistributedTier>) -> Self {
        let fast = Arc::new(FastTier::new());
        let (shutdown, shutdown_rx) = watch::channel(false);
        let interval = config.sweep_interval().max(MIN_SWEEP_INTERVAL);
        let sweeper = tokio::spawn(sweep_loop(Arc::clone(&fast), interval, shutdown_rx));

        debug!(
            "Cache started with distributed tier '{}', sweep every {:?}",
            distributed.name(),
            interval
        );

        Self {
            fast,
            distributed,
            default_ttl: config.default_ttl(),
            counters: Counters::default(),
            shutdown,
            sweeper: Mutex::new(Some(sweeper)),
        }
    }

    pub fn default_ttl(&self) -> Duration {
        self.default_ttl
    }

    pub async fn get(&self, key: &str) -> Option<V> {
        if let Some(value) = self.fast.get(key).await {
            self.counters.hits.fetch_add(1, Ordering::Relaxed);
            return Some(value);
        }

        match self.distributed.get(key).await {
            Ok(Some(entry)) => match serde_json::from_str::<V>(&entry.raw) {
                Ok(value) => {
                    self.promote(key, value.clone(), entry.remaining).await;
                    self.counters.hits.fetch_add(1, Ordering::Relaxed);
                    return Some(value);
                }
                Err(err) => {
                    warn!("Discarding undecodable distributed entry '{}': {}", key, err);
                }
            },
            Ok(None) => {}
            Err(err) => {
                self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                warn!("Distributed cache read for '{}' failed: {}", key, err);
            }
        }

        self.counters.misses.fetch_add(1, Ordering::Relaxed);
        None
    }

    /// The promoted copy never outlives the distributed entry
    async fn promote(&self, key: &str, value: V, remaining: Option<Duration>) {
        let ttl = remaining.map_or(self.default_ttl, |left| left.min(self.default_ttl));
        if ttl.is_zero() {
            return;
        }
        match self.fast.insert(key, value, ttl).await {
            Ok(()) => {
                self.counters.promotions.fetch_add(1, Ordering::Relaxed);
                debug!("Promoted '{}' into the fast tier", key);
            }
            Err(err) => warn!("Could not promote '{}': {}", key, err),
        }
    }

    /// Write to the fast tier, then best effort to the distributed tier.
    /// `ttl` falls back to the configured default.
    pub async fn set(&self, key: &str, value: V, ttl: Option<Duration>) -> Result<(), CacheError> {
        let ttl = ttl.unwrap_or(self.default_ttl);
        let encoded = serde_json::to_string(&value);
        self.fast.insert(key, value, ttl).await?;

        match encoded {
            Ok(raw) => {
                if let Err(err) = self.distributed.set(key, raw, ttl).await {
                    self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
                    warn!("Distributed cache write for '{}' failed: {}", key, err);
                }
            }
            Err(err) => warn!("Skipping distributed write for '{}': {}", key, err),
        }
        Ok(())
    }

    pub async fn delete(&self, key: &str) {
        self.fast.remove(key).await;
        if let Err(err) = self.distributed.delete(key).await {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Distributed cache delete for '{}' failed: {}", key, err);
        }
    }

    pub async fn clear(&self) {
        self.fast.clear().await;
        if let Err(err) = self.distributed.clear().await {
            self.counters.distributed_errors.fetch_add(1, Ordering::Relaxed);
            warn!("Distributed cache clear failed: {}", err);
        }
    }

    /// Run one expiry sweep now, outside the background schedule
    pub async fn sweep_expired(&self) -> usize {
        self.fast.sweep().await
    }

    pub fn fast_tier(&self) -> &FastTier<V> {
        &self.fast
    }

    pub async fn stats(&self) -> CacheStats {
        let hits = self.counters.hits.load(Ordering::Relaxed);
        let misses = self.counters.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        CacheStats {
            hits,
            misses,
            hit_rate: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            promotions: self.counters.promotions.load(Ordering::Relaxed),
            distributed_errors: self.counters.distributed_errors.load(Ordering::Relaxed),
            items: self.fast.len().await,
            distributed_tier: self.distributed.name().to_string(),
        }
    }

    /// Stop the background sweep. Entries stay readable.
    pub async fn close(&self) {
        let _ = self.shutdown.send(true);
        let handle = self.sweeper.lock().ok().and_then(|mut guard| guard.take());
        if let Some(handle) = handle
            && let Err(err) = handle.await
        {
            warn!("Cache sweep task ended abnormally: {}", err);
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.shutdown.borrow()
    }
}

impl<V> Drop for MultiLevelCache<V> {
    fn drop(&mut self) {
        if let Ok(mut guard) = self.sweeper.lock()
            && let Some(handle) = guard.take()
        {
            handle.abort();
        }
    }
}

async fn sweep_loop<V: Clone>(
    fast: Arc<FastTier<V>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval(interval);
    // The first tick completes immediately
    ticker.tick().await;

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                let removed = fast.sweep().await;
                if removed > 0 {
                    debug!("Cache sweep removed {} expired entries", removed);
                }
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cache sweep stopped");
                    break;
                }
            }
        }
    }
}
