use super::*;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

/// Shared-map stand-in for a remote tier
#[derive(Default)]
struct SharedMapTier {
    entries: Mutex<HashMap<String, String>>,
    writes: AtomicUsize,
}

#[async_trait]
impl DistributedTier for SharedMapTier {
    fn name(&self) -> &str {
        "shared-map"
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
        Ok(self.entries.lock().await.get(key).map(|raw| TierEntry {
            raw: raw.clone(),
            remaining: None,
        }))
    }

    async fn set(&self, key: &str, value: String, _ttl: Duration) -> Result<(), CacheError> {
        self.writes.fetch_add(1, Ordering::SeqCst);
        self.entries.lock().await.insert(key.to_string(), value);
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

/// Tier whose backend is permanently unreachable
struct UnreachableTier;

#[async_trait]
impl DistributedTier for UnreachableTier {
    fn name(&self) -> &str {
        "unreachable"
    }

    async fn get(&self, _key: &str) -> Result<Option<TierEntry>, CacheError> {
        Err(CacheError::Distributed("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Err(CacheError::Distributed("connection refused".into()))
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Err(CacheError::Distributed("connection refused".into()))
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Err(CacheError::Distributed("connection refused".into()))
    }
}

/// Remote tier that expires entries like Redis `PSETEX` and reports `PTTL`
#[derive(Default)]
struct ExpiringTier {
    entries: Mutex<HashMap<String, (String, Instant)>>,
}

#[async_trait]
impl DistributedTier for ExpiringTier {
    fn name(&self) -> &str {
        "expiring"
    }

    async fn get(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
        let now = Instant::now();
        Ok(self
            .entries
            .lock()
            .await
            .get(key)
            .filter(|(_, deadline)| *deadline > now)
            .map(|(raw, deadline)| TierEntry {
                raw: raw.clone(),
                remaining: Some(*deadline - now),
            }))
    }

    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
        self.entries
            .lock()
            .await
            .insert(key.to_string(), (value, Instant::now() + ttl));
        Ok(())
    }

    async fn delete(&self, key: &str) -> Result<(), CacheError> {
        self.entries.lock().await.remove(key);
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        self.entries.lock().await.clear();
        Ok(())
    }
}

fn config() -> CacheConfig {
    CacheConfig {
        default_ttl_secs: 60,
        sweep_interval_secs: 3600,
        ..CacheConfig::default()
    }
}

#[tokio::test]
async fn test_entry_expires_after_ttl() {
    let cache: MultiLevelCache<String> = MultiLevelCache::new(&config());
    cache
        .set("k", "v".to_string(), Some(Duration::from_millis(100)))
        .await
        .unwrap();

    assert_eq!(cache.get("k").await, Some("v".to_string()));

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get("k").await, None);

    let stats = cache.stats().await;
    assert_eq!(stats.hits, 1);
    assert_eq!(stats.misses, 1);
    assert!((stats.hit_rate - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn test_zero_ttl_rejected() {
    let cache: MultiLevelCache<u32> = MultiLevelCache::new(&config());
    let result = cache.set("k", 1, Some(Duration::ZERO)).await;
    assert_eq!(result, Err(CacheError::InvalidTtl));
    assert_eq!(cache.get("k").await, None);
}

#[tokio::test]
async fn test_default_ttl_applies_when_unset() {
    let cache: MultiLevelCache<u32> = MultiLevelCache::new(&config());
    cache.set("k", 7, None).await.unwrap();

    assert_eq!(cache.default_ttl(), Duration::from_secs(60));
    assert_eq!(cache.get("k").await, Some(7));
}

#[tokio::test]
async fn test_access_metadata_tracks_reads() {
    let cache: MultiLevelCache<u32> = MultiLevelCache::new(&config());
    cache.set("k", 1, None).await.unwrap();

    for _ in 0..3 {
        cache.get("k").await;
    }

    let (count, _last_access) = cache.fast_tier().access_info("k").await.unwrap();
    assert_eq!(count, 3);
}

#[tokio::test]
async fn test_background_sweep_removes_expired_entries() {
    let cache: MultiLevelCache<u32> = MultiLevelCache::new(&CacheConfig {
        sweep_interval_secs: 0,
        ..config()
    });
    cache.set("short", 1, Some(Duration::from_millis(20))).await.unwrap();
    cache.set("long", 2, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;

    assert_eq!(cache.fast_tier().len().await, 1);
    assert_eq!(cache.get("long").await, Some(2));
    cache.close().await;
    assert!(cache.is_closed());
}

#[tokio::test]
async fn test_manual_sweep() {
    let cache: MultiLevelCache<u32> = MultiLevelCache::new(&config());
    cache.set("a", 1, Some(Duration::from_millis(10))).await.unwrap();
    cache.set("b", 2, None).await.unwrap();

    tokio::time::sleep(Duration::from_millis(30)).await;

    assert_eq!(cache.sweep_expired().await, 1);
    assert_eq!(cache.stats().await.items, 1);
}

#[tokio::test]
async fn test_distributed_hit_is_promoted() {
    let remote = Arc::new(SharedMapTier::default());
    let writer: MultiLevelCache<String> = MultiLevelCache::with_distributed(&config(), remote.clone());
    writer.set("shared", "value".to_string(), None).await.unwrap();
    assert_eq!(remote.writes.load(Ordering::SeqCst), 1);

    // A second process sharing the same remote tier
    let reader: MultiLevelCache<String> = MultiLevelCache::with_distributed(&config(), remote.clone());
    assert_eq!(reader.get("shared").await, Some("value".to_string()));
    assert_eq!(reader.stats().await.promotions, 1);

    // Promoted copy is independent of the remote entry
    remote.clear().await.unwrap();
    assert_eq!(reader.get("shared").await, Some("value".to_string()));
    assert_eq!(reader.stats().await.promotions, 1);
}

#[tokio::test]
async fn test_short_ttl_expires_in_both_tiers() {
    let remote = Arc::new(ExpiringTier::default());
    let cache: MultiLevelCache<String> = MultiLevelCache::with_distributed(&config(), remote.clone());
    cache
        .set("k", "v".to_string(), Some(Duration::from_millis(100)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(cache.get("k").await, None);
    assert_eq!(cache.stats().await.promotions, 0);
}

#[tokio::test]
async fn test_promoted_copy_keeps_remaining_lifetime() {
    let remote = Arc::new(ExpiringTier::default());
    let writer: MultiLevelCache<String> = MultiLevelCache::with_distributed(&config(), remote.clone());
    writer
        .set("k", "v".to_string(), Some(Duration::from_millis(200)))
        .await
        .unwrap();

    let reader: MultiLevelCache<String> = MultiLevelCache::with_distributed(&config(), remote.clone());
    assert_eq!(reader.get("k").await, Some("v".to_string()));
    assert_eq!(reader.stats().await.promotions, 1);

    // The promoted copy expires with the remote entry, not after the default TTL
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(reader.get("k").await, None);
}

#[cfg(feature = "redis-tier")]
#[test]
fn test_redis_clear_pattern_stays_inside_prefix() {
    assert_eq!(RedisTier::scan_pattern("modelprobe:"), "modelprobe:*");
    assert_eq!(RedisTier::scan_pattern("team[a]*:"), "team\\[a\\]\\*:*");
    assert_eq!(RedisTier::scan_pattern("q?\\"), "q\\?\\\\*");
}

#[tokio::test]
async fn test_unreachable_distributed_tier_degrades_silently() {
    let cache: MultiLevelCache<u32> =
        MultiLevelCache::with_distributed(&config(), Arc::new(UnreachableTier));

    cache.set("k", 5, None).await.unwrap();
    assert_eq!(cache.get("k").await, Some(5));
    assert_eq!(cache.get("missing").await, None);
    cache.delete("k").await;
    assert_eq!(cache.get("k").await, None);

    let stats = cache.stats().await;
    assert!(stats.distributed_errors >= 3);
    assert_eq!(stats.distributed_tier, "unreachable");
}

#[tokio::test]
async fn test_clear_empties_both_tiers() {
    let remote = Arc::new(SharedMapTier::default());
    let cache: MultiLevelCache<u32> = MultiLevelCache::with_distributed(&config(), remote.clone());
    cache.set("a", 1, None).await.unwrap();
    cache.set("b", 2, None).await.unwrap();

    cache.clear().await;

    assert!(cache.fast_tier().is_empty().await);
    assert!(remote.entries.lock().await.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_readers_and_writers() {
    let cache: Arc<MultiLevelCache<u64>> = Arc::new(MultiLevelCache::new(&config()));
    let mut handles = Vec::new();

    for i in 0..32u64 {
        let cache = Arc::clone(&cache);
        handles.push(tokio::spawn(async move {
            let key = format!("key-{}", i % 4);
            cache.set(&key, i, None).await.unwrap();
            assert!(cache.get(&key).await.is_some());
        }));
    }
    for handle in handles {
        handle.await.unwrap();
    }

    assert_eq!(cache.stats().await.items, 4);
}
