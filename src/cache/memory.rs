use super::types::CacheError;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tokio::sync::RwLock;

/// Entry of the fast tier. Access metadata is atomic so that reads only
/// need the shared lock.
#[derive(Debug)]
pub struct CacheItem<V> {
    pub value: V,
    pub created_at: Instant,
    pub expires_at: Instant,
    access_count: AtomicU64,
    last_access_offset_ms: AtomicU64,
}

impl<V> CacheItem<V> {
    fn new(value: V, ttl: Duration) -> Result<Self, CacheError> {
        if ttl.is_zero() {
            return Err(CacheError::InvalidTtl);
        }
        let created_at = Instant::now();
        let expires_at = created_at.checked_add(ttl).ok_or(CacheError::InvalidTtl)?;
        Ok(Self {
            value,
            created_at,
            expires_at,
            access_count: AtomicU64::new(0),
            last_access_offset_ms: AtomicU64::new(0),
        })
    }

    pub fn is_expired(&self, now: Instant) -> bool {
        now >= self.expires_at
    }

    fn touch(&self, now: Instant) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        let offset = now.saturating_duration_since(self.created_at).as_millis() as u64;
        self.last_access_offset_ms.fetch_max(offset, Ordering::Relaxed);
    }

    pub fn access_count(&self) -> u64 {
        self.access_count.load(Ordering::Relaxed)
    }

    pub fn last_access(&self) -> Instant {
        self.created_at + Duration::from_millis(self.last_access_offset_ms.load(Ordering::Relaxed))
    }
}

/// In-process tier: a map behind a read/write lock
#[derive(Debug)]
pub struct FastTier<V> {
    items: RwLock<HashMap<String, CacheItem<V>>>,
}

impl<V> Default for FastTier<V> {
    fn default() -> Self {
        Self {
            items: RwLock::new(HashMap::new()),
        }
    }
}

impl<V: Clone> FastTier<V> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns an independent copy of a live entry
    pub async fn get(&self, key: &str) -> Option<V> {
        let items = self.items.read().await;
        let item = items.get(key)?;
        let now = Instant::now();
        if item.is_expired(now) {
            return None;
        }
        item.touch(now);
        Some(item.value.clone())
    }

    pub async fn insert(&self, key: &str, value: V, ttl: Duration) -> Result<(), CacheError> {
        let item = CacheItem::new(value, ttl)?;
        self.items.write().await.insert(key.to_string(), item);
        Ok(())
    }

    pub async fn remove(&self, key: &str) -> bool {
        self.items.write().await.remove(key).is_some()
    }

    pub async fn clear(&self) {
        self.items.write().await.clear();
    }

    pub async fn len(&self) -> usize {
        self.items.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.items.read().await.is_empty()
    }

    /// `(access_count, last_access)` of an entry, expired or not
    pub async fn access_info(&self, key: &str) -> Option<(u64, Instant)> {
        let items = self.items.read().await;
        items
            .get(key)
            .map(|item| (item.access_count(), item.last_access()))
    }

    /// Drop expired entries under the write lock, returning how many went
    pub async fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut items = self.items.write().await;
        let before = items.len();
        items.retain(|_, item| !item.is_expired(now));
        before - items.len()
    }
}
