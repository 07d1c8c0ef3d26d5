use super::types::CacheError;
use async_trait::async_trait;
use std::time::Duration;

/// A value read from the distributed tier with the lifetime it has left.
/// `remaining` is `None` when the backend keeps the key without expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TierEntry {
    pub raw: String,
    pub remaining: Option<Duration>,
}

/// Slower shared tier holding JSON-encoded values.
///
/// Absence is modelled by [`DisabledTier`], so the cache itself never
/// branches on whether a distributed tier exists.
#[async_trait]
pub trait DistributedTier: Send + Sync {
    fn name(&self) -> &str;

    async fn get(&self, key: &str) -> Result<Option<TierEntry>, CacheError>;

    /// Store `value` for `ttl`. Implementations keep millisecond precision.
    async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError>;

    async fn delete(&self, key: &str) -> Result<(), CacheError>;

    async fn clear(&self) -> Result<(), CacheError>;
}

/// Stand-in used when no distributed tier is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct DisabledTier;

#[async_trait]
impl DistributedTier for DisabledTier {
    fn name(&self) -> &str {
        "disabled"
    }

    async fn get(&self, _key: &str) -> Result<Option<TierEntry>, CacheError> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: String, _ttl: Duration) -> Result<(), CacheError> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> Result<(), CacheError> {
        Ok(())
    }

    async fn clear(&self) -> Result<(), CacheError> {
        Ok(())
    }
}

#[cfg(feature = "redis-tier")]
pub use redis_tier::RedisTier;

#[cfg(feature = "redis-tier")]
mod redis_tier {
    use super::*;
    use redis::AsyncCommands;
    use tracing::{debug, info};

    const SCAN_BATCH: usize = 500;

    /// Redis-backed tier. Keys are namespaced with a prefix and `clear`
    /// only touches keys under that prefix.
    pub struct RedisTier {
        client: redis::Client,
        prefix: String,
    }

    impl RedisTier {
        /// Connect and verify the server answers before accepting the tier
        pub async fn connect(url: &str, prefix: &str) -> Result<Self, CacheError> {
            let client = redis::Client::open(url).map_err(distributed)?;
            let mut conn = client
                .get_multiplexed_async_connection()
                .await
                .map_err(distributed)?;
            let _: () = redis::cmd("PING")
                .query_async(&mut conn)
                .await
                .map_err(distributed)?;
            info!("Connected distributed cache tier at {}", url);
            Ok(Self {
                client,
                prefix: prefix.to_string(),
            })
        }

        fn key(&self, key: &str) -> String {
            format!("{}{}", self.prefix, key)
        }

        /// `SCAN MATCH` pattern selecting exactly the keys under `prefix`
        pub fn scan_pattern(prefix: &str) -> String {
            let mut pattern = String::with_capacity(prefix.len() + 1);
            for c in prefix.chars() {
                if matches!(c, '*' | '?' | '[' | ']' | '\\') {
                    pattern.push('\\');
                }
                pattern.push(c);
            }
            pattern.push('*');
            pattern
        }

        async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, CacheError> {
            self.client
                .get_multiplexed_async_connection()
                .await
                .map_err(distributed)
        }
    }

    fn distributed(err: redis::RedisError) -> CacheError {
        CacheError::Distributed(err.to_string())
    }

    #[async_trait]
    impl DistributedTier for RedisTier {
        fn name(&self) -> &str {
            "redis"
        }

        async fn get(&self, key: &str) -> Result<Option<TierEntry>, CacheError> {
            let key = self.key(key);
            let mut conn = self.connection().await?;
            let (raw, pttl): (Option<String>, i64) = redis::pipe()
                .atomic()
                .cmd("GET")
                .arg(&key)
                .cmd("PTTL")
                .arg(&key)
                .query_async(&mut conn)
                .await
                .map_err(distributed)?;

            // PTTL: -2 missing, -1 no expiry, otherwise milliseconds left
            Ok(match (raw, pttl) {
                (None, _) | (_, -2) | (_, 0) => None,
                (Some(raw), -1) => Some(TierEntry {
                    raw,
                    remaining: None,
                }),
                (Some(raw), ms) => Some(TierEntry {
                    raw,
                    remaining: Some(Duration::from_millis(ms.max(0) as u64)),
                }),
            })
        }

        async fn set(&self, key: &str, value: String, ttl: Duration) -> Result<(), CacheError> {
            let millis = u64::try_from(ttl.as_millis()).unwrap_or(u64::MAX).max(1);
            let mut conn = self.connection().await?;
            let _: () = conn
                .pset_ex(self.key(key), value, millis)
                .await
                .map_err(distributed)?;
            Ok(())
        }

        async fn delete(&self, key: &str) -> Result<(), CacheError> {
            let mut conn = self.connection().await?;
            let _: () = conn.del(self.key(key)).await.map_err(distributed)?;
            Ok(())
        }

        async fn clear(&self) -> Result<(), CacheError> {
            if self.prefix.is_empty() {
                return Err(CacheError::Distributed(
                    "refusing to clear a redis tier without a key prefix".into(),
                ));
            }

            let pattern = Self::scan_pattern(&self.prefix);
            let mut conn = self.connection().await?;
            let mut cursor: u64 = 0;
            let mut removed = 0usize;
            loop {
                let (next, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                    .arg(cursor)
                    .arg("MATCH")
                    .arg(&pattern)
                    .arg("COUNT")
                    .arg(SCAN_BATCH)
                    .query_async(&mut conn)
                    .await
                    .map_err(distributed)?;
                if !keys.is_empty() {
                    let _: () = redis::cmd("UNLINK")
                        .arg(&keys)
                        .query_async(&mut conn)
                        .await
                        .map_err(distributed)?;
                    removed += keys.len();
                }
                if next == 0 {
                    break;
                }
                cursor = next;
            }
            debug!("Cleared {} redis keys matching {}", removed, pattern);
            Ok(())
        }
    }
}
