//! Multi-level result cache.
//!
//! A fast in-process tier guarded by a read/write lock sits in front of an
//! optional distributed tier. Hits in the distributed tier are promoted
//! into the fast tier as independent copies; a background task sweeps
//! expired fast-tier entries on a fixed interval.

pub mod distributed;
pub mod memory;
pub mod multi_level;
pub mod types;

#[cfg(test)]
pub mod tests;

#[cfg(feature = "redis-tier")]
pub use distributed::RedisTier;
pub use distributed::{DisabledTier, DistributedTier, TierEntry};
pub use memory::{CacheItem, FastTier};
pub use multi_level::MultiLevelCache;
pub use types::*;
