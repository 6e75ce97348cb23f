use std::{sync::Arc, time::Duration};

use moka::future::{Cache, CacheBuilder};

use crate::snowflake::Snowflake;

const DEFAULT_CAPACITY: u64 = 1_000;
const CACHE_AGE: u64 = 60 * 60;

/// Bounded cache of entities keyed by snowflake.
///
/// Entries not touched for the idle period are evicted.
#[derive(Debug, Clone)]
pub struct SnowflakeCache<V: Send + Sync + 'static> {
    inner: Cache<Snowflake, Arc<V>>,
}

impl<V: Send + Sync + 'static> Default for SnowflakeCache<V> {
    fn default() -> Self {
        Self::new(DEFAULT_CAPACITY, Duration::from_secs(CACHE_AGE))
    }
}

impl<V: Send + Sync + 'static> SnowflakeCache<V> {
    pub fn new(capacity: u64, time_to_idle: Duration) -> Self {
        Self {
            inner: CacheBuilder::new(capacity)
                .time_to_idle(time_to_idle)
                .build(),
        }
    }

    pub async fn get(&self, id: Snowflake) -> Option<Arc<V>> {
        self.inner.get(&id).await
    }

    pub async fn insert(&self, id: Snowflake, value: V) -> Arc<V> {
        let value = Arc::new(value);
        self.inner.insert(id, Arc::clone(&value)).await;
        value
    }

    pub async fn remove(&self, id: Snowflake) -> Option<Arc<V>> {
        self.inner.remove(&id).await
    }

    pub fn contains(&self, id: Snowflake) -> bool {
        self.inner.contains_key(&id)
    }

    /// Approximate, pending maintenance work is not flushed.
    pub fn len(&self) -> u64 {
        self.inner.entry_count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
