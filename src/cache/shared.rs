//! Shared cache handle and read-through helper.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::RwLock;
use tracing::debug;

use crate::cache::CacheStore;
use crate::error::Result;

/// Process-wide cache handle.
///
/// Every `CacheStore` method is synchronous, so one lock acquisition covers
/// the whole check-then-write of a single call.
pub type SharedCache<V> = Arc<RwLock<CacheStore<V>>>;

/// Wraps a store for sharing.
pub fn shared<V>(store: CacheStore<V>) -> SharedCache<V> {
    Arc::new(RwLock::new(store))
}

// == Cached ==
/// Returns the live entry for `key`, or runs `op` and stores its result.
///
/// The lock is released while `op` runs; concurrent misses for the same key
/// may both execute `op`, and the last writer wins.
pub async fn cached<V, F, Fut, E>(
    cache: &SharedCache<V>,
    key: &str,
    ttl: Option<Duration>,
    op: F,
) -> std::result::Result<V, E>
where
    V: Clone,
    F: FnOnce() -> Fut,
    Fut: Future<Output = std::result::Result<V, E>>,
    E: From<crate::error::ResilienceError>,
{
    if let Some(hit) = cache.write().await.get(key) {
        debug!(key, "cache hit");
        return Ok(hit);
    }

    debug!(key, "cache miss");
    let value = op().await?;
    write_back(cache, key, value.clone(), ttl).await?;
    Ok(value)
}

async fn write_back<V: Clone>(
    cache: &SharedCache<V>,
    key: &str,
    value: V,
    ttl: Option<Duration>,
) -> Result<()> {
    cache.write().await.set(key, value, ttl)
}
