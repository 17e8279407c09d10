use std::time::{Duration, Instant};

use async_trait::async_trait;
use moka::future::Cache;
use moka::Expiry;

use super::DecisionCache;
use crate::errors::{AppError, AppResult};

#[derive(Debug, Clone)]
struct CachedDecision {
    value: String,
    ttl: Duration,
}

/// Each entry lives for the TTL it was written with; rewrites restart the clock.
struct PerEntryTtl;

impl Expiry<String, CachedDecision> for PerEntryTtl {
    fn expire_after_create(&self, _key: &String, value: &CachedDecision, _created_at: Instant) -> Option<Duration> {
        Some(value.ttl)
    }

    fn expire_after_update(
        &self,
        _key: &String,
        value: &CachedDecision,
        _updated_at: Instant,
        _duration_until_expiry: Option<Duration>,
    ) -> Option<Duration> {
        Some(value.ttl)
    }
}

/// In-process decision cache backed by moka.
#[derive(Clone)]
pub struct MokaDecisionCache {
    inner: Cache<String, CachedDecision>,
}

impl MokaDecisionCache {
    pub fn new(max_capacity: u64) -> Self {
        let inner = Cache::builder()
            .max_capacity(max_capacity)
            .expire_after(PerEntryTtl)
            .support_invalidation_closures()
            .build();
        Self { inner }
    }

    pub fn entry_count(&self) -> u64 {
        self.inner.entry_count()
    }

    pub async fn run_pending_tasks(&self) {
        self.inner.run_pending_tasks().await;
    }
}

impl std::fmt::Debug for MokaDecisionCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MokaDecisionCache")
            .field("entries", &self.inner.entry_count())
            .finish()
    }
}

#[async_trait]
impl DecisionCache for MokaDecisionCache {
    async fn get(&self, key: &str) -> AppResult<Option<String>> {
        Ok(self.inner.get(key).await.map(|entry| entry.value))
    }

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()> {
        self.inner
            .insert(
                key.to_string(),
                CachedDecision {
                    value: value.to_string(),
                    ttl,
                },
            )
            .await;
        Ok(())
    }

    async fn delete(&self, key: &str) -> AppResult<()> {
        self.inner.invalidate(key).await;
        Ok(())
    }

    async fn delete_prefix(&self, prefix: &str) -> AppResult<()> {
        let prefix = prefix.to_string();
        // Entries written before this call stop being returned by `get` immediately;
        // moka sweeps them out in the background.
        self.inner
            .invalidate_entries_if(move |key, _| key.starts_with(&prefix))
            .map(|_| ())
            .map_err(|e| AppError::cache(format!("prefix invalidation failed: {e}")))
    }
}

/// Cache that never remembers anything, for `PERMISSION_CACHE_ENABLED=false`.
#[derive(Debug, Clone, Copy, Default)]
pub struct DisabledCache;

#[async_trait]
impl DecisionCache for DisabledCache {
    async fn get(&self, _key: &str) -> AppResult<Option<String>> {
        Ok(None)
    }

    async fn set(&self, _key: &str, _value: &str, _ttl: Duration) -> AppResult<()> {
        Ok(())
    }

    async fn delete(&self, _key: &str) -> AppResult<()> {
        Ok(())
    }

    async fn delete_prefix(&self, _prefix: &str) -> AppResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TTL: Duration = Duration::from_secs(300);

    #[tokio::test]
    async fn set_then_get() {
        let cache = MokaDecisionCache::new(100);
        cache.set("permission:u:o:farms:create", "ALLOW", TTL).await.unwrap();
        assert_eq!(
            cache.get("permission:u:o:farms:create").await.unwrap().as_deref(),
            Some("ALLOW")
        );
        assert_eq!(cache.get("permission:u:o:farms:delete").await.unwrap(), None);
    }

    #[tokio::test]
    async fn delete_prefix_only_touches_matching_keys() {
        let cache = MokaDecisionCache::new(100);
        cache.set("permission:u1:o1:farms:create", "ALLOW", TTL).await.unwrap();
        cache.set("permission:u1:o1:farms:delete", "DENY", TTL).await.unwrap();
        cache.set("permission:u2:o1:farms:create", "ALLOW", TTL).await.unwrap();

        cache.delete_prefix("permission:u1:o1:").await.unwrap();

        assert_eq!(cache.get("permission:u1:o1:farms:create").await.unwrap(), None);
        assert_eq!(cache.get("permission:u1:o1:farms:delete").await.unwrap(), None);
        assert_eq!(
            cache.get("permission:u2:o1:farms:create").await.unwrap().as_deref(),
            Some("ALLOW")
        );
    }

    #[tokio::test]
    async fn writes_after_invalidation_survive() {
        let cache = MokaDecisionCache::new(100);
        cache.set("permission:u1:o1:farms:create", "ALLOW", TTL).await.unwrap();
        cache.delete_prefix("permission:u1:o1:").await.unwrap();
        tokio::time::sleep(Duration::from_millis(5)).await;
        cache.set("permission:u1:o1:farms:create", "DENY", TTL).await.unwrap();

        assert_eq!(
            cache.get("permission:u1:o1:farms:create").await.unwrap().as_deref(),
            Some("DENY")
        );
    }

    #[tokio::test]
    async fn entries_expire_after_their_ttl() {
        let cache = MokaDecisionCache::new(100);
        cache
            .set("permission:u:o:farms:create", "ALLOW", Duration::from_millis(50))
            .await
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert_eq!(cache.get("permission:u:o:farms:create").await.unwrap(), None);
    }

    #[tokio::test]
    async fn disabled_cache_always_misses() {
        let cache = DisabledCache;
        cache.set("k", "ALLOW", TTL).await.unwrap();
        assert_eq!(cache.get("k").await.unwrap(), None);
        cache.delete_prefix("k").await.unwrap();
    }
}
