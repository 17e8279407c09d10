//! Best-effort store for memoized allow/deny decisions.
//!
//! The cache is never authoritative. Callers treat every error from it as a miss.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;

use crate::config::AuthzConfig;
use crate::errors::AppResult;

mod keys;
mod memory;

pub use keys::{decision_key, scope_prefix, KEY_NAMESPACE};
pub use memory::{DisabledCache, MokaDecisionCache};

#[async_trait]
pub trait DecisionCache: Send + Sync {
    async fn get(&self, key: &str) -> AppResult<Option<String>>;

    async fn set(&self, key: &str, value: &str, ttl: Duration) -> AppResult<()>;

    async fn delete(&self, key: &str) -> AppResult<()>;

    /// Remove every entry whose key starts with `prefix`
    async fn delete_prefix(&self, prefix: &str) -> AppResult<()>;
}

pub fn from_config(config: &AuthzConfig) -> Arc<dyn DecisionCache> {
    if config.cache_enabled {
        Arc::new(MokaDecisionCache::new(config.cache_capacity))
    } else {
        tracing::info!("permission cache disabled, every check hits the store");
        Arc::new(DisabledCache)
    }
}
