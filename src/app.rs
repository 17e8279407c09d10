use sqlx::SqlitePool;
use tokio::sync::broadcast;
use serde_json::Value;

use crate::authz::PermissionResolver;
use crate::cache;
use crate::chat::ChannelMembershipRepair;
use crate::config::AuthzConfig;
use crate::errors::AppError;
use crate::events::{init_event_bus, start_activity_listener, EventBus};
use crate::store::{ChannelStore, MembershipStore};

/// Everything a host process needs to authorize requests.
#[derive(Clone)]
pub struct AuthzCore {
    pub pool: SqlitePool,
    pub config: AuthzConfig,
    pub resolver: PermissionResolver,
    pub repair: ChannelMembershipRepair,
    pub event_bus: EventBus,
}

impl AuthzCore {
    /// Build the core on its own event bus. The returned receiver sees every audit event.
    pub fn new(pool: SqlitePool, config: AuthzConfig) -> (Self, broadcast::Receiver<Value>) {
        let (event_bus, rx) = init_event_bus();
        (Self::with_event_bus(pool, config, event_bus), rx)
    }

    pub fn with_event_bus(pool: SqlitePool, config: AuthzConfig, event_bus: EventBus) -> Self {
        let decision_cache = cache::from_config(&config);
        let resolver = PermissionResolver::new(pool.clone(), decision_cache, event_bus.clone(), &config);
        let repair = ChannelMembershipRepair::new(
            ChannelStore::new(pool.clone()),
            MembershipStore::new(pool.clone()),
            event_bus.clone(),
            config.channel_repair_enabled,
        );

        Self {
            pool,
            config,
            resolver,
            repair,
            event_bus,
        }
    }

    /// Persist audit events into `activity_log` / `event_store` from a background task.
    pub fn spawn_activity_listener(&self) -> tokio::task::JoinHandle<()> {
        let rx = self.event_bus.subscribe();
        tokio::spawn(start_activity_listener(rx, self.pool.clone()))
    }
}

/// Core configured from the environment, with the activity listener already running.
pub async fn create_core(pool: SqlitePool) -> Result<AuthzCore, AppError> {
    let config = AuthzConfig::from_env()?;
    tracing::info!(
        cache_enabled = config.cache_enabled,
        cache_ttl_secs = config.cache_ttl.as_secs(),
        require_active_membership = config.require_active_membership,
        channel_repair_enabled = config.channel_repair_enabled,
        "authorization core configured"
    );

    let (core, _rx) = AuthzCore::new(pool, config);
    core.spawn_activity_listener();
    Ok(core)
}
