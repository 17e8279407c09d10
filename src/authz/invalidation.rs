use std::collections::BTreeSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use uuid::Uuid;

use crate::cache::{scope_prefix, DecisionCache};
use crate::errors::AppResult;
use crate::store::MembershipStore;

/// Drops cached decisions once the data behind them has changed.
///
/// Must only be called after the transaction carrying the change has committed.
#[derive(Clone)]
pub struct CacheInvalidator {
    cache: Arc<dyn DecisionCache>,
    membership: MembershipStore,
    // Bumped on every invalidation; resolvers compare it across their slow path
    // and skip the cache write if it moved.
    epoch: Arc<AtomicU64>,
}

impl CacheInvalidator {
    pub fn new(cache: Arc<dyn DecisionCache>, membership: MembershipStore) -> Self {
        Self {
            cache,
            membership,
            epoch: Arc::new(AtomicU64::new(0)),
        }
    }

    pub fn epoch(&self) -> u64 {
        self.epoch.load(Ordering::Acquire)
    }

    /// Forget every decision cached for (user, organization).
    ///
    /// Cache failures are logged, never returned: the TTL still bounds staleness.
    pub async fn invalidate_permission_cache(&self, user_id: Uuid, organization_id: Option<Uuid>) {
        self.epoch.fetch_add(1, Ordering::AcqRel);

        let prefix = scope_prefix(user_id, organization_id);
        match self.cache.delete_prefix(&prefix).await {
            Ok(()) => tracing::debug!(
                user_id = %user_id,
                organization_id = ?organization_id,
                "permission cache invalidated"
            ),
            Err(e) => tracing::warn!(
                user_id = %user_id,
                organization_id = ?organization_id,
                error = %e,
                "permission cache invalidation failed, entries will age out"
            ),
        }
    }

    /// Invalidate every user holding `role_id` in `organization_id`.
    ///
    /// Returns the number of (user, organization) scopes touched.
    pub async fn invalidate_role_cache(&self, organization_id: Uuid, role_id: Uuid) -> AppResult<usize> {
        let holders = self.membership.holders_of_role(Some(organization_id), role_id).await?;
        let scopes: BTreeSet<(Uuid, Option<Uuid>)> =
            holders.iter().map(|h| (h.user_id, h.organization_id)).collect();

        for (user_id, org) in &scopes {
            self.invalidate_permission_cache(*user_id, *org).await;
        }

        tracing::info!(
            organization_id = %organization_id,
            role_id = %role_id,
            users = scopes.len(),
            "role permission cache invalidated"
        );
        Ok(scopes.len())
    }

    /// Invalidate every holder of `role_id` in every scope, for base grant changes.
    pub async fn invalidate_role_everywhere(&self, role_id: Uuid) -> AppResult<usize> {
        let holders = self.membership.all_holders_of_role(role_id).await?;
        let scopes: BTreeSet<(Uuid, Option<Uuid>)> =
            holders.iter().map(|h| (h.user_id, h.organization_id)).collect();

        for (user_id, org) in &scopes {
            self.invalidate_permission_cache(*user_id, *org).await;
        }

        tracing::info!(role_id = %role_id, scopes = scopes.len(), "role cache invalidated in all scopes");
        Ok(scopes.len())
    }
}
