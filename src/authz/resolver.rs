use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use sqlx::SqlitePool;
use uuid::Uuid;

use super::evaluator::{combine, Decision};
use super::invalidation::CacheInvalidator;
use super::request::AccessRequest;
use crate::cache::DecisionCache;
use crate::config::AuthzConfig;
use crate::errors::AppResult;
use crate::events::EventBus;
use crate::models::rbac::Effect;
use crate::store::{MembershipStore, PermissionEffect, PermissionStore};

/// Allowed actions grouped by resource, both sorted.
pub type UserPermissions = BTreeMap<String, Vec<String>>;

/// Resolves (user, organization, resource, action) to allow/deny.
///
/// Cheap to clone; clones share the stores, the cache and the invalidation epoch.
#[derive(Clone)]
pub struct PermissionResolver {
    pub(super) permissions: PermissionStore,
    pub(super) membership: MembershipStore,
    pub(super) cache: Arc<dyn DecisionCache>,
    pub(super) invalidator: CacheInvalidator,
    pub(super) events: EventBus,
    cache_ttl: Duration,
    require_active_membership: bool,
}

impl std::fmt::Debug for PermissionResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PermissionResolver")
            .field("cache_ttl", &self.cache_ttl)
            .field("require_active_membership", &self.require_active_membership)
            .finish()
    }
}

impl PermissionResolver {
    pub fn new(pool: SqlitePool, cache: Arc<dyn DecisionCache>, events: EventBus, config: &AuthzConfig) -> Self {
        let membership = MembershipStore::new(pool.clone());
        Self {
            permissions: PermissionStore::new(pool),
            invalidator: CacheInvalidator::new(cache.clone(), membership.clone()),
            membership,
            cache,
            events,
            cache_ttl: config.cache_ttl,
            require_active_membership: config.require_active_membership,
        }
    }

    pub fn permission_store(&self) -> &PermissionStore {
        &self.permissions
    }

    pub fn membership_store(&self) -> &MembershipStore {
        &self.membership
    }

    pub fn invalidator(&self) -> &CacheInvalidator {
        &self.invalidator
    }

    /// Can `user_id` perform `resource.action` in `organization_id`?
    ///
    /// Denial is `Ok(false)`. Only a store failure is an error; cache trouble
    /// degrades to recomputing.
    pub async fn check_permission(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        resource: &str,
        action: &str,
    ) -> AppResult<bool> {
        let key = crate::cache::decision_key(user_id, organization_id, resource, action);
        // Taken before the lookup so an invalidation anywhere in this call blocks the write.
        let epoch = self.invalidator.epoch();

        if let Some(cached) = self.cache_get(&key).await {
            tracing::debug!(
                user_id = %user_id,
                organization_id = ?organization_id,
                resource = %resource,
                action = %action,
                decision = %cached,
                "permission cache hit"
            );
            return Ok(Decision::from_cached(&cached).is_allow());
        }

        let decision = self.resolve(user_id, organization_id, resource, action).await?;
        self.cache_put(&key, decision, epoch).await;

        tracing::debug!(
            user_id = %user_id,
            organization_id = ?organization_id,
            resource = %resource,
            action = %action,
            decision = decision.as_str(),
            "permission resolved"
        );

        Ok(decision.is_allow())
    }

    pub async fn check(&self, request: &AccessRequest) -> AppResult<bool> {
        self.check_permission(request.user_id, request.organization_id, &request.resource, &request.action)
            .await
    }

    /// Uncached resolution against the stores.
    pub async fn resolve(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        resource: &str,
        action: &str,
    ) -> AppResult<Decision> {
        if !self.passes_membership_gate(user_id, organization_id).await? {
            return Ok(Decision::Deny);
        }

        let assignments = self.membership.roles_for(user_id, organization_id).await?;
        if assignments.is_empty() {
            tracing::debug!(user_id = %user_id, organization_id = ?organization_id, "no roles in scope");
            return Ok(Decision::Deny);
        }

        // Unknown permission: no role can hold an opinion on it.
        let Some(permission) = self.permissions.find_permission(resource, action).await? else {
            return Ok(Decision::Deny);
        };

        let mut effects = Vec::with_capacity(assignments.len());
        for assignment in &assignments {
            let effective = self
                .permissions
                .effective_effect(organization_id, assignment.role_id, permission.id)
                .await?;

            match effective {
                Some((effect, source)) => {
                    tracing::trace!(
                        role_id = %assignment.role_id,
                        permission = %permission.qualified_name(),
                        effect = %effect,
                        source = ?source,
                        "role effect"
                    );
                    effects.push(effect);
                }
                None => tracing::trace!(role_id = %assignment.role_id, "role has no opinion"),
            }
        }

        Ok(combine(effects))
    }

    /// Everything the user may do in the scope, for UI affordances. Gating must use
    /// `check_permission`.
    pub async fn get_user_permissions(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
    ) -> AppResult<UserPermissions> {
        let mut allowed = UserPermissions::new();

        if !self.passes_membership_gate(user_id, organization_id).await? {
            return Ok(allowed);
        }

        let assignments = self.membership.roles_for(user_id, organization_id).await?;
        let mut votes: BTreeMap<(String, String), Vec<Effect>> = BTreeMap::new();

        for assignment in &assignments {
            let mut effective: HashMap<Uuid, PermissionEffect> = self
                .permissions
                .role_grants(assignment.role_id)
                .await?
                .into_iter()
                .map(|grant| (grant.permission_id, grant))
                .collect();

            if let Some(org) = organization_id {
                for replaced in self.permissions.role_overrides(org, assignment.role_id).await? {
                    effective.insert(replaced.permission_id, replaced);
                }
            }

            for pe in effective.into_values() {
                votes.entry((pe.resource, pe.action)).or_default().push(pe.effect);
            }
        }

        for ((resource, action), effects) in votes {
            if combine(effects).is_allow() {
                allowed.entry(resource).or_default().push(action);
            }
        }

        Ok(allowed)
    }

    async fn passes_membership_gate(&self, user_id: Uuid, organization_id: Option<Uuid>) -> AppResult<bool> {
        match (self.require_active_membership, organization_id) {
            (true, Some(org)) => {
                let active = self.membership.is_active_member(user_id, org).await?;
                if !active {
                    tracing::debug!(user_id = %user_id, organization_id = %org, "membership not active");
                }
                Ok(active)
            }
            _ => Ok(true),
        }
    }

    async fn cache_get(&self, key: &str) -> Option<String> {
        match self.cache.get(key).await {
            Ok(value) => value,
            Err(e) => {
                tracing::warn!(error = %e, "permission cache read failed, recomputing");
                None
            }
        }
    }

    /// Write the decision unless an invalidation ran since `epoch` was read.
    ///
    /// The epoch is checked again after the write so an invalidation racing the
    /// write cannot leave a value computed from pre-commit data behind.
    async fn cache_put(&self, key: &str, decision: Decision, epoch: u64) {
        if self.invalidator.epoch() != epoch {
            return;
        }

        if let Err(e) = self.cache.set(key, decision.as_str(), self.cache_ttl).await {
            tracing::warn!(error = %e, "permission cache write failed");
            return;
        }

        if self.invalidator.epoch() != epoch {
            if let Err(e) = self.cache.delete(key).await {
                tracing::warn!(error = %e, "failed to drop racing cache write");
            }
        }
    }
}
