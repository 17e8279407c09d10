//! Mutations that change what the resolver would decide.
//!
//! Every operation follows the same order: write inside a transaction, commit,
//! invalidate the affected cache scopes, then publish the audit event.

use uuid::Uuid;

use super::resolver::PermissionResolver;
use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, log_activity_with_old};
use crate::models::membership::{MemberStatus, OrgMember, OrgMemberRole};
use crate::models::rbac::{
    Effect, OrgRolePermissionOverride, OverrideOutcome, Permission, Role, RolePermission, RoleScope,
};
use crate::store::{MembershipStore, PermissionStore};

impl PermissionResolver {
    async fn require_role(&self, role_id: Uuid) -> AppResult<Role> {
        self.permissions
            .find_role(role_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("role {role_id} not found")))
    }

    async fn require_permission(&self, permission_id: Uuid) -> AppResult<Permission> {
        self.permissions
            .get_permission(permission_id)
            .await?
            .ok_or_else(|| AppError::not_found(format!("permission {permission_id} not found")))
    }

    // =========================================================================
    // ORGANIZATION OVERRIDES
    // =========================================================================

    /// Set the organization's effect for (role, permission), replacing the base grant.
    ///
    /// Repeated calls update the single row for the triple in place.
    pub async fn create_permission_override(
        &self,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
        effect: Effect,
        created_by: Uuid,
    ) -> AppResult<OverrideOutcome> {
        let role = self.require_role(role_id).await?;
        let permission = self.require_permission(permission_id).await?;

        let mut tx = self.permissions.pool().begin().await?;
        let (record, previous) = PermissionStore::upsert_override(
            &mut *tx,
            organization_id,
            role_id,
            permission_id,
            effect,
            Some(created_by),
        )
        .await?;
        tx.commit().await?;

        let invalidated = self.invalidator.invalidate_role_cache(organization_id, role_id).await?;

        tracing::info!(
            organization_id = %organization_id,
            role = %role.code,
            permission = %permission.qualified_name(),
            effect = %effect,
            previous_effect = ?previous.as_ref().map(|p| p.effect),
            invalidated,
            "permission override saved"
        );

        match &previous {
            Some(old) => log_activity_with_old(&self.events, "updated", Some(created_by), &record, Some(old)),
            None => log_activity(&self.events, "created", Some(created_by), &record),
        }

        Ok(OverrideOutcome {
            previous_effect: previous.map(|p| p.effect),
            record,
        })
    }

    /// Drop an override so the role falls back to its base grant. Returns whether a row existed.
    pub async fn delete_permission_override(
        &self,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> AppResult<bool> {
        let mut tx = self.permissions.pool().begin().await?;
        let removed = PermissionStore::delete_override(&mut *tx, organization_id, role_id, permission_id).await?;
        tx.commit().await?;

        let Some(removed) = removed else {
            return Ok(false);
        };

        self.invalidator.invalidate_role_cache(organization_id, role_id).await?;
        tracing::info!(
            organization_id = %organization_id,
            role_id = %role_id,
            permission_id = %permission_id,
            "permission override removed"
        );
        log_activity(&self.events, "deleted", actor_id, &removed);

        Ok(true)
    }

    pub async fn list_overrides(&self, organization_id: Uuid) -> AppResult<Vec<OrgRolePermissionOverride>> {
        self.permissions.list_overrides(organization_id).await
    }

    // =========================================================================
    // BASE GRANTS
    // =========================================================================

    /// Set a role's base effect for a permission. Affects every scope the role is held in.
    pub async fn set_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        effect: Effect,
        actor_id: Option<Uuid>,
    ) -> AppResult<RolePermission> {
        let role = self.require_role(role_id).await?;
        let permission = self.require_permission(permission_id).await?;

        let mut tx = self.permissions.pool().begin().await?;
        let (current, previous) = PermissionStore::upsert_role_permission(&mut *tx, role_id, permission_id, effect).await?;
        tx.commit().await?;

        if previous.as_ref().map(|p| p.effect) == Some(effect) {
            return Ok(current);
        }

        self.invalidator.invalidate_role_everywhere(role_id).await?;
        tracing::info!(
            role = %role.code,
            permission = %permission.qualified_name(),
            effect = %effect,
            "base grant saved"
        );
        log_activity_with_old(&self.events, "updated", actor_id, &current, previous.as_ref());

        Ok(current)
    }

    pub async fn remove_role_permission(
        &self,
        role_id: Uuid,
        permission_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> AppResult<bool> {
        let mut tx = self.permissions.pool().begin().await?;
        let removed = PermissionStore::delete_role_permission(&mut *tx, role_id, permission_id).await?;
        tx.commit().await?;

        let Some(removed) = removed else {
            return Ok(false);
        };

        self.invalidator.invalidate_role_everywhere(role_id).await?;
        log_activity(&self.events, "deleted", actor_id, &removed);
        Ok(true)
    }

    // =========================================================================
    // ROLE ASSIGNMENTS
    // =========================================================================

    /// Give a user a role in an organization, or in the system scope when `organization_id` is `None`.
    pub async fn assign_role(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role_id: Uuid,
        is_primary: bool,
        actor_id: Option<Uuid>,
    ) -> AppResult<OrgMemberRole> {
        let role = self.require_role(role_id).await?;
        match (role.scope, organization_id) {
            (RoleScope::System, Some(_)) => {
                return Err(AppError::bad_request(format!(
                    "{} is a system role and cannot be assigned inside an organization",
                    role.code
                )))
            }
            (RoleScope::Organization, None) => {
                return Err(AppError::bad_request(format!(
                    "{} is an organization role and needs an organization",
                    role.code
                )))
            }
            _ => {}
        }

        let mut tx = self.membership.pool().begin().await?;
        let assignment = MembershipStore::assign_role(&mut *tx, user_id, organization_id, role_id, is_primary).await?;
        tx.commit().await?;

        self.invalidator.invalidate_permission_cache(user_id, organization_id).await;
        tracing::info!(
            user_id = %user_id,
            organization_id = ?organization_id,
            role = %role.code,
            is_primary,
            "role assigned"
        );
        log_activity(&self.events, "assigned", actor_id, &assignment);

        Ok(assignment)
    }

    pub async fn remove_role(
        &self,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role_id: Uuid,
        actor_id: Option<Uuid>,
    ) -> AppResult<bool> {
        let mut tx = self.membership.pool().begin().await?;
        let removed = MembershipStore::remove_role(&mut *tx, user_id, organization_id, role_id).await?;
        tx.commit().await?;

        let Some(removed) = removed else {
            return Ok(false);
        };

        self.invalidator.invalidate_permission_cache(user_id, organization_id).await;
        tracing::info!(user_id = %user_id, organization_id = ?organization_id, role_id = %role_id, "role removed");
        log_activity(&self.events, "removed", actor_id, &removed);

        Ok(true)
    }

    // =========================================================================
    // MEMBERSHIP STATUS
    // =========================================================================

    /// Returns the updated membership, or `None` if the user never joined the organization.
    pub async fn set_member_status(
        &self,
        user_id: Uuid,
        organization_id: Uuid,
        status: MemberStatus,
        actor_id: Option<Uuid>,
    ) -> AppResult<Option<OrgMember>> {
        let mut tx = self.membership.pool().begin().await?;
        let changed = MembershipStore::set_member_status(&mut *tx, user_id, organization_id, status).await?;
        tx.commit().await?;

        let Some((previous, current)) = changed else {
            return Ok(None);
        };

        self.invalidator.invalidate_permission_cache(user_id, Some(organization_id)).await;
        log_activity_with_old(&self.events, "updated", actor_id, &current, Some(&previous));

        Ok(Some(current))
    }

    // =========================================================================
    // CACHE
    // =========================================================================

    pub async fn invalidate_permission_cache(&self, user_id: Uuid, organization_id: Option<Uuid>) {
        self.invalidator.invalidate_permission_cache(user_id, organization_id).await;
    }

    pub async fn invalidate_role_cache(&self, organization_id: Uuid, role_id: Uuid) -> AppResult<usize> {
        self.invalidator.invalidate_role_cache(organization_id, role_id).await
    }
}
