//! Reference data every deployment starts with.
//!
//! Safe to run repeatedly: existing roles, permissions and grants are never modified.
//! Holders of a role that gained grants have their cached decisions dropped.

use serde::Serialize;

use crate::authz::{permissions, roles, PermissionResolver};
use crate::errors::AppResult;
use crate::models::rbac::{Effect, RoleScope};

const ROLES: &[(&str, &str, RoleScope)] = &[
    (roles::SUPER_ADMIN, "Super Administrator", RoleScope::System),
    (roles::OWNER, "Owner", RoleScope::Organization),
    (roles::ADMIN, "Administrator", RoleScope::Organization),
    (roles::FSP_ADMIN, "FSP Administrator", RoleScope::Organization),
    (roles::AUDITOR, "Auditor", RoleScope::Organization),
    (roles::SUPERVISOR, "Supervisor", RoleScope::Organization),
    (roles::MEMBER, "Member", RoleScope::Organization),
    (roles::FREELANCER, "Freelancer", RoleScope::Organization),
];

/// Roles that start with ALLOW on the whole catalog.
const FULL_ACCESS_ROLES: &[&str] = &[roles::SUPER_ADMIN, roles::OWNER];

#[derive(Debug, Default, Clone, Copy, Serialize)]
pub struct SeedReport {
    pub roles: usize,
    pub permissions: usize,
    pub grants_added: usize,
    /// Cached (user, organization) scopes dropped because their roles gained grants.
    pub scopes_invalidated: usize,
}

pub async fn seed_reference_data(resolver: &PermissionResolver) -> AppResult<SeedReport> {
    let store = resolver.permission_store();
    let mut report = SeedReport::default();

    let mut full_access = Vec::new();
    for (code, name, scope) in ROLES {
        let role = store.ensure_role(code, name, *scope).await?;
        if FULL_ACCESS_ROLES.contains(code) {
            full_access.push((role, 0usize));
        }
        report.roles += 1;
    }

    for (resource, action) in permissions::ALL {
        let permission = store.ensure_permission(resource, action, None).await?;
        report.permissions += 1;

        for (role, added) in full_access.iter_mut() {
            if store.grant_if_absent(role.id, permission.id, Effect::Allow).await? {
                *added += 1;
            }
        }
    }

    for (role, added) in &full_access {
        if *added == 0 {
            continue;
        }
        report.grants_added += added;
        report.scopes_invalidated += resolver.invalidator().invalidate_role_everywhere(role.id).await?;
    }

    tracing::info!(
        roles = report.roles,
        permissions = report.permissions,
        grants_added = report.grants_added,
        scopes_invalidated = report.scopes_invalidated,
        "reference data seeded"
    );
    Ok(report)
}
