//! Role, permission, base grant and org override tables.

use chrono::Utc;
use sqlx::{Row, SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::row_parsers::{db_override_from_row, db_role_from_row, permission_from_row, role_permission_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::rbac::{Effect, OrgRolePermissionOverride, Permission, Role, RolePermission, RoleScope};

const ROLE_COLUMNS: &str = "id, code, name, scope, is_active, created_at, updated_at";
const PERMISSION_COLUMNS: &str = "id, resource, action, description, created_at";
const OVERRIDE_COLUMNS: &str =
    "id, organization_id, role_id, permission_id, effect, created_by, created_at, updated_at";

/// Where a role's effective effect came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EffectSource {
    Override,
    Base,
}

/// One role's opinion on one permission, with the permission's name attached.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PermissionEffect {
    pub permission_id: Uuid,
    pub resource: String,
    pub action: String,
    pub effect: Effect,
}

fn parse_effect(raw: &str) -> AppResult<Effect> {
    raw.parse()
        .map_err(|_| AppError::internal(format!("invalid stored effect: {raw}")))
}

#[derive(Clone)]
pub struct PermissionStore {
    pool: SqlitePool,
}

impl PermissionStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // REFERENCE DATA
    // =========================================================================

    pub async fn find_role(&self, role_id: Uuid) -> AppResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE id = ?"))
            .bind(role_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| db_role_from_row(&r).and_then(Role::try_from)).transpose()
    }

    pub async fn find_role_by_code(&self, code: &str) -> AppResult<Option<Role>> {
        let row = sqlx::query(&format!("SELECT {ROLE_COLUMNS} FROM roles WHERE code = ?"))
            .bind(code)
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| db_role_from_row(&r).and_then(Role::try_from)).transpose()
    }

    /// Insert the role unless its code already exists; returns the stored row either way.
    pub async fn ensure_role(&self, code: &str, name: &str, scope: RoleScope) -> AppResult<Role> {
        let now = Utc::now();
        sqlx::query(
            "INSERT OR IGNORE INTO roles (id, code, name, scope, is_active, created_at, updated_at) VALUES (?, ?, ?, ?, 1, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(code)
        .bind(name)
        .bind(scope.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_role_by_code(code)
            .await?
            .ok_or_else(|| AppError::internal(format!("role {code} missing after insert")))
    }

    pub async fn set_role_active(&self, role_id: Uuid, is_active: bool) -> AppResult<bool> {
        let result = sqlx::query("UPDATE roles SET is_active = ?, updated_at = ? WHERE id = ?")
            .bind(is_active)
            .bind(Utc::now())
            .bind(role_id.to_string())
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn find_permission(&self, resource: &str, action: &str) -> AppResult<Option<Permission>> {
        let row = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions WHERE resource = ? AND action = ?"
        ))
        .bind(resource)
        .bind(action)
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| permission_from_row(&r)).transpose()
    }

    pub async fn get_permission(&self, permission_id: Uuid) -> AppResult<Option<Permission>> {
        let row = sqlx::query(&format!("SELECT {PERMISSION_COLUMNS} FROM permissions WHERE id = ?"))
            .bind(permission_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| permission_from_row(&r)).transpose()
    }

    pub async fn list_permissions(&self) -> AppResult<Vec<Permission>> {
        let rows = sqlx::query(&format!(
            "SELECT {PERMISSION_COLUMNS} FROM permissions ORDER BY resource, action"
        ))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_from_row).collect()
    }

    pub async fn ensure_permission(
        &self,
        resource: &str,
        action: &str,
        description: Option<&str>,
    ) -> AppResult<Permission> {
        sqlx::query(
            "INSERT OR IGNORE INTO permissions (id, resource, action, description, created_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(Uuid::new_v4().to_string())
        .bind(resource)
        .bind(action)
        .bind(description)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        self.find_permission(resource, action)
            .await?
            .ok_or_else(|| AppError::internal(format!("permission {resource}.{action} missing after insert")))
    }

    // =========================================================================
    // EFFECT LOOKUPS (read path)
    // =========================================================================

    /// Override for (org, role, permission) if one exists, else the base grant.
    ///
    /// `None` means the role has no opinion. System scope (`organization_id = None`)
    /// never matches an override.
    pub async fn effective_effect(
        &self,
        organization_id: Option<Uuid>,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<Option<(Effect, EffectSource)>> {
        let org = organization_id.map(|id| id.to_string());
        let role = role_id.to_string();
        let permission = permission_id.to_string();

        let row = sqlx::query(
            r#"
            SELECT
                (SELECT effect FROM org_role_permission_overrides
                  WHERE organization_id = ? AND role_id = ? AND permission_id = ?) AS override_effect,
                (SELECT effect FROM role_permissions
                  WHERE role_id = ? AND permission_id = ?) AS base_effect
            "#,
        )
        .bind(&org)
        .bind(&role)
        .bind(&permission)
        .bind(&role)
        .bind(&permission)
        .fetch_one(&self.pool)
        .await?;

        let override_effect: Option<String> = row.try_get("override_effect")?;
        if let Some(raw) = override_effect {
            return Ok(Some((parse_effect(&raw)?, EffectSource::Override)));
        }

        let base_effect: Option<String> = row.try_get("base_effect")?;
        base_effect
            .map(|raw| parse_effect(&raw).map(|e| (e, EffectSource::Base)))
            .transpose()
    }

    /// Every base grant of a role.
    pub async fn role_grants(&self, role_id: Uuid) -> AppResult<Vec<PermissionEffect>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id AS permission_id, p.resource, p.action, rp.effect
            FROM role_permissions rp
            INNER JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ?
            "#,
        )
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_effect_from_row).collect()
    }

    /// Every override an organization has placed on a role.
    pub async fn role_overrides(&self, organization_id: Uuid, role_id: Uuid) -> AppResult<Vec<PermissionEffect>> {
        let rows = sqlx::query(
            r#"
            SELECT p.id AS permission_id, p.resource, p.action, o.effect
            FROM org_role_permission_overrides o
            INNER JOIN permissions p ON p.id = o.permission_id
            WHERE o.organization_id = ? AND o.role_id = ?
            "#,
        )
        .bind(organization_id.to_string())
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(permission_effect_from_row).collect()
    }

    // =========================================================================
    // OVERRIDES
    // =========================================================================

    pub async fn find_override(
        conn: &mut SqliteConnection,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<Option<OrgRolePermissionOverride>> {
        let row = sqlx::query(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM org_role_permission_overrides WHERE organization_id = ? AND role_id = ? AND permission_id = ?"
        ))
        .bind(organization_id.to_string())
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| db_override_from_row(&r).and_then(OrgRolePermissionOverride::try_from))
            .transpose()
    }

    /// Insert or update the single override row for the triple.
    ///
    /// Returns the stored row and, when a row already existed, the previous state.
    /// The insert runs first so the transaction holds the write lock before the
    /// existing row is read.
    pub async fn upsert_override(
        conn: &mut SqliteConnection,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
        effect: Effect,
        created_by: Option<Uuid>,
    ) -> AppResult<(OrgRolePermissionOverride, Option<OrgRolePermissionOverride>)> {
        let now = Utc::now();
        let record = OrgRolePermissionOverride {
            id: Uuid::new_v4(),
            organization_id,
            role_id,
            permission_id,
            effect,
            created_by,
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO org_role_permission_overrides
                (id, organization_id, role_id, permission_id, effect, created_by, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT (organization_id, role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(record.id.to_string())
        .bind(organization_id.to_string())
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(effect.as_str())
        .bind(created_by.map(|id| id.to_string()))
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok((record, None));
        }

        let previous = Self::find_override(conn, organization_id, role_id, permission_id)
            .await?
            .ok_or_else(|| AppError::internal("override vanished inside its transaction"))?;

        sqlx::query("UPDATE org_role_permission_overrides SET effect = ?, updated_at = ? WHERE id = ?")
            .bind(effect.as_str())
            .bind(now)
            .bind(previous.id.to_string())
            .execute(&mut *conn)
            .await?;

        let updated = OrgRolePermissionOverride {
            effect,
            updated_at: now,
            ..previous.clone()
        };
        Ok((updated, Some(previous)))
    }

    pub async fn delete_override(
        conn: &mut SqliteConnection,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<Option<OrgRolePermissionOverride>> {
        let row = sqlx::query(&format!(
            "DELETE FROM org_role_permission_overrides WHERE organization_id = ? AND role_id = ? AND permission_id = ? RETURNING {OVERRIDE_COLUMNS}"
        ))
        .bind(organization_id.to_string())
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| db_override_from_row(&r).and_then(OrgRolePermissionOverride::try_from))
            .transpose()
    }

    pub async fn list_overrides(&self, organization_id: Uuid) -> AppResult<Vec<OrgRolePermissionOverride>> {
        let rows = sqlx::query(&format!(
            "SELECT {OVERRIDE_COLUMNS} FROM org_role_permission_overrides WHERE organization_id = ? ORDER BY created_at"
        ))
        .bind(organization_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|r| db_override_from_row(r).and_then(OrgRolePermissionOverride::try_from))
            .collect()
    }

    pub async fn count_overrides(
        &self,
        organization_id: Uuid,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<i64> {
        let count: i64 = sqlx::query_scalar(
            "SELECT COUNT(*) FROM org_role_permission_overrides WHERE organization_id = ? AND role_id = ? AND permission_id = ?",
        )
        .bind(organization_id.to_string())
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_one(&self.pool)
        .await?;
        Ok(count)
    }

    // =========================================================================
    // BASE GRANTS
    // =========================================================================

    pub async fn find_role_permission(
        conn: &mut SqliteConnection,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<Option<RolePermission>> {
        let row = sqlx::query(
            "SELECT role_id, permission_id, effect, created_at, updated_at FROM role_permissions WHERE role_id = ? AND permission_id = ?",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| role_permission_from_row(&r)).transpose()
    }

    /// Same write-first shape as `upsert_override`.
    pub async fn upsert_role_permission(
        conn: &mut SqliteConnection,
        role_id: Uuid,
        permission_id: Uuid,
        effect: Effect,
    ) -> AppResult<(RolePermission, Option<RolePermission>)> {
        let now = Utc::now();
        let current = RolePermission {
            role_id,
            permission_id,
            effect,
            created_at: now,
            updated_at: now,
        };

        let inserted = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, effect, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT (role_id, permission_id) DO NOTHING
            "#,
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(effect.as_str())
        .bind(now)
        .bind(now)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok((current, None));
        }

        let previous = Self::find_role_permission(conn, role_id, permission_id)
            .await?
            .ok_or_else(|| AppError::internal("base grant vanished inside its transaction"))?;

        sqlx::query("UPDATE role_permissions SET effect = ?, updated_at = ? WHERE role_id = ? AND permission_id = ?")
            .bind(effect.as_str())
            .bind(now)
            .bind(role_id.to_string())
            .bind(permission_id.to_string())
            .execute(&mut *conn)
            .await?;

        let current = RolePermission {
            created_at: previous.created_at,
            ..current
        };
        Ok((current, Some(previous)))
    }

    /// Insert a base grant unless the pair already has one. Existing effects are left alone.
    pub async fn grant_if_absent(&self, role_id: Uuid, permission_id: Uuid, effect: Effect) -> AppResult<bool> {
        let now = Utc::now();
        let result = sqlx::query(
            "INSERT OR IGNORE INTO role_permissions (role_id, permission_id, effect, created_at, updated_at) VALUES (?, ?, ?, ?, ?)",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .bind(effect.as_str())
        .bind(now)
        .bind(now)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    pub async fn delete_role_permission(
        conn: &mut SqliteConnection,
        role_id: Uuid,
        permission_id: Uuid,
    ) -> AppResult<Option<RolePermission>> {
        let row = sqlx::query(
            "DELETE FROM role_permissions WHERE role_id = ? AND permission_id = ? RETURNING role_id, permission_id, effect, created_at, updated_at",
        )
        .bind(role_id.to_string())
        .bind(permission_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| role_permission_from_row(&r)).transpose()
    }
}

fn permission_effect_from_row(row: &sqlx::sqlite::SqliteRow) -> AppResult<PermissionEffect> {
    let permission_id: String = row.try_get("permission_id")?;
    let effect: String = row.try_get("effect")?;
    Ok(PermissionEffect {
        permission_id: Uuid::parse_str(&permission_id)
            .map_err(|e| AppError::internal(format!("invalid uuid: {}", e)))?,
        resource: row.try_get("resource")?,
        action: row.try_get("action")?,
        effect: parse_effect(&effect)?,
    })
}
