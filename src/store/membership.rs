//! Organization membership and per-organization role assignments.

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::row_parsers::{org_member_from_row, org_member_role_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::membership::{MemberStatus, OrgMember, OrgMemberRole};

const MEMBER_COLUMNS: &str = "id, user_id, organization_id, status, joined_at, left_at";
const MEMBER_ROLE_COLUMNS: &str = "omr.id, omr.user_id, omr.organization_id, omr.role_id, omr.is_primary, omr.created_at";
// RETURNING cannot use a table alias.
const ASSIGNMENT_COLUMNS: &str = "id, user_id, organization_id, role_id, is_primary, created_at";

#[derive(Clone)]
pub struct MembershipStore {
    pool: SqlitePool,
}

impl MembershipStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // =========================================================================
    // ROLE ASSIGNMENTS
    // =========================================================================

    /// Every role the user holds in the scope, primary or not. Deactivated roles are skipped.
    pub async fn roles_for(&self, user_id: Uuid, organization_id: Option<Uuid>) -> AppResult<Vec<OrgMemberRole>> {
        let rows = sqlx::query(&format!(
            r#"
            SELECT {MEMBER_ROLE_COLUMNS}
            FROM org_member_roles omr
            INNER JOIN roles r ON r.id = omr.role_id
            WHERE omr.user_id = ? AND omr.organization_id IS ? AND r.is_active = 1
            ORDER BY omr.is_primary DESC, omr.created_at
            "#
        ))
        .bind(user_id.to_string())
        .bind(organization_id.map(|id| id.to_string()))
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(org_member_role_from_row).collect()
    }

    /// Assignments of `role_id` within one scope.
    pub async fn holders_of_role(&self, organization_id: Option<Uuid>, role_id: Uuid) -> AppResult<Vec<OrgMemberRole>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_ROLE_COLUMNS} FROM org_member_roles omr WHERE omr.organization_id IS ? AND omr.role_id = ?"
        ))
        .bind(organization_id.map(|id| id.to_string()))
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(org_member_role_from_row).collect()
    }

    /// Assignments of `role_id` in every scope.
    pub async fn all_holders_of_role(&self, role_id: Uuid) -> AppResult<Vec<OrgMemberRole>> {
        let rows = sqlx::query(&format!(
            "SELECT {MEMBER_ROLE_COLUMNS} FROM org_member_roles omr WHERE omr.role_id = ?"
        ))
        .bind(role_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(org_member_role_from_row).collect()
    }

    /// Grant a role. Marking it primary demotes whichever role was primary before,
    /// so a (user, org) never ends up with two primaries.
    ///
    /// Every path writes before it reads, so the transaction never has to upgrade
    /// a read lock.
    pub async fn assign_role(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role_id: Uuid,
        is_primary: bool,
    ) -> AppResult<OrgMemberRole> {
        let user = user_id.to_string();
        let org = organization_id.map(|id| id.to_string());

        if is_primary {
            sqlx::query(
                "UPDATE org_member_roles SET is_primary = 0 WHERE user_id = ? AND organization_id IS ? AND role_id <> ?",
            )
            .bind(&user)
            .bind(&org)
            .bind(role_id.to_string())
            .execute(&mut *conn)
            .await?;
        }

        let record = OrgMemberRole {
            id: Uuid::new_v4(),
            user_id,
            organization_id,
            role_id,
            is_primary,
            created_at: Utc::now(),
        };
        let inserted = sqlx::query(
            "INSERT OR IGNORE INTO org_member_roles (id, user_id, organization_id, role_id, is_primary, created_at) VALUES (?, ?, ?, ?, ?, ?)",
        )
        .bind(record.id.to_string())
        .bind(&user)
        .bind(&org)
        .bind(role_id.to_string())
        .bind(is_primary)
        .bind(record.created_at)
        .execute(&mut *conn)
        .await?
        .rows_affected();

        if inserted > 0 {
            return Ok(record);
        }

        let row = sqlx::query(&format!(
            "UPDATE org_member_roles SET is_primary = ? WHERE user_id = ? AND organization_id IS ? AND role_id = ? RETURNING {ASSIGNMENT_COLUMNS}"
        ))
        .bind(is_primary)
        .bind(&user)
        .bind(&org)
        .bind(role_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        row.map(|r| org_member_role_from_row(&r))
            .transpose()?
            .ok_or_else(|| AppError::internal("role assignment vanished inside its transaction"))
    }

    pub async fn remove_role(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        organization_id: Option<Uuid>,
        role_id: Uuid,
    ) -> AppResult<Option<OrgMemberRole>> {
        let row = sqlx::query(&format!(
            "DELETE FROM org_member_roles WHERE user_id = ? AND organization_id IS ? AND role_id = ? RETURNING {ASSIGNMENT_COLUMNS}"
        ))
        .bind(user_id.to_string())
        .bind(organization_id.map(|id| id.to_string()))
        .bind(role_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;
        row.map(|r| org_member_role_from_row(&r)).transpose()
    }

    // =========================================================================
    // MEMBERSHIP STATUS
    // =========================================================================

    pub async fn find_member(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<Option<OrgMember>> {
        let row = sqlx::query(&format!(
            "SELECT {MEMBER_COLUMNS} FROM org_members WHERE user_id = ? AND organization_id = ?"
        ))
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| org_member_from_row(&r)).transpose()
    }

    pub async fn is_active_member(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<bool> {
        Ok(self
            .find_member(user_id, organization_id)
            .await?
            .is_some_and(|m| m.status.is_active()))
    }

    /// Organizations the user currently belongs to with ACTIVE status.
    pub async fn active_organizations(&self, user_id: Uuid) -> AppResult<Vec<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar(
            "SELECT organization_id FROM org_members WHERE user_id = ? AND status = 'ACTIVE' ORDER BY joined_at",
        )
        .bind(user_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        ids.iter()
            .map(|s| Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e))))
            .collect()
    }

    /// Record that a user joined an organization, reactivating a previous membership.
    pub async fn add_member(&self, user_id: Uuid, organization_id: Uuid) -> AppResult<OrgMember> {
        let now = Utc::now();
        sqlx::query(
            r#"
            INSERT INTO org_members (id, user_id, organization_id, status, joined_at, left_at)
            VALUES (?, ?, ?, 'ACTIVE', ?, NULL)
            ON CONFLICT (user_id, organization_id) DO UPDATE SET status = 'ACTIVE', joined_at = excluded.joined_at, left_at = NULL
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .bind(now)
        .execute(&self.pool)
        .await?;

        self.find_member(user_id, organization_id)
            .await?
            .ok_or_else(|| AppError::internal("membership missing after insert"))
    }

    /// Returns the (old, new) rows, or `None` when the user was never a member.
    pub async fn set_member_status(
        conn: &mut SqliteConnection,
        user_id: Uuid,
        organization_id: Uuid,
        status: MemberStatus,
    ) -> AppResult<Option<(OrgMember, OrgMember)>> {
        // SQLite has no SELECT ... FOR UPDATE. This no-op write takes the write lock
        // and hands back the row as it was.
        let row = sqlx::query(&format!(
            "UPDATE org_members SET status = status WHERE user_id = ? AND organization_id = ? RETURNING {MEMBER_COLUMNS}"
        ))
        .bind(user_id.to_string())
        .bind(organization_id.to_string())
        .fetch_optional(&mut *conn)
        .await?;

        let Some(previous) = row.map(|r| org_member_from_row(&r)).transpose()? else {
            return Ok(None);
        };

        let left_at = if status.is_active() { None } else { previous.left_at.or(Some(Utc::now())) };

        sqlx::query("UPDATE org_members SET status = ?, left_at = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(left_at)
            .bind(previous.id.to_string())
            .execute(&mut *conn)
            .await?;

        let current = OrgMember {
            status,
            left_at,
            ..previous.clone()
        };
        Ok(Some((previous, current)))
    }
}
