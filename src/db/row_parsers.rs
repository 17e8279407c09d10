use chrono::{DateTime, NaiveDate, NaiveDateTime, TimeZone, Utc};
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use uuid::Uuid;

use crate::errors::AppError;
use crate::models::chat::{Channel, ChannelContext, ChannelMember, WorkOrder};
use crate::models::membership::{OrgMember, OrgMemberRole};
use crate::models::rbac::{DbOrgRolePermissionOverride, DbRole, Permission, RolePermission};

pub fn parse_datetime(s: &str) -> Result<DateTime<Utc>, AppError> {
    let s = s.trim();

    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Ok(dt.with_timezone(&Utc));
    }

    // SQLite default timestamp format, optional fractional seconds
    if let Ok(naive) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S%.f") {
        return Ok(Utc.from_utc_datetime(&naive));
    }

    if let Ok(naive_date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        let ndt = naive_date
            .and_hms_opt(0, 0, 0)
            .ok_or_else(|| AppError::internal("invalid datetime: date out of range"))?;
        return Ok(Utc.from_utc_datetime(&ndt));
    }

    Err(AppError::internal(format!("invalid datetime: {}", s)))
}

fn col<'r, T>(row: &'r SqliteRow, name: &str) -> Result<T, AppError>
where
    T: sqlx::Decode<'r, sqlx::Sqlite> + sqlx::Type<sqlx::Sqlite>,
{
    row.try_get(name)
        .map_err(|e| AppError::internal(format!("missing {}: {}", name, e)))
}

fn col_uuid(row: &SqliteRow, name: &str) -> Result<Uuid, AppError> {
    let raw: String = col(row, name)?;
    Uuid::parse_str(&raw).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", name, e)))
}

fn col_opt_uuid(row: &SqliteRow, name: &str) -> Result<Option<Uuid>, AppError> {
    let raw: Option<String> = col(row, name)?;
    raw.map(|s| Uuid::parse_str(&s).map_err(|e| AppError::internal(format!("invalid uuid in {}: {}", name, e))))
        .transpose()
}

fn col_datetime(row: &SqliteRow, name: &str) -> Result<DateTime<Utc>, AppError> {
    let raw: String = col(row, name)?;
    parse_datetime(&raw)
}

fn col_opt_datetime(row: &SqliteRow, name: &str) -> Result<Option<DateTime<Utc>>, AppError> {
    let raw: Option<String> = col(row, name)?;
    match raw {
        Some(s) if !s.trim().is_empty() => Ok(Some(parse_datetime(&s)?)),
        _ => Ok(None),
    }
}

pub fn db_role_from_row(row: &SqliteRow) -> Result<DbRole, AppError> {
    Ok(DbRole {
        id: col_uuid(row, "id")?,
        code: col(row, "code")?,
        name: col(row, "name")?,
        scope: col(row, "scope")?,
        is_active: col(row, "is_active")?,
        created_at: col_datetime(row, "created_at")?,
        updated_at: col_datetime(row, "updated_at")?,
    })
}

pub fn permission_from_row(row: &SqliteRow) -> Result<Permission, AppError> {
    Ok(Permission {
        id: col_uuid(row, "id")?,
        resource: col(row, "resource")?,
        action: col(row, "action")?,
        description: col(row, "description")?,
        created_at: col_datetime(row, "created_at")?,
    })
}

pub fn role_permission_from_row(row: &SqliteRow) -> Result<RolePermission, AppError> {
    let effect: String = col(row, "effect")?;
    Ok(RolePermission {
        role_id: col_uuid(row, "role_id")?,
        permission_id: col_uuid(row, "permission_id")?,
        effect: effect
            .parse()
            .map_err(|_| AppError::internal(format!("invalid stored effect: {}", effect)))?,
        created_at: col_datetime(row, "created_at")?,
        updated_at: col_datetime(row, "updated_at")?,
    })
}

pub fn db_override_from_row(row: &SqliteRow) -> Result<DbOrgRolePermissionOverride, AppError> {
    Ok(DbOrgRolePermissionOverride {
        id: col_uuid(row, "id")?,
        organization_id: col_uuid(row, "organization_id")?,
        role_id: col_uuid(row, "role_id")?,
        permission_id: col_uuid(row, "permission_id")?,
        effect: col(row, "effect")?,
        created_by: col_opt_uuid(row, "created_by")?,
        created_at: col_datetime(row, "created_at")?,
        updated_at: col_datetime(row, "updated_at")?,
    })
}

pub fn org_member_from_row(row: &SqliteRow) -> Result<OrgMember, AppError> {
    let status: String = col(row, "status")?;
    Ok(OrgMember {
        id: col_uuid(row, "id")?,
        user_id: col_uuid(row, "user_id")?,
        organization_id: col_uuid(row, "organization_id")?,
        status: status.parse()?,
        joined_at: col_datetime(row, "joined_at")?,
        left_at: col_opt_datetime(row, "left_at")?,
    })
}

pub fn org_member_role_from_row(row: &SqliteRow) -> Result<OrgMemberRole, AppError> {
    Ok(OrgMemberRole {
        id: col_uuid(row, "id")?,
        user_id: col_uuid(row, "user_id")?,
        organization_id: col_opt_uuid(row, "organization_id")?,
        role_id: col_uuid(row, "role_id")?,
        is_primary: col(row, "is_primary")?,
        created_at: col_datetime(row, "created_at")?,
    })
}

pub fn channel_from_row(row: &SqliteRow) -> Result<Channel, AppError> {
    let context_type: String = col(row, "context_type")?;
    let context_id = col_uuid(row, "context_id")?;
    Ok(Channel {
        id: col_uuid(row, "id")?,
        context: ChannelContext::from_parts(&context_type, context_id),
        name: col(row, "name")?,
        created_at: col_datetime(row, "created_at")?,
    })
}

pub fn channel_member_from_row(row: &SqliteRow) -> Result<ChannelMember, AppError> {
    Ok(ChannelMember {
        id: col_uuid(row, "id")?,
        channel_id: col_uuid(row, "channel_id")?,
        organization_id: col_uuid(row, "organization_id")?,
        joined_at: col_datetime(row, "joined_at")?,
    })
}

pub fn work_order_from_row(row: &SqliteRow) -> Result<WorkOrder, AppError> {
    Ok(WorkOrder {
        id: col_uuid(row, "id")?,
        farming_organization_id: col_uuid(row, "farming_organization_id")?,
        fsp_organization_id: col_uuid(row, "fsp_organization_id")?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Datelike;

    #[test]
    fn parses_rfc3339_and_sqlite_formats() {
        let a = parse_datetime("2025-03-01T10:00:00Z").unwrap();
        let b = parse_datetime("2025-03-01 10:00:00").unwrap();
        let c = parse_datetime("2025-03-01 10:00:00.250").unwrap();
        assert_eq!(a, b);
        assert!(c > b);
        assert_eq!(parse_datetime("2025-03-01").unwrap().day(), 1);
        assert!(parse_datetime("yesterday").is_err());
    }
}
