use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// EFFECT
// =============================================================================

/// Outcome attached to a role/permission pairing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Effect {
    Allow,
    Deny,
}

impl Effect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Effect::Allow => "ALLOW",
            Effect::Deny => "DENY",
        }
    }

    pub fn is_allow(&self) -> bool {
        matches!(self, Effect::Allow)
    }
}

impl fmt::Display for Effect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Effect {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALLOW" => Ok(Effect::Allow),
            "DENY" => Ok(Effect::Deny),
            other => Err(AppError::bad_request(format!("unknown effect: {other}"))),
        }
    }
}

// =============================================================================
// ROLE
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RoleScope {
    System,
    Organization,
}

impl RoleScope {
    pub fn as_str(&self) -> &'static str {
        match self {
            RoleScope::System => "SYSTEM",
            RoleScope::Organization => "ORGANIZATION",
        }
    }
}

impl FromStr for RoleScope {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SYSTEM" => Ok(RoleScope::System),
            "ORGANIZATION" => Ok(RoleScope::Organization),
            other => Err(AppError::internal(format!("unknown role scope: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Role {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub scope: RoleScope,
    pub is_active: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DbRole {
    pub id: Uuid,
    pub code: String,
    pub name: String,
    pub scope: String,
    pub is_active: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbRole> for Role {
    type Error = AppError;

    fn try_from(db: DbRole) -> Result<Self, Self::Error> {
        Ok(Role {
            id: db.id,
            code: db.code,
            name: db.name,
            scope: db.scope.parse()?,
            is_active: db.is_active != 0,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

// =============================================================================
// PERMISSION
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Permission {
    pub id: Uuid,
    pub resource: String,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Permission {
    /// `resource.action`, the form used in logs
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.resource, self.action)
    }
}

// =============================================================================
// ROLE-PERMISSION (BASE GRANT)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RolePermission {
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub effect: Effect,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for RolePermission {
    fn entity_type() -> &'static str { "role_permission" }
    fn subject_id(&self) -> Uuid { self.role_id }
    fn severity(&self) -> Severity { Severity::Critical }
}

// =============================================================================
// ORG-LEVEL OVERRIDE
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgRolePermissionOverride {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub effect: Effect,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Loggable for OrgRolePermissionOverride {
    fn entity_type() -> &'static str { "role_permission_override" }
    fn subject_id(&self) -> Uuid { self.id }
    fn severity(&self) -> Severity { Severity::Critical }
}

#[derive(Debug, Clone)]
pub struct DbOrgRolePermissionOverride {
    pub id: Uuid,
    pub organization_id: Uuid,
    pub role_id: Uuid,
    pub permission_id: Uuid,
    pub effect: String,
    pub created_by: Option<Uuid>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl TryFrom<DbOrgRolePermissionOverride> for OrgRolePermissionOverride {
    type Error = AppError;

    fn try_from(db: DbOrgRolePermissionOverride) -> Result<Self, Self::Error> {
        Ok(OrgRolePermissionOverride {
            id: db.id,
            organization_id: db.organization_id,
            role_id: db.role_id,
            permission_id: db.permission_id,
            effect: db
                .effect
                .parse()
                .map_err(|_| AppError::internal(format!("invalid stored effect: {}", db.effect)))?,
            created_by: db.created_by,
            created_at: db.created_at,
            updated_at: db.updated_at,
        })
    }
}

/// Result of an override upsert.
#[derive(Debug, Clone, Serialize)]
pub struct OverrideOutcome {
    #[serde(rename = "override")]
    pub record: OrgRolePermissionOverride,
    /// Effect in force before this call, when an existing row was updated
    #[serde(skip_serializing_if = "Option::is_none")]
    pub previous_effect: Option<Effect>,
}

impl OverrideOutcome {
    pub fn was_update(&self) -> bool {
        self.previous_effect.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn effect_parses_case_insensitively() {
        assert_eq!("allow".parse::<Effect>().unwrap(), Effect::Allow);
        assert_eq!(" DENY ".parse::<Effect>().unwrap(), Effect::Deny);
        assert!("maybe".parse::<Effect>().is_err());
    }

    #[test]
    fn effect_serializes_upper_case() {
        assert_eq!(serde_json::to_string(&Effect::Allow).unwrap(), "\"ALLOW\"");
        assert_eq!(Effect::Deny.to_string(), "DENY");
    }

    #[test]
    fn role_scope_round_trips_through_storage_form() {
        for scope in [RoleScope::System, RoleScope::Organization] {
            assert_eq!(scope.as_str().parse::<RoleScope>().unwrap(), scope);
        }
        assert!("TENANT".parse::<RoleScope>().is_err());
    }
}
