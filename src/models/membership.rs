use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::errors::AppError;
use crate::events::{Loggable, Severity};

// =============================================================================
// ORG MEMBER
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MemberStatus {
    Active,
    Inactive,
    Suspended,
    Removed,
}

impl MemberStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            MemberStatus::Active => "ACTIVE",
            MemberStatus::Inactive => "INACTIVE",
            MemberStatus::Suspended => "SUSPENDED",
            MemberStatus::Removed => "REMOVED",
        }
    }

    pub fn is_active(&self) -> bool {
        matches!(self, MemberStatus::Active)
    }
}

impl FromStr for MemberStatus {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(MemberStatus::Active),
            "INACTIVE" => Ok(MemberStatus::Inactive),
            "SUSPENDED" => Ok(MemberStatus::Suspended),
            "REMOVED" => Ok(MemberStatus::Removed),
            other => Err(AppError::bad_request(format!("unknown member status: {other}"))),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMember {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Uuid,
    pub status: MemberStatus,
    pub joined_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub left_at: Option<DateTime<Utc>>,
}

impl Loggable for OrgMember {
    fn entity_type() -> &'static str { "org_member" }
    fn subject_id(&self) -> Uuid { self.user_id }
}

// =============================================================================
// ORG MEMBER ROLE
// =============================================================================

/// One role held by a user; `organization_id = None` is the system scope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrgMemberRole {
    pub id: Uuid,
    pub user_id: Uuid,
    pub organization_id: Option<Uuid>,
    pub role_id: Uuid,
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
}

impl Loggable for OrgMemberRole {
    fn entity_type() -> &'static str { "org_member_role" }
    fn subject_id(&self) -> Uuid { self.user_id }
    fn severity(&self) -> Severity { Severity::Critical }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "assigned" | "removed" => Severity::Critical,
            _ => self.severity(),
        }
    }
}
