use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::events::{Loggable, Severity};

pub const CONTEXT_WORK_ORDER: &str = "WORK_ORDER";
pub const CONTEXT_ORGANIZATION: &str = "ORGANIZATION";

/// What a channel hangs off. Unrecognized stored values are kept verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChannelContext {
    WorkOrder(Uuid),
    Organization(Uuid),
    Unknown(String),
}

impl ChannelContext {
    pub fn from_parts(context_type: &str, context_id: Uuid) -> Self {
        match context_type {
            CONTEXT_WORK_ORDER => ChannelContext::WorkOrder(context_id),
            CONTEXT_ORGANIZATION => ChannelContext::Organization(context_id),
            other => ChannelContext::Unknown(other.to_string()),
        }
    }

    pub fn type_name(&self) -> &str {
        match self {
            ChannelContext::WorkOrder(_) => CONTEXT_WORK_ORDER,
            ChannelContext::Organization(_) => CONTEXT_ORGANIZATION,
            ChannelContext::Unknown(raw) => raw,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Channel {
    pub id: Uuid,
    pub context: ChannelContext,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelMember {
    pub id: Uuid,
    pub channel_id: Uuid,
    pub organization_id: Uuid,
    pub joined_at: DateTime<Utc>,
}

impl Loggable for ChannelMember {
    fn entity_type() -> &'static str { "channel_member" }
    fn subject_id(&self) -> Uuid { self.channel_id }

    fn severity_for_action(&self, action: &str) -> Severity {
        match action {
            "repaired" => Severity::Important,
            _ => Severity::Noise,
        }
    }
}

/// The slice of a work order the repair path needs.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkOrder {
    pub id: Uuid,
    pub farming_organization_id: Uuid,
    pub fsp_organization_id: Uuid,
}
