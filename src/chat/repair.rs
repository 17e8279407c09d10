use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;
use uuid::Uuid;

use crate::errors::{AppError, AppResult};
use crate::events::{log_activity, EventBus};
use crate::models::chat::ChannelContext;
use crate::store::{ChannelStore, MembershipStore};

/// Message surfaced on every terminal channel denial, repaired or not.
pub const CHANNEL_ACCESS_DENIED: &str = "You do not have access to this channel";

/// Why a repair attempt ended without inserting anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "reason", content = "detail", rename_all = "snake_case")]
pub enum RepairFailure {
    Disabled,
    ChannelNotFound,
    WorkOrderNotFound(Uuid),
    UnsupportedContext(String),
    /// Every required organization is already a member.
    NothingMissing,
}

impl fmt::Display for RepairFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RepairFailure::Disabled => f.write_str("channel repair is disabled"),
            RepairFailure::ChannelNotFound => f.write_str("channel not found"),
            RepairFailure::WorkOrderNotFound(id) => write!(f, "work order {id} not found"),
            RepairFailure::UnsupportedContext(raw) => write!(f, "unsupported channel context {raw}"),
            RepairFailure::NothingMissing => f.write_str("no membership rows were missing"),
        }
    }
}

/// States of one repair run. `run` always ends in a terminal state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RepairState {
    AccessDenied,
    RepairAttempted,
    RepairSucceeded { inserted: Vec<Uuid> },
    RepairFailed { failure: RepairFailure },
}

impl RepairState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, RepairState::RepairSucceeded { .. } | RepairState::RepairFailed { .. })
    }

    pub fn succeeded(&self) -> bool {
        matches!(self, RepairState::RepairSucceeded { .. })
    }

    fn failed(failure: RepairFailure) -> Self {
        RepairState::RepairFailed { failure }
    }
}

/// Re-derives who should be in a channel from its context and inserts missing rows.
///
/// Only ever inserts. Running it on a complete channel changes nothing.
#[derive(Clone)]
pub struct ChannelMembershipRepair {
    channels: ChannelStore,
    membership: MembershipStore,
    events: EventBus,
    enabled: bool,
}

impl ChannelMembershipRepair {
    pub fn new(channels: ChannelStore, membership: MembershipStore, events: EventBus, enabled: bool) -> Self {
        Self {
            channels,
            membership,
            events,
            enabled,
        }
    }

    pub fn channels(&self) -> &ChannelStore {
        &self.channels
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub async fn user_can_access_channel(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        self.channels.user_can_access(channel_id, user_id).await
    }

    /// Returns true if any membership row was inserted.
    pub async fn repair_channel_membership(&self, channel_id: Uuid, requesting_user_id: Uuid) -> AppResult<bool> {
        Ok(self.run(channel_id, requesting_user_id).await?.succeeded())
    }

    /// Drive the machine from `AccessDenied` to a terminal state.
    pub async fn run(&self, channel_id: Uuid, requesting_user_id: Uuid) -> AppResult<RepairState> {
        let mut state = RepairState::AccessDenied;

        while !state.is_terminal() {
            state = match state {
                RepairState::AccessDenied if !self.enabled => RepairState::failed(RepairFailure::Disabled),
                RepairState::AccessDenied => RepairState::RepairAttempted,
                RepairState::RepairAttempted => self.attempt(channel_id, requesting_user_id).await?,
                terminal => terminal,
            };
        }

        match &state {
            RepairState::RepairSucceeded { inserted } => tracing::info!(
                channel_id = %channel_id,
                user_id = %requesting_user_id,
                inserted = inserted.len(),
                "channel membership repaired"
            ),
            RepairState::RepairFailed { failure } => tracing::warn!(
                channel_id = %channel_id,
                user_id = %requesting_user_id,
                reason = %failure,
                "channel membership repair did not apply"
            ),
            _ => {}
        }

        Ok(state)
    }

    /// Check access; on denial repair and retry exactly once.
    pub async fn ensure_channel_access(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<()> {
        if self.user_can_access_channel(channel_id, user_id).await? {
            return Ok(());
        }

        let state = self.run(channel_id, user_id).await?;
        if !state.succeeded() {
            return Err(AppError::forbidden(CHANNEL_ACCESS_DENIED));
        }

        if self.user_can_access_channel(channel_id, user_id).await? {
            Ok(())
        } else {
            tracing::warn!(channel_id = %channel_id, user_id = %user_id, "access still denied after repair");
            Err(AppError::forbidden(CHANNEL_ACCESS_DENIED))
        }
    }

    async fn required_organizations(
        &self,
        context: &ChannelContext,
        requesting_user_id: Uuid,
    ) -> AppResult<Result<BTreeSet<Uuid>, RepairFailure>> {
        match context {
            ChannelContext::WorkOrder(work_order_id) => {
                let Some(work_order) = self.channels.find_work_order(*work_order_id).await? else {
                    return Ok(Err(RepairFailure::WorkOrderNotFound(*work_order_id)));
                };
                Ok(Ok(BTreeSet::from([
                    work_order.farming_organization_id,
                    work_order.fsp_organization_id,
                ])))
            }
            ChannelContext::Organization(organization_id) => {
                let mut required: BTreeSet<Uuid> = self
                    .membership
                    .active_organizations(requesting_user_id)
                    .await?
                    .into_iter()
                    .collect();
                required.insert(*organization_id);
                Ok(Ok(required))
            }
            ChannelContext::Unknown(raw) => Ok(Err(RepairFailure::UnsupportedContext(raw.clone()))),
        }
    }

    async fn attempt(&self, channel_id: Uuid, requesting_user_id: Uuid) -> AppResult<RepairState> {
        let Some(channel) = self.channels.find_channel(channel_id).await? else {
            return Ok(RepairState::failed(RepairFailure::ChannelNotFound));
        };

        let required = match self.required_organizations(&channel.context, requesting_user_id).await? {
            Ok(required) => required,
            Err(failure) => return Ok(RepairState::failed(failure)),
        };

        let existing = self.channels.member_organizations(channel_id).await?;
        let missing: Vec<Uuid> = required.difference(&existing).copied().collect();
        if missing.is_empty() {
            return Ok(RepairState::failed(RepairFailure::NothingMissing));
        }

        let mut tx = self.channels.pool().begin().await?;
        let mut inserted = Vec::with_capacity(missing.len());
        for organization_id in missing {
            if let Some(member) = ChannelStore::add_member(&mut *tx, channel_id, organization_id).await? {
                inserted.push(member);
            }
        }
        tx.commit().await?;

        // A concurrent repair may have filled the gap between our read and our insert.
        if inserted.is_empty() {
            return Ok(RepairState::failed(RepairFailure::NothingMissing));
        }

        for member in &inserted {
            log_activity(&self.events, "repaired", Some(requesting_user_id), member);
        }

        Ok(RepairState::RepairSucceeded {
            inserted: inserted.iter().map(|m| m.organization_id).collect(),
        })
    }
}
