//! Chat channels, their member organizations, and the work orders they can hang off.

use std::collections::BTreeSet;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use uuid::Uuid;

use crate::db::row_parsers::{channel_from_row, channel_member_from_row, work_order_from_row};
use crate::errors::{AppError, AppResult};
use crate::models::chat::{Channel, ChannelContext, ChannelMember, WorkOrder};

#[derive(Clone)]
pub struct ChannelStore {
    pool: SqlitePool,
}

impl ChannelStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    pub async fn find_channel(&self, channel_id: Uuid) -> AppResult<Option<Channel>> {
        let row = sqlx::query("SELECT id, context_type, context_id, name, created_at FROM chat_channels WHERE id = ?")
            .bind(channel_id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(|r| channel_from_row(&r)).transpose()
    }

    /// Insert a channel row only. Members are attached separately, which is exactly
    /// the window a crash can leave half-populated.
    pub async fn create_channel(&self, context: &ChannelContext, name: Option<&str>) -> AppResult<Channel> {
        let context_id = match context {
            ChannelContext::WorkOrder(id) | ChannelContext::Organization(id) => *id,
            ChannelContext::Unknown(raw) => {
                return Err(AppError::bad_request(format!("unsupported channel context: {raw}")))
            }
        };

        let channel = Channel {
            id: Uuid::new_v4(),
            context: context.clone(),
            name: name.map(str::to_string),
            created_at: Utc::now(),
        };

        sqlx::query("INSERT INTO chat_channels (id, context_type, context_id, name, created_at) VALUES (?, ?, ?, ?, ?)")
            .bind(channel.id.to_string())
            .bind(context.type_name())
            .bind(context_id.to_string())
            .bind(&channel.name)
            .bind(channel.created_at)
            .execute(&self.pool)
            .await?;

        Ok(channel)
    }

    pub async fn member_organizations(&self, channel_id: Uuid) -> AppResult<BTreeSet<Uuid>> {
        let ids: Vec<String> = sqlx::query_scalar("SELECT organization_id FROM chat_channel_members WHERE channel_id = ?")
            .bind(channel_id.to_string())
            .fetch_all(&self.pool)
            .await?;
        ids.iter()
            .map(|s| Uuid::parse_str(s).map_err(|e| AppError::internal(format!("invalid uuid: {}", e))))
            .collect()
    }

    pub async fn list_members(&self, channel_id: Uuid) -> AppResult<Vec<ChannelMember>> {
        let rows = sqlx::query(
            "SELECT id, channel_id, organization_id, joined_at FROM chat_channel_members WHERE channel_id = ? ORDER BY joined_at",
        )
        .bind(channel_id.to_string())
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(channel_member_from_row).collect()
    }

    /// Attach an organization; `None` when it was already a member.
    pub async fn add_member(
        conn: &mut SqliteConnection,
        channel_id: Uuid,
        organization_id: Uuid,
    ) -> AppResult<Option<ChannelMember>> {
        let member = ChannelMember {
            id: Uuid::new_v4(),
            channel_id,
            organization_id,
            joined_at: Utc::now(),
        };

        let result = sqlx::query(
            "INSERT OR IGNORE INTO chat_channel_members (id, channel_id, organization_id, joined_at) VALUES (?, ?, ?, ?)",
        )
        .bind(member.id.to_string())
        .bind(channel_id.to_string())
        .bind(organization_id.to_string())
        .bind(member.joined_at)
        .execute(&mut *conn)
        .await?;

        Ok((result.rows_affected() > 0).then_some(member))
    }

    /// User reaches the channel through any ACTIVE membership of a member organization.
    pub async fn user_can_access(&self, channel_id: Uuid, user_id: Uuid) -> AppResult<bool> {
        let hit: Option<i64> = sqlx::query_scalar(
            r#"
            SELECT 1
            FROM chat_channel_members cm
            INNER JOIN org_members om ON om.organization_id = cm.organization_id
            WHERE cm.channel_id = ? AND om.user_id = ? AND om.status = 'ACTIVE'
            LIMIT 1
            "#,
        )
        .bind(channel_id.to_string())
        .bind(user_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        Ok(hit.is_some())
    }

    pub async fn find_work_order(&self, work_order_id: Uuid) -> AppResult<Option<WorkOrder>> {
        let row = sqlx::query(
            "SELECT id, farming_organization_id, fsp_organization_id FROM work_orders WHERE id = ?",
        )
        .bind(work_order_id.to_string())
        .fetch_optional(&self.pool)
        .await?;
        row.map(|r| work_order_from_row(&r)).transpose()
    }

    pub async fn insert_work_order(&self, work_order: &WorkOrder) -> AppResult<()> {
        sqlx::query(
            "INSERT INTO work_orders (id, farming_organization_id, fsp_organization_id, created_at) VALUES (?, ?, ?, ?)",
        )
        .bind(work_order.id.to_string())
        .bind(work_order.farming_organization_id.to_string())
        .bind(work_order.fsp_organization_id.to_string())
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
