//! Audit events for authorization changes.
//!
//! Mutations publish `DomainEvent`s on a broadcast bus. `start_activity_listener`
//! projects them into `activity_log` and the hash-chained `event_store`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use sha2::{Digest, Sha256};
use sqlx::SqlitePool;
use tokio::sync::broadcast;
use uuid::Uuid;

pub mod loggable;
pub use loggable::{Loggable, Severity};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DomainEvent<T> {
    pub id: Uuid,
    pub name: String,
    pub occurred_at: DateTime<Utc>,
    pub actor_id: Option<Uuid>,
    pub subject_id: Option<Uuid>,
    pub payload: T,
}

impl<T> DomainEvent<T> {
    pub fn new(name: impl Into<String>, actor_id: Option<Uuid>, subject_id: Option<Uuid>, payload: T) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            occurred_at: Utc::now(),
            actor_id,
            subject_id,
            payload,
        }
    }
}

pub type EventBus = broadcast::Sender<Value>;

pub fn init_event_bus() -> (EventBus, broadcast::Receiver<Value>) {
    broadcast::channel(1024)
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ActivityPayload {
    #[serde(rename = "new")]
    pub current: Value,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub old: Option<Value>,
    pub severity: Severity,
}

pub fn log_activity<T: Loggable>(event_bus: &EventBus, action: &str, actor_id: Option<Uuid>, entity: &T) {
    log_activity_with_old(event_bus, action, actor_id, entity, None);
}

/// Publish `{entity_type}.{action}` with the previous state attached.
///
/// Fire and forget: a bus with no subscribers, or a serialization failure,
/// never fails the mutation that produced the event.
pub fn log_activity_with_old<T: Loggable>(
    event_bus: &EventBus,
    action: &str,
    actor_id: Option<Uuid>,
    entity: &T,
    old_entity: Option<&T>,
) {
    let event_name = format!("{}.{}", T::entity_type(), action);

    let payload = ActivityPayload {
        current: serde_json::to_value(entity).unwrap_or_default(),
        old: old_entity.map(|e| serde_json::to_value(e).unwrap_or_default()),
        severity: entity.severity_for_action(action),
    };

    let event = DomainEvent::new(
        event_name,
        actor_id,
        Some(entity.subject_id()),
        serde_json::to_value(&payload).unwrap_or_default(),
    );

    let _ = event_bus.send(serde_json::to_value(event).unwrap_or_default());
}

pub fn describe_event(name: &str) -> &'static str {
    match name {
        "role_permission_override.created" => "Organization permission override created",
        "role_permission_override.updated" => "Organization permission override updated",
        "role_permission_override.deleted" => "Organization permission override removed",
        "role_permission.updated" => "Base role permission changed",
        "org_member_role.assigned" => "Role assigned to member",
        "org_member_role.removed" => "Role removed from member",
        "org_member.updated" => "Member status changed",
        "channel_member.repaired" => "Channel membership repaired",
        _ => "System event",
    }
}

pub async fn start_activity_listener(mut rx: broadcast::Receiver<Value>, pool: SqlitePool) {
    tracing::info!("activity listener started");
    loop {
        let event = match rx.recv().await {
            Ok(event) => event,
            Err(broadcast::error::RecvError::Lagged(skipped)) => {
                tracing::warn!(skipped, "activity listener lagged, events dropped");
                continue;
            }
            Err(broadcast::error::RecvError::Closed) => break,
        };

        if let Err(e) = persist_event(&pool, &event).await {
            tracing::error!(error = %e, "failed to persist activity event");
        }
    }
    tracing::info!("activity listener stopped");
}

async fn persist_event(pool: &SqlitePool, event: &Value) -> Result<(), sqlx::Error> {
    let name = event.get("name").and_then(|v| v.as_str()).unwrap_or("unknown");
    let actor_id = event
        .get("actor_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|u| u.to_string());
    let subject_id = event
        .get("subject_id")
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
        .map(|u| u.to_string());
    let occurred_at = event
        .get("occurred_at")
        .and_then(|v| v.as_str())
        .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(Utc::now);
    let severity = event
        .get("payload")
        .and_then(|p| p.get("severity"))
        .and_then(|s| s.as_str())
        .unwrap_or(Severity::Important.as_str())
        .to_string();
    let payload_str = serde_json::to_string(event).unwrap_or_default();

    sqlx::query(
        r#"
        INSERT INTO activity_log (id, event_name, description, actor_id, subject_id, occurred_at, properties, severity)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(describe_event(name))
    .bind(&actor_id)
    .bind(&subject_id)
    .bind(occurred_at)
    .bind(&payload_str)
    .bind(&severity)
    .execute(pool)
    .await?;

    let prev_hash: Option<String> = sqlx::query_scalar("SELECT hash FROM event_store ORDER BY rowid DESC LIMIT 1")
        .fetch_optional(pool)
        .await?;

    let hash = chain_hash(prev_hash.as_deref(), &payload_str);

    sqlx::query(
        r#"
        INSERT INTO event_store (id, event_name, occurred_at, actor_id, subject_id, payload, severity, prev_hash, hash)
        VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(name)
    .bind(occurred_at)
    .bind(&actor_id)
    .bind(&subject_id)
    .bind(&payload_str)
    .bind(&severity)
    .bind(&prev_hash)
    .bind(&hash)
    .execute(pool)
    .await?;

    Ok(())
}

/// SHA256(prev_hash || payload), hex encoded
pub fn chain_hash(prev_hash: Option<&str>, payload: &str) -> String {
    let mut hasher = Sha256::new();
    if let Some(ph) = prev_hash {
        hasher.update(ph.as_bytes());
    }
    hasher.update(payload.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::rbac::{Effect, RolePermission};

    #[test]
    fn chain_hash_depends_on_predecessor() {
        let first = chain_hash(None, "{}");
        let second = chain_hash(Some(&first), "{}");
        assert_eq!(first.len(), 64);
        assert_ne!(first, second);
        assert_eq!(second, chain_hash(Some(&first), "{}"));
    }

    #[tokio::test]
    async fn events_carry_name_and_severity() {
        let (bus, mut rx) = init_event_bus();
        let grant = RolePermission {
            role_id: Uuid::new_v4(),
            permission_id: Uuid::new_v4(),
            effect: Effect::Deny,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };

        log_activity(&bus, "updated", None, &grant);

        let event = rx.recv().await.unwrap();
        assert_eq!(event["name"], "role_permission.updated");
        assert_eq!(event["subject_id"], grant.role_id.to_string());
        assert_eq!(event["payload"]["severity"], "critical");
        assert_eq!(event["payload"]["new"]["effect"], "DENY");
    }

    #[test]
    fn publishing_without_subscribers_is_harmless() {
        let (bus, rx) = init_event_bus();
        drop(rx);
        let grant = RolePermission {
            role_id: Uuid::new_v4(),
            permission_id: Uuid::new_v4(),
            effect: Effect::Allow,
            created_at: Utc::now(),
            updated_at: Utc::now(),
        };
        log_activity(&bus, "updated", None, &grant);
    }
}
