use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::tempdir;
use uuid::Uuid;

use agri_authz::events::chain_hash;
use agri_authz::models::rbac::{Effect, RoleScope};
use agri_authz::{AuthzConfig, AuthzCore};

#[tokio::test]
async fn test_activity_log_flow() -> Result<()> {
    // 1. Setup DB and core
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator = sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations"))
        .await?;
    migrator.run(&pool).await?;

    let (core, _rx) = AuthzCore::new(pool.clone(), AuthzConfig::default());
    let listener = core.spawn_activity_listener();

    // 2. Reference data
    let store = core.resolver.permission_store();
    let auditor = store.ensure_role("AUDITOR", "Auditor", RoleScope::Organization).await?;
    let finalize = store.ensure_permission("audit", "finalize", None).await?;

    // 3. Mutations that must be audited
    let admin = Uuid::new_v4();
    let user = Uuid::new_v4();
    let org = Uuid::new_v4();
    core.resolver.assign_role(user, Some(org), auditor.id, true, Some(admin)).await?;
    core.resolver
        .create_permission_override(org, auditor.id, finalize.id, Effect::Deny, admin)
        .await?;
    core.resolver
        .create_permission_override(org, auditor.id, finalize.id, Effect::Allow, admin)
        .await?;

    // 4. Poll database for activity logs
    // The event listener is async, so we might need to wait a bit
    let mut logs: Vec<(String, String, String)> = Vec::new();
    for _ in 0..15 {
        tokio::time::sleep(tokio::time::Duration::from_millis(100)).await;

        logs = sqlx::query_as("SELECT event_name, description, severity FROM activity_log ORDER BY rowid")
            .fetch_all(&pool)
            .await?;

        if logs.len() >= 3 {
            break;
        }
    }

    let names: Vec<&str> = logs.iter().map(|(name, _, _)| name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "org_member_role.assigned",
            "role_permission_override.created",
            "role_permission_override.updated",
        ]
    );
    assert_eq!(logs[1].1, "Organization permission override created");
    assert!(logs.iter().all(|(_, _, severity)| severity == "critical"));

    let actor: Option<String> =
        sqlx::query_scalar("SELECT actor_id FROM activity_log WHERE event_name = 'role_permission_override.updated'")
            .fetch_one(&pool)
            .await?;
    assert_eq!(actor, Some(admin.to_string()));

    // 5. The event store is an unbroken hash chain
    let chain: Vec<(String, Option<String>, String)> =
        sqlx::query_as("SELECT payload, prev_hash, hash FROM event_store ORDER BY rowid")
            .fetch_all(&pool)
            .await?;
    assert_eq!(chain.len(), 3);

    let mut prev: Option<String> = None;
    for (payload, prev_hash, hash) in &chain {
        assert_eq!(prev_hash, &prev);
        assert_eq!(hash, &chain_hash(prev.as_deref(), payload));
        prev = Some(hash.clone());
    }

    drop(core);
    listener.await?;
    Ok(())
}
