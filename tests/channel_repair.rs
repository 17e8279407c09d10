use std::collections::BTreeSet;

use anyhow::{Context, Result};
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use tempfile::{tempdir, TempDir};
use uuid::Uuid;

use agri_authz::chat::{RepairFailure, RepairState, CHANNEL_ACCESS_DENIED};
use agri_authz::models::chat::{ChannelContext, WorkOrder};
use agri_authz::store::ChannelStore;
use agri_authz::{AppError, AuthzConfig, AuthzCore};

async fn setup_with(config: AuthzConfig) -> Result<(TempDir, AuthzCore)> {
    let dir = tempdir().context("failed to create tempdir")?;
    let opts = SqliteConnectOptions::new()
        .filename(dir.path().join("test.db"))
        .create_if_missing(true);
    let pool = SqlitePool::connect_with(opts).await?;

    let migrator =
        sqlx::migrate::Migrator::new(std::path::Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")).await?;
    migrator.run(&pool).await?;

    let (core, _rx) = AuthzCore::new(pool, config);
    Ok((dir, core))
}

async fn setup() -> Result<(TempDir, AuthzCore)> {
    setup_with(AuthzConfig::default()).await
}

async fn work_order_channel(core: &AuthzCore) -> Result<(WorkOrder, Uuid)> {
    let work_order = WorkOrder {
        id: Uuid::new_v4(),
        farming_organization_id: Uuid::new_v4(),
        fsp_organization_id: Uuid::new_v4(),
    };
    let channels = core.repair.channels();
    channels.insert_work_order(&work_order).await?;
    let channel = channels
        .create_channel(&ChannelContext::WorkOrder(work_order.id), Some("work order chat"))
        .await?;
    Ok((work_order, channel.id))
}

async fn attach(core: &AuthzCore, channel_id: Uuid, organization_id: Uuid) -> Result<()> {
    let mut conn = core.pool.acquire().await?;
    ChannelStore::add_member(&mut *conn, channel_id, organization_id).await?;
    Ok(())
}

#[tokio::test]
async fn complete_channel_is_left_alone() -> Result<()> {
    let (_dir, core) = setup().await?;
    let (wo, channel) = work_order_channel(&core).await?;
    attach(&core, channel, wo.farming_organization_id).await?;
    attach(&core, channel, wo.fsp_organization_id).await?;

    let inserted = core.repair.repair_channel_membership(channel, Uuid::new_v4()).await?;
    assert!(!inserted);

    let state = core.repair.run(channel, Uuid::new_v4()).await?;
    assert_eq!(
        state,
        RepairState::RepairFailed {
            failure: RepairFailure::NothingMissing
        }
    );
    assert_eq!(core.repair.channels().list_members(channel).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn work_order_channel_gets_exactly_the_missing_org() -> Result<()> {
    let (_dir, core) = setup().await?;
    let (wo, channel) = work_order_channel(&core).await?;
    attach(&core, channel, wo.farming_organization_id).await?;

    let state = core.repair.run(channel, Uuid::new_v4()).await?;
    assert_eq!(
        state,
        RepairState::RepairSucceeded {
            inserted: vec![wo.fsp_organization_id]
        }
    );

    let members = core.repair.channels().member_organizations(channel).await?;
    assert_eq!(
        members,
        BTreeSet::from([wo.farming_organization_id, wo.fsp_organization_id])
    );

    // Second run has nothing left to do.
    assert!(!core.repair.repair_channel_membership(channel, Uuid::new_v4()).await?);
    Ok(())
}

#[tokio::test]
async fn work_order_repair_ignores_the_requesting_users_orgs() -> Result<()> {
    let (_dir, core) = setup().await?;
    let (wo, channel) = work_order_channel(&core).await?;

    let user = Uuid::new_v4();
    let unrelated_org = Uuid::new_v4();
    core.resolver.membership_store().add_member(user, unrelated_org).await?;

    assert!(core.repair.repair_channel_membership(channel, user).await?);

    let members = core.repair.channels().member_organizations(channel).await?;
    assert_eq!(
        members,
        BTreeSet::from([wo.farming_organization_id, wo.fsp_organization_id])
    );
    assert!(!core.repair.user_can_access_channel(channel, user).await?);
    Ok(())
}

#[tokio::test]
async fn organization_channel_adds_target_and_users_active_orgs() -> Result<()> {
    let (_dir, core) = setup().await?;
    let target = Uuid::new_v4();
    let channel = core
        .repair
        .channels()
        .create_channel(&ChannelContext::Organization(target), None)
        .await?;

    let user = Uuid::new_v4();
    let home = Uuid::new_v4();
    let former = Uuid::new_v4();
    let membership = core.resolver.membership_store();
    membership.add_member(user, home).await?;
    membership.add_member(user, former).await?;
    core.resolver
        .set_member_status(user, former, "REMOVED".parse()?, None)
        .await?;

    assert!(core.repair.repair_channel_membership(channel.id, user).await?);

    let members = core.repair.channels().member_organizations(channel.id).await?;
    assert_eq!(members, BTreeSet::from([target, home]));
    Ok(())
}

#[tokio::test]
async fn unsupported_or_missing_context_fails_terminally() -> Result<()> {
    let (_dir, core) = setup().await?;

    let state = core.repair.run(Uuid::new_v4(), Uuid::new_v4()).await?;
    assert_eq!(
        state,
        RepairState::RepairFailed {
            failure: RepairFailure::ChannelNotFound
        }
    );

    let orphan = Uuid::new_v4();
    let channel = core
        .repair
        .channels()
        .create_channel(&ChannelContext::WorkOrder(orphan), None)
        .await?;
    let state = core.repair.run(channel.id, Uuid::new_v4()).await?;
    assert_eq!(
        state,
        RepairState::RepairFailed {
            failure: RepairFailure::WorkOrderNotFound(orphan)
        }
    );

    let direct = Uuid::new_v4();
    sqlx::query("INSERT INTO chat_channels (id, context_type, context_id, name, created_at) VALUES (?, 'DIRECT', ?, NULL, ?)")
        .bind(direct.to_string())
        .bind(Uuid::new_v4().to_string())
        .bind(chrono::Utc::now())
        .execute(&core.pool)
        .await?;
    let state = core.repair.run(direct, Uuid::new_v4()).await?;
    assert_eq!(
        state,
        RepairState::RepairFailed {
            failure: RepairFailure::UnsupportedContext("DIRECT".to_string())
        }
    );
    Ok(())
}

#[tokio::test]
async fn ensure_access_repairs_then_retries_once() -> Result<()> {
    let (_dir, core) = setup().await?;
    let (wo, channel) = work_order_channel(&core).await?;

    let fsp_user = Uuid::new_v4();
    core.resolver
        .membership_store()
        .add_member(fsp_user, wo.fsp_organization_id)
        .await?;

    assert!(!core.repair.user_can_access_channel(channel, fsp_user).await?);
    core.repair.ensure_channel_access(channel, fsp_user).await?;
    assert!(core.repair.user_can_access_channel(channel, fsp_user).await?);
    Ok(())
}

#[tokio::test]
async fn ensure_access_surfaces_denial_after_failed_retry() -> Result<()> {
    let (_dir, core) = setup().await?;
    let (_wo, channel) = work_order_channel(&core).await?;

    // Repair inserts the work order orgs, but this user belongs to neither.
    let stranger = Uuid::new_v4();
    core.resolver.membership_store().add_member(stranger, Uuid::new_v4()).await?;

    let err = core.repair.ensure_channel_access(channel, stranger).await.unwrap_err();
    assert!(matches!(&err, AppError::Forbidden(msg) if msg == CHANNEL_ACCESS_DENIED));

    // Nothing left to repair: same denial, no retry.
    let err = core.repair.ensure_channel_access(channel, stranger).await.unwrap_err();
    assert!(err.is_forbidden());
    assert_eq!(core.repair.channels().list_members(channel).await?.len(), 2);
    Ok(())
}

#[tokio::test]
async fn disabled_repair_never_writes() -> Result<()> {
    let config = AuthzConfig {
        channel_repair_enabled: false,
        ..AuthzConfig::default()
    };
    let (_dir, core) = setup_with(config).await?;
    let (wo, channel) = work_order_channel(&core).await?;
    let user = Uuid::new_v4();
    core.resolver
        .membership_store()
        .add_member(user, wo.farming_organization_id)
        .await?;

    let state = core.repair.run(channel, user).await?;
    assert_eq!(
        state,
        RepairState::RepairFailed {
            failure: RepairFailure::Disabled
        }
    );
    assert!(core.repair.ensure_channel_access(channel, user).await.is_err());
    assert!(core.repair.channels().list_members(channel).await?.is_empty());
    Ok(())
}
