use std::collections::HashSet;
use std::path::Path;

use anyhow::Context;
use clap::{Parser, Subcommand};
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

use agri_authz::chat::RepairState;
use agri_authz::models::rbac::{Effect, Permission, Role};
use agri_authz::{db, seed, AccessRequest, AppError, AuthzConfig, AuthzCore};

#[derive(Parser, Debug)]
#[command(author, version, about = "Multi-tenant authorization core", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Apply pending migrations
    MigrateRun,
    /// Show migration status against the current database
    MigrateStatus,
    /// Insert well-known roles, the permission catalog and default grants
    Seed,
    /// Decide whether a user may perform `resource.action`
    Check {
        #[arg(long)]
        user: Uuid,
        /// Omit for the system scope
        #[arg(long)]
        org: Option<Uuid>,
        /// Permission as `resource.action`
        permission: String,
    },
    /// List everything a user may do in an organization
    Permissions {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        org: Option<Uuid>,
    },
    /// Set or remove an organization override for a role
    Override {
        #[arg(long)]
        org: Uuid,
        /// Role code, e.g. AUDITOR
        #[arg(long)]
        role: String,
        /// Permission as `resource.action`
        permission: String,
        /// ALLOW or DENY; omit together with --delete to remove the override
        #[arg(long, required_unless_present = "delete")]
        effect: Option<Effect>,
        #[arg(long)]
        actor: Uuid,
        #[arg(long, conflicts_with = "effect")]
        delete: bool,
    },
    /// Give a user a role in an organization (or the system scope)
    AssignRole {
        #[arg(long)]
        user: Uuid,
        #[arg(long)]
        org: Option<Uuid>,
        #[arg(long)]
        role: String,
        #[arg(long)]
        primary: bool,
    },
    /// Re-derive a channel's member organizations and fill in the missing ones
    Repair {
        #[arg(long)]
        channel: Uuid,
        #[arg(long)]
        user: Uuid,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    load_env();
    init_tracing();

    let cli = Cli::parse();
    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL not set")?;

    match cli.command {
        Commands::MigrateRun => {
            let pool = db::open(&database_url).await?;
            db::migrate(&pool).await?;
            println!("Migrations applied");
        }
        Commands::MigrateStatus => {
            let pool = db::open(&database_url).await?;
            let migrator = get_migrator().await?;
            print_status(&pool, &migrator).await?;
        }
        command => {
            let pool = db::connect(&database_url).await?;
            let (core, _) = AuthzCore::new(pool, AuthzConfig::from_env()?);
            let listener = core.spawn_activity_listener();

            let result = run(&core, command).await;

            // Dropping the last sender lets the listener drain and exit.
            drop(core);
            listener.await.context("activity listener panicked")?;
            result?;
        }
    }

    Ok(())
}

async fn run(core: &AuthzCore, command: Commands) -> anyhow::Result<()> {
    match command {
        Commands::Seed => {
            let report = seed::seed_reference_data(&core.resolver).await?;
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        Commands::Check { user, org, permission } => {
            let request = AccessRequest::from_qualified(user, org, &permission)
                .with_context(|| format!("expected resource.action, got {permission}"))?;
            let allowed = core.resolver.check(&request).await?;
            println!("{}", if allowed { "ALLOW" } else { "DENY" });
        }
        Commands::Permissions { user, org } => {
            let permissions = core.resolver.get_user_permissions(user, org).await?;
            println!("{}", serde_json::to_string_pretty(&permissions)?);
        }
        Commands::Override {
            org,
            role,
            permission,
            effect,
            actor,
            delete,
        } => {
            let role = find_role(core, &role).await?;
            let permission = find_permission(core, &permission).await?;

            if delete {
                let removed = core
                    .resolver
                    .delete_permission_override(org, role.id, permission.id, Some(actor))
                    .await?;
                println!("{}", if removed { "Override removed" } else { "No override to remove" });
            } else {
                let effect = effect.context("--effect is required")?;
                let outcome = core
                    .resolver
                    .create_permission_override(org, role.id, permission.id, effect, actor)
                    .await?;
                println!("{}", serde_json::to_string_pretty(&outcome)?);
            }
        }
        Commands::AssignRole { user, org, role, primary } => {
            let role = find_role(core, &role).await?;
            let assignment = core.resolver.assign_role(user, org, role.id, primary, None).await?;
            println!("{}", serde_json::to_string_pretty(&assignment)?);
        }
        Commands::Repair { channel, user } => {
            let state: RepairState = core.repair.run(channel, user).await?;
            println!("{}", serde_json::to_string_pretty(&state)?);
        }
        Commands::MigrateRun | Commands::MigrateStatus => {
            anyhow::bail!("migration commands run without the authorization core")
        }
    }

    Ok(())
}

async fn find_role(core: &AuthzCore, code: &str) -> Result<Role, AppError> {
    core.resolver
        .permission_store()
        .find_role_by_code(&code.to_ascii_uppercase())
        .await?
        .ok_or_else(|| AppError::not_found(format!("role {code} not found")))
}

async fn find_permission(core: &AuthzCore, qualified: &str) -> Result<Permission, AppError> {
    let (resource, action) = qualified
        .rsplit_once('.')
        .ok_or_else(|| AppError::bad_request(format!("expected resource.action, got {qualified}")))?;
    core.resolver
        .permission_store()
        .find_permission(resource, action)
        .await?
        .ok_or_else(|| AppError::not_found(format!("permission {qualified} not found")))
}

async fn print_status(pool: &SqlitePool, migrator: &sqlx::migrate::Migrator) -> anyhow::Result<()> {
    // If the migrations table doesn't exist, nothing is applied yet
    let tracked: Option<String> =
        sqlx::query_scalar("SELECT name FROM sqlite_master WHERE type='table' AND name='_sqlx_migrations'")
            .fetch_optional(pool)
            .await?;
    let applied_versions: HashSet<i64> = if tracked.is_some() {
        let rows = sqlx::query("SELECT version FROM _sqlx_migrations WHERE success = 1")
            .fetch_all(pool)
            .await?;
        rows.iter().filter_map(|row| row.try_get::<i64, _>("version").ok()).collect()
    } else {
        HashSet::new()
    };

    println!("{:<8} {:<20} {}", "Status", "Version", "Name");
    for migration in migrator.iter() {
        let status = if applied_versions.contains(&migration.version) { "applied" } else { "pending" };
        let desc = migration.description.as_ref().trim();
        let name = if desc.is_empty() { "unknown" } else { desc };
        println!("{:<8} {:<20} {}", status, migration.version, name);
    }

    Ok(())
}

async fn get_migrator() -> anyhow::Result<sqlx::migrate::Migrator> {
    let local = Path::new("./migrations");
    let migrator_path = if local.exists() {
        local.to_path_buf()
    } else {
        Path::new(env!("CARGO_MANIFEST_DIR")).join("migrations")
    };

    let migrator_path_display = migrator_path.display().to_string();
    sqlx::migrate::Migrator::new(migrator_path)
        .await
        .with_context(|| format!("failed to load migrations from {}", migrator_path_display))
}

fn load_env() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    let crate_env = Path::new(env!("CARGO_MANIFEST_DIR")).join(".env");
    let _ = dotenvy::from_path(crate_env);
}

fn init_tracing() {
    use tracing_subscriber::layer::SubscriberExt;
    use tracing_subscriber::util::SubscriberInitExt;

    let fmt_layer = tracing_subscriber::fmt::layer()
        .with_target(false)
        .with_thread_ids(false)
        .with_thread_names(false)
        .with_writer(std::io::stderr);

    let filter_layer = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));

    tracing_subscriber::registry()
        .with(filter_layer)
        .with(fmt_layer)
        .init();
}
