use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand};
use servex_config::{ServiceConfig, StoreBackend};
use servex_db::{InsertUserOutcome, Store};
use servex_schemas::{Role, User};
use std::sync::Arc;
use uuid::Uuid;

mod seed;

const ENV_NEW_USER_PASSWORD: &str = "SERVEX_NEW_USER_PASSWORD";

#[derive(Parser)]
#[command(name = "servex")]
#[command(about = "Servex restaurant ordering CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    cmd: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Database commands
    Db {
        #[command(subcommand)]
        cmd: DbCmd,
    },

    /// Compute layered config hash + print canonical JSON
    ConfigHash {
        /// Paths in merge order (base -> env -> site...)
        #[arg(required = true)]
        paths: Vec<String>,
    },

    /// Load demo staff, tables and menu into the configured store
    Seed,

    /// Staff account commands
    User {
        #[command(subcommand)]
        cmd: UserCmd,
    },
}

#[derive(Subcommand)]
enum DbCmd {
    Status,

    /// Apply SQL migrations.
    Migrate,
}

#[derive(Subcommand)]
enum UserCmd {
    /// Create an active staff account.
    Create {
        #[arg(long)]
        email: String,

        #[arg(long)]
        name: String,

        /// admin | kitchen
        #[arg(long)]
        role: String,

        /// Falls back to SERVEX_NEW_USER_PASSWORD so it stays out of shell history.
        #[arg(long)]
        password: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let _ = dotenvy::from_filename(".env.local");
    init_tracing();

    let cli = Cli::parse();

    match cli.cmd {
        Commands::Db { cmd } => {
            let cfg = load_config()?;
            let url = database_url(&cfg)?;
            let pool = servex_db::connect(&url, cfg.store.max_connections).await?;
            match cmd {
                DbCmd::Status => {
                    let s = servex_db::status(&pool).await?;
                    println!("db_ok={} has_orders_table={}", s.ok, s.has_orders_table);
                }
                DbCmd::Migrate => {
                    servex_db::migrate(&pool).await?;
                    println!("migrations_applied=true");
                }
            }
        }

        Commands::ConfigHash { paths } => {
            let path_refs: Vec<&str> = paths.iter().map(|s| s.as_str()).collect();
            let loaded = servex_config::load_layered_yaml(&path_refs)?;
            // Validate the typed view too, so a bad document fails here.
            loaded.service()?;
            println!("config_hash={}", loaded.config_hash);
            println!("{}", loaded.canonical_json);
        }

        Commands::Seed => {
            let cfg = load_config()?;
            let store = persistent_store(&cfg).await?;
            let report = seed::seed(store.as_ref(), &cfg.server.public_base_url).await?;
            println!("users_created={}", report.users_created);
            println!("tables_created={}", report.tables_created);
            println!("menu_items_created={}", report.menu_items_created);
        }

        Commands::User { cmd } => match cmd {
            UserCmd::Create {
                email,
                name,
                role,
                password,
            } => {
                let role = Role::parse(&role)?;
                let password = password
                    .or_else(|| std::env::var(ENV_NEW_USER_PASSWORD).ok())
                    .with_context(|| format!("pass --password or set {ENV_NEW_USER_PASSWORD}"))?;
                let email = servex_daemon::auth::normalize_email(&email)
                    .with_context(|| format!("invalid email '{email}'"))?;
                if password.chars().count() < servex_daemon::auth::MIN_PASSWORD_CHARS {
                    bail!(
                        "password must be at least {} characters",
                        servex_daemon::auth::MIN_PASSWORD_CHARS
                    );
                }
                let name = name.trim().to_string();
                if name.is_empty() {
                    bail!("name is required");
                }

                let cfg = load_config()?;
                let store = persistent_store(&cfg).await?;
                let user = User {
                    user_id: Uuid::new_v4(),
                    email,
                    name,
                    role,
                    password_hash: servex_daemon::auth::hash_password(&password)?,
                    is_active: true,
                    created_at: Utc::now(),
                };
                match store.insert_user(&user).await? {
                    InsertUserOutcome::Created(u) => {
                        println!("user_id={} email={} role={}", u.user_id, u.email, u.role.as_str());
                    }
                    InsertUserOutcome::EmailTaken => bail!("user already exists: {}", user.email),
                }
            }
        },
    }

    Ok(())
}

fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config() -> Result<ServiceConfig> {
    servex_config::load_from_env()?.service()
}

fn database_url(cfg: &ServiceConfig) -> Result<String> {
    let var = &cfg.store.database_url_env;
    std::env::var(var)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .with_context(|| format!("env var '{var}' (database url) is not set or empty"))
}

/// Writes through an in-memory store would vanish with the process.
async fn persistent_store(cfg: &ServiceConfig) -> Result<Arc<dyn Store>> {
    if cfg.store.backend == StoreBackend::Memory {
        bail!("store.backend is memory; point SERVEX_CONFIG at a postgres config to persist data");
    }
    let url = database_url(cfg)?;
    servex_db::connect_from_config(cfg, Some(&url)).await
}
