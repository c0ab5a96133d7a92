//! `qcbroker-server` — the CLI entry point. Out of the
//! engine's scope by design: this binary only parses
//! arguments, loads config, wires the port implementations together, and
//! hands control to `qcbroker-web`/`qcbroker-core`.

mod config;
mod local_manager;

use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use colored::Colorize;
use sqlx::postgres::PgPoolOptions;

use qcbroker_core::manager_service::ManagerService;
use qcbroker_core::principal::Permission;
use qcbroker_core::queue_service::QueueService;
use qcbroker_core::record_service::RecordService;
use qcbroker_core::runner::JobRunner;
use qcbroker_core::service_engine::ServiceEngine;
use qcbroker_core::variants::default_registry;
use qcbroker_postgres::PgStores;
use qcbroker_web::AppState;

use config::ServerFileConfig;

const EXIT_OK: u8 = 0;
const EXIT_USAGE: u8 = 2;
const EXIT_CONFIG: u8 = 3;
const EXIT_DATABASE: u8 = 4;
const EXIT_MIGRATION_REQUIRED: u8 = 5;

#[derive(Parser)]
#[command(name = "qcbroker-server")]
#[command(author, version, about = "Persistent compute broker and result archive")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create the config directory and write the default config file.
    Init {
        #[arg(long, default_value = "./qcbroker")]
        base_folder: PathBuf,
    },
    /// Run the server.
    Start {
        #[arg(long, default_value = "./qcbroker")]
        base_folder: PathBuf,
        #[arg(long)]
        port: Option<u16>,
        #[arg(long)]
        log_file: Option<PathBuf>,
        /// Spin up N in-process fake managers for local testing.
        #[arg(long)]
        local_manager: Option<u32>,
    },
    /// Apply any migrations registered since the database was created.
    Upgrade {
        #[arg(long, default_value = "./qcbroker")]
        base_folder: PathBuf,
    },
    /// Manage users and permissions.
    User {
        #[command(subcommand)]
        command: UserCommands,
        #[arg(long, default_value = "./qcbroker")]
        base_folder: PathBuf,
    },
}

#[derive(Subcommand)]
enum UserCommands {
    Add {
        username: String,
        #[arg(long, value_delimiter = ',', default_value = "read")]
        permissions: Vec<String>,
    },
    Show {
        username: String,
    },
    Modify {
        username: String,
        #[arg(long, value_delimiter = ',')]
        permissions: Vec<String>,
    },
    Remove {
        username: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Init { base_folder } => run_init(&base_folder),
        Commands::Start { base_folder, port, log_file, local_manager } => {
            run_start(base_folder, port, log_file, local_manager).await
        }
        Commands::Upgrade { base_folder } => run_upgrade(&base_folder).await,
        Commands::User { command, base_folder } => run_user(&base_folder, command).await,
    };

    match result {
        Ok(()) => ExitCode::from(EXIT_OK),
        Err(e) => {
            eprintln!("{} {}", "error:".red().bold(), e);
            ExitCode::from(e.exit_code())
        }
    }
}

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error("{0}")]
    Usage(String),
    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),
    #[error("database unavailable: {0}")]
    Database(anyhow::Error),
    #[error("migration required: {0}")]
    MigrationRequired(anyhow::Error),
}

impl CliError {
    fn exit_code(&self) -> u8 {
        match self {
            Self::Usage(_) => EXIT_USAGE,
            Self::Config(_) => EXIT_CONFIG,
            Self::Database(_) => EXIT_DATABASE,
            Self::MigrationRequired(_) => EXIT_MIGRATION_REQUIRED,
        }
    }
}

fn run_init(base_folder: &std::path::Path) -> Result<(), CliError> {
    let cfg = config::init(base_folder)?;
    println!(
        "{} initialized broker config at {}",
        "ok:".green().bold(),
        config::config_path(base_folder).display()
    );
    println!("  database_url = {}", cfg.server.database_url);
    println!("  bind_address = {}", cfg.server.bind_address);
    println!("run `qcbroker-server upgrade` once a database is reachable at database_url.");
    Ok(())
}

async fn connect(cfg: &ServerFileConfig) -> Result<sqlx::PgPool, CliError> {
    PgPoolOptions::new()
        .max_connections(10)
        .connect(&cfg.server.database_url)
        .await
        .map_err(|e| CliError::Database(e.into()))
}

async fn run_upgrade(base_folder: &std::path::Path) -> Result<(), CliError> {
    let cfg = config::load(base_folder)?;
    let pool = connect(&cfg).await?;
    sqlx::migrate!("../qcbroker-postgres/migrations")
        .run(&pool)
        .await
        .map_err(|e| CliError::MigrationRequired(e.into()))?;
    println!("{} schema is up to date", "ok:".green().bold());
    Ok(())
}

/// Whether every registered migration has already been applied, without
/// applying anything. `start` refuses to run schema it hasn't been told to
/// adopt — only `upgrade` applies migrations.
async fn migrations_current(pool: &sqlx::PgPool) -> anyhow::Result<bool> {
    let migrator = sqlx::migrate!("../qcbroker-postgres/migrations");
    let total = migrator.migrations.len() as i64;
    let applied: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM _sqlx_migrations WHERE success")
        .fetch_one(pool)
        .await
        .unwrap_or(0);
    Ok(applied >= total)
}

/// Every port trait the running server needs, as type-erased `Arc`s. Built
/// once from one `PgStores` so `AppState`, the `ServiceEngine`, and the
/// `JobRunner` all share the same pool-backed adapters instead of each
/// opening its own.
struct Wiring {
    state: AppState,
    tasks: Arc<dyn qcbroker_core::ports::TaskQueuePort>,
    services: Arc<dyn qcbroker_core::ports::ServiceQueuePort>,
}

fn build_wiring(stores: PgStores, cfg: ServerFileConfig) -> Wiring {
    let config = Arc::new(cfg.server);
    let molecules: Arc<dyn qcbroker_core::ports::MoleculeStore> = Arc::new(stores.molecules);
    let keyword_sets: Arc<dyn qcbroker_core::ports::KeywordSetStore> = Arc::new(stores.keyword_sets);
    let specifications: Arc<dyn qcbroker_core::ports::SpecificationStore> = Arc::new(stores.specifications);
    let records: Arc<dyn qcbroker_core::ports::RecordStore> = Arc::new(stores.records);
    let tasks: Arc<dyn qcbroker_core::ports::TaskQueuePort> = Arc::new(stores.tasks);
    let services: Arc<dyn qcbroker_core::ports::ServiceQueuePort> = Arc::new(stores.services);
    let managers: Arc<dyn qcbroker_core::ports::ManagerRegistryPort> = Arc::new(stores.managers);
    let blobs: Arc<dyn qcbroker_core::ports::BlobStorePort> = Arc::new(stores.blobs);
    let users = Arc::new(stores.users);

    let record_service = Arc::new(RecordService::new(
        molecules.clone(),
        keyword_sets.clone(),
        specifications.clone(),
        records.clone(),
        tasks.clone(),
        services.clone(),
    ));
    let queue_service = Arc::new(QueueService::new(tasks.clone(), records.clone(), managers.clone()));
    let manager_service = Arc::new(ManagerService::new(managers.clone()));

    let state = AppState {
        molecules,
        keyword_sets,
        specifications,
        records,
        blobs,
        managers,
        record_service,
        queue_service,
        manager_service,
        users,
        config,
    };

    Wiring { state, tasks, services }
}

async fn run_start(
    base_folder: PathBuf,
    port: Option<u16>,
    log_file: Option<PathBuf>,
    local_manager: Option<u32>,
) -> Result<(), CliError> {
    let cfg = config::load(&base_folder)?;

    let _log_guard = log_file
        .map(|path| {
            let dir = path.parent().unwrap_or(&base_folder).to_path_buf();
            let name = path
                .file_name()
                .map(|n| n.to_owned())
                .unwrap_or_else(|| std::ffi::OsString::from("qcbroker.log"));
            let appender = tracing_appender::rolling::never(dir, name);
            let (non_blocking, guard) = tracing_appender::non_blocking(appender);
            tracing_subscriber::fmt().with_writer(non_blocking).with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
            guard
        })
        .or_else(|| {
            tracing_subscriber::fmt().with_env_filter(tracing_subscriber::EnvFilter::from_default_env()).init();
            None
        });

    let pool = connect(&cfg).await?;
    if !migrations_current(&pool).await.map_err(CliError::MigrationRequired)? {
        return Err(CliError::MigrationRequired(anyhow::anyhow!(
            "schema is behind; run `qcbroker-server upgrade` first"
        )));
    }

    let stores = PgStores::new(pool);
    let bind_address = match port {
        Some(p) => format!("0.0.0.0:{p}"),
        None => cfg.server.bind_address.clone(),
    };
    let service_tick_interval = cfg.server.service_tick_interval_seconds;
    let runner_config = cfg.server.clone();

    let Wiring { state, tasks, services } = build_wiring(stores, cfg);

    let registry = default_registry();
    let service_engine = Arc::new(ServiceEngine::new(
        services.clone(),
        state.records.clone(),
        state.specifications.clone(),
        state.blobs.clone(),
        state.record_service.clone(),
        registry,
    ));

    let runner = JobRunner::new(
        state.records.clone(),
        tasks,
        services,
        state.managers.clone(),
        service_engine,
        state.record_service.clone(),
        runner_config,
    );

    if let Some(n) = local_manager {
        local_manager::spawn(state.clone(), n);
    }

    tokio::spawn(async move {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(service_tick_interval.max(1)));
        loop {
            interval.tick().await;
            match runner.tick().await {
                Ok(report) => tracing::info!(?report, "internal job runner tick"),
                Err(e) => tracing::warn!(error = %e, "internal job runner tick failed"),
            }
        }
    });

    let router = qcbroker_web::build_router(state);
    let listener = tokio::net::TcpListener::bind(&bind_address)
        .await
        .map_err(|e| CliError::Database(e.into()))?;
    println!("{} listening on {}", "ok:".green().bold(), bind_address);

    let shutdown = async {
        let ctrl_c = async { tokio::signal::ctrl_c().await.expect("ctrl_c handler") };
        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("terminate handler")
                .recv()
                .await;
        };
        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();
        tokio::select! {
            _ = ctrl_c => {},
            _ = terminate => {},
        }
        tracing::info!("shutdown signal received, quiescing in-flight handlers");
    };

    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown)
        .await
        .map_err(|e| CliError::Database(e.into()))?;
    Ok(())
}

async fn run_user(base_folder: &std::path::Path, command: UserCommands) -> Result<(), CliError> {
    let cfg = config::load(base_folder)?;
    let pool = connect(&cfg).await?;
    let users = qcbroker_postgres::PgUserStore::new(pool);

    match command {
        UserCommands::Add { username, permissions } => {
            let perms = parse_permissions(&permissions)?;
            let token = uuid::Uuid::new_v4().to_string();
            users
                .create(&username, &token, &perms)
                .await
                .map_err(|e| CliError::Database(anyhow::anyhow!(e)))?;
            println!("{} created user {username}", "ok:".green().bold());
            println!("  token = {token}");
            println!("  permissions = {}", permissions.join(","));
        }
        UserCommands::Show { username } => {
            let perms = users
                .get_permissions(&username)
                .await
                .map_err(|e| CliError::Database(anyhow::anyhow!(e)))?
                .ok_or_else(|| CliError::Usage(format!("unknown user {username}")))?;
            let names: Vec<&str> = perms.iter().map(|p| p.as_str()).collect();
            println!("{username}: {}", names.join(","));
        }
        UserCommands::Modify { username, permissions } => {
            let perms = parse_permissions(&permissions)?;
            users
                .set_permissions(&username, &perms)
                .await
                .map_err(|e| CliError::Database(anyhow::anyhow!(e)))?;
            println!("{} updated permissions for {username}", "ok:".green().bold());
        }
        UserCommands::Remove { username } => {
            users
                .remove(&username)
                .await
                .map_err(|e| CliError::Database(anyhow::anyhow!(e)))?;
            println!("{} removed user {username}", "ok:".green().bold());
        }
    }
    Ok(())
}

fn parse_permissions(raw: &[String]) -> Result<std::collections::BTreeSet<Permission>, CliError> {
    raw.iter()
        .map(|s| match s.as_str() {
            "read" => Ok(Permission::Read),
            "write" => Ok(Permission::Write),
            "compute" => Ok(Permission::Compute),
            "queue" => Ok(Permission::Queue),
            "admin" => Ok(Permission::Admin),
            other => Err(CliError::Usage(format!("unknown permission '{other}'"))),
        })
        .collect()
}
