use casework_core::{LedgerStorageConfig, ReconciliationScheduler, SchedulerConfig};
use casework_service::{build_router, ServiceConfig, ServiceState};
use clap::{Parser, ValueEnum};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::info;

#[derive(Debug, Clone, Copy, ValueEnum)]
enum LedgerStorageMode {
    Auto,
    Memory,
    Postgres,
}

#[derive(Debug, Clone, Copy, ValueEnum, PartialEq, Eq)]
enum RunMode {
    Production,
    Mock,
}

#[derive(Debug, Parser)]
#[command(name = "caseworkd", version, about = "Case-management backend")]
struct Cli {
    /// REST + websocket socket address to bind, e.g. 127.0.0.1:8080
    #[arg(long, default_value = "127.0.0.1:8080", env = "PORT")]
    listen: SocketAddr,
    /// `production` uses real payee rails; `mock` runs the bundled simulation harnesses.
    #[arg(long, value_enum, default_value_t = RunMode::Mock, env = "MODE")]
    mode: RunMode,
    /// File used to persist the ledger signing key, generated on first boot if absent.
    #[arg(long, default_value = "casework/data/signing.key")]
    key_path: PathBuf,
    /// Ledger persistence backend. `auto` picks postgres when a database url is configured.
    #[arg(long, value_enum, default_value_t = LedgerStorageMode::Auto, env = "CASEWORK_LEDGER_STORAGE")]
    ledger_storage: LedgerStorageMode,
    /// PostgreSQL url for ledger persistence.
    #[arg(long, env = "CASEWORK_LEDGER_DATABASE_URL")]
    ledger_database_url: Option<String>,
    /// Max PostgreSQL pool connections for ledger persistence.
    #[arg(long, default_value_t = 5, env = "CASEWORK_LEDGER_PG_MAX_CONNECTIONS")]
    ledger_pg_max_connections: u32,
    /// PostgreSQL url backing the projection/chat/idempotency stores.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
    /// Max PostgreSQL pool connections for the projection/chat/idempotency stores.
    #[arg(long, default_value_t = 10, env = "CASEWORK_PG_MAX_CONNECTIONS")]
    pg_max_connections: u32,
    /// Enable the periodic lifecycle reconciliation scheduler.
    #[arg(long, default_value_t = true, env = "ENABLE_LIFECYCLE_SCHEDULER")]
    enable_lifecycle_scheduler: bool,
    /// Interval between reconciliation sweeps, in milliseconds.
    #[arg(long, default_value_t = 86_400_000, env = "LIFECYCLE_INTERVAL_MS")]
    lifecycle_interval_ms: u64,
    /// Delay before the first reconciliation sweep, in milliseconds.
    #[arg(long, default_value_t = 0, env = "LIFECYCLE_INITIAL_DELAY_MS")]
    lifecycle_initial_delay_ms: u64,
    /// Run one reconciliation sweep immediately on boot, before the first interval tick.
    #[arg(long, default_value_t = false, env = "LIFECYCLE_RUN_IMMEDIATELY")]
    lifecycle_run_immediately: bool,
    /// Delay between tenants within a single reconciliation sweep, in milliseconds.
    #[arg(long, default_value_t = 100, env = "LIFECYCLE_PER_TENANT_DELAY_MS")]
    lifecycle_per_tenant_delay_ms: u64,
    /// Typing-indicator throttle window, in milliseconds.
    #[arg(long, default_value_t = 300, env = "TYPING_THROTTLE_MS")]
    typing_throttle_ms: u64,
    /// Stall timeout for authorized-but-unexecuted disbursements, in milliseconds.
    #[arg(long, default_value_t = 86_400_000, env = "DISBURSEMENT_EXECUTION_TIMEOUT_MS")]
    disbursement_execution_timeout_ms: i64,
}

fn resolve_ledger_storage(cli: &Cli) -> anyhow::Result<LedgerStorageConfig> {
    let resolved_url = cli
        .ledger_database_url
        .clone()
        .or_else(|| std::env::var("DATABASE_URL").ok());

    let storage = match cli.ledger_storage {
        LedgerStorageMode::Memory => LedgerStorageConfig::Memory,
        LedgerStorageMode::Postgres => {
            let database_url = resolved_url.ok_or_else(|| {
                anyhow::anyhow!(
                    "ledger_storage=postgres requires --ledger-database-url or DATABASE_URL"
                )
            })?;
            LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
        }
        LedgerStorageMode::Auto => {
            if let Some(database_url) = resolved_url {
                LedgerStorageConfig::postgres(database_url, cli.ledger_pg_max_connections)
            } else {
                LedgerStorageConfig::Memory
            }
        }
    };

    Ok(storage)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "casework_service=info,info".to_string()),
        )
        .init();

    let cli = Cli::parse();
    let ledger_storage = resolve_ledger_storage(&cli)?;
    info!(mode = ?cli.mode, backend = ledger_storage.label(), "starting casework-service");

    let config = ServiceConfig {
        ledger_storage,
        key_path: cli.key_path,
        database_url: cli.database_url,
        max_connections: cli.pg_max_connections,
        typing_throttle_ms: cli.typing_throttle_ms,
    };
    let state = ServiceState::bootstrap(config).await?;
    let app = build_router(state.clone());

    let scheduler = Arc::new(ReconciliationScheduler::new(SchedulerConfig {
        enabled: cli.enable_lifecycle_scheduler,
        interval_ms: cli.lifecycle_interval_ms,
        initial_delay_ms: cli.lifecycle_initial_delay_ms,
        run_immediately: cli.lifecycle_run_immediately,
        per_tenant_delay_ms: cli.lifecycle_per_tenant_delay_ms,
    }));

    let scheduler_handle = {
        let scheduler = scheduler.clone();
        let projections = state.projections.clone();
        let ledger = state.ledger.clone();
        let lock_pool = state.lock_pool.clone();
        tokio::spawn(async move {
            scheduler.run(projections, ledger, lock_pool).await;
        })
    };

    let listener = tokio::net::TcpListener::bind(cli.listen).await?;
    info!("casework-service listening on {}", listener.local_addr()?);

    let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal());
    server.await?;

    scheduler.stop();
    scheduler_handle.await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    tracing::info!("shutdown signal received, draining connections");
}
