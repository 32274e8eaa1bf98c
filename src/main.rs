// fastpubsub
// ----------
// Durable pub/sub broker with PostgreSQL as the sole persistent substrate.
// This binary is a thin CLI shell over the library crate: it parses the
// subcommand, builds a tokio runtime sized from configuration, and hands
// off to the server or to one of the maintenance jobs.
//
// Subcommands:
// - db-migrate               apply embedded sqlx migrations
// - server                   run the HTTP API
// - cleanup_acked_messages   one sweeper pass deleting old acked rows
// - cleanup_stuck_messages   one sweeper pass releasing expired leases
// - generate_secret_key      print a fresh random secret
// - create_client            provision an API client and print credentials
//
// The sweepers are idempotent single passes intended to be scheduled
// externally (cron / Kubernetes CronJob); they do not loop in-process.
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use fastpubsub::app::{build_router, AppState};
use fastpubsub::auth::{scope, secret};
use fastpubsub::config::Settings;
use fastpubsub::model::NewClient;
use fastpubsub::observability;
use fastpubsub::store::postgres::PostgresStore;
use fastpubsub::store::BrokerStore;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "fastpubsub")]
#[command(about = "Durable pub/sub broker backed by PostgreSQL")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run database migrations to upgrade to the latest schema.
    #[command(name = "db-migrate")]
    DbMigrate,
    /// Start the HTTP API server.
    #[command(name = "server")]
    Server,
    /// Remove acknowledged messages older than the configured threshold.
    #[command(name = "cleanup_acked_messages")]
    CleanupAckedMessages,
    /// Release leases held longer than the configured lock timeout.
    #[command(name = "cleanup_stuck_messages")]
    CleanupStuckMessages,
    /// Generate a new random secret key.
    #[command(name = "generate_secret_key")]
    GenerateSecretKey,
    /// Create a new API client with the given name and scopes.
    #[command(name = "create_client")]
    CreateClient {
        /// The client name.
        name: String,
        /// The client scopes (space separated).
        #[arg(default_value = "*")]
        scopes: String,
        /// Whether the client can authenticate.
        #[arg(default_value_t = true)]
        is_active: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    // generate_secret_key needs neither configuration nor a runtime.
    if let Command::GenerateSecretKey = cli.command {
        println!("new_secret={}", secret::generate_secret());
        return Ok(());
    }

    let settings = Settings::from_env()?;
    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(settings.api_num_workers)
        .enable_all()
        .build()
        .context("build tokio runtime")?;

    match cli.command {
        Command::GenerateSecretKey => unreachable!("handled above"),
        Command::DbMigrate => runtime.block_on(db_migrate(settings)),
        Command::Server => runtime.block_on(serve(settings)),
        Command::CleanupAckedMessages => runtime.block_on(cleanup_acked(settings)),
        Command::CleanupStuckMessages => runtime.block_on(cleanup_stuck(settings)),
        Command::CreateClient {
            name,
            scopes,
            is_active,
        } => runtime.block_on(create_client(settings, name, scopes, is_active)),
    }
}

async fn db_migrate(settings: Settings) -> Result<()> {
    observability::init_observability("fastpubsub", &settings.log_level);
    tracing::info!("starting db-migrate command");
    let store = PostgresStore::connect(&settings).await?;
    store.run_migrations().await?;
    tracing::info!("finished db-migrate command");
    Ok(())
}

async fn serve(settings: Settings) -> Result<()> {
    let metrics = observability::init_observability("fastpubsub", &settings.log_level);
    let store = PostgresStore::connect(&settings).await?;
    let addr = settings.bind_addr();
    let state = AppState {
        store: Arc::new(store),
        settings: Arc::new(settings),
        metrics,
    };
    let app = build_router(state);
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("bind {addr}"))?;
    tracing::info!(%addr, "serving HTTP API");
    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("serve HTTP API")?;
    Ok(())
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}

async fn cleanup_acked(settings: Settings) -> Result<()> {
    observability::init_observability("fastpubsub", &settings.log_level);
    tracing::info!("starting cleanup_acked_messages command");
    let store = PostgresStore::connect(&settings).await?;
    let deleted = store
        .sweep_acked(
            settings.cleanup_acked_messages_older_than_seconds,
            settings.cleanup_batch_size,
        )
        .await?;
    tracing::info!(deleted, "finished cleanup_acked_messages command");
    Ok(())
}

async fn cleanup_stuck(settings: Settings) -> Result<()> {
    observability::init_observability("fastpubsub", &settings.log_level);
    tracing::info!("starting cleanup_stuck_messages command");
    let store = PostgresStore::connect(&settings).await?;
    let released = store
        .sweep_stuck(
            settings.cleanup_stuck_messages_lock_timeout_seconds,
            settings.cleanup_batch_size,
        )
        .await?;
    tracing::info!(released, "finished cleanup_stuck_messages command");
    Ok(())
}

async fn create_client(
    settings: Settings,
    name: String,
    scopes: String,
    is_active: bool,
) -> Result<()> {
    observability::init_observability("fastpubsub", &settings.log_level);
    scope::validate_scopes(&scopes).map_err(|msg| anyhow::anyhow!(msg))?;
    let store = PostgresStore::connect(&settings).await?;
    let created = store
        .create_client(NewClient {
            name,
            scopes,
            is_active,
        })
        .await?;
    println!("client_id={}", created.id);
    println!("client_secret={}", created.secret);
    Ok(())
}
