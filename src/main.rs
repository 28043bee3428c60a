mod api;
mod config;
mod db;
mod docker;
mod error;
mod pool;
mod storage;

#[cfg(test)]
mod testing;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::Config;
use crate::db::identity::validate_identifier;
use crate::db::instance::Principal;
use crate::pool::{shutdown_signal, Coordinator, ProcessLauncher, Scaler};
use crate::storage::CatalogStore;

#[derive(Parser)]
#[command(name = "pgdock", about = "Per-tenant Postgres instances in containers")]
struct Cli {
    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand)]
enum Command {
    /// Run the coordinator and its worker pool (default)
    Serve,
    /// Serve the API in this process; started by the coordinator
    #[command(hide = true)]
    Worker {
        #[arg(long, default_value_t = 0)]
        id: usize,
    },
    /// Register a principal and print its id
    AddPrincipal {
        username: String,
        email: String,
        /// Opaque hash produced by the external credential service
        #[arg(long, env = "PGDOCK_CREDENTIAL_HASH", default_value = "")]
        credential_hash: String,
    },
}

fn init_tracing() {
    // stdout carries worker signals, so logs always go to stderr.
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "pgdock=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

/// Every process, coordinator and workers alike, runs one cooperative thread.
fn build_runtime() -> std::io::Result<tokio::runtime::Runtime> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
}

fn main() -> anyhow::Result<()> {
    init_tracing();

    let cli = Cli::parse();
    let config = Config::from_env();

    let runtime = build_runtime().context("failed to start the async runtime")?;
    runtime.block_on(run(cli.command.unwrap_or(Command::Serve), config))
}

async fn run(command: Command, config: Config) -> anyhow::Result<()> {
    match command {
        Command::Serve => serve(config).await,
        Command::Worker { id } => pool::worker::run(config, id).await,
        Command::AddPrincipal {
            username,
            email,
            credential_hash,
        } => add_principal(config, username, email, credential_hash).await,
    }
}

async fn serve(config: Config) -> anyhow::Result<()> {
    info!(
        "Starting coordinator on {} with {} workers (limit {})",
        config.socket_addr(),
        config.workers,
        config.workers_limit
    );

    let launcher = ProcessLauncher::current().context("cannot locate own executable")?;
    let scaler = Scaler::new(config.workers, config.workers_limit, config.scale_threshold);
    let coordinator = Coordinator::new(launcher, scaler, config.scale_interval);

    let reached = coordinator.run(shutdown_signal()).await;
    info!("Coordinator stopped at pool size {}", reached);
    Ok(())
}

async fn add_principal(
    config: Config,
    username: String,
    email: String,
    credential_hash: String,
) -> anyhow::Result<()> {
    validate_identifier("username", &username)?;

    let catalog = CatalogStore::new(&config.catalog_db_path)
        .with_context(|| format!("failed to open catalog at {}", config.catalog_db_path))?;

    let principal = Principal::new(username, email, credential_hash);
    catalog
        .insert_principal(&principal)
        .await
        .context("failed to register principal")?;

    info!("Registered principal {}", principal.username);
    println!("{}", principal.id);
    Ok(())
}
