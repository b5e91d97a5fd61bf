mod aggregate;
mod catalog;
mod config;
mod decoder;
mod entities;
mod http;
mod ingest;
mod ledger;
mod models;
mod state;
mod store;
#[cfg(test)]
mod test_support;

use std::sync::Arc;
use std::time::Duration;

use crate::aggregate::{RecomputeJob, ResultsMaintainer};
use crate::catalog::Catalogs;
use crate::config::ApiConfig;
use crate::ingest::VotePipeline;
use crate::ledger::LedgerRelay;
use crate::state::{AppState, CorrelationCache};
use crate::store::VoteStore;
use anyhow::{Context, Result};
use axum::Router;
use migration::MigratorTrait;
use sea_orm::ConnectOptions;
use sea_orm::Database;
use tokio::net::TcpListener;
use tokio::sync::watch;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

const RELAY_DRAIN_GRACE: Duration = Duration::from_secs(5);

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let config = ApiConfig::load().context("Failed to load configuration")?;
    let database = connect_database(&config).await?;
    run_migrations(&database).await?;

    let catalogs =
        Arc::new(Catalogs::load(&config.catalog).context("Failed to load reference catalogs")?);
    let store = VoteStore::new(database);
    let results = Arc::new(ResultsMaintainer::new());
    let correlation = Arc::new(CorrelationCache::new(&config.cache));

    // Start from the persisted truth before accepting any delta.
    let startup = results
        .recompute(&store)
        .await
        .context("Initial results recompute failed")?;
    info!(votes = startup.total_votes, "Results initialised from store");

    let (relay, relay_handle) = if config.ledger.enabled {
        let (relay, handle) = LedgerRelay::from_config(&config.ledger)
            .context("Failed to initialize ledger relay")?;
        (Some(relay), Some(handle))
    } else {
        info!("Ledger relay disabled by configuration");
        (None, None)
    };

    let pipeline = Arc::new(VotePipeline::new(
        store.clone(),
        Arc::clone(&results),
        correlation,
        catalogs,
        relay,
    ));
    let app_state = AppState::new(pipeline, config.webhook.clone());

    let recompute = RecomputeJob::new(
        store,
        Arc::clone(&results),
        config.results.recompute_interval(),
    );

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let recompute_handle = tokio::spawn(async move {
        if let Err(err) = recompute.run(shutdown_rx).await {
            error!("Recompute job terminated with error: {err}");
        }
    });

    let listener = TcpListener::bind(config.server.address())
        .await
        .context("Failed to bind HTTP listener")?;
    let local_addr = listener
        .local_addr()
        .context("Failed to obtain listener address")?;
    info!("Donation vote API listening on {local_addr}");

    let router: Router = http::router(app_state);
    let server = axum::serve(listener, router.into_make_service());
    server
        .with_graceful_shutdown(shutdown_signal(shutdown_tx.clone()))
        .await
        .context("HTTP server exited with error")?;

    shutdown_tx.send(true).ok();
    if let Err(join_err) = recompute_handle.await {
        error!("Recompute task join error: {join_err}");
    }

    // The router owned the last relay handles, so the worker now drains.
    if let Some(handle) = relay_handle {
        match tokio::time::timeout(RELAY_DRAIN_GRACE, handle).await {
            Ok(Ok(())) => info!("Ledger relay drained"),
            Ok(Err(join_err)) => error!("Ledger relay join error: {join_err}"),
            Err(_) => warn!("Ledger relay still busy at shutdown, abandoning queue"),
        }
    }

    Ok(())
}

fn init_tracing() {
    let default_filter = "info";
    let filter = std::env::var("RUST_LOG").unwrap_or_else(|_| default_filter.to_string());
    assert!(!filter.is_empty(), "Tracing filter must not be empty");
    assert!(filter.len() < 256, "Tracing filter length exceeds bounds");

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::new(filter))
        .with_target(false)
        .compact()
        .init();
}

async fn connect_database(config: &ApiConfig) -> Result<sea_orm::DatabaseConnection> {
    let mut options = ConnectOptions::new(config.database.url.clone());
    options
        .max_connections(config.database.max_connections)
        .sqlx_logging(true)
        .sqlx_logging_level(tracing::log::LevelFilter::Debug)
        .acquire_timeout(Duration::from_secs(10));

    if let Some(min) = config.database.min_connections {
        options.min_connections(min);
    }

    Database::connect(options)
        .await
        .context("Failed to connect to vote database")
}

async fn run_migrations(database: &sea_orm::DatabaseConnection) -> Result<()> {
    migration::Migrator::up(database, None)
        .await
        .context("Database migrations failed")
}

async fn shutdown_signal(shutdown_tx: watch::Sender<bool>) {
    if let Err(err) = tokio::signal::ctrl_c().await {
        error!("Failed to listen for shutdown signal: {err}");
        return;
    }
    shutdown_tx.send(true).ok();
    info!("Shutdown signal dispatched");
}
