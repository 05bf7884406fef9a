//! Process root: configuration, logging, storage bootstrap, runtime
//! assembly, and graceful shutdown.

use std::sync::Arc;

use sqlx::postgres::PgPoolOptions;
use tracing::{error, info};

use backoffice_common::config::AppConfig;
use backoffice_common::logging::{init_logging, LogConfig};
use backoffice_core::readmodel::{run_read_model_migrations, PgReadModels};
use backoffice_core::runtime::BackofficeRuntime;
use backoffice_core::store::{run_event_store_migrations, PgEventStore};

#[tokio::main]
async fn main() {
    if let Err(err) = run().await {
        error!("fatal: {err}");
        std::process::exit(1);
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    init_logging(&LogConfig::from_env())?;
    let config = AppConfig::from_env()?;

    info!("connecting to event store database");
    let pool = PgPoolOptions::new()
        .max_connections(config.db_max_connections)
        .min_connections(config.db_min_connections)
        .max_lifetime(config.db_max_lifetime)
        .connect(&config.database_url)
        .await?;

    run_event_store_migrations(&pool).await?;
    run_read_model_migrations(&pool).await?;
    info!("database ready");

    let events = Arc::new(PgEventStore::new(pool.clone()));
    let read = Arc::new(PgReadModels::new(pool.clone()));
    let runtime = BackofficeRuntime::start(events, read, config.consumer_buffer);

    // The external transport layer attaches here
    let _router = runtime.router();
    info!(port = config.port, "back-office core running, awaiting shutdown signal");

    tokio::signal::ctrl_c().await?;
    info!("shutdown signal received");

    runtime.shutdown().await;
    pool.close().await;
    Ok(())
}
