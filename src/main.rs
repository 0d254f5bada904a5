//! daokit - Main entry point.
//!
//! Initializes every configured connector, reports readiness and closes
//! them again. Useful as a connectivity check for a deployment's settings.

use clap::Parser;
use daokit::config::Config;
use daokit::connectors::{Connector, SqlConnector};
use daokit::drivers::DocumentClientFactory;
use daokit::logging::default_sink;
use daokit::DataContext;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[cfg(feature = "mongodb")]
fn document_factory() -> Option<Arc<dyn DocumentClientFactory>> {
    Some(Arc::new(daokit::drivers::MongoClientFactory))
}

#[cfg(not(feature = "mongodb"))]
fn document_factory() -> Option<Arc<dyn DocumentClientFactory>> {
    None
}

async fn report(label: &str, connector: &dyn SqlConnector) {
    let mut version = connector.version().await;
    if version.is_empty() {
        warn!(connector = label, "Could not read server version");
        version.push_str("unknown");
    }
    info!(
        connector = label,
        url = %connector.database_url(),
        version = %version,
        pool_size = connector.pool_size(),
        max_overflow = connector.max_overflow(),
        pool_recycle = connector.pool_recycle(),
        pool_timeout = connector.pool_timeout(),
        "Relational connector ready"
    );
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Parse configuration from command line and environment
    let config = Config::parse();

    // Initialize logging
    init_tracing(&config);

    if !config.has_document_store() && !config.has_relational() && config.sqlite_path.is_none() {
        eprintln!("Error: No database is configured.");
        eprintln!();
        eprintln!("Usage: daokit --sql-host <host> [--sql-driver postgresql|mysql]");
        eprintln!("       daokit --sqlite-path <file>");
        eprintln!("       daokit --mongo-host <host> [--mongo-srv]");
        std::process::exit(1);
    }

    info!(
        environment = %config.environment,
        "Starting daokit v{}",
        env!("CARGO_PKG_VERSION")
    );

    let factory = document_factory();
    if config.has_document_store() && factory.is_none() {
        warn!("Document store configured but the mongodb feature is disabled; skipping");
    }

    let config = Arc::new(config);
    let context = DataContext::from_config(config, factory, default_sink())?;

    if let Err(e) = context.init_all().await {
        error!(error = %e, code = e.code().as_u32(), "Initialization failed");
        return Err(e.into());
    }

    if let Some(connector) = context.relational() {
        report(connector.system(), connector.as_ref()).await;
    }
    if let Some(connector) = context.sqlite() {
        report(connector.system(), connector.as_ref()).await;
    }
    if let Some(connector) = context.document() {
        let database = connector.database_name().unwrap_or_default();
        info!(database = %database, models = connector.models().len(), "Document connector ready");
    }

    context.close_all().await;
    info!("Shutdown complete");
    Ok(())
}
