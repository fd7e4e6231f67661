//! txoutbox - Schema Migrator
//! Applies pending outbox migrations against TXOUTBOX_DATABASE_URL and exits

use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use txoutbox_core::port::Persistor;
use txoutbox_core::DefaultPersistor;
use txoutbox_infra_sqlx::{
    ConnectionConfig, SqlMigrationManager, SqlxConnectionProvider, SqlxTransactionManager,
};

const VERSION: &str = env!("CARGO_PKG_VERSION");

fn init_logging() -> Result<()> {
    let log_format =
        std::env::var("TXOUTBOX_LOG_FORMAT").unwrap_or_else(|_| "pretty".to_string());

    let env_filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("txoutbox=info"))
        .context("Failed to create env filter")?;

    match log_format.as_str() {
        "json" => {
            // Production: JSON structured logging
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().json())
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(env_filter)
                .with(fmt::layer().pretty())
                .init();
        }
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    // 1. Initialize logging
    init_logging()?;
    info!("txoutbox migrator v{} starting...", VERSION);

    // 2. Load configuration
    let config = ConnectionConfig::from_env().context("Invalid connection configuration")?;
    let dialect = config.dialect;
    info!(dialect = %dialect, max_connections = config.max_connections, "Connecting...");

    // 3. Wire dependencies
    let provider = Arc::new(SqlxConnectionProvider::new(config)?);
    let transactions = SqlxTransactionManager::new(Arc::clone(&provider));
    let migrations = Arc::new(SqlMigrationManager::new(dialect));
    let persistor = DefaultPersistor::new(dialect, migrations.clone());

    // 4. Apply pending migrations
    persistor
        .migrate(&transactions)
        .await
        .context("Migration failed")?;

    let version = migrations.current_version(&transactions).await?;
    info!(version, "Schema migrated");

    provider.close().await;
    Ok(())
}
