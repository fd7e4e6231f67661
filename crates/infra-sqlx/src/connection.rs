// Connection Provider - lazily created Any pool with per-dialect session setup

use crate::error::map_sqlx_error;
use sqlx::any::AnyPoolOptions;
use sqlx::pool::PoolConnection;
use sqlx::{Any, AnyPool};
use std::str::FromStr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Once};
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info};
use txoutbox_core::error::{OutboxError, Result};
use txoutbox_core::{Dialect, DialectKind};

pub const DEFAULT_MAX_CONNECTIONS: u32 = 10;
pub const DEFAULT_ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);

static INSTALL_DRIVERS: Once = Once::new();

/// Where and how to connect
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    pub url: String,
    pub dialect: Dialect,
    pub max_connections: u32,
    pub acquire_timeout: Duration,
}

impl ConnectionConfig {
    pub fn new(url: impl Into<String>, dialect: Dialect) -> Self {
        Self {
            url: url.into(),
            dialect,
            max_connections: DEFAULT_MAX_CONNECTIONS,
            acquire_timeout: DEFAULT_ACQUIRE_TIMEOUT,
        }
    }

    /// Load configuration from the process environment
    ///
    /// # Environment Variables
    ///
    /// - `TXOUTBOX_DATABASE_URL`: connection URL (required)
    /// - `TXOUTBOX_DIALECT`: postgresql, mysql5, mysql8 or sqlite (default: inferred from the URL)
    /// - `TXOUTBOX_MAX_CONNECTIONS`: pool size (default: 10)
    /// - `TXOUTBOX_LOCK_TIMEOUT_MS`: lock wait bound for backends without skip-locked (default: 5000)
    pub fn from_env() -> Result<Self> {
        Self::from_vars(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with an explicit variable lookup
    pub fn from_vars(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let url = lookup("TXOUTBOX_DATABASE_URL")
            .ok_or_else(|| OutboxError::Config("TXOUTBOX_DATABASE_URL is not set".to_string()))?;

        let mut dialect = match lookup("TXOUTBOX_DIALECT") {
            Some(name) => name.parse::<Dialect>()?,
            None => Dialect::from_url(&url).ok_or_else(|| {
                OutboxError::Config(
                    "Cannot infer the dialect from TXOUTBOX_DATABASE_URL; set TXOUTBOX_DIALECT"
                        .to_string(),
                )
            })?,
        };
        if let Some(ms) = lookup("TXOUTBOX_LOCK_TIMEOUT_MS") {
            dialect = dialect.with_lock_timeout(Duration::from_millis(parse_var(
                "TXOUTBOX_LOCK_TIMEOUT_MS",
                &ms,
            )?));
        }

        let mut config = Self::new(url, dialect);
        if let Some(n) = lookup("TXOUTBOX_MAX_CONNECTIONS") {
            config.max_connections = parse_var("TXOUTBOX_MAX_CONNECTIONS", &n)?;
        }
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.url.trim().is_empty() {
            return Err(OutboxError::Config(
                "Database URL must not be blank".to_string(),
            ));
        }
        match DialectKind::from_url(&self.url) {
            Some(kind) if kind == self.dialect.kind() => {}
            Some(kind) => {
                return Err(OutboxError::Config(format!(
                    "Database URL is for {} but the dialect is {}",
                    kind,
                    self.dialect.kind()
                )))
            }
            None => {
                return Err(OutboxError::Config(
                    "Unsupported database URL scheme".to_string(),
                ))
            }
        }
        if self.max_connections == 0 {
            return Err(OutboxError::Config(
                "max_connections must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn parse_var<T: FromStr>(key: &str, value: &str) -> Result<T> {
    value
        .trim()
        .parse()
        .map_err(|_| OutboxError::Config(format!("{} has an invalid value '{}'", key, value)))
}

/// Create the connection pool (READ COMMITTED where the backend supports it)
pub async fn create_pool(config: &ConnectionConfig) -> Result<AnyPool> {
    INSTALL_DRIVERS.call_once(|| {
        debug!("Installing sqlx Any drivers");
        sqlx::any::install_default_drivers();
    });

    let setup = Arc::new(config.dialect.session_setup());
    info!(dialect = %config.dialect, max_connections = config.max_connections, "Opening connection pool");

    AnyPoolOptions::new()
        .max_connections(config.max_connections)
        .acquire_timeout(config.acquire_timeout)
        .after_connect(move |conn, _meta| {
            let setup = Arc::clone(&setup);
            Box::pin(async move {
                for statement in setup.iter() {
                    sqlx::query(statement).execute(&mut *conn).await?;
                }
                Ok(())
            })
        })
        .connect(&config.url)
        .await
        .map_err(map_sqlx_error)
}

/// Hands out pooled connections; the pool is built on first use, exactly once
pub struct SqlxConnectionProvider {
    config: ConnectionConfig,
    pool: OnceCell<AnyPool>,
    pools_created: AtomicUsize,
}

impl SqlxConnectionProvider {
    pub fn new(config: ConnectionConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            config,
            pool: OnceCell::new(),
            pools_created: AtomicUsize::new(0),
        })
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    pub fn dialect(&self) -> Dialect {
        self.config.dialect
    }

    pub async fn pool(&self) -> Result<&AnyPool> {
        self.pool
            .get_or_try_init(|| {
                self.pools_created.fetch_add(1, Ordering::SeqCst);
                create_pool(&self.config)
            })
            .await
    }

    #[cfg(test)]
    fn pools_created(&self) -> usize {
        self.pools_created.load(Ordering::SeqCst)
    }

    pub async fn obtain_connection(&self) -> Result<PoolConnection<Any>> {
        let pool = self.pool().await?;
        debug!("Acquiring connection");
        pool.acquire().await.map_err(map_sqlx_error)
    }

    /// Close the pool if it was ever opened
    pub async fn close(&self) {
        if let Some(pool) = self.pool.get() {
            pool.close().await;
        }
    }
}
