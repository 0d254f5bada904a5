//! Relational engine construction.
//!
//! An [`Engine`] is a dialect-specific sqlx pool (avoiding `AnyPool`
//! limitations) plus the log context describing it. [`SqlDriver`] builds the
//! primary/secondary pair from two descriptors.

use crate::error::{DaoError, DbResult, ErrorCode};
use crate::logging::DbContext;
use crate::models::{Dialect, RelationalDescriptor};
use sqlx::mysql::{MySqlConnectOptions, MySqlPoolOptions};
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use sqlx::{MySqlPool, PgPool, SqlitePool};
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Database-specific connection pool.
#[derive(Debug, Clone)]
pub enum EnginePool {
    Postgres(PgPool),
    MySql(MySqlPool),
    Sqlite(SqlitePool),
}

/// A pooled engine and the `db.*` context used when logging against it.
#[derive(Debug, Clone)]
pub struct Engine {
    pool: EnginePool,
    context: Arc<DbContext>,
}

impl Engine {
    pub fn new(pool: EnginePool, context: DbContext) -> Self {
        Self {
            pool,
            context: Arc::new(context),
        }
    }

    pub fn pool(&self) -> &EnginePool {
        &self.pool
    }

    pub fn context(&self) -> &Arc<DbContext> {
        &self.context
    }

    pub fn dialect(&self) -> Dialect {
        match self.pool {
            EnginePool::Postgres(_) => Dialect::Postgres,
            EnginePool::MySql(_) => Dialect::MySql,
            EnginePool::Sqlite(_) => Dialect::Sqlite,
        }
    }

    /// Close the pool and wait for checked-out connections to return.
    pub async fn close(&self) {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.close().await,
            EnginePool::MySql(pool) => pool.close().await,
            EnginePool::Sqlite(pool) => pool.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.is_closed(),
            EnginePool::MySql(pool) => pool.is_closed(),
            EnginePool::Sqlite(pool) => pool.is_closed(),
        }
    }

    /// Number of connections currently open (idle or in use).
    pub fn size(&self) -> u32 {
        match &self.pool {
            EnginePool::Postgres(pool) => pool.size(),
            EnginePool::MySql(pool) => pool.size(),
            EnginePool::Sqlite(pool) => pool.size(),
        }
    }

    /// Check out a connection and run `SELECT 1` on it.
    pub async fn ping(&self) -> Result<(), sqlx::Error> {
        match &self.pool {
            EnginePool::Postgres(pool) => sqlx::query("SELECT 1").execute(pool).await.map(drop),
            EnginePool::MySql(pool) => sqlx::query("SELECT 1").execute(pool).await.map(drop),
            EnginePool::Sqlite(pool) => sqlx::query("SELECT 1").execute(pool).await.map(drop),
        }
    }

    /// Server version string reported by the database.
    pub async fn server_version(&self) -> Result<String, sqlx::Error> {
        match &self.pool {
            EnginePool::Postgres(pool) => {
                sqlx::query_scalar::<_, String>("SHOW server_version")
                    .fetch_one(pool)
                    .await
            }
            EnginePool::MySql(pool) => {
                sqlx::query_scalar::<_, String>("SELECT VERSION()")
                    .fetch_one(pool)
                    .await
            }
            EnginePool::Sqlite(pool) => {
                sqlx::query_scalar::<_, String>("SELECT sqlite_version()")
                    .fetch_one(pool)
                    .await
            }
        }
    }
}

/// Builds one pooled engine per descriptor.
///
/// Pools are created lazily: no connection is opened until the first
/// checkout, and every checkout is health-checked before use.
#[derive(Debug)]
pub struct SqlDriver {
    primary: RelationalDescriptor,
    secondary: Option<RelationalDescriptor>,
    engines: Option<(Engine, Engine)>,
}

impl SqlDriver {
    pub fn new(primary: RelationalDescriptor, secondary: Option<RelationalDescriptor>) -> Self {
        Self {
            primary,
            secondary,
            engines: None,
        }
    }

    /// Build the `(write, read)` engines; returns the cached pair when already built.
    ///
    /// Without a secondary descriptor the read engine shares the primary pool.
    pub fn connect(&mut self) -> DbResult<(Engine, Engine)> {
        if let Some(engines) = &self.engines {
            return Ok(engines.clone());
        }

        debug!(
            primary = %self.primary.masked_url(),
            secondary = ?self.secondary.as_ref().map(RelationalDescriptor::masked_url),
            "Building relational engines"
        );

        let write = build_engine(&self.primary)?;
        let read = match &self.secondary {
            Some(secondary) => build_engine(secondary)?,
            None => write.clone(),
        };

        self.engines = Some((write.clone(), read.clone()));
        Ok((write, read))
    }

    /// Release both pools. Safe to call when nothing was built.
    pub async fn disconnect(&mut self) {
        if let Some((write, read)) = self.engines.take() {
            write.close().await;
            if !read.is_closed() {
                read.close().await;
            }
            debug!(host = %self.primary.safe_host_label(), "Relational engines disposed");
        }
    }

    pub fn primary(&self) -> &RelationalDescriptor {
        &self.primary
    }

    /// Credential-masked URL of the primary.
    pub fn database_url(&self) -> String {
        self.primary.masked_url()
    }
}

fn build_error(descriptor: &RelationalDescriptor, err: sqlx::Error) -> DaoError {
    DaoError::relational(
        ErrorCode::SqlEngineBuild,
        format!(
            "Error connecting with sql db {}: {err}",
            descriptor.safe_host_label()
        ),
    )
    .with_source(err)
}

fn some_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

/// Build a lazily-connecting pool for a networked descriptor.
fn build_engine(descriptor: &RelationalDescriptor) -> DbResult<Engine> {
    let url = descriptor.connection_url()?;
    let max_connections = (descriptor.pool_size() + descriptor.max_overflow()).max(1);
    let acquire_timeout = some_secs(descriptor.pool_timeout_secs())
        .unwrap_or(Duration::from_secs(crate::config::DEFAULT_POOL_TIMEOUT_SECS));
    let context = descriptor.db_context();

    let pool = match descriptor.dialect() {
        Dialect::Postgres => {
            let options = PgConnectOptions::from_str(url.as_str())
                .map_err(|e| build_error(descriptor, e))?;
            EnginePool::Postgres(
                PgPoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(descriptor.pool_size().min(max_connections))
                    .max_lifetime(some_secs(descriptor.pool_recycle_secs()))
                    .acquire_timeout(acquire_timeout)
                    .test_before_acquire(true)
                    .connect_lazy_with(options),
            )
        }
        Dialect::MySql => {
            let options = MySqlConnectOptions::from_str(url.as_str())
                .map_err(|e| build_error(descriptor, e))?;
            EnginePool::MySql(
                MySqlPoolOptions::new()
                    .max_connections(max_connections)
                    .min_connections(descriptor.pool_size().min(max_connections))
                    .max_lifetime(some_secs(descriptor.pool_recycle_secs()))
                    .acquire_timeout(acquire_timeout)
                    .test_before_acquire(true)
                    .connect_lazy_with(options),
            )
        }
        Dialect::Sqlite => {
            return Err(DaoError::relational(
                ErrorCode::SqlEngineBuild,
                "Single-file databases are served by SqliteDriver",
            ));
        }
    };

    Ok(Engine::new(pool, context))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg(host: &str) -> RelationalDescriptor {
        RelationalDescriptor::new("postgresql", "app", "pw", host, "orders", 5432, 2).unwrap()
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let mut driver = SqlDriver::new(pg("primary.invalid"), Some(pg("replica.invalid")));
        let (write, read) = driver.connect().unwrap();
        assert_eq!(write.dialect(), Dialect::Postgres);
        assert_eq!(read.context().host(), "replica.invalid:5432");

        let (write_again, _) = driver.connect().unwrap();
        assert!(Arc::ptr_eq(write.context(), write_again.context()));

        driver.disconnect().await;
        assert!(write.is_closed());
        assert!(read.is_closed());
    }

    #[tokio::test]
    async fn test_read_engine_falls_back_to_primary() {
        let mut driver = SqlDriver::new(pg("primary.invalid"), None);
        let (write, read) = driver.connect().unwrap();
        assert!(Arc::ptr_eq(write.context(), read.context()));
        driver.disconnect().await;
    }

    #[tokio::test]
    async fn test_disconnect_without_connect() {
        let mut driver = SqlDriver::new(pg("primary.invalid"), None);
        driver.disconnect().await;
    }

    #[test]
    fn test_sqlite_descriptor_is_rejected() {
        let mut driver = SqlDriver::new(RelationalDescriptor::sqlite_file("/tmp/x.db"), None);
        let err = driver.connect().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SqlEngineBuild);
    }

    #[test]
    fn test_database_url_is_masked() {
        let driver = SqlDriver::new(pg("primary.invalid"), None);
        assert!(!driver.database_url().contains(":pw@"));
    }
}
