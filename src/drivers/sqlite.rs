//! Single-file relational engine.

use crate::drivers::sql::{Engine, EnginePool};
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::models::RelationalDescriptor;
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Builds the one engine shared by reads and writes on a local database file.
#[derive(Debug)]
pub struct SqliteDriver {
    path: PathBuf,
    pool_recycle: u64,
    engine: Option<Engine>,
}

impl SqliteDriver {
    pub fn new(path: impl Into<PathBuf>, pool_recycle: u64) -> Self {
        Self {
            path: path.into(),
            pool_recycle,
            engine: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Build the engine, or return the cached one.
    ///
    /// The file must already exist; it is never created here.
    pub fn connect(&mut self) -> DbResult<Engine> {
        if let Some(engine) = &self.engine {
            return Ok(engine.clone());
        }

        if !self.path.is_file() {
            return Err(DaoError::relational(
                ErrorCode::SqlFileEngineBuild,
                format!(
                    "Error creating engine for file {}: file does not exist",
                    self.path.display()
                ),
            ));
        }

        let options = SqliteConnectOptions::new()
            .filename(&self.path)
            .create_if_missing(false)
            .foreign_keys(true);

        let mut pool_options = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(0)
            .test_before_acquire(true);
        if self.pool_recycle > 0 {
            pool_options = pool_options.max_lifetime(Duration::from_secs(self.pool_recycle));
        }

        let pool = pool_options.connect_lazy_with(options);
        let context = RelationalDescriptor::sqlite_file(&self.path).db_context();
        let engine = Engine::new(EnginePool::Sqlite(pool), context);

        debug!(path = %self.path.display(), "Single-file engine created");
        self.engine = Some(engine.clone());
        Ok(engine)
    }

    /// Close the engine if one was built.
    pub async fn disconnect(&mut self) {
        if let Some(engine) = self.engine.take() {
            engine.close().await;
            debug!(path = %self.path.display(), "Single-file engine disposed");
        }
    }

    pub fn database_url(&self) -> String {
        format!("sqlite://{}", self.path.display())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Dialect;

    #[test]
    fn test_missing_file_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let mut driver = SqliteDriver::new(dir.path().join("absent.db"), 0);
        let err = driver.connect().unwrap_err();
        assert_eq!(err.code(), ErrorCode::SqlFileEngineBuild);
    }

    #[tokio::test]
    async fn test_connect_and_version() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let mut driver = SqliteDriver::new(file.path(), 3600);

        let engine = driver.connect().unwrap();
        assert_eq!(engine.dialect(), Dialect::Sqlite);
        assert_eq!(engine.context().system(), "sqlite");

        let version = engine.server_version().await.unwrap();
        assert!(version.starts_with('3'));

        driver.disconnect().await;
        assert!(engine.is_closed());
        driver.disconnect().await;
    }

    #[test]
    fn test_database_url() {
        let driver = SqliteDriver::new("/data/app.db", 0);
        assert_eq!(driver.database_url(), "sqlite:///data/app.db");
    }
}
