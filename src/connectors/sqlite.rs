//! Single-file relational connector.

use super::{Connector, SqlConnector};
use crate::drivers::{Engine, SqliteDriver};
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::logging::{DbContext, LogAction, LogBuilder, LogSink, default_sink};
use crate::models::{Dialect, RelationalDescriptor};
use async_trait::async_trait;
use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    driver: Option<SqliteDriver>,
    engine: Option<Engine>,
}

/// One engine shared by reads and writes on a local database file.
///
/// Pooling does not apply: the connector reports a pool size of one and no
/// overflow.
pub struct SqliteConnector {
    path: PathBuf,
    pool_recycle: u64,
    sink: Arc<dyn LogSink>,
    init_lock: Mutex<()>,
    state: RwLock<State>,
}

impl SqliteConnector {
    /// Validate the path and build the engine.
    ///
    /// Must be called from within a Tokio runtime: the pool spawns its
    /// maintenance task on construction.
    pub fn new(path: impl Into<PathBuf>, pool_recycle: u64) -> DbResult<Self> {
        Self::new_with_sink(path, pool_recycle, default_sink())
    }

    pub fn new_with_sink(
        path: impl Into<PathBuf>,
        pool_recycle: u64,
        sink: Arc<dyn LogSink>,
    ) -> DbResult<Self> {
        let connector = Self {
            path: path.into(),
            pool_recycle,
            sink,
            init_lock: Mutex::new(()),
            state: RwLock::new(State::default()),
        };

        if !connector.path.exists() {
            let err = DaoError::relational(
                ErrorCode::ConfPathMissing,
                format!(
                    "SQLite database path does not exist: {}",
                    connector.path.display()
                ),
            );
            LogBuilder::new(&connector.sink)
                .event(LogAction::SqlInit)
                .failure(err.code(), &err)
                .msg(err.message().to_string())
                .db_context(&connector.context())
                .emit();
            return Err(err);
        }

        connector.build()?;
        Ok(connector)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn context(&self) -> DbContext {
        RelationalDescriptor::sqlite_file(&self.path).db_context()
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn build(&self) -> DbResult<()> {
        let start = Instant::now();
        let mut driver = SqliteDriver::new(&self.path, self.pool_recycle);
        let engine = match driver.connect() {
            Ok(engine) => engine,
            Err(err) => {
                LogBuilder::new(&self.sink)
                    .event(LogAction::SqlInit)
                    .failure(err.code(), &err)
                    .msg(err.message().to_string())
                    .db_context(&self.context())
                    .emit();
                return Err(err);
            }
        };

        {
            let mut state = self.write_state();
            state.driver = Some(driver);
            state.engine = Some(engine);
        }

        LogBuilder::new(&self.sink)
            .event(LogAction::SqlInit)
            .success()
            .msg("Single-file connector initialized")
            .duration_ms(start.elapsed().as_secs_f64() * 1000.0)
            .db_context(&self.context())
            .emit();
        Ok(())
    }

    /// Release the engine. Alias of [`close`](Connector::close).
    pub async fn dispose(&self) {
        self.close().await;
    }
}

#[async_trait]
impl Connector for SqliteConnector {
    fn system(&self) -> &'static str {
        Dialect::Sqlite.system_name()
    }

    /// Rebuild the engine after [`close`](Connector::close); no-op otherwise.
    async fn init(&self) -> DbResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        self.build()
    }

    async fn close(&self) {
        let _guard = self.init_lock.lock().await;
        let driver = {
            let mut state = self.write_state();
            state.engine = None;
            state.driver.take()
        };
        if let Some(mut driver) = driver {
            driver.disconnect().await;
            LogBuilder::new(&self.sink)
                .event(LogAction::SqlClose)
                .success()
                .msg("Single-file engine disposed")
                .db_context(&self.context())
                .emit();
        }
    }

    fn is_initialized(&self) -> bool {
        self.read_state().engine.is_some()
    }
}

#[async_trait]
impl SqlConnector for SqliteConnector {
    fn dialect(&self) -> Option<Dialect> {
        Some(Dialect::Sqlite)
    }

    fn write_engine(&self) -> Option<Engine> {
        self.read_state().engine.clone()
    }

    fn read_engine(&self) -> Option<Engine> {
        self.read_state().engine.clone()
    }

    fn database_url(&self) -> String {
        self.read_state()
            .driver
            .as_ref()
            .map(SqliteDriver::database_url)
            .unwrap_or_default()
    }

    fn pool_size(&self) -> u32 {
        1
    }

    fn max_overflow(&self) -> u32 {
        0
    }

    fn pool_recycle(&self) -> u64 {
        self.pool_recycle
    }

    fn pool_timeout(&self) -> u64 {
        0
    }
}

impl fmt::Debug for SqliteConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqliteConnector")
            .field("path", &self.path)
            .field("pool_recycle", &self.pool_recycle)
            .field("initialized", &self.is_initialized())
            .finish()
    }
}
