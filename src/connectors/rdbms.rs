//! Networked relational connector (primary/secondary engine pair).

use super::{Connector, SqlConnector};
use crate::config::RelationalConfigSource;
use crate::drivers::{Engine, SqlDriver};
use crate::error::{DaoError, DbResult};
use crate::logging::{LogAction, LogBuilder, LogSink, default_sink};
use crate::models::{Dialect, RelationalDescriptor};
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Mutex;

#[derive(Default)]
struct State {
    driver: Option<SqlDriver>,
    write: Option<Engine>,
    read: Option<Engine>,
    primary: Option<RelationalDescriptor>,
}

/// Owns the write (primary) and read (secondary) engines.
///
/// Share one instance (behind an `Arc`) across the process; every holder
/// then uses the same engine pair.
pub struct RdbmsConnector {
    source: Arc<dyn RelationalConfigSource>,
    sink: Arc<dyn LogSink>,
    init_lock: Mutex<()>,
    state: RwLock<State>,
}

impl RdbmsConnector {
    pub fn new(source: Arc<dyn RelationalConfigSource>) -> Self {
        Self {
            source,
            sink: default_sink(),
            init_lock: Mutex::new(()),
            state: RwLock::new(State::default()),
        }
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    /// Descriptor of the primary, once initialized.
    pub fn primary(&self) -> Option<RelationalDescriptor> {
        self.read_state().primary.clone()
    }

    /// Release both engines. Alias of [`close`](Connector::close).
    pub async fn dispose(&self) {
        self.close().await;
    }

    fn fail_init(&self, err: DaoError, primary: Option<&RelationalDescriptor>) -> DaoError {
        let cause: &(dyn std::error::Error + 'static) = match err.original() {
            Some(original) => original,
            None => &err,
        };
        let mut builder = LogBuilder::new(&self.sink)
            .event(LogAction::SqlInit)
            .failure(err.code(), cause)
            .msg(err.message().to_string());
        if let Some(primary) = primary {
            builder = builder.db_context(&primary.db_context());
        }
        builder.emit();
        err
    }

    async fn init_locked(&self) -> DbResult<()> {
        let start = Instant::now();

        let (primary, secondary) = match self.source.load().await {
            Ok(pair) => pair,
            Err(err) => return Err(self.fail_init(err, None)),
        };
        if let Err(err) = primary.validate().and_then(|()| secondary.validate()) {
            return Err(self.fail_init(err, Some(&primary)));
        }

        let mut driver = SqlDriver::new(primary.clone(), Some(secondary.clone()));
        let (write, read) = match driver.connect() {
            Ok(engines) => engines,
            Err(err) => return Err(self.fail_init(err, Some(&primary))),
        };

        let context = primary.db_context();
        LogBuilder::new(&self.sink)
            .event(LogAction::SqlPoolReady)
            .success()
            .msg("Relational engine pools ready")
            .db_context(&context)
            .field("db.read.host", secondary.safe_host_label())
            .emit();

        {
            let mut state = self.write_state();
            state.driver = Some(driver);
            state.write = Some(write);
            state.read = Some(read);
            state.primary = Some(primary);
        }

        LogBuilder::new(&self.sink)
            .event(LogAction::SqlInit)
            .success()
            .msg("Relational connector initialized")
            .duration_ms(start.elapsed().as_secs_f64() * 1000.0)
            .db_context(&context)
            .emit();
        Ok(())
    }
}

#[async_trait]
impl Connector for RdbmsConnector {
    fn system(&self) -> &'static str {
        match self.dialect() {
            Some(dialect) => dialect.system_name(),
            None => "sql",
        }
    }

    async fn init(&self) -> DbResult<()> {
        if self.is_initialized() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        if self.is_initialized() {
            return Ok(());
        }
        self.init_locked().await
    }

    async fn close(&self) {
        let _guard = self.init_lock.lock().await;

        let (driver, primary) = {
            let mut state = self.write_state();
            state.write = None;
            state.read = None;
            (state.driver.take(), state.primary.take())
        };

        if let Some(mut driver) = driver {
            driver.disconnect().await;
            let mut builder = LogBuilder::new(&self.sink)
                .event(LogAction::SqlClose)
                .success()
                .msg("Relational engines disposed");
            if let Some(primary) = primary.as_ref() {
                builder = builder.db_context(&primary.db_context());
            }
            builder.emit();
        }
    }

    fn is_initialized(&self) -> bool {
        self.read_state().write.is_some()
    }
}

#[async_trait]
impl SqlConnector for RdbmsConnector {
    fn dialect(&self) -> Option<Dialect> {
        self.read_state().primary.as_ref().map(|p| p.dialect())
    }

    fn write_engine(&self) -> Option<Engine> {
        self.read_state().write.clone()
    }

    fn read_engine(&self) -> Option<Engine> {
        self.read_state().read.clone()
    }

    fn database_url(&self) -> String {
        self.read_state()
            .driver
            .as_ref()
            .map(SqlDriver::database_url)
            .unwrap_or_default()
    }

    fn pool_size(&self) -> u32 {
        self.read_state()
            .primary
            .as_ref()
            .map_or(0, |p| p.pool_size())
    }

    fn max_overflow(&self) -> u32 {
        self.read_state()
            .primary
            .as_ref()
            .map_or(0, |p| p.max_overflow())
    }

    fn pool_recycle(&self) -> u64 {
        self.read_state()
            .primary
            .as_ref()
            .map_or(0, |p| p.pool_recycle_secs())
    }

    fn pool_timeout(&self) -> u64 {
        self.read_state()
            .primary
            .as_ref()
            .map_or(0, |p| p.pool_timeout_secs())
    }
}

impl fmt::Debug for RdbmsConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("RdbmsConnector")
            .field("initialized", &state.write.is_some())
            .field("primary", &state.primary)
            .finish_non_exhaustive()
    }
}
