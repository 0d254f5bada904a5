//! Composition root for the connectors a process uses.
//!
//! A [`DataContext`] is built once at startup, shared behind an `Arc`, and
//! handed to the data-access objects that need it. It owns the lifecycle of
//! every connector it holds.

use crate::config::{Config, DocumentConfigSource, RelationalConfigSource};
use crate::connectors::{
    Connector, DocumentConnector, RdbmsConnector, SqlConnector, SqliteConnector,
};
use crate::db::{BASE_CONNECTOR, ConnectorHost, SqlDaoHelper};
use crate::drivers::DocumentClientFactory;
use crate::error::DbResult;
use crate::logging::{LogSink, default_sink};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

/// Attribute name under which the single-file connector is exposed.
pub const SQLITE_CONNECTOR: &str = "sqlite_connector";

pub struct DataContext {
    document: Option<Arc<DocumentConnector>>,
    relational: Option<Arc<RdbmsConnector>>,
    sqlite: Option<Arc<SqliteConnector>>,
    dao: SqlDaoHelper,
    sink: Arc<dyn LogSink>,
}

impl DataContext {
    pub fn new() -> Self {
        Self::with_sink(default_sink())
    }

    pub fn with_sink(sink: Arc<dyn LogSink>) -> Self {
        Self {
            document: None,
            relational: None,
            sqlite: None,
            dao: SqlDaoHelper::with_sink(sink.clone()),
            sink,
        }
    }

    /// Build a context from the bundled configuration.
    ///
    /// The document connector is only created when a host is configured and
    /// a client factory is supplied. The single-file connector validates its
    /// path and builds its engine here, so a missing file fails construction
    /// and the call needs a Tokio runtime.
    pub fn from_config(
        config: Arc<Config>,
        document_factory: Option<Arc<dyn DocumentClientFactory>>,
        sink: Arc<dyn LogSink>,
    ) -> DbResult<Self> {
        let mut context = Self::with_sink(sink.clone());

        if config.has_relational() {
            let source: Arc<dyn RelationalConfigSource> = config.clone();
            context = context
                .with_relational(Arc::new(RdbmsConnector::new(source).with_sink(sink.clone())));
        }

        if let Some(path) = config.sqlite_path.as_ref() {
            let connector =
                SqliteConnector::new_with_sink(path, config.sql_pool_recycle, sink.clone())?;
            context = context.with_sqlite(Arc::new(connector));
        }

        if let (true, Some(factory)) = (config.has_document_store(), document_factory) {
            let source: Arc<dyn DocumentConfigSource> = config.clone();
            let connector = DocumentConnector::new(source, factory)
                .with_sink(sink)
                .with_environment(config.environment.as_str())
                .with_query_logging(config.mongo_query_logging);
            context = context.with_document(Arc::new(connector));
        }

        Ok(context)
    }

    pub fn with_document(mut self, connector: Arc<DocumentConnector>) -> Self {
        self.document = Some(connector);
        self
    }

    pub fn with_relational(mut self, connector: Arc<RdbmsConnector>) -> Self {
        self.relational = Some(connector);
        self
    }

    pub fn with_sqlite(mut self, connector: Arc<SqliteConnector>) -> Self {
        self.sqlite = Some(connector);
        self
    }

    pub fn document(&self) -> Option<&Arc<DocumentConnector>> {
        self.document.as_ref()
    }

    pub fn relational(&self) -> Option<&Arc<RdbmsConnector>> {
        self.relational.as_ref()
    }

    pub fn sqlite(&self) -> Option<&Arc<SqliteConnector>> {
        self.sqlite.as_ref()
    }

    pub fn dao(&self) -> &SqlDaoHelper {
        &self.dao
    }

    pub fn sink(&self) -> &Arc<dyn LogSink> {
        &self.sink
    }

    /// Every held connector, relational first.
    pub fn connectors(&self) -> Vec<Arc<dyn Connector>> {
        let mut all: Vec<Arc<dyn Connector>> = Vec::new();
        if let Some(c) = &self.relational {
            all.push(c.clone());
        }
        if let Some(c) = &self.sqlite {
            all.push(c.clone());
        }
        if let Some(c) = &self.document {
            all.push(c.clone());
        }
        all
    }

    /// Initialize every connector, stopping at the first failure.
    ///
    /// On failure everything already initialized is closed again before the
    /// error is returned.
    pub async fn init_all(&self) -> DbResult<()> {
        for connector in self.connectors() {
            debug!(system = connector.system(), "Initializing connector");
            if let Err(err) = connector.init().await {
                self.close_all().await;
                return Err(err);
            }
        }
        info!(count = self.connectors().len(), "All connectors initialized");
        Ok(())
    }

    /// Close every connector in reverse initialization order.
    pub async fn close_all(&self) {
        for connector in self.connectors().into_iter().rev() {
            connector.close().await;
        }
    }
}

impl Default for DataContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConnectorHost for DataContext {
    fn connector(&self) -> Option<Arc<dyn SqlConnector>> {
        match (&self.relational, &self.sqlite) {
            (Some(c), _) => Some(c.clone()),
            (None, Some(c)) => Some(c.clone()),
            (None, None) => None,
        }
    }

    fn alternate_connector(&self, name: &str) -> Option<Arc<dyn SqlConnector>> {
        match name {
            BASE_CONNECTOR => self.connector(),
            SQLITE_CONNECTOR => self
                .sqlite
                .clone()
                .map(|c| c as Arc<dyn SqlConnector>),
            _ => None,
        }
    }
}

impl fmt::Debug for DataContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DataContext")
            .field("document", &self.document)
            .field("relational", &self.relational)
            .field("sqlite", &self.sqlite)
            .finish_non_exhaustive()
    }
}
