//! Connection injection for data-access operations.
//!
//! [`InjectConnection`] resolves the connector for an operation, checks out
//! a connection for the operation's lifetime and hands it to the operation.
//! Write operations run inside a transaction that commits when the operation
//! returns `Ok` and rolls back otherwise. The connection is released on
//! every exit path.

use crate::connectors::SqlConnector;
use crate::db::Connection;
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::models::Dialect;
use std::sync::Arc;
use tracing::warn;

/// Attribute name of the base connector.
pub const BASE_CONNECTOR: &str = "connector";

/// Something that exposes connectors by name, typically a DAO or the
/// application's data context.
pub trait ConnectorHost: Send + Sync {
    /// The base connector.
    fn connector(&self) -> Option<Arc<dyn SqlConnector>>;

    /// A connector registered under `name`; [`BASE_CONNECTOR`] names the base one.
    fn alternate_connector(&self, name: &str) -> Option<Arc<dyn SqlConnector>>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InjectConnection {
    connector_attr: String,
    is_write: bool,
}

impl InjectConnection {
    pub fn new(connector_attr: impl Into<String>, is_write: bool) -> Self {
        Self {
            connector_attr: connector_attr.into(),
            is_write,
        }
    }

    /// Plain connection from the read engine.
    pub fn read() -> Self {
        Self::new(BASE_CONNECTOR, false)
    }

    /// Transactional connection from the write engine.
    pub fn write() -> Self {
        Self::new(BASE_CONNECTOR, true)
    }

    /// Connector used when the base connector is single-file.
    pub fn with_connector_attr(mut self, name: impl Into<String>) -> Self {
        self.connector_attr = name.into();
        self
    }

    pub fn is_write(&self) -> bool {
        self.is_write
    }

    /// Pick the connector: the base one, unless it is single-file, in which
    /// case the one named by `connector_attr`.
    pub fn resolve<H>(&self, host: &H) -> DbResult<Arc<dyn SqlConnector>>
    where
        H: ConnectorHost + ?Sized,
    {
        let base = host.connector().ok_or_else(|| {
            DaoError::relational(
                ErrorCode::ConfInvalid,
                format!("Missing base connector '{BASE_CONNECTOR}' on instance."),
            )
        })?;

        if base.dialect() != Some(Dialect::Sqlite) {
            return Ok(base);
        }
        host.alternate_connector(&self.connector_attr)
            .ok_or_else(|| {
                DaoError::relational(
                    ErrorCode::ConfInvalid,
                    format!(
                        "Connector '{}' required for SQLite but not provided.",
                        self.connector_attr
                    ),
                )
            })
    }

    /// Run `op` with an injected connection.
    pub async fn run<H, F, T>(&self, host: &H, op: F) -> DbResult<T>
    where
        H: ConnectorHost + ?Sized,
        F: AsyncFnOnce(&mut Connection) -> DbResult<T>,
    {
        let connector = self.resolve(host)?;

        if !self.is_write {
            let mut conn = connector.get_read_connection().await?;
            return op(&mut conn).await;
        }

        let mut conn = connector.begin_write_transaction().await?;
        match op(&mut conn).await {
            Ok(value) => {
                conn.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if let Err(rollback) = conn.rollback().await {
                    warn!(error = %rollback, "Rollback failed after operation error");
                }
                Err(err)
            }
        }
    }

    /// Like [`run`](Self::run), but a connection supplied by the caller
    /// always wins; it is used as-is, without a new transaction.
    pub async fn run_with<H, F, T>(
        &self,
        host: &H,
        manual: Option<&mut Connection>,
        op: F,
    ) -> DbResult<T>
    where
        H: ConnectorHost + ?Sized,
        F: AsyncFnOnce(&mut Connection) -> DbResult<T>,
    {
        match manual {
            Some(conn) => op(conn).await,
            None => self.run(host, op).await,
        }
    }
}

impl Default for InjectConnection {
    fn default() -> Self {
        Self::read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connectors::SqliteConnector;

    struct Host {
        base: Option<Arc<dyn SqlConnector>>,
        sqlite: Option<Arc<dyn SqlConnector>>,
    }

    impl ConnectorHost for Host {
        fn connector(&self) -> Option<Arc<dyn SqlConnector>> {
            self.base.clone()
        }

        fn alternate_connector(&self, name: &str) -> Option<Arc<dyn SqlConnector>> {
            match name {
                BASE_CONNECTOR => self.base.clone(),
                "sqlite_connector" => self.sqlite.clone(),
                _ => None,
            }
        }
    }

    fn sqlite_connector(file: &tempfile::NamedTempFile) -> Arc<dyn SqlConnector> {
        Arc::new(SqliteConnector::new(file.path(), 0).unwrap())
    }

    #[test]
    fn test_missing_base_connector() {
        let host = Host {
            base: None,
            sqlite: None,
        };
        let err = InjectConnection::read().resolve(&host).err().unwrap();
        assert_eq!(err.code(), ErrorCode::ConfInvalid);
    }

    #[tokio::test]
    async fn test_single_file_base_uses_named_connector() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let base = sqlite_connector(&file);
        let other = sqlite_connector(&file);
        let host = Host {
            base: Some(base.clone()),
            sqlite: Some(other.clone()),
        };

        let resolved = InjectConnection::write()
            .with_connector_attr("sqlite_connector")
            .resolve(&host)
            .unwrap();
        assert!(Arc::ptr_eq(&resolved, &other));

        // the default attribute names the base connector itself
        let resolved = InjectConnection::write().resolve(&host).unwrap();
        assert!(Arc::ptr_eq(&resolved, &base));
    }

    #[tokio::test]
    async fn test_single_file_base_without_named_connector() {
        let file = tempfile::NamedTempFile::new().unwrap();
        let host = Host {
            base: Some(sqlite_connector(&file)),
            sqlite: None,
        };
        let err = InjectConnection::read()
            .with_connector_attr("sqlite_connector")
            .resolve(&host)
            .err()
            .unwrap();
        assert_eq!(err.code(), ErrorCode::ConfInvalid);
        assert!(err.message().contains("sqlite_connector"));
    }
}
