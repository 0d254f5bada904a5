//! Connectors own the live connection state of one database family.
//!
//! Every connector initializes under a single-flight lock: concurrent
//! `init()` callers wait on the same lock and observe the outcome of the one
//! that did the work. A failed initialization always leaves the connector
//! uninitialized.

mod document;
mod rdbms;
mod sqlite;

pub use document::{DatabaseHandle, DocumentConnector, SchemaBinder};
pub use rdbms::RdbmsConnector;
pub use sqlite::SqliteConnector;

use crate::db::Connection;
use crate::drivers::Engine;
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::models::{Dialect, Direction};
use async_trait::async_trait;

/// Lifecycle shared by every connector.
#[async_trait]
pub trait Connector: Send + Sync {
    /// `db.system` value, e.g. `mongodb` or `postgresql`.
    fn system(&self) -> &'static str;

    /// Idempotent initialization.
    async fn init(&self) -> DbResult<()>;

    /// Release everything and return to the uninitialized state.
    ///
    /// Safe to call repeatedly; never fails.
    async fn close(&self);

    fn is_initialized(&self) -> bool;
}

fn not_initialized(direction: Direction) -> DaoError {
    DaoError::relational(
        ErrorCode::NetUnreachable,
        format!("Connector not initialized! Cannot get {direction} connection."),
    )
}

/// Relational connectors: a write engine and a read engine.
#[async_trait]
pub trait SqlConnector: Connector {
    /// Dialect of the engines; `None` before the first successful init.
    fn dialect(&self) -> Option<Dialect>;

    fn write_engine(&self) -> Option<Engine>;

    fn read_engine(&self) -> Option<Engine>;

    /// Credential-masked URL or file path.
    fn database_url(&self) -> String;

    fn supports_transactions(&self) -> bool {
        true
    }

    fn pool_size(&self) -> u32;

    fn max_overflow(&self) -> u32;

    fn pool_recycle(&self) -> u64;

    fn pool_timeout(&self) -> u64;

    /// A fresh pooled connection from the read engine.
    async fn get_read_connection(&self) -> DbResult<Connection> {
        let engine = self
            .read_engine()
            .ok_or_else(|| not_initialized(Direction::Read))?;
        Connection::acquire(&engine, Direction::Read).await
    }

    /// A fresh pooled connection from the write engine, without a transaction.
    async fn get_write_connection(&self) -> DbResult<Connection> {
        let engine = self
            .write_engine()
            .ok_or_else(|| not_initialized(Direction::Write))?;
        Connection::acquire(&engine, Direction::Write).await
    }

    /// A write connection with an open transaction.
    async fn begin_write_transaction(&self) -> DbResult<Connection> {
        let engine = self
            .write_engine()
            .ok_or_else(|| not_initialized(Direction::Write))?;
        Connection::begin(&engine).await
    }

    /// Check out a write connection and run `SELECT 1`.
    async fn is_connected(&self) -> bool {
        match self.write_engine() {
            Some(engine) => engine.ping().await.is_ok(),
            None => false,
        }
    }

    /// Server version, or an empty string when unavailable.
    async fn version(&self) -> String {
        match self.write_engine() {
            Some(engine) => engine.server_version().await.unwrap_or_default(),
            None => String::new(),
        }
    }

    /// Dispose the engines.
    async fn reset(&self) {
        self.close().await;
    }
}
