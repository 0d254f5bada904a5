//! daokit library
//!
//! Connector lifecycle, pooling, connection injection and structured logging
//! for relational databases (PostgreSQL, MySQL, SQLite) and document stores.

pub mod config;
pub mod connectors;
pub mod context;
pub mod db;
pub mod drivers;
pub mod error;
pub mod logging;
pub mod models;

pub use config::Config;
pub use connectors::{Connector, DocumentConnector, RdbmsConnector, SqlConnector, SqliteConnector};
pub use context::DataContext;
pub use db::{Connection, InjectConnection, SqlDaoHelper};
pub use error::{DaoError, DbResult, ErrorCode};
