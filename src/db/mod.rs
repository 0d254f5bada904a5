//! Relational data access.
//!
//! This module provides:
//! - Pooled and transactional connections bound to a connector's engines
//! - Connection injection for data-access operations
//! - Statement execution with logging and failure classification
//! - Parameter binding and row decoding per dialect

pub mod connection;
pub mod dao;
pub mod inject;
pub mod params;
pub mod types;

pub use connection::Connection;
pub use dao::SqlDaoHelper;
pub use inject::{BASE_CONNECTOR, ConnectorHost, InjectConnection};
pub use types::{JsonRow, RowToJson};
