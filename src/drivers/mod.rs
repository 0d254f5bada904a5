//! Low-level drivers.
//!
//! One driver per database family. A driver builds and tears down native
//! clients/engines from a descriptor and keeps no state beyond what it built.

pub mod document;
#[cfg(feature = "mongodb")]
pub mod mongo;
pub mod monitor;
pub mod sql;
pub mod sqlite;

pub use document::{ClientSettings, DocumentClient, DocumentClientFactory, DocumentDriver};
#[cfg(feature = "mongodb")]
pub use mongo::{MongoClient, MongoClientFactory};
pub use monitor::CommandMonitor;
pub use sql::{Engine, EnginePool, SqlDriver};
pub use sqlite::SqliteDriver;
