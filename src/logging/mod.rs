//! Structured logging contract.
//!
//! Every lifecycle and execution event is assembled with a [`LogBuilder`] and
//! handed to a [`LogSink`] as a single [`LogRecord`]. Field keys are stable:
//! downstream log pipelines index on `event.action`, `event.outcome`,
//! `error.code` and the `db.*` context block.

mod builder;
mod sink;

pub use builder::{DbContext, LogBuilder, error_type_name};
pub use sink::{LogSink, MemorySink, TracingSink, default_sink};

use serde_json::{Map, Value as JsonValue};
use std::fmt;

/// Closed taxonomy of event actions (`event.action`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LogAction {
    MongoInit,
    MongoPing,
    MongoOdmInit,
    MongoQuery,
    MongoClose,
    SqlInit,
    SqlPoolReady,
    SqlQuery,
    SqlClose,
}

impl LogAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MongoInit => "mongo.init",
            Self::MongoPing => "mongo.ping",
            Self::MongoOdmInit => "mongo.odm.init",
            Self::MongoQuery => "mongo.query",
            Self::MongoClose => "mongo.close",
            Self::SqlInit => "sql.init",
            Self::SqlPoolReady => "sql.pool.ready",
            Self::SqlQuery => "sql.query",
            Self::SqlClose => "sql.close",
        }
    }
}

impl fmt::Display for LogAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Event outcome (`event.outcome`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Outcome {
    Success,
    Failure,
    Unknown,
}

impl Outcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Success => "success",
            Self::Failure => "failure",
            Self::Unknown => "unknown",
        }
    }
}

impl fmt::Display for Outcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Severity {
    Debug,
    Info,
    Warn,
    Error,
}

/// One assembled log event.
#[derive(Debug, Clone, PartialEq)]
pub struct LogRecord {
    pub severity: Severity,
    pub message: String,
    pub fields: Map<String, JsonValue>,
    /// Set when a failure was stamped; `error.stack_trace` then holds the cause chain.
    pub capture_stack: bool,
}

impl LogRecord {
    pub fn field(&self, key: &str) -> Option<&JsonValue> {
        self.fields.get(key)
    }

    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(JsonValue::as_str)
    }

    pub fn action(&self) -> Option<&str> {
        self.str_field("event.action")
    }

    pub fn outcome(&self) -> Option<&str> {
        self.str_field("event.outcome")
    }

    pub fn error_code(&self) -> Option<u64> {
        self.fields.get("error.code").and_then(JsonValue::as_u64)
    }

    pub fn duration_ms(&self) -> Option<f64> {
        self.fields.get("duration_ms").and_then(JsonValue::as_f64)
    }

    pub fn is_failure(&self) -> bool {
        self.outcome() == Some(Outcome::Failure.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_action_names() {
        assert_eq!(LogAction::MongoOdmInit.as_str(), "mongo.odm.init");
        assert_eq!(LogAction::SqlPoolReady.to_string(), "sql.pool.ready");
    }

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Debug < Severity::Info);
        assert!(Severity::Warn < Severity::Error);
    }
}
