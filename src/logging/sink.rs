//! Log sinks.

use super::{LogRecord, Severity};
use serde_json::{Map, Value as JsonValue};
use std::sync::{Arc, Mutex, PoisonError};
use tracing::Level;

/// Destination for assembled log records.
pub trait LogSink: Send + Sync {
    fn record(&self, record: LogRecord);
}

/// Sink used when the caller does not provide one.
pub fn default_sink() -> Arc<dyn LogSink> {
    Arc::new(TracingSink)
}

/// Forwards records to `tracing` with the contract keys as dotted field names.
///
/// Fields outside the contract set are serialised into a single `extra` JSON
/// field so subscribers see one flat event per record.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

const CONTRACT_KEYS: &[&str] = &[
    "event.action",
    "event.outcome",
    "error.code",
    "error.type",
    "error.message",
    "error.stack_trace",
    "duration_ms",
    "db.system",
    "db.name",
    "db.host",
];

impl LogSink for TracingSink {
    fn record(&self, record: LogRecord) {
        let extra: Map<String, JsonValue> = record
            .fields
            .iter()
            .filter(|(k, _)| !CONTRACT_KEYS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        let extra = (!extra.is_empty()).then(|| JsonValue::Object(extra).to_string());
        let extra = extra.as_deref();

        let action = record.action();
        let outcome = record.outcome();
        let code = record.error_code();
        let error_type = record.str_field("error.type");
        let error_message = record.str_field("error.message");
        let stack_trace = record.str_field("error.stack_trace");
        let duration_ms = record.duration_ms();
        let system = record.str_field("db.system");
        let name = record.str_field("db.name");
        let host = record.str_field("db.host");
        let message = record.message.as_str();

        // `event!` needs a constant level, hence one arm per severity.
        match record.severity {
            Severity::Debug => tracing::event!(
                target: "daokit",
                Level::DEBUG,
                event.action = action,
                event.outcome = outcome,
                error.code = code,
                error.r#type = error_type,
                error.message = error_message,
                error.stack_trace = stack_trace,
                duration_ms = duration_ms,
                db.system = system,
                db.name = name,
                db.host = host,
                extra = extra,
                "{message}"
            ),
            Severity::Info => tracing::event!(
                target: "daokit",
                Level::INFO,
                event.action = action,
                event.outcome = outcome,
                error.code = code,
                error.r#type = error_type,
                error.message = error_message,
                error.stack_trace = stack_trace,
                duration_ms = duration_ms,
                db.system = system,
                db.name = name,
                db.host = host,
                extra = extra,
                "{message}"
            ),
            Severity::Warn => tracing::event!(
                target: "daokit",
                Level::WARN,
                event.action = action,
                event.outcome = outcome,
                error.code = code,
                error.r#type = error_type,
                error.message = error_message,
                error.stack_trace = stack_trace,
                duration_ms = duration_ms,
                db.system = system,
                db.name = name,
                db.host = host,
                extra = extra,
                "{message}"
            ),
            Severity::Error => tracing::event!(
                target: "daokit",
                Level::ERROR,
                event.action = action,
                event.outcome = outcome,
                error.code = code,
                error.r#type = error_type,
                error.message = error_message,
                error.stack_trace = stack_trace,
                duration_ms = duration_ms,
                db.system = system,
                db.name = name,
                db.host = host,
                extra = extra,
                "{message}"
            ),
        }
    }
}

/// Keeps records in memory, for tests and for embedding in hosts that ship
/// logs themselves.
#[derive(Debug, Default)]
pub struct MemorySink {
    records: Mutex<Vec<LogRecord>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn records(&self) -> Vec<LogRecord> {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Records whose `event.action` matches.
    pub fn with_action(&self, action: &str) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(|r| r.action() == Some(action))
            .collect()
    }

    /// Failure-outcome records.
    pub fn failures(&self) -> Vec<LogRecord> {
        self.records()
            .into_iter()
            .filter(LogRecord::is_failure)
            .collect()
    }

    pub fn clear(&self) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

impl LogSink for MemorySink {
    fn record(&self, record: LogRecord) {
        self.records
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(record);
    }
}
