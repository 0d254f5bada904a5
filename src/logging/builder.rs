//! Fluent builder for structured log events.

use super::{LogAction, LogRecord, LogSink, Outcome, Severity};
use crate::error::{DaoError, DocumentClientError, ErrorCode};
use serde_json::{Map, Value as JsonValue};
use std::error::Error as StdError;
use std::sync::Arc;

/// Database context block (`db.*` fields).
///
/// System, database name and host label always travel together; the extras
/// carry family-specific values such as pool bounds or TLS/SRV flags.
#[derive(Debug, Clone, PartialEq)]
pub struct DbContext {
    system: String,
    name: String,
    host: String,
    extras: Vec<(String, JsonValue)>,
}

impl DbContext {
    pub fn new(system: impl Into<String>, name: impl Into<String>, host: impl Into<String>) -> Self {
        Self {
            system: system.into(),
            name: name.into(),
            host: host.into(),
            extras: Vec::new(),
        }
    }

    /// Add a family-specific field, e.g. `db.pool.max`.
    pub fn with(mut self, key: impl Into<String>, value: impl Into<JsonValue>) -> Self {
        self.extras.push((key.into(), value.into()));
        self
    }

    pub fn system(&self) -> &str {
        &self.system
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }
}

/// Name written to `error.type` for a cause.
pub fn error_type_name(cause: &(dyn StdError + 'static)) -> &'static str {
    if let Some(err) = cause.downcast_ref::<DaoError>() {
        err.kind_name()
    } else if cause.is::<DocumentClientError>() {
        "DocumentClientError"
    } else if cause.is::<sqlx::Error>() {
        "SqlxError"
    } else if cause.is::<std::io::Error>() {
        "IoError"
    } else {
        "Error"
    }
}

fn render_chain(cause: &(dyn StdError + 'static)) -> String {
    let mut out = cause.to_string();
    let mut next = cause.source();
    while let Some(err) = next {
        out.push_str("\ncaused by: ");
        out.push_str(&err.to_string());
        next = err.source();
    }
    out
}

/// Builder for one log event.
///
/// Configuration calls only mutate the pending event; [`emit`](Self::emit)
/// consumes the builder and hands the record to the sink exactly once.
#[must_use = "a log builder does nothing until `emit()` is called"]
pub struct LogBuilder {
    sink: Arc<dyn LogSink>,
    severity: Severity,
    message: String,
    fields: Map<String, JsonValue>,
    capture_stack: bool,
}

impl LogBuilder {
    pub fn new(sink: &Arc<dyn LogSink>) -> Self {
        Self {
            sink: Arc::clone(sink),
            severity: Severity::Info,
            message: String::new(),
            fields: Map::new(),
            capture_stack: false,
        }
    }

    /// Set `event.action`.
    pub fn event(mut self, action: LogAction) -> Self {
        self.fields
            .insert("event.action".into(), action.as_str().into());
        self
    }

    /// Mark the event successful; severity becomes info.
    pub fn success(mut self) -> Self {
        self.severity = Severity::Info;
        self.fields
            .insert("event.outcome".into(), Outcome::Success.as_str().into());
        self
    }

    /// Mark the event failed and stamp the error schema.
    ///
    /// Severity becomes error and the cause chain is captured into
    /// `error.stack_trace`.
    pub fn failure(mut self, code: ErrorCode, cause: &(dyn StdError + 'static)) -> Self {
        self.severity = Severity::Error;
        self.capture_stack = true;
        self.fields
            .insert("event.outcome".into(), Outcome::Failure.as_str().into());
        self.fields.insert("error.code".into(), code.as_u32().into());
        self.fields
            .insert("error.type".into(), error_type_name(cause).into());
        self.fields
            .insert("error.message".into(), cause.to_string().into());
        self.fields
            .insert("error.stack_trace".into(), render_chain(cause).into());
        self
    }

    /// Override `error.type` after [`failure`](Self::failure).
    pub fn error_type(mut self, name: &str) -> Self {
        self.fields.insert("error.type".into(), name.into());
        self
    }

    /// Set the human-readable message.
    pub fn msg(mut self, message: impl Into<String>) -> Self {
        self.message = message.into();
        self
    }

    pub fn duration_ms(mut self, ms: f64) -> Self {
        self.fields.insert("duration_ms".into(), ms.into());
        self
    }

    /// Attach the database context block.
    pub fn db_context(mut self, ctx: &DbContext) -> Self {
        self.fields
            .insert("db.system".into(), ctx.system.as_str().into());
        self.fields.insert("db.name".into(), ctx.name.as_str().into());
        self.fields.insert("db.host".into(), ctx.host.as_str().into());
        for (key, value) in &ctx.extras {
            self.fields.insert(key.clone(), value.clone());
        }
        self
    }

    /// Add an arbitrary structured field.
    pub fn field(mut self, key: &str, value: impl Into<JsonValue>) -> Self {
        self.fields.insert(key.to_string(), value.into());
        self
    }

    /// Override the derived severity.
    pub fn level(mut self, severity: Severity) -> Self {
        self.severity = severity;
        self
    }

    pub fn emit(mut self) {
        self.fields
            .entry("event.outcome")
            .or_insert_with(|| Outcome::Unknown.as_str().into());
        let record = LogRecord {
            severity: self.severity,
            message: self.message,
            fields: self.fields,
            capture_stack: self.capture_stack,
        };
        self.sink.record(record);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    fn memory() -> (Arc<MemorySink>, Arc<dyn LogSink>) {
        let sink = Arc::new(MemorySink::new());
        let dyn_sink: Arc<dyn LogSink> = sink.clone();
        (sink, dyn_sink)
    }

    #[test]
    fn test_success_event() {
        let (mem, sink) = memory();
        LogBuilder::new(&sink)
            .event(LogAction::MongoPing)
            .success()
            .msg("ping ok")
            .duration_ms(1.5)
            .emit();

        let records = mem.records();
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.severity, Severity::Info);
        assert_eq!(record.action(), Some("mongo.ping"));
        assert_eq!(record.outcome(), Some("success"));
        assert_eq!(record.duration_ms(), Some(1.5));
        assert!(!record.capture_stack);
    }

    #[test]
    fn test_failure_stamps_error_schema() {
        let (mem, sink) = memory();
        let inner = std::io::Error::other("socket closed");
        let err = DaoError::document_connection(ErrorCode::NetUnreachable, "Network Unreachable")
            .with_source(inner);
        LogBuilder::new(&sink)
            .event(LogAction::MongoInit)
            .failure(ErrorCode::NetUnreachable, &err)
            .msg("Network Unreachable")
            .emit();

        let record = &mem.records()[0];
        assert_eq!(record.severity, Severity::Error);
        assert!(record.capture_stack);
        assert!(record.is_failure());
        assert_eq!(record.error_code(), Some(2001));
        assert_eq!(record.str_field("error.type"), Some("DocumentConnectionError"));
        let trace = record.str_field("error.stack_trace").unwrap();
        assert!(trace.contains("caused by: socket closed"));
    }

    #[test]
    fn test_outcome_defaults_to_unknown() {
        let (mem, sink) = memory();
        LogBuilder::new(&sink).event(LogAction::SqlQuery).msg("about to run").emit();
        assert_eq!(mem.records()[0].outcome(), Some("unknown"));
    }

    #[test]
    fn test_db_context_and_level_override() {
        let (mem, sink) = memory();
        let ctx = DbContext::new("mongodb", "app", "cluster0.example (srv)")
            .with("db.srv", true)
            .with("db.pool.max", 50);
        LogBuilder::new(&sink)
            .event(LogAction::MongoQuery)
            .success()
            .db_context(&ctx)
            .field("db.operation", "find")
            .level(Severity::Debug)
            .emit();

        let record = &mem.records()[0];
        assert_eq!(record.severity, Severity::Debug);
        assert_eq!(record.str_field("db.system"), Some("mongodb"));
        assert_eq!(record.str_field("db.host"), Some("cluster0.example (srv)"));
        assert_eq!(record.field("db.srv"), Some(&JsonValue::Bool(true)));
        assert_eq!(record.str_field("db.operation"), Some("find"));
    }

    #[test]
    fn test_error_type_override() {
        let (mem, sink) = memory();
        LogBuilder::new(&sink)
            .event(LogAction::SqlQuery)
            .failure(ErrorCode::SqlWriteIntegrity, &sqlx::Error::RowNotFound)
            .error_type("IntegrityError")
            .emit();
        assert_eq!(mem.records()[0].str_field("error.type"), Some("IntegrityError"));
    }
}
