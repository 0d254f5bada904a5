//! Command-level instrumentation for the document client.
//!
//! The native client reports command start/success/failure events; the
//! monitor pairs them by request id and emits one `mongo.query` event per
//! completed command.

use crate::error::ErrorCode;
use crate::logging::{DbContext, LogAction, LogBuilder, LogSink, Severity};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

/// Failure reported by the server for one command.
#[derive(Debug, thiserror::Error)]
#[error("{0}")]
pub struct CommandFailure(pub String);

pub struct CommandMonitor {
    context: DbContext,
    sink: Arc<dyn LogSink>,
    started: Mutex<HashMap<i64, Instant>>,
    active: AtomicBool,
}

impl CommandMonitor {
    pub fn new(db_name: &str, host_label: &str, sink: Arc<dyn LogSink>) -> Self {
        Self {
            context: DbContext::new("mongodb", db_name, host_label),
            sink,
            started: Mutex::new(HashMap::new()),
            active: AtomicBool::new(true),
        }
    }

    /// First 16 hex chars of the SHA-256 of the command name.
    pub fn statement_hash(command_name: &str) -> String {
        let digest = Sha256::digest(command_name.as_bytes());
        hex::encode(digest)[..16].to_string()
    }

    pub fn started(&self, request_id: i64) {
        if !self.is_active() {
            return;
        }
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(request_id, Instant::now());
    }

    pub fn succeeded(&self, request_id: i64, command_name: &str) {
        if !self.is_active() {
            return;
        }
        let duration_ms = self.take_elapsed_ms(request_id);
        LogBuilder::new(&self.sink)
            .event(LogAction::MongoQuery)
            .success()
            .msg(format!("Query: {command_name}"))
            .duration_ms(duration_ms)
            .db_context(&self.context)
            .field("db.statement_hash", Self::statement_hash(command_name))
            .field("db.operation", command_name)
            .level(Severity::Debug)
            .emit();
    }

    pub fn failed(&self, request_id: i64, command_name: &str, failure: &str) {
        if !self.is_active() {
            return;
        }
        let duration_ms = self.take_elapsed_ms(request_id);
        let cause = CommandFailure(failure.to_string());
        LogBuilder::new(&self.sink)
            .event(LogAction::MongoQuery)
            .failure(ErrorCode::QuerySyntax, &cause)
            .msg(format!("Query failed: {command_name}"))
            .duration_ms(duration_ms)
            .db_context(&self.context)
            .field("db.statement_hash", Self::statement_hash(command_name))
            .field("db.operation", command_name)
            .emit();
    }

    /// Stop reporting and forget in-flight commands.
    pub fn detach(&self) {
        self.active.store(false, Ordering::Release);
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }

    pub fn is_active(&self) -> bool {
        self.active.load(Ordering::Acquire)
    }

    /// Commands started but not yet completed.
    pub fn pending(&self) -> usize {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    // A completion without a matching start reports zero.
    fn take_elapsed_ms(&self, request_id: i64) -> f64 {
        self.started
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(&request_id)
            .map(|start| start.elapsed().as_secs_f64() * 1000.0)
            .unwrap_or(0.0)
    }
}

impl std::fmt::Debug for CommandMonitor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandMonitor")
            .field("db", &self.context.name())
            .field("host", &self.context.host())
            .field("active", &self.is_active())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::logging::MemorySink;

    fn monitor() -> (Arc<MemorySink>, CommandMonitor) {
        let sink = Arc::new(MemorySink::new());
        let monitor = CommandMonitor::new("orders", "cluster0.example (srv)", sink.clone());
        (sink, monitor)
    }

    #[test]
    fn test_statement_hash_is_stable() {
        let hash = CommandMonitor::statement_hash("find");
        assert_eq!(hash.len(), 16);
        assert_eq!(hash, CommandMonitor::statement_hash("find"));
        assert_ne!(hash, CommandMonitor::statement_hash("insert"));
    }

    #[test]
    fn test_succeeded_emits_debug_query_event() {
        let (sink, monitor) = monitor();
        monitor.started(7);
        assert_eq!(monitor.pending(), 1);
        monitor.succeeded(7, "find");
        assert_eq!(monitor.pending(), 0);

        let records = sink.with_action("mongo.query");
        assert_eq!(records.len(), 1);
        let record = &records[0];
        assert_eq!(record.severity, Severity::Debug);
        assert_eq!(record.outcome(), Some("success"));
        assert_eq!(record.str_field("db.operation"), Some("find"));
        assert_eq!(record.str_field("db.host"), Some("cluster0.example (srv)"));
        assert!(record.duration_ms().is_some());
    }

    #[test]
    fn test_failed_emits_query_syntax_code() {
        let (sink, monitor) = monitor();
        monitor.started(1);
        monitor.failed(1, "aggregate", "unknown operator $foo");

        let failures = sink.failures();
        assert_eq!(failures.len(), 1);
        assert_eq!(failures[0].error_code(), Some(4002));
        assert_eq!(
            failures[0].str_field("error.message"),
            Some("unknown operator $foo")
        );
    }

    #[test]
    fn test_detached_monitor_is_silent() {
        let (sink, monitor) = monitor();
        monitor.started(1);
        monitor.detach();
        assert_eq!(monitor.pending(), 0);
        monitor.succeeded(1, "find");
        assert!(sink.records().is_empty());
    }
}
