//! Document-store driver.
//!
//! The driver turns a [`DocumentDescriptor`] into exactly one native client
//! through a [`DocumentClientFactory`]. It owns nothing else; process-wide
//! state lives in the connector.

use crate::drivers::monitor::CommandMonitor;
use crate::error::DocumentClientError;
use crate::logging::{LogAction, LogBuilder, LogSink, Severity};
use crate::models::DocumentDescriptor;
use async_trait::async_trait;
use std::any::Any;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

/// A live native client for the document store.
#[async_trait]
pub trait DocumentClient: Send + Sync + fmt::Debug {
    /// Administrative liveness command.
    async fn ping(&self) -> Result<(), DocumentClientError>;

    /// Release sockets and background tasks.
    async fn close(&self) -> Result<(), DocumentClientError>;

    /// Downcast hook for schema binders that need the concrete client.
    fn as_any(&self) -> &dyn Any;
}

/// Options handed to a [`DocumentClientFactory`].
#[derive(Clone)]
pub struct ClientSettings {
    pub uri: String,
    pub min_pool_size: u32,
    pub max_pool_size: u32,
    pub server_selection_timeout: Duration,
    pub tls: bool,
    pub monitor: Option<Arc<CommandMonitor>>,
}

impl fmt::Debug for ClientSettings {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClientSettings")
            .field("uri", &"<redacted>")
            .field("min_pool_size", &self.min_pool_size)
            .field("max_pool_size", &self.max_pool_size)
            .field("server_selection_timeout", &self.server_selection_timeout)
            .field("tls", &self.tls)
            .field("monitor", &self.monitor.is_some())
            .finish()
    }
}

/// Builds native clients. Building must not block on network I/O.
#[async_trait]
pub trait DocumentClientFactory: Send + Sync {
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn DocumentClient>, DocumentClientError>;
}

pub struct DocumentDriver {
    descriptor: DocumentDescriptor,
    factory: Arc<dyn DocumentClientFactory>,
    sink: Arc<dyn LogSink>,
    query_logging: bool,
    client: Option<Arc<dyn DocumentClient>>,
    monitor: Option<Arc<CommandMonitor>>,
}

impl DocumentDriver {
    pub fn new(
        descriptor: DocumentDescriptor,
        factory: Arc<dyn DocumentClientFactory>,
        sink: Arc<dyn LogSink>,
    ) -> Self {
        Self {
            descriptor,
            factory,
            sink,
            query_logging: false,
            client: None,
            monitor: None,
        }
    }

    /// Attach a [`CommandMonitor`] to every client built by this driver.
    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }

    pub fn descriptor(&self) -> &DocumentDescriptor {
        &self.descriptor
    }

    /// Build the client, or return the one already built.
    ///
    /// Build failures are returned to the caller, which owns failure logging.
    pub async fn connect(&mut self) -> Result<Arc<dyn DocumentClient>, DocumentClientError> {
        if let Some(client) = &self.client {
            return Ok(Arc::clone(client));
        }

        let monitor = self.query_logging.then(|| {
            Arc::new(CommandMonitor::new(
                self.descriptor.database(),
                &self.descriptor.safe_host_label(),
                Arc::clone(&self.sink),
            ))
        });

        let settings = ClientSettings {
            uri: self.descriptor.connection_uri(),
            min_pool_size: self.descriptor.min_pool_size(),
            max_pool_size: self.descriptor.max_pool_size(),
            server_selection_timeout: self.descriptor.server_selection_timeout(),
            tls: self.descriptor.use_tls(),
            monitor: monitor.clone(),
        };

        let client = self.factory.build(&settings).await?;

        LogBuilder::new(&self.sink)
            .event(LogAction::MongoInit)
            .success()
            .msg("Document client created")
            .db_context(&self.descriptor.db_context())
            .level(Severity::Debug)
            .emit();

        self.monitor = monitor;
        self.client = Some(Arc::clone(&client));
        Ok(client)
    }

    pub fn client(&self) -> Option<&Arc<dyn DocumentClient>> {
        self.client.as_ref()
    }

    /// Close the client and detach instrumentation. Safe to call repeatedly.
    pub async fn disconnect(&mut self) -> Result<(), DocumentClientError> {
        if let Some(monitor) = self.monitor.take() {
            monitor.detach();
        }
        let Some(client) = self.client.take() else {
            return Ok(());
        };

        match client.close().await {
            Ok(()) => {
                LogBuilder::new(&self.sink)
                    .event(LogAction::MongoClose)
                    .success()
                    .msg("Document client closed")
                    .field("db.host", self.descriptor.safe_host_label())
                    .level(Severity::Debug)
                    .emit();
                Ok(())
            }
            Err(err) => {
                LogBuilder::new(&self.sink)
                    .event(LogAction::MongoClose)
                    .msg("Error closing document client")
                    .field("error.message", err.to_string())
                    .level(Severity::Warn)
                    .emit();
                Err(err)
            }
        }
    }

    /// Close without logging; used while rolling back a failed init so the
    /// original error is not masked.
    pub async fn abandon(&mut self) {
        if let Some(monitor) = self.monitor.take() {
            monitor.detach();
        }
        if let Some(client) = self.client.take() {
            let _ = client.close().await;
        }
    }
}

impl fmt::Debug for DocumentDriver {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentDriver")
            .field("descriptor", &self.descriptor)
            .field("connected", &self.client.is_some())
            .field("query_logging", &self.query_logging)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DocumentErrorKind;
    use crate::logging::MemorySink;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Debug, Default)]
    struct StubClient {
        closed: AtomicUsize,
    }

    #[async_trait]
    impl DocumentClient for StubClient {
        async fn ping(&self) -> Result<(), DocumentClientError> {
            Ok(())
        }

        async fn close(&self) -> Result<(), DocumentClientError> {
            self.closed.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }

        fn as_any(&self) -> &dyn Any {
            self
        }
    }

    #[derive(Default)]
    struct StubFactory {
        builds: AtomicUsize,
        fail: bool,
        last_uri: std::sync::Mutex<Option<String>>,
    }

    #[async_trait]
    impl DocumentClientFactory for StubFactory {
        async fn build(
            &self,
            settings: &ClientSettings,
        ) -> Result<Arc<dyn DocumentClient>, DocumentClientError> {
            self.builds.fetch_add(1, Ordering::SeqCst);
            *self.last_uri.lock().unwrap() = Some(settings.uri.clone());
            if self.fail {
                return Err(DocumentClientError::new(
                    DocumentErrorKind::Configuration,
                    "bad uri",
                ));
            }
            Ok(Arc::new(StubClient::default()))
        }
    }

    fn descriptor() -> DocumentDescriptor {
        DocumentDescriptor::new("user", "p@ss", "localhost", "orders")
    }

    #[tokio::test]
    async fn test_connect_is_idempotent() {
        let factory = Arc::new(StubFactory::default());
        let sink = Arc::new(MemorySink::new());
        let mut driver = DocumentDriver::new(descriptor(), factory.clone(), sink.clone());

        driver.connect().await.unwrap();
        driver.connect().await.unwrap();
        assert_eq!(factory.builds.load(Ordering::SeqCst), 1);

        let uri = factory.last_uri.lock().unwrap().clone().unwrap();
        assert!(uri.contains("p%40ss"));

        let created = sink.with_action("mongo.init");
        assert_eq!(created.len(), 1);
        assert_eq!(created[0].severity, Severity::Debug);
        assert_eq!(created[0].str_field("db.system"), Some("mongodb"));
    }

    #[tokio::test]
    async fn test_build_failure_is_returned_unlogged() {
        let factory = Arc::new(StubFactory {
            fail: true,
            ..Default::default()
        });
        let sink = Arc::new(MemorySink::new());
        let mut driver = DocumentDriver::new(descriptor(), factory, sink.clone());

        let err = driver.connect().await.unwrap_err();
        assert_eq!(err.kind, DocumentErrorKind::Configuration);
        assert!(driver.client().is_none());
        assert!(sink.records().is_empty());
    }

    #[tokio::test]
    async fn test_disconnect_is_repeatable() {
        let factory = Arc::new(StubFactory::default());
        let sink = Arc::new(MemorySink::new());
        let mut driver =
            DocumentDriver::new(descriptor(), factory, sink.clone()).with_query_logging(true);

        driver.connect().await.unwrap();
        driver.disconnect().await.unwrap();
        driver.disconnect().await.unwrap();
        assert!(driver.client().is_none());
        assert_eq!(sink.with_action("mongo.close").len(), 1);
    }
}
