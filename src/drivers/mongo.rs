//! MongoDB backend for the document driver.

use crate::drivers::document::{ClientSettings, DocumentClient, DocumentClientFactory};
use crate::drivers::monitor::CommandMonitor;
use crate::error::{DocumentClientError, DocumentErrorKind};
use async_trait::async_trait;
use mongodb::bson::doc;
use mongodb::error::{Error as MongoError, ErrorKind};
use mongodb::event::EventHandler;
use mongodb::event::command::CommandEvent;
use mongodb::options::{ClientOptions, Tls, TlsOptions};
use mongodb::{Client, Database};
use std::any::Any;
use std::sync::Arc;

/// Server error code for "Unauthorized".
const UNAUTHORIZED: i32 = 13;

fn classify(err: &MongoError) -> DocumentErrorKind {
    match err.kind.as_ref() {
        ErrorKind::InvalidArgument { .. } | ErrorKind::InvalidTlsConfig { .. } => {
            DocumentErrorKind::Configuration
        }
        ErrorKind::ServerSelection { .. } => DocumentErrorKind::ServerSelectionTimeout,
        ErrorKind::Authentication { .. } => DocumentErrorKind::Authentication,
        ErrorKind::Command(cmd) if cmd.code == UNAUTHORIZED => DocumentErrorKind::Authorization,
        ErrorKind::Command(_) => DocumentErrorKind::Authentication,
        ErrorKind::Io(_) | ErrorKind::ConnectionPoolCleared { .. } => DocumentErrorKind::Network,
        ErrorKind::DnsResolve { .. } => DocumentErrorKind::Dns,
        _ => DocumentErrorKind::Other,
    }
}

fn to_client_error(err: MongoError) -> DocumentClientError {
    let mut mapped = DocumentClientError::new(classify(&err), err.to_string());
    mapped.source = Some(Box::new(err));
    mapped
}

fn route_event(monitor: &CommandMonitor, event: CommandEvent) {
    match event {
        CommandEvent::Started(ev) => monitor.started(i64::from(ev.request_id)),
        CommandEvent::Succeeded(ev) => {
            monitor.succeeded(i64::from(ev.request_id), &ev.command_name)
        }
        CommandEvent::Failed(ev) => monitor.failed(
            i64::from(ev.request_id),
            &ev.command_name,
            &ev.failure.to_string(),
        ),
        _ => {}
    }
}

/// Builds [`MongoClient`]s from the official driver.
#[derive(Debug, Default, Clone, Copy)]
pub struct MongoClientFactory;

#[async_trait]
impl DocumentClientFactory for MongoClientFactory {
    async fn build(
        &self,
        settings: &ClientSettings,
    ) -> Result<Arc<dyn DocumentClient>, DocumentClientError> {
        let mut options = ClientOptions::parse(&settings.uri)
            .await
            .map_err(to_client_error)?;

        options.min_pool_size = Some(settings.min_pool_size);
        options.max_pool_size = Some(settings.max_pool_size);
        options.server_selection_timeout = Some(settings.server_selection_timeout);
        if settings.tls {
            options.tls = Some(Tls::Enabled(TlsOptions::default()));
        }
        if let Some(monitor) = settings.monitor.clone() {
            options.command_event_handler = Some(EventHandler::callback(
                move |event: CommandEvent| route_event(&monitor, event),
            ));
        }

        let client = Client::with_options(options).map_err(to_client_error)?;
        Ok(Arc::new(MongoClient { client }))
    }
}

#[derive(Debug, Clone)]
pub struct MongoClient {
    client: Client,
}

impl MongoClient {
    pub fn inner(&self) -> &Client {
        &self.client
    }

    pub fn database(&self, name: &str) -> Database {
        self.client.database(name)
    }
}

#[async_trait]
impl DocumentClient for MongoClient {
    async fn ping(&self) -> Result<(), DocumentClientError> {
        self.client
            .database("admin")
            .run_command(doc! { "ping": 1 })
            .await
            .map(drop)
            .map_err(to_client_error)
    }

    async fn close(&self) -> Result<(), DocumentClientError> {
        self.client.clone().shutdown().await;
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}
