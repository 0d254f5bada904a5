//! In-memory fakes shared by the integration tests.

#![allow(dead_code)]

use async_trait::async_trait;
use daokit::connectors::{DatabaseHandle, SchemaBinder};
use daokit::drivers::{ClientSettings, DocumentClient, DocumentClientFactory};
use daokit::error::{BoxError, DocumentClientError, DocumentErrorKind};
use daokit::models::DocumentDescriptor;
use std::any::Any;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

pub fn descriptor() -> DocumentDescriptor {
    DocumentDescriptor::new("user", "pass", "cluster0.example", "app")
}

/// Client whose ping can be delayed or made to fail.
#[derive(Debug, Default)]
pub struct FakeClient {
    pub pings: AtomicUsize,
    pub closes: AtomicUsize,
    ping_delay: Option<Duration>,
    ping_failure: Option<DocumentErrorKind>,
}

#[async_trait]
impl DocumentClient for FakeClient {
    async fn ping(&self) -> Result<(), DocumentClientError> {
        self.pings.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.ping_delay {
            tokio::time::sleep(delay).await;
        }
        match self.ping_failure {
            Some(kind) => Err(DocumentClientError::new(kind, "ping rejected")),
            None => Ok(()),
        }
    }

    async fn close(&self) -> Result<(), DocumentClientError> {
        self.closes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

/// Factory that counts builds and hands out [`FakeClient`]s.
#[derive(Debug, Default)]
pub struct FakeFactory {
    pub builds: AtomicUsize,
    pub clients: Mutex<Vec<Arc<FakeClient>>>,
    ping_delay: Option<Duration>,
    ping_failure: Option<DocumentErrorKind>,
}

impl FakeFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_ping_delay(mut self, delay: Duration) -> Self {
        self.ping_delay = Some(delay);
        self
    }

    pub fn failing_ping(mut self, kind: DocumentErrorKind) -> Self {
        self.ping_failure = Some(kind);
        self
    }

    pub fn builds(&self) -> usize {
        self.builds.load(Ordering::SeqCst)
    }

    pub fn total_pings(&self) -> usize {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.pings.load(Ordering::SeqCst))
            .sum()
    }

    pub fn total_closes(&self) -> usize {
        self.clients
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.closes.load(Ordering::SeqCst))
            .sum()
    }
}

#[async_trait]
impl DocumentClientFactory for FakeFactory {
    async fn build(
        &self,
        _settings: &ClientSettings,
    ) -> Result<Arc<dyn DocumentClient>, DocumentClientError> {
        self.builds.fetch_add(1, Ordering::SeqCst);
        let client = Arc::new(FakeClient {
            ping_delay: self.ping_delay,
            ping_failure: self.ping_failure,
            ..FakeClient::default()
        });
        self.clients.lock().unwrap().push(client.clone());
        Ok(client)
    }
}

/// Binder that fails whenever a model in `poison` is part of the bound set.
#[derive(Debug, Default)]
pub struct FakeBinder {
    pub calls: Mutex<Vec<Vec<String>>>,
    poison: Vec<String>,
    delay: Option<Duration>,
}

impl FakeBinder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn rejecting(models: &[&str]) -> Self {
        Self {
            poison: models.iter().map(|m| m.to_string()).collect(),
            ..Self::default()
        }
    }

    /// Sleep before answering each bind.
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn calls(&self) -> Vec<Vec<String>> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl SchemaBinder for FakeBinder {
    async fn bind(&self, database: &DatabaseHandle, models: &[String]) -> Result<(), BoxError> {
        assert!(database.downcast::<FakeClient>().is_some());
        self.calls.lock().unwrap().push(models.to_vec());
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match models.iter().find(|m| self.poison.contains(m)) {
            Some(bad) => Err(format!("cannot bind model {bad}").into()),
            None => Ok(()),
        }
    }
}
