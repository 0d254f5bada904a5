//! Document-store connector.

use super::Connector;
use crate::config::{DEFAULT_ENVIRONMENT, DocumentConfigSource};
use crate::drivers::{DocumentClient, DocumentClientFactory, DocumentDriver};
use crate::error::{BoxError, DaoError, DbResult, DocumentClientError, ErrorCode};
use crate::logging::{LogAction, LogBuilder, LogSink, Severity, default_sink};
use crate::models::DocumentDescriptor;
use async_trait::async_trait;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;
use tokio::sync::Mutex;

/// Environments in which models may be registered after startup.
const REGISTRATION_ENVIRONMENTS: &[&str] = &["development", "dev", "test", "testing"];

/// A live database handle: the client plus the database name.
#[derive(Debug, Clone)]
pub struct DatabaseHandle {
    pub client: Arc<dyn DocumentClient>,
    pub name: String,
}

impl DatabaseHandle {
    /// The concrete client, when it is of type `T`.
    pub fn downcast<T: 'static>(&self) -> Option<&T> {
        self.client.as_any().downcast_ref::<T>()
    }
}

/// Object-mapping layer binding model identifiers to a live database.
///
/// `bind` is always called with the full set of models; the connector does
/// its own rollback when it fails.
#[async_trait]
pub trait SchemaBinder: Send + Sync {
    async fn bind(&self, database: &DatabaseHandle, models: &[String]) -> Result<(), BoxError>;
}

#[derive(Default)]
struct State {
    client: Option<Arc<dyn DocumentClient>>,
    driver: Option<DocumentDriver>,
    descriptor: Option<DocumentDescriptor>,
    models: Vec<String>,
    bound: bool,
}

impl State {
    /// Drop everything but the registered models.
    fn reset(&mut self) {
        self.client = None;
        self.driver = None;
        self.descriptor = None;
        self.bound = false;
    }
}

/// Owns the document-store client for the process.
pub struct DocumentConnector {
    source: Arc<dyn DocumentConfigSource>,
    factory: Arc<dyn DocumentClientFactory>,
    binder: Option<Arc<dyn SchemaBinder>>,
    sink: Arc<dyn LogSink>,
    environment: Option<String>,
    query_logging: bool,
    init_lock: Mutex<()>,
    state: RwLock<State>,
}

impl DocumentConnector {
    pub fn new(
        source: Arc<dyn DocumentConfigSource>,
        factory: Arc<dyn DocumentClientFactory>,
    ) -> Self {
        Self {
            source,
            factory,
            binder: None,
            sink: default_sink(),
            environment: None,
            query_logging: false,
            init_lock: Mutex::new(()),
            state: RwLock::new(State::default()),
        }
    }

    /// Models bound during [`init`](Connector::init).
    pub fn with_models<I, S>(self, models: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        {
            let mut state = self.write_state();
            for model in models {
                let model = model.into();
                if !state.models.contains(&model) {
                    state.models.push(model);
                }
            }
        }
        self
    }

    pub fn with_binder(mut self, binder: Arc<dyn SchemaBinder>) -> Self {
        self.binder = Some(binder);
        self
    }

    pub fn with_sink(mut self, sink: Arc<dyn LogSink>) -> Self {
        self.sink = sink;
        self
    }

    /// Environment name checked by [`register_models`](Self::register_models).
    /// Falls back to `ENVIRONMENT`, then `development`.
    pub fn with_environment(mut self, environment: impl Into<String>) -> Self {
        self.environment = Some(environment.into());
        self
    }

    pub fn with_query_logging(mut self, enabled: bool) -> Self {
        self.query_logging = enabled;
        self
    }

    fn read_state(&self) -> RwLockReadGuard<'_, State> {
        self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, State> {
        self.state.write().unwrap_or_else(PoisonError::into_inner)
    }

    fn is_ready(&self) -> bool {
        let state = self.read_state();
        state.client.is_some()
            && (state.models.is_empty() || state.bound || self.binder.is_none())
    }

    /// The live client.
    pub fn get_client(&self) -> DbResult<Arc<dyn DocumentClient>> {
        self.read_state().client.clone().ok_or_else(|| {
            DaoError::document_connection(
                ErrorCode::NetUnreachable,
                "Client not initialized. Call init() first.",
            )
        })
    }

    /// Name of the configured database.
    pub fn database_name(&self) -> DbResult<String> {
        self.read_state()
            .descriptor
            .as_ref()
            .map(|d| d.database().to_string())
            .filter(|name| !name.is_empty())
            .ok_or_else(|| {
                DaoError::document_connection(
                    ErrorCode::ConfInvalid,
                    "Database name missing from config.",
                )
            })
    }

    pub fn get_database(&self) -> DbResult<DatabaseHandle> {
        let client = self.get_client()?;
        let name = self.database_name()?;
        Ok(DatabaseHandle { client, name })
    }

    /// Registered model identifiers.
    pub fn models(&self) -> Vec<String> {
        self.read_state().models.clone()
    }

    pub fn is_bound(&self) -> bool {
        self.read_state().bound
    }

    /// Descriptor of the live connection, kept for diagnostics.
    pub fn descriptor(&self) -> Option<DocumentDescriptor> {
        self.read_state().descriptor.clone()
    }

    fn environment(&self) -> String {
        self.environment
            .clone()
            .or_else(|| std::env::var("ENVIRONMENT").ok())
            .unwrap_or_else(|| DEFAULT_ENVIRONMENT.to_string())
    }

    /// Log the failure once, close whatever was built and reset state.
    async fn fail_init(
        &self,
        err: DaoError,
        descriptor: Option<&DocumentDescriptor>,
        mut driver: Option<DocumentDriver>,
    ) -> DaoError {
        let cause: &(dyn std::error::Error + 'static) = match err.original() {
            Some(original) => original,
            None => &err,
        };
        let mut builder = LogBuilder::new(&self.sink)
            .event(LogAction::MongoInit)
            .failure(err.code(), cause)
            .msg(err.message().to_string());
        if let Some(descriptor) = descriptor {
            builder = builder.db_context(&descriptor.db_context());
        }
        builder.emit();

        if let Some(driver) = driver.as_mut() {
            driver.abandon().await;
        }
        let stale = {
            let mut state = self.write_state();
            let stale = state.driver.take();
            state.reset();
            stale
        };
        if let Some(mut stale) = stale {
            stale.abandon().await;
        }
        err
    }

    fn connection_error(err: DocumentClientError) -> DaoError {
        let kind = err.kind;
        DaoError::document_connection(kind.code(), kind.summary()).with_source(err)
    }

    fn handle_for(
        client: &Arc<dyn DocumentClient>,
        descriptor: &DocumentDescriptor,
    ) -> DbResult<DatabaseHandle> {
        let name = descriptor.database();
        if name.is_empty() {
            return Err(DaoError::document_connection(
                ErrorCode::ConfInvalid,
                "Database name missing from config.",
            ));
        }
        Ok(DatabaseHandle {
            client: Arc::clone(client),
            name: name.to_string(),
        })
    }

    async fn bind(
        binder: &dyn SchemaBinder,
        handle: DbResult<DatabaseHandle>,
        models: &[String],
    ) -> Result<f64, BoxError> {
        let handle = handle?;
        let start = Instant::now();
        binder.bind(&handle, models).await?;
        Ok(start.elapsed().as_secs_f64() * 1000.0)
    }

    /// Connect, ping and bind against locals; state is only written once
    /// every step has succeeded.
    async fn init_locked(&self) -> DbResult<()> {
        let start = Instant::now();

        let descriptor = match self.source.load().await.and_then(|d| {
            d.validate()?;
            Ok(d)
        }) {
            Ok(descriptor) => descriptor,
            Err(err) => return Err(self.fail_init(err, None, None).await),
        };
        let context = descriptor.db_context();

        let mut driver = DocumentDriver::new(
            descriptor.clone(),
            Arc::clone(&self.factory),
            Arc::clone(&self.sink),
        )
        .with_query_logging(self.query_logging);

        let client = match driver.connect().await {
            Ok(client) => client,
            Err(err) => {
                let err = Self::connection_error(err);
                return Err(self.fail_init(err, Some(&descriptor), None).await);
            }
        };

        let ping_start = Instant::now();
        if let Err(err) = client.ping().await {
            let err = Self::connection_error(err);
            return Err(self.fail_init(err, Some(&descriptor), Some(driver)).await);
        }
        LogBuilder::new(&self.sink)
            .event(LogAction::MongoPing)
            .success()
            .msg("Document store ping successful")
            .duration_ms(ping_start.elapsed().as_secs_f64() * 1000.0)
            .db_context(&context)
            .emit();

        LogBuilder::new(&self.sink)
            .event(LogAction::MongoInit)
            .success()
            .msg("Document store connected successfully")
            .duration_ms(start.elapsed().as_secs_f64() * 1000.0)
            .db_context(&context)
            .emit();

        let models = self.models();
        let mut bound = false;
        match &self.binder {
            _ if models.is_empty() => {}
            None => LogBuilder::new(&self.sink)
                .event(LogAction::MongoOdmInit)
                .msg("Models provided but no schema binder configured. Skipping ODM init.")
                .field("models_count", models.len())
                .level(Severity::Warn)
                .emit(),
            Some(binder) => {
                let handle = Self::handle_for(&client, &descriptor);
                match Self::bind(binder.as_ref(), handle, &models).await {
                    Ok(elapsed) => {
                        bound = true;
                        LogBuilder::new(&self.sink)
                            .event(LogAction::MongoOdmInit)
                            .success()
                            .msg("Schema binding initialized")
                            .duration_ms(elapsed)
                            .db_context(&context)
                            .field("models_count", models.len())
                            .emit();
                    }
                    Err(err) => {
                        let mapped = DaoError::document_mapping(
                            ErrorCode::OdmInitFail,
                            "Schema binding initialization failed",
                        )
                        .with_source(err);
                        return Err(self.fail_init(mapped, Some(&descriptor), Some(driver)).await);
                    }
                }
            }
        }

        let mut state = self.write_state();
        state.client = Some(client);
        state.driver = Some(driver);
        state.descriptor = Some(descriptor);
        state.bound = bound;
        Ok(())
    }

    /// Add models after startup and rebind the full set.
    ///
    /// All-or-nothing: the registered set only changes once the binder has
    /// accepted the full set.
    pub async fn register_models<I, S>(&self, models: I, env_restriction: bool) -> DbResult<()>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let _guard = self.init_lock.lock().await;

        if self.read_state().client.is_none() {
            return Err(DaoError::document_connection(
                ErrorCode::NetUnreachable,
                "Cannot register models before connector initialization. Call init() first.",
            ));
        }
        let Some(binder) = &self.binder else {
            return Err(DaoError::document_mapping(
                ErrorCode::OdmInitFail,
                "No schema binder configured. Cannot register models.",
            ));
        };
        if env_restriction {
            let env = self.environment();
            if !REGISTRATION_ENVIRONMENTS.contains(&env.to_lowercase().as_str()) {
                return Err(DaoError::document_mapping(
                    ErrorCode::ConfInvalid,
                    format!(
                        "Dynamic model registration is disabled in '{env}' environment. \
                         Register all models at startup or disable the restriction."
                    ),
                ));
            }
        }

        let (new_models, all_models, context) = {
            let state = self.read_state();
            let mut new_models: Vec<String> = Vec::new();
            for model in models {
                let model = model.into();
                if !state.models.contains(&model) && !new_models.contains(&model) {
                    new_models.push(model);
                }
            }
            let mut all_models = state.models.clone();
            all_models.extend(new_models.iter().cloned());
            let context = state.descriptor.as_ref().map(DocumentDescriptor::db_context);
            (new_models, all_models, context)
        };

        if new_models.is_empty() {
            LogBuilder::new(&self.sink)
                .event(LogAction::MongoOdmInit)
                .success()
                .msg("No new models to register. All provided models already registered.")
                .field("total_models_count", all_models.len())
                .emit();
            return Ok(());
        }

        match Self::bind(binder.as_ref(), self.get_database(), &all_models).await {
            Ok(elapsed) => {
                {
                    let mut state = self.write_state();
                    state.models = all_models.clone();
                    state.bound = true;
                }
                let mut builder = LogBuilder::new(&self.sink)
                    .event(LogAction::MongoOdmInit)
                    .success()
                    .msg("Additional models registered")
                    .duration_ms(elapsed);
                if let Some(context) = context.as_ref() {
                    builder = builder.db_context(context);
                }
                builder
                    .field("new_models_count", new_models.len())
                    .field("total_models_count", all_models.len())
                    .field("new_model_names", new_models.clone())
                    .emit();
                Ok(())
            }
            Err(err) => {
                let mapped = DaoError::document_mapping(
                    ErrorCode::OdmInitFail,
                    format!("Failed to register models: {new_models:?}"),
                )
                .with_source(err);
                LogBuilder::new(&self.sink)
                    .event(LogAction::MongoOdmInit)
                    .failure(ErrorCode::OdmInitFail, &mapped)
                    .msg("Failed to register additional models")
                    .field("attempted_models", new_models.clone())
                    .emit();
                Err(mapped)
            }
        }
    }
}

#[async_trait]
impl Connector for DocumentConnector {
    fn system(&self) -> &'static str {
        "mongodb"
    }

    async fn init(&self) -> DbResult<()> {
        if self.is_ready() {
            return Ok(());
        }
        let _guard = self.init_lock.lock().await;
        // another caller may have finished while we waited
        if self.is_ready() {
            return Ok(());
        }
        self.init_locked().await
    }

    async fn close(&self) {
        let _guard = self.init_lock.lock().await;

        let (driver, host) = {
            let mut state = self.write_state();
            let host = state
                .descriptor
                .as_ref()
                .map(DocumentDescriptor::safe_host_label)
                .unwrap_or_else(|| "unknown".to_string());
            let driver = state.driver.take();
            state.reset();
            (driver, host)
        };

        let Some(mut driver) = driver else {
            return;
        };
        match driver.disconnect().await {
            Ok(()) => LogBuilder::new(&self.sink)
                .event(LogAction::MongoClose)
                .success()
                .msg("Document store connection closed")
                .field("db.host", host)
                .emit(),
            Err(err) => LogBuilder::new(&self.sink)
                .event(LogAction::MongoClose)
                .failure(ErrorCode::UnknownFatal, &err)
                .msg("Error closing document store")
                .field("db.host", host)
                .emit(),
        }
    }

    fn is_initialized(&self) -> bool {
        self.read_state().client.is_some()
    }
}

impl fmt::Debug for DocumentConnector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.read_state();
        f.debug_struct("DocumentConnector")
            .field("initialized", &state.client.is_some())
            .field("descriptor", &state.descriptor)
            .field("models", &state.models)
            .field("bound", &state.bound)
            .finish_non_exhaustive()
    }
}
