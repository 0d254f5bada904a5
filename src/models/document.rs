//! Document-store connection descriptor.

use crate::config::{
    DEFAULT_MAX_POOL_SIZE, DEFAULT_MIN_POOL_SIZE, DEFAULT_MONGO_PORT,
    DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
};
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::logging::DbContext;
use std::fmt;
use std::time::Duration;
use url::form_urlencoded::byte_serialize;

/// Percent-encode one userinfo component.
///
/// `byte_serialize` escapes every byte outside `[A-Za-z0-9*-._]`, so the only
/// `+` it emits stands for a space; userinfo is percent-decoded, not
/// form-decoded, so that has to become `%20`.
fn encode_userinfo(raw: &str) -> String {
    byte_serialize(raw.as_bytes()).collect::<String>().replace('+', "%20")
}

/// How to reach a document database.
///
/// Immutable once built; the `with_*` methods consume and return a new value.
#[derive(Clone, PartialEq, Eq)]
pub struct DocumentDescriptor {
    username: String,
    password: String,
    host: String,
    database: String,
    port: u16,
    min_pool_size: u32,
    max_pool_size: u32,
    server_selection_timeout_ms: u64,
    use_srv: bool,
    use_tls: bool,
}

impl DocumentDescriptor {
    pub fn new(
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
    ) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
            host: host.into(),
            database: database.into(),
            port: DEFAULT_MONGO_PORT,
            min_pool_size: DEFAULT_MIN_POOL_SIZE,
            max_pool_size: DEFAULT_MAX_POOL_SIZE,
            server_selection_timeout_ms: DEFAULT_SERVER_SELECTION_TIMEOUT_MS,
            use_srv: false,
            use_tls: false,
        }
    }

    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    pub fn with_pool(mut self, min: u32, max: u32) -> Self {
        self.min_pool_size = min;
        self.max_pool_size = max;
        self
    }

    pub fn with_server_selection_timeout_ms(mut self, ms: u64) -> Self {
        self.server_selection_timeout_ms = ms;
        self
    }

    /// Use DNS seed-list discovery (`mongodb+srv://`).
    pub fn with_srv(mut self, use_srv: bool) -> Self {
        self.use_srv = use_srv;
        self
    }

    pub fn with_tls(mut self, use_tls: bool) -> Self {
        self.use_tls = use_tls;
        self
    }

    pub fn username(&self) -> &str {
        &self.username
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn database(&self) -> &str {
        &self.database
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn min_pool_size(&self) -> u32 {
        self.min_pool_size
    }

    pub fn max_pool_size(&self) -> u32 {
        self.max_pool_size
    }

    pub fn server_selection_timeout(&self) -> Duration {
        Duration::from_millis(self.server_selection_timeout_ms)
    }

    pub fn use_srv(&self) -> bool {
        self.use_srv
    }

    pub fn use_tls(&self) -> bool {
        self.use_tls
    }

    /// Connection URI with percent-encoded credentials.
    ///
    /// Contains the password; never log it. Use [`safe_host_label`](Self::safe_host_label).
    pub fn connection_uri(&self) -> String {
        let scheme = if self.use_srv { "mongodb+srv" } else { "mongodb" };

        let auth = if !self.username.is_empty() && !self.password.is_empty() {
            format!(
                "{}:{}@",
                encode_userinfo(&self.username),
                encode_userinfo(&self.password)
            )
        } else {
            String::new()
        };

        if self.use_srv {
            format!("{scheme}://{auth}{}", self.host)
        } else {
            format!("{scheme}://{auth}{}:{}", self.host, self.port)
        }
    }

    /// Credential-free host identifier for logs.
    pub fn safe_host_label(&self) -> String {
        if self.use_srv {
            format!("{} (srv)", self.host)
        } else {
            self.host.clone()
        }
    }

    /// Pre-flight checks on the descriptor values.
    pub fn validate(&self) -> DbResult<()> {
        if self.host.trim().is_empty() {
            return Err(DaoError::document_connection(
                ErrorCode::ConfInvalid,
                "Document store host is empty",
            ));
        }
        if self.username.is_empty() != self.password.is_empty() {
            return Err(DaoError::document_connection(
                ErrorCode::ConfMissingCreds,
                "Both username and password are required when either is set",
            ));
        }
        if self.max_pool_size == 0 || self.min_pool_size > self.max_pool_size {
            return Err(DaoError::document_connection(
                ErrorCode::ConfPoolInvalid,
                format!(
                    "Invalid pool bounds: min={} max={}",
                    self.min_pool_size, self.max_pool_size
                ),
            ));
        }
        Ok(())
    }

    /// Full `db.*` context block for lifecycle events.
    pub fn db_context(&self) -> DbContext {
        DbContext::new("mongodb", self.database.as_str(), self.safe_host_label())
            .with("db.srv", self.use_srv)
            .with("db.tls", self.use_tls)
            .with("db.pool.min", self.min_pool_size)
            .with("db.pool.max", self.max_pool_size)
            .with("db.timeout.ms", self.server_selection_timeout_ms)
    }
}

impl fmt::Debug for DocumentDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DocumentDescriptor")
            .field("host", &self.safe_host_label())
            .field("db", &self.database)
            .field("user", &self.username)
            .field("tls", &self.use_tls)
            .field(
                "pool",
                &format_args!("{}-{}", self.min_pool_size, self.max_pool_size),
            )
            .finish()
    }
}
