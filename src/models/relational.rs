//! Relational connection descriptor.

use crate::config::{DEFAULT_MAX_OVERFLOW, DEFAULT_POOL_RECYCLE_SECS, DEFAULT_POOL_TIMEOUT_SECS};
use crate::error::{DaoError, DbResult, ErrorCode};
use crate::logging::DbContext;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;
use url::Url;

/// Supported relational dialects.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Dialect {
    Postgres,
    /// Includes MariaDB
    MySql,
    /// Single-file embedded database
    Sqlite,
}

impl Dialect {
    /// Parse a driver name such as `postgresql`, `postgresql+asyncpg` or `mysql`.
    pub fn from_driver_name(driver: &str) -> Option<Self> {
        let base = driver
            .split('+')
            .next()
            .unwrap_or_default()
            .to_ascii_lowercase();
        match base.as_str() {
            "postgres" | "postgresql" | "pg" => Some(Self::Postgres),
            "mysql" | "mariadb" => Some(Self::MySql),
            "sqlite" | "sqlite3" => Some(Self::Sqlite),
            _ => None,
        }
    }

    pub fn scheme(&self) -> &'static str {
        match self {
            Self::Postgres => "postgres",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    /// Value for `db.system`.
    pub fn system_name(&self) -> &'static str {
        match self {
            Self::Postgres => "postgresql",
            Self::MySql => "mysql",
            Self::Sqlite => "sqlite",
        }
    }

    pub fn default_port(&self) -> u16 {
        match self {
            Self::Postgres => 5432,
            Self::MySql => 3306,
            Self::Sqlite => 0,
        }
    }

    /// Driver options applied when a descriptor is built with none.
    pub fn default_options(&self) -> BTreeMap<String, String> {
        let (key, value) = match self {
            Self::Postgres => ("sslmode", "prefer"),
            Self::MySql => ("ssl-mode", "PREFERRED"),
            Self::Sqlite => ("mode", "rwc"),
        };
        BTreeMap::from([(key.to_string(), value.to_string())])
    }

    pub fn is_single_file(&self) -> bool {
        matches!(self, Self::Sqlite)
    }
}

impl fmt::Display for Dialect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.system_name())
    }
}

/// How to reach a relational database.
///
/// Primary (write) and secondary (read) descriptors are produced together by a
/// [`RelationalConfigSource`](crate::config::RelationalConfigSource).
#[derive(Clone, PartialEq, Eq)]
pub struct RelationalDescriptor {
    driver: String,
    dialect: Dialect,
    username: String,
    password: String,
    host: String,
    database: String,
    port: u16,
    pool_size: u32,
    max_overflow: u32,
    pool_recycle_secs: u64,
    pool_timeout_secs: u64,
    options: BTreeMap<String, String>,
}

impl RelationalDescriptor {
    /// Build a descriptor for a networked server.
    ///
    /// Returns `CONF_INVALID` when the driver name is not recognised.
    pub fn new(
        driver: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
        host: impl Into<String>,
        database: impl Into<String>,
        port: u16,
        pool_size: u32,
    ) -> DbResult<Self> {
        let driver = driver.into();
        let dialect = Dialect::from_driver_name(&driver).ok_or_else(|| {
            DaoError::relational(
                ErrorCode::ConfInvalid,
                format!("Unsupported driver name: {driver}"),
            )
        })?;

        Ok(Self {
            driver,
            dialect,
            username: username.into(),
            password: password.into(),
            host: host.into(),
            database: database.into(),
            port,
            pool_size,
            max_overflow: DEFAULT_MAX_OVERFLOW,
            pool_recycle_secs: DEFAULT_POOL_RECYCLE_SECS,
            pool_timeout_secs: DEFAULT_POOL_TIMEOUT_SECS,
            options: dialect.default_options(),
        })
    }

    /// Descriptor for a single-file database at `path`.
    pub fn sqlite_file(path: impl AsRef<Path>) -> Self {
        let dialect = Dialect::Sqlite;
        Self {
            driver: dialect.scheme().to_string(),
            dialect,
            username: String::new(),
            password: String::new(),
            host: String::new(),
            database: path.as_ref().display().to_string(),
            port: 0,
            pool_size: 1,
            max_overflow: 0,
            pool_recycle_secs: DEFAULT_POOL_RECYCLE_SECS,
            pool_timeout_secs: DEFAULT_POOL_TIMEOUT_SECS,
            options: dialect.default_options(),
        }
    }

    pub fn with_max_overflow(mut self, max_overflow: u32) -> Self {
        self.max_overflow = max_overflow;
        self
    }

    pub fn with_pool_recycle(mut self, secs: u64) -> Self {
        self.pool_recycle_secs = secs;
        self
    }

    pub fn with_pool_timeout(mut self, secs: u64) -> Self {
        self.pool_timeout_secs = secs;
        self
    }

    /// Replace the driver options; an empty map restores the dialect defaults.
    pub fn with_options(mut self, options: BTreeMap<String, String>) -> Self {
        self.options = if options.is_empty() {
            self.dialect.default_options()
        } else {
            options
        };
        self
    }

    pub fn driver(&self) -> &str {
        &self.driver
    }

    pub fn dialect(&self) -> Dialect {
        self.dialect
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

    pub fn pool_size(&self) -> u32 {
        self.pool_size
    }

    pub fn max_overflow(&self) -> u32 {
        self.max_overflow
    }

    pub fn pool_recycle_secs(&self) -> u64 {
        self.pool_recycle_secs
    }

    pub fn pool_timeout_secs(&self) -> u64 {
        self.pool_timeout_secs
    }

    pub fn options(&self) -> &BTreeMap<String, String> {
        &self.options
    }

    /// Connection URL with percent-encoded credentials and options as query pairs.
    ///
    /// Contains the password; use [`masked_url`](Self::masked_url) for display.
    pub fn connection_url(&self) -> DbResult<Url> {
        let invalid = |e: url::ParseError| {
            DaoError::relational(
                ErrorCode::ConfInvalid,
                format!("Invalid connection URL for {}: {e}", self.safe_host_label()),
            )
            .with_source(e)
        };

        let mut url = if self.dialect.is_single_file() {
            let mut url = Url::parse("sqlite://").map_err(invalid)?;
            url.set_path(&self.database);
            url
        } else {
            let mut url = Url::parse(&format!(
                "{}://{}:{}",
                self.dialect.scheme(),
                self.host,
                self.port
            ))
            .map_err(invalid)?;
            url.set_path(&self.database);
            // Url percent-encodes userinfo on set
            let no_credentials = |()| {
                DaoError::relational(
                    ErrorCode::ConfInvalid,
                    format!(
                        "Connection URL for {} cannot carry credentials",
                        self.safe_host_label()
                    ),
                )
            };
            if !self.username.is_empty() {
                url.set_username(&self.username).map_err(no_credentials)?;
                if !self.password.is_empty() {
                    url.set_password(Some(&self.password))
                        .map_err(no_credentials)?;
                }
            }
            url
        };

        if !self.options.is_empty() {
            url.query_pairs_mut().extend_pairs(self.options.iter());
        }
        Ok(url)
    }

    /// Connection URL with the password replaced by `****`.
    pub fn masked_url(&self) -> String {
        match self.connection_url() {
            Ok(mut url) => {
                if url.password().is_some() {
                    let _ = url.set_password(Some("****"));
                }
                url.to_string()
            }
            Err(_) => format!("{}://{}", self.dialect.scheme(), self.safe_host_label()),
        }
    }

    /// Credential-free identifier for logs.
    pub fn safe_host_label(&self) -> String {
        if self.dialect.is_single_file() {
            self.database.clone()
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    pub fn validate(&self) -> DbResult<()> {
        if self.dialect.is_single_file() {
            if self.database.trim().is_empty() {
                return Err(DaoError::relational(
                    ErrorCode::ConfPathMissing,
                    "Single-file database path is empty",
                ));
            }
            return Ok(());
        }
        if self.host.trim().is_empty() {
            return Err(DaoError::relational(
                ErrorCode::ConfInvalid,
                "Relational host is empty",
            ));
        }
        if self.username.is_empty() != self.password.is_empty() {
            return Err(DaoError::relational(
                ErrorCode::ConfMissingCreds,
                "Both username and password are required when either is set",
            ));
        }
        if self.pool_size == 0 {
            return Err(DaoError::relational(
                ErrorCode::ConfPoolInvalid,
                "pool_size must be greater than 0",
            ));
        }
        Ok(())
    }

    pub fn db_context(&self) -> DbContext {
        DbContext::new(
            self.dialect.system_name(),
            self.database.as_str(),
            self.safe_host_label(),
        )
        .with("db.pool.size", self.pool_size)
        .with("db.pool.max_overflow", self.max_overflow)
        .with("db.pool.recycle_secs", self.pool_recycle_secs)
        .with("db.pool.timeout_secs", self.pool_timeout_secs)
    }
}

impl fmt::Debug for RelationalDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RelationalDescriptor")
            .field("driver", &self.driver)
            .field("user", &self.username)
            .field("host", &self.safe_host_label())
            .field("db", &self.database)
            .field(
                "pool",
                &format_args!("{}+{}", self.pool_size, self.max_overflow),
            )
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pg() -> RelationalDescriptor {
        RelationalDescriptor::new("postgresql", "app", "s3cr@t", "db.local", "orders", 5432, 5)
            .unwrap()
    }

    #[test]
    fn test_dialect_from_driver_name() {
        assert_eq!(Dialect::from_driver_name("postgresql+asyncpg"), Some(Dialect::Postgres));
        assert_eq!(Dialect::from_driver_name("MySQL"), Some(Dialect::MySql));
        assert_eq!(Dialect::from_driver_name("sqlite"), Some(Dialect::Sqlite));
        assert_eq!(Dialect::from_driver_name("mssql+pyodbc"), None);
    }

    #[test]
    fn test_unknown_driver_is_config_error() {
        let err = RelationalDescriptor::new("oracle", "u", "p", "h", "d", 1521, 1).unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfInvalid);
    }

    #[test]
    fn test_empty_options_fill_defaults() {
        let d = pg().with_options(BTreeMap::new());
        assert_eq!(d.options().get("sslmode").map(String::as_str), Some("prefer"));

        let custom = BTreeMap::from([("sslmode".to_string(), "require".to_string())]);
        let d = pg().with_options(custom);
        assert_eq!(d.options().get("sslmode").map(String::as_str), Some("require"));
    }

    #[test]
    fn test_connection_url_encodes_credentials() {
        let url = pg().connection_url().unwrap();
        assert_eq!(url.scheme(), "postgres");
        assert_eq!(url.password(), Some("s3cr%40t"));
        assert_eq!(url.path(), "/orders");
        assert!(url.as_str().ends_with("?sslmode=prefer"));
    }

    #[test]
    fn test_connection_url_keeps_spaces_in_credentials() {
        let d = RelationalDescriptor::new("mysql", "app user", "pa ss", "db.local", "shop", 3306, 5)
            .unwrap();
        let url = d.connection_url().unwrap();
        assert_eq!(url.username(), "app%20user");
        assert_eq!(url.password(), Some("pa%20ss"));
    }

    #[test]
    fn test_connection_url_without_host_is_config_error() {
        let d = RelationalDescriptor::new("postgresql", "app", "secret", "", "orders", 5432, 5)
            .unwrap();
        let err = d.connection_url().unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfInvalid);
        assert!(!err.message().contains("secret"));
    }

    #[test]
    fn test_masked_url_hides_password() {
        let masked = pg().masked_url();
        assert!(!masked.contains("s3cr"));
        assert!(masked.contains("app:****@db.local:5432"));
    }

    #[test]
    fn test_sqlite_descriptor() {
        let d = RelationalDescriptor::sqlite_file("/tmp/app.db");
        assert_eq!(d.dialect(), Dialect::Sqlite);
        assert_eq!(d.safe_host_label(), "/tmp/app.db");
        assert_eq!(d.pool_size(), 1);
        assert_eq!(d.max_overflow(), 0);
        assert_eq!(d.options().get("mode").map(String::as_str), Some("rwc"));
        assert!(d.validate().is_ok());
    }

    #[test]
    fn test_validate_relational() {
        assert!(pg().validate().is_ok());
        let err = RelationalDescriptor::new("mysql", "u", "", "h", "d", 3306, 1)
            .unwrap()
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfMissingCreds);
        let err = RelationalDescriptor::new("mysql", "u", "p", "h", "d", 3306, 0)
            .unwrap()
            .validate()
            .unwrap_err();
        assert_eq!(err.code(), ErrorCode::ConfPoolInvalid);
    }

    #[test]
    fn test_debug_redacts_password() {
        assert!(!format!("{:?}", pg()).contains("s3cr@t"));
    }
}
