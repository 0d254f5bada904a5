//! Error taxonomy for daokit.
//!
//! Every failure surfaced by the crate carries a stable numeric [`ErrorCode`].
//! Codes are partitioned into ranges (see [`ErrorRange`]) and are part of the
//! external logging contract, so existing values must never be renumbered.
//!
//! Native driver failures are first classified into closed category enums
//! ([`SqlFailure`], [`DocumentErrorKind`]) and only then mapped onto codes.

use crate::models::Direction;
use std::fmt;
use thiserror::Error;

/// Boxed error used to preserve the original cause of a failure.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Numeric range an [`ErrorCode`] belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorRange {
    /// 1000-1999: pre-flight configuration and validation.
    Configuration,
    /// 2000-2999: network and connectivity (transient).
    Network,
    /// 3000-3999: authentication and authorization.
    Authentication,
    /// 4000-4999: application, data and schema-mapping logic.
    Application,
    /// 9000 and above: unknown or fatal.
    Fatal,
}

impl ErrorRange {
    /// Resolve the range for a raw numeric code.
    ///
    /// Returns `None` for values outside every published range.
    pub fn of(code: u32) -> Option<Self> {
        match code {
            1000..=1999 => Some(Self::Configuration),
            2000..=2999 => Some(Self::Network),
            3000..=3999 => Some(Self::Authentication),
            4000..=4999 => Some(Self::Application),
            9000.. => Some(Self::Fatal),
            _ => None,
        }
    }

    /// Whether a caller may reasonably retry after backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Stable numeric error codes.
///
/// The relational execution block (50010-50099) predates the range layout and
/// sits inside the fatal range; its values are kept as published.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ConfInvalid,
    ConfMissingCreds,
    ConfSslError,
    ConfPoolInvalid,
    ConfPathMissing,

    NetUnreachable,
    NetTimeout,
    NetDnsFailure,
    NetConnRefused,
    NetHandshakeFail,

    AuthFailure,
    AuthForbidden,

    OdmInitFail,
    QuerySyntax,
    DataValidation,

    UnknownFatal,

    SqlEngineBuild,
    SqlFileEngineBuild,
    SqlReadDriver,
    SqlWriteIntegrity,
    SqlWriteOperational,
    SqlWriteData,
    SqlWriteProgramming,
    SqlWriteDriver,
    SqlReadIntegrity,
    SqlReadOperational,
    SqlReadData,
    SqlReadProgramming,
    SqlUnexpected,
}

impl ErrorCode {
    /// Every published code, in numeric order.
    pub const ALL: &'static [ErrorCode] = &[
        Self::ConfInvalid,
        Self::ConfMissingCreds,
        Self::ConfSslError,
        Self::ConfPoolInvalid,
        Self::ConfPathMissing,
        Self::NetUnreachable,
        Self::NetTimeout,
        Self::NetDnsFailure,
        Self::NetConnRefused,
        Self::NetHandshakeFail,
        Self::AuthFailure,
        Self::AuthForbidden,
        Self::OdmInitFail,
        Self::QuerySyntax,
        Self::DataValidation,
        Self::UnknownFatal,
        Self::SqlEngineBuild,
        Self::SqlFileEngineBuild,
        Self::SqlReadDriver,
        Self::SqlWriteIntegrity,
        Self::SqlWriteOperational,
        Self::SqlWriteData,
        Self::SqlWriteProgramming,
        Self::SqlWriteDriver,
        Self::SqlReadIntegrity,
        Self::SqlReadOperational,
        Self::SqlReadData,
        Self::SqlReadProgramming,
        Self::SqlUnexpected,
    ];

    /// The numeric value written to `error.code`.
    pub const fn as_u32(self) -> u32 {
        match self {
            Self::ConfInvalid => 1001,
            Self::ConfMissingCreds => 1002,
            Self::ConfSslError => 1003,
            Self::ConfPoolInvalid => 1004,
            Self::ConfPathMissing => 1005,
            Self::NetUnreachable => 2001,
            Self::NetTimeout => 2002,
            Self::NetDnsFailure => 2003,
            Self::NetConnRefused => 2004,
            Self::NetHandshakeFail => 2005,
            Self::AuthFailure => 3001,
            Self::AuthForbidden => 3002,
            Self::OdmInitFail => 4001,
            Self::QuerySyntax => 4002,
            Self::DataValidation => 4003,
            Self::UnknownFatal => 9999,
            Self::SqlEngineBuild => 50010,
            Self::SqlFileEngineBuild => 50011,
            Self::SqlReadDriver => 50089,
            Self::SqlWriteIntegrity => 50090,
            Self::SqlWriteOperational => 50091,
            Self::SqlWriteData => 50092,
            Self::SqlWriteProgramming => 50093,
            Self::SqlWriteDriver => 50094,
            Self::SqlReadIntegrity => 50095,
            Self::SqlReadOperational => 50096,
            Self::SqlReadData => 50097,
            Self::SqlReadProgramming => 50098,
            Self::SqlUnexpected => 50099,
        }
    }

    /// Symbolic name, used as the short label of an error.
    pub const fn name(self) -> &'static str {
        match self {
            Self::ConfInvalid => "CONF_INVALID",
            Self::ConfMissingCreds => "CONF_MISSING_CREDS",
            Self::ConfSslError => "CONF_SSL_ERROR",
            Self::ConfPoolInvalid => "CONF_POOL_INVALID",
            Self::ConfPathMissing => "CONF_PATH_MISSING",
            Self::NetUnreachable => "NET_UNREACHABLE",
            Self::NetTimeout => "NET_TIMEOUT",
            Self::NetDnsFailure => "NET_DNS_FAILURE",
            Self::NetConnRefused => "NET_CONN_REFUSED",
            Self::NetHandshakeFail => "NET_HANDSHAKE_FAIL",
            Self::AuthFailure => "AUTH_FAILURE",
            Self::AuthForbidden => "AUTH_FORBIDDEN",
            Self::OdmInitFail => "ODM_INIT_FAIL",
            Self::QuerySyntax => "QUERY_SYNTAX",
            Self::DataValidation => "DATA_VALIDATION",
            Self::UnknownFatal => "UNKNOWN_FATAL",
            Self::SqlEngineBuild => "SQL_ENGINE_BUILD",
            Self::SqlFileEngineBuild => "SQL_FILE_ENGINE_BUILD",
            Self::SqlReadDriver => "SQL_READ_DRIVER",
            Self::SqlWriteIntegrity => "SQL_WRITE_INTEGRITY",
            Self::SqlWriteOperational => "SQL_WRITE_OPERATIONAL",
            Self::SqlWriteData => "SQL_WRITE_DATA",
            Self::SqlWriteProgramming => "SQL_WRITE_PROGRAMMING",
            Self::SqlWriteDriver => "SQL_WRITE_DRIVER",
            Self::SqlReadIntegrity => "SQL_READ_INTEGRITY",
            Self::SqlReadOperational => "SQL_READ_OPERATIONAL",
            Self::SqlReadData => "SQL_READ_DATA",
            Self::SqlReadProgramming => "SQL_READ_PROGRAMMING",
            Self::SqlUnexpected => "SQL_UNEXPECTED",
        }
    }

    /// Look up a code by its numeric value.
    pub fn from_u32(value: u32) -> Option<Self> {
        Self::ALL.iter().copied().find(|c| c.as_u32() == value)
    }

    /// The range this code belongs to.
    pub fn range(self) -> ErrorRange {
        match ErrorRange::of(self.as_u32()) {
            Some(range) => range,
            None => ErrorRange::Fatal,
        }
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[derive(Error, Debug)]
pub enum DaoError {
    /// Document-store connectivity or authentication failure.
    ///
    /// Usually carries 2xxx/3xxx codes; initialization may also raise it with
    /// configuration or fatal codes.
    #[error("[{}] {}", .code.name(), .message)]
    DocumentConnection {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Object-mapping layer failed to bind (4xxx codes).
    #[error("[{}] {}", .code.name(), .message)]
    DocumentMapping {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },

    /// Relational engine construction or statement execution failed.
    #[error("[{}] {}", .code.name(), .message)]
    Relational {
        code: ErrorCode,
        message: String,
        #[source]
        source: Option<BoxError>,
    },
}

impl DaoError {
    /// Create a document-store connectivity error.
    pub fn document_connection(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::DocumentConnection {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create an object-mapping error.
    pub fn document_mapping(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::DocumentMapping {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Create a relational execution error.
    pub fn relational(code: ErrorCode, message: impl Into<String>) -> Self {
        Self::Relational {
            code,
            message: message.into(),
            source: None,
        }
    }

    /// Attach the original cause.
    pub fn with_source(mut self, err: impl Into<BoxError>) -> Self {
        let slot = match &mut self {
            Self::DocumentConnection { source, .. }
            | Self::DocumentMapping { source, .. }
            | Self::Relational { source, .. } => source,
        };
        *slot = Some(err.into());
        self
    }

    pub fn code(&self) -> ErrorCode {
        match self {
            Self::DocumentConnection { code, .. }
            | Self::DocumentMapping { code, .. }
            | Self::Relational { code, .. } => *code,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            Self::DocumentConnection { message, .. }
            | Self::DocumentMapping { message, .. }
            | Self::Relational { message, .. } => message,
        }
    }

    /// The original cause, if one was preserved.
    pub fn original(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::DocumentConnection { source, .. }
            | Self::DocumentMapping { source, .. }
            | Self::Relational { source, .. } => source.as_deref(),
        }
    }

    /// Short label derived from the code's symbolic name.
    pub fn label(&self) -> &'static str {
        self.code().name()
    }

    /// Name of the leaf kind, written to `error.type`.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::DocumentConnection { .. } => "DocumentConnectionError",
            Self::DocumentMapping { .. } => "DocumentMappingError",
            Self::Relational { .. } => "RelationalError",
        }
    }

    /// Check if this error is retryable.
    pub fn is_retryable(&self) -> bool {
        self.code().range().is_retryable()
    }
}

/// Result type alias for data-access operations.
pub type DbResult<T> = Result<T, DaoError>;

/// Category of a native relational driver failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SqlFailure {
    /// Constraint violation (unique, foreign key, not-null, check).
    Integrity,
    /// Connection-level failure: I/O, TLS, pool exhaustion, protocol.
    Operational,
    /// Value could not be encoded or decoded.
    Data,
    /// Statement is malformed or references missing objects.
    Programming,
    /// Any other driver-reported error.
    Driver,
    /// Not recognised by this version of the classifier.
    Other,
}

impl SqlFailure {
    /// Classify a native sqlx error.
    pub fn classify(err: &sqlx::Error) -> Self {
        match err {
            sqlx::Error::Database(db_err) => Self::classify_database(db_err.as_ref()),
            sqlx::Error::Io(_)
            | sqlx::Error::Tls(_)
            | sqlx::Error::Protocol(_)
            | sqlx::Error::PoolTimedOut
            | sqlx::Error::PoolClosed
            | sqlx::Error::WorkerCrashed => Self::Operational,
            sqlx::Error::ColumnDecode { .. }
            | sqlx::Error::Decode(_)
            | sqlx::Error::Encode(_)
            | sqlx::Error::TypeNotFound { .. }
            | sqlx::Error::ColumnIndexOutOfBounds { .. }
            | sqlx::Error::ColumnNotFound(_) => Self::Data,
            sqlx::Error::Configuration(_)
            | sqlx::Error::RowNotFound
            | sqlx::Error::AnyDriverError(_) => Self::Driver,
            _ => Self::Other,
        }
    }

    fn classify_database(db_err: &dyn sqlx::error::DatabaseError) -> Self {
        use sqlx::error::ErrorKind;

        match db_err.kind() {
            ErrorKind::UniqueViolation
            | ErrorKind::ForeignKeyViolation
            | ErrorKind::NotNullViolation
            | ErrorKind::CheckViolation => return Self::Integrity,
            _ => {}
        }

        let Some(code) = db_err.code() else {
            return Self::Driver;
        };

        // SQLite reports extended result codes; the low byte is the primary code
        if db_err
            .try_downcast_ref::<sqlx::sqlite::SqliteError>()
            .is_some()
        {
            return match code.parse::<i32>().map(|c| c & 0xff) {
                Ok(1) => Self::Programming,
                Ok(5 | 6 | 10 | 14) => Self::Operational,
                Ok(19) => Self::Integrity,
                Ok(20 | 25) => Self::Data,
                _ => Self::Driver,
            };
        }

        // SQLSTATE classes (PostgreSQL, MySQL)
        match code.as_ref() {
            c if c.starts_with("42") => Self::Programming,
            c if c.starts_with("22") => Self::Data,
            c if c.starts_with("23") => Self::Integrity,
            c if c.starts_with("08") || c.starts_with("53") || c.starts_with("57") => {
                Self::Operational
            }
            _ => Self::Driver,
        }
    }

    /// Reserved code for this category on the given path.
    pub fn code(self, direction: Direction) -> ErrorCode {
        match (direction, self) {
            (Direction::Write, Self::Integrity) => ErrorCode::SqlWriteIntegrity,
            (Direction::Write, Self::Operational) => ErrorCode::SqlWriteOperational,
            (Direction::Write, Self::Data) => ErrorCode::SqlWriteData,
            (Direction::Write, Self::Programming) => ErrorCode::SqlWriteProgramming,
            (Direction::Write, Self::Driver) => ErrorCode::SqlWriteDriver,
            (Direction::Read, Self::Integrity) => ErrorCode::SqlReadIntegrity,
            (Direction::Read, Self::Operational) => ErrorCode::SqlReadOperational,
            (Direction::Read, Self::Data) => ErrorCode::SqlReadData,
            (Direction::Read, Self::Programming) => ErrorCode::SqlReadProgramming,
            (Direction::Read, Self::Driver) => ErrorCode::SqlReadDriver,
            (_, Self::Other) => ErrorCode::SqlUnexpected,
        }
    }

    /// Human label used in log messages.
    pub fn label(self) -> &'static str {
        match self {
            Self::Integrity => "Integrity error",
            Self::Operational => "Operational error",
            Self::Data => "Data error",
            Self::Programming => "Programming error",
            Self::Driver => "Driver error",
            Self::Other => "Unexpected error",
        }
    }

    /// Value written to `error.type` for this category.
    pub fn type_name(self) -> &'static str {
        match self {
            Self::Integrity => "IntegrityError",
            Self::Operational => "OperationalError",
            Self::Data => "DataError",
            Self::Programming => "ProgrammingError",
            Self::Driver => "DriverError",
            Self::Other => "UnexpectedError",
        }
    }
}

/// Category of a native document-store failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentErrorKind {
    /// Invalid URI or client option.
    Configuration,
    /// No suitable server became available within the selection timeout.
    ServerSelectionTimeout,
    /// Credentials were rejected.
    Authentication,
    /// Credentials accepted but the operation is not permitted.
    Authorization,
    /// Host unreachable or connection dropped.
    Network,
    /// SRV or host name resolution failed.
    Dns,
    /// Not recognised by this version of the classifier.
    Other,
}

impl DocumentErrorKind {
    pub fn code(self) -> ErrorCode {
        match self {
            Self::Configuration => ErrorCode::ConfInvalid,
            Self::ServerSelectionTimeout => ErrorCode::NetTimeout,
            Self::Authentication => ErrorCode::AuthFailure,
            Self::Authorization => ErrorCode::AuthForbidden,
            Self::Network => ErrorCode::NetUnreachable,
            Self::Dns => ErrorCode::NetDnsFailure,
            Self::Other => ErrorCode::UnknownFatal,
        }
    }

    /// Message logged and raised for failures of this kind.
    pub fn summary(self) -> &'static str {
        match self {
            Self::Configuration => "Configuration Error",
            Self::ServerSelectionTimeout => "Connection Timeout",
            Self::Authentication | Self::Authorization => "Authentication/Operation Failed",
            Self::Network => "Network Unreachable",
            Self::Dns => "DNS Resolution Failed",
            Self::Other => "Unexpected Initialization Error",
        }
    }
}

impl fmt::Display for DocumentErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Configuration => "configuration",
            Self::ServerSelectionTimeout => "server selection timeout",
            Self::Authentication => "authentication",
            Self::Authorization => "authorization",
            Self::Network => "network",
            Self::Dns => "dns",
            Self::Other => "other",
        };
        f.write_str(name)
    }
}

/// Failure reported by a native document-store client.
#[derive(Error, Debug)]
#[error("{kind}: {message}")]
pub struct DocumentClientError {
    pub kind: DocumentErrorKind,
    pub message: String,
    #[source]
    pub source: Option<BoxError>,
}

impl DocumentClientError {
    pub fn new(kind: DocumentErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }
}
