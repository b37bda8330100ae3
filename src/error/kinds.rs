use std::time::Duration;
use std::{fmt, io};

/// Crate-wide `Result` type using [`ExportError`] as the error.
///
/// This alias is re-exported by the parent `error` module and is intended
/// to be used throughout the crate for fallible operations.
pub type Result<T> = std::result::Result<T, ExportError>;

/// Top-level error type for export operations.
///
/// Wraps the more specific error kinds and carries the kinds that need
/// structured payloads (line numbers, byte counts) directly.
#[derive(Debug)]
pub enum ExportError {
    /// Configuration errors.
    Config(ConfigError),

    /// Connectivity errors.
    Connection(ConnectionError),

    /// Authentication and authorization errors.
    Auth(AuthError),

    /// Query execution errors.
    Query(QueryError),

    /// Output or source data is corrupt at a given output line.
    DataCorruption {
        line: u64,
        message: String,
        sample: Option<String>,
    },

    /// Not enough disk space for the export.
    InsufficientDiskSpace { required: u64, available: u64 },

    /// Process memory above the configured ceiling.
    MemoryPressure { used: u64, limit: u64 },

    /// Output file errors.
    File(FileError),

    /// Path or input rejected for security reasons.
    Security(String),

    /// An operation did not finish in time.
    Timeout { operation: String, after: Duration },

    /// The circuit breaker is open and rejected the call.
    CircuitOpen { retry_after: Duration },

    /// The export was cancelled cooperatively.
    Cancelled,

    /// Several independent errors reported together.
    Aggregate(Vec<ExportError>),

    /// I/O errors.
    Io(io::Error),

    /// JSON (de)serialization errors.
    Json(serde_json::Error),
}

/// Connection-specific errors.
#[derive(Debug)]
pub enum ConnectionError {
    /// Failed to reach the server.
    ConnectionFailed(String),

    /// Server reachable but not serving requests.
    ServiceUnavailable(String),

    /// Server-side session or transaction expired.
    SessionExpired(String),

    /// Invalid endpoint URL.
    InvalidEndpoint(String),

    /// Initial connectivity check failed.
    VerificationFailed(String),
}

/// Authentication-specific errors.
#[derive(Debug)]
pub enum AuthError {
    /// Authentication failed.
    AuthenticationFailed(String),

    /// No or malformed credentials.
    InvalidCredentials,

    /// Authenticated but not allowed.
    PermissionDenied(String),
}

/// Query-specific errors.
#[derive(Debug)]
pub enum QueryError {
    /// The server rejected or failed the query.
    ExecutionFailed {
        code: Option<String>,
        message: String,
    },

    /// The server reported a failure that may succeed on retry.
    Transient { code: String, message: String },

    /// The result could not be interpreted.
    InvalidResult(String),
}

/// Configuration-specific errors.
#[derive(Debug)]
pub enum ConfigError {
    /// Config file not found.
    FileNotFound(String),

    /// Invalid config format.
    InvalidFormat(String),

    /// Missing required field.
    MissingField(String),

    /// Invalid field value.
    InvalidValue { field: String, value: String },
}

/// Output-file errors.
#[derive(Debug)]
pub enum FileError {
    /// Could not create or open the output file.
    CreateFailed(String),

    /// Writing to the output file failed.
    WriteFailed(String),

    /// The final manifest does not fit in the reserved header region.
    HeaderOverflow { reserved: u64, required: u64 },

    /// The header written does not match the reserved region.
    HeaderSizeMismatch { expected: u64, actual: u64 },

    /// Moving the finished file into place failed.
    RenameFailed(String),
}

impl ExportError {
    /// Whether retrying the failed operation may succeed.
    ///
    /// Service unavailability, expired sessions, I/O failures, timeouts and
    /// transient server codes qualify; authentication and client errors do not.
    pub fn is_transient(&self) -> bool {
        match self {
            ExportError::Connection(e) => matches!(
                e,
                ConnectionError::ConnectionFailed(_)
                    | ConnectionError::ServiceUnavailable(_)
                    | ConnectionError::SessionExpired(_)
            ),
            ExportError::Query(QueryError::Transient { .. }) => true,
            ExportError::Io(_) | ExportError::Timeout { .. } => true,
            _ => false,
        }
    }

    /// Process exit code for this error kind.
    pub fn exit_code(&self) -> i32 {
        match self {
            ExportError::Config(_) => 2,
            ExportError::Connection(_) => 3,
            ExportError::Auth(_) => 4,
            ExportError::Query(_) => 5,
            ExportError::DataCorruption { .. } => 6,
            ExportError::InsufficientDiskSpace { .. } => 7,
            ExportError::MemoryPressure { .. } => 8,
            ExportError::File(_) | ExportError::Io(_) | ExportError::Json(_) => 9,
            ExportError::Security(_) => 10,
            ExportError::Timeout { .. } => 11,
            ExportError::CircuitOpen { .. } => 12,
            ExportError::Aggregate(_) => 13,
            ExportError::Cancelled => 130,
        }
    }
}

/* ========================= Display & Error impls ========================= */

impl fmt::Display for ExportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExportError::Config(e) => write!(f, "Configuration error: {e}"),
            ExportError::Connection(e) => write!(f, "Connection error: {e}"),
            ExportError::Auth(e) => write!(f, "Authentication error: {e}"),
            ExportError::Query(e) => write!(f, "Query error: {e}"),
            ExportError::DataCorruption {
                line,
                message,
                sample,
            } => {
                write!(f, "Data corruption at line {line}: {message}")?;
                if let Some(sample) = sample {
                    write!(f, " (sample: {sample})")?;
                }
                Ok(())
            }
            ExportError::InsufficientDiskSpace {
                required,
                available,
            } => write!(
                f,
                "Insufficient disk space: {required} bytes required, {available} available"
            ),
            ExportError::MemoryPressure { used, limit } => {
                write!(f, "Memory pressure: {used} bytes in use, limit {limit}")
            }
            ExportError::File(e) => write!(f, "Export file error: {e}"),
            ExportError::Security(msg) => write!(f, "Security validation failed: {msg}"),
            ExportError::Timeout { operation, after } => {
                write!(f, "Operation '{operation}' timed out after {after:?}")
            }
            ExportError::CircuitOpen { retry_after } => write!(
                f,
                "Circuit breaker open, database calls suspended for another {retry_after:?}"
            ),
            ExportError::Cancelled => write!(f, "Export cancelled"),
            ExportError::Aggregate(errors) => {
                write!(f, "{} errors:", errors.len())?;
                for e in errors {
                    write!(f, "\n  - {e}")?;
                }
                Ok(())
            }
            ExportError::Io(e) => write!(f, "I/O error: {e}"),
            ExportError::Json(e) => write!(f, "JSON error: {e}"),
        }
    }
}

impl fmt::Display for ConnectionError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionError::ConnectionFailed(msg) => write!(f, "Failed to connect: {msg}"),
            ConnectionError::ServiceUnavailable(msg) => write!(f, "Service unavailable: {msg}"),
            ConnectionError::SessionExpired(msg) => write!(f, "Session expired: {msg}"),
            ConnectionError::InvalidEndpoint(url) => write!(f, "Invalid endpoint: {url}"),
            ConnectionError::VerificationFailed(msg) => {
                write!(f, "Connectivity check failed: {msg}")
            }
        }
    }
}

impl fmt::Display for AuthError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthError::AuthenticationFailed(msg) => write!(f, "Authentication failed: {msg}"),
            AuthError::InvalidCredentials => write!(f, "Invalid credentials"),
            AuthError::PermissionDenied(msg) => write!(f, "Permission denied: {msg}"),
        }
    }
}

impl fmt::Display for QueryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryError::ExecutionFailed {
                code: Some(code),
                message,
            } => write!(f, "{code}: {message}"),
            QueryError::ExecutionFailed {
                code: None,
                message,
            } => write!(f, "Query failed: {message}"),
            QueryError::Transient { code, message } => {
                write!(f, "Transient failure {code}: {message}")
            }
            QueryError::InvalidResult(msg) => write!(f, "Invalid result: {msg}"),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {path}"),
            ConfigError::InvalidFormat(msg) => write!(f, "Invalid config format: {msg}"),
            ConfigError::MissingField(field) => write!(f, "Missing required field: {field}"),
            ConfigError::InvalidValue { field, value } => {
                write!(f, "Invalid value '{value}' for field '{field}'")
            }
        }
    }
}

impl fmt::Display for FileError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FileError::CreateFailed(msg) => write!(f, "Failed to create file: {msg}"),
            FileError::WriteFailed(msg) => write!(f, "Failed to write file: {msg}"),
            FileError::HeaderOverflow { reserved, required } => write!(
                f,
                "Manifest needs {required} bytes but only {reserved} were reserved"
            ),
            FileError::HeaderSizeMismatch { expected, actual } => write!(
                f,
                "Header is {actual} bytes, reserved region is {expected} bytes"
            ),
            FileError::RenameFailed(msg) => write!(f, "Failed to rename export file: {msg}"),
        }
    }
}

impl std::error::Error for ExportError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ExportError::Io(e) => Some(e),
            ExportError::Json(e) => Some(e),
            _ => None,
        }
    }
}
impl std::error::Error for ConnectionError {}
impl std::error::Error for AuthError {}
impl std::error::Error for QueryError {}
impl std::error::Error for ConfigError {}
impl std::error::Error for FileError {}

/* ========================= Conversions to ExportError ========================= */

impl From<io::Error> for ExportError {
    fn from(err: io::Error) -> Self {
        ExportError::Io(err)
    }
}

impl From<serde_json::Error> for ExportError {
    fn from(err: serde_json::Error) -> Self {
        ExportError::Json(err)
    }
}

impl From<toml::de::Error> for ExportError {
    fn from(err: toml::de::Error) -> Self {
        ExportError::Config(ConfigError::InvalidFormat(err.to_string()))
    }
}

impl From<reqwest::Error> for ExportError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            return ExportError::Timeout {
                operation: "http request".to_string(),
                after: Duration::ZERO,
            };
        }
        if let Some(status) = err.status() {
            return match status.as_u16() {
                401 => AuthError::AuthenticationFailed(err.to_string()).into(),
                403 => AuthError::PermissionDenied(err.to_string()).into(),
                502..=504 => ConnectionError::ServiceUnavailable(err.to_string()).into(),
                _ => QueryError::ExecutionFailed {
                    code: Some(format!("HTTP {}", status.as_u16())),
                    message: err.to_string(),
                }
                .into(),
            };
        }
        if err.is_decode() {
            return QueryError::InvalidResult(err.to_string()).into();
        }
        if err.is_builder() {
            return ConnectionError::InvalidEndpoint(err.to_string()).into();
        }
        ConnectionError::ConnectionFailed(err.to_string()).into()
    }
}

impl From<ConnectionError> for ExportError {
    fn from(err: ConnectionError) -> Self {
        ExportError::Connection(err)
    }
}

impl From<AuthError> for ExportError {
    fn from(err: AuthError) -> Self {
        ExportError::Auth(err)
    }
}

impl From<QueryError> for ExportError {
    fn from(err: QueryError) -> Self {
        ExportError::Query(err)
    }
}

impl From<ConfigError> for ExportError {
    fn from(err: ConfigError) -> Self {
        ExportError::Config(err)
    }
}

impl From<FileError> for ExportError {
    fn from(err: FileError) -> Self {
        ExportError::File(err)
    }
}
