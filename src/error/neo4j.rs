//! Neo4j status-code classification
//!
//! The HTTP endpoint reports failures as `{"code": "...", "message": "..."}`
//! entries. Codes follow `Neo.<Classification>.<Category>.<Title>`; the
//! classification and category decide how the exporter reacts.

use serde::{Deserialize, Serialize};

use super::kinds::{AuthError, ConnectionError, ExportError, QueryError};

/// Structured error information reported by the server.
///
/// Serialized as-is into error trailer records, so consumers see the raw
/// server code next to the exporter's interpretation.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ErrorInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub message: String,
}

/// Classification segment of a status code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Classification {
    ClientError,
    ClientNotification,
    TransientError,
    DatabaseError,
    Unknown,
}

impl ErrorInfo {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Classification parsed from the code.
    pub fn classification(&self) -> Classification {
        match self.code.split('.').nth(1) {
            Some("ClientError") => Classification::ClientError,
            Some("ClientNotification") => Classification::ClientNotification,
            Some("TransientError") => Classification::TransientError,
            Some("DatabaseError") => Classification::DatabaseError,
            _ => Classification::Unknown,
        }
    }

    /// Category segment of the code, e.g. `Security` or `Statement`.
    pub fn category(&self) -> Option<&str> {
        self.code.split('.').nth(2)
    }

    /// Title segment of the code, e.g. `Unauthorized`.
    pub fn title(&self) -> Option<&str> {
        self.code.split('.').nth(3)
    }
}

/// Map a server-reported error onto the exporter's error taxonomy.
pub fn classify(info: &ErrorInfo) -> ExportError {
    let message = info.message.clone();
    match (info.classification(), info.category(), info.title()) {
        (Classification::ClientError, Some("Security"), Some("Forbidden")) => {
            AuthError::PermissionDenied(message).into()
        }
        (Classification::ClientError, Some("Security"), _) => {
            AuthError::AuthenticationFailed(message).into()
        }
        (Classification::ClientError, Some("Cluster"), Some("NotALeader")) => {
            ConnectionError::ServiceUnavailable(message).into()
        }
        (Classification::ClientError, Some("Transaction"), Some(title))
            if title.contains("NotFound") || title.contains("Expired") =>
        {
            ConnectionError::SessionExpired(message).into()
        }
        (Classification::TransientError, _, _) => QueryError::Transient {
            code: info.code.clone(),
            message,
        }
        .into(),
        (Classification::DatabaseError, Some("General"), Some("DatabaseUnavailable")) => {
            ConnectionError::ServiceUnavailable(message).into()
        }
        _ => QueryError::ExecutionFailed {
            code: Some(info.code.clone()),
            message,
        }
        .into(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classification_parsing() {
        let info = ErrorInfo::new("Neo.ClientError.Security.Unauthorized", "bad password");
        assert_eq!(info.classification(), Classification::ClientError);
        assert_eq!(info.category(), Some("Security"));
        assert_eq!(info.title(), Some("Unauthorized"));
        assert_eq!(ErrorInfo::default().classification(), Classification::Unknown);
    }

    #[test]
    fn test_security_errors_are_auth() {
        let err = classify(&ErrorInfo::new(
            "Neo.ClientError.Security.Unauthorized",
            "bad password",
        ));
        assert!(matches!(err, ExportError::Auth(AuthError::AuthenticationFailed(_))));
        assert!(!err.is_transient());

        let err = classify(&ErrorInfo::new("Neo.ClientError.Security.Forbidden", "no"));
        assert!(matches!(err, ExportError::Auth(AuthError::PermissionDenied(_))));
    }

    #[test]
    fn test_transient_errors_are_retryable() {
        let err = classify(&ErrorInfo::new(
            "Neo.TransientError.Transaction.DeadlockDetected",
            "deadlock",
        ));
        assert!(err.is_transient());

        let err = classify(&ErrorInfo::new(
            "Neo.ClientError.Transaction.TransactionNotFound",
            "gone",
        ));
        assert!(err.is_transient());
    }

    #[test]
    fn test_syntax_errors_are_not_retryable() {
        let err = classify(&ErrorInfo::new(
            "Neo.ClientError.Statement.SyntaxError",
            "Invalid input",
        ));
        assert!(matches!(err, ExportError::Query(QueryError::ExecutionFailed { .. })));
        assert!(!err.is_transient());
    }
}
