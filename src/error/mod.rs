//! Error handling for graph exports.
//!
//! This module provides:
//! - The error taxonomy shared by every stage of an export
//! - Retry classification (`ExportError::is_transient`)
//! - Exit-code mapping for scripting (`ExportError::exit_code`)
//! - Classification of Neo4j server status codes
//!
//! # Example
//!
//! ```rust
//! use graphdump::error::{ExportError, ConfigError};
//!
//! let err: ExportError = ConfigError::MissingField("connection.endpoint".into()).into();
//! assert_eq!(err.exit_code(), 2);
//! assert!(!err.is_transient());
//! ```

pub mod kinds;
pub mod neo4j;

// Re-export commonly used types
pub use kinds::{
    AuthError, ConfigError, ConnectionError, ExportError, FileError, QueryError, Result,
};
pub use neo4j::ErrorInfo;
