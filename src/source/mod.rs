//! Graph database backends
//!
//! The exporter talks to a database only through the [`GraphSource`] trait:
//! - connectivity verification
//! - element counts
//! - pages of rows, by keyset cursor or by offset
//! - schema and server metadata for the manifest
//!
//! Two backends are provided: [`MemoryGraph`] for in-process graphs and
//! [`HttpGraphSource`] for the Neo4j HTTP transactional endpoint.

pub mod http;
pub mod memory;

use async_trait::async_trait;
use serde::Serialize;

use crate::error::Result;
use crate::model::{ElementKind, SourceRow};

pub use http::HttpGraphSource;
pub use memory::MemoryGraph;

/// Where the next page starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageCursor {
    /// Rows with an id greater than `after`, ordered by id
    Keyset { after: Option<i64> },
    /// Rows after the first `skip`, ordered by id
    Offset { skip: u64 },
}

/// One page request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PageRequest {
    pub cursor: PageCursor,
    pub limit: usize,
}

/// Schema and server information reported by a backend.
#[derive(Debug, Clone, Default, Serialize)]
pub struct SourceMetadata {
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
    /// Backend specific details, e.g. server version and edition
    pub details: serde_json::Value,
}

/// A graph database the exporter can read from
#[async_trait]
pub trait GraphSource: Send + Sync {
    /// Name of the exported database
    fn database_name(&self) -> &str;

    /// Human readable location, recorded in the manifest
    fn endpoint(&self) -> String;

    /// Whether `PageCursor::Keyset` is supported
    fn supports_keyset(&self) -> bool {
        true
    }

    /// Check that the database is reachable and the credentials work
    async fn verify_connectivity(&self) -> Result<()>;

    /// Number of elements of `kind`
    async fn count(&self, kind: ElementKind) -> Result<u64>;

    /// Fetch one page of rows of `kind`, ordered by id
    ///
    /// # Arguments
    /// * `kind` - Node or relationship
    /// * `request` - Cursor and page size
    ///
    /// # Returns
    /// * `Result<Vec<SourceRow>>` - Rows of the page; empty when exhausted
    async fn fetch_page(&self, kind: ElementKind, request: PageRequest) -> Result<Vec<SourceRow>>;

    /// Collect labels, relationship types, property keys and server details
    async fn collect_metadata(&self) -> Result<SourceMetadata>;
}
