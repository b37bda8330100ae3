//! graphdump library
//!
//! Streams a property graph into a single self-describing JSON Lines file:
//! a manifest on line 1, one line per node, then one per relationship, then
//! the error and warning records collected on the way.
//!
//! # Modules
//!
//! - `cli`: Command-line interface and argument parsing
//! - `config`: Configuration management
//! - `encoder`: Bounded JSON encoding of property values
//! - `error`: Error types and handling
//! - `export`: Export engine (pipeline, header, manifest, coordinator)
//! - `model`: Graph data model
//! - `preflight`: Checks run before exporting
//! - `resilience`: Retry policy and circuit breaker
//! - `source`: Graph backends
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//!
//! use graphdump::{config::Config, export::ExportCoordinator, source::HttpGraphSource};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = Config::default();
//!     let source = Arc::new(HttpGraphSource::new(&config.connection)?);
//!     let summary = ExportCoordinator::new(source, config).execute().await?;
//!     println!("Wrote {}", summary.path.display());
//!     Ok(())
//! }
//! ```

pub mod cli;
pub mod config;
pub mod encoder;
pub mod error;
pub mod export;
pub mod model;
pub mod preflight;
pub mod resilience;
pub mod source;

// Re-export commonly used types
pub use config::Config;
pub use error::{ExportError, Result};
pub use export::{ExportCoordinator, ExportSummary};
pub use model::{GraphValue, Node, Path, PropertyMap, Relationship};
pub use source::{GraphSource, HttpGraphSource, MemoryGraph};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Get library version string
///
/// # Returns
/// * `&str` - Version string
pub fn version() -> &'static str {
    VERSION
}
