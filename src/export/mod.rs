//! Graph export to a single JSONL file
//!
//! This module provides the export engine:
//! - Entity records written through the bounded value encoder
//! - Batched retrieval with retries and a circuit breaker
//! - Error and warning accumulation for the trailer and manifest
//! - A header region reserved up front and filled with the manifest at the end
//! - Progress reporting through indicatif and periodic log lines

pub mod accumulator;
pub mod coordinator;
pub mod entity;
pub mod header;
pub mod lines;
pub mod manifest;
pub mod pipeline;
pub mod progress;

pub use accumulator::{ErrorAccumulator, ErrorRecord, RecordKind};
pub use coordinator::{ExportCoordinator, ExportSummary};
pub use entity::{EntityReport, EntityWriter, PathMode};
pub use header::ExportFile;
pub use lines::{LineKind, LineTrackingState};
pub use manifest::Manifest;
pub use pipeline::RowOutcome;
pub use progress::{CompletedExportStats, ExportProgress, ProgressTracker};
