//! Export coordinator orchestrating a whole export run
//!
//! Brings together the graph source, the resilience wrapper, the batched
//! pipeline and the deferred-header file:
//! 1. Verify connectivity (not retried)
//! 2. Run preflight checks
//! 3. Collect schema metadata
//! 4. Remove stale temp files and reserve the header in a new one
//! 5. Export nodes, then relationships
//! 6. Append error and warning records as trailer lines
//! 7. Write the manifest into the header and rename the file into place
//!
//! A failed or cancelled run leaves its `.tmp` file behind.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use super::accumulator::{AccumulatorSnapshot, ErrorAccumulator};
use super::header::ExportFile;
use super::lines::{LineKind, LineTrackingState};
use super::manifest::{
    estimate_header_bytes, timestamp, ErrorSummary, FileStatistics, Layout, Manifest,
    SchemaSummary, SourceInfo, Statistics,
};
use super::pipeline::{export_phase, PhaseResult, PipelineContext, RowOutcome};
use crate::config::Config;
use crate::error::{ExportError, FileError, Result};
use crate::model::ElementKind;
use crate::preflight::{run_all, OutputDirectoryCheck, Preflight};
use crate::resilience::ResilientExecutor;
use crate::source::{GraphSource, SourceMetadata};

const TEMP_SUFFIX: &str = ".jsonl.tmp";

/// Result of a completed export
#[derive(Debug, Clone)]
pub struct ExportSummary {
    pub export_id: String,
    /// Final location of the export file
    pub path: PathBuf,
    pub node_count: u64,
    pub relationship_count: u64,
    /// File size in bytes, header included
    pub file_bytes: u64,
    pub header_bytes: u64,
    pub error_count: u64,
    pub warning_count: u64,
    pub elapsed: Duration,
}

/// Coordinator for export operations
pub struct ExportCoordinator {
    source: Arc<dyn GraphSource>,
    config: Config,
    preflight: Vec<Box<dyn Preflight>>,
    cancel_token: CancellationToken,
}

/// Temp file name for an export
pub fn temp_file_name(export_id: &str) -> String {
    format!(".{export_id}{TEMP_SUFFIX}")
}

/// Final file name: `<db>_<YYYYMMDDTHHMMSSZ>_<n>n_<r>r_<short id>.jsonl`
pub fn final_file_name(
    database: &str,
    started_at: &DateTime<Utc>,
    nodes: u64,
    relationships: u64,
    export_id: &str,
) -> String {
    let short: String = export_id.chars().filter(|c| *c != '-').take(8).collect();
    format!(
        "{}_{}_{}n_{}r_{}.jsonl",
        database,
        started_at.format("%Y%m%dT%H%M%SZ"),
        nodes,
        relationships,
        short
    )
}

/// Remove temp files left by earlier runs that did not finish
///
/// Only files unmodified for at least `older_than` are touched; a run still
/// writing flushes after every page and keeps its file fresh.
async fn remove_stale_temp_files(dir: &Path, older_than: Duration) -> Result<usize> {
    let mut removed = 0;
    let mut entries = tokio::fs::read_dir(dir).await?;
    while let Some(entry) = entries.next_entry().await? {
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if !(name.starts_with('.') && name.ends_with(TEMP_SUFFIX)) {
            continue;
        }
        let age = entry
            .metadata()
            .await
            .and_then(|m| m.modified())
            .ok()
            .and_then(|modified| SystemTime::now().duration_since(modified).ok());
        match age {
            Some(age) if age >= older_than => {}
            _ => {
                debug!("Keeping recent temp file {}", name);
                continue;
            }
        }
        match tokio::fs::remove_file(entry.path()).await {
            Ok(()) => {
                debug!("Removed stale temp file {}", name);
                removed += 1;
            }
            Err(e) => warn!("Could not remove stale temp file {}: {}", name, e),
        }
    }
    Ok(removed)
}

impl ExportCoordinator {
    /// Create a coordinator exporting `source` with `config`
    ///
    /// The output directory check is always part of the preflight.
    pub fn new(source: Arc<dyn GraphSource>, config: Config) -> Self {
        let preflight: Vec<Box<dyn Preflight>> =
            vec![Box::new(OutputDirectoryCheck::new(config.export.output_dir.clone()))];
        Self {
            source,
            config,
            preflight,
            cancel_token: CancellationToken::new(),
        }
    }

    /// Set cancellation token for this export operation
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel_token = token;
        self
    }

    /// Add a preflight check
    pub fn with_preflight(mut self, check: Box<dyn Preflight>) -> Self {
        self.preflight.push(check);
        self
    }

    /// Execute the export
    ///
    /// # Returns
    /// * `Result<ExportSummary>` - Summary of the finished export, or the
    ///   error that stopped it
    pub async fn execute(&self) -> Result<ExportSummary> {
        let start_time = Instant::now();
        let started_at = Utc::now();
        let export_id = Uuid::new_v4().to_string();
        info!(
            "Starting export {} of database '{}' from {}",
            export_id,
            self.source.database_name(),
            self.source.endpoint()
        );

        let executor = ResilientExecutor::new(&self.config.retry);
        let metadata = self.prepare(&executor).await?;
        let output_dir = &self.config.export.output_dir;
        match remove_stale_temp_files(output_dir, self.config.stale_temp_after()).await {
            Ok(0) => {}
            Ok(n) => info!("Removed {} stale temp files from {}", n, output_dir.display()),
            Err(e) => warn!("Could not scan {} for stale temp files: {}", output_dir.display(), e),
        }

        let cap = self.config.export.max_manifest_labels;
        let manifest = Manifest::new(
            &export_id,
            &started_at,
            SourceInfo {
                database: self.source.database_name().to_string(),
                endpoint: self.source.endpoint(),
                details: metadata.details.clone(),
            },
            SchemaSummary::from_metadata(&metadata, cap),
        );
        let estimate = estimate_header_bytes(&manifest, &metadata, &self.config.export)?;
        let temp_path = output_dir.join(temp_file_name(&export_id));
        let file = ExportFile::create(&temp_path, estimate.reserved).await?;
        info!(
            "Writing to {} ({} header bytes reserved)",
            temp_path.display(),
            estimate.reserved
        );

        let statistics =
            FileStatistics::with_budgets(estimate.labels, estimate.relationship_types);
        let result = self
            .write_export(
                &executor,
                file,
                manifest,
                statistics,
                &export_id,
                &started_at,
                start_time,
            )
            .await;
        match result {
            Ok(summary) => {
                info!(
                    "Export complete: {} nodes, {} relationships, {} bytes in {:.1}s -> {}",
                    summary.node_count,
                    summary.relationship_count,
                    summary.file_bytes,
                    summary.elapsed.as_secs_f64(),
                    summary.path.display()
                );
                Ok(summary)
            }
            Err(ExportError::Cancelled) => {
                warn!("Export cancelled, partial output left at {}", temp_path.display());
                Err(ExportError::Cancelled)
            }
            Err(e) => {
                error!("Export failed: {}; partial output left at {}", e, temp_path.display());
                Err(e)
            }
        }
    }

    /// Connectivity, preflight and metadata, before any file is created
    ///
    /// Metadata is best effort: without it the manifest has an empty schema
    /// and label slots are sized from configuration alone.
    async fn prepare(&self, executor: &ResilientExecutor) -> Result<SourceMetadata> {
        let timeout = self.config.connect_timeout();
        tokio::time::timeout(timeout, self.source.verify_connectivity())
            .await
            .map_err(|_| ExportError::Timeout {
                operation: "verify connectivity".to_string(),
                after: timeout,
            })??;
        debug!("Connectivity verified");

        run_all(&self.preflight).await?;

        let metadata = match executor
            .execute("collect metadata", || self.source.collect_metadata())
            .await
        {
            Ok(metadata) => metadata,
            Err(ExportError::Cancelled) => return Err(ExportError::Cancelled),
            Err(e) => {
                warn!("Could not collect metadata, exporting without schema: {}", e);
                SourceMetadata::default()
            }
        };
        debug!(
            "Source reports {} labels, {} relationship types, {} property keys",
            metadata.labels.len(),
            metadata.relationship_types.len(),
            metadata.property_keys.len()
        );
        Ok(metadata)
    }

    #[allow(clippy::too_many_arguments)]
    async fn write_export(
        &self,
        executor: &ResilientExecutor,
        mut file: ExportFile,
        mut manifest: Manifest,
        statistics: FileStatistics,
        export_id: &str,
        started_at: &DateTime<Utc>,
        start_time: Instant,
    ) -> Result<ExportSummary> {
        let export = &self.config.export;
        let accumulator = ErrorAccumulator::spawn(export.max_error_records);
        let ctx = PipelineContext {
            source: self.source.as_ref(),
            executor,
            accumulator: &accumulator,
            limits: &self.config.limits,
            export_id,
            batch_size: export.batch_size,
            progress_interval: self.config.progress_interval(),
            show_progress: export.show_progress,
            cancel: &self.cancel_token,
        };
        let record = |mut stats: FileStatistics, row: &RowOutcome| {
            stats.record(row);
            stats
        };

        let nodes: PhaseResult<FileStatistics> = export_phase(
            &ctx,
            ElementKind::Node,
            &mut file,
            LineTrackingState::after_header(),
            statistics,
            record,
        )
        .await?;
        let relationships = export_phase(
            &ctx,
            ElementKind::Relationship,
            &mut file,
            nodes.lines,
            nodes.state,
            record,
        )
        .await?;

        let snapshot = accumulator.snapshot().await?;
        let lines = write_trailer(&mut file, relationships.lines, &snapshot).await?;

        manifest.finished_at = Some(timestamp(&Utc::now()));
        manifest.statistics = Statistics {
            node_count: nodes.stats.records,
            relationship_count: relationships.stats.records,
            data_bytes: file.data_bytes(),
            duration_ms: u64::try_from(start_time.elapsed().as_millis()).unwrap_or(u64::MAX),
            nodes: Some((&nodes.stats).into()),
            relationships: Some((&relationships.stats).into()),
        };
        manifest.file_statistics = relationships.state;
        manifest.errors = ErrorSummary::from(&snapshot);
        manifest.layout = Layout::from_lines(file.reserved(), &lines);

        let temp_path = file.path().to_path_buf();
        let header_bytes = file.reserved();
        let file_bytes = file.finalize(&manifest).await?;

        let final_path = self.config.export.output_dir.join(final_file_name(
            self.source.database_name(),
            started_at,
            nodes.stats.records,
            relationships.stats.records,
            export_id,
        ));
        tokio::fs::rename(&temp_path, &final_path).await.map_err(|e| {
            FileError::RenameFailed(format!(
                "{} -> {}: {e}",
                temp_path.display(),
                final_path.display()
            ))
        })?;
        debug!("Circuit breaker state at finish: {}", executor.state().await);

        Ok(ExportSummary {
            export_id: export_id.to_string(),
            path: final_path,
            node_count: nodes.stats.records,
            relationship_count: relationships.stats.records,
            file_bytes,
            header_bytes,
            error_count: snapshot.summary.error_count,
            warning_count: snapshot.summary.warning_count,
            elapsed: start_time.elapsed(),
        })
    }
}

/// Append accumulated records after the data, one line each
async fn write_trailer(
    file: &mut ExportFile,
    mut lines: LineTrackingState,
    snapshot: &AccumulatorSnapshot,
) -> Result<LineTrackingState> {
    let mut buf = Vec::new();
    for record in &snapshot.records {
        buf.clear();
        serde_json::to_writer(&mut buf, record)?;
        buf.push(b'\n');
        file.write_all(&buf).await?;
        lines = lines.advance(LineKind::Trailer);
    }
    file.flush().await?;
    if snapshot.summary.dropped > 0 {
        warn!(
            "{} error and warning records exceeded the limit and were not written",
            snapshot.summary.dropped
        );
    }
    Ok(lines)
}

#[cfg(test)]
mod tests {
    use chrono::TimeZone;

    use super::*;
    use crate::error::{AuthError, ConnectionError};
    use crate::model::{Node, Relationship};
    use crate::source::MemoryGraph;

    fn config(dir: &Path) -> Config {
        let mut config = Config::default();
        config.export.output_dir = dir.to_path_buf();
        config.export.show_progress = false;
        config.retry.base_delay_ms = 1;
        config.retry.max_delay_ms = 2;
        config
    }

    fn small_graph() -> MemoryGraph {
        MemoryGraph::new("neo4j")
            .with_node(Node {
                id: 1,
                labels: vec!["Person".to_string()],
                ..Default::default()
            })
            .with_node(Node {
                id: 2,
                labels: vec!["Person".to_string()],
                ..Default::default()
            })
            .with_relationship(Relationship {
                id: 10,
                rel_type: "KNOWS".to_string(),
                start: 1,
                end: 2,
                ..Default::default()
            })
    }

    fn files_in(dir: &Path) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_final_file_name() {
        let started = Utc.with_ymd_and_hms(2024, 3, 9, 14, 5, 7).unwrap();
        let name = final_file_name("neo4j", &started, 3, 2, "0b0e6a0c-3a5e-4a4f-9b53-2f5d3c1b7e10");
        assert_eq!(name, "neo4j_20240309T140507Z_3n_2r_0b0e6a0c.jsonl");
        assert_eq!(temp_file_name("abc"), ".abc.jsonl.tmp");
    }

    #[tokio::test]
    async fn test_export_produces_renamed_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = Arc::new(small_graph());
        let summary = ExportCoordinator::new(source, config(dir.path()))
            .execute()
            .await
            .unwrap();

        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.relationship_count, 1);
        assert_eq!(summary.error_count, 0);
        assert!(summary.path.exists());
        assert_eq!(std::fs::metadata(&summary.path).unwrap().len(), summary.file_bytes);
        assert_eq!(files_in(dir.path()).len(), 1);
    }

    #[tokio::test]
    async fn test_only_abandoned_temp_files_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        let abandoned = dir.path().join(".old-run.jsonl.tmp");
        std::fs::write(&abandoned, b"partial").unwrap();
        std::fs::File::options()
            .write(true)
            .open(&abandoned)
            .unwrap()
            .set_modified(SystemTime::now() - Duration::from_secs(48 * 60 * 60))
            .unwrap();
        // Another export still writing to the same directory
        std::fs::write(dir.path().join(".running.jsonl.tmp"), b"in progress").unwrap();
        std::fs::write(dir.path().join("keep.txt"), b"x").unwrap();

        let summary = ExportCoordinator::new(Arc::new(small_graph()), config(dir.path()))
            .execute()
            .await
            .unwrap();

        let names = files_in(dir.path());
        assert_eq!(names.len(), 3);
        assert!(!names.contains(&".old-run.jsonl.tmp".to_string()));
        assert!(names.contains(&".running.jsonl.tmp".to_string()));
        assert!(names.contains(&"keep.txt".to_string()));
        assert!(summary.path.exists());
    }

    #[tokio::test]
    async fn test_metadata_failures_count_toward_page_breaker() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = config(dir.path());
        config.retry.failure_threshold = 1;
        config.retry.open_duration = 600;
        let source = small_graph();
        source.fail_metadata(AuthError::PermissionDenied("no schema access".into()).into());
        let source = Arc::new(source);

        let result = ExportCoordinator::new(source.clone(), config).execute().await;
        let error = result.unwrap_err();
        assert!(matches!(error, ExportError::CircuitOpen { .. }));
        assert_eq!(error.exit_code(), 12);
        // The open breaker rejected the page fetch before it reached the source
        assert_eq!(source.pages_fetched(), 0);
    }

    #[tokio::test]
    async fn test_export_continues_without_metadata() {
        let dir = tempfile::tempdir().unwrap();
        let source = small_graph();
        source.fail_metadata(AuthError::PermissionDenied("no schema access".into()).into());

        let summary = ExportCoordinator::new(Arc::new(source), config(dir.path()))
            .execute()
            .await
            .unwrap();
        assert_eq!(summary.node_count, 2);
        assert_eq!(summary.relationship_count, 1);
    }

    #[tokio::test]
    async fn test_connectivity_failure_is_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let source = small_graph();
        source.fail_connectivity(ConnectionError::ServiceUnavailable("down".into()).into());
        let source = Arc::new(source);

        let result = ExportCoordinator::new(source.clone(), config(dir.path()))
            .execute()
            .await;
        assert!(matches!(
            result,
            Err(ExportError::Connection(ConnectionError::ServiceUnavailable(_)))
        ));
        assert_eq!(source.pages_fetched(), 0);
        assert!(files_in(dir.path()).is_empty());
    }

    #[tokio::test]
    async fn test_fatal_page_error_leaves_temp_file() {
        let dir = tempfile::tempdir().unwrap();
        let source = small_graph();
        source.fail_next_pages([AuthError::PermissionDenied("no read".into()).into()]);

        let result = ExportCoordinator::new(Arc::new(source), config(dir.path()))
            .execute()
            .await;
        assert!(matches!(result, Err(ExportError::Auth(_))));
        let names = files_in(dir.path());
        assert_eq!(names.len(), 1);
        assert!(names[0].ends_with(TEMP_SUFFIX));
    }

    #[tokio::test]
    async fn test_missing_output_directory_fails_preflight() {
        let dir = tempfile::tempdir().unwrap();
        let missing = dir.path().join("missing");
        let result = ExportCoordinator::new(Arc::new(small_graph()), config(&missing))
            .execute()
            .await;
        assert!(matches!(result, Err(ExportError::File(FileError::CreateFailed(_)))));
    }
}
