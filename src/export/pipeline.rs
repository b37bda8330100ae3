//! Batched retrieval of one element kind into the export file
//!
//! Rows are fetched page by page through the resilience wrapper and written
//! in order, one line each:
//! - a scratch buffer is reused for every row (cleared, capacity kept)
//! - the file is flushed and progress reported after every page
//! - encoding issues become warnings, unreadable rows become errors
//! - a caller supplied fold sees every written row
//!
//! Cancellation is checked between pages and between rows, and interrupts a
//! page fetch in flight.

use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::accumulator::{ErrorAccumulator, ErrorRecord};
use super::entity::{EntityReport, EntityWriter};
use super::header::ExportFile;
use super::lines::LineTrackingState;
use super::progress::{CompletedExportStats, ExportProgress, ProgressTracker};
use crate::config::EncodingLimits;
use crate::error::{ExportError, QueryError, Result};
use crate::model::ElementKind;
use crate::resilience::ResilientExecutor;
use crate::source::{GraphSource, PageCursor, PageRequest};

/// What happened to one source row.
#[derive(Debug, Clone, PartialEq)]
pub struct RowOutcome {
    pub kind: ElementKind,
    pub id: Option<i64>,
    /// Node labels or relationship type as written
    pub labels: Vec<String>,
    /// Line of the record in the output file
    pub line: u64,
    /// Bytes of the line, newline included
    pub bytes: u64,
    /// Values degraded while encoding
    pub issue_count: usize,
    /// Why the row could not be exported in full
    pub error: Option<String>,
}

/// Everything a phase reads from but does not own
pub struct PipelineContext<'a> {
    pub source: &'a dyn GraphSource,
    pub executor: &'a ResilientExecutor,
    pub accumulator: &'a ErrorAccumulator,
    pub limits: &'a EncodingLimits,
    pub export_id: &'a str,
    pub batch_size: usize,
    pub progress_interval: Duration,
    pub show_progress: bool,
    pub cancel: &'a CancellationToken,
}

/// Result of one completed phase
#[derive(Debug)]
pub struct PhaseResult<S> {
    pub stats: CompletedExportStats,
    pub lines: LineTrackingState,
    pub state: S,
}

/// Where the next page starts, advanced after every page.
#[derive(Debug, Clone, Copy)]
enum Position {
    Keyset(Option<i64>),
    Offset(u64),
}

impl Position {
    fn cursor(self) -> PageCursor {
        match self {
            Position::Keyset(after) => PageCursor::Keyset { after },
            Position::Offset(skip) => PageCursor::Offset { skip },
        }
    }
}

fn with_entity(record: ErrorRecord, kind: ElementKind, id: Option<i64>) -> ErrorRecord {
    match (kind, id) {
        (ElementKind::Relationship, Some(id)) => record.for_relationship(id),
        (ElementKind::Node | ElementKind::Path, Some(id)) => record.for_node(id),
        (_, None) => record,
    }
}

/// Best-effort element count; a failure only costs the progress percentage.
async fn count(ctx: &PipelineContext<'_>, kind: ElementKind) -> Option<u64> {
    let name = format!("count {}s", kind.as_str());
    match ctx.executor.execute(&name, || ctx.source.count(kind)).await {
        Ok(total) => Some(total),
        Err(e) => {
            warn!("Could not count {}s, progress will not show totals: {}", kind.as_str(), e);
            None
        }
    }
}

async fn report_row(
    ctx: &PipelineContext<'_>,
    report: &EntityReport,
    line: u64,
) -> Result<()> {
    for issue in &report.issues {
        let record = ErrorRecord::warning(issue.to_string()).at_line(line);
        ctx.accumulator
            .add_warning(with_entity(record, report.kind, report.id))
            .await?;
    }
    if let Some(ref reason) = report.error {
        let message = match report.id {
            Some(id) => format!("{} {} could not be read: {}", report.kind.as_str(), id, reason),
            None => format!("{} could not be read: {}", report.kind.as_str(), reason),
        };
        let record = ErrorRecord::error(message).at_line(line);
        ctx.accumulator
            .add_error(with_entity(record, report.kind, report.id))
            .await?;
    }
    Ok(())
}

/// Export every element of `kind`
///
/// # Arguments
/// * `ctx` - Source, resilience wrapper, accumulator and settings
/// * `kind` - Nodes or relationships
/// * `file` - Export file positioned after the previously written lines
/// * `lines` - Line state after the previously written lines
/// * `init` - Initial fold state
/// * `fold` - Called once per written row
///
/// # Returns
/// * `Result<PhaseResult<S>>` - Phase statistics, line state and fold state;
///   `Cancelled` when the token fired
pub async fn export_phase<S, F>(
    ctx: &PipelineContext<'_>,
    kind: ElementKind,
    file: &mut ExportFile,
    mut lines: LineTrackingState,
    init: S,
    mut fold: F,
) -> Result<PhaseResult<S>>
where
    F: FnMut(S, &RowOutcome) -> S,
{
    let total = count(ctx, kind).await;
    let mut tracker =
        ProgressTracker::new(kind, total, ctx.show_progress, ctx.progress_interval);
    let mut progress = ExportProgress::start();
    let mut writer = EntityWriter::new(ctx.limits, ctx.export_id);
    let mut scratch: Vec<u8> = Vec::with_capacity(64 * 1024);
    let mut position = if ctx.source.supports_keyset() {
        Position::Keyset(None)
    } else {
        Position::Offset(0)
    };
    let op_name = format!("fetch {} page", kind.as_str());
    let mut page_number = 0u64;

    info!("Exporting {}s{}", kind.as_str(), total.map(|t| format!(" ({t} expected)")).unwrap_or_default());

    let outcome: Result<S> = async {
        let mut state = init;
        loop {
            if ctx.cancel.is_cancelled() {
                return Err(ExportError::Cancelled);
            }
            if let (Position::Offset(skip), Some(total)) = (position, total) {
                if skip >= total {
                    break;
                }
            }

            page_number += 1;
            debug!("Fetching {} page #{}", kind.as_str(), page_number);
            let request = PageRequest {
                cursor: position.cursor(),
                limit: ctx.batch_size,
            };
            let page = tokio::select! {
                biased;
                _ = ctx.cancel.cancelled() => return Err(ExportError::Cancelled),
                page = ctx.executor.execute(&op_name, || ctx.source.fetch_page(kind, request)) => page?,
            };
            if page.is_empty() {
                break;
            }

            let mut page_bytes = 0u64;
            for row in &page {
                if ctx.cancel.is_cancelled() {
                    return Err(ExportError::Cancelled);
                }
                scratch.clear();
                let report = writer.write_row(&mut scratch, row);
                scratch.push(b'\n');
                file.write_all(&scratch).await?;

                lines = lines.advance(row.kind().into());
                let line = lines.current_line();
                report_row(ctx, &report, line).await?;

                let bytes = scratch.len() as u64;
                page_bytes += bytes;
                let outcome = RowOutcome {
                    kind: report.kind,
                    id: report.id,
                    labels: report.labels,
                    line,
                    bytes,
                    issue_count: report.issues.len(),
                    error: report.error,
                };
                state = fold(state, &outcome);
            }

            file.flush().await?;
            ctx.accumulator.increment_line(page.len() as u64).await?;
            progress = progress.advanced(page.len() as u64, page_bytes);
            tracker.update(&progress);

            position = match position {
                Position::Offset(skip) => Position::Offset(skip + page.len() as u64),
                Position::Keyset(after) => {
                    let last = page.iter().rev().find_map(|row| row.id());
                    let next = match (last, after) {
                        (Some(last), Some(after)) if last <= after => None,
                        (Some(last), _) => Some(Position::Keyset(Some(last))),
                        (None, _) => None,
                    };
                    next.ok_or_else(|| {
                        QueryError::InvalidResult(format!(
                            "keyset cursor did not advance after {} page #{}",
                            kind.as_str(),
                            page_number
                        ))
                    })?
                }
            };
        }
        Ok(state)
    }
    .await;

    tracker.finish();
    let state = match outcome {
        Ok(state) => state,
        Err(e) => {
            if matches!(e, ExportError::Cancelled) {
                info!("Export of {}s cancelled after {} records", kind.as_str(), progress.records());
            }
            return Err(e);
        }
    };

    let stats = progress.complete(kind);
    info!(
        "Exported {} {}s ({} bytes, {:.0} records/sec)",
        stats.records,
        kind.as_str(),
        stats.bytes,
        stats.records_per_sec
    );
    Ok(PhaseResult {
        stats,
        lines,
        state,
    })
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::config::RetryConfig;
    use crate::error::ConnectionError;
    use crate::model::{Node, PropertyMap, SourceRow};
    use crate::resilience::{BreakerSettings, RetryPolicy};
    use crate::source::MemoryGraph;

    fn executor() -> ResilientExecutor {
        ResilientExecutor::with_policy(
            RetryPolicy {
                max_retries: 3,
                base_delay: Duration::from_millis(1),
                max_delay: Duration::from_millis(2),
                attempt_timeout: Duration::from_secs(5),
            },
            BreakerSettings::from(&RetryConfig::default()),
        )
    }

    fn graph(n: i64) -> MemoryGraph {
        (1..=n).fold(MemoryGraph::new("neo4j"), |g, id| {
            g.with_node(Node {
                id,
                labels: vec!["Item".to_string()],
                properties: PropertyMap::new().with("n", id),
                ..Default::default()
            })
        })
    }

    struct Harness {
        _dir: tempfile::TempDir,
        path: PathBuf,
        file: ExportFile,
        limits: EncodingLimits,
        executor: ResilientExecutor,
        accumulator: ErrorAccumulator,
        cancel: CancellationToken,
    }

    impl Harness {
        async fn new() -> Self {
            let dir = tempfile::tempdir().unwrap();
            let path = dir.path().join("phase.jsonl");
            let file = ExportFile::create(&path, 16).await.unwrap();
            Self {
                _dir: dir,
                path,
                file,
                limits: EncodingLimits::default(),
                executor: executor(),
                accumulator: ErrorAccumulator::spawn(100),
                cancel: CancellationToken::new(),
            }
        }

        async fn run(&mut self, source: &MemoryGraph, batch_size: usize) -> Result<PhaseResult<Vec<RowOutcome>>> {
            let ctx = PipelineContext {
                source,
                executor: &self.executor,
                accumulator: &self.accumulator,
                limits: &self.limits,
                export_id: "exp",
                batch_size,
                progress_interval: Duration::from_secs(30),
                show_progress: false,
                cancel: &self.cancel,
            };
            export_phase(
                &ctx,
                ElementKind::Node,
                &mut self.file,
                LineTrackingState::after_header(),
                Vec::new(),
                |mut rows, row| {
                    rows.push(row.clone());
                    rows
                },
            )
            .await
        }

        fn data_lines(&self) -> Vec<serde_json::Value> {
            let text = std::fs::read_to_string(&self.path).unwrap();
            text.lines()
                .skip(1)
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    #[tokio::test]
    async fn test_rows_are_written_in_order_across_pages() {
        let mut h = Harness::new().await;
        let source = graph(5);
        let result = h.run(&source, 2).await.unwrap();

        assert_eq!(result.stats.records, 5);
        assert_eq!(result.lines.current_line(), 6);
        let lines: Vec<u64> = result.state.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3, 4, 5, 6]);
        // 3 pages with rows, one empty page ends the phase
        assert_eq!(source.pages_fetched(), 4);

        h.file.flush().await.unwrap();
        let ids: Vec<i64> = h.data_lines().iter().map(|v| v["id"].as_i64().unwrap()).collect();
        assert_eq!(ids, vec![1, 2, 3, 4, 5]);
        assert_eq!(result.stats.bytes, h.file.data_bytes());
    }

    #[tokio::test]
    async fn test_offset_pagination_stops_at_total() {
        let mut h = Harness::new().await;
        let source = graph(4).without_keyset();
        let result = h.run(&source, 2).await.unwrap();
        assert_eq!(result.stats.records, 4);
        assert_eq!(source.pages_fetched(), 2);
    }

    #[tokio::test]
    async fn test_transient_page_failures_are_retried() {
        let mut h = Harness::new().await;
        let source = graph(3);
        source.fail_next_pages([
            ConnectionError::ServiceUnavailable("restarting".into()).into(),
            ConnectionError::SessionExpired("gone".into()).into(),
        ]);
        let result = h.run(&source, 10).await.unwrap();
        assert_eq!(result.stats.records, 3);
    }

    #[tokio::test]
    async fn test_cancellation_stops_the_phase() {
        let mut h = Harness::new().await;
        h.cancel.cancel();
        let source = graph(3);
        assert!(matches!(h.run(&source, 10).await, Err(ExportError::Cancelled)));
        assert_eq!(source.pages_fetched(), 0);
    }

    #[tokio::test]
    async fn test_unreadable_rows_are_reported() {
        let mut h = Harness::new().await;
        let source = graph(2).with_row(SourceRow::Unreadable {
            kind: ElementKind::Node,
            id: Some(3),
            reason: "properties could not be decoded".to_string(),
        });
        let result = h.run(&source, 10).await.unwrap();
        assert_eq!(result.stats.records, 3);
        assert_eq!(result.state[2].error.as_deref(), Some("properties could not be decoded"));

        let records = h.accumulator.errors().await.unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].line, Some(4));
        assert_eq!(records[0].node_id, Some(3));

        h.file.flush().await.unwrap();
        assert_eq!(h.data_lines()[2]["_export_error"], "properties could not be decoded");
    }

    #[tokio::test]
    async fn test_encoding_issues_become_warnings() {
        let mut h = Harness::new().await;
        h.limits.max_string_length = 4;
        let source = MemoryGraph::new("neo4j").with_node(Node {
            id: 1,
            properties: PropertyMap::new().with("bio", "far too long"),
            ..Default::default()
        });
        let result = h.run(&source, 10).await.unwrap();
        assert_eq!(result.state[0].issue_count, 1);
        let summary = h.accumulator.summary().await.unwrap();
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.error_count, 0);
    }
}
