//! Manifest written as line 1 of the export file
//!
//! The manifest describes the whole export: source, counts, schema, where
//! each record kind starts and what went wrong. Its final content is known
//! only at the end, so the header region is sized up front from a worst-case
//! rendering (see [`estimate_header_bytes`]).

use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;

use super::accumulator::{AccumulatorSnapshot, RecordKind};
use super::lines::{LineKind, LineTrackingState};
use super::pipeline::RowOutcome;
use super::progress::CompletedExportStats;
use crate::config::ExportConfig;
use crate::encoder::truncate_chars;
use crate::error::Result;
use crate::model::ElementKind;
use crate::source::SourceMetadata;

pub const FORMAT: &str = "graphdump-jsonl";
pub const FORMAT_VERSION: &str = "1.0";

/// Error messages copied into the manifest summary
pub const ERROR_SAMPLES: usize = 5;
/// Characters kept of each sampled message
pub const SAMPLE_MESSAGE_CHARS: usize = 200;

/// Label slots always assumed when sizing the header
const MIN_LABEL_SLOTS: usize = 64;

pub(crate) fn timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Millis, true)
}

#[derive(Debug, Clone, Serialize)]
pub struct Manifest {
    pub format: &'static str,
    pub format_version: &'static str,
    pub export_id: String,
    pub generator: Generator,
    pub started_at: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<String>,
    pub source: SourceInfo,
    pub statistics: Statistics,
    pub schema: SchemaSummary,
    pub file_statistics: FileStatistics,
    pub errors: ErrorSummary,
    pub layout: Layout,
    /// Filler making the header line exactly fill its reserved region; last field
    #[serde(skip_serializing_if = "Option::is_none")]
    pub padding: Option<String>,
}

/// Tool and machine that wrote the file
#[derive(Debug, Clone, Serialize)]
pub struct Generator {
    pub name: &'static str,
    pub version: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl Generator {
    pub fn current() -> Self {
        Self {
            name: env!("CARGO_PKG_NAME"),
            version: env!("CARGO_PKG_VERSION"),
            host: hostname::get().ok().and_then(|h| h.into_string().ok()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SourceInfo {
    pub database: String,
    pub endpoint: String,
    pub details: serde_json::Value,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct Statistics {
    pub node_count: u64,
    pub relationship_count: u64,
    /// Bytes of all lines after the header
    pub data_bytes: u64,
    pub duration_ms: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub nodes: Option<PhaseStatistics>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationships: Option<PhaseStatistics>,
}

#[derive(Debug, Clone, Serialize)]
pub struct PhaseStatistics {
    pub records: u64,
    pub bytes: u64,
    pub started_at: String,
    pub finished_at: String,
    pub duration_ms: u64,
    pub records_per_sec: f64,
}

impl From<&CompletedExportStats> for PhaseStatistics {
    fn from(stats: &CompletedExportStats) -> Self {
        Self {
            records: stats.records,
            bytes: stats.bytes,
            started_at: timestamp(&stats.started_at),
            finished_at: timestamp(&stats.finished_at),
            duration_ms: u64::try_from(stats.duration.as_millis()).unwrap_or(u64::MAX),
            records_per_sec: (stats.records_per_sec * 10.0).round() / 10.0,
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct SchemaSummary {
    pub labels: Vec<String>,
    pub relationship_types: Vec<String>,
    pub property_keys: Vec<String>,
    /// Whether any list was cut to the manifest limit
    pub truncated: bool,
}

impl SchemaSummary {
    pub fn from_metadata(metadata: &SourceMetadata, cap: usize) -> Self {
        let take = |names: &[String]| names.iter().take(cap).cloned().collect::<Vec<_>>();
        Self {
            labels: take(&metadata.labels),
            relationship_types: take(&metadata.relationship_types),
            property_keys: take(&metadata.property_keys),
            truncated: metadata.labels.len() > cap
                || metadata.relationship_types.len() > cap
                || metadata.property_keys.len() > cap,
        }
    }
}

/// Records, bytes and first line of one label or relationship type.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LabelStats {
    pub records: u64,
    pub bytes: u64,
    pub first_line: u64,
}

impl LabelStats {
    fn add(&mut self, bytes: u64, line: u64) {
        if self.records == 0 {
            self.first_line = line;
        }
        self.records += 1;
        self.bytes += bytes;
    }
}

/// Label or relationship-type names the header has room for
///
/// `slots` counts distinct names, `name_bytes` their serialized length
/// (quotes and escapes included).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LabelBudget {
    pub slots: usize,
    pub name_bytes: usize,
}

impl LabelBudget {
    pub const UNLIMITED: Self = Self {
        slots: usize::MAX,
        name_bytes: usize::MAX,
    };

    /// Take room for `name`, or refuse when it does not fit.
    fn admit(&mut self, name: &str) -> bool {
        let cost = json_len(name);
        if self.slots == 0 || cost > self.name_bytes {
            return false;
        }
        self.slots -= 1;
        self.name_bytes -= cost;
        true
    }
}

impl Default for LabelBudget {
    fn default() -> Self {
        Self::UNLIMITED
    }
}

fn json_len(name: &str) -> usize {
    serde_json::to_string(name)
        .map(|s| s.len())
        .unwrap_or(usize::MAX)
}

/// Per-label and per-type statistics of the written file
///
/// A node line counts toward each of its labels. Names the header budget has
/// no room for are folded into the `other_*` buckets.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FileStatistics {
    pub labels: BTreeMap<String, LabelStats>,
    pub relationship_types: BTreeMap<String, LabelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub unlabeled_nodes: Option<LabelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_labels: Option<LabelStats>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub other_relationship_types: Option<LabelStats>,
    #[serde(skip)]
    label_budget: LabelBudget,
    #[serde(skip)]
    type_budget: LabelBudget,
}

impl FileStatistics {
    /// Empty statistics tracking at most what the budgets allow.
    pub fn with_budgets(labels: LabelBudget, relationship_types: LabelBudget) -> Self {
        Self {
            label_budget: labels,
            type_budget: relationship_types,
            ..Self::default()
        }
    }

    /// Account for one written row.
    pub fn record(&mut self, row: &RowOutcome) {
        let (named, other, budget) = match row.kind {
            ElementKind::Node => (
                &mut self.labels,
                &mut self.other_labels,
                &mut self.label_budget,
            ),
            ElementKind::Relationship => (
                &mut self.relationship_types,
                &mut self.other_relationship_types,
                &mut self.type_budget,
            ),
            ElementKind::Path => return,
        };
        if row.labels.is_empty() && row.kind == ElementKind::Node {
            self.unlabeled_nodes
                .get_or_insert_with(LabelStats::default)
                .add(row.bytes, row.line);
            return;
        }
        for label in &row.labels {
            if let Some(stats) = named.get_mut(label) {
                stats.add(row.bytes, row.line);
            } else if budget.admit(label) {
                named
                    .entry(label.clone())
                    .or_default()
                    .add(row.bytes, row.line);
            } else {
                other
                    .get_or_insert_with(LabelStats::default)
                    .add(row.bytes, row.line);
            }
        }
    }
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct ErrorSummary {
    pub error_count: u64,
    pub warning_count: u64,
    /// Records counted but not written to the trailer
    pub dropped: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_error_line: Option<u64>,
    /// First few error messages, shortened
    pub samples: Vec<String>,
}

impl From<&AccumulatorSnapshot> for ErrorSummary {
    fn from(snapshot: &AccumulatorSnapshot) -> Self {
        let summary = snapshot.summary;
        Self {
            error_count: summary.error_count,
            warning_count: summary.warning_count,
            dropped: summary.dropped,
            first_error_line: summary.first_error_line,
            samples: snapshot
                .records
                .iter()
                .filter(|r| r.kind == RecordKind::Error)
                .take(ERROR_SAMPLES)
                .map(|r| truncate_chars(&r.message, SAMPLE_MESSAGE_CHARS).to_string())
                .collect(),
        }
    }
}

/// Where each part of the file starts
#[derive(Debug, Clone, Default, Serialize)]
pub struct Layout {
    /// Bytes of the header line, newline included
    pub header_bytes: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_node_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_relationship_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_path_line: Option<u64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first_trailer_line: Option<u64>,
    pub last_line: u64,
}

impl Layout {
    pub fn from_lines(header_bytes: u64, lines: &LineTrackingState) -> Self {
        Self {
            header_bytes,
            first_node_line: lines.first_line(LineKind::Node),
            first_relationship_line: lines.first_line(LineKind::Relationship),
            first_path_line: lines.first_line(LineKind::Path),
            first_trailer_line: lines.first_line(LineKind::Trailer),
            last_line: lines.current_line(),
        }
    }
}

impl Manifest {
    pub fn new(
        export_id: impl Into<String>,
        started_at: &DateTime<Utc>,
        source: SourceInfo,
        schema: SchemaSummary,
    ) -> Self {
        Self {
            format: FORMAT,
            format_version: FORMAT_VERSION,
            export_id: export_id.into(),
            generator: Generator::current(),
            started_at: timestamp(started_at),
            finished_at: None,
            source,
            statistics: Statistics::default(),
            schema,
            file_statistics: FileStatistics::default(),
            errors: ErrorSummary::default(),
            layout: Layout::default(),
            padding: None,
        }
    }

    pub fn to_json_bytes(&self) -> Result<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// This manifest with every field that grows during the export at its
    /// widest value.
    fn worst_case(&self, label_names: &[String], type_names: &[String]) -> Manifest {
        let widest = LabelStats {
            records: u64::MAX,
            bytes: u64::MAX,
            first_line: u64::MAX,
        };
        let phase = PhaseStatistics {
            records: u64::MAX,
            bytes: u64::MAX,
            started_at: timestamp(&DateTime::<Utc>::MAX_UTC),
            finished_at: timestamp(&DateTime::<Utc>::MAX_UTC),
            duration_ms: u64::MAX,
            records_per_sec: f64::MAX,
        };
        let slots = |names: &[String]| {
            names
                .iter()
                .map(|name| (name.clone(), widest))
                .collect::<BTreeMap<_, _>>()
        };
        // A control character escapes to six bytes, the widest a character gets
        let sample = "\u{0}".repeat(SAMPLE_MESSAGE_CHARS);

        Manifest {
            finished_at: Some(timestamp(&DateTime::<Utc>::MAX_UTC)),
            statistics: Statistics {
                node_count: u64::MAX,
                relationship_count: u64::MAX,
                data_bytes: u64::MAX,
                duration_ms: u64::MAX,
                nodes: Some(phase.clone()),
                relationships: Some(phase),
            },
            file_statistics: FileStatistics {
                labels: slots(label_names),
                relationship_types: slots(type_names),
                unlabeled_nodes: Some(widest),
                other_labels: Some(widest),
                other_relationship_types: Some(widest),
                ..FileStatistics::default()
            },
            errors: ErrorSummary {
                error_count: u64::MAX,
                warning_count: u64::MAX,
                dropped: u64::MAX,
                first_error_line: Some(u64::MAX),
                samples: vec![sample; ERROR_SAMPLES],
            },
            layout: Layout {
                header_bytes: u64::MAX,
                first_node_line: Some(u64::MAX),
                first_relationship_line: Some(u64::MAX),
                first_path_line: Some(u64::MAX),
                first_trailer_line: Some(u64::MAX),
                last_line: u64::MAX,
            },
            padding: None,
            ..self.clone()
        }
    }
}

/// Header region size and the label budgets it was sized for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeaderEstimate {
    /// Reserved bytes, newline included
    pub reserved: u64,
    pub labels: LabelBudget,
    pub relationship_types: LabelBudget,
}

/// `n` distinct slot names: the known names first, then placeholders
fn slot_names(known: &[String], prefix: &str, n: usize) -> Vec<String> {
    let mut names: Vec<String> = known
        .iter()
        .cloned()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .take(n)
        .collect();
    let mut i = 0usize;
    while names.len() < n {
        let placeholder = format!("{prefix}_{i:08}");
        if !known.contains(&placeholder) {
            names.push(placeholder);
        }
        i += 1;
    }
    names
}

/// Size the header region for `manifest`
///
/// Every label slot is rendered with its widest statistics. Known names
/// occupy their own slots; the rest get placeholder names plus
/// `header_per_label_bytes` each. The returned budgets hold
/// [`FileStatistics`] to exactly that room, so the final manifest never
/// outgrows the estimate.
///
/// # Arguments
/// * `manifest` - Manifest as known before the export (source and schema filled in)
/// * `metadata` - Schema reported by the source, for the expected label counts
/// * `config` - Header sizing knobs
///
/// # Returns
/// * `Result<HeaderEstimate>` - Reserved bytes (a power of two of at least
///   `header_min_bytes`) and the label budgets
pub fn estimate_header_bytes(
    manifest: &Manifest,
    metadata: &SourceMetadata,
    config: &ExportConfig,
) -> Result<HeaderEstimate> {
    let slots = |known: usize| {
        known
            .max(config.expected_labels)
            .max(MIN_LABEL_SLOTS)
            .min(config.max_manifest_labels.max(1))
    };
    let label_names = slot_names(&metadata.labels, "label", slots(metadata.labels.len()));
    let type_names = slot_names(
        &metadata.relationship_types,
        "type",
        slots(metadata.relationship_types.len()),
    );
    let budget = |names: &[String]| LabelBudget {
        slots: names.len(),
        name_bytes: names.iter().map(|n| json_len(n)).sum::<usize>()
            + names.len() * config.header_per_label_bytes,
    };

    let skeleton = manifest.worst_case(&label_names, &type_names).to_json_bytes()?;
    let estimate = skeleton.len()
        + (label_names.len() + type_names.len()) * config.header_per_label_bytes
        + config.header_safety_margin;
    let reserved = estimate
        .checked_next_power_of_two()
        .unwrap_or(estimate)
        .max(config.header_min_bytes);
    Ok(HeaderEstimate {
        reserved: reserved as u64,
        labels: budget(&label_names),
        relationship_types: budget(&type_names),
    })
}
