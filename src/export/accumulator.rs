//! Error and warning accumulation
//!
//! A single task owns every error and warning record produced during an
//! export. Producers talk to it through a cloneable [`ErrorAccumulator`]
//! handle:
//! - each request is a message on an mpsc channel
//! - each request is acknowledged through a oneshot once it was applied, so
//!   a producer that awaited a call knows the record is stored
//! - records without an explicit line are stamped with the current line
//!
//! Stored records are capped; records beyond the cap are still counted.

use chrono::{DateTime, SecondsFormat, Utc};
use serde::{Serialize, Serializer};
use tokio::sync::{mpsc, oneshot};
use tracing::debug;

use crate::error::{ExportError, Result};

/// Messages queued before producers wait on the channel
const MAILBOX_CAPACITY: usize = 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordKind {
    Error,
    Warning,
}

/// One error or warning, written as a trailer line of the export file.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorRecord {
    #[serde(rename = "type")]
    pub kind: RecordKind,
    #[serde(serialize_with = "rfc3339")]
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub line: Option<u64>,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub node_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub relationship_id: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

fn rfc3339<S: Serializer>(ts: &DateTime<Utc>, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&ts.to_rfc3339_opts(SecondsFormat::Millis, true))
}

impl ErrorRecord {
    fn new(kind: RecordKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            line: None,
            message: message.into(),
            node_id: None,
            relationship_id: None,
            details: None,
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(RecordKind::Error, message)
    }

    pub fn warning(message: impl Into<String>) -> Self {
        Self::new(RecordKind::Warning, message)
    }

    pub fn at_line(mut self, line: u64) -> Self {
        self.line = Some(line);
        self
    }

    pub fn for_node(mut self, id: i64) -> Self {
        self.node_id = Some(id);
        self
    }

    pub fn for_relationship(mut self, id: i64) -> Self {
        self.relationship_id = Some(id);
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }
}

/// Counts without the records themselves.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct AccumulatorSummary {
    pub error_count: u64,
    pub warning_count: u64,
    /// Records counted but not stored because the cap was reached
    pub dropped: u64,
    pub first_error_line: Option<u64>,
    pub current_line: u64,
}

/// Full state at one point in time.
#[derive(Debug, Clone, Default)]
pub struct AccumulatorSnapshot {
    /// Stored records in the order they were added
    pub records: Vec<ErrorRecord>,
    pub summary: AccumulatorSummary,
}

enum Message {
    AddError {
        record: ErrorRecord,
        ack: oneshot::Sender<()>,
    },
    AddWarning {
        record: ErrorRecord,
        ack: oneshot::Sender<()>,
    },
    IncrementLine {
        by: u64,
        ack: oneshot::Sender<u64>,
    },
    Snapshot {
        reply: oneshot::Sender<AccumulatorSnapshot>,
    },
    HasErrors {
        reply: oneshot::Sender<bool>,
    },
}

struct AccumulatorState {
    records: Vec<ErrorRecord>,
    max_records: usize,
    summary: AccumulatorSummary,
}

impl AccumulatorState {
    fn store(&mut self, mut record: ErrorRecord) {
        let line = *record.line.get_or_insert(self.summary.current_line);
        match record.kind {
            RecordKind::Error => {
                self.summary.error_count += 1;
                self.summary.first_error_line.get_or_insert(line);
            }
            RecordKind::Warning => self.summary.warning_count += 1,
        }
        if self.records.len() < self.max_records {
            self.records.push(record);
        } else {
            self.summary.dropped += 1;
        }
    }

    fn handle(&mut self, message: Message) {
        // A producer that stopped waiting for its ack is not an error
        match message {
            Message::AddError { mut record, ack } => {
                record.kind = RecordKind::Error;
                self.store(record);
                let _ = ack.send(());
            }
            Message::AddWarning { mut record, ack } => {
                record.kind = RecordKind::Warning;
                self.store(record);
                let _ = ack.send(());
            }
            Message::IncrementLine { by, ack } => {
                self.summary.current_line += by;
                let _ = ack.send(self.summary.current_line);
            }
            Message::Snapshot { reply } => {
                let _ = reply.send(AccumulatorSnapshot {
                    records: self.records.clone(),
                    summary: self.summary,
                });
            }
            Message::HasErrors { reply } => {
                let _ = reply.send(self.summary.error_count > 0);
            }
        }
    }
}

/// Handle to the accumulator task
///
/// Cloning the handle is cheap; the task stops once every handle is dropped.
#[derive(Clone)]
pub struct ErrorAccumulator {
    tx: mpsc::Sender<Message>,
}

impl ErrorAccumulator {
    /// Spawn the accumulator task on the current runtime
    ///
    /// # Arguments
    /// * `max_records` - Records stored for the trailer; later ones are only counted
    ///
    /// # Returns
    /// * `Self` - Handle to the new task. The current line starts at 1, the header line.
    pub fn spawn(max_records: usize) -> Self {
        let (tx, mut rx) = mpsc::channel(MAILBOX_CAPACITY);
        let mut state = AccumulatorState {
            records: Vec::new(),
            max_records,
            summary: AccumulatorSummary {
                current_line: 1,
                ..Default::default()
            },
        };

        tokio::spawn(async move {
            while let Some(message) = rx.recv().await {
                state.handle(message);
            }
            debug!(
                "Error accumulator stopped ({} errors, {} warnings)",
                state.summary.error_count, state.summary.warning_count
            );
        });

        Self { tx }
    }

    async fn request<T>(&self, build: impl FnOnce(oneshot::Sender<T>) -> Message) -> Result<T> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx.send(build(reply_tx)).await.map_err(|_| stopped())?;
        reply_rx.await.map_err(|_| stopped())
    }

    pub async fn add_error(&self, record: ErrorRecord) -> Result<()> {
        self.request(|ack| Message::AddError { record, ack }).await
    }

    pub async fn add_warning(&self, record: ErrorRecord) -> Result<()> {
        self.request(|ack| Message::AddWarning { record, ack }).await
    }

    /// Advance the current line by `by`; returns the new current line.
    pub async fn increment_line(&self, by: u64) -> Result<u64> {
        self.request(|ack| Message::IncrementLine { by, ack }).await
    }

    pub async fn snapshot(&self) -> Result<AccumulatorSnapshot> {
        self.request(|reply| Message::Snapshot { reply }).await
    }

    pub async fn has_errors(&self) -> Result<bool> {
        self.request(|reply| Message::HasErrors { reply }).await
    }

    /// Stored records in chronological order.
    pub async fn errors(&self) -> Result<Vec<ErrorRecord>> {
        Ok(self.snapshot().await?.records)
    }

    pub async fn summary(&self) -> Result<AccumulatorSummary> {
        Ok(self.snapshot().await?.summary)
    }
}

fn stopped() -> ExportError {
    ExportError::Io(std::io::Error::new(
        std::io::ErrorKind::BrokenPipe,
        "error accumulator is no longer running",
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_counts_and_has_errors() {
        let acc = ErrorAccumulator::spawn(100);
        assert!(!acc.has_errors().await.unwrap());

        acc.add_warning(ErrorRecord::warning("string truncated")).await.unwrap();
        assert!(!acc.has_errors().await.unwrap());

        acc.add_error(ErrorRecord::error("bad row").for_node(7)).await.unwrap();
        assert!(acc.has_errors().await.unwrap());

        let summary = acc.summary().await.unwrap();
        assert_eq!(summary.error_count, 1);
        assert_eq!(summary.warning_count, 1);
        assert_eq!(summary.dropped, 0);
    }

    #[tokio::test]
    async fn test_records_are_stamped_with_current_line() {
        let acc = ErrorAccumulator::spawn(100);
        acc.add_error(ErrorRecord::error("first")).await.unwrap();
        assert_eq!(acc.increment_line(5).await.unwrap(), 6);
        acc.add_error(ErrorRecord::error("second")).await.unwrap();
        acc.add_warning(ErrorRecord::warning("explicit").at_line(3)).await.unwrap();

        let records = acc.errors().await.unwrap();
        let lines: Vec<_> = records.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![Some(1), Some(6), Some(3)]);
        assert_eq!(acc.summary().await.unwrap().first_error_line, Some(1));
    }

    #[tokio::test]
    async fn test_cap_keeps_counting() {
        let acc = ErrorAccumulator::spawn(2);
        for i in 0..5 {
            acc.add_error(ErrorRecord::error(format!("e{i}"))).await.unwrap();
        }
        let snapshot = acc.snapshot().await.unwrap();
        assert_eq!(snapshot.records.len(), 2);
        assert_eq!(snapshot.records[0].message, "e0");
        assert_eq!(snapshot.summary.error_count, 5);
        assert_eq!(snapshot.summary.dropped, 3);
    }

    #[tokio::test]
    async fn test_concurrent_producers_keep_order() {
        let acc = ErrorAccumulator::spawn(10_000);
        let mut tasks = Vec::new();
        for producer in 0..8 {
            let acc = acc.clone();
            tasks.push(tokio::spawn(async move {
                for n in 0..50 {
                    acc.add_error(ErrorRecord::error(format!("{producer}:{n}")))
                        .await
                        .unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }

        let records = acc.errors().await.unwrap();
        assert_eq!(records.len(), 400);
        for producer in 0..8 {
            let prefix = format!("{producer}:");
            let seen: Vec<u32> = records
                .iter()
                .filter_map(|r| r.message.strip_prefix(&prefix))
                .map(|n| n.parse().unwrap())
                .collect();
            assert_eq!(seen, (0..50).collect::<Vec<_>>());
        }
    }

    #[test]
    fn test_record_serialization() {
        let record = ErrorRecord::error("could not decode labels")
            .at_line(12)
            .for_relationship(4)
            .with_details(serde_json::json!({"code": "X"}));
        let value = serde_json::to_value(&record).unwrap();
        assert_eq!(value["type"], "error");
        assert_eq!(value["line"], 12);
        assert_eq!(value["relationship_id"], 4);
        assert_eq!(value["details"]["code"], "X");
        assert!(value.get("node_id").is_none());
        assert!(value["timestamp"].as_str().unwrap().ends_with('Z'));
    }
}
