//! Progress tracking for export phases
//!
//! `ExportProgress` is a snapshot that is replaced after every page, never
//! mutated in place. When a phase ends it is turned into an immutable
//! `CompletedExportStats`. `ProgressTracker` renders snapshots as a progress
//! bar and a periodic log line.

use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use crate::model::ElementKind;

/// Progress of one running export phase
#[derive(Debug, Clone, Copy)]
pub struct ExportProgress {
    records: u64,
    bytes: u64,
    started: Instant,
    started_at: DateTime<Utc>,
}

impl ExportProgress {
    pub fn start() -> Self {
        Self {
            records: 0,
            bytes: 0,
            started: Instant::now(),
            started_at: Utc::now(),
        }
    }

    /// New snapshot with `records` and `bytes` added.
    #[must_use]
    pub fn advanced(&self, records: u64, bytes: u64) -> Self {
        Self {
            records: self.records + records,
            bytes: self.bytes + bytes,
            ..*self
        }
    }

    pub fn records(&self) -> u64 {
        self.records
    }

    pub fn bytes(&self) -> u64 {
        self.bytes
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn records_per_sec(&self) -> f64 {
        rate(self.records, self.elapsed())
    }

    /// Freeze this snapshot as the final statistics of `phase`.
    pub fn complete(&self, phase: ElementKind) -> CompletedExportStats {
        let duration = self.elapsed();
        CompletedExportStats {
            phase,
            started_at: self.started_at,
            finished_at: Utc::now(),
            duration,
            records: self.records,
            bytes: self.bytes,
            records_per_sec: rate(self.records, duration),
        }
    }
}

/// Final statistics of one export phase
#[derive(Debug, Clone, PartialEq)]
pub struct CompletedExportStats {
    pub phase: ElementKind,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub duration: Duration,
    pub records: u64,
    pub bytes: u64,
    pub records_per_sec: f64,
}

fn rate(records: u64, elapsed: Duration) -> f64 {
    let secs = elapsed.as_secs_f64();
    if secs > 0.0 { records as f64 / secs } else { 0.0 }
}

/// Progress display for export phases
///
/// Shows an optional progress bar and writes a log line at most once per
/// interval, so long exports stay observable in non-interactive runs.
pub struct ProgressTracker {
    /// Phase being tracked
    phase: ElementKind,
    /// Expected total, if the count query succeeded
    total: Option<u64>,
    /// Progress bar (optional, can be disabled)
    bar: Option<ProgressBar>,
    /// Minimum time between two progress log lines
    log_interval: Duration,
    /// When the last progress line was logged
    last_log: Instant,
}

impl ProgressTracker {
    /// Create a new progress tracker
    ///
    /// # Arguments
    /// * `phase` - Kind of records exported in this phase
    /// * `total` - Total number of records if known (None for unknown)
    /// * `enable_bar` - Whether to display a progress bar
    /// * `log_interval` - Minimum time between progress log lines
    ///
    /// # Returns
    /// * `Self` - New progress tracker instance
    pub fn new(
        phase: ElementKind,
        total: Option<u64>,
        enable_bar: bool,
        log_interval: Duration,
    ) -> Self {
        let bar = enable_bar.then(|| match total {
            Some(n) => {
                let bar = ProgressBar::new(n);
                bar.set_style(
                    ProgressStyle::default_bar()
                        .template("{spinner:.green} [{bar:40.cyan/blue}] {pos}/{len} {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_bar())
                        .progress_chars("#>-"),
                );
                bar
            }
            None => {
                let bar = ProgressBar::new_spinner();
                bar.set_style(
                    ProgressStyle::default_spinner()
                        .template("{spinner:.green} {pos} records {msg}")
                        .unwrap_or_else(|_| ProgressStyle::default_spinner()),
                );
                bar
            }
        });

        Self {
            phase,
            total,
            bar,
            log_interval,
            last_log: Instant::now(),
        }
    }

    /// Show a new progress snapshot
    ///
    /// # Arguments
    /// * `progress` - Current snapshot of the phase
    ///
    /// # Returns
    /// * `bool` - Whether a progress line was logged
    pub fn update(&mut self, progress: &ExportProgress) -> bool {
        let speed = progress.records_per_sec();
        if let Some(ref bar) = self.bar {
            bar.set_position(progress.records());
            bar.set_message(format!("({speed:.0} records/sec)"));
        }

        if self.last_log.elapsed() < self.log_interval {
            return false;
        }
        self.last_log = Instant::now();
        match self.total {
            Some(total) if total > 0 => {
                let percent = progress.records() as f64 * 100.0 / total as f64;
                info!(
                    "Exported {}/{} {}s ({:.1}%, {:.0} records/sec)",
                    progress.records(),
                    total,
                    self.phase.as_str(),
                    percent,
                    speed
                );
            }
            _ => info!(
                "Exported {} {}s ({:.0} records/sec)",
                progress.records(),
                self.phase.as_str(),
                speed
            ),
        }
        true
    }

    /// Finish and clear the progress bar
    pub fn finish(&self) {
        if let Some(ref bar) = self.bar {
            bar.finish_and_clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_snapshots_are_independent() {
        let start = ExportProgress::start();
        let next = start.advanced(10, 2048).advanced(5, 1024);
        assert_eq!(start.records(), 0);
        assert_eq!(next.records(), 15);
        assert_eq!(next.bytes(), 3072);
    }

    #[test]
    fn test_complete_freezes_counts() {
        let progress = ExportProgress::start().advanced(3, 300);
        let stats = progress.complete(ElementKind::Node);
        assert_eq!(stats.phase, ElementKind::Node);
        assert_eq!(stats.records, 3);
        assert_eq!(stats.bytes, 300);
        assert!(stats.finished_at >= stats.started_at);
        assert!(stats.records_per_sec >= 0.0);
    }

    #[test]
    fn test_tracker_logs_once_per_interval() {
        let mut tracker = ProgressTracker::new(
            ElementKind::Relationship,
            Some(100),
            false,
            Duration::from_secs(3600),
        );
        let progress = ExportProgress::start().advanced(50, 0);
        assert!(!tracker.update(&progress));

        let mut eager =
            ProgressTracker::new(ElementKind::Node, None, false, Duration::ZERO);
        assert!(eager.update(&progress));
        assert!(eager.update(&progress));
        eager.finish();
    }
}
