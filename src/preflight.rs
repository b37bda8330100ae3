//! Checks run before an export touches the output directory
//!
//! Each check implements [`Preflight`]. All checks run; their failures are
//! reported together.

use std::path::PathBuf;

use async_trait::async_trait;
use tracing::debug;

use crate::error::{ExportError, FileError, Result};

/// A condition that must hold before exporting
#[async_trait]
pub trait Preflight: Send + Sync {
    /// Short name used in logs
    fn name(&self) -> &str;

    /// Run the check
    ///
    /// # Returns
    /// * `Result<()>` - Ok if the export may proceed
    async fn check(&self) -> Result<()>;
}

/// The output directory exists, is a directory and accepts new files
pub struct OutputDirectoryCheck {
    dir: PathBuf,
}

impl OutputDirectoryCheck {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }
}

#[async_trait]
impl Preflight for OutputDirectoryCheck {
    fn name(&self) -> &str {
        "output directory"
    }

    async fn check(&self) -> Result<()> {
        let metadata = tokio::fs::metadata(&self.dir).await.map_err(|e| {
            FileError::CreateFailed(format!(
                "Directory does not exist: {} ({e})",
                self.dir.display()
            ))
        })?;
        if !metadata.is_dir() {
            return Err(FileError::CreateFailed(format!(
                "Not a directory: {}",
                self.dir.display()
            ))
            .into());
        }

        let marker = self
            .dir
            .join(format!(".graphdump-marker-{}", uuid::Uuid::new_v4().simple()));
        tokio::fs::write(&marker, b"").await.map_err(|e| {
            FileError::CreateFailed(format!(
                "Directory is not writable: {} ({e})",
                self.dir.display()
            ))
        })?;
        if let Err(e) = tokio::fs::remove_file(&marker).await {
            debug!("Could not remove write-check file {}: {}", marker.display(), e);
        }
        Ok(())
    }
}

/// Run every check and collect the failures
///
/// # Arguments
/// * `checks` - Checks to run, in order
///
/// # Returns
/// * `Result<()>` - The single failure, an aggregate of several, or Ok
pub async fn run_all(checks: &[Box<dyn Preflight>]) -> Result<()> {
    let mut failures = Vec::new();
    for check in checks {
        match check.check().await {
            Ok(()) => debug!("Preflight check passed: {}", check.name()),
            Err(e) => failures.push(e),
        }
    }
    match failures.len() {
        0 => Ok(()),
        1 => Err(failures.remove(0)),
        _ => Err(ExportError::Aggregate(failures)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Failing;

    #[async_trait]
    impl Preflight for Failing {
        fn name(&self) -> &str {
            "failing"
        }

        async fn check(&self) -> Result<()> {
            Err(ExportError::InsufficientDiskSpace {
                required: 10,
                available: 1,
            })
        }
    }

    #[tokio::test]
    async fn test_existing_directory_passes() {
        let dir = tempfile::tempdir().unwrap();
        let check = OutputDirectoryCheck::new(dir.path());
        assert!(check.check().await.is_ok());
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[tokio::test]
    async fn test_missing_directory_fails() {
        let check = OutputDirectoryCheck::new("/nonexistent/graphdump/out");
        assert!(matches!(check.check().await, Err(ExportError::File(_))));
    }

    #[tokio::test]
    async fn test_failures_are_aggregated() {
        let checks: Vec<Box<dyn Preflight>> = vec![Box::new(Failing), Box::new(Failing)];
        assert!(matches!(run_all(&checks).await, Err(ExportError::Aggregate(v)) if v.len() == 2));

        let single: Vec<Box<dyn Preflight>> = vec![Box::new(Failing)];
        assert!(matches!(
            run_all(&single).await,
            Err(ExportError::InsufficientDiskSpace { .. })
        ));
    }
}
