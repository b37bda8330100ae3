//! Export file with a header reserved up front and written last
//!
//! The file starts with a reserved region of spaces ending in a newline.
//! Data lines are streamed after it. When the export is done the manifest is
//! rendered to exactly the reserved size and written over the region, so no
//! data line ever moves.

use std::path::{Path, PathBuf};

use tokio::fs::File;
use tokio::io::{AsyncSeekExt, AsyncWriteExt, BufWriter, SeekFrom};
use tracing::debug;

use super::manifest::Manifest;
use crate::error::{FileError, Result};

/// Bytes `,"padding":""` adds to a manifest before any padding spaces
const PADDING_FIELD_OVERHEAD: usize = 13;

/// Write buffer of the export file
const WRITE_BUFFER_BYTES: usize = 8 * 1024 * 1024;

/// Render `manifest` as a header line of exactly `reserved` bytes
///
/// The gap between the manifest and the reserved size is filled with a
/// `padding` field, or with trailing spaces when the gap is too small for
/// the field.
///
/// # Returns
/// * `Result<Vec<u8>>` - `reserved` bytes ending in a newline, or
///   `HeaderOverflow` if the manifest does not fit
pub fn render_header(manifest: &Manifest, reserved: u64) -> Result<Vec<u8>> {
    let target = usize::try_from(reserved.saturating_sub(1)).unwrap_or(usize::MAX);
    let mut manifest = manifest.clone();
    manifest.padding = None;
    let mut line = manifest.to_json_bytes()?;

    if line.len() > target {
        return Err(FileError::HeaderOverflow {
            reserved,
            required: line.len() as u64 + 1,
        }
        .into());
    }

    let gap = target - line.len();
    if gap >= PADDING_FIELD_OVERHEAD {
        manifest.padding = Some(" ".repeat(gap - PADDING_FIELD_OVERHEAD));
        line = manifest.to_json_bytes()?;
    } else {
        line.resize(target, b' ');
    }
    line.push(b'\n');

    if line.len() as u64 != reserved {
        return Err(FileError::HeaderSizeMismatch {
            expected: reserved,
            actual: line.len() as u64,
        }
        .into());
    }
    Ok(line)
}

/// Output file with a reserved header region
pub struct ExportFile {
    writer: BufWriter<File>,
    path: PathBuf,
    reserved: u64,
    data_bytes: u64,
}

impl ExportFile {
    /// Create the file and write the placeholder region
    ///
    /// # Arguments
    /// * `path` - File to create; an existing file is truncated
    /// * `reserved` - Size of the header region, newline included
    ///
    /// # Returns
    /// * `Result<Self>` - File positioned right after the region
    pub async fn create(path: &Path, reserved: u64) -> Result<Self> {
        if reserved == 0 {
            return Err(FileError::CreateFailed("header region cannot be empty".to_string()).into());
        }
        let file = File::create(path).await.map_err(|e| {
            FileError::CreateFailed(format!("Failed to create {}: {e}", path.display()))
        })?;
        let mut writer = BufWriter::with_capacity(WRITE_BUFFER_BYTES, file);

        let mut placeholder = vec![b' '; usize::try_from(reserved - 1).unwrap_or(usize::MAX)];
        placeholder.push(b'\n');
        writer
            .write_all(&placeholder)
            .await
            .map_err(|e| FileError::WriteFailed(format!("Failed to reserve header: {e}")))?;

        debug!("Reserved {} header bytes in {}", reserved, path.display());
        Ok(Self {
            writer,
            path: path.to_path_buf(),
            reserved,
            data_bytes: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn reserved(&self) -> u64 {
        self.reserved
    }

    /// Bytes written after the header region
    pub fn data_bytes(&self) -> u64 {
        self.data_bytes
    }

    pub async fn write_all(&mut self, bytes: &[u8]) -> Result<()> {
        self.writer
            .write_all(bytes)
            .await
            .map_err(|e| FileError::WriteFailed(format!("Failed to write to file: {e}")))?;
        self.data_bytes += bytes.len() as u64;
        Ok(())
    }

    pub async fn flush(&mut self) -> Result<()> {
        self.writer
            .flush()
            .await
            .map_err(|e| FileError::WriteFailed(format!("Failed to flush file: {e}")))?;
        Ok(())
    }

    /// Write the manifest into the header region and close the file
    ///
    /// # Arguments
    /// * `manifest` - Final manifest
    ///
    /// # Returns
    /// * `Result<u64>` - Total file size
    pub async fn finalize(mut self, manifest: &Manifest) -> Result<u64> {
        let header = render_header(manifest, self.reserved)?;
        self.flush().await?;

        let mut file = self.writer.into_inner();
        file.seek(SeekFrom::Start(0)).await?;
        file.write_all(&header)
            .await
            .map_err(|e| FileError::WriteFailed(format!("Failed to write header: {e}")))?;
        file.flush().await?;
        file.sync_all().await?;

        let size = self.reserved + self.data_bytes;
        debug!("Finalized {} ({} bytes)", self.path.display(), size);
        Ok(size)
    }
}

#[cfg(test)]
mod tests {
    use chrono::Utc;

    use super::*;
    use crate::error::ExportError;
    use crate::export::manifest::{SchemaSummary, SourceInfo};

    fn manifest() -> Manifest {
        Manifest::new(
            "export-1",
            &Utc::now(),
            SourceInfo {
                database: "neo4j".to_string(),
                endpoint: "memory".to_string(),
                details: serde_json::Value::Null,
            },
            SchemaSummary::default(),
        )
    }

    #[test]
    fn test_header_fills_region_exactly() {
        let m = manifest();
        let natural = m.to_json_bytes().unwrap().len() as u64;
        // Gaps below, at and above the padding field overhead
        for extra in [0u64, 1, 5, 12, 13, 14, 100, 5000] {
            let reserved = natural + 1 + extra;
            let header = render_header(&m, reserved).unwrap();
            assert_eq!(header.len() as u64, reserved, "extra = {extra}");
            assert_eq!(header.last(), Some(&b'\n'));
            let parsed: serde_json::Value = serde_json::from_slice(&header).unwrap();
            assert_eq!(parsed["export_id"], "export-1");
        }
    }

    #[test]
    fn test_padding_field_used_for_large_gaps() {
        let m = manifest();
        let natural = m.to_json_bytes().unwrap().len() as u64;
        let header = render_header(&m, natural + 1 + 100).unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&header).unwrap();
        assert_eq!(parsed["padding"].as_str().unwrap().len(), 100 - 13);
    }

    #[test]
    fn test_overflow_is_an_error() {
        let m = manifest();
        let natural = m.to_json_bytes().unwrap().len() as u64;
        match render_header(&m, natural) {
            Err(ExportError::File(FileError::HeaderOverflow { reserved, required })) => {
                assert_eq!(reserved, natural);
                assert_eq!(required, natural + 1);
            }
            other => panic!("expected overflow, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_file_layout() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.jsonl.tmp");
        let reserved = 4096;

        let mut file = ExportFile::create(&path, reserved).await.unwrap();
        file.write_all(b"{\"type\":\"node\",\"id\":1}\n").await.unwrap();
        file.write_all(b"{\"type\":\"node\",\"id\":2}\n").await.unwrap();
        let data_bytes = file.data_bytes();
        let size = file.finalize(&manifest()).await.unwrap();

        let content = std::fs::read(&path).unwrap();
        assert_eq!(content.len() as u64, size);
        assert_eq!(size, reserved + data_bytes);

        let text = String::from_utf8(content).unwrap();
        let header_end = text.find('\n').unwrap();
        assert_eq!(header_end as u64 + 1, reserved);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        for line in lines {
            serde_json::from_str::<serde_json::Value>(line).unwrap();
        }
    }
}
