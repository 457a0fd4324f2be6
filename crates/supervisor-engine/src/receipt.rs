//! Terminal artifact writer: diff patch, diffstat, changed-files list,
//! and the summary `Receipt` itself.
//!
//! Patches over `receipt_gzip_threshold_bytes` are gzip-compressed on
//! disk (`diff.patch.gz`) so a large run doesn't bloat the run directory;
//! `ArtifactsWritten` always reflects what's actually on disk, never
//! what was merely attempted.

use std::fs::File;
use std::io::Write;
use std::path::{Path, PathBuf};

use flate2::write::GzEncoder;
use flate2::Compression;
use thiserror::Error;

use supervisor_core::types::{ArtifactsWritten, Receipt, RunId, Tier};

#[derive(Debug, Error)]
pub enum ReceiptError {
    #[error("io error at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize receipt: {0}")]
    Serde(#[source] serde_json::Error),
}

pub struct ReceiptWriter {
    run_dir: PathBuf,
    gzip_threshold_bytes: u64,
}

impl ReceiptWriter {
    pub fn new(run_dir: impl Into<PathBuf>, gzip_threshold_bytes: u64) -> Self {
        Self {
            run_dir: run_dir.into(),
            gzip_threshold_bytes,
        }
    }

    fn io_err(path: &Path, source: std::io::Error) -> ReceiptError {
        ReceiptError::Io {
            path: path.to_path_buf(),
            source,
        }
    }

    /// Write `diff.patch` (or `diff.patch.gz` above the threshold),
    /// `diffstat.txt`, and `files.txt`, returning which were written.
    pub fn write_diff_artifacts(
        &self,
        patch: &str,
        diffstat: &str,
        files: &[String],
    ) -> Result<ArtifactsWritten, ReceiptError> {
        std::fs::create_dir_all(&self.run_dir).map_err(|e| Self::io_err(&self.run_dir, e))?;

        let diff_patch = self.write_patch(patch)?;

        let diffstat_path = self.run_dir.join("diffstat.txt");
        std::fs::write(&diffstat_path, diffstat).map_err(|e| Self::io_err(&diffstat_path, e))?;

        let files_path = self.run_dir.join("files.txt");
        std::fs::write(&files_path, files.join("\n")).map_err(|e| Self::io_err(&files_path, e))?;

        Ok(ArtifactsWritten {
            diff_patch,
            diffstat: true,
            files_list: true,
            transcript: false,
        })
    }

    fn write_patch(&self, patch: &str) -> Result<bool, ReceiptError> {
        if patch.len() as u64 > self.gzip_threshold_bytes {
            let path = self.run_dir.join("diff.patch.gz");
            let file = File::create(&path).map_err(|e| Self::io_err(&path, e))?;
            let mut encoder = GzEncoder::new(file, Compression::default());
            encoder
                .write_all(patch.as_bytes())
                .map_err(|e| Self::io_err(&path, e))?;
            encoder.finish().map_err(|e| Self::io_err(&path, e))?;
        } else {
            let path = self.run_dir.join("diff.patch");
            std::fs::write(&path, patch).map_err(|e| Self::io_err(&path, e))?;
        }
        Ok(true)
    }

    pub fn write_transcript(&self, role: &str, transcript: &str) -> Result<(), ReceiptError> {
        std::fs::create_dir_all(&self.run_dir).map_err(|e| Self::io_err(&self.run_dir, e))?;
        let path = self.run_dir.join(format!("transcript-{role}.txt"));
        std::fs::write(&path, transcript).map_err(|e| Self::io_err(&path, e))
    }

    pub fn write_receipt(
        &self,
        run_id: RunId,
        base_sha: Option<String>,
        checkpoint_sha: Option<String>,
        verification_tier: Option<Tier>,
        terminal_state: &str,
        files: &[String],
        diffstat: &str,
        artifacts_written: ArtifactsWritten,
    ) -> Result<Receipt, ReceiptError> {
        let (added, removed) = parse_diffstat_totals(diffstat);
        let receipt = Receipt {
            run_id,
            base_sha,
            checkpoint_sha,
            verification_tier,
            terminal_state: terminal_state.to_string(),
            files_changed: files.len(),
            lines_added: added,
            lines_removed: removed,
            artifacts_written,
        };
        let path = self.run_dir.join("receipt.json");
        let json = serde_json::to_vec_pretty(&receipt).map_err(ReceiptError::Serde)?;
        std::fs::write(&path, json).map_err(|e| Self::io_err(&path, e))?;
        Ok(receipt)
    }
}

/// Parse the `N insertions(+), M deletions(-)` trailer line from
/// `git diff --stat`. Defensive against its absence (empty diff).
fn parse_diffstat_totals(diffstat: &str) -> (usize, usize) {
    let Some(summary_line) = diffstat.lines().last() else {
        return (0, 0);
    };
    let mut added = 0;
    let mut removed = 0;
    for part in summary_line.split(',') {
        let part = part.trim();
        if let Some(n) = part.strip_suffix("insertion(+)").or_else(|| part.strip_suffix("insertions(+)")) {
            added = n.trim().parse().unwrap_or(0);
        } else if let Some(n) = part.strip_suffix("deletion(-)").or_else(|| part.strip_suffix("deletions(-)")) {
            removed = n.trim().parse().unwrap_or(0);
        }
    }
    (added, removed)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn small_patch_written_uncompressed() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReceiptWriter::new(tmp.path(), 1024);
        let written = writer
            .write_diff_artifacts("tiny diff", "1 file changed", &["a.rs".to_string()])
            .unwrap();
        assert!(written.diff_patch);
        assert!(tmp.path().join("diff.patch").exists());
        assert!(!tmp.path().join("diff.patch.gz").exists());
    }

    #[test]
    fn large_patch_written_compressed() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReceiptWriter::new(tmp.path(), 10);
        let patch = "x".repeat(1000);
        let written = writer
            .write_diff_artifacts(&patch, "1 file changed", &["a.rs".to_string()])
            .unwrap();
        assert!(written.diff_patch);
        assert!(tmp.path().join("diff.patch.gz").exists());
        assert!(!tmp.path().join("diff.patch").exists());
    }

    #[test]
    fn parses_diffstat_totals_from_summary_line() {
        let stat = " a.rs | 4 +++-\n 1 file changed, 3 insertions(+), 1 deletion(-)\n";
        assert_eq!(parse_diffstat_totals(stat), (3, 1));
    }

    #[test]
    fn empty_diffstat_yields_zero_totals() {
        assert_eq!(parse_diffstat_totals(""), (0, 0));
    }

    #[test]
    fn write_receipt_produces_valid_json_on_disk() {
        let tmp = tempfile::tempdir().unwrap();
        let writer = ReceiptWriter::new(tmp.path(), 1024);
        let receipt = writer
            .write_receipt(
                RunId::from_string("20260731090000"),
                Some("abc123".to_string()),
                Some("def456".to_string()),
                Some(Tier::Tier1),
                "finalized",
                &["a.rs".to_string()],
                "1 file changed, 2 insertions(+), 0 deletions(-)",
                ArtifactsWritten {
                    diff_patch: true,
                    diffstat: true,
                    files_list: true,
                    transcript: false,
                },
            )
            .unwrap();
        assert_eq!(receipt.lines_added, 2);
        assert!(tmp.path().join("receipt.json").exists());
    }
}
