//! Batch summary storage
//!
//! Each successful batch leaves a JSON summary next to the result files.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::{BufReader, BufWriter};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::models::BatchReport;

const SUMMARY_PREFIX: &str = "batch-summary-";

/// Stored batch summary
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct StoredBatch {
    /// Unique batch ID, derived from the start time
    pub id: String,

    #[serde(flatten)]
    pub report: BatchReport,

    /// Environment info
    pub environment: EnvironmentInfo,
}

/// Environment information
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct EnvironmentInfo {
    /// Operating system
    pub os: String,

    /// Architecture
    pub arch: String,

    /// Tool version
    pub tool_version: String,
}

impl Default for EnvironmentInfo {
    fn default() -> Self {
        Self {
            os: std::env::consts::OS.to_string(),
            arch: std::env::consts::ARCH.to_string(),
            tool_version: env!("CARGO_PKG_VERSION").to_string(),
        }
    }
}

impl StoredBatch {
    pub fn new(report: BatchReport) -> Self {
        Self {
            id: report.started_at.format("%Y%m%d_%H%M%S%3f").to_string(),
            report,
            environment: EnvironmentInfo::default(),
        }
    }
}

/// Batch summary storage in the report directory
pub struct SummaryStorage {
    /// Base directory for summaries
    base_dir: PathBuf,
}

impl SummaryStorage {
    /// Create a new summary storage
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    pub fn base_dir(&self) -> &Path {
        &self.base_dir
    }

    /// Get path for a specific batch
    fn summary_path(&self, id: &str) -> PathBuf {
        self.base_dir.join(format!("{SUMMARY_PREFIX}{id}.json"))
    }

    /// Save a batch summary
    pub fn save(&self, report: &BatchReport) -> Result<PathBuf> {
        fs::create_dir_all(&self.base_dir)
            .with_context(|| format!("Failed to create directory: {}", self.base_dir.display()))?;

        let stored = StoredBatch::new(report.clone());
        let path = self.summary_path(&stored.id);
        let file = File::create(&path).context("Failed to create summary file")?;
        let writer = BufWriter::new(file);

        serde_json::to_writer_pretty(writer, &stored).context("Failed to write summary")?;

        info!("Saved batch summary to {}", path.display());
        Ok(path)
    }

    /// Load from a specific path
    pub fn load_from_path(&self, path: &Path) -> Result<StoredBatch> {
        let file = File::open(path).context("Failed to open summary file")?;
        let reader = BufReader::new(file);
        serde_json::from_reader(reader).context("Failed to parse summary")
    }

    /// All stored summaries, newest first
    pub fn load_all(&self) -> Result<Vec<StoredBatch>> {
        if !self.base_dir.exists() {
            return Ok(Vec::new());
        }

        let mut batches = Vec::new();
        for entry in fs::read_dir(&self.base_dir)? {
            let path = entry?.path();
            let is_summary = path
                .file_name()
                .and_then(|n| n.to_str())
                .map(|n| n.starts_with(SUMMARY_PREFIX) && n.ends_with(".json"))
                .unwrap_or(false);
            if !is_summary {
                continue;
            }

            match self.load_from_path(&path) {
                Ok(batch) => batches.push(batch),
                Err(e) => {
                    debug!("Failed to load {}: {}", path.display(), e);
                }
            }
        }

        batches.sort_by(|a, b| b.report.started_at.cmp(&a.report.started_at));
        Ok(batches)
    }

    /// Most recent summary
    pub fn latest(&self) -> Result<Option<StoredBatch>> {
        Ok(self.load_all()?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Completion, RunReport, TestDefinition};
    use chrono::{Duration, Utc};
    use tempfile::tempdir;

    fn report(minutes_ago: i64) -> BatchReport {
        let started_at = Utc::now() - Duration::minutes(minutes_ago);
        BatchReport {
            started_at,
            completed_at: started_at + Duration::seconds(5),
            log_file: PathBuf::from("/work/jmeter.log"),
            runs: vec![RunReport {
                definition: TestDefinition::new("/plans", "a.jmx"),
                report_file: PathBuf::from("/reports/a-240101.xml"),
                completion: Completion::NormalExit,
                duration_ms: 5000,
            }],
        }
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let storage = SummaryStorage::new(dir.path().join("reports"));

        let path = storage.save(&report(0)).unwrap();
        let name = path.file_name().unwrap().to_str().unwrap();
        assert!(name.starts_with("batch-summary-"));
        assert!(name.ends_with(".json"));

        let loaded = storage.load_from_path(&path).unwrap();
        assert_eq!(loaded.report.total(), 1);
        assert_eq!(loaded.environment.tool_version, env!("CARGO_PKG_VERSION"));
    }

    #[test]
    fn test_latest_ignores_other_files() {
        let dir = tempdir().unwrap();
        let storage = SummaryStorage::new(dir.path());
        std::fs::write(dir.path().join("a-240101.xml"), "<testResults/>").unwrap();

        storage.save(&report(10)).unwrap();
        let newest = storage.save(&report(1)).unwrap();

        assert_eq!(storage.load_all().unwrap().len(), 2);
        let latest = storage.latest().unwrap().unwrap();
        assert_eq!(storage.summary_path(&latest.id), newest);
    }

    #[test]
    fn test_empty_dir() {
        let dir = tempdir().unwrap();
        let storage = SummaryStorage::new(dir.path().join("missing"));
        assert!(storage.latest().unwrap().is_none());
    }
}
