//! Post-batch scan of the consolidated log for error lines

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use super::{LogCursor, LogError};

const ERROR_TOKEN: &str = "ERROR";

/// Whether `line` carries the `ERROR` token with whitespace on both sides
pub fn is_error_line(line: &str) -> bool {
    line.match_indices(ERROR_TOKEN).any(|(start, token)| {
        let before = line[..start].chars().next_back();
        let after = line[start + token.len()..].chars().next();
        matches!(before, Some(c) if c.is_whitespace()) && matches!(after, Some(c) if c.is_whitespace())
    })
}

/// Outcome of an error scan
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScanVerdict {
    /// No error line anywhere in the log
    Clean,
    /// First error line found
    ErrorsFound { line_number: usize, line: String },
}

impl ScanVerdict {
    pub fn is_clean(&self) -> bool {
        matches!(self, ScanVerdict::Clean)
    }
}

/// Scans the engine log for error lines
#[derive(Clone, Debug)]
pub struct ErrorAggregator {
    log_file: PathBuf,
    start: LogCursor,
}

impl ErrorAggregator {
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
            start: LogCursor::default(),
        }
    }

    /// Ignore lines that begin before `start`, such as those kept from an
    /// earlier batch
    pub fn starting_at(mut self, start: LogCursor) -> Self {
        self.start = start;
        self
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Read the log to its end and stop at the first error line.
    ///
    /// Line numbers count from the top of the file. If the file is now
    /// shorter than the start offset it is judged from the beginning.
    pub fn scan(&self) -> Result<ScanVerdict, LogError> {
        let file = File::open(&self.log_file).map_err(|source| LogError::Open {
            path: self.log_file.clone(),
            source,
        })?;
        let len = file
            .metadata()
            .map_err(|source| LogError::Read {
                path: self.log_file.clone(),
                source,
            })?
            .len();
        let start = if len < self.start.offset() { 0 } else { self.start.offset() };

        let mut reader = BufReader::new(file);
        let mut buf = Vec::new();
        let mut line_number = 0;
        let mut offset = 0u64;

        loop {
            buf.clear();
            let n = reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| LogError::Read {
                    path: self.log_file.clone(),
                    source,
                })?;
            if n == 0 {
                break;
            }
            line_number += 1;
            let line_start = offset;
            offset += n as u64;
            if line_start < start {
                continue;
            }

            let line = String::from_utf8_lossy(&buf);
            let line = line.trim_end_matches(['\n', '\r']);
            if is_error_line(line) {
                info!(
                    "Error line {} in '{}': {}",
                    line_number,
                    self.log_file.display(),
                    line
                );
                return Ok(ScanVerdict::ErrorsFound {
                    line_number,
                    line: line.to_string(),
                });
            }
        }

        debug!(
            "Scanned {} lines of '{}', no errors",
            line_number,
            self.log_file.display()
        );
        Ok(ScanVerdict::Clean)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_error_token_bounded_by_whitespace() {
        assert!(is_error_line("14:02:01 ERROR Connection refused"));
        assert!(is_error_line("2024/01/01 12:00:00\tERROR\t- jmeter.engine"));
        assert!(!is_error_line("ERROR at the start of the line"));
        assert!(!is_error_line("ends with ERROR"));
        assert!(!is_error_line("14:02:01 ERRORS are counted"));
        assert!(!is_error_line("14:02:01 NOERROR here"));
        assert!(!is_error_line("14:02:01 error lowercase"));
        assert!(is_error_line("xERROR then ERROR again"));
    }

    #[test]
    fn test_scan_clean_log() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jmeter.log");
        std::fs::write(&path, "INFO start\nINFO Test has ended\n").unwrap();

        let aggregator = ErrorAggregator::new(&path);
        assert_eq!(aggregator.scan().unwrap(), ScanVerdict::Clean);
    }

    #[test]
    fn test_scan_reports_first_error() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jmeter.log");
        std::fs::write(
            &path,
            "INFO start\n14:02:01 ERROR Connection refused\n14:02:02 ERROR again\n",
        )
        .unwrap();

        let aggregator = ErrorAggregator::new(&path);
        let verdict = aggregator.scan().unwrap();
        assert_eq!(
            verdict,
            ScanVerdict::ErrorsFound {
                line_number: 2,
                line: "14:02:01 ERROR Connection refused".to_string(),
            }
        );
        assert_eq!(aggregator.scan().unwrap(), verdict);
    }

    #[test]
    fn test_scan_skips_earlier_content() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("jmeter.log");
        let earlier = "09:00:00 ERROR from yesterday\n";
        std::fs::write(&path, earlier).unwrap();
        let start = LogCursor::at(earlier.len() as u64);

        let aggregator = ErrorAggregator::new(&path).starting_at(start);
        assert!(aggregator.scan().unwrap().is_clean());

        let mut content = earlier.to_string();
        content.push_str("INFO start\n14:02:01 ERROR Connection refused\n");
        std::fs::write(&path, content).unwrap();
        assert_eq!(
            aggregator.scan().unwrap(),
            ScanVerdict::ErrorsFound {
                line_number: 3,
                line: "14:02:01 ERROR Connection refused".to_string(),
            }
        );
    }

    #[test]
    fn test_scan_missing_log() {
        let dir = tempdir().unwrap();
        let aggregator = ErrorAggregator::new(dir.path().join("missing.log"));
        assert!(matches!(aggregator.scan(), Err(LogError::Open { .. })));
    }
}
