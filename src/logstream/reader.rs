//! Incremental reader over the shared engine log

use std::fs::File;
use std::io::{BufRead, BufReader, Seek, SeekFrom};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use super::LogError;

/// Byte position within the log stream
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct LogCursor {
    offset: u64,
}

impl LogCursor {
    pub fn at(offset: u64) -> Self {
        Self { offset }
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }
}

/// Reads lines appended to the log since the last call.
///
/// The cursor only moves forward, except when the file is found truncated,
/// in which case reading restarts at the beginning.
pub struct LogReader {
    path: PathBuf,
    reader: BufReader<File>,
    cursor: LogCursor,
    partial: Vec<u8>,
}

impl LogReader {
    /// Open the log at its beginning
    pub fn open(path: impl AsRef<Path>) -> Result<Self, LogError> {
        let path = path.as_ref().to_path_buf();
        let file = File::open(&path).map_err(|source| LogError::Open {
            path: path.clone(),
            source,
        })?;

        Ok(Self {
            path,
            reader: BufReader::new(file),
            cursor: LogCursor::default(),
            partial: Vec::new(),
        })
    }

    /// Open the log and skip everything before `cursor`
    pub fn open_at(path: impl AsRef<Path>, cursor: LogCursor) -> Result<Self, LogError> {
        let mut log = Self::open(path)?;
        log.reader
            .seek(SeekFrom::Start(cursor.offset))
            .map_err(|source| log.read_error(source))?;
        log.cursor = cursor;
        Ok(log)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn cursor(&self) -> LogCursor {
        self.cursor
    }

    /// Start over from the beginning if the file shrank below the cursor.
    ///
    /// Returns whether the cursor was reset.
    pub fn reset_if_truncated(&mut self) -> Result<bool, LogError> {
        let len = self
            .reader
            .get_ref()
            .metadata()
            .map_err(|source| self.read_error(source))?
            .len();

        if len >= self.cursor.offset {
            return Ok(false);
        }

        warn!(
            "Log file '{}' was truncated ({} < {}), reading from the start",
            self.path.display(),
            len,
            self.cursor.offset
        );
        let file = File::open(&self.path).map_err(|source| LogError::Open {
            path: self.path.clone(),
            source,
        })?;
        self.reader = BufReader::new(file);
        self.cursor = LogCursor::default();
        self.partial.clear();
        Ok(true)
    }

    /// Read every complete line appended since the last call.
    ///
    /// A trailing line without a newline is held back until the writer
    /// finishes it.
    pub fn read_new_lines(&mut self) -> Result<Vec<String>, LogError> {
        let mut lines = Vec::new();
        let mut buf = Vec::new();

        loop {
            buf.clear();
            let n = self
                .reader
                .read_until(b'\n', &mut buf)
                .map_err(|source| self.read_error(source))?;
            if n == 0 {
                break;
            }
            self.cursor.offset += n as u64;

            if buf.last() != Some(&b'\n') {
                self.partial.extend_from_slice(&buf);
                break;
            }

            let mut raw = std::mem::take(&mut self.partial);
            raw.extend_from_slice(&buf);
            lines.push(decode_line(&raw));
        }

        if !lines.is_empty() {
            debug!("Read {} new log lines", lines.len());
        }
        Ok(lines)
    }

    /// Trailing text the writer has not finished with a newline yet
    pub fn pending(&self) -> Option<String> {
        if self.partial.is_empty() {
            None
        } else {
            Some(decode_line(&self.partial))
        }
    }

    /// Forget the held-back partial line. Whatever the writer appends to it
    /// later is read as a line of its own.
    pub fn discard_pending(&mut self) {
        self.partial.clear();
    }

    fn read_error(&self, source: std::io::Error) -> LogError {
        LogError::Read {
            path: self.path.clone(),
            source,
        }
    }
}

fn decode_line(raw: &[u8]) -> String {
    let line = String::from_utf8_lossy(raw);
    line.trim_end_matches(['\n', '\r']).to_string()
}
