//! Engine log stream handling
//!
//! The engine reports progress only through its log file. This module tails
//! that file for the completion sentinel and scans it for error lines once
//! the batch is over.

mod detector;
mod reader;
mod scan;

use std::io;
use std::path::PathBuf;
use thiserror::Error;

pub use detector::{CompletionDetector, Detection, DEFAULT_POLL_INTERVAL, TEST_ENDED_SENTINEL};
pub use reader::{LogCursor, LogReader};
pub use scan::{is_error_line, ErrorAggregator, ScanVerdict};

/// Log stream errors
#[derive(Error, Debug)]
pub enum LogError {
    #[error("Can't open log file '{}'", path.display())]
    Open {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Can't read log file '{}'", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}
