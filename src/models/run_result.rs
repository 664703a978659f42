//! Run and batch result models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

use super::TestDefinition;

/// Lifecycle of a single supervised run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RunState {
    Preparing,
    Running,
    Trapped(i32),
    Ended,
    CleanedUp,
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RunState::Preparing => write!(f, "PREPARING"),
            RunState::Running => write!(f, "RUNNING"),
            RunState::Trapped(code) => write!(f, "TRAPPED({code})"),
            RunState::Ended => write!(f, "ENDED"),
            RunState::CleanedUp => write!(f, "CLEANED_UP"),
        }
    }
}

/// How a successful run finished
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Completion {
    /// The engine asked to exit with status 0
    NormalExit,
    /// The end-of-test line showed up in the log
    SentinelObserved,
}

impl fmt::Display for Completion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Completion::NormalExit => write!(f, "exit(0)"),
            Completion::SentinelObserved => write!(f, "test ended"),
        }
    }
}

/// Result of one successful run
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RunReport {
    pub definition: TestDefinition,
    pub report_file: PathBuf,
    pub completion: Completion,
    pub duration_ms: u64,
}

impl fmt::Display for RunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "✓ {} ({}) [{}ms] -> {}",
            self.definition,
            self.completion,
            self.duration_ms,
            self.report_file.display()
        )
    }
}

/// Aggregate result of a batch that passed
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BatchReport {
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
    pub log_file: PathBuf,
    pub runs: Vec<RunReport>,
}

impl BatchReport {
    pub fn total(&self) -> usize {
        self.runs.len()
    }

    pub fn duration_ms(&self) -> u64 {
        self.runs.iter().map(|r| r.duration_ms).sum()
    }
}

impl fmt::Display for BatchReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "JMeter batch - {} test(s)", self.total())?;
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        for run in &self.runs {
            writeln!(f, "  {run}")?;
        }
        writeln!(f, "━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━")?;
        writeln!(
            f,
            "Total: {} | Duration: {}ms | Log: {}",
            self.total(),
            self.duration_ms(),
            self.log_file.display()
        )
    }
}
