//! Completion detection by polling the engine log

use std::time::{Duration, Instant};
use tokio::time::sleep;
use tracing::{debug, info};

use super::{LogError, LogReader};
use crate::shutdown::InterruptListener;

/// Line fragment the engine writes when a test run is over
pub const TEST_ENDED_SENTINEL: &str = "Test has ended";

/// Delay between two reads of the log
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

/// How a wait for the sentinel ended
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Detection {
    /// The sentinel line was observed
    Ended,
    /// The poll sleep was interrupted from outside
    Interrupted,
    /// The optional bounded wait elapsed
    TimedOut,
}

/// Polls a [`LogReader`] until the completion sentinel shows up
#[derive(Clone, Debug)]
pub struct CompletionDetector {
    sentinel: String,
    poll_interval: Duration,
    timeout: Option<Duration>,
}

impl Default for CompletionDetector {
    fn default() -> Self {
        Self {
            sentinel: TEST_ENDED_SENTINEL.to_string(),
            poll_interval: DEFAULT_POLL_INTERVAL,
            timeout: None,
        }
    }
}

impl CompletionDetector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll_interval = interval;
        self
    }

    /// Give up after `timeout` instead of waiting forever
    pub fn with_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn sentinel(&self) -> &str {
        &self.sentinel
    }

    pub fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    /// Consume all newly available lines and report whether any of them
    /// carries the sentinel.
    ///
    /// An unterminated last line counts as well, since the engine may never
    /// finish it. A match there is discarded so it can't be seen twice.
    pub fn check(&self, log: &mut LogReader) -> Result<bool, LogError> {
        let lines = log.read_new_lines()?;
        if lines.iter().any(|line| line.contains(&self.sentinel)) {
            return Ok(true);
        }

        if log.pending().is_some_and(|line| line.contains(&self.sentinel)) {
            log.discard_pending();
            return Ok(true);
        }
        Ok(false)
    }

    /// Poll until the sentinel is seen, the listener is interrupted or the
    /// optional timeout elapses.
    ///
    /// Without a timeout this waits for as long as it takes.
    pub async fn wait(
        &self,
        log: &mut LogReader,
        interrupt: &mut InterruptListener,
    ) -> Result<Detection, LogError> {
        let started = Instant::now();

        loop {
            if self.check(log)? {
                info!("Observed end of test in '{}'", log.path().display());
                return Ok(Detection::Ended);
            }

            if let Some(timeout) = self.timeout {
                if started.elapsed() >= timeout {
                    return Ok(Detection::TimedOut);
                }
            }

            tokio::select! {
                _ = sleep(self.poll_interval) => {}
                _ = interrupt.interrupted() => {
                    debug!("Log polling interrupted");
                    return Ok(Detection::Interrupted);
                }
            }
        }
    }
}
