//! Engine that exercises the batch plumbing without generating load

use chrono::Local;
use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::Duration;

use super::{Engine, EngineError, RunArguments};
use crate::logstream::TEST_ENDED_SENTINEL;
use crate::trap::ExitHandle;

/// Time the simulated test takes to run
const RUN_TIME: Duration = Duration::from_millis(100);

/// Logs its arguments, then announces the end of the test and requests exit
/// code 0 from a worker thread, the way a real engine does in non-GUI mode.
#[derive(Clone, Debug)]
pub struct DryRunEngine {
    log_file: PathBuf,
}

impl DryRunEngine {
    /// `log_file` is used when the run carries no `log_file` property
    pub fn new(log_file: impl Into<PathBuf>) -> Self {
        Self {
            log_file: log_file.into(),
        }
    }
}

fn log_line(path: &Path, message: &str) -> std::io::Result<()> {
    let mut file = OpenOptions::new().create(true).append(true).open(path)?;
    writeln!(
        file,
        "{} INFO  - jmeter.batch.DryRunEngine: {}",
        Local::now().format("%Y/%m/%d %H:%M:%S"),
        message
    )
}

impl Engine for DryRunEngine {
    fn start(&self, run: &RunArguments, exit: ExitHandle) -> Result<(), EngineError> {
        let log_file = run
            .system_properties()
            .get("log_file")
            .map(PathBuf::from)
            .unwrap_or_else(|| self.log_file.clone());

        log_line(&log_file, &format!("Dry run of {}", run.test_file().display()))?;
        log_line(&log_file, &format!("Arguments: {}", run.redacted().join(" ")))?;

        // The sentinel goes out before the exit request, so a trapped exit
        // always finds it in the log.
        thread::Builder::new()
            .name("dry-run-engine".to_string())
            .spawn(move || {
                thread::sleep(RUN_TIME);
                match log_line(&log_file, &format!("{TEST_ENDED_SENTINEL} on host *local*")) {
                    Ok(()) => exit.exit(0),
                    Err(e) => {
                        tracing::error!("Dry run engine could not write its log: {}", e);
                        exit.exit(1)
                    }
                };
            })?;

        Ok(())
    }
}
