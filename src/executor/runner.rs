//! Supervision of a single engine run
//!
//! A run moves through `PREPARING -> RUNNING -> (TRAPPED | ENDED) -> CLEANED_UP`.
//! The exit trap is installed for exactly the duration of `RUNNING` and is
//! restored on every path out of it.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;
use tokio::sync::oneshot;
use tracing::{debug, info, warn};

use super::RunError;
use crate::engine::{self, ArgumentBuilder, Engine, EngineFault, Invocation, RunArguments};
use crate::logstream::{CompletionDetector, Detection, LogCursor, LogError, LogReader};
use crate::models::{Completion, RunReport, RunState, TestDefinition};
use crate::shutdown::{InterruptHandle, InterruptListener};
use crate::trap::{ExitSignal, ExitTrap};
use crate::utils::Timer;

enum Outcome {
    Trapped(ExitSignal),
    Detected(Result<Detection, LogError>),
    Faulted(EngineFault),
}

/// Runs one test definition at a time through the embedded engine
pub struct RunSupervisor {
    engine: Arc<dyn Engine>,
    arguments: ArgumentBuilder,
    trap: ExitTrap,
    detector: CompletionDetector,
    interrupt: InterruptListener,
    log_file: PathBuf,
    log_start: LogCursor,
    log: Option<LogReader>,
    state: RunState,
}

impl RunSupervisor {
    pub fn new(engine: Arc<dyn Engine>, arguments: ArgumentBuilder, log_file: impl Into<PathBuf>) -> Self {
        Self {
            engine,
            arguments,
            trap: ExitTrap::new(),
            detector: CompletionDetector::new(),
            interrupt: InterruptHandle::new().listener(),
            log_file: log_file.into(),
            log_start: LogCursor::default(),
            log: None,
            state: RunState::CleanedUp,
        }
    }

    pub fn with_trap(mut self, trap: ExitTrap) -> Self {
        self.trap = trap;
        self
    }

    pub fn with_detector(mut self, detector: CompletionDetector) -> Self {
        self.detector = detector;
        self
    }

    pub fn with_interrupt(mut self, interrupt: InterruptListener) -> Self {
        self.interrupt = interrupt;
        self
    }

    /// Start reading the shared log at `start` instead of its beginning
    pub fn with_log_start(mut self, start: LogCursor) -> Self {
        self.log_start = start;
        self
    }

    pub fn trap(&self) -> &ExitTrap {
        &self.trap
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    pub fn log_start(&self) -> LogCursor {
        self.log_start
    }

    pub fn state(&self) -> RunState {
        self.state
    }

    /// Position reached in the shared log, once it has been opened
    pub fn log_cursor(&self) -> Option<LogCursor> {
        self.log.as_ref().map(LogReader::cursor)
    }

    pub fn is_interrupted(&self) -> bool {
        self.interrupt.is_interrupted()
    }

    /// Execute a single test definition
    pub async fn run(&mut self, definition: &TestDefinition) -> Result<RunReport, RunError> {
        let timer = Timer::start(definition.to_string());
        enter(&mut self.state, RunState::Preparing, definition);

        let run = self.arguments.build(definition)?;
        // The log is shared by the whole batch; it is opened once and read
        // onwards from wherever the previous run stopped.
        let log = match self.log {
            Some(ref mut log) => log,
            None => self.log.insert(LogReader::open_at(&self.log_file, self.log_start)?),
        };
        log.reset_if_truncated()?;

        info!("Executing test: {}", run.test_file().display());
        log_params_and_props(&run);

        let outcome = {
            let mut guard = self.trap.install()?;
            enter(&mut self.state, RunState::Running, definition);

            let engine = Arc::clone(&self.engine);
            let exit = guard.exit_handle();
            let engine_run = run.clone();
            let (tx, mut entry_point) = oneshot::channel();
            thread::Builder::new()
                .name(format!("engine-{}", definition.stem()))
                .spawn(move || {
                    let _ = tx.send(engine::invoke(engine.as_ref(), &engine_run, exit));
                })
                .map_err(RunError::Spawn)?;

            let detection = self.detector.wait(log, &mut self.interrupt);
            tokio::pin!(detection);
            let mut entry_returned = false;

            let outcome = loop {
                tokio::select! {
                    biased;
                    signal = guard.terminated() => break Outcome::Trapped(signal),
                    invocation = &mut entry_point, if !entry_returned => {
                        entry_returned = true;
                        match invocation {
                            Ok(Invocation::Completed) => continue,
                            Ok(Invocation::Terminated(signal)) => break Outcome::Trapped(signal),
                            Ok(Invocation::Faulted(fault)) => break Outcome::Faulted(fault),
                            Err(_) => {
                                break Outcome::Faulted(EngineFault::Panic(
                                    "engine thread ended without reporting".to_string(),
                                ))
                            }
                        }
                    }
                    detected = &mut detection => break Outcome::Detected(detected),
                }
            };

            match outcome {
                Outcome::Trapped(signal) => enter(&mut self.state, RunState::Trapped(signal.code()), definition),
                Outcome::Detected(Ok(Detection::Ended)) => enter(&mut self.state, RunState::Ended, definition),
                _ => {}
            }
            outcome
        };
        enter(&mut self.state, RunState::CleanedUp, definition);

        let completion = match outcome {
            Outcome::Trapped(signal) if signal.is_normal() => {
                // Lines the engine wrote before exiting belong to this run.
                if let Some(log) = self.log.as_mut() {
                    if let Err(e) = log.read_new_lines() {
                        warn!("Could not skip past the output of {}: {}", definition, e);
                    }
                }
                Completion::NormalExit
            }
            Outcome::Trapped(signal) => return Err(RunError::ExecutionFailed(signal)),
            Outcome::Detected(Ok(Detection::Ended)) => Completion::SentinelObserved,
            Outcome::Detected(Ok(Detection::Interrupted)) => return Err(RunError::Interrupted),
            Outcome::Detected(Ok(Detection::TimedOut)) => {
                return Err(RunError::TimedOut(self.detector.timeout().unwrap_or_default()))
            }
            Outcome::Detected(Err(e)) => return Err(RunError::Log(e)),
            Outcome::Faulted(fault) => return Err(RunError::Faulted(fault)),
        };

        let duration = timer.stop();
        info!("Test {} completed ({}) in {}ms", definition, completion, duration.as_millis());

        Ok(RunReport {
            definition: definition.clone(),
            report_file: run.report_file().to_path_buf(),
            completion,
            duration_ms: duration.as_millis() as u64,
        })
    }
}

fn enter(state: &mut RunState, next: RunState, definition: &TestDefinition) {
    debug!("{}: {} -> {}", definition, state, next);
    *state = next;
}

fn log_params_and_props(run: &RunArguments) {
    debug!("Starting engine with the following parameters:");
    for arg in run.redacted() {
        debug!("{}", arg);
    }
    debug!("... and the following properties:");
    for (key, value) in run.system_properties() {
        debug!("{} = {}", key, value);
    }
}
