//! Batch orchestration
//!
//! Runs test definitions strictly one after another, forces the engine's
//! listeners closed after each run and judges the batch from the consolidated
//! log once every run has passed.

use chrono::Utc;
use tracing::{error, info, warn};

use super::{BatchError, RunSupervisor};
use crate::logstream::{ErrorAggregator, ScanVerdict};
use crate::models::{BatchReport, TestDefinition};
use crate::shutdown::{ListenerShutdown, UdpShutdownClient};

/// Drives a list of test definitions through a [`RunSupervisor`]
pub struct BatchOrchestrator<S: ListenerShutdown = UdpShutdownClient> {
    supervisor: RunSupervisor,
    shutdown: S,
    aggregator: ErrorAggregator,
}

impl BatchOrchestrator<UdpShutdownClient> {
    pub fn new(supervisor: RunSupervisor) -> Self {
        let aggregator = ErrorAggregator::new(supervisor.log_file()).starting_at(supervisor.log_start());
        Self {
            supervisor,
            shutdown: UdpShutdownClient::default(),
            aggregator,
        }
    }
}

impl<S: ListenerShutdown> BatchOrchestrator<S> {
    /// Use a different listener shutdown client
    pub fn with_shutdown<T: ListenerShutdown>(self, shutdown: T) -> BatchOrchestrator<T> {
        BatchOrchestrator {
            supervisor: self.supervisor,
            shutdown,
            aggregator: self.aggregator,
        }
    }

    pub fn supervisor(&self) -> &RunSupervisor {
        &self.supervisor
    }

    /// Execute every definition in order, stopping at the first failure
    pub async fn run(&mut self, definitions: &[TestDefinition]) -> Result<BatchReport, BatchError> {
        let started_at = Utc::now();
        info!("Executing {} test(s)", definitions.len());

        let mut runs = Vec::with_capacity(definitions.len());
        for definition in definitions {
            if self.supervisor.is_interrupted() {
                return Err(BatchError::Interrupted {
                    definition: definition.to_string(),
                });
            }

            let result = self.supervisor.run(definition).await;

            if let Err(e) = self.shutdown.shutdown().await {
                warn!("Failed to shut down engine listeners after {}: {}", definition, e);
            }

            match result {
                Ok(report) => runs.push(report),
                Err(e) => {
                    error!("{}: {}", definition, e);
                    return Err(BatchError::from_run(definition, e));
                }
            }
        }
        info!("Completed Test: {} test(s)", runs.len());

        self.check_for_errors()?;

        Ok(BatchReport {
            started_at,
            completed_at: Utc::now(),
            log_file: self.aggregator.log_file().to_path_buf(),
            runs,
        })
    }

    fn check_for_errors(&self) -> Result<(), BatchError> {
        let verdict = self.aggregator.scan().map_err(|e| {
            BatchError::configuration(
                format!("Can't read log file '{}'", self.aggregator.log_file().display()),
                e,
            )
        })?;

        match verdict {
            ScanVerdict::Clean => Ok(()),
            ScanVerdict::ErrorsFound { line_number, line } => Err(BatchError::TestErrors {
                log_file: self.aggregator.log_file().to_path_buf(),
                line_number,
                line,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::{ArgumentBuilder, Engine, EngineError, EngineSettings, RunArguments};
    use crate::executor::RunError;
    use crate::logstream::CompletionDetector;
    use crate::trap::{serial, ExitHandle};
    use std::fs::OpenOptions;
    use std::io::{self, Write};
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use tempfile::{tempdir, TempDir};

    type Script = dyn Fn(&str, &Path, ExitHandle) -> Result<(), EngineError> + Send + Sync;

    /// Engine whose behaviour depends on the name of the test file
    struct ScriptedEngine {
        log_file: PathBuf,
        script: Box<Script>,
        starts: AtomicUsize,
    }

    impl Engine for ScriptedEngine {
        fn start(&self, run: &RunArguments, exit: ExitHandle) -> Result<(), EngineError> {
            self.starts.fetch_add(1, Ordering::SeqCst);
            let name = run
                .test_file()
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            (self.script)(&name, &self.log_file, exit)
        }
    }

    #[derive(Default)]
    struct RecordingShutdown {
        calls: Arc<AtomicUsize>,
    }

    impl ListenerShutdown for RecordingShutdown {
        async fn shutdown(&self) -> io::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn append(path: &Path, line: &str) {
        let mut file = OpenOptions::new().create(true).append(true).open(path).unwrap();
        writeln!(file, "{line}").unwrap();
    }

    fn ended(log: &Path) -> Result<(), EngineError> {
        append(log, "2024/01/01 12:00:00 INFO  - jmeter.JMeter: Test has ended on host *local*");
        Ok(())
    }

    struct Batch {
        _dir: TempDir,
        definitions: Vec<TestDefinition>,
        orchestrator: BatchOrchestrator<RecordingShutdown>,
        engine: Arc<ScriptedEngine>,
        shutdowns: Arc<AtomicUsize>,
        log_file: PathBuf,
    }

    fn batch(
        names: &[&str],
        script: impl Fn(&str, &Path, ExitHandle) -> Result<(), EngineError> + Send + Sync + 'static,
    ) -> Batch {
        let dir = tempdir().unwrap();
        let log_file = dir.path().join("jmeter.log");
        std::fs::write(&log_file, "").unwrap();
        let definitions = names
            .iter()
            .map(|name| {
                std::fs::write(dir.path().join(name), "").unwrap();
                TestDefinition::new(dir.path(), *name)
            })
            .collect();

        let engine = Arc::new(ScriptedEngine {
            log_file: log_file.clone(),
            script: Box::new(script),
            starts: AtomicUsize::new(0),
        });
        let settings = EngineSettings::new(dir.path().join("reports"), "/p", dir.path());
        let supervisor = RunSupervisor::new(engine.clone(), ArgumentBuilder::new(settings), &log_file)
            .with_detector(CompletionDetector::new().with_poll_interval(Duration::from_millis(10)));

        let shutdown = RecordingShutdown::default();
        let shutdowns = shutdown.calls.clone();
        let orchestrator = BatchOrchestrator::new(supervisor).with_shutdown(shutdown);

        Batch {
            _dir: dir,
            definitions,
            orchestrator,
            engine,
            shutdowns,
            log_file,
        }
    }

    #[tokio::test]
    async fn test_all_runs_end_cleanly() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx", "b.jmx"], |_name, log, _exit| ended(log));

        let report = batch.orchestrator.run(&batch.definitions).await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(batch.engine.starts.load(Ordering::SeqCst), 2);
        assert_eq!(batch.shutdowns.load(Ordering::SeqCst), 2);
        let trap = batch.orchestrator.supervisor().trap();
        assert_eq!(trap.installs(), 2);
        assert_eq!(trap.restores(), 2);
        assert!(!trap.is_installed());
    }

    #[tokio::test]
    async fn test_nonzero_exit_aborts_batch() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx", "b.jmx", "c.jmx"], |name, log, exit| match name {
            "b.jmx" => exit.terminate(2),
            _ => ended(log),
        });

        let err = batch.orchestrator.run(&batch.definitions).await.unwrap_err();

        match &err {
            BatchError::Execution { definition, source } => {
                assert_eq!(definition, "b.jmx");
                assert!(matches!(source, RunError::ExecutionFailed(s) if s.code() == 2));
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(err.exit_code(), 1);
        assert_eq!(batch.engine.starts.load(Ordering::SeqCst), 2);
        assert_eq!(batch.shutdowns.load(Ordering::SeqCst), 2);
        assert!(!batch.orchestrator.supervisor().trap().is_installed());
    }

    #[tokio::test]
    async fn test_sentinel_then_exit_zero() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx"], |_name, log, exit| {
            ended(log)?;
            exit.terminate(0)
        });

        let report = batch.orchestrator.run(&batch.definitions).await.unwrap();

        assert_eq!(report.total(), 1);
        assert_eq!(report.log_file, batch.log_file);
    }

    #[tokio::test]
    async fn test_execution_failure_skips_error_scan() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx"], |_name, log, exit| {
            append(log, "14:02:01 ERROR Connection refused");
            exit.terminate(2)
        });

        let err = batch.orchestrator.run(&batch.definitions).await.unwrap_err();

        assert!(matches!(err, BatchError::Execution { .. }));
    }

    #[tokio::test]
    async fn test_error_line_fails_batch() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx", "b.jmx"], |name, log, exit| {
            if name == "b.jmx" {
                append(log, "14:02:01 ERROR Connection refused");
            }
            ended(log)?;
            exit.terminate(0)
        });

        let err = batch.orchestrator.run(&batch.definitions).await.unwrap_err();

        match err {
            BatchError::TestErrors {
                log_file,
                line_number,
                line,
            } => {
                assert_eq!(log_file, batch.log_file);
                assert_eq!(line_number, 2);
                assert_eq!(line, "14:02:01 ERROR Connection refused");
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(batch.engine.starts.load(Ordering::SeqCst), 2);
        assert_eq!(batch.shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_error_without_whitespace_is_not_counted() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx"], |_name, log, _exit| {
            append(log, "INFO SUMMARY ERRORS=0");
            ended(log)
        });

        assert!(batch.orchestrator.run(&batch.definitions).await.is_ok());
    }

    #[tokio::test]
    async fn test_zero_exit_without_sentinel() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx", "b.jmx"], |_name, _log, exit| exit.terminate(0));

        let report = batch.orchestrator.run(&batch.definitions).await.unwrap();

        assert_eq!(report.total(), 2);
        assert_eq!(batch.shutdowns.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_empty_batch() {
        let _serial = serial();
        let mut batch = batch(&[], |_name, log, _exit| ended(log));

        let report = batch.orchestrator.run(&batch.definitions).await.unwrap();

        assert_eq!(report.total(), 0);
        assert_eq!(batch.shutdowns.load(Ordering::SeqCst), 0);
        assert_eq!(batch.orchestrator.supervisor().trap().installs(), 0);
    }

    #[tokio::test]
    async fn test_missing_log_is_build_failure() {
        let _serial = serial();
        let mut batch = batch(&["a.jmx"], |_name, log, _exit| ended(log));
        std::fs::remove_file(&batch.log_file).unwrap();

        let err = batch.orchestrator.run(&batch.definitions).await.unwrap_err();

        assert!(err.is_build_failure());
        assert_eq!(err.exit_code(), 2);
        assert_eq!(batch.engine.starts.load(Ordering::SeqCst), 0);
    }
}
