//! Embedded engine interface
//!
//! The engine runs in-process. It receives the run's arguments and an
//! [`ExitHandle`] in place of the ability to end the process.

mod args;
mod dry_run;

use std::io;
use std::panic::{self, AssertUnwindSafe};
use thiserror::Error;
use tracing::debug;

use crate::trap::{ExitHandle, ExitSignal};

pub use args::{
    ArgumentBuilder, ArgumentError, EngineSettings, ProxySettings, ReportNamer, RunArguments,
    DEFAULT_PROXY_PORT,
};
pub use dry_run::DryRunEngine;

/// Errors an engine may report from its entry point
#[derive(Error, Debug)]
pub enum EngineError {
    #[error("Engine failed to start: {0}")]
    Start(String),

    #[error("Engine I/O error: {0}")]
    Io(#[from] io::Error),
}

/// A fault raised by the engine that is not a termination request
#[derive(Error, Debug)]
pub enum EngineFault {
    #[error(transparent)]
    Error(#[from] EngineError),

    #[error("Engine panicked: {0}")]
    Panic(String),
}

/// A load-testing engine driven through a command line.
///
/// `start` may return as soon as the test is launched; completion is then
/// reported through the log and, usually, a call on `exit`.
pub trait Engine: Send + Sync + 'static {
    fn start(&self, run: &RunArguments, exit: ExitHandle) -> Result<(), EngineError>;
}

/// Outcome of calling the engine's entry point
#[derive(Debug)]
pub enum Invocation {
    /// The entry point returned normally
    Completed,
    /// The entry point ended by requesting process termination
    Terminated(ExitSignal),
    /// The entry point failed for another reason
    Faulted(EngineFault),
}

/// Call the engine's entry point and classify how it returned
pub fn invoke(engine: &dyn Engine, run: &RunArguments, exit: ExitHandle) -> Invocation {
    match panic::catch_unwind(AssertUnwindSafe(|| engine.start(run, exit))) {
        Ok(Ok(())) => {
            debug!("Engine entry point returned");
            Invocation::Completed
        }
        Ok(Err(e)) => Invocation::Faulted(EngineFault::Error(e)),
        Err(payload) => match payload.downcast::<ExitSignal>() {
            Ok(signal) => Invocation::Terminated(*signal),
            Err(payload) => Invocation::Faulted(EngineFault::Panic(panic_message(payload.as_ref()))),
        },
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}
