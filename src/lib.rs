//! Batch runner for JMeter test plans
//!
//! Runs an in-process load-testing engine once per discovered test plan,
//! strictly one after another. The engine's attempts to end the process are
//! intercepted, completion is detected from its log, and the batch fails on
//! the first failed run or on any error line left in the log.

pub mod cli;
pub mod config;
pub mod discovery;
pub mod engine;
pub mod environment;
pub mod executor;
pub mod logstream;
pub mod models;
pub mod output;
pub mod results;
pub mod shutdown;
pub mod trap;
pub mod utils;

pub use executor::{BatchError, BatchOrchestrator, RunError, RunSupervisor};
pub use models::{BatchReport, RunReport, TestDefinition};
