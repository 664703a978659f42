//! Data models for batch execution
//!
//! Test definitions and the results produced by runs and batches.

mod definition;
mod run_result;

pub use definition::TestDefinition;
pub use run_result::{BatchReport, Completion, RunReport, RunState};
