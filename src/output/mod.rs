//! Output formatting module
//!
//! Renders batch reports and failures for the console.

mod formatter;

pub use formatter::{OutputFormat, ReportFormatter};
