//! Output formatters for batch reports
//!
//! Provides JSON, Table, and summary output formats.

use std::error::Error;
use std::str::FromStr;

use crate::executor::BatchError;
use crate::models::{BatchReport, RunReport};

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
    Summary,
}

impl FromStr for OutputFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "table" => Ok(OutputFormat::Table),
            "json" => Ok(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Ok(OutputFormat::JsonPretty),
            "summary" => Ok(OutputFormat::Summary),
            other => Err(format!("Unknown output format: {other}")),
        }
    }
}

/// Batch report formatter
pub struct ReportFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ReportFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    /// Format a finished batch
    pub fn format_report(&self, report: &BatchReport) -> String {
        match self.format {
            OutputFormat::Table => self.format_table(report),
            OutputFormat::Json => serde_json::to_string(report).unwrap_or_default(),
            OutputFormat::JsonPretty => serde_json::to_string_pretty(report).unwrap_or_default(),
            OutputFormat::Summary => self.format_brief(report),
        }
    }

    fn format_run(&self, run: &RunReport) -> String {
        let status = if self.colorize {
            "\x1b[32m✓ PASS\x1b[0m"
        } else {
            "✓ PASS"
        };
        format!(
            "{:40} {} [{:>8}ms] {}",
            run.definition.to_string(),
            status,
            run.duration_ms,
            run.completion
        )
    }

    fn format_table(&self, report: &BatchReport) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════════════════╗\n");
        output.push_str(&format!(
            "║  JMeter batch - {:3} test(s) {:44} ║\n",
            report.total(),
            report.started_at.format("%Y-%m-%d %H:%M:%S UTC")
        ));
        output.push_str("╠══════════════════════════════════════════════════════════════════════════╣\n");

        for run in &report.runs {
            output.push_str(&format!("║  {}\n", self.format_run(run)));
            output.push_str(&format!("║      -> {}\n", run.report_file.display()));
        }

        output.push_str("╠══════════════════════════════════════════════════════════════════════════╣\n");
        output.push_str(&format!(
            "║  Total: {} | Duration: {}ms\n",
            report.total(),
            report.duration_ms()
        ));
        output.push_str(&format!("║  Log: {}\n", report.log_file.display()));
        output.push_str("╚══════════════════════════════════════════════════════════════════════════╝\n");

        output
    }

    fn format_brief(&self, report: &BatchReport) -> String {
        format!(
            "{} test(s) passed in {}ms",
            report.total(),
            report.duration_ms()
        )
    }

    /// Format a failed batch
    pub fn format_error(&self, error: &BatchError) -> String {
        let label = match (error.is_build_failure(), self.colorize) {
            (true, true) => "\x1b[31mBUILD ERROR\x1b[0m",
            (true, false) => "BUILD ERROR",
            (false, true) => "\x1b[31mTESTS FAILED\x1b[0m",
            (false, false) => "TESTS FAILED",
        };

        let mut output = format!("{label}: {error}");
        let mut source = error.source();
        while let Some(cause) = source {
            output.push_str(&format!("\n  caused by: {cause}"));
            source = cause.source();
        }
        if let BatchError::TestErrors { line_number, line, .. } = error {
            output.push_str(&format!("\n  first error at line {line_number}: {line}"));
        }
        output
    }
}
