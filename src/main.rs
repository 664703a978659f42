//! jmeter-batch - run a directory of JMeter test plans as one batch
//!
//! ## Usage
//!
//! ```bash
//! # Run every plan under src/test/jmeter
//! jmeter-batch run
//!
//! # Pick plans and pass a proxy
//! jmeter-batch run --include 'smoke/**' --exclude 'wip/' --proxy-host proxy.local
//!
//! # Show what would run
//! jmeter-batch list
//!
//! # Write an example configuration
//! jmeter-batch config init
//! ```
//!
//! Exit status: 0 success, 1 tests failed, 2 build cannot proceed,
//! 130 interrupted.

use anyhow::{Context, Result};
use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info, warn};

use jmeter_batch::cli::{self, Args};
use jmeter_batch::config::{self, env::EnvConfig, BatchConfig};
use jmeter_batch::engine::{ArgumentBuilder, DryRunEngine};
use jmeter_batch::executor::{BatchError, BatchOrchestrator, RunSupervisor};
use jmeter_batch::models::BatchReport;
use jmeter_batch::output::{OutputFormat, ReportFormatter};
use jmeter_batch::results::SummaryStorage;
use jmeter_batch::shutdown::{listen_for_ctrl_c, InterruptListener};
use jmeter_batch::utils::{init_logger, LogLevel};

const BUILD_FAILURE: u8 = 2;

fn main() -> ExitCode {
    let args = Args::parse();
    init_logger(if args.verbose { LogLevel::Debug } else { LogLevel::Info });

    let result = match args.command {
        cli::Command::Run(run_args) => run_batch(args.config, run_args),
        cli::Command::List(list_args) => list_tests(args.config, list_args).map(|_| ExitCode::SUCCESS),
        cli::Command::Config(config_args) => manage_config(args.config, config_args).map(|_| ExitCode::SUCCESS),
    };

    match result {
        Ok(code) => code,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::from(BUILD_FAILURE)
        }
    }
}

/// File, then environment, then command line
fn effective_config(path: Option<PathBuf>, cli_overrides: impl FnOnce(&mut BatchConfig)) -> Result<BatchConfig> {
    let mut config = config::file::load(path)?;
    EnvConfig::load().apply(&mut config);
    cli_overrides(&mut config);
    config.validate().context("Invalid configuration")?;
    Ok(config)
}

fn run_batch(config_path: Option<PathBuf>, args: cli::RunArgs) -> Result<ExitCode> {
    let format: OutputFormat = args.format.parse().map_err(anyhow::Error::msg)?;
    let config = effective_config(config_path, |c| args.apply(c))?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;
    let interrupt = listen_for_ctrl_c(runtime.handle());

    let formatter = ReportFormatter::new(format);
    match runtime.block_on(execute(&config, interrupt.listener())) {
        Ok(report) => {
            if let Err(e) = SummaryStorage::new(&config.report_dir).save(&report) {
                warn!("Could not save batch summary: {:#}", e);
            }
            println!("{}", formatter.format_report(&report));
            Ok(ExitCode::SUCCESS)
        }
        Err(e) => {
            eprintln!("{}", formatter.format_error(&e));
            Ok(ExitCode::from(u8::try_from(e.exit_code()).unwrap_or(BUILD_FAILURE)))
        }
    }
}

async fn execute(config: &BatchConfig, interrupt: InterruptListener) -> Result<BatchReport, BatchError> {
    let definitions = config
        .discovery()
        .scan()
        .map_err(|e| BatchError::configuration("Test discovery failed", e))?;
    if definitions.is_empty() {
        info!("No test plans found in {}", config.src_dir.display());
    }

    std::fs::create_dir_all(&config.report_dir).map_err(|e| {
        BatchError::configuration(
            format!("Can't create report directory '{}'", config.report_dir.display()),
            e,
        )
    })?;
    let staged = config
        .preparer()
        .prepare()
        .map_err(|e| BatchError::configuration("Can't prepare engine home", e))?;

    let engine = Arc::new(DryRunEngine::new(staged.log_file()));
    let arguments = ArgumentBuilder::new(config.engine_settings(&staged));
    let supervisor = RunSupervisor::new(engine, arguments, staged.log_file())
        .with_log_start(staged.log_start())
        .with_detector(config.detector())
        .with_interrupt(interrupt);

    let mut orchestrator = BatchOrchestrator::new(supervisor).with_shutdown(config.shutdown_client());
    orchestrator.run(&definitions).await
}

fn list_tests(config_path: Option<PathBuf>, args: cli::ListArgs) -> Result<()> {
    let config = effective_config(config_path, |c| args.discovery.apply(c))?;
    let definitions = config.discovery().scan()?;

    println!("\nTest plans in {} ({} total)\n", config.src_dir.display(), definitions.len());
    for (i, definition) in definitions.iter().enumerate() {
        println!("  {:3}. {}", i + 1, definition);
    }
    println!();
    Ok(())
}

fn manage_config(config_path: Option<PathBuf>, args: cli::ConfigArgs) -> Result<()> {
    match args.action {
        cli::ConfigAction::Init { path } => {
            if path.exists() {
                anyhow::bail!("Configuration file already exists: {}", path.display());
            }
            BatchConfig::example().save(&path)?;
            println!("✓ Configuration file created: {}", path.display());
        }

        cli::ConfigAction::Show => {
            let mut config = effective_config(config_path, |_| {})?;
            if let Some(password) = config.proxy.as_mut().and_then(|p| p.password.as_mut()) {
                *password = "****".to_string();
            }
            println!("{}", serde_yaml::to_string(&config)?);
            if !EnvConfig::load().has_any() {
                config::env::print_env_help();
            }
        }
    }

    Ok(())
}
