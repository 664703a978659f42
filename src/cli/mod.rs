//! CLI argument parsing
//!
//! Defines command-line interface using clap.

use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;

use crate::config::BatchConfig;
use crate::engine::{ProxySettings, DEFAULT_PROXY_PORT};

/// Run a directory of JMeter test plans as one batch
#[derive(Parser, Debug)]
#[command(name = "jmeter-batch")]
#[command(version)]
#[command(about = "Run JMeter test plans one after another and fail on errors")]
#[command(long_about = None)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Configuration file (defaults to the first one found in the standard locations)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Run every discovered test plan
    Run(RunArgs),

    /// List the test plans a run would execute, in order
    List(ListArgs),

    /// Manage the configuration file
    Config(ConfigArgs),
}

/// Test plan selection shared by `run` and `list`
#[derive(ClapArgs, Debug, Default)]
pub struct DiscoveryArgs {
    /// Directory searched for test plans
    #[arg(long)]
    pub src_dir: Option<PathBuf>,

    /// Single include pattern, overrides --include
    #[arg(long)]
    pub include_files: Option<String>,

    /// Include pattern (repeatable)
    #[arg(long = "include")]
    pub includes: Vec<String>,

    /// Exclude pattern (repeatable)
    #[arg(long = "exclude")]
    pub excludes: Vec<String>,
}

impl DiscoveryArgs {
    pub fn apply(&self, config: &mut BatchConfig) {
        if let Some(dir) = &self.src_dir {
            config.src_dir = dir.clone();
        }
        if let Some(pattern) = &self.include_files {
            config.include_files = Some(pattern.clone());
        }
        if !self.includes.is_empty() {
            config.includes = self.includes.clone();
        }
        if !self.excludes.is_empty() {
            config.excludes = self.excludes.clone();
        }
    }
}

/// Arguments for run command
#[derive(Parser, Debug)]
pub struct RunArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,

    /// Directory for result files
    #[arg(long)]
    pub report_dir: Option<PathBuf>,

    /// Run on the configured remote servers
    #[arg(long)]
    pub remote: bool,

    /// Engine log level
    #[arg(long)]
    pub log_level: Option<String>,

    /// HTTP proxy host
    #[arg(long)]
    pub proxy_host: Option<String>,

    /// HTTP proxy port
    #[arg(long)]
    pub proxy_port: Option<u16>,

    /// HTTP proxy user
    #[arg(long)]
    pub proxy_username: Option<String>,

    /// HTTP proxy password
    #[arg(long)]
    pub proxy_password: Option<String>,

    /// Give up on a run after this many seconds
    #[arg(long)]
    pub timeout: Option<u64>,

    /// Output format (table, json, json-pretty, summary)
    #[arg(short, long, default_value = "table")]
    pub format: String,
}

impl RunArgs {
    /// Apply command line overrides
    pub fn apply(&self, config: &mut BatchConfig) {
        self.discovery.apply(config);
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if self.remote {
            config.remote = true;
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(timeout) = self.timeout {
            config.run_timeout_secs = Some(timeout);
        }

        if self.proxy_host.is_some()
            || self.proxy_port.is_some()
            || self.proxy_username.is_some()
            || self.proxy_password.is_some()
        {
            let proxy = config.proxy.get_or_insert_with(|| ProxySettings {
                port: DEFAULT_PROXY_PORT,
                ..ProxySettings::default()
            });
            if let Some(host) = &self.proxy_host {
                proxy.host = Some(host.clone());
            }
            if let Some(port) = self.proxy_port {
                proxy.port = port;
            }
            if let Some(username) = &self.proxy_username {
                proxy.username = Some(username.clone());
            }
            if let Some(password) = &self.proxy_password {
                proxy.password = Some(password.clone());
            }
        }
    }
}

/// Arguments for list command
#[derive(Parser, Debug)]
pub struct ListArgs {
    #[command(flatten)]
    pub discovery: DiscoveryArgs,
}

/// Arguments for config command
#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Write an example configuration file
    Init {
        /// Destination
        #[arg(default_value = "jmeter-batch.yaml")]
        path: PathBuf,
    },

    /// Print the effective configuration
    Show,
}
