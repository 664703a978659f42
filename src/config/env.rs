//! Environment variable configuration
//!
//! `JMETER_BATCH_*` variables override values from the configuration file.

use std::env;
use std::path::PathBuf;
use tracing::warn;

use super::BatchConfig;
use crate::engine::{ProxySettings, DEFAULT_PROXY_PORT};

/// Environment variable prefix
const ENV_PREFIX: &str = "JMETER_BATCH";

/// Overrides read from the environment
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct EnvConfig {
    pub src_dir: Option<PathBuf>,
    pub report_dir: Option<PathBuf>,
    pub work_dir: Option<PathBuf>,
    pub include_files: Option<String>,
    pub log_level: Option<String>,
    pub remote: Option<bool>,
    pub proxy_host: Option<String>,
    pub proxy_port: Option<u16>,
    pub proxy_username: Option<String>,
    pub proxy_password: Option<String>,
    pub poll_interval_ms: Option<u64>,
    pub run_timeout_secs: Option<u64>,
}

impl EnvConfig {
    /// Load configuration from environment variables
    pub fn load() -> Self {
        Self {
            src_dir: get_env("SRC_DIR").map(PathBuf::from),
            report_dir: get_env("REPORT_DIR").map(PathBuf::from),
            work_dir: get_env("WORK_DIR").map(PathBuf::from),
            include_files: get_env("INCLUDE_FILES"),
            log_level: get_env("LOG_LEVEL"),
            remote: get_env_bool("REMOTE"),
            proxy_host: get_env("PROXY_HOST"),
            proxy_port: get_env_parse("PROXY_PORT"),
            proxy_username: get_env("PROXY_USERNAME"),
            proxy_password: get_env("PROXY_PASSWORD"),
            poll_interval_ms: get_env_parse("POLL_INTERVAL_MS"),
            run_timeout_secs: get_env_parse("RUN_TIMEOUT_SECS"),
        }
    }

    /// Check if any environment variables are set
    pub fn has_any(&self) -> bool {
        *self != Self::default()
    }

    /// Apply the overrides that are set
    pub fn apply(&self, config: &mut BatchConfig) {
        if let Some(dir) = &self.src_dir {
            config.src_dir = dir.clone();
        }
        if let Some(dir) = &self.report_dir {
            config.report_dir = dir.clone();
        }
        if let Some(dir) = &self.work_dir {
            config.work_dir = dir.clone();
        }
        if let Some(pattern) = &self.include_files {
            config.include_files = Some(pattern.clone());
        }
        if let Some(level) = &self.log_level {
            config.log_level = level.clone();
        }
        if let Some(remote) = self.remote {
            config.remote = remote;
        }
        if let Some(interval) = self.poll_interval_ms {
            config.poll_interval_ms = interval;
        }
        if let Some(timeout) = self.run_timeout_secs {
            config.run_timeout_secs = Some(timeout);
        }

        let touches_proxy = self.proxy_host.is_some()
            || self.proxy_port.is_some()
            || self.proxy_username.is_some()
            || self.proxy_password.is_some();
        if touches_proxy {
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

/// Get environment variable with prefix
fn get_env(name: &str) -> Option<String> {
    env::var(format!("{ENV_PREFIX}_{name}")).ok()
}

/// Get environment variable and parse to type
fn get_env_parse<T: std::str::FromStr>(name: &str) -> Option<T> {
    let value = get_env(name)?;
    match value.parse() {
        Ok(parsed) => Some(parsed),
        Err(_) => {
            warn!("Ignoring {}_{}: can't parse '{}'", ENV_PREFIX, name, value);
            None
        }
    }
}

/// Get environment variable as boolean
fn get_env_bool(name: &str) -> Option<bool> {
    get_env(name).map(|v| {
        matches!(
            v.to_lowercase().as_str(),
            "1" | "true" | "yes" | "on" | "enabled"
        )
    })
}

/// Print all JMETER_BATCH environment variables
pub fn print_env_help() {
    println!("Environment Variables:");
    println!();
    println!("  {ENV_PREFIX}_SRC_DIR           Directory searched for test plans");
    println!("  {ENV_PREFIX}_REPORT_DIR        Directory for result files");
    println!("  {ENV_PREFIX}_WORK_DIR          Engine home directory");
    println!("  {ENV_PREFIX}_INCLUDE_FILES     Single include pattern");
    println!("  {ENV_PREFIX}_LOG_LEVEL         Engine log level");
    println!("  {ENV_PREFIX}_REMOTE            Run on remote servers (true/false)");
    println!("  {ENV_PREFIX}_PROXY_HOST        HTTP proxy host");
    println!("  {ENV_PREFIX}_PROXY_PORT        HTTP proxy port");
    println!("  {ENV_PREFIX}_PROXY_USERNAME    HTTP proxy user");
    println!("  {ENV_PREFIX}_PROXY_PASSWORD    HTTP proxy password");
    println!("  {ENV_PREFIX}_POLL_INTERVAL_MS  Delay between log reads");
    println!("  {ENV_PREFIX}_RUN_TIMEOUT_SECS  Give up on a run after this many seconds");
}
