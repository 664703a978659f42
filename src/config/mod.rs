//! Configuration module
//!
//! Batch settings come from a YAML or JSON file, `JMETER_BATCH_*`
//! environment variables and the command line, in increasing precedence.

pub mod env;
pub mod file;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::discovery::TestDiscovery;
use crate::engine::{EngineSettings, ProxySettings};
use crate::environment::{EnvironmentPreparer, StagedEnvironment};
use crate::logstream::CompletionDetector;
use crate::shutdown::{UdpShutdownClient, DEFAULT_SHUTDOWN_PORT};

/// Batch configuration
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BatchConfig {
    /// Directory searched for test plans
    pub src_dir: PathBuf,

    /// Directory receiving the per-run result files
    pub report_dir: PathBuf,

    /// Engine home directory
    pub work_dir: PathBuf,

    /// Single include pattern, wins over `includes`
    pub include_files: Option<String>,

    pub includes: Vec<String>,

    pub excludes: Vec<String>,

    /// Existing engine properties file; a default one is staged otherwise
    pub jmeter_properties: Option<PathBuf>,

    /// Engine properties passed as `-J`
    pub user_properties: BTreeMap<String, String>,

    /// System properties passed as `-D`
    pub java_properties: BTreeMap<String, String>,

    /// Run against the configured remote servers
    pub remote: bool,

    /// Engine log level
    pub log_level: String,

    pub proxy: Option<ProxySettings>,

    /// Delay between two reads of the engine log
    pub poll_interval_ms: u64,

    /// Give up on a run after this long; unbounded when unset
    pub run_timeout_secs: Option<u64>,

    /// Port of the engine's shutdown listener
    pub shutdown_port: u16,

    /// Keep the previous engine log instead of truncating it
    pub append_log: bool,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            src_dir: PathBuf::from("src/test/jmeter"),
            report_dir: PathBuf::from("jmeter-reports"),
            work_dir: PathBuf::from("target/jmeter"),
            include_files: None,
            includes: Vec::new(),
            excludes: Vec::new(),
            jmeter_properties: None,
            user_properties: BTreeMap::new(),
            java_properties: BTreeMap::new(),
            remote: false,
            log_level: "INFO".to_string(),
            proxy: None,
            poll_interval_ms: 1000,
            run_timeout_secs: None,
            shutdown_port: DEFAULT_SHUTDOWN_PORT,
            append_log: false,
        }
    }
}

impl BatchConfig {
    /// Load configuration from file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;

        let config: Self = if is_yaml_file(path) {
            serde_yaml::from_str(&content)
                .with_context(|| format!("Failed to parse YAML config: {}", path.display()))?
        } else {
            serde_json::from_str(&content)
                .with_context(|| format!("Failed to parse JSON config: {}", path.display()))?
        };

        config.validate()?;
        Ok(config)
    }

    /// Save configuration to file
    pub fn save(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let content = if is_yaml_file(path) {
            serde_yaml::to_string(self).context("Failed to serialize config")?
        } else {
            serde_json::to_string_pretty(self).context("Failed to serialize config")?
        };

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }

        std::fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;

        Ok(())
    }

    /// Validate configuration
    pub fn validate(&self) -> Result<()> {
        if self.poll_interval_ms == 0 {
            anyhow::bail!("poll_interval_ms must be greater than 0");
        }
        if self.run_timeout_secs == Some(0) {
            anyhow::bail!("run_timeout_secs must be greater than 0 when set");
        }
        if let Some(proxy) = &self.proxy {
            if proxy.port == 0 {
                anyhow::bail!("Invalid proxy port 0");
            }
        }
        Ok(())
    }

    /// Generate example configuration
    pub fn example() -> Self {
        Self {
            excludes: vec!["**/wip/**".to_string()],
            user_properties: BTreeMap::from([
                ("threads".to_string(), "10".to_string()),
                ("rampup".to_string(), "5".to_string()),
            ]),
            run_timeout_secs: Some(3600),
            ..Self::default()
        }
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.poll_interval_ms)
    }

    pub fn run_timeout(&self) -> Option<Duration> {
        self.run_timeout_secs.map(Duration::from_secs)
    }

    pub fn discovery(&self) -> TestDiscovery {
        TestDiscovery::new(&self.src_dir)
            .with_includes(self.include_files.as_deref(), &self.includes)
            .with_excludes(&self.excludes)
    }

    pub fn preparer(&self) -> EnvironmentPreparer {
        EnvironmentPreparer::new(&self.work_dir)
            .with_properties_file(self.jmeter_properties.clone())
            .append_log(self.append_log)
    }

    pub fn detector(&self) -> CompletionDetector {
        CompletionDetector::new()
            .with_poll_interval(self.poll_interval())
            .with_timeout(self.run_timeout())
    }

    pub fn shutdown_client(&self) -> UdpShutdownClient {
        UdpShutdownClient::new(self.shutdown_port)
    }

    /// Settings shared by every run, against a staged engine home
    pub fn engine_settings(&self, staged: &StagedEnvironment) -> EngineSettings {
        let mut settings = EngineSettings::new(&self.report_dir, staged.properties_file(), staged.work_dir());
        settings.log_level = self.log_level.clone();
        settings.user_properties = self.user_properties.clone();
        settings.java_properties = self.java_properties.clone();
        settings.remote = self.remote;
        settings.proxy = self.proxy.clone();
        settings.system_properties = staged.system_properties().clone();
        settings
    }
}

/// Check if file is YAML based on extension
fn is_yaml_file(path: &Path) -> bool {
    path.extension()
        .map(|e| e == "yaml" || e == "yml")
        .unwrap_or(false)
}
