//! Configuration file discovery

use anyhow::Result;
use std::path::PathBuf;
use tracing::debug;

use super::BatchConfig;

/// Configuration file locations (in order of precedence)
pub const CONFIG_LOCATIONS: &[&str] = &[
    "./jmeter-batch.yaml",
    "./jmeter-batch.yml",
    "./.jmeter-batch.yaml",
    "~/.config/jmeter-batch/config.yaml",
];

/// Find configuration file in standard locations
pub fn find() -> Option<PathBuf> {
    CONFIG_LOCATIONS
        .iter()
        .map(|location| expand_path(location))
        .find(|path| path.exists())
}

/// Load the given file, the first file found in the standard locations, or
/// the defaults
pub fn load(explicit: Option<PathBuf>) -> Result<BatchConfig> {
    match explicit.or_else(find) {
        Some(path) => {
            debug!("Loading configuration from {}", path.display());
            BatchConfig::load(&path)
        }
        None => {
            debug!("No configuration file found, using defaults");
            Ok(BatchConfig::default())
        }
    }
}

/// Expand ~ to home directory
fn expand_path(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}
