//! Working directory staging
//!
//! The engine loads several property files from its home directory and will
//! not take them from anywhere else, so they are written out before the
//! batch starts and the temporary ones are removed afterwards.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::logstream::LogCursor;

const SAVESERVICE_PROPERTIES: &str = include_str!("../../resources/saveservice.properties");
const UPGRADE_PROPERTIES: &str = include_str!("../../resources/upgrade.properties");
const JMETER_PROPERTIES: &str = include_str!("../../resources/jmeter.properties");

/// Name of the engine log inside the working directory
pub const LOG_FILE_NAME: &str = "jmeter.log";

/// Staging errors
#[derive(Error, Debug)]
pub enum EnvironmentError {
    #[error("Could not create directory '{}'", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Could not create temporary '{}'", path.display())]
    WriteResource {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Can't prepare log file '{}'", path.display())]
    LogFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// Stages the engine's home directory
#[derive(Clone, Debug)]
pub struct EnvironmentPreparer {
    work_dir: PathBuf,
    properties_file: Option<PathBuf>,
    append_log: bool,
}

impl EnvironmentPreparer {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        Self {
            work_dir: work_dir.into(),
            properties_file: None,
            append_log: false,
        }
    }

    /// Use an existing properties file instead of the bundled default
    pub fn with_properties_file(mut self, path: Option<PathBuf>) -> Self {
        self.properties_file = path;
        self
    }

    /// Keep the previous log content instead of starting a fresh log
    pub fn append_log(mut self, append: bool) -> Self {
        self.append_log = append;
        self
    }

    pub fn prepare(&self) -> Result<StagedEnvironment, EnvironmentError> {
        create_dir(&self.work_dir)?;
        let work_dir = fs::canonicalize(&self.work_dir).map_err(|source| EnvironmentError::CreateDir {
            path: self.work_dir.clone(),
            source,
        })?;

        let bin_dir = work_dir.join("bin");
        create_dir(&bin_dir)?;
        // Fallback library layout the engine looks for on startup
        create_dir(&work_dir.join("lib").join("ext"))?;
        create_dir(&work_dir.join("lib").join("junit"))?;

        let mut staged = StagedEnvironment {
            work_dir: work_dir.clone(),
            log_file: work_dir.join(LOG_FILE_NAME),
            log_start: LogCursor::default(),
            properties_file: PathBuf::new(),
            temporary: Vec::new(),
            system_properties: BTreeMap::new(),
        };

        let saveservice = write_resource(&bin_dir, "saveservice.properties", SAVESERVICE_PROPERTIES)?;
        staged.temporary.push(saveservice);
        staged
            .system_properties
            .insert("saveservice_properties".to_string(), "/bin/saveservice.properties".to_string());

        let upgrade = write_resource(&bin_dir, "upgrade.properties", UPGRADE_PROPERTIES)?;
        staged.temporary.push(upgrade);
        staged
            .system_properties
            .insert("upgrade_properties".to_string(), "/bin/upgrade.properties".to_string());

        staged.properties_file = match &self.properties_file {
            Some(path) => path.clone(),
            None => {
                info!("Loading default jmeter.properties...");
                let path = write_resource(&bin_dir, "jmeter.properties", JMETER_PROPERTIES)?;
                staged
                    .system_properties
                    .insert("jmeter_properties".to_string(), "/bin/jmeter.properties".to_string());
                path
            }
        };

        let log_error = |source| EnvironmentError::LogFile {
            path: staged.log_file.clone(),
            source,
        };
        let log = OpenOptions::new()
            .create(true)
            .write(true)
            .append(self.append_log)
            .truncate(!self.append_log)
            .open(&staged.log_file)
            .map_err(log_error)?;
        // Earlier content is not part of this batch
        staged.log_start = LogCursor::at(log.metadata().map_err(log_error)?.len());
        staged
            .system_properties
            .insert("log_file".to_string(), staged.log_file.display().to_string());

        debug!("Staged engine home in '{}'", work_dir.display());
        Ok(staged)
    }
}

fn create_dir(path: &Path) -> Result<(), EnvironmentError> {
    fs::create_dir_all(path).map_err(|source| EnvironmentError::CreateDir {
        path: path.to_path_buf(),
        source,
    })
}

fn write_resource(dir: &Path, name: &str, content: &str) -> Result<PathBuf, EnvironmentError> {
    let path = dir.join(name);
    fs::write(&path, content).map_err(|source| EnvironmentError::WriteResource {
        path: path.clone(),
        source,
    })?;
    Ok(path)
}

/// A staged engine home. Temporary files are removed on drop.
#[derive(Debug)]
pub struct StagedEnvironment {
    work_dir: PathBuf,
    log_file: PathBuf,
    log_start: LogCursor,
    properties_file: PathBuf,
    temporary: Vec<PathBuf>,
    system_properties: BTreeMap<String, String>,
}

impl StagedEnvironment {
    pub fn work_dir(&self) -> &Path {
        &self.work_dir
    }

    pub fn log_file(&self) -> &Path {
        &self.log_file
    }

    /// Where this batch's output begins in the log
    pub fn log_start(&self) -> LogCursor {
        self.log_start
    }

    pub fn properties_file(&self) -> &Path {
        &self.properties_file
    }

    /// Settings the engine expects to find process-wide
    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }
}

impl Drop for StagedEnvironment {
    fn drop(&mut self) {
        for path in &self.temporary {
            if let Err(e) = fs::remove_file(path) {
                warn!("Failed to remove '{}': {}", path.display(), e);
            }
        }
    }
}
