//! Test definition model

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};

/// One load-test script to run
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TestDefinition {
    /// Path relative to the discovery root
    relative: PathBuf,
    /// Full path of the script
    path: PathBuf,
}

impl TestDefinition {
    pub fn new(root: impl AsRef<Path>, relative: impl Into<PathBuf>) -> Self {
        let relative = relative.into();
        let path = root.as_ref().join(&relative);
        Self { relative, path }
    }

    /// Definition from a standalone path
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let relative = path
            .file_name()
            .map(PathBuf::from)
            .unwrap_or_else(|| path.clone());
        Self { relative, path }
    }

    pub fn relative(&self) -> &Path {
        &self.relative
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// File name without its extension
    pub fn stem(&self) -> String {
        self.path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| "test".to_string())
    }
}

impl fmt::Display for TestDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.relative.display())
    }
}
