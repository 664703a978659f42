//! Test definition discovery
//!
//! Finds test scripts under a root directory using Ant-style include and
//! exclude patterns (`**`, `*`, `?`).

use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::debug;
use walkdir::WalkDir;

use crate::models::TestDefinition;

/// Include pattern used when none is configured
pub const DEFAULT_INCLUDE: &str = "**/*.jmx";

/// Discovery errors
#[derive(Error, Debug)]
pub enum DiscoveryError {
    #[error("Test directory '{}' does not exist", .0.display())]
    MissingRoot(PathBuf),

    #[error("Failed to scan test directory '{}'", root.display())]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}

/// A compiled Ant-style path pattern
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct AntPattern {
    segments: Vec<String>,
}

impl AntPattern {
    pub fn new(pattern: &str) -> Self {
        let mut normalized = pattern.replace('\\', "/");
        if normalized.ends_with('/') {
            normalized.push_str("**");
        }
        let segments = normalized
            .split('/')
            .filter(|s| !s.is_empty() && *s != ".")
            .map(str::to_string)
            .collect();
        Self { segments }
    }

    /// Match a `/`-separated relative path
    pub fn matches(&self, path: &str) -> bool {
        let parts: Vec<&str> = path.split('/').filter(|s| !s.is_empty()).collect();
        match_segments(&self.segments, &parts)
    }
}

fn match_segments(pattern: &[String], path: &[&str]) -> bool {
    match pattern.split_first() {
        None => path.is_empty(),
        Some((head, rest)) if head == "**" => {
            (0..=path.len()).any(|skip| match_segments(rest, &path[skip..]))
        }
        Some((head, rest)) => match path.split_first() {
            Some((first, remaining)) => {
                match_wildcard(head.as_bytes(), first.as_bytes()) && match_segments(rest, remaining)
            }
            None => false,
        },
    }
}

fn match_wildcard(pattern: &[u8], name: &[u8]) -> bool {
    match (pattern.first(), name.first()) {
        (None, None) => true,
        (Some(b'*'), _) => {
            match_wildcard(&pattern[1..], name)
                || (!name.is_empty() && match_wildcard(pattern, &name[1..]))
        }
        (Some(b'?'), Some(_)) => match_wildcard(&pattern[1..], &name[1..]),
        (Some(p), Some(n)) if p == n => match_wildcard(&pattern[1..], &name[1..]),
        _ => false,
    }
}

/// Scans a directory for test definitions
#[derive(Clone, Debug)]
pub struct TestDiscovery {
    root: PathBuf,
    includes: Vec<String>,
    excludes: Vec<String>,
}

impl TestDiscovery {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            includes: vec![DEFAULT_INCLUDE.to_string()],
            excludes: Vec::new(),
        }
    }

    /// Configure includes. A single `include_files` pattern wins over the
    /// include list; with neither, the default pattern is used.
    pub fn with_includes(mut self, include_files: Option<&str>, includes: &[String]) -> Self {
        self.includes = match include_files {
            Some(pattern) => {
                if includes.is_empty() {
                    debug!("Using include files '{}'", pattern);
                } else {
                    debug!("Overwriting configured includes with include files '{}'", pattern);
                }
                vec![pattern.to_string()]
            }
            None if includes.is_empty() => {
                debug!("Using default includes");
                vec![DEFAULT_INCLUDE.to_string()]
            }
            None => {
                debug!("Using configured includes");
                includes.to_vec()
            }
        };
        self
    }

    pub fn with_excludes(mut self, excludes: &[String]) -> Self {
        self.excludes = excludes.to_vec();
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Matching files in path order
    pub fn scan(&self) -> Result<Vec<TestDefinition>, DiscoveryError> {
        if !self.root.is_dir() {
            return Err(DiscoveryError::MissingRoot(self.root.clone()));
        }

        let includes: Vec<AntPattern> = self.includes.iter().map(|p| AntPattern::new(p)).collect();
        let excludes: Vec<AntPattern> = self.excludes.iter().map(|p| AntPattern::new(p)).collect();

        let mut found = Vec::new();
        for entry in WalkDir::new(&self.root).sort_by_file_name() {
            let entry = entry.map_err(|source| DiscoveryError::Walk {
                root: self.root.clone(),
                source,
            })?;
            if !entry.file_type().is_file() {
                continue;
            }

            let Ok(relative) = entry.path().strip_prefix(&self.root) else {
                continue;
            };
            let key = relative
                .components()
                .map(|c| c.as_os_str().to_string_lossy())
                .collect::<Vec<_>>()
                .join("/");

            if includes.iter().any(|p| p.matches(&key)) && !excludes.iter().any(|p| p.matches(&key)) {
                found.push(TestDefinition::new(&self.root, relative));
            }
        }

        debug!(
            "Finally using test files {}",
            found
                .iter()
                .map(ToString::to_string)
                .collect::<Vec<_>>()
                .join(", ")
        );
        Ok(found)
    }
}
