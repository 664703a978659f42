//! Engine command line construction
//!
//! Each run gets a freshly built argument vector; the report destination is
//! unique within the batch.

use chrono::{Local, NaiveDate};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};
use std::io;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

use crate::models::TestDefinition;

/// Default HTTP proxy port
pub const DEFAULT_PROXY_PORT: u16 = 80;

/// Argument construction errors
#[derive(Error, Debug)]
pub enum ArgumentError {
    #[error("Can't resolve test file '{}'", path.display())]
    TestFile {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

/// HTTP proxy used by the engine
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxySettings {
    pub host: Option<String>,
    #[serde(default = "default_proxy_port")]
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
}

fn default_proxy_port() -> u16 {
    DEFAULT_PROXY_PORT
}

impl ProxySettings {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: Some(host.into()),
            port,
            username: None,
            password: None,
        }
    }

    pub fn with_credentials(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    fn host(&self) -> Option<&str> {
        self.host.as_deref().filter(|h| !h.is_empty())
    }

    fn username(&self) -> Option<&str> {
        self.username.as_deref().filter(|u| !u.is_empty())
    }
}

/// Everything that stays fixed across the runs of a batch
#[derive(Clone, Debug)]
pub struct EngineSettings {
    pub report_dir: PathBuf,
    pub properties_file: PathBuf,
    pub work_dir: PathBuf,
    pub log_level: String,
    pub user_properties: BTreeMap<String, String>,
    pub java_properties: BTreeMap<String, String>,
    pub remote: bool,
    pub proxy: Option<ProxySettings>,
    pub system_properties: BTreeMap<String, String>,
}

impl EngineSettings {
    pub fn new(
        report_dir: impl Into<PathBuf>,
        properties_file: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            report_dir: report_dir.into(),
            properties_file: properties_file.into(),
            work_dir: work_dir.into(),
            log_level: "INFO".to_string(),
            user_properties: BTreeMap::new(),
            java_properties: BTreeMap::new(),
            remote: false,
            proxy: None,
            system_properties: BTreeMap::new(),
        }
    }
}

/// Resolved arguments for a single run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RunArguments {
    test_file: PathBuf,
    report_file: PathBuf,
    args: Vec<String>,
    system_properties: BTreeMap<String, String>,
}

impl RunArguments {
    pub fn test_file(&self) -> &Path {
        &self.test_file
    }

    pub fn report_file(&self) -> &Path {
        &self.report_file
    }

    /// The flat command line handed to the engine
    pub fn args(&self) -> &[String] {
        &self.args
    }

    /// Process-wide settings the engine reads at startup
    pub fn system_properties(&self) -> &BTreeMap<String, String> {
        &self.system_properties
    }

    /// Arguments safe to log: the proxy password is masked
    pub fn redacted(&self) -> Vec<String> {
        let mut redacted = Vec::with_capacity(self.args.len());
        let mut mask_next = false;
        for arg in &self.args {
            if mask_next {
                redacted.push("****".to_string());
                mask_next = false;
            } else {
                mask_next = arg == "-a";
                redacted.push(arg.clone());
            }
        }
        redacted
    }
}

/// Hands out report file names that do not collide within a batch
#[derive(Debug, Default)]
pub struct ReportNamer {
    used: HashSet<String>,
}

impl ReportNamer {
    pub fn new() -> Self {
        Self::default()
    }

    /// `<stem>-<yyMMdd>.xml`, with `-<n>` appended for the n-th duplicate
    pub fn name(&mut self, stem: &str, date: NaiveDate) -> String {
        let base = format!("{}-{}", stem, date.format("%y%m%d"));
        let mut candidate = format!("{base}.xml");
        let mut n = 2;
        while self.used.contains(&candidate) {
            candidate = format!("{base}-{n}.xml");
            n += 1;
        }
        self.used.insert(candidate.clone());
        candidate
    }
}

/// Builds [`RunArguments`] for each definition of a batch
pub struct ArgumentBuilder {
    settings: EngineSettings,
    namer: ReportNamer,
    date: Option<NaiveDate>,
}

impl ArgumentBuilder {
    pub fn new(settings: EngineSettings) -> Self {
        Self {
            settings,
            namer: ReportNamer::new(),
            date: None,
        }
    }

    /// Pin the date used in report names
    pub fn with_date(mut self, date: NaiveDate) -> Self {
        self.date = Some(date);
        self
    }

    pub fn settings(&self) -> &EngineSettings {
        &self.settings
    }

    pub fn build(&mut self, definition: &TestDefinition) -> Result<RunArguments, ArgumentError> {
        let test_file =
            std::fs::canonicalize(definition.path()).map_err(|source| ArgumentError::TestFile {
                path: definition.path().to_path_buf(),
                source,
            })?;

        let date = self.date.unwrap_or_else(|| Local::now().date_naive());
        let report_file = self
            .settings
            .report_dir
            .join(self.namer.name(&definition.stem(), date));

        let settings = &self.settings;
        let mut args = vec![
            "-n".to_string(),
            "-t".to_string(),
            test_file.display().to_string(),
            "-l".to_string(),
            report_file.display().to_string(),
            "-p".to_string(),
            settings.properties_file.display().to_string(),
            "-d".to_string(),
            settings.work_dir.display().to_string(),
            "-L".to_string(),
            format!("jorphan={}", settings.log_level),
            "-L".to_string(),
            format!("jmeter.util={}", settings.log_level),
        ];

        for (key, value) in &settings.user_properties {
            args.push("-J".to_string());
            args.push(format!("{key}={value}"));
        }
        for (key, value) in &settings.java_properties {
            args.push("-D".to_string());
            args.push(format!("{key}={value}"));
        }

        if settings.remote {
            args.push("-r".to_string());
        }

        if let Some(proxy) = &settings.proxy {
            if let Some(host) = proxy.host() {
                args.extend(["-H".to_string(), host.to_string()]);
                args.extend(["-P".to_string(), proxy.port.to_string()]);
                info!("Setting HTTP proxy to {}:{}", host, proxy.port);
            }
            if let Some(username) = proxy.username() {
                args.extend(["-u".to_string(), username.to_string()]);
                args.extend(["-a".to_string(), proxy.password.clone().unwrap_or_default()]);
                info!("Authenticating to proxy as {}", username);
            }
        }

        debug!("Report for {} goes to {}", definition, report_file.display());

        Ok(RunArguments {
            test_file,
            report_file,
            args,
            system_properties: settings.system_properties.clone(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2024, 3, 7).unwrap()
    }

    #[test]
    fn test_report_names_unique() {
        let mut namer = ReportNamer::new();
        assert_eq!(namer.name("login", date()), "login-240307.xml");
        assert_eq!(namer.name("login", date()), "login-240307-2.xml");
        assert_eq!(namer.name("checkout", date()), "checkout-240307.xml");
        assert_eq!(namer.name("login", date()), "login-240307-3.xml");
    }

    #[test]
    fn test_base_arguments() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("login.jmx"), "<jmeterTestPlan/>").unwrap();
        let def = TestDefinition::new(dir.path(), "login.jmx");

        let settings = EngineSettings::new("/reports", "/work/bin/jmeter.properties", "/work");
        let mut builder = ArgumentBuilder::new(settings).with_date(date());
        let run = builder.build(&def).unwrap();

        let test_file = std::fs::canonicalize(def.path()).unwrap();
        assert_eq!(
            run.args(),
            &[
                "-n".to_string(),
                "-t".to_string(),
                test_file.display().to_string(),
                "-l".to_string(),
                "/reports/login-240307.xml".to_string(),
                "-p".to_string(),
                "/work/bin/jmeter.properties".to_string(),
                "-d".to_string(),
                "/work".to_string(),
                "-L".to_string(),
                "jorphan=INFO".to_string(),
                "-L".to_string(),
                "jmeter.util=INFO".to_string(),
            ]
        );
        assert_eq!(run.report_file(), Path::new("/reports/login-240307.xml"));
    }

    #[test]
    fn test_optional_arguments() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("load.jmx"), "").unwrap();
        let def = TestDefinition::new(dir.path(), "load.jmx");

        let mut settings = EngineSettings::new("/reports", "/p", "/w");
        settings.log_level = "DEBUG".to_string();
        settings.user_properties.insert("threads".to_string(), "10".to_string());
        settings.user_properties.insert("duration".to_string(), "60".to_string());
        settings.java_properties.insert("https.protocols".to_string(), "TLSv1.2".to_string());
        settings.remote = true;
        settings.proxy = Some(ProxySettings::new("proxy.local", 3128).with_credentials("bob", "s3cret"));

        let mut builder = ArgumentBuilder::new(settings).with_date(date());
        let run = builder.build(&def).unwrap();
        let tail: Vec<&str> = run.args()[13..].iter().map(String::as_str).collect();

        assert_eq!(
            tail,
            vec![
                "-J", "duration=60", "-J", "threads=10", "-D", "https.protocols=TLSv1.2", "-r",
                "-H", "proxy.local", "-P", "3128", "-u", "bob", "-a", "s3cret",
            ]
        );
        assert!(run.args().contains(&"jorphan=DEBUG".to_string()));

        let redacted = run.redacted();
        assert!(!redacted.contains(&"s3cret".to_string()));
        assert_eq!(redacted.last().map(String::as_str), Some("****"));
    }

    #[test]
    fn test_empty_proxy_host_ignored() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("a.jmx"), "").unwrap();
        let def = TestDefinition::new(dir.path(), "a.jmx");

        let mut settings = EngineSettings::new("/r", "/p", "/w");
        settings.proxy = Some(ProxySettings {
            host: Some(String::new()),
            port: 80,
            username: Some(String::new()),
            password: None,
        });

        let run = ArgumentBuilder::new(settings).build(&def).unwrap();
        assert_eq!(run.args().len(), 13);
    }

    #[test]
    fn test_missing_test_file() {
        let dir = tempdir().unwrap();
        let def = TestDefinition::new(dir.path(), "missing.jmx");
        let mut builder = ArgumentBuilder::new(EngineSettings::new("/r", "/p", "/w"));
        assert!(matches!(builder.build(&def), Err(ArgumentError::TestFile { .. })));
    }
}
