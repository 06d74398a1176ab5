//! Resolved run configuration.
//!
//! The config file is TOML with one reserved `[global]` table; every other
//! top-level table names a user group. The parser only cares about this
//! resolved schema, not about presentation details of the file.
use crate::error::ConfigError;
use serde::Deserialize;
use std::path::{Path, PathBuf};

pub const CONFIG_FILE: &str = "config.toml";

/// Global run settings, immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
pub struct RunConfig {
    /// Wall-clock run duration in seconds.
    pub run_time: u64,
    /// Window in seconds over which each group's agents are staggered in.
    pub rampup: u64,
    /// Echo each result row to the console instead of rendering a progress bar.
    pub console_logging: bool,
    /// Time-series interval in seconds, handed through to the report renderer.
    pub results_ts_interval: u64,
    pub results_database: Option<String>,
    pub post_run_script: Option<PathBuf>,
}

/// One configured user group: a cohort of agents sharing a name, thread
/// count and script. The name doubles as the result-log label.
#[derive(Debug, Clone, Deserialize)]
pub struct GroupConfig {
    #[serde(skip)]
    pub name: String,
    pub threads: usize,
    pub script: String,
}

/// Fully resolved configuration for one run.
#[derive(Debug, Clone)]
pub struct TestConfig {
    pub run: RunConfig,
    pub groups: Vec<GroupConfig>,
}

impl TestConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::MissingFile(path.to_path_buf()));
        }
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&raw)
    }

    pub fn parse(raw: &str) -> Result<Self, ConfigError> {
        let mut table: toml::Table = raw.parse()?;

        let global = table.remove("global").ok_or(ConfigError::MissingGlobal)?;
        let run: RunConfig = global.try_into().map_err(|source| ConfigError::Section {
            section: "global".to_string(),
            source,
        })?;
        if run.run_time == 0 {
            return Err(invalid("global", "run_time must be greater than zero"));
        }
        if run.results_ts_interval == 0 {
            return Err(invalid(
                "global",
                "results_ts_interval must be greater than zero",
            ));
        }

        let mut groups = Vec::with_capacity(table.len());
        for (name, value) in table {
            let mut group: GroupConfig =
                value.try_into().map_err(|source| ConfigError::Section {
                    section: name.clone(),
                    source,
                })?;
            if group.threads == 0 {
                return Err(invalid(&name, "threads must be at least 1"));
            }
            group.name = name;
            groups.push(group);
        }
        if groups.is_empty() {
            return Err(invalid("global", "no user groups configured"));
        }

        Ok(Self { run, groups })
    }
}

fn invalid(section: &str, message: &str) -> ConfigError {
    ConfigError::Invalid {
        section: section.to_string(),
        message: message.to_string(),
    }
}

/// A project directory holding a config file and a `results/` subdirectory.
#[derive(Debug, Clone)]
pub struct Project {
    pub name: String,
    pub path: PathBuf,
}

impl Project {
    /// Resolves a project by absolute or working-directory-relative path
    /// first, then under `projects/`.
    pub fn locate(name: &str) -> Option<Self> {
        let candidates = [PathBuf::from(name), Path::new("projects").join(name)];
        candidates
            .into_iter()
            .find(|path| path.exists())
            .map(|path| Self {
                name: name.to_string(),
                path,
            })
    }

    pub fn config_path(&self) -> PathBuf {
        self.path.join(CONFIG_FILE)
    }

    pub fn results_root(&self) -> PathBuf {
        self.path.join("results")
    }
}
