use std::path::PathBuf;
use thiserror::Error;

/// Fatal errors that abort a run before any agent starts.
#[derive(Debug, Error)]
pub enum RunError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("can not create output directory {path}: {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("can not create result log {path}: {source}")]
    ResultLog {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Configuration resolution failures. All of these abort before launch.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file does not exist: {0}")]
    MissingFile(PathBuf),

    #[error("can not read config file {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("config file is not valid TOML: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config file has no [global] section")]
    MissingGlobal,

    #[error("invalid [{section}] section: {source}")]
    Section {
        section: String,
        #[source]
        source: toml::de::Error,
    },

    #[error("invalid [{section}] section: {message}")]
    Invalid { section: String, message: String },
}

/// Failures inside the results writer. Logged by the writer thread, never
/// surfaced to producers.
#[derive(Debug, Error)]
pub enum WriteError {
    #[error("result log write failed: {0}")]
    Csv(#[from] csv::Error),

    #[error("custom timer serialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("result log flush failed: {0}")]
    Io(#[from] std::io::Error),
}
