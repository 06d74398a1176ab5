//! Boundaries to the external post-processing collaborators.
//!
//! The HTML/chart renderer and the historical-results database loader live
//! outside this crate; the engine only guarantees the result-log schema and
//! invokes them after a run. Their failures are logged and never touch the
//! already-written result log.
use crate::config::{GroupConfig, RunConfig};
use std::path::Path;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("{0}")]
pub struct ReportError(pub String);

impl From<String> for ReportError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

impl From<&str> for ReportError {
    fn from(message: &str) -> Self {
        Self(message.to_string())
    }
}

/// Renders the HTML report and chart assets from a finished result log.
pub trait ReportRenderer: Send + Sync {
    fn render(
        &self,
        output_dir: &Path,
        results_csv: &Path,
        run: &RunConfig,
        groups: &[GroupConfig],
    ) -> Result<(), ReportError>;
}

/// Loads a finished run into a historical-results database.
pub trait ResultsDbLoader: Send + Sync {
    fn load(
        &self,
        project: &str,
        output_dir: &Path,
        database: &str,
        run: &RunConfig,
        groups: &[GroupConfig],
    ) -> Result<(), ReportError>;
}
