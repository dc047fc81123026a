//! Training provenance report.
//!
//! Each training run leaves a small human-readable TOML record next to the
//! classifier artifacts: which subjects went in, the held-out accuracy, and
//! who ran it, where, and when.

use chrono::Local;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use thiserror::Error;

/// Report file name inside the classifier directory.
pub const RUN_INFO_FILE: &str = "clf_info.toml";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("failed to write run report: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to serialize run report: {0}")]
    Toml(#[from] toml::ser::Error),
}

/// Provenance of one training run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunInfo {
    pub training_subjects: Vec<String>,
    pub testing_accuracy: f32,
    pub n_features: usize,
    pub run_by: String,
    pub date: String,
    pub hostname: String,
}

impl RunInfo {
    /// Builds a report for the current run, stamping operator, date and host.
    pub fn collect(subjects: &[String], accuracy: f32, n_features: usize) -> Self {
        Self {
            training_subjects: subjects.to_vec(),
            testing_accuracy: accuracy,
            n_features,
            run_by: whoami::username(),
            date: Local::now().format("%Y-%m-%d").to_string(),
            hostname: whoami::fallible::hostname().unwrap_or_else(|_| String::from("unknown")),
        }
    }

    /// Writes the report, replacing any record from an earlier run.
    pub fn write(&self, path: &Path) -> Result<(), ReportError> {
        let rendered = toml::to_string_pretty(self)?;
        fs::write(path, rendered)?;
        Ok(())
    }
}
