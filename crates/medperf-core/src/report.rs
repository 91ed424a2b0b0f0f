//! Persisted compatibility-test reports.

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use crate::config::StorageConfig;
use crate::effects::{ExecutionSummary, Results};
use crate::records::{read_json, write_json_atomic};

pub const REPORT_FILENAME: &str = "test_report.json";

/// Snapshot of the resolved inputs of one test run, plus its outputs once
/// executed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestReport {
    #[serde(default)]
    pub benchmark: Option<u64>,
    #[serde(default)]
    pub demo_dataset_url: Option<String>,
    #[serde(default)]
    pub demo_dataset_hash: Option<String>,
    #[serde(default)]
    pub data_path: Option<String>,
    #[serde(default)]
    pub labels_path: Option<String>,
    pub prepared_data_hash: String,
    #[serde(default)]
    pub data_preparation_mlcube: Option<String>,
    pub model: String,
    pub data_evaluator_mlcube: String,
    #[serde(default)]
    pub results: Option<Results>,
    #[serde(default)]
    pub partial: bool,
    #[serde(default)]
    pub created_at: Option<String>,
}

impl TestReport {
    /// Deterministic cache key for this combination of inputs.
    #[must_use]
    pub fn generated_uid(&self) -> String {
        let first = match self.benchmark {
            Some(benchmark) => format!("b{benchmark}"),
            None => format!("e{}", self.data_evaluator_mlcube),
        };
        format!("{first}m{}d{}", self.model, self.prepared_data_hash)
    }

    /// Attach execution outputs and stamp the report.
    ///
    /// # Errors
    /// Returns an error when the timestamp cannot be formatted.
    pub fn set_results(&mut self, summary: ExecutionSummary) -> Result<()> {
        self.results = Some(summary.results);
        self.partial = summary.partial;
        self.created_at = Some(OffsetDateTime::now_utc().format(&Rfc3339)?);
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct ReportStore {
    storage: StorageConfig,
}

impl ReportStore {
    #[must_use]
    pub fn new(storage: StorageConfig) -> Self {
        Self { storage }
    }

    #[must_use]
    pub fn path_for(&self, uid: &str) -> PathBuf {
        self.storage.report_dir(uid).join(REPORT_FILENAME)
    }

    /// Previously written report for `uid`, if any.
    ///
    /// # Errors
    /// Returns an error when an existing report cannot be parsed.
    pub fn load(&self, uid: &str) -> Result<Option<TestReport>> {
        read_json(&self.path_for(uid))
    }

    /// Write the report under its generated uid, replacing any earlier one.
    ///
    /// # Errors
    /// Returns an error when the report cannot be written.
    pub fn write(&self, report: &TestReport) -> Result<PathBuf> {
        let path = self.path_for(&report.generated_uid());
        write_json_atomic(&path, report)?;
        Ok(path)
    }
}
