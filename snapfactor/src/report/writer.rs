//! CSV and JSON writers for study outputs.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;
use thiserror::Error;
use tracing::info;

use super::stats_table::build_stats_table;
use crate::sample::SampleTable;
use crate::stats::StatisticalInferenceEngine;

pub const SAMPLE_TABLE_FILE: &str = "sample_table.csv";
pub const SAMPLE_TABLE_TRADABLE_FILE: &str = "sample_table_tradable.csv";
pub const STATS_TABLE_TRADABLE_FILE: &str = "stats_table_tradable.csv";
pub const STATS_TABLE_FULL_FILE: &str = "stats_table_full.csv";
pub const COVERAGE_FILE: &str = "coverage.json";

#[derive(Error, Debug)]
pub enum ReportError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type ReportResult<T> = Result<T, ReportError>;

/// Paths and sizes of one study's outputs.
#[derive(Debug, Clone, Serialize)]
pub struct StudyOutputs {
    pub sample_table: PathBuf,
    pub sample_table_tradable: PathBuf,
    pub stats_table_tradable: PathBuf,
    pub stats_table_full: PathBuf,
    pub coverage: PathBuf,
    pub rows: usize,
    pub rows_tradable: usize,
}

/// Writes tables into one output directory.
pub struct ReportWriter {
    output_dir: PathBuf,
}

impl ReportWriter {
    pub fn new(output_dir: impl Into<PathBuf>) -> Self {
        Self {
            output_dir: output_dir.into(),
        }
    }

    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }

    /// Serialize `rows` to `<output_dir>/<name>` with a header row.
    ///
    /// An empty slice produces an empty file.
    pub fn write_csv<T: Serialize>(&self, name: &str, rows: &[T]) -> ReportResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(name);
        let mut writer = csv::Writer::from_writer(File::create(&path)?);
        for row in rows {
            writer.serialize(row)?;
        }
        writer.flush()?;
        Ok(path)
    }

    /// Pretty-printed JSON at `<output_dir>/<name>`.
    pub fn write_json<T: Serialize>(&self, name: &str, value: &T) -> ReportResult<PathBuf> {
        fs::create_dir_all(&self.output_dir)?;
        let path = self.output_dir.join(name);
        fs::write(&path, serde_json::to_string_pretty(value)?)?;
        Ok(path)
    }

    /// Write the sample tables, both statistics tables and the coverage report.
    ///
    /// The tradable statistics table is the main result; the full-sample
    /// table is the appendix.
    pub fn write_study(
        &self,
        table: &SampleTable,
        engine: &StatisticalInferenceEngine,
    ) -> ReportResult<StudyOutputs> {
        let tradable = table.tradable_rows();

        let sample_table = self.write_csv(SAMPLE_TABLE_FILE, &table.rows)?;
        let sample_table_tradable = self.write_csv(SAMPLE_TABLE_TRADABLE_FILE, &tradable)?;
        let stats_table_tradable =
            self.write_csv(STATS_TABLE_TRADABLE_FILE, &build_stats_table(&tradable, engine))?;
        let stats_table_full =
            self.write_csv(STATS_TABLE_FULL_FILE, &build_stats_table(&table.rows, engine))?;
        let coverage = self.write_json(COVERAGE_FILE, &table.coverage)?;

        info!(
            "Wrote study outputs to {} ({} rows, {} tradable)",
            self.output_dir.display(),
            table.len(),
            tradable.len()
        );

        Ok(StudyOutputs {
            sample_table,
            sample_table_tradable,
            stats_table_tradable,
            stats_table_full,
            coverage,
            rows: table.len(),
            rows_tradable: tradable.len(),
        })
    }
}
