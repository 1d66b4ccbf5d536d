//! Run-level aggregation: file discovery, sequential processing, and the
//! SUMMARY contract line.
//!
//! Files run strictly one after another; a failed file never stops the run.
//! Final throughput is computed only after the last file reaches a terminal
//! outcome.

use crate::config::ImportConfig;
use crate::error::LoadError;
use crate::import::error_log::ErrorSink;
use crate::import::orchestrator;
use crate::models::{FileOutcome, FileStatus, RunSummary, SourceFile};
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Floor applied when rows were inserted faster than the clock can resolve,
/// keeping throughput finite.
const MIN_ELAPSED_SECONDS: f64 = 0.001;

/// Non-recursive scan for `.xlsx` files, sorted by name so discovery order
/// is deterministic.
pub fn discover_files(dir: &Path) -> Result<Vec<PathBuf>, LoadError> {
    if !dir.exists() {
        return Err(LoadError::SourceDirMissing(dir.to_path_buf()));
    }
    let entries = std::fs::read_dir(dir).map_err(|source| LoadError::SourceDirUnreadable {
        path: dir.to_path_buf(),
        source,
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|source| LoadError::SourceDirUnreadable {
            path: dir.to_path_buf(),
            source,
        })?;
        let path = entry.path();
        if path.is_file() && path.extension().is_some_and(|ext| ext == "xlsx") {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Process every discovered file and build the run summary. Individual file
/// failures are absorbed into the summary; only run-fatal conditions
/// surface as `Err`.
pub async fn run(
    paths: &[PathBuf],
    config: &ImportConfig,
    pool: &PgPool,
    sink: &mut ErrorSink,
) -> Result<RunSummary, LoadError> {
    let started_at = Utc::now();
    let timer = Instant::now();

    let mut outcomes = Vec::with_capacity(paths.len());
    for path in paths {
        let mut source = SourceFile::new(path.clone());
        let outcome = orchestrator::process_file(&mut source, config, pool, sink).await?;
        match outcome.status {
            FileStatus::Succeeded => log::info!(
                "{}: {} rows in {:.2}s ({} sheets skipped)",
                outcome.file_name,
                outcome.rows_inserted,
                outcome.elapsed_seconds,
                outcome.sheets_skipped
            ),
            _ => log::warn!("{}: failed, file rolled back", outcome.file_name),
        }
        outcomes.push(outcome);
    }

    Ok(summarize(
        outcomes,
        started_at,
        Utc::now(),
        timer.elapsed().as_secs_f64(),
    ))
}

fn summarize(
    outcomes: Vec<FileOutcome>,
    started_at: DateTime<Utc>,
    finished_at: DateTime<Utc>,
    elapsed_seconds: f64,
) -> RunSummary {
    let success_files = outcomes
        .iter()
        .filter(|o| o.status == FileStatus::Succeeded)
        .count();
    let failed_files = outcomes.len() - success_files;
    let total_rows: u64 = outcomes.iter().map(|o| o.rows_inserted).sum();
    let skipped_sheets: usize = outcomes.iter().map(|o| o.sheets_skipped).sum();

    let throughput_rps = if total_rows == 0 {
        0.0
    } else {
        total_rows as f64 / elapsed_seconds.max(MIN_ELAPSED_SECONDS)
    };

    RunSummary {
        total_files: outcomes.len(),
        outcomes,
        success_files,
        failed_files,
        total_rows,
        skipped_sheets,
        started_at,
        finished_at,
        elapsed_seconds,
        throughput_rps,
    }
}

/// Render the stable SUMMARY contract line. Field order and keys are fixed;
/// adding a key is a breaking change.
pub fn render_summary_line(summary: &RunSummary) -> String {
    let processed = summary.success_files + summary.failed_files;
    format!(
        "SUMMARY files={}/{} success={} failed={} rows={} skipped_sheets={} elapsed_sec={} throughput_rps={}",
        processed,
        summary.total_files,
        summary.success_files,
        summary.failed_files,
        summary.total_rows,
        summary.skipped_sheets,
        format_metric(summary.elapsed_seconds),
        format_metric(summary.throughput_rps),
    )
}

/// Integral values render without a fraction; everything else keeps up to
/// six decimal places with trailing zeros trimmed.
fn format_metric(value: f64) -> String {
    if value == 0.0 {
        "0".to_string()
    } else if value.fract() == 0.0 {
        format!("{value:.0}")
    } else {
        let text = format!("{value:.6}");
        text.trim_end_matches('0').trim_end_matches('.').to_string()
    }
}
