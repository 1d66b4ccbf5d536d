//! Per-file import orchestration.
//!
//! Drives one workbook end-to-end: opens a single transaction covering every
//! mapped sheet, runs propagation and batched insertion per sheet, and
//! commits or rolls back the whole file. Atomicity is file-granular: one bad
//! row anywhere discards the file's entire pending work. Exactly one
//! [`FileOutcome`] is produced per file, and the per-file error buffer is
//! flushed exactly once on both the success and the failure path.

use crate::config::{ImportConfig, SheetMapping};
use crate::error::LoadError;
use crate::excel::{self, NormalizeError, RawSheet};
use crate::import::batch;
use crate::import::error_log::{ErrorCollector, ErrorSink};
use crate::import::propagation::{self, KeyPropagator, PropagationError};
use crate::models::{
    ErrorEntry, ErrorKind, FILE_LEVEL_SHEET, FileOutcome, FileStatus, ROW_UNATTRIBUTED,
    SourceFile,
};
use sqlx::{PgConnection, PgPool};
use std::time::Instant;

/// A file-fatal failure captured mid-transaction, carrying the attribution
/// recorded into the error log.
#[derive(Debug)]
struct FileFailure {
    sheet: String,
    row: i64,
    kind: ErrorKind,
    message: String,
}

impl FileFailure {
    fn file_level(kind: ErrorKind, message: String) -> Self {
        Self {
            sheet: FILE_LEVEL_SHEET.to_string(),
            row: ROW_UNATTRIBUTED,
            kind,
            message,
        }
    }

    fn sheet_level(sheet: &str, kind: ErrorKind, message: String) -> Self {
        Self {
            sheet: sheet.to_string(),
            row: ROW_UNATTRIBUTED,
            kind,
            message,
        }
    }

    fn from_propagation(sheet: &str, err: PropagationError) -> Self {
        let row = match &err {
            PropagationError::UnmatchedCorrelation { row, .. } => *row,
            PropagationError::MissingMatchColumn { .. } => ROW_UNATTRIBUTED,
        };
        Self {
            sheet: sheet.to_string(),
            row,
            kind: ErrorKind::PropagationError,
            message: err.to_string(),
        }
    }
}

/// Process one workbook inside one transaction and return its outcome.
///
/// File-fatal failures are absorbed here: they roll back the transaction,
/// append one error entry, and yield a `failed` outcome crediting zero rows.
/// Only run-fatal conditions (a failed error-log flush) surface as `Err`.
pub async fn process_file(
    source: &mut SourceFile,
    config: &ImportConfig,
    pool: &PgPool,
    sink: &mut ErrorSink,
) -> Result<FileOutcome, LoadError> {
    let started = Instant::now();
    source.status = FileStatus::Processing;
    log::info!("processing {}", source.name);

    let mut collector = ErrorCollector::new();

    let attempt = match excel::read_workbook(&source.path) {
        Ok(sheets) => {
            source.skipped_sheets = count_unmapped(&sheets, config);
            run_file_transaction(source, &sheets, config, pool).await
        }
        Err(err) => Err(FileFailure::file_level(
            ErrorKind::WorkbookError,
            err.to_string(),
        )),
    };

    match attempt {
        Ok(rows) => {
            source.total_rows = rows;
            source.status = FileStatus::Succeeded;
        }
        Err(failure) => {
            log::error!("{} failed: {}", source.name, failure.message);
            collector.record(ErrorEntry::new(
                &source.name,
                &failure.sheet,
                failure.row,
                failure.kind,
                failure.message.clone(),
            ));
            source.total_rows = 0;
            source.status = FileStatus::Failed;
            source.error = Some(failure.message);
        }
    }

    let written = collector.flush(sink).map_err(LoadError::ErrorSink)?;
    if written > 0 {
        log::debug!("wrote {} error entries for {}", written, source.name);
    }

    Ok(FileOutcome {
        file_name: source.name.clone(),
        status: source.status,
        rows_inserted: source.total_rows,
        sheets_skipped: source.skipped_sheets,
        elapsed_seconds: started.elapsed().as_secs_f64(),
    })
}

/// Sheets present in the workbook but absent from configuration are counted
/// as skips, never as errors.
fn count_unmapped(sheets: &[RawSheet], config: &ImportConfig) -> usize {
    sheets
        .iter()
        .filter(|s| {
            let unmapped = config.mapping_for(&s.name).is_none();
            if unmapped {
                log::debug!("skipping unmapped sheet {}", s.name);
            }
            unmapped
        })
        .count()
}

async fn run_file_transaction(
    source: &SourceFile,
    sheets: &[RawSheet],
    config: &ImportConfig,
    pool: &PgPool,
) -> Result<u64, FileFailure> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| FileFailure::file_level(ErrorKind::DatabaseError, e.to_string()))?;

    // Keys captured from parent sheets live exactly as long as this file.
    let mut propagator = KeyPropagator::new();
    let mut total_rows = 0u64;

    // Mapping declaration order is the processing order; configuration
    // guarantees parents precede their dependents.
    for mapping in &config.mappings {
        let Some(raw) = sheets.iter().find(|s| s.name == mapping.sheet) else {
            continue;
        };
        match process_sheet(&mut *tx, raw, mapping, config, &mut propagator).await {
            Ok(inserted) => total_rows += inserted,
            Err(failure) => {
                if let Err(err) = tx.rollback().await {
                    log::warn!("rollback failed for {}: {}", source.name, err);
                }
                return Err(failure);
            }
        }
    }

    tx.commit().await.map_err(|e| {
        FileFailure::file_level(ErrorKind::DatabaseError, format!("commit failed: {e}"))
    })?;
    Ok(total_rows)
}

async fn process_sheet(
    conn: &mut PgConnection,
    raw: &RawSheet,
    mapping: &SheetMapping,
    config: &ImportConfig,
    propagator: &mut KeyPropagator,
) -> Result<u64, FileFailure> {
    let required = config.required_columns(&raw.name);
    let unit = excel::normalize_sheet(raw, mapping, &required).map_err(|err| {
        let kind = match &err {
            NormalizeError::MissingHeader { .. } => ErrorKind::SheetHeader,
            NormalizeError::MissingColumns { .. } => ErrorKind::MissingColumns,
        };
        FileFailure::sheet_level(&raw.name, kind, err.to_string())
    })?;

    let mut unit = propagator
        .propagate(config, unit)
        .map_err(|err| FileFailure::from_propagation(&raw.name, err))?;

    if unit.rows.is_empty() {
        log::debug!("sheet {} has no data rows", raw.name);
        return Ok(0);
    }

    let returning = propagation::capture_key_column(config, &raw.name);
    let outcome = batch::insert_rows(
        conn,
        &unit.table_name,
        &unit.insert_columns,
        &unit.rows,
        config.batch_size,
        returning,
    )
    .await
    .map_err(|err| FileFailure::sheet_level(&raw.name, classify_db_error(&err), err.to_string()))?;

    if let Some(keys) = &outcome.generated_keys {
        propagator
            .capture(config, &unit, keys)
            .map_err(|err| FileFailure::from_propagation(&raw.name, err))?;
    }
    unit.inserted_rows = outcome.inserted;

    let batch_ms: u128 = outcome.timings.iter().map(|t| t.elapsed.as_millis()).sum();
    log::debug!(
        "sheet {}: {} rows into {} across {} batches ({} ms)",
        raw.name,
        unit.inserted_rows,
        unit.table_name,
        outcome.timings.len(),
        batch_ms
    );
    Ok(unit.inserted_rows)
}

/// SQLSTATE class 23 covers integrity constraint violations; everything
/// else stays a generic database failure.
fn classify_db_error(err: &sqlx::Error) -> ErrorKind {
    match err {
        sqlx::Error::Database(db) if db.code().is_some_and(|c| c.starts_with("23")) => {
            ErrorKind::ConstraintViolation
        }
        _ => ErrorKind::DatabaseError,
    }
}
