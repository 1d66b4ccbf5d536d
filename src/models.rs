use chrono::{DateTime, SecondsFormat, Utc};
use serde::Serialize;
use std::path::PathBuf;

// ===== Cell Values =====

/// Normalized cell value after workbook ingestion.
///
/// Sequence columns are stripped before rows reach this representation;
/// foreign-key columns still hold their correlation values until the
/// propagator rewrites them.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Text(String),
    Integer(i64),
    Float(f64),
    Bool(bool),
    Timestamp(DateTime<Utc>),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Canonical string rendering used to match child rows against parent
    /// rows before the parent's generated key exists. Integral floats render
    /// without a fraction so `42` and `42.0` correlate, since spreadsheet
    /// cells do not distinguish the two.
    pub fn correlation_key(&self) -> String {
        match self {
            Value::Null => String::new(),
            Value::Text(s) => s.clone(),
            Value::Integer(i) => i.to_string(),
            Value::Float(f) if f.fract() == 0.0 => (*f as i64).to_string(),
            Value::Float(f) => f.to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Timestamp(ts) => ts.to_rfc3339(),
        }
    }
}

// ===== Rows and Sheets =====

/// One logical row: the original 1-based spreadsheet row position plus an
/// ordered (column, value) list matching the sheet's insert columns.
///
/// Records are immutable; foreign-key substitution produces a new record
/// via [`RowRecord::with_value`] instead of mutating in place.
#[derive(Debug, Clone)]
pub struct RowRecord {
    position: i64,
    columns: Vec<(String, Value)>,
}

impl RowRecord {
    pub fn new(position: i64, columns: Vec<(String, Value)>) -> Self {
        Self { position, columns }
    }

    pub fn position(&self) -> i64 {
        self.position
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.columns
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    pub fn values(&self) -> impl Iterator<Item = &Value> {
        self.columns.iter().map(|(_, value)| value)
    }

    /// Return a copy of this record with one column replaced.
    pub fn with_value(&self, column: &str, value: Value) -> Self {
        let columns = self
            .columns
            .iter()
            .map(|(name, old)| {
                if name == column {
                    (name.clone(), value.clone())
                } else {
                    (name.clone(), old.clone())
                }
            })
            .collect();
        Self {
            position: self.position,
            columns,
        }
    }
}

/// One sheet paired with its target-table mapping, ready for insertion.
#[derive(Debug, Clone)]
pub struct SheetUnit {
    pub sheet_name: String,
    pub table_name: String,
    /// Header-order column list with sequence columns already excluded.
    pub insert_columns: Vec<String>,
    pub rows: Vec<RowRecord>,
    pub inserted_rows: u64,
}

// ===== File Lifecycle =====

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Pending,
    Processing,
    Succeeded,
    Failed,
}

impl FileStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileStatus::Pending => "pending",
            FileStatus::Processing => "processing",
            FileStatus::Succeeded => "succeeded",
            FileStatus::Failed => "failed",
        }
    }
}

/// Processing context for one discovered workbook. Created at discovery
/// time, mutated only by the orchestrator, immutable once terminal.
#[derive(Debug, Clone)]
pub struct SourceFile {
    pub path: PathBuf,
    pub name: String,
    pub status: FileStatus,
    pub total_rows: u64,
    pub skipped_sheets: usize,
    pub error: Option<String>,
}

impl SourceFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            path,
            name,
            status: FileStatus::Pending,
            total_rows: 0,
            skipped_sheets: 0,
            error: None,
        }
    }
}

// ===== Error Records =====

/// Sheet label used when a failure is not attributable to one sheet.
pub const FILE_LEVEL_SHEET: &str = "<FILE_LEVEL>";

/// Row sentinel used when a failure is not attributable to one row.
pub const ROW_UNATTRIBUTED: i64 = -1;

/// Closed set of failure-kind labels written to the error log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorKind {
    ConstraintViolation,
    MissingColumns,
    SheetHeader,
    PropagationError,
    DatabaseError,
    WorkbookError,
}

impl ErrorKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorKind::ConstraintViolation => "CONSTRAINT_VIOLATION",
            ErrorKind::MissingColumns => "MISSING_COLUMNS",
            ErrorKind::SheetHeader => "SHEET_HEADER",
            ErrorKind::PropagationError => "PROPAGATION_ERROR",
            ErrorKind::DatabaseError => "DATABASE_ERROR",
            ErrorKind::WorkbookError => "WORKBOOK_ERROR",
        }
    }
}

/// One structured failure record, serialized as a single JSON line with
/// exactly these six keys.
#[derive(Debug, Clone, Serialize)]
pub struct ErrorEntry {
    pub timestamp: String,
    pub file: String,
    pub sheet: String,
    pub row: i64,
    #[serde(rename = "error_type")]
    pub kind: ErrorKind,
    #[serde(rename = "db_message")]
    pub message: String,
}

impl ErrorEntry {
    /// Build an entry stamped with the current UTC time (`Z`-suffixed).
    pub fn new(file: &str, sheet: &str, row: i64, kind: ErrorKind, message: String) -> Self {
        Self {
            timestamp: Utc::now().to_rfc3339_opts(SecondsFormat::Micros, true),
            file: file.to_string(),
            sheet: sheet.to_string(),
            row,
            kind,
            message,
        }
    }
}

// ===== Run Results =====

/// Per-file result, produced exactly once per file by the orchestrator.
#[derive(Debug, Clone)]
pub struct FileOutcome {
    pub file_name: String,
    pub status: FileStatus,
    pub rows_inserted: u64,
    pub sheets_skipped: usize,
    pub elapsed_seconds: f64,
}

/// Aggregate of all file outcomes plus wall-clock metrics for the run.
#[derive(Debug, Clone)]
pub struct RunSummary {
    pub outcomes: Vec<FileOutcome>,
    pub total_files: usize,
    pub success_files: usize,
    pub failed_files: usize,
    pub total_rows: u64,
    pub skipped_sheets: usize,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub elapsed_seconds: f64,
    pub throughput_rps: f64,
}
