//! Import configuration: sheet/table mappings, key propagation wiring, and
//! database connection fallbacks, loaded from a TOML file.
//!
//! The loader performs structural validation up front so the import core can
//! assume a well-formed configuration: every propagation entry must reference
//! configured sheets and columns, and every parent sheet must be declared
//! before the children that depend on its generated keys.

use crate::models::Value;
use serde::Deserialize;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config file not found: {0}")]
    NotFound(PathBuf),
    #[error("failed reading {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("invalid toml: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Database connection fallbacks. Environment variables take precedence;
/// see [`crate::db::resolve_database_url`] for the resolution order.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DatabaseConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub user: Option<String>,
    pub password: Option<String>,
    pub database: Option<String>,
    pub url: Option<String>,
}

/// Mapping of one workbook sheet onto one target table.
#[derive(Debug, Clone)]
pub struct SheetMapping {
    pub sheet: String,
    pub table: String,
    /// Database-generated columns; source values are discarded and the
    /// columns are excluded from the insert column set entirely.
    pub sequence_columns: HashSet<String>,
    /// Foreign-key columns overwritten from a parent sheet's generated keys.
    /// Their source values are correlation lookup keys, not literals.
    pub fk_columns: HashSet<String>,
    /// String cell values treated as NULL (compared case-sensitively
    /// after trimming).
    pub null_sentinels: HashSet<String>,
    /// Per-column values applied when a cell is empty.
    pub defaults: HashMap<String, Value>,
}

/// One parent-to-child generated-key dependency.
#[derive(Debug, Clone)]
pub struct Propagation {
    pub parent_sheet: String,
    /// Generated column captured from the parent insert via RETURNING.
    pub parent_key_column: String,
    /// Natural-key column present in the parent's source data; its values
    /// correlate parent rows with child rows.
    pub parent_match_column: String,
    pub child_sheet: String,
    /// Child column whose source value is the correlation key, rewritten to
    /// the parent's generated key before insertion.
    pub child_fk_column: String,
}

#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub source_dir: PathBuf,
    pub batch_size: usize,
    pub logs_dir: PathBuf,
    pub database: DatabaseConfig,
    /// Declaration order doubles as processing order; parents come first.
    pub mappings: Vec<SheetMapping>,
    pub propagations: Vec<Propagation>,
}

impl ImportConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Err(ConfigError::NotFound(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        let raw: RawConfig = toml::from_str(text)?;
        raw.validate()
    }

    pub fn mapping_for(&self, sheet: &str) -> Option<&SheetMapping> {
        self.mappings.iter().find(|m| m.sheet == sheet)
    }

    /// Columns that must exist in a sheet's header beyond what the header
    /// itself defines: foreign-key slots and any correlation column another
    /// sheet's propagation reads from this one.
    pub fn required_columns(&self, sheet: &str) -> HashSet<String> {
        let mut required: HashSet<String> = self
            .mapping_for(sheet)
            .map(|m| m.fk_columns.iter().cloned().collect())
            .unwrap_or_default();
        for p in &self.propagations {
            if p.parent_sheet == sheet {
                required.insert(p.parent_match_column.clone());
            }
        }
        required
    }
}

// ===== Raw (serde) layer =====

fn default_batch_size() -> usize {
    1000
}

fn default_logs_dir() -> PathBuf {
    PathBuf::from("logs")
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawConfig {
    source_dir: PathBuf,
    #[serde(default = "default_batch_size")]
    batch_size: usize,
    #[serde(default = "default_logs_dir")]
    logs_dir: PathBuf,
    #[serde(default)]
    database: DatabaseConfig,
    #[serde(default)]
    sheets: Vec<RawSheetMapping>,
    #[serde(default)]
    propagations: Vec<RawPropagation>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawSheetMapping {
    sheet: String,
    table: String,
    #[serde(default)]
    sequence_columns: Vec<String>,
    #[serde(default)]
    fk_columns: Vec<String>,
    #[serde(default)]
    null_sentinels: Vec<String>,
    #[serde(default)]
    defaults: HashMap<String, toml::Value>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
struct RawPropagation {
    parent_sheet: String,
    parent_key_column: String,
    parent_match_column: String,
    child_sheet: String,
    child_fk_column: String,
}

impl RawConfig {
    fn validate(self) -> Result<ImportConfig, ConfigError> {
        if self.batch_size == 0 {
            return Err(ConfigError::Invalid("batch_size must be at least 1".into()));
        }
        if self.sheets.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one [[sheets]] mapping is required".into(),
            ));
        }

        let mut seen = HashSet::new();
        let mut mappings = Vec::with_capacity(self.sheets.len());
        for raw in self.sheets {
            if raw.table.trim().is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "sheet '{}' maps to an empty table name",
                    raw.sheet
                )));
            }
            if !seen.insert(raw.sheet.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "sheet '{}' is mapped more than once",
                    raw.sheet
                )));
            }
            let sequence_columns: HashSet<String> = raw.sequence_columns.into_iter().collect();
            let fk_columns: HashSet<String> = raw.fk_columns.into_iter().collect();
            if let Some(overlap) = sequence_columns.intersection(&fk_columns).next() {
                return Err(ConfigError::Invalid(format!(
                    "sheet '{}': column '{}' cannot be both a sequence and a foreign-key column",
                    raw.sheet, overlap
                )));
            }
            let mut defaults = HashMap::new();
            for (column, value) in raw.defaults {
                defaults.insert(column, convert_default(&raw.sheet, value)?);
            }
            mappings.push(SheetMapping {
                sheet: raw.sheet,
                table: raw.table,
                sequence_columns,
                fk_columns,
                null_sentinels: raw.null_sentinels.into_iter().collect(),
                defaults,
            });
        }

        let index_of = |sheet: &str| mappings.iter().position(|m| m.sheet == sheet);
        let mut parent_keys: HashMap<String, String> = HashMap::new();
        let mut propagations = Vec::with_capacity(self.propagations.len());
        for raw in self.propagations {
            let parent_idx = index_of(&raw.parent_sheet).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "propagation references unmapped parent sheet '{}'",
                    raw.parent_sheet
                ))
            })?;
            let child_idx = index_of(&raw.child_sheet).ok_or_else(|| {
                ConfigError::Invalid(format!(
                    "propagation references unmapped child sheet '{}'",
                    raw.child_sheet
                ))
            })?;
            if parent_idx >= child_idx {
                return Err(ConfigError::Invalid(format!(
                    "parent sheet '{}' must be declared before child sheet '{}'",
                    raw.parent_sheet, raw.child_sheet
                )));
            }
            let parent = &mappings[parent_idx];
            if !parent.sequence_columns.contains(&raw.parent_key_column) {
                return Err(ConfigError::Invalid(format!(
                    "parent key column '{}' is not a sequence column of sheet '{}'",
                    raw.parent_key_column, raw.parent_sheet
                )));
            }
            if parent.sequence_columns.contains(&raw.parent_match_column) {
                return Err(ConfigError::Invalid(format!(
                    "match column '{}' of sheet '{}' cannot be a sequence column",
                    raw.parent_match_column, raw.parent_sheet
                )));
            }
            let child = &mappings[child_idx];
            if !child.fk_columns.contains(&raw.child_fk_column) {
                return Err(ConfigError::Invalid(format!(
                    "column '{}' is not declared in fk_columns of sheet '{}'",
                    raw.child_fk_column, raw.child_sheet
                )));
            }
            // One RETURNING column per parent insert; mixed key columns on
            // the same parent cannot be captured in a single statement.
            match parent_keys.get(&raw.parent_sheet) {
                Some(existing) if existing != &raw.parent_key_column => {
                    return Err(ConfigError::Invalid(format!(
                        "sheet '{}' is referenced with conflicting key columns '{}' and '{}'",
                        raw.parent_sheet, existing, raw.parent_key_column
                    )));
                }
                _ => {
                    parent_keys.insert(raw.parent_sheet.clone(), raw.parent_key_column.clone());
                }
            }
            propagations.push(Propagation {
                parent_sheet: raw.parent_sheet,
                parent_key_column: raw.parent_key_column,
                parent_match_column: raw.parent_match_column,
                child_sheet: raw.child_sheet,
                child_fk_column: raw.child_fk_column,
            });
        }

        Ok(ImportConfig {
            source_dir: self.source_dir,
            batch_size: self.batch_size,
            logs_dir: self.logs_dir,
            database: self.database,
            mappings,
            propagations,
        })
    }
}

fn convert_default(sheet: &str, value: toml::Value) -> Result<Value, ConfigError> {
    match value {
        toml::Value::String(s) => Ok(Value::Text(s)),
        toml::Value::Integer(i) => Ok(Value::Integer(i)),
        toml::Value::Float(f) => Ok(Value::Float(f)),
        toml::Value::Boolean(b) => Ok(Value::Bool(b)),
        other => Err(ConfigError::Invalid(format!(
            "sheet '{}': unsupported default value type: {}",
            sheet,
            other.type_str()
        ))),
    }
}
