//! Generated-key capture and foreign-key propagation between sheets.
//!
//! A sheet pays for key capture only when another sheet's propagation
//! configuration references it as a parent. Captured keys are correlated
//! through a natural-key column shared between parent and child source data,
//! because the database-generated value cannot be known before insertion.
//! Child foreign-key slots hold correlation values, never literals; they are
//! rewritten through the captured map before batching.

use crate::config::ImportConfig;
use crate::models::{RowRecord, SheetUnit, Value};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PropagationError {
    #[error("row {row}: no parent key for {column}='{correlation}'")]
    UnmatchedCorrelation {
        row: i64,
        column: String,
        correlation: String,
    },
    #[error("sheet '{sheet}' has no '{column}' column to correlate captured keys")]
    MissingMatchColumn { sheet: String, column: String },
}

/// True when some other sheet's propagation names `sheet` as its parent.
pub fn needs_capture(config: &ImportConfig, sheet: &str) -> bool {
    config.propagations.iter().any(|p| p.parent_sheet == sheet)
}

/// Generated column to request back via RETURNING, if capture is needed.
/// Config validation guarantees all propagations sharing a parent agree.
pub fn capture_key_column<'a>(config: &'a ImportConfig, sheet: &str) -> Option<&'a str> {
    config
        .propagations
        .iter()
        .find(|p| p.parent_sheet == sheet)
        .map(|p| p.parent_key_column.as_str())
}

/// Holds every generated-key map for one file's processing lifetime,
/// keyed by (parent sheet, correlation column). Discarded with the file.
#[derive(Debug, Default)]
pub struct KeyPropagator {
    maps: HashMap<(String, String), HashMap<String, i64>>,
}

impl KeyPropagator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Associate each captured key with the correlation value of its row.
    /// `keys` comes from the insert's RETURNING clause in insertion order,
    /// so a positional zip against the unit's rows is sound.
    pub fn capture(
        &mut self,
        config: &ImportConfig,
        unit: &SheetUnit,
        keys: &[i64],
    ) -> Result<(), PropagationError> {
        if keys.len() != unit.rows.len() {
            log::warn!(
                "sheet {}: captured {} keys for {} rows",
                unit.sheet_name,
                keys.len(),
                unit.rows.len()
            );
        }

        for p in &config.propagations {
            if p.parent_sheet != unit.sheet_name {
                continue;
            }
            let map_key = (p.parent_sheet.clone(), p.parent_match_column.clone());
            if self.maps.contains_key(&map_key) {
                continue;
            }

            let mut map = HashMap::with_capacity(keys.len());
            for (row, key) in unit.rows.iter().zip(keys) {
                let correlation = row
                    .get(&p.parent_match_column)
                    .ok_or_else(|| PropagationError::MissingMatchColumn {
                        sheet: unit.sheet_name.clone(),
                        column: p.parent_match_column.clone(),
                    })?
                    .correlation_key();
                if map.insert(correlation.clone(), *key).is_some() {
                    log::warn!(
                        "sheet {}: duplicate correlation value '{}' in column {}; last row wins",
                        unit.sheet_name,
                        correlation,
                        p.parent_match_column
                    );
                }
            }
            self.maps.insert(map_key, map);
        }

        Ok(())
    }

    /// Rewrite every configured foreign-key column of `unit` from the
    /// captured maps. Returns a new unit; row records are never mutated in
    /// place. A correlation value absent from its map fails the file,
    /// attributed to the offending row's position.
    pub fn propagate(
        &self,
        config: &ImportConfig,
        mut unit: SheetUnit,
    ) -> Result<SheetUnit, PropagationError> {
        for p in &config.propagations {
            if p.child_sheet != unit.sheet_name {
                continue;
            }
            let map = self
                .maps
                .get(&(p.parent_sheet.clone(), p.parent_match_column.clone()));

            let mut rewritten = Vec::with_capacity(unit.rows.len());
            for row in &unit.rows {
                rewritten.push(rewrite_row(row, &p.child_fk_column, map)?);
            }
            unit.rows = rewritten;
        }
        Ok(unit)
    }
}

fn rewrite_row(
    row: &RowRecord,
    fk_column: &str,
    map: Option<&HashMap<String, i64>>,
) -> Result<RowRecord, PropagationError> {
    let correlation = row
        .get(fk_column)
        .map(Value::correlation_key)
        .unwrap_or_default();
    let key = map.and_then(|m| m.get(&correlation)).ok_or_else(|| {
        PropagationError::UnmatchedCorrelation {
            row: row.position(),
            column: fk_column.to_string(),
            correlation: correlation.clone(),
        }
    })?;
    Ok(row.with_value(fk_column, Value::Integer(*key)))
}
