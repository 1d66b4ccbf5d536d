//! Bulk database insert operations.
//!
//! Rows are grouped into fixed-size chunks and each chunk is submitted as a
//! single multi-row INSERT built with [`QueryBuilder`], since the column set
//! comes from configuration and is not known at compile time. A chunk fails
//! as a whole; there is no shrink-and-retry. When generated keys are needed
//! the statement carries a RETURNING clause so capture costs no extra round
//! trip, and key order matches insertion order for zipping against
//! correlation values.

use crate::models::{RowRecord, Value};
use chrono::{DateTime, Utc};
use sqlx::{PgConnection, Postgres, QueryBuilder};
use std::time::{Duration, Instant};

/// Wall-clock cost of one submitted chunk. The batcher reports these to the
/// caller instead of owning any global metrics state.
#[derive(Debug, Clone)]
pub struct BatchTiming {
    pub rows: usize,
    pub started_at: DateTime<Utc>,
    pub elapsed: Duration,
}

/// Result of inserting one sheet's rows.
#[derive(Debug, Clone)]
pub struct InsertOutcome {
    pub inserted: u64,
    /// Generated key per inserted row, in insertion order. `Some` only when
    /// the caller requested capture.
    pub generated_keys: Option<Vec<i64>>,
    pub timings: Vec<BatchTiming>,
}

/// Insert `rows` into `table` in chunks of `batch_size`.
///
/// `returning` names the generated column to capture; `None` skips the
/// RETURNING clause entirely so sheets without dependents never pay for it.
pub async fn insert_rows(
    conn: &mut PgConnection,
    table: &str,
    columns: &[String],
    rows: &[RowRecord],
    batch_size: usize,
    returning: Option<&str>,
) -> Result<InsertOutcome, sqlx::Error> {
    let mut outcome = InsertOutcome {
        inserted: 0,
        generated_keys: returning.map(|_| Vec::with_capacity(rows.len())),
        timings: Vec::new(),
    };
    if rows.is_empty() {
        return Ok(outcome);
    }

    for chunk in rows.chunks(batch_size.max(1)) {
        let mut builder = build_statement(table, columns, chunk, returning);

        let started_at = Utc::now();
        let timer = Instant::now();

        match &mut outcome.generated_keys {
            Some(keys) => {
                let chunk_keys: Vec<i64> =
                    builder.build_query_scalar().fetch_all(&mut *conn).await?;
                outcome.inserted += chunk_keys.len() as u64;
                keys.extend(chunk_keys);
            }
            None => {
                let result = builder.build().execute(&mut *conn).await?;
                outcome.inserted += result.rows_affected();
            }
        }

        let elapsed = timer.elapsed();
        log::trace!(
            "bulk inserted {} rows into {} in {} ms",
            chunk.len(),
            table,
            elapsed.as_millis()
        );
        outcome.timings.push(BatchTiming {
            rows: chunk.len(),
            started_at,
            elapsed,
        });
    }

    Ok(outcome)
}

fn build_statement<'a>(
    table: &str,
    columns: &[String],
    chunk: &'a [RowRecord],
    returning: Option<&str>,
) -> QueryBuilder<'a, Postgres> {
    let mut builder = QueryBuilder::new("INSERT INTO ");
    builder.push(quote_table(table));
    builder.push(" (");
    {
        let mut sep = builder.separated(", ");
        for column in columns {
            sep.push(quote_ident(column));
        }
    }
    builder.push(") ");

    builder.push_values(chunk, |mut b, row| {
        for value in row.values() {
            match value {
                // literal NULL lets the target column supply the type
                Value::Null => {
                    b.push("NULL");
                }
                Value::Text(s) => {
                    b.push_bind(s.as_str());
                }
                Value::Integer(i) => {
                    b.push_bind(*i);
                }
                Value::Float(f) => {
                    b.push_bind(*f);
                }
                Value::Bool(v) => {
                    b.push_bind(*v);
                }
                Value::Timestamp(ts) => {
                    b.push_bind(*ts);
                }
            }
        }
    });

    if let Some(key_column) = returning {
        builder.push(" RETURNING ");
        builder.push(quote_ident(key_column));
    }

    builder
}

fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Quote each dot-separated segment so schema-qualified tables work.
fn quote_table(name: &str) -> String {
    name.split('.')
        .map(quote_ident)
        .collect::<Vec<_>>()
        .join(".")
}
