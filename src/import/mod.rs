//! Spreadsheet-to-PostgreSQL import pipeline.
//!
//! The import system processes workbooks strictly sequentially through the
//! following components:
//!
//! - **`aggregator`**: discovers `.xlsx` files, runs every file through the
//!   orchestrator regardless of individual failures, and finalizes the run
//!   summary and SUMMARY contract line.
//!
//! - **`orchestrator`**: drives one file end-to-end inside a single
//!   transaction; commits on success, rolls the whole file back on the first
//!   sheet failure, and emits exactly one outcome plus one error-log flush
//!   per file.
//!
//! - **`propagation`**: decides which sheets must capture generated keys,
//!   correlates captured keys with natural-key values, and rewrites child
//!   foreign-key columns before batching.
//!
//! - **`batch`**: submits fixed-size chunks as single multi-row INSERT
//!   statements, optionally carrying a RETURNING clause, and reports
//!   per-chunk timing to the caller.
//!
//! - **`error_log`**: buffers structured error entries per file and writes
//!   them as JSON Lines through the shared error sink.
//!
//! # Data Flow
//!
//! 1. **Discovery**: scan the source directory for workbooks
//! 2. **Per file**: open a transaction, then for each configured sheet
//!    present in the workbook: normalize → propagate → batch-insert →
//!    capture keys for dependents
//! 3. **Terminal state**: commit or roll back, record errors, flush the
//!    per-file buffer once
//! 4. **Summary**: accumulate outcomes and render the SUMMARY line
//!
//! Ordering is a configuration contract: sheet mappings are processed in
//! declaration order, and every parent sheet must be declared before the
//! children that consume its generated keys.

pub mod aggregator;
pub mod batch;
pub mod error_log;
pub mod orchestrator;
pub mod propagation;

pub use aggregator::{discover_files, render_summary_line, run};
pub use error_log::{ErrorCollector, ErrorSink};
pub use orchestrator::process_file;
