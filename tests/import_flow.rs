//! End-to-end import scenarios against a disposable Postgres container.
//!
//! Every test provisions its own database and generates its own workbooks,
//! so they can run in parallel. Tests skip (rather than fail) when no
//! container runtime is available.

use std::path::{Path, PathBuf};

use rust_xlsxwriter::Workbook;
use sqlx::PgPool;
use tempfile::TempDir;

use sheetload::config::ImportConfig;
use sheetload::import::{self, ErrorSink};
use sheetload::models::FileStatus;
use sheetload::test_support::TestDatabase;

enum Cell<'a> {
    S(&'a str),
    N(f64),
    Blank,
}

fn add_sheet(workbook: &mut Workbook, name: &str, header: &[&str], rows: &[Vec<Cell>]) {
    let worksheet = workbook.add_worksheet();
    worksheet.set_name(name).unwrap();

    // row 1 is a title, row 2 the header, data from row 3
    worksheet.write_string(0, 0, format!("{name} import")).unwrap();
    for (col, title) in header.iter().enumerate() {
        worksheet.write_string(1, col as u16, *title).unwrap();
    }
    for (idx, row) in rows.iter().enumerate() {
        let row_num = (idx + 2) as u32;
        for (col, cell) in row.iter().enumerate() {
            match cell {
                Cell::S(s) => {
                    worksheet.write_string(row_num, col as u16, *s).unwrap();
                }
                Cell::N(n) => {
                    worksheet.write_number(row_num, col as u16, *n).unwrap();
                }
                Cell::Blank => {}
            }
        }
    }
}

fn save(workbook: &mut Workbook, dir: &Path, name: &str) -> PathBuf {
    let path = dir.join(name);
    workbook.save(&path).unwrap();
    path
}

async fn test_db() -> Option<TestDatabase> {
    match TestDatabase::new().await {
        Ok(db) => Some(db),
        Err(err) => {
            eprintln!("skipping: postgres container unavailable: {err:?}");
            None
        }
    }
}

async fn exec(pool: &PgPool, sql: &str) {
    sqlx::query(sql).execute(pool).await.expect(sql);
}

fn config_for(workspace: &TempDir, body: &str) -> ImportConfig {
    let toml = format!(
        "source_dir = \"{}\"\nlogs_dir = \"{}\"\n{}",
        workspace.path().join("data").display(),
        workspace.path().join("logs").display(),
        body
    );
    ImportConfig::from_toml(&toml).unwrap()
}

fn data_dir(workspace: &TempDir) -> PathBuf {
    let dir = workspace.path().join("data");
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

async fn run_import(
    config: &ImportConfig,
    pool: &PgPool,
) -> (sheetload::models::RunSummary, ErrorSink) {
    let files = import::discover_files(&config.source_dir).unwrap();
    let mut sink = ErrorSink::new(&config.logs_dir);
    let summary = import::run(&files, config, pool, &mut sink).await.unwrap();
    (summary, sink)
}

fn error_log_lines(sink: &ErrorSink) -> Vec<serde_json::Value> {
    let Some(path) = sink.path() else {
        return Vec::new();
    };
    std::fs::read_to_string(path)
        .unwrap()
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect()
}

#[tokio::test]
async fn two_files_without_propagation_commit_all_rows() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(&pool, "CREATE TABLE items (sku TEXT NOT NULL, qty DOUBLE PRECISION)").await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    for (file, skus) in [("a.xlsx", ["A-1", "A-2"]), ("b.xlsx", ["B-1", "B-2"])] {
        let mut wb = Workbook::new();
        add_sheet(
            &mut wb,
            "Items",
            &["sku", "qty"],
            &[
                vec![Cell::S(skus[0]), Cell::N(5.0)],
                vec![Cell::S(skus[1]), Cell::N(7.0)],
            ],
        );
        save(&mut wb, &dir, file);
    }

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Items"
        table = "items"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.total_files, 2);
    assert_eq!(summary.success_files, 2);
    assert_eq!(summary.failed_files, 0);
    assert_eq!(summary.total_rows, 4);
    assert_eq!(summary.skipped_sheets, 0);

    let line = import::render_summary_line(&summary);
    assert!(
        line.starts_with("SUMMARY files=2/2 success=2 failed=0 rows=4 skipped_sheets=0"),
        "unexpected summary line: {line}"
    );

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(count, 4);
    // clean run leaves no error log behind
    assert!(sink.path().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn parent_and_child_commit_in_one_transaction_with_propagated_keys() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(
        &pool,
        "CREATE TABLE customers (id BIGSERIAL PRIMARY KEY, code TEXT NOT NULL, name TEXT)",
    )
    .await;
    exec(
        &pool,
        "CREATE TABLE orders (customer_id BIGINT NOT NULL REFERENCES customers(id), \
         code_ref TEXT NOT NULL, amount DOUBLE PRECISION)",
    )
    .await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    let mut wb = Workbook::new();
    add_sheet(
        &mut wb,
        "Customers",
        &["id", "code", "name"],
        &[
            vec![Cell::Blank, Cell::S("C-1"), Cell::S("Acme")],
            vec![Cell::Blank, Cell::S("C-2"), Cell::S("Globex")],
            vec![Cell::Blank, Cell::S("C-3"), Cell::S("Initech")],
        ],
    );
    add_sheet(
        &mut wb,
        "Orders",
        &["customer_id", "code_ref", "amount"],
        &[
            vec![Cell::S("C-2"), Cell::S("C-2"), Cell::N(10.0)],
            vec![Cell::S("C-1"), Cell::S("C-1"), Cell::N(20.0)],
            vec![Cell::S("C-3"), Cell::S("C-3"), Cell::N(30.0)],
            vec![Cell::S("C-2"), Cell::S("C-2"), Cell::N(40.0)],
        ],
    );
    save(&mut wb, &dir, "orders.xlsx");

    // batch_size 2 forces multiple chunks through the RETURNING path
    let config = config_for(
        &workspace,
        r#"
        batch_size = 2

        [[sheets]]
        sheet = "Customers"
        table = "customers"
        sequence_columns = ["id"]

        [[sheets]]
        sheet = "Orders"
        table = "orders"
        fk_columns = ["customer_id"]

        [[propagations]]
        parent_sheet = "Customers"
        parent_key_column = "id"
        parent_match_column = "code"
        child_sheet = "Orders"
        child_fk_column = "customer_id"
        "#,
    );

    let (summary, _sink) = run_import(&config, &pool).await;

    assert_eq!(summary.success_files, 1);
    assert_eq!(summary.failed_files, 0);
    assert_eq!(summary.total_rows, 7);
    assert_eq!(summary.outcomes[0].status, FileStatus::Succeeded);

    // every child row points at the parent row that carried its code
    let matched: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM orders o JOIN customers c ON c.id = o.customer_id \
         WHERE c.code = o.code_ref",
    )
    .fetch_one(&pool)
    .await
    .unwrap();
    assert_eq!(matched, 4);

    db.close().await.unwrap();
}

#[tokio::test]
async fn constraint_violation_rolls_back_whole_file_but_not_the_run() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(&pool, "CREATE TABLE items (sku TEXT PRIMARY KEY, qty DOUBLE PRECISION)").await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);

    let mut good = Workbook::new();
    add_sheet(
        &mut good,
        "Items",
        &["sku", "qty"],
        &[
            vec![Cell::S("A-1"), Cell::N(1.0)],
            vec![Cell::S("A-2"), Cell::N(2.0)],
        ],
    );
    save(&mut good, &dir, "a_good.xlsx");

    let mut bad = Workbook::new();
    add_sheet(
        &mut bad,
        "Items",
        &["sku", "qty"],
        &[
            vec![Cell::S("B-1"), Cell::N(1.0)],
            // duplicate key within the same file
            vec![Cell::S("B-1"), Cell::N(2.0)],
            vec![Cell::S("B-2"), Cell::N(3.0)],
        ],
    );
    save(&mut bad, &dir, "b_bad.xlsx");

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Items"
        table = "items"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.success_files, 1);
    assert_eq!(summary.failed_files, 1);
    assert_eq!(summary.total_rows, 2);

    // atomicity: nothing from the failed file is visible
    let b_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE sku LIKE 'B-%'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(b_rows, 0);
    let a_rows: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM items WHERE sku LIKE 'A-%'")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(a_rows, 2);

    // error/outcome consistency: the failed file has exactly one entry
    let entries = error_log_lines(&sink);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["file"], "b_bad.xlsx");
    assert_eq!(entries[0]["error_type"], "CONSTRAINT_VIOLATION");
    assert_eq!(entries[0]["row"], -1);
    assert!(entries[0]["timestamp"].as_str().unwrap().ends_with('Z'));

    db.close().await.unwrap();
}

#[tokio::test]
async fn unmapped_sheets_are_counted_not_failed() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(&pool, "CREATE TABLE items (sku TEXT NOT NULL)").await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    let mut wb = Workbook::new();
    add_sheet(&mut wb, "Scratch", &["whatever"], &[vec![Cell::S("x")]]);
    add_sheet(&mut wb, "Items", &["sku"], &[vec![Cell::S("A-1")]]);
    save(&mut wb, &dir, "mixed.xlsx");

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Items"
        table = "items"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.success_files, 1);
    assert_eq!(summary.total_rows, 1);
    assert_eq!(summary.skipped_sheets, 1);
    assert_eq!(summary.outcomes[0].status, FileStatus::Succeeded);
    assert!(sink.path().is_none());

    db.close().await.unwrap();
}

#[tokio::test]
async fn propagation_miss_fails_the_file_and_rolls_back_the_parent() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(
        &pool,
        "CREATE TABLE customers (id BIGSERIAL PRIMARY KEY, code TEXT NOT NULL)",
    )
    .await;
    exec(
        &pool,
        "CREATE TABLE orders (customer_id BIGINT NOT NULL, amount DOUBLE PRECISION)",
    )
    .await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    let mut wb = Workbook::new();
    add_sheet(
        &mut wb,
        "Customers",
        &["id", "code"],
        &[vec![Cell::Blank, Cell::S("C-1")]],
    );
    add_sheet(
        &mut wb,
        "Orders",
        &["customer_id", "amount"],
        &[
            vec![Cell::S("C-1"), Cell::N(10.0)],
            // no parent row carries C-9
            vec![Cell::S("C-9"), Cell::N(20.0)],
        ],
    );
    save(&mut wb, &dir, "orphan.xlsx");

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Customers"
        table = "customers"
        sequence_columns = ["id"]

        [[sheets]]
        sheet = "Orders"
        table = "orders"
        fk_columns = ["customer_id"]

        [[propagations]]
        parent_sheet = "Customers"
        parent_key_column = "id"
        parent_match_column = "code"
        child_sheet = "Orders"
        child_fk_column = "customer_id"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.failed_files, 1);
    assert_eq!(summary.total_rows, 0);

    // the parent insert was rolled back with the rest of the file
    let customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(customers, 0);

    let entries = error_log_lines(&sink);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["error_type"], "PROPAGATION_ERROR");
    assert_eq!(entries[0]["sheet"], "Orders");
    // second data row sits at spreadsheet row 4
    assert_eq!(entries[0]["row"], 4);

    db.close().await.unwrap();
}

#[tokio::test]
async fn missing_required_column_fails_before_touching_the_database() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(
        &pool,
        "CREATE TABLE orders (customer_id BIGINT, amount DOUBLE PRECISION)",
    )
    .await;
    exec(
        &pool,
        "CREATE TABLE customers (id BIGSERIAL PRIMARY KEY, code TEXT)",
    )
    .await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    let mut wb = Workbook::new();
    // parent sheet lacks the configured correlation column entirely
    add_sheet(
        &mut wb,
        "Customers",
        &["id", "name"],
        &[vec![Cell::Blank, Cell::S("Acme")]],
    );
    add_sheet(
        &mut wb,
        "Orders",
        &["customer_id", "amount"],
        &[vec![Cell::S("C-1"), Cell::N(10.0)]],
    );
    save(&mut wb, &dir, "broken.xlsx");

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Customers"
        table = "customers"
        sequence_columns = ["id"]

        [[sheets]]
        sheet = "Orders"
        table = "orders"
        fk_columns = ["customer_id"]

        [[propagations]]
        parent_sheet = "Customers"
        parent_key_column = "id"
        parent_match_column = "code"
        child_sheet = "Orders"
        child_fk_column = "customer_id"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.failed_files, 1);
    let entries = error_log_lines(&sink);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["error_type"], "MISSING_COLUMNS");
    assert_eq!(entries[0]["sheet"], "Customers");
    assert_eq!(entries[0]["row"], -1);

    let customers: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM customers")
        .fetch_one(&pool)
        .await
        .unwrap();
    assert_eq!(customers, 0);

    db.close().await.unwrap();
}

#[tokio::test]
async fn corrupt_workbook_is_file_fatal_with_a_file_level_entry() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();
    exec(&pool, "CREATE TABLE items (sku TEXT NOT NULL)").await;

    let workspace = TempDir::new().unwrap();
    let dir = data_dir(&workspace);
    std::fs::write(dir.join("corrupt.xlsx"), b"not a workbook").unwrap();

    let mut good = Workbook::new();
    add_sheet(&mut good, "Items", &["sku"], &[vec![Cell::S("A-1")]]);
    save(&mut good, &dir, "good.xlsx");

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Items"
        table = "items"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    // the corrupt file fails alone; the run continues to the good one
    assert_eq!(summary.success_files, 1);
    assert_eq!(summary.failed_files, 1);
    assert_eq!(summary.total_rows, 1);

    let entries = error_log_lines(&sink);
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0]["file"], "corrupt.xlsx");
    assert_eq!(entries[0]["sheet"], "<FILE_LEVEL>");
    assert_eq!(entries[0]["error_type"], "WORKBOOK_ERROR");
    assert_eq!(entries[0]["row"], -1);

    db.close().await.unwrap();
}

#[tokio::test]
async fn empty_directory_yields_an_empty_successful_summary() {
    let Some(db) = test_db().await else { return };
    let pool = db.pool_clone();

    let workspace = TempDir::new().unwrap();
    data_dir(&workspace);

    let config = config_for(
        &workspace,
        r#"
        [[sheets]]
        sheet = "Items"
        table = "items"
        "#,
    );

    let (summary, sink) = run_import(&config, &pool).await;

    assert_eq!(summary.total_files, 0);
    assert_eq!(summary.total_rows, 0);
    assert_eq!(summary.throughput_rps, 0.0);
    let line = import::render_summary_line(&summary);
    assert!(
        line.starts_with("SUMMARY files=0/0 success=0 failed=0 rows=0 skipped_sheets=0"),
        "unexpected summary line: {line}"
    );
    assert!(line.ends_with("throughput_rps=0"), "unexpected summary line: {line}");
    assert!(sink.path().is_none());

    db.close().await.unwrap();
}
