use std::path::PathBuf;

use clap::Parser;

use sheetload::config::ImportConfig;
use sheetload::error::LoadError;
use sheetload::import::ErrorSink;
use sheetload::{db, excel, import};

#[derive(Parser, Debug)]
#[command(
    name = "sheetload",
    about = "Bulk-load Excel workbooks into PostgreSQL"
)]
struct Args {
    /// Path to the import configuration file.
    #[arg(long, default_value = "config/import.toml")]
    config: PathBuf,

    /// Override the configured source directory.
    #[arg(long)]
    source_dir: Option<PathBuf>,

    /// Enable debug logging.
    #[arg(long)]
    debug: bool,

    /// Print sheet headers and sample rows, then exit without touching the
    /// database.
    #[arg(long)]
    inspect_data: bool,
}

const EXIT_ALL_SUCCEEDED: i32 = 0;
const EXIT_RUN_FATAL: i32 = 1;
const EXIT_SOME_FAILED: i32 = 2;

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let default_filter = if args.debug { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_filter))
        .init();

    let code = match execute(args).await {
        Ok(code) => code,
        Err(err) => {
            log::error!("{err}");
            EXIT_RUN_FATAL
        }
    };
    std::process::exit(code);
}

async fn execute(args: Args) -> Result<i32, LoadError> {
    let mut config = ImportConfig::load(&args.config)?;
    if let Some(dir) = args.source_dir {
        config.source_dir = dir;
    }

    let files = import::discover_files(&config.source_dir)?;

    if args.inspect_data {
        inspect_data(&files);
        return Ok(EXIT_ALL_SUCCEEDED);
    }

    log::info!(
        "processing {} files from {}",
        files.len(),
        config.source_dir.display()
    );

    let pool = db::connect(&config.database).await?;

    let mut sink = ErrorSink::new(&config.logs_dir);
    let summary = import::run(&files, &config, &pool, &mut sink).await?;

    if let Some(path) = sink.path() {
        log::info!("error log written to {}", path.display());
    }
    println!("{}", import::render_summary_line(&summary));

    if summary.failed_files > 0 {
        Ok(EXIT_SOME_FAILED)
    } else {
        Ok(EXIT_ALL_SUCCEEDED)
    }
}

/// Dump headers and the first few data rows of every discovered workbook.
fn inspect_data(files: &[PathBuf]) {
    for path in files {
        println!("FILE: {}", path.display());
        let sheets = match excel::read_workbook(path) {
            Ok(sheets) => sheets,
            Err(err) => {
                println!("  read error: {err}");
                continue;
            }
        };
        for raw in sheets {
            match excel::header_row(&raw) {
                Some(header) => {
                    println!("  SHEET: {} cols={:?}", raw.name, header);
                    for row in raw.rows.iter().skip(2).take(3) {
                        println!("    {row:?}");
                    }
                }
                None => println!("  SHEET: {} (no header row)", raw.name),
            }
        }
    }
}
