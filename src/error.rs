use crate::config::ConfigError;
use std::path::PathBuf;
use thiserror::Error;

/// Run-fatal errors: conditions that prevent a run from starting or from
/// completing its accounting. Per-file failures never surface here; they are
/// converted into error-log entries and a failed outcome instead.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("config error: {0}")]
    Config(#[from] ConfigError),
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),
    #[error("source directory not found: {0}")]
    SourceDirMissing(PathBuf),
    #[error("failed reading source directory {path}: {source}")]
    SourceDirUnreadable {
        path: PathBuf,
        source: std::io::Error,
    },
    /// Losing error evidence undermines the partial-failure contract, so a
    /// failed error-log flush aborts the run rather than being dropped.
    #[error("error log flush failed: {0}")]
    ErrorSink(std::io::Error),
}
