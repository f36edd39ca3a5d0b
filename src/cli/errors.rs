use std::path::PathBuf;

use thiserror::Error;

/// Application-specific errors for the CLI
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Work directory not found: {path:?}")]
    WorkDirNotFound { path: PathBuf },

    #[error("Configuration file not found: {path:?}")]
    ConfigNotFound { path: PathBuf },

    #[error(transparent)]
    Calval(#[from] flexcal::Error),
}
