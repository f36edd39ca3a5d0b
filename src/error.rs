//! Crate-level error type and `Result` alias for stable, structured error handling.
//! Converts underlying I/O, GDAL, product reader and CSV/JSON errors, and provides
//! semantic variants for catalog validation, acquisition matching and processing failures.
use std::path::PathBuf;

use thiserror::Error;

use crate::core::processing::locate::LocateError;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("GDAL error: {0}")]
    Gdal(#[from] crate::io::GdalError),

    #[error("Sentinel-2 product error: {0}")]
    Product(#[from] crate::io::ProductError),

    #[error("FLEX product error: {0}")]
    Flex(#[from] crate::io::FlexError),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Locate(#[from] LocateError),

    #[error("Missing input: {0:?}")]
    MissingInput(PathBuf),

    #[error("Missing column `{column}` in {file}")]
    MissingColumn { file: String, column: String },

    #[error("Site {site}: {field}={value} is out of range ({expected})")]
    OutOfRange {
        site: String,
        field: &'static str,
        value: String,
        expected: &'static str,
    },

    #[error("Duplicate site code: {0}")]
    DuplicateSite(String),

    #[error("CRS mismatch: {left} vs {right}")]
    CrsMismatch { left: String, right: String },

    #[error("Invalid argument: {arg}={value}")]
    InvalidArgument { arg: &'static str, value: String },

    #[error("Processing error: {0}")]
    Processing(String),
}

impl Error {
    /// Errors that must stop the whole run instead of skipping one item.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            Error::CrsMismatch { .. }
                | Error::MissingInput(_)
                | Error::MissingColumn { .. }
                | Error::DuplicateSite(_)
        )
    }
}
