//! Output writers: CSV report tables, GeoTIFF interim rasters and the JSON run summary.
pub mod metadata;
pub mod reports;
pub mod tiff;

pub use metadata::{RunCounters, RunSummary, write_run_summary};
pub use reports::{CsvTable, FlexMetricsRow, MatchupRecord, MetricValues, NOT_AVAILABLE, ValidationRow};
