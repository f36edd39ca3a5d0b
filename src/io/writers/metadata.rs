use chrono::Utc;
use gdal::Dataset;
use gdal::Metadata;
use serde::Serialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::core::params::CalValParams;
use crate::error::Result;
use crate::io::gdal::GdalError;

/// Embed key/value metadata items into a GeoTIFF dataset (default domain)
pub fn embed_raster_metadata(
    ds: &mut Dataset,
    metadata: &BTreeMap<String, String>,
) -> std::result::Result<(), GdalError> {
    for (key, value) in metadata {
        ds.set_metadata_item(key, value, "")?;
    }
    ds.set_metadata_item("SOFTWARE", concat!("flexcal ", env!("CARGO_PKG_VERSION")), "")?;
    Ok(())
}

/// Counters of one run.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunCounters {
    pub sites: usize,
    pub flex_images: usize,
    pub processed: usize,
    pub skipped: usize,
    pub errors: usize,
    pub matchups: usize,
}

/// Effective configuration and outcome of a run, written next to the reports.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub tool: String,
    pub version: String,
    pub finished_at: String,
    pub work_dir: PathBuf,
    pub params: CalValParams,
    pub counters: RunCounters,
    pub outputs: Vec<PathBuf>,
}

impl RunSummary {
    pub fn new(
        work_dir: &Path,
        params: &CalValParams,
        counters: RunCounters,
        outputs: Vec<PathBuf>,
    ) -> Self {
        Self {
            tool: env!("CARGO_PKG_NAME").to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            finished_at: Utc::now().to_rfc3339(),
            work_dir: work_dir.to_path_buf(),
            params: params.clone(),
            counters,
            outputs,
        }
    }
}

/// Create the `run_summary.json` sidecar
pub fn write_run_summary(path: &Path, summary: &RunSummary) -> Result<()> {
    let json_string = serde_json::to_string_pretty(summary)?;
    std::fs::write(path, json_string)?;
    info!("Created run summary: {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn summary_round_trips_through_json() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run_summary.json");
        let counters = RunCounters {
            sites: 2,
            processed: 3,
            skipped: 1,
            ..RunCounters::default()
        };
        let summary = RunSummary::new(dir.path(), &CalValParams::default(), counters, vec![]);
        write_run_summary(&path, &summary).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["tool"], "flexcal");
        assert_eq!(value["counters"]["processed"], 3);
        assert_eq!(value["params"]["roi_size"], 900);
        assert_eq!(value["params"]["mode"], "combined");
    }
}
