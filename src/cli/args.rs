use clap::Parser;
use std::path::PathBuf;

use flexcal::types::{ProxyIndex, RoiSize, RunMode};

#[derive(Parser)]
#[command(name = "flexcal", version, about = "FLEX / Sentinel-2 / FLOX cal/val pipeline")]
pub struct CliArgs {
    /// Work directory holding Sites.csv, flox.csv, input_flex_images/ and input_s2_images/
    #[arg(short, long)]
    pub work_dir: PathBuf,

    /// Site catalog (default: <work-dir>/Sites.csv)
    #[arg(long)]
    pub sites: Option<PathBuf>,

    /// FLOX ground-truth CSV (default: <work-dir>/flox.csv)
    #[arg(long)]
    pub flox: Option<PathBuf>,

    /// JSON configuration (default: <work-dir>/calval.json when present)
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Which acquisitions to process
    #[arg(long, value_enum)]
    pub mode: Option<RunMode>,

    /// Default ROI side in metres for sites without one
    #[arg(long, value_enum)]
    pub roi: Option<RoiSize>,

    /// CV threshold as a fraction (0.2 = 20 %)
    #[arg(long)]
    pub cv_threshold: Option<f64>,

    /// Minimum valid-pixel fraction of a Sentinel-2 ROI
    #[arg(long)]
    pub cloud_threshold: Option<f64>,

    /// Minimum vegetated fraction of a FLEX ROI
    #[arg(long)]
    pub vegetation_threshold: Option<f64>,

    /// Maximum FLEX / Sentinel-2 time difference in days
    #[arg(long)]
    pub time_window: Option<u32>,

    /// Sentinel-2 proxy used by the transfer function
    #[arg(long, value_enum)]
    pub proxy: Option<ProxyIndex>,

    /// Delete the interim cache at the end of the run
    #[arg(long, default_value_t = false)]
    pub delete_cache: bool,

    /// Persist clipped masks and index rasters as GeoTIFFs (true or false)
    #[arg(long)]
    pub keep_interim: Option<bool>,

    /// Enable debug logging
    #[arg(long, default_value_t = false)]
    pub log: bool,
}
