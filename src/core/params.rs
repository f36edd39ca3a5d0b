use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::core::catalog::Site;
use crate::error::{Error, Result};
use crate::types::{ProxyIndex, RoiSize, RunMode};

/// Wavelengths (nm) of the FLEX emission-spectrum layers matching each FLOX metric.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SifBands {
    pub far_red_max: String,
    pub red_max: String,
    pub o2a: String,
    pub o2b: String,
}

impl Default for SifBands {
    fn default() -> Self {
        Self {
            far_red_max: "740".into(),
            red_max: "684".into(),
            o2a: "760".into(),
            o2b: "686".into(),
        }
    }
}

/// Run parameters suitable for config files; built once and passed by reference.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalValParams {
    pub mode: RunMode,
    /// Default ROI side for sites that do not set one
    pub roi_size: RoiSize,
    /// CV threshold as a fraction (0.2 = 20 %)
    pub cv_threshold: f64,
    /// Minimum valid-pixel fraction for a Sentinel-2 image to pass
    pub cloud_threshold: f64,
    /// Minimum vegetated fraction of the FLEX ROI
    pub vegetation_threshold: f64,
    /// Maximum |FLEX - Sentinel-2| time difference in days
    pub time_window_days: u32,
    pub proxy: ProxyIndex,
    pub sif_bands: SifBands,
    /// Remove the scratch area at the end of the run
    pub delete_cache: bool,
    /// Persist clipped masks and index rasters as GeoTIFFs
    pub keep_interim: bool,
}

impl Default for CalValParams {
    fn default() -> Self {
        Self {
            mode: RunMode::Combined,
            roi_size: RoiSize::M900,
            cv_threshold: 0.2,
            cloud_threshold: 0.5,
            vegetation_threshold: 0.5,
            time_window_days: 10,
            proxy: ProxyIndex::NirvReflectance,
            sif_bands: SifBands::default(),
            delete_cache: false,
            keep_interim: true,
        }
    }
}

impl CalValParams {
    /// Load parameters from a JSON file; absent keys keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let text = std::fs::read_to_string(path)?;
        let params: CalValParams = serde_json::from_str(&text)?;
        Ok(params)
    }

    pub fn validate(&self) -> Result<()> {
        check_fraction("cloud_threshold", self.cloud_threshold)?;
        check_fraction("vegetation_threshold", self.vegetation_threshold)?;
        if !(self.cv_threshold > 0.0) {
            return Err(Error::InvalidArgument {
                arg: "cv_threshold",
                value: self.cv_threshold.to_string(),
            });
        }
        Ok(())
    }

    /// Resolve the effective settings for one site.
    pub fn resolve(&self, site: &Site) -> SiteSettings {
        SiteSettings {
            code: site.code.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            roi_size: site.roi_size.unwrap_or(self.roi_size),
            time_window_days: site.time_window_days.unwrap_or(self.time_window_days),
            cv_threshold: site.cv_threshold.unwrap_or(self.cv_threshold),
            vegetation_threshold: site
                .vegetation_threshold
                .unwrap_or(self.vegetation_threshold),
            cloud_threshold: site.cloud_threshold.unwrap_or(self.cloud_threshold),
        }
    }
}

fn check_fraction(arg: &'static str, value: f64) -> Result<()> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(Error::InvalidArgument {
            arg,
            value: value.to_string(),
        })
    }
}

/// Per-site thresholds with run defaults filled in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SiteSettings {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub roi_size: RoiSize,
    pub time_window_days: u32,
    pub cv_threshold: f64,
    pub vegetation_threshold: f64,
    pub cloud_threshold: f64,
}

impl SiteSettings {
    pub fn time_window(&self) -> chrono::Duration {
        chrono::Duration::days(i64::from(self.time_window_days))
    }
}
