//! FLEX fluorescence products (`PRS_TD_<YYYYMMDD>_<HHMMSS>.nc`).
//!
//! Layers are NetCDF variables read through GDAL's `NETCDF:"file":var` subdataset
//! syntax. Rows follow the `lat` axis and columns the `lon` axis in file order.
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::LazyLock;

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use gdal::{Dataset, Metadata};
use ndarray::Array2;
use regex::Regex;
use thiserror::Error;
use tracing::{debug, warn};

use crate::core::params::SifBands;
use crate::io::gdal::{GdalError, GdalRasterReader};
use crate::types::SifMetric;

pub const EMISSION_PREFIX: &str = "Sif Emission Spectrum_sif_wavelength_grid=";
pub const UNCERTAINTY_PREFIX: &str = "Sif Emission Spectrum Uncertainty_sif_wavelength_grid=";
pub const INTEGRATED_SIF: &str = "Total Integrated SIF";
pub const LEAF_AREA_INDEX: &str = "Leaf Area Index";

const LAT_NAMES: [&str; 2] = ["lat", "latitude"];
const LON_NAMES: [&str; 2] = ["lon", "longitude"];

/// Errors encountered when reading FLEX products
#[derive(Debug, Error)]
pub enum FlexError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalError),
    #[error("FLEX filename does not match PRS_TD_<YYYYMMDD>_<HHMMSS>.nc: {0}")]
    BadFilename(String),
    #[error("Invalid filename pattern: {0}")]
    Pattern(regex::Error),
    #[error("Missing variable `{0}`")]
    MissingVariable(String),
    #[error("Layer `{name}` is {got:?}, grid is {expected:?}")]
    ShapeMismatch {
        name: String,
        got: (usize, usize),
        expected: (usize, usize),
    },
}

static FLEX_NAME: LazyLock<Result<Regex, regex::Error>> =
    LazyLock::new(|| Regex::new(r"^PRS_TD_(\d{8})_(\d{6})\.nc$"));

/// Acquisition time encoded in a FLEX filename.
pub fn parse_flex_filename(name: &str) -> Result<NaiveDateTime, FlexError> {
    let bad = || FlexError::BadFilename(name.to_string());
    let re = FLEX_NAME.as_ref().map_err(|e| FlexError::Pattern(e.clone()))?;
    let caps = re.captures(name).ok_or_else(bad)?;
    let date = NaiveDate::parse_from_str(&caps[1], "%Y%m%d").map_err(|_| bad())?;
    let time = NaiveTime::parse_from_str(&caps[2], "%H%M%S").map_err(|_| bad())?;
    Ok(date.and_time(time))
}

pub fn emission_variable(wavelength: &str) -> String {
    format!("{}{}", EMISSION_PREFIX, wavelength)
}

pub fn uncertainty_variable(wavelength: &str) -> String {
    format!("{}{}", UNCERTAINTY_PREFIX, wavelength)
}

/// Variable holding `metric` in a FLEX product
pub fn metric_variable(metric: SifMetric, bands: &SifBands) -> String {
    match metric {
        SifMetric::FarRedMax => emission_variable(&bands.far_red_max),
        SifMetric::RedMax => emission_variable(&bands.red_max),
        SifMetric::O2A => emission_variable(&bands.o2a),
        SifMetric::O2B => emission_variable(&bands.o2b),
        SifMetric::Integrated => INTEGRATED_SIF.to_string(),
        SifMetric::O2AUncertainty => uncertainty_variable(&bands.o2a),
        SifMetric::O2BUncertainty => uncertainty_variable(&bands.o2b),
    }
}

/// Variables the pipeline loads from a product
pub fn is_pipeline_variable(name: &str) -> bool {
    name.starts_with(EMISSION_PREFIX)
        || name.starts_with(UNCERTAINTY_PREFIX)
        || name == INTEGRATED_SIF
        || name == LEAF_AREA_INDEX
}

/// Loaded FLEX layers on their `lat` × `lon` grid.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexImage {
    pub filename: String,
    pub timestamp: NaiveDateTime,
    pub lat: Vec<f64>,
    pub lon: Vec<f64>,
    layers: BTreeMap<String, Array2<f64>>,
}

impl FlexImage {
    pub fn new(filename: &str, lat: Vec<f64>, lon: Vec<f64>) -> Result<Self, FlexError> {
        let timestamp = parse_flex_filename(filename)?;
        Ok(Self {
            filename: filename.to_string(),
            timestamp,
            lat,
            lon,
            layers: BTreeMap::new(),
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.lat.len(), self.lon.len())
    }

    pub fn insert_layer(&mut self, name: &str, values: Array2<f64>) -> Result<(), FlexError> {
        if values.dim() != self.shape() {
            return Err(FlexError::ShapeMismatch {
                name: name.to_string(),
                got: values.dim(),
                expected: self.shape(),
            });
        }
        self.layers.insert(name.to_string(), values);
        Ok(())
    }

    pub fn layer(&self, name: &str) -> Option<&Array2<f64>> {
        self.layers.get(name)
    }

    pub fn layers(&self) -> impl Iterator<Item = (&str, &Array2<f64>)> {
        self.layers.iter().map(|(name, values)| (name.as_str(), values))
    }

    /// Read a product from disk, keeping only the variables the pipeline uses.
    pub fn read(path: &Path) -> Result<Self, FlexError> {
        let filename = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default();
        parse_flex_filename(&filename)?;

        // keep rows in file order so they line up with the raw lat axis
        gdal::config::set_config_option("GDAL_NETCDF_BOTTOMUP", "NO")
            .map_err(GdalError::from)?;

        let variables = list_variables(path)?;
        let wanted: Vec<&String> = variables.iter().filter(|v| is_pipeline_variable(v)).collect();
        let Some(first) = wanted.first() else {
            return Err(FlexError::MissingVariable(emission_variable("*")));
        };

        let first_reader = GdalRasterReader::open(subdataset(path, first))?;
        let grid = first_reader.grid();
        let lat = read_axis(path, &LAT_NAMES).unwrap_or_else(|| {
            debug!("{}: no lat variable, using geotransform", filename);
            (0..grid.rows).map(|r| grid.pixel_center(r, 0).1).collect()
        });
        let lon = read_axis(path, &LON_NAMES).unwrap_or_else(|| {
            debug!("{}: no lon variable, using geotransform", filename);
            (0..grid.cols).map(|c| grid.pixel_center(0, c).0).collect()
        });

        let mut image = FlexImage::new(&filename, lat, lon)?;
        for name in wanted {
            let reader = GdalRasterReader::open(subdataset(path, name))?;
            image.insert_layer(name, reader.read_band_nan(1)?)?;
        }
        debug!("{}: loaded {} layers", filename, image.layers.len());
        Ok(image)
    }
}

fn subdataset(path: &Path, variable: &str) -> String {
    format!("NETCDF:\"{}\":{}", path.display(), variable)
}

/// Variable names from the SUBDATASETS metadata domain
fn list_variables(path: &Path) -> Result<Vec<String>, FlexError> {
    let dataset = Dataset::open(path).map_err(GdalError::from)?;
    let mut names = Vec::new();
    for entry in dataset.metadata_domain("SUBDATASETS").unwrap_or_default() {
        let Some((key, value)) = entry.split_once('=') else {
            continue;
        };
        if !key.ends_with("_NAME") {
            continue;
        }
        // NETCDF:"<path>":<variable>
        if let Some(idx) = value.rfind("\":") {
            names.push(value[idx + 2..].to_string());
        }
    }
    if names.is_empty() {
        warn!("{:?} exposes no NetCDF subdatasets", path);
    }
    Ok(names)
}

fn read_axis(path: &Path, candidates: &[&str]) -> Option<Vec<f64>> {
    candidates.iter().find_map(|name| {
        let reader = GdalRasterReader::open(subdataset(path, name)).ok()?;
        let values = reader.read_band(1).ok()?;
        Some(values.iter().copied().collect())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_gives_timestamp() {
        assert!(FLEX_NAME.is_ok());
        let ts = parse_flex_filename("PRS_TD_20230616_101431.nc").unwrap();
        assert_eq!(ts.to_string(), "2023-06-16 10:14:31");
    }

    #[test]
    fn malformed_filenames_are_rejected() {
        for name in [
            "PRS_TD_20230616.nc",
            "PRS_TD_20231316_101431.nc",
            "prs_td_20230616_101431.nc",
            "PRS_TD_20230616_101431.nc.bak",
        ] {
            assert!(matches!(parse_flex_filename(name), Err(FlexError::BadFilename(_))), "{}", name);
        }
    }

    #[test]
    fn metric_variables_follow_band_settings() {
        let bands = SifBands::default();
        assert_eq!(
            metric_variable(SifMetric::O2A, &bands),
            "Sif Emission Spectrum_sif_wavelength_grid=760"
        );
        assert_eq!(
            metric_variable(SifMetric::O2BUncertainty, &bands),
            "Sif Emission Spectrum Uncertainty_sif_wavelength_grid=686"
        );
        assert_eq!(metric_variable(SifMetric::Integrated, &bands), INTEGRATED_SIF);
        assert!(is_pipeline_variable(LEAF_AREA_INDEX));
        assert!(!is_pipeline_variable("Sun Zenith Angle"));
    }

    #[test]
    fn layers_must_match_grid() {
        let mut image =
            FlexImage::new("PRS_TD_20230616_101431.nc", vec![45.0, 44.99], vec![7.0, 7.01, 7.02]).unwrap();
        assert!(image.insert_layer(INTEGRATED_SIF, Array2::zeros((2, 3))).is_ok());
        assert!(matches!(
            image.insert_layer(LEAF_AREA_INDEX, Array2::zeros((3, 2))),
            Err(FlexError::ShapeMismatch { .. })
        ));
        image
            .insert_layer(&emission_variable("740"), Array2::ones((2, 3)))
            .unwrap();
        let names: Vec<&str> = image.layers().map(|(name, _)| name).collect();
        assert_eq!(names, vec![emission_variable("740").as_str(), INTEGRATED_SIF]);
    }
}
