//! Monitoring-site catalog loaded from `Sites.csv`.
//!
//! Required columns are `site_code`, `latitude` and `longitude`. The optional
//! `reference_area`, `time_window_days`, `threshold_cv`, `vegetation_pixel` and
//! `threshold_cloud` columns override the run configuration per site; thresholds are
//! given in percent and stored as fractions.
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;

use serde::Deserialize;
use tracing::info;

use crate::error::{Error, Result};
use crate::types::RoiSize;

const REQUIRED_COLUMNS: [&str; 3] = ["site_code", "latitude", "longitude"];

/// One fixed monitoring site. Immutable once loaded.
#[derive(Debug, Clone, PartialEq)]
pub struct Site {
    pub code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub roi_size: Option<RoiSize>,
    pub time_window_days: Option<u32>,
    pub cv_threshold: Option<f64>,
    pub vegetation_threshold: Option<f64>,
    pub cloud_threshold: Option<f64>,
}

#[derive(Debug, Deserialize)]
struct SiteRow {
    site_code: String,
    latitude: f64,
    longitude: f64,
    #[serde(default)]
    reference_area: Option<u32>,
    #[serde(default)]
    time_window_days: Option<u32>,
    #[serde(default)]
    threshold_cv: Option<f64>,
    #[serde(default)]
    vegetation_pixel: Option<f64>,
    #[serde(default)]
    threshold_cloud: Option<f64>,
}

impl SiteRow {
    fn into_site(self) -> Result<Site> {
        let code = self.site_code.trim().to_string();
        if code.is_empty() {
            return Err(Error::OutOfRange {
                site: "<blank>".into(),
                field: "site_code",
                value: String::new(),
                expected: "non-empty code",
            });
        }
        let out_of_range = |field: &'static str, value: String, expected: &'static str| {
            Error::OutOfRange {
                site: code.clone(),
                field,
                value,
                expected,
            }
        };
        if !(-90.0..=90.0).contains(&self.latitude) {
            return Err(out_of_range("latitude", self.latitude.to_string(), "[-90, 90]"));
        }
        if !(-180.0..=180.0).contains(&self.longitude) {
            return Err(out_of_range("longitude", self.longitude.to_string(), "[-180, 180]"));
        }
        let roi_size = self
            .reference_area
            .map(|side| {
                RoiSize::try_from(side)
                    .map_err(|_| out_of_range("reference_area", side.to_string(), "300, 600 or 900"))
            })
            .transpose()?;
        let cv_threshold = match self.threshold_cv {
            Some(pct) if pct > 0.0 => Some(pct / 100.0),
            Some(pct) => return Err(out_of_range("threshold_cv", pct.to_string(), "> 0 %")),
            None => None,
        };
        let percent = |field: &'static str, value: Option<f64>| -> Result<Option<f64>> {
            match value {
                Some(pct) if (0.0..=100.0).contains(&pct) => Ok(Some(pct / 100.0)),
                Some(pct) => Err(out_of_range(field, pct.to_string(), "[0, 100] %")),
                None => Ok(None),
            }
        };
        let vegetation_threshold = percent("vegetation_pixel", self.vegetation_pixel)?;
        let cloud_threshold = percent("threshold_cloud", self.threshold_cloud)?;

        Ok(Site {
            code,
            latitude: self.latitude,
            longitude: self.longitude,
            roi_size,
            time_window_days: self.time_window_days,
            cv_threshold,
            vegetation_threshold,
            cloud_threshold,
        })
    }
}

/// All sites of a run, in file order.
#[derive(Debug, Clone, Default)]
pub struct SiteCatalog {
    sites: Vec<Site>,
}

impl SiteCatalog {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        let catalog = Self::from_reader(file, &path.display().to_string())?;
        info!("Loaded {} sites from {:?}", catalog.len(), path);
        Ok(catalog)
    }

    /// Parse a catalog from any reader; `source` names it in error messages.
    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        for column in REQUIRED_COLUMNS {
            if !headers.iter().any(|h| h == column) {
                return Err(Error::MissingColumn {
                    file: source.to_string(),
                    column: column.to_string(),
                });
            }
        }

        let mut seen = HashSet::new();
        let mut sites = Vec::new();
        for row in rdr.deserialize::<SiteRow>() {
            let site = row?.into_site()?;
            if !seen.insert(site.code.clone()) {
                return Err(Error::DuplicateSite(site.code));
            }
            sites.push(site);
        }
        Ok(Self { sites })
    }

    pub fn iter(&self) -> impl Iterator<Item = &Site> {
        self.sites.iter()
    }

    pub fn len(&self) -> usize {
        self.sites.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn loads_required_and_optional_columns() {
        let csv = "site_code,latitude,longitude,reference_area,time_window_days,threshold_cv,vegetation_pixel,threshold_cloud\n\
                   IT-Tor,45.84,7.58,300,5,20,50,90\n\
                   DE-Geb,51.1,10.91,,,,,\n";
        let catalog = SiteCatalog::from_reader(csv.as_bytes(), "Sites.csv").unwrap();
        assert_eq!(catalog.len(), 2);
        let tor = catalog.iter().find(|s| s.code == "IT-Tor").unwrap();
        assert_eq!(tor.roi_size, Some(RoiSize::M300));
        assert_eq!(tor.time_window_days, Some(5));
        assert_eq!(tor.cv_threshold, Some(0.2));
        assert_eq!(tor.cloud_threshold, Some(0.9));
        let geb = catalog.iter().find(|s| s.code == "DE-Geb").unwrap();
        assert_eq!(geb.roi_size, None);
        assert_eq!(geb.vegetation_threshold, None);
    }

    #[test]
    fn missing_column_is_reported() {
        let csv = "site_code,latitude\nX,1.0\n";
        let err = SiteCatalog::from_reader(csv.as_bytes(), "Sites.csv").unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "longitude"));
    }

    #[test]
    fn out_of_range_and_duplicates() {
        let csv = "site_code,latitude,longitude\nX,91.0,0.0\n";
        assert!(matches!(
            SiteCatalog::from_reader(csv.as_bytes(), "s").unwrap_err(),
            Error::OutOfRange { field: "latitude", .. }
        ));
        let csv = "site_code,latitude,longitude,reference_area\nX,1.0,0.0,450\n";
        assert!(matches!(
            SiteCatalog::from_reader(csv.as_bytes(), "s").unwrap_err(),
            Error::OutOfRange { field: "reference_area", .. }
        ));
        let csv = "site_code,latitude,longitude\nX,1.0,0.0\nX,2.0,0.0\n";
        assert!(matches!(
            SiteCatalog::from_reader(csv.as_bytes(), "s").unwrap_err(),
            Error::DuplicateSite(ref code) if code == "X"
        ));
    }
}
