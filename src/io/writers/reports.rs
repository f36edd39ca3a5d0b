//! CSV report tables. Missing values are written as `N/A`; NaN from numeric edge cases
//! is written as `NaN`.
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::core::params::SiteSettings;
use crate::core::processing::validation::FitResult;
use crate::error::{Error, Result};
use crate::types::SifMetric;

pub const NOT_AVAILABLE: &str = "N/A";

/// Format an optional number, `N/A` when absent
pub fn fmt_opt(value: Option<f64>) -> String {
    value.map(fmt_num).unwrap_or_else(|| NOT_AVAILABLE.to_string())
}

pub fn fmt_num(value: f64) -> String {
    format!("{}", value)
}

/// Row type of a CSV table with a fixed header, written even when the table is empty.
pub trait CsvTable: Serialize {
    /// Column names in field order
    const HEADER: &'static [&'static str];
}

/// FLEX image that passed the vegetation gate.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsableFlexRow {
    pub site_code: String,
    pub filename: String,
    /// YYYYMMDD
    pub date: String,
    /// HHMMSS
    pub time: String,
}

impl CsvTable for UsableFlexRow {
    const HEADER: &'static [&'static str] = &["site_code", "filename", "date", "time"];
}

/// Mean and spread of one FLEX layer over the ROI.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SifSummaryRow {
    pub band: String,
    pub average: f64,
    pub std: f64,
}

impl CsvTable for SifSummaryRow {
    const HEADER: &'static [&'static str] = &["band", "average", "std"];
}

/// Sentinel-2 pairing, quality and heterogeneity for one FLEX image.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct S2ReportRow {
    pub site_code: String,
    pub latitude: f64,
    pub longitude: f64,
    pub reference_area: u32,
    pub time_window: u32,
    /// Thresholds in percent
    pub threshold_cv: f64,
    pub vegetation_pixel: f64,
    pub threshold_cloud: f64,
    pub flex_filename: String,
    pub flex_date: String,
    pub flex_time: String,
    pub s2_product: String,
    pub s2_date: String,
    pub s2_time: String,
    pub time_difference_days: String,
    pub l1c_valid_pixels: String,
    pub l1c_valid_percent: String,
    pub l2a_valid_pixels: String,
    pub l2a_valid_percent: String,
    pub ndvi_avg: String,
    pub ndvi_sd: String,
    pub ndvi_cv: String,
    pub ndvi_cv_flag: String,
    pub nirv_avg: String,
    pub nirv_sd: String,
    pub nirv_cv: String,
    pub nirv_cv_flag: String,
    pub note: String,
}

impl CsvTable for S2ReportRow {
    const HEADER: &'static [&'static str] = &[
        "site_code",
        "latitude",
        "longitude",
        "reference_area",
        "time_window",
        "threshold_cv",
        "vegetation_pixel",
        "threshold_cloud",
        "flex_filename",
        "flex_date",
        "flex_time",
        "s2_product",
        "s2_date",
        "s2_time",
        "time_difference_days",
        "l1c_valid_pixels",
        "l1c_valid_percent",
        "l2a_valid_pixels",
        "l2a_valid_percent",
        "ndvi_avg",
        "ndvi_sd",
        "ndvi_cv",
        "ndvi_cv_flag",
        "nirv_avg",
        "nirv_sd",
        "nirv_cv",
        "nirv_cv_flag",
        "note",
    ];
}

impl S2ReportRow {
    /// Row for one FLEX image with every Sentinel-2 field still `N/A`.
    pub fn new(site: &SiteSettings, flex_filename: &str, flex_time: NaiveDateTime) -> Self {
        Self {
            flex_filename: flex_filename.to_string(),
            flex_date: flex_time.format("%Y%m%d").to_string(),
            flex_time: flex_time.format("%H%M%S").to_string(),
            ..Self::for_site(site)
        }
    }

    /// Row for a site-level event that concerns no particular FLEX image.
    pub fn for_site(site: &SiteSettings) -> Self {
        let na = || NOT_AVAILABLE.to_string();
        Self {
            site_code: site.code.clone(),
            latitude: site.latitude,
            longitude: site.longitude,
            reference_area: site.roi_size.meters(),
            time_window: site.time_window_days,
            threshold_cv: site.cv_threshold * 100.0,
            vegetation_pixel: site.vegetation_threshold * 100.0,
            threshold_cloud: site.cloud_threshold * 100.0,
            flex_filename: na(),
            flex_date: na(),
            flex_time: na(),
            s2_product: na(),
            s2_date: na(),
            s2_time: na(),
            time_difference_days: na(),
            l1c_valid_pixels: na(),
            l1c_valid_percent: na(),
            l2a_valid_pixels: na(),
            l2a_valid_percent: na(),
            ndvi_avg: na(),
            ndvi_sd: na(),
            ndvi_cv: na(),
            ndvi_cv_flag: na(),
            nirv_avg: na(),
            nirv_sd: na(),
            nirv_cv: na(),
            nirv_cv_flag: na(),
            note: String::new(),
        }
    }
}

/// FLOX, FLEX and transfer-function values of one metric.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct MetricValues {
    pub flox: Option<f64>,
    pub flex: Option<f64>,
    pub transfer: Option<f64>,
}

/// One (site, date) comparison row.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchupRecord {
    pub site_code: String,
    /// YYYYMMDD
    pub date: String,
    pub flex_filename: String,
    pub s2_product: Option<String>,
    pub values: BTreeMap<SifMetric, MetricValues>,
    pub notes: Vec<String>,
}

impl MatchupRecord {
    pub fn new(site_code: &str, date: &str, flex_filename: &str) -> Self {
        Self {
            site_code: site_code.to_string(),
            date: date.to_string(),
            flex_filename: flex_filename.to_string(),
            s2_product: None,
            values: BTreeMap::new(),
            notes: Vec::new(),
        }
    }

    pub fn value(&self, metric: SifMetric) -> MetricValues {
        self.values.get(&metric).copied().unwrap_or_default()
    }

    pub fn note(&self) -> String {
        self.notes.join("; ")
    }
}

/// Regression statistics of one metric for one comparison.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ValidationRow {
    pub comparison: String,
    pub metric: String,
    pub n_sites: usize,
    pub n_images: usize,
    pub r2: f64,
    pub rmse: f64,
    pub bias: f64,
    pub slope: f64,
    pub intercept: f64,
    pub random_uncertainty: f64,
    pub residual_rmse: f64,
    pub residual_bias: f64,
}

impl CsvTable for ValidationRow {
    const HEADER: &'static [&'static str] = &[
        "comparison",
        "metric",
        "n_sites",
        "n_images",
        "r2",
        "rmse",
        "bias",
        "slope",
        "intercept",
        "random_uncertainty",
        "residual_rmse",
        "residual_bias",
    ];
}

/// ROI means of the FLEX metric layers of one usable image, kept for Sentinel-2-only runs.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexMetricsRow {
    pub site_code: String,
    pub filename: String,
    pub values: BTreeMap<SifMetric, f64>,
}

impl ValidationRow {
    pub fn new(comparison: &str, metric: SifMetric, n_sites: usize, fit: &FitResult) -> Self {
        Self {
            comparison: comparison.to_string(),
            metric: metric.column().to_string(),
            n_sites,
            n_images: fit.n,
            r2: fit.r2,
            rmse: fit.rmse,
            bias: fit.bias,
            slope: fit.slope,
            intercept: fit.intercept,
            random_uncertainty: fit.random_uncertainty,
            residual_rmse: fit.residual_rmse,
            residual_bias: fit.residual_bias,
        }
    }
}

// Write to a temporary file next to `path`, then move it into place.
fn write_atomic<F>(path: &Path, fill: F) -> Result<()>
where
    F: FnOnce(&mut csv::Writer<&mut fs::File>) -> Result<()>,
{
    let dir = path.parent().unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(dir)?;
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    {
        let mut wtr = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        fill(&mut wtr)?;
        wtr.flush()?;
    }
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

/// Write a table, header first
pub fn write_rows<T: CsvTable>(path: &Path, rows: &[T]) -> Result<()> {
    write_atomic(path, |wtr| {
        wtr.write_record(T::HEADER)?;
        for row in rows {
            wtr.serialize(row)?;
        }
        Ok(())
    })
}

pub fn read_usable_flex(path: &Path) -> Result<Vec<UsableFlexRow>> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let mut rdr = csv::Reader::from_path(path)?;
    let rows = rdr.deserialize().collect::<std::result::Result<Vec<UsableFlexRow>, _>>()?;
    Ok(rows)
}

/// Column names of the FLEX metrics table
pub fn flex_metrics_header() -> Vec<String> {
    let mut header = vec!["site_code".to_string(), "filename".to_string()];
    header.extend(SifMetric::ALL.iter().map(|m| m.column().to_string()));
    header
}

pub fn write_flex_metrics(path: &Path, rows: &[FlexMetricsRow]) -> Result<()> {
    write_atomic(path, |wtr| {
        wtr.write_record(flex_metrics_header())?;
        for row in rows {
            let mut record = vec![row.site_code.clone(), row.filename.clone()];
            for metric in SifMetric::ALL {
                record.push(fmt_opt(row.values.get(&metric).copied()));
            }
            wtr.write_record(&record)?;
        }
        Ok(())
    })
}

/// Read a FLEX metrics table; `N/A` cells are left out of `values`.
pub fn read_flex_metrics(path: &Path) -> Result<Vec<FlexMetricsRow>> {
    if !path.exists() {
        return Err(Error::MissingInput(path.to_path_buf()));
    }
    let source = path.display().to_string();
    let mut rdr = csv::Reader::from_path(path)?;
    let headers = rdr.headers()?.clone();
    let position = |column: &str| {
        headers
            .iter()
            .position(|h| h == column)
            .ok_or_else(|| Error::MissingColumn {
                file: source.clone(),
                column: column.to_string(),
            })
    };
    let site_col = position("site_code")?;
    let file_col = position("filename")?;
    let metric_cols: Vec<(usize, SifMetric)> = headers
        .iter()
        .enumerate()
        .filter_map(|(i, h)| SifMetric::from_column(h).map(|m| (i, m)))
        .collect();

    let mut rows = Vec::new();
    for record in rdr.records() {
        let record = record?;
        let mut values = BTreeMap::new();
        for &(i, metric) in &metric_cols {
            let cell = record.get(i).unwrap_or(NOT_AVAILABLE);
            if cell == NOT_AVAILABLE || cell.is_empty() {
                continue;
            }
            let value = cell.parse::<f64>().map_err(|_| {
                Error::Processing(format!("{}: bad {} value `{}`", source, metric.column(), cell))
            })?;
            values.insert(metric, value);
        }
        rows.push(FlexMetricsRow {
            site_code: record.get(site_col).unwrap_or_default().to_string(),
            filename: record.get(file_col).unwrap_or_default().to_string(),
            values,
        });
    }
    Ok(rows)
}

/// Column names of the matchup table
pub fn matchup_header() -> Vec<String> {
    let mut header = vec![
        "site_code".to_string(),
        "date".to_string(),
        "flex_filename".to_string(),
        "s2_product".to_string(),
    ];
    for metric in SifMetric::ALL {
        header.push(format!("{}_flox", metric.column()));
        header.push(format!("{}_flex", metric.column()));
        header.push(format!("{}_tf", metric.column()));
    }
    header.push("note".to_string());
    header
}

pub fn write_matchups(path: &Path, records: &[MatchupRecord]) -> Result<()> {
    write_atomic(path, |wtr| {
        wtr.write_record(matchup_header())?;
        for record in records {
            let mut row = vec![
                record.site_code.clone(),
                record.date.clone(),
                record.flex_filename.clone(),
                record
                    .s2_product
                    .clone()
                    .unwrap_or_else(|| NOT_AVAILABLE.to_string()),
            ];
            for metric in SifMetric::ALL {
                let v = record.value(metric);
                row.push(fmt_opt(v.flox));
                row.push(fmt_opt(v.flex));
                row.push(fmt_opt(v.transfer));
            }
            row.push(record.note());
            wtr.write_record(&row)?;
        }
        Ok(())
    })
}
