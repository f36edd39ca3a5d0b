//! FLOX ground-spectrometer records.
//!
//! The file is `;`-delimited with one row per measurement. Rows for the same site and
//! UTC date are averaged metric by metric, ignoring empty cells.
use std::collections::BTreeMap;
use std::io::Read;
use std::path::Path;

use chrono::{NaiveDate, NaiveDateTime};
use serde::Deserialize;
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::types::SifMetric;

#[derive(Debug, Deserialize)]
struct FloxRow {
    #[serde(alias = "FLOX_site_code")]
    site_code: String,
    #[serde(rename = "UTC_datetime")]
    utc_datetime: String,
    #[serde(rename = "SIF_FARRED_max", default)]
    far_red_max: Option<f64>,
    #[serde(rename = "SIF_RED_max", default)]
    red_max: Option<f64>,
    #[serde(rename = "SIF_O2A", default)]
    o2a: Option<f64>,
    #[serde(rename = "SIF_O2B", default)]
    o2b: Option<f64>,
    #[serde(rename = "SIF_int", default)]
    integrated: Option<f64>,
    #[serde(rename = "SIF_O2A_un", default)]
    o2a_un: Option<f64>,
    #[serde(rename = "SIF_O2B_un", default)]
    o2b_un: Option<f64>,
}

impl FloxRow {
    fn value(&self, metric: SifMetric) -> Option<f64> {
        match metric {
            SifMetric::FarRedMax => self.far_red_max,
            SifMetric::RedMax => self.red_max,
            SifMetric::O2A => self.o2a,
            SifMetric::O2B => self.o2b,
            SifMetric::Integrated => self.integrated,
            SifMetric::O2AUncertainty => self.o2a_un,
            SifMetric::O2BUncertainty => self.o2b_un,
        }
        .filter(|v| v.is_finite())
    }
}

pub fn parse_flox_datetime(text: &str) -> Option<NaiveDateTime> {
    let text = text.trim();
    ["%d/%m/%Y %H:%M", "%d/%m/%Y %H:%M:%S", "%Y-%m-%d %H:%M:%S", "%Y-%m-%dT%H:%M:%S"]
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(text, fmt).ok())
}

/// Daily mean of each metric for one site.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FloxRecord {
    sums: BTreeMap<SifMetric, (f64, usize)>,
    /// Rows that contributed to this day
    pub samples: usize,
}

impl FloxRecord {
    fn add(&mut self, row: &FloxRow) {
        self.samples += 1;
        for metric in SifMetric::ALL {
            if let Some(v) = row.value(metric) {
                let entry = self.sums.entry(metric).or_insert((0.0, 0));
                entry.0 += v;
                entry.1 += 1;
            }
        }
    }

    pub fn value(&self, metric: SifMetric) -> Option<f64> {
        self.sums
            .get(&metric)
            .filter(|(_, n)| *n > 0)
            .map(|(sum, n)| sum / *n as f64)
    }
}

/// Ground truth keyed by site and UTC date.
#[derive(Debug, Clone, Default)]
pub struct FloxIndex {
    records: BTreeMap<(String, NaiveDate), FloxRecord>,
}

impl FloxIndex {
    pub fn load(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Err(Error::MissingInput(path.to_path_buf()));
        }
        let file = std::fs::File::open(path)?;
        let index = Self::from_reader(file, &path.display().to_string())?;
        info!("Loaded FLOX data for {} site-days from {:?}", index.len(), path);
        Ok(index)
    }

    pub fn from_reader<R: Read>(reader: R, source: &str) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(b';')
            .trim(csv::Trim::All)
            .from_reader(reader);
        let headers = rdr.headers()?.clone();
        if !headers.iter().any(|h| h == "site_code" || h == "FLOX_site_code") {
            return Err(Error::MissingColumn {
                file: source.to_string(),
                column: "site_code".into(),
            });
        }
        if !headers.iter().any(|h| h == "UTC_datetime") {
            return Err(Error::MissingColumn {
                file: source.to_string(),
                column: "UTC_datetime".into(),
            });
        }

        let mut index = Self::default();
        for (line, row) in rdr.deserialize::<FloxRow>().enumerate() {
            let row = match row {
                Ok(row) => row,
                Err(e) => {
                    warn!("{}: skipping row {}: {}", source, line + 2, e);
                    continue;
                }
            };
            let Some(when) = parse_flox_datetime(&row.utc_datetime) else {
                warn!(
                    "{}: skipping row {}: bad UTC_datetime {:?}",
                    source,
                    line + 2,
                    row.utc_datetime
                );
                continue;
            };
            index
                .records
                .entry((row.site_code.clone(), when.date()))
                .or_default()
                .add(&row);
        }
        Ok(index)
    }

    pub fn get(&self, site: &str, date: NaiveDate) -> Option<&FloxRecord> {
        self.records.get(&(site.to_string(), date))
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    const FLOX: &str = "FLOX_site_code;UTC_datetime;SIF_FARRED_max;SIF_RED_max;SIF_O2A;SIF_O2B;SIF_int;SIF_O2A_un;SIF_O2B_un\n\
                        X;16/06/2023 10:00;1.2;0.8;1.0;0.6;40;0.1;0.2\n\
                        X;16/06/2023 10:30;1.4;;1.2;0.8;44;0.1;0.2\n\
                        X;17/06/2023 10:00;1.0;0.7;0.9;0.5;35;0.1;0.2\n\
                        Y;bad date;1.0;0.7;0.9;0.5;35;0.1;0.2\n";

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2023, 6, d).unwrap()
    }

    #[test]
    fn same_day_rows_are_averaged() {
        let index = FloxIndex::from_reader(FLOX.as_bytes(), "flox.csv").unwrap();
        assert_eq!(index.len(), 2);
        let rec = index.get("X", day(16)).unwrap();
        assert_eq!(rec.samples, 2);
        assert_relative_eq!(rec.value(SifMetric::FarRedMax).unwrap(), 1.3, epsilon = 1e-12);
        assert_relative_eq!(rec.value(SifMetric::RedMax).unwrap(), 0.8);
        assert_relative_eq!(rec.value(SifMetric::Integrated).unwrap(), 42.0);
        assert!(index.get("X", day(17)).is_some());
        assert!(index.get("Y", day(16)).is_none());
    }

    #[test]
    fn missing_datetime_column_is_fatal() {
        let err = FloxIndex::from_reader("site_code;SIF_O2A\nX;1\n".as_bytes(), "f").unwrap_err();
        assert!(matches!(err, Error::MissingColumn { ref column, .. } if column == "UTC_datetime"));
    }
}
