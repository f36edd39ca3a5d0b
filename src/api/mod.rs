//! High-level library API: run the cal/val pipeline over a work directory, or over any
//! `AcquisitionSource` when the inputs live elsewhere. Prefer these entrypoints over the
//! low-level processing modules when integrating flexcal.
use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use tracing::{debug, info, warn};

use crate::core::catalog::SiteCatalog;
use crate::core::params::{CalValParams, SiteSettings};
use crate::core::processing::locate::{LocateError, Located};
use crate::core::processing::pipeline::{
    AcquisitionProcessor, FlexListing, FluorescenceProcessor, ReflectanceProcessor,
};
use crate::core::processing::transfer;
use crate::core::processing::validation::fit;
use crate::error::{Error, Result};
use crate::io::flex::parse_flex_filename;
use crate::io::flox::{FloxIndex, FloxRecord};
use crate::io::scratch::ScratchArea;
use crate::io::source::{AcquisitionSource, DirectorySource};
use crate::io::writers::metadata::{RunCounters, RunSummary, write_run_summary};
use crate::io::writers::reports::{
    FlexMetricsRow, MatchupRecord, MetricValues, S2ReportRow, SifSummaryRow, UsableFlexRow,
    ValidationRow, fmt_num, read_flex_metrics, read_usable_flex, write_flex_metrics,
    write_matchups, write_rows,
};
use crate::types::{RunMode, SifMetric};

pub const SITES_FILE: &str = "Sites.csv";
pub const FLOX_FILE: &str = "flox.csv";
pub const CONFIG_FILE: &str = "calval.json";
pub const FLEX_DIR: &str = "input_flex_images";
pub const S2_DIR: &str = "input_s2_images";
pub const OUTPUT_DIR: &str = "output";
pub const CACHE_DIR: &str = "cache";

pub const USABLE_FLEX_FILE: &str = "usable_flex_images.csv";
pub const FLEX_METRICS_FILE: &str = "flex_metrics.csv";
pub const S2_REPORT_FILE: &str = "s2_report.csv";
pub const MATCHUP_FILE: &str = "matchup.csv";
pub const VALIDATION_FILE: &str = "validation.csv";
pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

pub const NOTE_NO_FLEX_IMAGES: &str = "No input FLEX images";
pub const NOTE_NO_S2_IMAGES: &str = "No input Sentinel-2 images";
pub const NOTE_INVALID_PIXEL: &str = "FLOX is on an invalid pixel";

pub const COMPARISON_FLOX: &str = "FLEX vs FLOX";
pub const COMPARISON_TRANSFER: &str = "FLEX vs TF";

/// Input and output locations of a run, rooted at a work directory.
#[derive(Debug, Clone, PartialEq)]
pub struct WorkspaceLayout {
    pub work_dir: PathBuf,
    pub sites: PathBuf,
    pub flox: PathBuf,
    pub flex_root: PathBuf,
    pub s2_root: PathBuf,
    pub output: PathBuf,
    pub cache: PathBuf,
}

impl WorkspaceLayout {
    pub fn new(work_dir: impl Into<PathBuf>) -> Self {
        let work_dir = work_dir.into();
        Self {
            sites: work_dir.join(SITES_FILE),
            flox: work_dir.join(FLOX_FILE),
            flex_root: work_dir.join(FLEX_DIR),
            s2_root: work_dir.join(S2_DIR),
            output: work_dir.join(OUTPUT_DIR),
            cache: work_dir.join(CACHE_DIR),
            work_dir,
        }
    }

    pub fn config_file(&self) -> PathBuf {
        self.work_dir.join(CONFIG_FILE)
    }

    /// Fail before any processing when an input the mode needs is missing.
    pub fn check(&self, mode: RunMode) -> Result<()> {
        let usable = self.output.join(USABLE_FLEX_FILE);
        let flex_metrics = self.output.join(FLEX_METRICS_FILE);
        let mut required = vec![&self.sites, &self.flox];
        if mode.includes_flex() {
            required.push(&self.flex_root);
        }
        if mode.includes_sentinel2() {
            required.push(&self.s2_root);
        }
        if mode == RunMode::Sentinel2 {
            required.push(&usable);
            required.push(&flex_metrics);
        }
        match required.into_iter().find(|p| !p.exists()) {
            Some(missing) => Err(Error::MissingInput(missing.clone())),
            None => Ok(()),
        }
    }
}

/// Everything a run produced, in memory.
#[derive(Debug, Clone, Default)]
pub struct RunReport {
    pub counters: RunCounters,
    pub usable_flex: Vec<UsableFlexRow>,
    pub flex_metrics: Vec<FlexMetricsRow>,
    pub s2_rows: Vec<S2ReportRow>,
    pub matchups: Vec<MatchupRecord>,
    pub validation: Vec<ValidationRow>,
    /// (site, FLEX filename, per-band summary)
    pub sif_tables: Vec<(String, String, Vec<SifSummaryRow>)>,
    pub outputs: Vec<PathBuf>,
}

// Result of one FLEX image, filled step by step so notes survive errors
struct ImageOutcome {
    s2_row: S2ReportRow,
    matchup: Option<MatchupRecord>,
    usable: Option<UsableFlexRow>,
    flex_metrics: Option<FlexMetricsRow>,
    sif: Option<Vec<SifSummaryRow>>,
    notes: Vec<String>,
    skipped: bool,
}

impl ImageOutcome {
    fn new(site: &SiteSettings, name: &str, ts: NaiveDateTime) -> Self {
        Self {
            s2_row: S2ReportRow::new(site, name, ts),
            matchup: None,
            usable: None,
            flex_metrics: None,
            sif: None,
            notes: Vec::new(),
            skipped: false,
        }
    }

    fn note(&mut self, site: &str, name: &str, text: impl Into<String>) {
        let text = text.into();
        warn!("{} {}: {}", site, name, text);
        self.notes.push(text);
    }

    fn skip(&mut self, site: &str, name: &str, text: impl Into<String>) {
        self.note(site, name, text);
        self.skipped = true;
    }
}

struct Stages<'a> {
    params: &'a CalValParams,
    flex: FluorescenceProcessor<'a>,
    s2: ReflectanceProcessor<'a>,
    flox: Option<&'a FloxIndex>,
    /// FLEX metric means of an earlier FLEX run, keyed by (site, filename)
    stored_flex: Option<BTreeMap<(String, String), BTreeMap<SifMetric, f64>>>,
}

/// Run the pipeline over every site of `catalog`, reading acquisitions from `source`
/// and writing the report tables into `output_dir`.
///
/// Per-image failures are logged, noted in the Sentinel-2 report and skipped; fatal
/// errors (missing inputs, CRS mismatch) abort the run.
pub fn run_calval(
    source: &dyn AcquisitionSource,
    catalog: &SiteCatalog,
    flox: Option<&FloxIndex>,
    params: &CalValParams,
    output_dir: &Path,
    scratch: Option<&ScratchArea>,
) -> Result<RunReport> {
    params.validate()?;
    info!(
        "Starting {} run over {} sites (proxy: {})",
        params.mode,
        catalog.len(),
        params.proxy
    );

    let (reference_list, stored_flex) = if params.mode == RunMode::Sentinel2 {
        let usable = read_usable_flex(&output_dir.join(USABLE_FLEX_FILE))?;
        let stored = read_flex_metrics(&output_dir.join(FLEX_METRICS_FILE))?
            .into_iter()
            .map(|row| ((row.site_code, row.filename), row.values))
            .collect();
        (Some(usable), Some(stored))
    } else {
        (None, None)
    };
    let stages = Stages {
        params,
        flex: FluorescenceProcessor::new(source, params),
        s2: ReflectanceProcessor::new(source, params, scratch),
        flox,
        stored_flex,
    };

    let mut report = RunReport::default();
    report.counters.sites = catalog.len();

    for site in catalog.iter() {
        let settings = params.resolve(site);
        info!("Processing site {}", settings.code);

        let listing = match &reference_list {
            Some(rows) => listed_images(rows, &settings),
            None => match stages.flex.listing(&settings) {
                Ok(listing) => listing,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.counters.errors += 1;
                    site_row(&mut report, &settings, None, format!("Cannot list FLEX images: {}", e));
                    continue;
                }
            },
        };
        if listing.candidates.is_empty() && listing.rejected.is_empty() {
            site_row(&mut report, &settings, None, NOTE_NO_FLEX_IMAGES.to_string());
        }
        for (name, e) in listing.rejected {
            report.counters.flex_images += 1;
            report.counters.skipped += 1;
            site_row(&mut report, &settings, Some(&name), e.to_string());
        }

        for (name, ts) in listing.candidates {
            report.counters.flex_images += 1;
            let mut outcome = ImageOutcome::new(&settings, &name, ts);
            match process_image(&stages, &settings, &name, ts, &mut outcome) {
                Ok(()) if outcome.skipped => report.counters.skipped += 1,
                Ok(()) => report.counters.processed += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    report.counters.errors += 1;
                    outcome.note(&settings.code, &name, e.to_string());
                }
            }
            collect(&mut report, &settings, &name, outcome);
        }

        if params.delete_cache {
            if let Some(scratch) = scratch {
                if let Err(e) = scratch.remove_site(&settings.code) {
                    warn!("{}: cannot clear scratch directory: {}", settings.code, e);
                }
            }
        }
    }

    report.counters.matchups = report.matchups.len();
    report.validation = validation_rows(&report.matchups);
    write_outputs(&mut report, params.mode, output_dir)?;
    info!(
        "Run complete: processed={} skipped={} errors={} matchups={}",
        report.counters.processed,
        report.counters.skipped,
        report.counters.errors,
        report.counters.matchups
    );
    Ok(report)
}

// FLEX files named in the usable list of an earlier run
fn listed_images(rows: &[UsableFlexRow], site: &SiteSettings) -> FlexListing {
    let mut listing = FlexListing::default();
    for row in rows.iter().filter(|row| row.site_code == site.code) {
        match parse_flex_filename(&row.filename) {
            Ok(ts) => listing.candidates.push((row.filename.clone(), ts)),
            Err(e) => listing.rejected.push((row.filename.clone(), e.into())),
        }
    }
    listing
}

// Sentinel-2 report row for an event outside the per-image steps
fn site_row(report: &mut RunReport, site: &SiteSettings, flex_filename: Option<&str>, note: String) {
    match flex_filename {
        Some(name) => warn!("{} {}: {}", site.code, name, note),
        None => warn!("{}: {}", site.code, note),
    }
    let mut row = S2ReportRow::for_site(site);
    if let Some(name) = flex_filename {
        row.flex_filename = name.to_string();
    }
    row.note = note;
    report.s2_rows.push(row);
}

fn collect(report: &mut RunReport, site: &SiteSettings, name: &str, outcome: ImageOutcome) {
    let ImageOutcome {
        mut s2_row,
        matchup,
        usable,
        flex_metrics,
        sif,
        notes,
        ..
    } = outcome;
    s2_row.note = notes.join("; ");
    if let Some(mut record) = matchup {
        record.notes = notes;
        report.matchups.push(record);
    }
    if let Some(row) = usable {
        report.usable_flex.push(row);
    }
    if let Some(row) = flex_metrics {
        report.flex_metrics.push(row);
    }
    if let Some(rows) = sif {
        report.sif_tables.push((site.code.clone(), name.to_string(), rows));
    }
    report.s2_rows.push(s2_row);
}

fn process_image(
    stages: &Stages<'_>,
    site: &SiteSettings,
    name: &str,
    ts: NaiveDateTime,
    out: &mut ImageOutcome,
) -> Result<()> {
    let date = ts.format("%Y%m%d").to_string();
    let ground = stages.flox.and_then(|index| index.get(&site.code, ts.date()));
    if stages.flox.is_some() && ground.is_none() {
        out.skip(&site.code, name, format!("No FLOX data on the same date {}", date));
        return Ok(());
    }

    let mut record = MatchupRecord::new(&site.code, &date, name);
    for metric in SifMetric::ALL {
        record.values.insert(
            metric,
            MetricValues {
                flox: ground.and_then(|g| g.value(metric)),
                ..MetricValues::default()
            },
        );
    }

    let located = Located::new(name, ts);
    if stages.params.mode.includes_flex() {
        let flex = &stages.flex;
        let scene = flex.open(site, &located)?;
        let gate = flex.qualify(site, &scene)?;
        if let Some(note) = gate.note {
            out.skip(&site.code, name, note);
            return Ok(());
        }
        debug!(
            "{} {}: vegetated fraction {:.3}",
            site.code, name, gate.quality.fraction
        );
        let layers = flex.index(site, &scene, &gate.quality)?;
        let summary = flex.summarize(site, &layers);
        for (&metric, &value) in &summary.metrics {
            record.values.entry(metric).or_default().flex = Some(value);
        }
        out.sif = Some(summary.sif);
        out.flex_metrics = Some(FlexMetricsRow {
            site_code: site.code.clone(),
            filename: name.to_string(),
            values: summary.metrics,
        });
        out.usable = Some(UsableFlexRow {
            site_code: site.code.clone(),
            filename: name.to_string(),
            date: date.clone(),
            time: ts.format("%H%M%S").to_string(),
        });
    } else if let Some(stored) = &stages.stored_flex {
        match stored.get(&(site.code.clone(), name.to_string())) {
            Some(values) => {
                for (&metric, &value) in values {
                    record.values.entry(metric).or_default().flex = Some(value);
                }
            }
            None => warn!("{} {}: no stored FLEX metrics", site.code, name),
        }
    }

    // Without a Sentinel-2 image in the time window the row is dropped; any other
    // Sentinel-2 problem only leaves TF empty.
    let s2_result = if stages.params.mode.includes_sentinel2() {
        pair_sentinel2(stages, site, &located, ground, out, &mut record)
    } else {
        Ok(())
    };
    if !out.skipped {
        out.matchup = Some(record);
    }
    s2_result
}

fn pair_sentinel2(
    stages: &Stages<'_>,
    site: &SiteSettings,
    flex: &Located,
    ground: Option<&FloxRecord>,
    out: &mut ImageOutcome,
    record: &mut MatchupRecord,
) -> Result<()> {
    let s2 = &stages.s2;
    let located = match s2.locate(site, flex.timestamp, Some(site.time_window())) {
        Ok(located) => located,
        Err(Error::Locate(LocateError::NoCandidates)) => {
            out.note(&site.code, &flex.name, NOTE_NO_S2_IMAGES);
            return Ok(());
        }
        Err(Error::Locate(LocateError::OutsideWindow {
            name, delta_days, ..
        })) => {
            out.s2_row.s2_product = name;
            out.s2_row.time_difference_days = format!("{:.2}", delta_days.abs());
            out.skip(
                &site.code,
                &flex.name,
                format!("No Sentinel-2 image within {} days", site.time_window_days),
            );
            return Ok(());
        }
        Err(e) => return Err(e),
    };

    let row = &mut out.s2_row;
    row.s2_product = located.name.clone();
    row.s2_date = located.timestamp.format("%Y%m%d").to_string();
    row.s2_time = located.timestamp.format("%H%M%S").to_string();
    if let Some(days) = located.delta_days() {
        row.time_difference_days = format!("{:.2}", days.abs());
    }
    record.s2_product = Some(located.name.clone());

    let scene = s2.open(site, &located)?;
    let gate = s2.qualify(site, &scene)?;
    let row = &mut out.s2_row;
    row.l1c_valid_pixels = gate.quality.l1c.valid_pixel_count.to_string();
    row.l1c_valid_percent = format!("{:.2}", gate.quality.l1c.valid_percent());
    row.l2a_valid_pixels = gate.quality.l2a.valid_pixel_count.to_string();
    row.l2a_valid_percent = format!("{:.2}", gate.quality.l2a.valid_percent());
    if let Some(note) = gate.note {
        out.note(&site.code, &flex.name, note);
        return Ok(());
    }

    let indices = s2.index(site, &scene, &gate.quality)?;
    let summary = s2.summarize(site, &indices);
    let row = &mut out.s2_row;
    row.ndvi_avg = fmt_num(summary.ndvi.mean);
    row.ndvi_sd = fmt_num(summary.ndvi.std);
    row.ndvi_cv = fmt_num(summary.ndvi.cv * 100.0);
    row.ndvi_cv_flag = summary.ndvi.flag.to_string();
    row.nirv_avg = fmt_num(summary.nirv.mean);
    row.nirv_sd = fmt_num(summary.nirv.std);
    row.nirv_cv = fmt_num(summary.nirv.cv * 100.0);
    row.nirv_cv_flag = summary.nirv.flag.to_string();

    let Some(ground) = ground else {
        return Ok(());
    };
    let proxy = indices.proxy(stages.params.proxy);
    let mut invalid_pixel = false;
    for metric in SifMetric::ALL {
        let Some(value) = ground.value(metric) else {
            continue;
        };
        let outcome = match indices.site_cell {
            Some((r, c)) => transfer::apply(proxy, r, c, value),
            None => transfer::TransferOutcome::NotApplicable,
        };
        invalid_pixel |= outcome.invalid_pixel();
        record.values.entry(metric).or_default().transfer = outcome.value();
    }
    if invalid_pixel {
        out.note(&site.code, &flex.name, NOTE_INVALID_PIXEL);
    }
    Ok(())
}

fn flox_value(v: &MetricValues) -> Option<f64> {
    v.flox
}

fn transfer_value(v: &MetricValues) -> Option<f64> {
    v.transfer
}

/// Regression of FLEX against FLOX and against the transfer-function estimate, per metric.
/// Metrics without any complete pair are left out.
pub fn validation_rows(matchups: &[MatchupRecord]) -> Vec<ValidationRow> {
    let comparisons: [(&str, fn(&MetricValues) -> Option<f64>); 2] = [
        (COMPARISON_FLOX, flox_value),
        (COMPARISON_TRANSFER, transfer_value),
    ];
    let mut rows = Vec::new();
    for (comparison, reference) in comparisons {
        for metric in SifMetric::ALL {
            let mut satellite = Vec::new();
            let mut ground = Vec::new();
            let mut sites = BTreeSet::new();
            for record in matchups {
                let values = record.value(metric);
                if let (Some(s), Some(g)) = (values.flex, reference(&values)) {
                    if s.is_finite() && g.is_finite() {
                        satellite.push(s);
                        ground.push(g);
                        sites.insert(record.site_code.as_str());
                    }
                }
            }
            if satellite.is_empty() {
                continue;
            }
            let result = fit(&satellite, &ground);
            rows.push(ValidationRow::new(comparison, metric, sites.len(), &result));
        }
    }
    rows
}

fn write_outputs(report: &mut RunReport, mode: RunMode, output_dir: &Path) -> Result<()> {
    std::fs::create_dir_all(output_dir)?;
    let mut outputs = Vec::new();

    for (site, filename, rows) in &report.sif_tables {
        let path = output_dir.join(site).join(format!("{} - sif.csv", filename));
        write_rows(&path, rows)?;
        outputs.push(path);
    }
    // Sentinel-2-only runs read these tables, so they never rewrite them.
    if mode.includes_flex() {
        let path = output_dir.join(USABLE_FLEX_FILE);
        write_rows(&path, &report.usable_flex)?;
        outputs.push(path);

        let path = output_dir.join(FLEX_METRICS_FILE);
        write_flex_metrics(&path, &report.flex_metrics)?;
        outputs.push(path);
    }
    let path = output_dir.join(S2_REPORT_FILE);
    write_rows(&path, &report.s2_rows)?;
    outputs.push(path);

    let path = output_dir.join(MATCHUP_FILE);
    write_matchups(&path, &report.matchups)?;
    outputs.push(path);

    let path = output_dir.join(VALIDATION_FILE);
    write_rows(&path, &report.validation)?;
    outputs.push(path);

    for path in &outputs {
        info!("Wrote {:?}", path);
    }
    report.outputs.extend(outputs);
    Ok(())
}

/// Run over a work directory laid out as `Sites.csv`, `flox.csv`, `input_flex_images/`,
/// `input_s2_images/`, writing into `output/` and caching interim rasters in `cache/`.
pub fn run_workspace(layout: &WorkspaceLayout, params: &CalValParams) -> Result<RunReport> {
    layout.check(params.mode)?;
    let catalog = SiteCatalog::load(&layout.sites)?;
    let flox = FloxIndex::load(&layout.flox)?;
    let source = DirectorySource::new(&layout.flex_root, &layout.s2_root);
    let scratch = ScratchArea::create(&layout.cache)?;

    let mut report = run_calval(
        &source,
        &catalog,
        Some(&flox),
        params,
        &layout.output,
        Some(&scratch),
    )?;

    let summary_path = layout.output.join(RUN_SUMMARY_FILE);
    report.outputs.push(summary_path.clone());
    let summary = RunSummary::new(
        &layout.work_dir,
        params,
        report.counters,
        report.outputs.clone(),
    );
    write_run_summary(&summary_path, &summary)?;

    if params.delete_cache {
        scratch.delete_all()?;
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn record(site: &str, flex: f64, flox: f64, tf: Option<f64>) -> MatchupRecord {
        let mut r = MatchupRecord::new(site, "20230616", "PRS_TD_20230616_101431.nc");
        r.values.insert(
            SifMetric::O2A,
            MetricValues {
                flox: Some(flox),
                flex: Some(flex),
                transfer: tf,
            },
        );
        r
    }

    #[test]
    fn validation_counts_sites_and_images() {
        let matchups = vec![
            record("A", 1.0, 3.0, Some(2.0)),
            record("A", 2.0, 5.0, None),
            record("B", 3.0, 7.0, Some(3.5)),
            record("B", 4.0, 9.0, Some(f64::NAN)),
        ];
        let rows = validation_rows(&matchups);
        assert_eq!(rows.len(), 2);

        let flox = &rows[0];
        assert_eq!(flox.comparison, COMPARISON_FLOX);
        assert_eq!(flox.metric, "SIF_O2A");
        assert_eq!((flox.n_sites, flox.n_images), (2, 4));
        assert_relative_eq!(flox.slope, 2.0, epsilon = 1e-12);
        assert_relative_eq!(flox.intercept, 1.0, epsilon = 1e-12);

        let tf = &rows[1];
        assert_eq!(tf.comparison, COMPARISON_TRANSFER);
        assert_eq!((tf.n_sites, tf.n_images), (2, 2));
    }

    #[test]
    fn layout_check_names_the_missing_input() {
        let dir = tempfile::tempdir().unwrap();
        let layout = WorkspaceLayout::new(dir.path());
        std::fs::write(&layout.sites, "site_code,latitude,longitude\n").unwrap();
        match layout.check(RunMode::Flex) {
            Err(Error::MissingInput(p)) => assert_eq!(p, layout.flox),
            other => panic!("unexpected {:?}", other),
        }
        std::fs::write(&layout.flox, "site_code;UTC_datetime\n").unwrap();
        std::fs::create_dir_all(&layout.flex_root).unwrap();
        assert!(layout.check(RunMode::Flex).is_ok());
        match layout.check(RunMode::Sentinel2) {
            Err(Error::MissingInput(p)) => assert_eq!(p, layout.s2_root),
            other => panic!("unexpected {:?}", other),
        }
        std::fs::create_dir_all(&layout.s2_root).unwrap();
        std::fs::create_dir_all(&layout.output).unwrap();
        std::fs::write(layout.output.join(USABLE_FLEX_FILE), "site_code\n").unwrap();
        match layout.check(RunMode::Sentinel2) {
            Err(Error::MissingInput(p)) => assert_eq!(p, layout.output.join(FLEX_METRICS_FILE)),
            other => panic!("unexpected {:?}", other),
        }
    }
}
