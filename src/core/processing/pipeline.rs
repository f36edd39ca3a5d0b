//! Per-acquisition processing shared by FLEX and Sentinel-2.
//!
//! Both kinds go through the same steps: list candidates, locate the one to use, open it
//! around the site, gate it on quality, compute ROI rasters and summarize them.
use std::collections::BTreeMap;
use std::path::Path;

use chrono::{Duration, NaiveDateTime};
use ndarray::Array2;
use tracing::{debug, warn};

use crate::core::params::{CalValParams, SiteSettings};
use crate::core::processing::indices::{self, SolarGeometry};
use crate::core::processing::locate::{Located, nearest};
use crate::core::processing::mask::{self, QualityVerdict, resolution_ratio};
use crate::core::processing::roi::{FluorescenceRoi, ReflectanceRoi, ensure_same_crs, mask_outside};
use crate::core::processing::stats::{SpatialSummary, nan_mean, nan_std};
use crate::error::{Error, Result};
use crate::io::flex::{EMISSION_PREFIX, FlexImage, LEAF_AREA_INDEX, metric_variable, parse_flex_filename};
use crate::io::scratch::ScratchArea;
use crate::io::sentinel2::parse_product_timestamp;
use crate::io::source::{AcquisitionSource, ReflectanceProduct, SpectralBand};
use crate::io::writers::reports::SifSummaryRow;
use crate::io::writers::tiff::{write_tiff_f64, write_tiff_u16};
use crate::types::{GridGeometry, PixelWindow, ProcessingLevel, ProxyIndex, SifMetric};

pub const NOTE_INSUFFICIENT_VEGETATION: &str = "Insufficient vegetation pixels";

/// Outcome of a quality gate: the measured quality and, on failure, the reason.
#[derive(Debug, Clone, PartialEq)]
pub struct Gate<Q> {
    pub quality: Q,
    pub note: Option<String>,
}

impl<Q> Gate<Q> {
    pub fn passed(&self) -> bool {
        self.note.is_none()
    }
}

pub trait AcquisitionProcessor {
    type Acquisition;
    type Quality;
    type Indices;
    type Summary;

    /// Acquisitions available for a site with their timestamps, in name order
    fn candidates(&self, site: &SiteSettings) -> Result<Vec<(String, NaiveDateTime)>>;

    /// The candidate nearest to `reference`, within `window` when given
    fn locate(
        &self,
        site: &SiteSettings,
        reference: NaiveDateTime,
        window: Option<Duration>,
    ) -> Result<Located> {
        Ok(nearest(&self.candidates(site)?, reference, window)?)
    }

    fn open(&self, site: &SiteSettings, located: &Located) -> Result<Self::Acquisition>;

    fn qualify(&self, site: &SiteSettings, acquisition: &Self::Acquisition) -> Result<Gate<Self::Quality>>;

    fn index(
        &self,
        site: &SiteSettings,
        acquisition: &Self::Acquisition,
        quality: &Self::Quality,
    ) -> Result<Self::Indices>;

    fn summarize(&self, site: &SiteSettings, indices: &Self::Indices) -> Self::Summary;
}

// ---------------------------------------------------------------------------
// FLEX

/// FLEX image with its ROI around the site.
#[derive(Debug, Clone)]
pub struct FlexScene {
    pub image: FlexImage,
    pub roi: FluorescenceRoi,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VegetationCover {
    /// Share of ROI cells with LAI > 0
    pub fraction: f64,
    /// False when the product carries no LAI layer
    pub measured: bool,
}

/// Per-layer and per-metric ROI values of one FLEX image.
#[derive(Debug, Clone, PartialEq)]
pub struct FlexSummary {
    pub sif: Vec<SifSummaryRow>,
    /// ROI mean of the layer matching each metric
    pub metrics: BTreeMap<SifMetric, f64>,
}

pub struct FluorescenceProcessor<'a> {
    source: &'a dyn AcquisitionSource,
    params: &'a CalValParams,
}

impl<'a> FluorescenceProcessor<'a> {
    pub fn new(source: &'a dyn AcquisitionSource, params: &'a CalValParams) -> Self {
        Self { source, params }
    }

    /// FLEX files of a site split into usable candidates and names that were rejected.
    pub fn listing(&self, site: &SiteSettings) -> Result<FlexListing> {
        let mut listing = FlexListing::default();
        for name in self.source.flex_images(&site.code)? {
            match parse_flex_filename(&name) {
                Ok(ts) => listing.candidates.push((name, ts)),
                Err(e) => listing.rejected.push((name, e.into())),
            }
        }
        Ok(listing)
    }
}

#[derive(Debug, Default)]
pub struct FlexListing {
    pub candidates: Vec<(String, NaiveDateTime)>,
    pub rejected: Vec<(String, Error)>,
}

impl AcquisitionProcessor for FluorescenceProcessor<'_> {
    type Acquisition = FlexScene;
    type Quality = VegetationCover;
    /// ROI cut of every loaded layer except LAI
    type Indices = BTreeMap<String, Array2<f64>>;
    type Summary = FlexSummary;

    fn candidates(&self, site: &SiteSettings) -> Result<Vec<(String, NaiveDateTime)>> {
        let listing = self.listing(site)?;
        for (name, e) in &listing.rejected {
            warn!("{}: skipping {}: {}", site.code, name, e);
        }
        Ok(listing.candidates)
    }

    fn open(&self, site: &SiteSettings, located: &Located) -> Result<FlexScene> {
        let image = self.source.load_flex(&site.code, &located.name)?;
        let roi = FluorescenceRoi::build(
            &image.lat,
            &image.lon,
            site.latitude,
            site.longitude,
            site.roi_size,
        )?;
        debug!(
            "{} {}: ROI rows {:?} cols {:?}",
            site.code, image.filename, roi.rows, roi.cols
        );
        Ok(FlexScene { image, roi })
    }

    fn qualify(&self, site: &SiteSettings, scene: &FlexScene) -> Result<Gate<VegetationCover>> {
        let Some(lai) = scene.image.layer(LEAF_AREA_INDEX) else {
            warn!(
                "{} {}: no `{}` layer, vegetation check skipped",
                site.code, scene.image.filename, LEAF_AREA_INDEX
            );
            return Ok(Gate {
                quality: VegetationCover {
                    fraction: 1.0,
                    measured: false,
                },
                note: None,
            });
        };
        let view = scene.roi.slice(lai);
        let vegetated = view.iter().filter(|v| v.is_finite() && **v > 0.0).count();
        let fraction = if view.is_empty() {
            0.0
        } else {
            vegetated as f64 / view.len() as f64
        };
        let note = (fraction < site.vegetation_threshold)
            .then(|| NOTE_INSUFFICIENT_VEGETATION.to_string());
        Ok(Gate {
            quality: VegetationCover {
                fraction,
                measured: true,
            },
            note,
        })
    }

    fn index(
        &self,
        _site: &SiteSettings,
        scene: &FlexScene,
        _quality: &VegetationCover,
    ) -> Result<BTreeMap<String, Array2<f64>>> {
        Ok(scene
            .image
            .layers()
            .filter(|(name, _)| *name != LEAF_AREA_INDEX)
            .map(|(name, values)| (name.to_string(), scene.roi.slice(values).to_owned()))
            .collect())
    }

    fn summarize(&self, _site: &SiteSettings, layers: &BTreeMap<String, Array2<f64>>) -> FlexSummary {
        let sif = layers
            .iter()
            .filter(|(name, _)| name.starts_with(EMISSION_PREFIX))
            .map(|(name, values)| SifSummaryRow {
                band: name.clone(),
                average: nan_mean(values),
                std: nan_std(values),
            })
            .collect();
        let metrics = SifMetric::ALL
            .into_iter()
            .filter_map(|metric| {
                let values = layers.get(&metric_variable(metric, &self.params.sif_bands))?;
                Some((metric, nan_mean(values)))
            })
            .collect();
        FlexSummary { sif, metrics }
    }
}

// ---------------------------------------------------------------------------
// Sentinel-2

/// Sentinel-2 product opened around a site.
pub struct S2Scene {
    pub product: Box<dyn ReflectanceProduct>,
    pub site: String,
    pub l1c_grid: GridGeometry,
    pub l2a_grid: GridGeometry,
    pub roi: ReflectanceRoi,
    /// ROI window on the L2A grid
    pub window: PixelWindow,
    /// ROI window on the L1C grid
    pub l1c_window: PixelWindow,
}

impl S2Scene {
    pub fn product_id(&self) -> &str {
        self.product.product_id()
    }

    fn grid(&self, level: ProcessingLevel) -> &GridGeometry {
        match level {
            ProcessingLevel::L1C => &self.l1c_grid,
            ProcessingLevel::L2A => &self.l2a_grid,
        }
    }
}

/// Mask verdicts of both processing levels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MaskVerdicts {
    pub l1c: QualityVerdict,
    pub l2a: QualityVerdict,
}

/// ROI index rasters on the L2A window; cells outside the ROI are NaN.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectanceIndices {
    pub ndvi: Array2<f64>,
    pub nirv_reflectance: Array2<f64>,
    pub radiance: Array2<f64>,
    pub nirv_radiance: Array2<f64>,
    pub window: PixelWindow,
    /// Site pixel inside `window`
    pub site_cell: Option<(usize, usize)>,
}

impl ReflectanceIndices {
    pub fn proxy(&self, proxy: ProxyIndex) -> &Array2<f64> {
        match proxy {
            ProxyIndex::NirvReflectance => &self.nirv_reflectance,
            ProxyIndex::NirvRadiance => &self.nirv_radiance,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReflectanceSummary {
    pub ndvi: SpatialSummary,
    /// NIRv flavour selected as transfer proxy
    pub nirv: SpatialSummary,
}

pub struct ReflectanceProcessor<'a> {
    source: &'a dyn AcquisitionSource,
    params: &'a CalValParams,
    scratch: Option<&'a ScratchArea>,
}

impl<'a> ReflectanceProcessor<'a> {
    pub fn new(
        source: &'a dyn AcquisitionSource,
        params: &'a CalValParams,
        scratch: Option<&'a ScratchArea>,
    ) -> Self {
        Self {
            source,
            params,
            scratch,
        }
    }

    // Directory for interim rasters of a product, when they are kept
    fn interim_dir(&self, scene: &S2Scene) -> Result<Option<std::path::PathBuf>> {
        match self.scratch {
            Some(scratch) if self.params.keep_interim => {
                Ok(Some(scratch.product_dir(&scene.site, scene.product_id())?))
            }
            _ => Ok(None),
        }
    }
}

fn interim_metadata(scene: &S2Scene, layer: &str) -> BTreeMap<String, String> {
    BTreeMap::from([
        ("SITE".to_string(), scene.site.clone()),
        ("PRODUCT".to_string(), scene.product_id().to_string()),
        ("LAYER".to_string(), layer.to_string()),
    ])
}

fn save_index(dir: &Path, scene: &S2Scene, name: &str, values: &Array2<f64>) -> Result<()> {
    let grid = scene.l2a_grid.subgrid(&scene.window);
    write_tiff_f64(&dir.join(format!("{}.tif", name)), values, &grid, &interim_metadata(scene, name))?;
    Ok(())
}

impl AcquisitionProcessor for ReflectanceProcessor<'_> {
    type Acquisition = S2Scene;
    type Quality = MaskVerdicts;
    type Indices = ReflectanceIndices;
    type Summary = ReflectanceSummary;

    fn candidates(&self, site: &SiteSettings) -> Result<Vec<(String, NaiveDateTime)>> {
        let mut found = Vec::new();
        for name in self.source.s2_products(&site.code)? {
            match parse_product_timestamp(&name)? {
                Some(ts) => found.push((name, ts)),
                None => warn!("{}: no sensing time in product name {}", site.code, name),
            }
        }
        Ok(found)
    }

    fn open(&self, site: &SiteSettings, located: &Located) -> Result<S2Scene> {
        let product = self.source.open_s2(&site.code, &located.name)?;
        let l1c_grid = product.grid(ProcessingLevel::L1C)?;
        let l2a_grid = product.grid(ProcessingLevel::L2A)?;
        ensure_same_crs(&l1c_grid, &l2a_grid)?;

        let site_xy = product.project_site(site.latitude, site.longitude, &l2a_grid.crs)?;
        let roi = ReflectanceRoi::build(&l2a_grid, site_xy, site.roi_size)?;
        let window = roi.bbox.window_on(&l2a_grid).ok_or_else(|| {
            Error::Processing(format!("{}: ROI outside the L2A grid", located.name))
        })?;
        let l1c_window = roi.bbox.window_on(&l1c_grid).ok_or_else(|| {
            Error::Processing(format!("{}: ROI outside the L1C grid", located.name))
        })?;
        debug!(
            "{} {}: site pixel {:?}, ROI window {:?}",
            site.code, located.name, roi.site_pixel, window
        );
        Ok(S2Scene {
            product,
            site: site.code.clone(),
            l1c_grid,
            l2a_grid,
            roi,
            window,
            l1c_window,
        })
    }

    fn qualify(&self, site: &SiteSettings, scene: &S2Scene) -> Result<Gate<MaskVerdicts>> {
        let interim = self.interim_dir(scene)?;
        let mut verdicts = Vec::with_capacity(ProcessingLevel::ALL.len());
        for level in ProcessingLevel::ALL {
            let (triplet, mask_grid) = scene.product.read_mask(level)?;
            let grid = scene.grid(level);
            let ratio = resolution_ratio(&mask_grid, grid)?;
            let outcome = mask::evaluate(
                &triplet,
                grid,
                &scene.roi.bbox,
                ratio,
                site.cloud_threshold,
                site.roi_size,
                grid.pixel_width().abs(),
            )?;
            debug!(
                "{} {} {}: {} valid / {} invalid pixels",
                site.code,
                scene.product_id(),
                level,
                outcome.verdict.valid_pixel_count,
                outcome.verdict.invalid_pixel_count
            );
            if let (Some(dir), Some((clipped, window))) = (&interim, &outcome.clipped) {
                let name = format!("{}_mask", level);
                write_tiff_u16(
                    &dir.join(format!("{}.tif", name)),
                    clipped,
                    &grid.subgrid(window),
                    &interim_metadata(scene, &name),
                )?;
            }
            verdicts.push(outcome.verdict);
        }
        let quality = MaskVerdicts {
            l1c: verdicts[0],
            l2a: verdicts[1],
        };
        let note = (!(quality.l1c.passed && quality.l2a.passed)).then(|| {
            format!(
                "The percentage of valid pixels is below {:.0}%",
                site.cloud_threshold * 100.0
            )
        });
        Ok(Gate { quality, note })
    }

    fn index(
        &self,
        site: &SiteSettings,
        scene: &S2Scene,
        _quality: &MaskVerdicts,
    ) -> Result<ReflectanceIndices> {
        let product = scene.product.as_ref();
        let red = product.read_band(ProcessingLevel::L2A, SpectralBand::Red, &scene.window)?;
        let nir = product.read_band(ProcessingLevel::L2A, SpectralBand::Nir, &scene.window)?;
        let boa = product.boa_calibration()?;

        let mut ndvi = indices::ndvi(&red, &nir, boa.quantification, boa.red_offset, boa.nir_offset);
        let nir_reflectance = indices::reflectance(&nir, boa.quantification, boa.nir_offset);
        let mut nirv_reflectance = indices::nirv(&ndvi, &nir_reflectance);

        let toa = product.toa_calibration()?;
        let zenith = product.sun_zenith()?;
        let l1c_nir = product.read_band(ProcessingLevel::L1C, SpectralBand::Nir, &scene.l1c_window)?;
        let sun = SolarGeometry::new(
            zenith.values,
            zenith.step_m,
            scene.l1c_grid.pixel_width().abs(),
            (scene.l1c_grid.rows, scene.l1c_grid.cols),
        )?;
        let mut radiance = indices::radiance(
            &l1c_nir,
            &scene.l1c_window,
            toa.nir_offset,
            &sun,
            toa.solar_irradiance,
            toa.quantification,
            toa.u,
        )?;
        if radiance.dim() != ndvi.dim() {
            return Err(Error::Processing(format!(
                "{}: L1C ROI {:?} and L2A ROI {:?} differ",
                scene.product_id(),
                radiance.dim(),
                ndvi.dim()
            )));
        }
        let mut nirv_radiance = indices::nirv(&ndvi, &radiance);

        for values in [&mut ndvi, &mut nirv_reflectance, &mut radiance, &mut nirv_radiance] {
            mask_outside(values, &scene.l2a_grid, &scene.window, &scene.roi.bbox);
        }

        if let Some(dir) = self.interim_dir(scene)? {
            save_index(&dir, scene, "NDVI", &ndvi)?;
            save_index(&dir, scene, "NIRv_reflectance", &nirv_reflectance)?;
            save_index(&dir, scene, "radiance", &radiance)?;
            save_index(&dir, scene, "NIRv_radiance", &nirv_radiance)?;
        }

        let site_cell = scene.roi.site_in(&scene.window);
        if site_cell.is_none() {
            warn!("{} {}: site pixel outside ROI window", site.code, scene.product_id());
        }
        Ok(ReflectanceIndices {
            ndvi,
            nirv_reflectance,
            radiance,
            nirv_radiance,
            window: scene.window,
            site_cell,
        })
    }

    fn summarize(&self, site: &SiteSettings, indices: &ReflectanceIndices) -> ReflectanceSummary {
        ReflectanceSummary {
            ndvi: SpatialSummary::of(&indices.ndvi, site.cv_threshold),
            nirv: SpatialSummary::of(indices.proxy(self.params.proxy), site.cv_threshold),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::io::flex::emission_variable;
    use crate::types::RoiSize;
    use approx::assert_relative_eq;

    struct FlexOnly {
        image: FlexImage,
        names: Vec<String>,
    }

    impl AcquisitionSource for FlexOnly {
        fn flex_images(&self, _site: &str) -> Result<Vec<String>> {
            Ok(self.names.clone())
        }

        fn load_flex(&self, _site: &str, _filename: &str) -> Result<FlexImage> {
            Ok(self.image.clone())
        }

        fn s2_products(&self, _site: &str) -> Result<Vec<String>> {
            Ok(Vec::new())
        }

        fn open_s2(&self, _site: &str, product: &str) -> Result<Box<dyn ReflectanceProduct>> {
            Err(Error::Processing(format!("no product {}", product)))
        }
    }

    fn settings() -> SiteSettings {
        CalValParams::default().resolve(&crate::core::catalog::Site {
            code: "X".into(),
            latitude: 45.0,
            longitude: 9.0,
            roi_size: Some(RoiSize::M900),
            time_window_days: None,
            cv_threshold: None,
            vegetation_threshold: Some(0.5),
            cloud_threshold: None,
        })
    }

    fn image(lai: f64) -> FlexImage {
        let lat: Vec<f64> = (0..7).map(|i| 45.009 - 0.003 * i as f64).collect();
        let lon: Vec<f64> = (0..7).map(|i| 8.991 + 0.003 * i as f64).collect();
        let mut image = FlexImage::new("PRS_TD_20230616_101431.nc", lat, lon).unwrap();
        image
            .insert_layer(&emission_variable("760"), Array2::from_elem((7, 7), 2.0))
            .unwrap();
        image
            .insert_layer(LEAF_AREA_INDEX, Array2::from_elem((7, 7), lai))
            .unwrap();
        image
    }

    #[test]
    fn bad_flex_names_are_not_candidates() {
        let params = CalValParams::default();
        let source = FlexOnly {
            image: image(1.0),
            names: vec!["PRS_TD_20230616_101431.nc".into(), "PRS_TD_bad.nc".into()],
        };
        let processor = FluorescenceProcessor::new(&source, &params);
        let found = processor.candidates(&settings()).unwrap();
        assert_eq!(found.len(), 1);
        assert_eq!(found[0].0, "PRS_TD_20230616_101431.nc");

        let listing = processor.listing(&settings()).unwrap();
        assert_eq!(listing.rejected.len(), 1);
        assert_eq!(listing.rejected[0].0, "PRS_TD_bad.nc");
        assert!(matches!(listing.rejected[0].1, Error::Flex(crate::io::FlexError::BadFilename(_))));
    }

    #[test]
    fn nirv_summary_follows_the_proxy() {
        let source = FlexOnly {
            image: image(1.0),
            names: vec![],
        };
        let indices = ReflectanceIndices {
            ndvi: Array2::from_elem((2, 2), 0.5),
            nirv_reflectance: Array2::from_elem((2, 2), 0.15),
            radiance: Array2::from_elem((2, 2), 80.0),
            nirv_radiance: Array2::from_shape_vec((2, 2), vec![30.0, 40.0, 40.0, 50.0]).unwrap(),
            window: PixelWindow::new(0, 0, 2, 2),
            site_cell: Some((0, 0)),
        };
        let site = settings();

        let reflectance = CalValParams::default();
        let summary = ReflectanceProcessor::new(&source, &reflectance, None).summarize(&site, &indices);
        assert_relative_eq!(summary.nirv.mean, 0.15, epsilon = 1e-12);

        let radiance = CalValParams {
            proxy: ProxyIndex::NirvRadiance,
            ..CalValParams::default()
        };
        let summary = ReflectanceProcessor::new(&source, &radiance, None).summarize(&site, &indices);
        assert_relative_eq!(summary.nirv.mean, 40.0, epsilon = 1e-12);
        assert_relative_eq!(summary.ndvi.mean, 0.5);
    }

    #[test]
    fn vegetation_gate_and_summary() {
        let params = CalValParams::default();
        let site = settings();
        let located = Located::new(
            "PRS_TD_20230616_101431.nc",
            parse_flex_filename("PRS_TD_20230616_101431.nc").unwrap(),
        );

        let bare = FlexOnly {
            image: image(0.0),
            names: vec![],
        };
        let processor = FluorescenceProcessor::new(&bare, &params);
        let scene = processor.open(&site, &located).unwrap();
        assert_eq!(scene.roi.shape(), (3, 3));
        let gate = processor.qualify(&site, &scene).unwrap();
        assert!(!gate.passed());
        assert_eq!(gate.note.as_deref(), Some(NOTE_INSUFFICIENT_VEGETATION));

        let green = FlexOnly {
            image: image(3.0),
            names: vec![],
        };
        let processor = FluorescenceProcessor::new(&green, &params);
        let scene = processor.open(&site, &located).unwrap();
        let gate = processor.qualify(&site, &scene).unwrap();
        assert!(gate.passed());
        assert_eq!(gate.quality.fraction, 1.0);

        let layers = processor.index(&site, &scene, &gate.quality).unwrap();
        assert!(!layers.contains_key(LEAF_AREA_INDEX));
        let summary = processor.summarize(&site, &layers);
        assert_eq!(summary.sif.len(), 1);
        assert_relative_eq!(summary.sif[0].average, 2.0);
        assert_relative_eq!(summary.metrics[&SifMetric::O2A], 2.0);
        assert!(!summary.metrics.contains_key(&SifMetric::Integrated));
    }
}
