#![allow(dead_code)]

use std::collections::BTreeMap;

use ndarray::Array2;

use flexcal::core::processing::mask::MaskTriplet;
use flexcal::io::flex::{INTEGRATED_SIF, LEAF_AREA_INDEX, emission_variable, uncertainty_variable};
use flexcal::io::sentinel2::{BoaCalibration, ToaCalibration, ZenithGrid};
use flexcal::{
    AcquisitionSource, Error, FlexImage, FloxIndex, GridGeometry, PixelWindow, ProcessingLevel,
    ReflectanceProduct, Result, SiteCatalog, SpectralBand,
};

pub const SITE: &str = "X";
pub const FLEX_FILE: &str = "PRS_TD_20230616_101431.nc";

/// Site pixel of the fake Sentinel-2 grid
pub const SITE_XY: (f64, f64) = (600_605.0, 5_099_395.0);

pub fn catalog() -> SiteCatalog {
    let csv = "site_code,latitude,longitude,reference_area,time_window_days\nX,45.0,9.0,300,10\n";
    SiteCatalog::from_reader(csv.as_bytes(), "Sites.csv").unwrap()
}

pub fn flox() -> FloxIndex {
    let csv = "site_code;UTC_datetime;SIF_FARRED_max;SIF_RED_max;SIF_O2A;SIF_O2B;SIF_int;SIF_O2A_un;SIF_O2B_un\n\
               X;16/06/2023 10:00;1.6;0.9;1.2;0.7;5.0;0.1;0.2\n\
               X;16/06/2023 10:30;1.4;1.1;1.0;0.9;7.0;0.1;0.2\n";
    FloxIndex::from_reader(csv.as_bytes(), "flox.csv").unwrap()
}

/// 7 x 7 FLEX scene centred on the site with every layer constant.
pub fn flex_image(name: &str, lai: f64) -> FlexImage {
    let lat: Vec<f64> = (0..7).map(|i| 45.009 - 0.003 * i as f64).collect();
    let lon: Vec<f64> = (0..7).map(|i| 8.991 + 0.003 * i as f64).collect();
    let mut image = FlexImage::new(name, lat, lon).unwrap();
    let mut put = |layer: String, value: f64| {
        image
            .insert_layer(&layer, Array2::from_elem((7, 7), value))
            .unwrap();
    };
    put(emission_variable("740"), 1.5);
    put(emission_variable("684"), 1.0);
    put(emission_variable("760"), 1.1);
    put(emission_variable("686"), 0.8);
    put(uncertainty_variable("760"), 0.1);
    put(uncertainty_variable("686"), 0.2);
    put(INTEGRATED_SIF.to_string(), 6.0);
    put(LEAF_AREA_INDEX.to_string(), lai);
    image
}

pub fn band_grid() -> GridGeometry {
    GridGeometry {
        geotransform: [600_000.0, 10.0, 0.0, 5_100_000.0, 0.0, -10.0],
        crs: "EPSG:32632".into(),
        rows: 120,
        cols: 120,
    }
}

pub fn mask_grid() -> GridGeometry {
    GridGeometry {
        geotransform: [600_000.0, 60.0, 0.0, 5_100_000.0, 0.0, -60.0],
        crs: "EPSG:32632".into(),
        rows: 20,
        cols: 20,
    }
}

/// Uniform Sentinel-2 product: NDVI 0.5, NIRv reflectance 0.15.
#[derive(Clone)]
pub struct FakeProduct {
    pub id: String,
    pub l2a_grid: GridGeometry,
    pub l1c_grid: GridGeometry,
    pub mask: MaskTriplet,
    pub red_dn: f64,
    pub nir_dn: f64,
    /// Zero both bands at the site pixel, making the proxy NaN there
    pub hole_at_site: bool,
}

impl FakeProduct {
    pub fn clear() -> Self {
        Self {
            id: String::new(),
            l2a_grid: band_grid(),
            l1c_grid: band_grid(),
            mask: MaskTriplet::clear((20, 20)),
            red_dn: 1000.0,
            nir_dn: 3000.0,
            hole_at_site: false,
        }
    }
}

impl ReflectanceProduct for FakeProduct {
    fn product_id(&self) -> &str {
        &self.id
    }

    fn grid(&self, level: ProcessingLevel) -> Result<GridGeometry> {
        Ok(match level {
            ProcessingLevel::L1C => self.l1c_grid.clone(),
            ProcessingLevel::L2A => self.l2a_grid.clone(),
        })
    }

    fn project_site(&self, _lat: f64, _lon: f64, _crs: &str) -> Result<(f64, f64)> {
        Ok(SITE_XY)
    }

    fn read_band(
        &self,
        _level: ProcessingLevel,
        band: SpectralBand,
        window: &PixelWindow,
    ) -> Result<Array2<f64>> {
        let dn = match band {
            SpectralBand::Red => self.red_dn,
            SpectralBand::Nir => self.nir_dn,
        };
        let mut values = Array2::from_elem((window.rows, window.cols), dn);
        if self.hole_at_site {
            let (row, col) = self.l2a_grid.pixel_of(SITE_XY.0, SITE_XY.1);
            if let Some(local) = window.local(row as usize, col as usize) {
                values[local] = 0.0;
            }
        }
        Ok(values)
    }

    fn read_mask(&self, _level: ProcessingLevel) -> Result<(MaskTriplet, GridGeometry)> {
        Ok((self.mask.clone(), mask_grid()))
    }

    fn boa_calibration(&self) -> Result<BoaCalibration> {
        Ok(BoaCalibration {
            quantification: 10_000.0,
            red_offset: 0.0,
            nir_offset: 0.0,
        })
    }

    fn toa_calibration(&self) -> Result<ToaCalibration> {
        Ok(ToaCalibration {
            quantification: 10_000.0,
            nir_offset: 0.0,
            u: 1.0,
            solar_irradiance: 1036.0,
        })
    }

    fn sun_zenith(&self) -> Result<ZenithGrid> {
        Ok(ZenithGrid {
            values: Array2::from_elem((23, 23), 30.0),
            step_m: Some(5000.0),
        })
    }
}

/// In-memory acquisitions for a handful of sites.
#[derive(Default)]
pub struct MemorySource {
    pub flex: BTreeMap<(String, String), FlexImage>,
    pub s2: BTreeMap<String, Vec<String>>,
    pub product: Option<FakeProduct>,
    /// Extra FLEX directory entries listed for every site
    pub stray_names: Vec<String>,
}

impl MemorySource {
    pub fn with_flex(mut self, site: &str, image: FlexImage) -> Self {
        self.flex
            .insert((site.to_string(), image.filename.clone()), image);
        self
    }

    pub fn with_s2(mut self, site: &str, name: &str, product: FakeProduct) -> Self {
        self.s2.entry(site.to_string()).or_default().push(name.to_string());
        self.product = Some(product);
        self
    }
}

impl AcquisitionSource for MemorySource {
    fn flex_images(&self, site: &str) -> Result<Vec<String>> {
        Ok(self
            .flex
            .keys()
            .filter(|(s, _)| s == site)
            .map(|(_, name)| name.clone())
            .chain(self.stray_names.iter().cloned())
            .collect())
    }

    fn load_flex(&self, site: &str, filename: &str) -> Result<FlexImage> {
        self.flex
            .get(&(site.to_string(), filename.to_string()))
            .cloned()
            .ok_or_else(|| Error::Processing(format!("no FLEX image {}", filename)))
    }

    fn s2_products(&self, site: &str) -> Result<Vec<String>> {
        let mut names = self.s2.get(site).cloned().unwrap_or_default();
        names.sort();
        Ok(names)
    }

    fn open_s2(&self, _site: &str, product: &str) -> Result<Box<dyn ReflectanceProduct>> {
        let mut fake = self
            .product
            .clone()
            .ok_or_else(|| Error::Processing(format!("no product {}", product)))?;
        fake.id = product.to_string();
        Ok(Box::new(fake))
    }
}

/// Matchup table as (header, rows)
pub fn read_table(path: &std::path::Path) -> (Vec<String>, Vec<Vec<String>>) {
    let mut rdr = csv::Reader::from_path(path).unwrap();
    let header = rdr.headers().unwrap().iter().map(String::from).collect();
    let rows = rdr
        .records()
        .map(|r| r.unwrap().iter().map(String::from).collect())
        .collect();
    (header, rows)
}
