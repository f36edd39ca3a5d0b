//! Where acquisitions come from.
//!
//! The pipeline reads products through `AcquisitionSource` and `ReflectanceProduct`, so the
//! on-disk layout (`DirectorySource`) can be swapped for an in-memory one in tests.
use std::fs;
use std::path::{Path, PathBuf};

use ndarray::Array2;
use tracing::debug;

use crate::core::processing::mask::MaskTriplet;
use crate::error::Result;
use crate::io::flex::FlexImage;
use crate::io::sentinel2::{BoaCalibration, Sentinel2Product, ToaCalibration, ZenithGrid};
use crate::types::{GridGeometry, PixelWindow, ProcessingLevel};

#[derive(Copy, Clone, PartialEq, Eq, Debug)]
pub enum SpectralBand {
    /// B04
    Red,
    /// B08
    Nir,
}

/// One Sentinel-2 product with L1C and L2A levels.
pub trait ReflectanceProduct {
    fn product_id(&self) -> &str;

    /// Grid of the 10 m band rasters of `level`
    fn grid(&self, level: ProcessingLevel) -> Result<GridGeometry>;

    /// WGS84 latitude/longitude projected into `crs`
    fn project_site(&self, lat: f64, lon: f64, crs: &str) -> Result<(f64, f64)>;

    fn read_band(
        &self,
        level: ProcessingLevel,
        band: SpectralBand,
        window: &PixelWindow,
    ) -> Result<Array2<f64>>;

    /// Classification mask of `level` and the coarse grid it lives on
    fn read_mask(&self, level: ProcessingLevel) -> Result<(MaskTriplet, GridGeometry)>;

    fn boa_calibration(&self) -> Result<BoaCalibration>;

    fn toa_calibration(&self) -> Result<ToaCalibration>;

    fn sun_zenith(&self) -> Result<ZenithGrid>;
}

/// Lists and opens FLEX and Sentinel-2 acquisitions per site.
pub trait AcquisitionSource {
    /// FLEX file names for `site`, sorted
    fn flex_images(&self, site: &str) -> Result<Vec<String>>;

    fn load_flex(&self, site: &str, filename: &str) -> Result<FlexImage>;

    /// Sentinel-2 product names for `site`, sorted
    fn s2_products(&self, site: &str) -> Result<Vec<String>>;

    fn open_s2(&self, site: &str, product: &str) -> Result<Box<dyn ReflectanceProduct>>;
}

/// `<flex_root>/<site>/*.nc` and `<s2_root>/<site>/<product>/{L1C,L2A}`
#[derive(Debug, Clone)]
pub struct DirectorySource {
    pub flex_root: PathBuf,
    pub s2_root: PathBuf,
}

impl DirectorySource {
    pub fn new(flex_root: impl Into<PathBuf>, s2_root: impl Into<PathBuf>) -> Self {
        Self {
            flex_root: flex_root.into(),
            s2_root: s2_root.into(),
        }
    }
}

fn sorted_entries(dir: &Path, want_dirs: bool) -> Result<Vec<String>> {
    if !dir.is_dir() {
        debug!("No input directory {:?}", dir);
        return Ok(Vec::new());
    }
    let mut names: Vec<String> = fs::read_dir(dir)?
        .filter_map(|e| e.ok())
        .filter(|e| e.path().is_dir() == want_dirs)
        .map(|e| e.file_name().to_string_lossy().to_string())
        .collect();
    names.sort();
    Ok(names)
}

impl AcquisitionSource for DirectorySource {
    fn flex_images(&self, site: &str) -> Result<Vec<String>> {
        Ok(sorted_entries(&self.flex_root.join(site), false)?
            .into_iter()
            .filter(|name| name.ends_with(".nc"))
            .collect())
    }

    fn load_flex(&self, site: &str, filename: &str) -> Result<FlexImage> {
        Ok(FlexImage::read(&self.flex_root.join(site).join(filename))?)
    }

    fn s2_products(&self, site: &str) -> Result<Vec<String>> {
        sorted_entries(&self.s2_root.join(site), true)
    }

    fn open_s2(&self, site: &str, product: &str) -> Result<Box<dyn ReflectanceProduct>> {
        let product = Sentinel2Product::open(&self.s2_root.join(site).join(product))?;
        Ok(Box::new(product))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn listings_are_sorted_and_filtered() {
        let dir = tempfile::tempdir().unwrap();
        let flex = dir.path().join("flex/X");
        let s2 = dir.path().join("s2/X");
        fs::create_dir_all(&flex).unwrap();
        fs::create_dir_all(s2.join("S2B_MSIL2A_20230617T103029")).unwrap();
        fs::create_dir_all(s2.join("S2A_MSIL2A_20230616T103031")).unwrap();
        fs::write(s2.join("notes.txt"), b"").unwrap();
        for name in ["PRS_TD_20230620_101431.nc", "PRS_TD_20230616_101431.nc", "readme.md"] {
            fs::write(flex.join(name), b"").unwrap();
        }

        let source = DirectorySource::new(dir.path().join("flex"), dir.path().join("s2"));
        assert_eq!(
            source.flex_images("X").unwrap(),
            vec!["PRS_TD_20230616_101431.nc", "PRS_TD_20230620_101431.nc"]
        );
        assert_eq!(
            source.s2_products("X").unwrap(),
            vec!["S2A_MSIL2A_20230616T103031", "S2B_MSIL2A_20230617T103029"]
        );
        assert!(source.flex_images("missing").unwrap().is_empty());
    }
}
