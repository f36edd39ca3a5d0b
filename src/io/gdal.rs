use gdal::spatial_ref::{CoordTransform, SpatialRef};
use gdal::{Dataset, Metadata, errors::GdalError as GdalCrateError};
use ndarray::Array2;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

use crate::types::{GridGeometry, PixelWindow};

/// Errors encountered when using GDAL reader
#[derive(Debug, Error)]
pub enum GdalError {
    #[error("GDAL error: {0}")]
    Gdal(#[from] GdalCrateError),
    #[error("Unsupported format: {0}")]
    UnsupportedFormat(String),
    #[error("Dimension mismatch: expected {0}x{1}, got {2}x{3}")]
    DimensionMismatch(usize, usize, usize, usize),
    #[error("Window {0:?} exceeds raster of {1}x{2}")]
    WindowOutOfBounds(PixelWindow, usize, usize),
}

/// Metadata extracted from a GDAL-supported dataset
#[derive(Debug, Clone)]
pub struct GdalMetadata {
    /// Width (pixels) of the raster
    pub size_x: usize,
    /// Height (lines) of the raster
    pub size_y: usize,
    /// Number of raster bands
    pub bands: usize,
    /// Affine geotransform coefficients ([origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height])
    pub geotransform: [f64; 6],
    /// Projection as `EPSG:<code>` when an authority is present, WKT otherwise
    pub projection: String,
    /// Additional metadata key-value pairs
    pub metadata: HashMap<String, String>,
}

impl GdalMetadata {
    pub fn grid(&self) -> GridGeometry {
        GridGeometry {
            geotransform: self.geotransform,
            crs: self.projection.clone(),
            rows: self.size_y,
            cols: self.size_x,
        }
    }
}

/// Reader for band rasters (JPEG2000, GeoTIFF, NetCDF subdatasets) via GDAL
pub struct GdalRasterReader {
    pub dataset: Dataset,
    pub metadata: GdalMetadata,
}

// Helper to extract EPSG code from WKT authority tag
fn parse_epsg(wkt: &str) -> Option<String> {
    const KEY: &str = "AUTHORITY[\"EPSG\",\"";
    if let Some(idx) = wkt.rfind(KEY) {
        let start = idx + KEY.len();
        if let Some(end) = wkt[start..].find('"') {
            let code = &wkt[start..start + end];
            return Some(format!("EPSG:{}", code));
        }
    }
    None
}

/// Collapse a projection string to `EPSG:<code>` when possible
pub fn normalize_crs(projection: &str) -> String {
    if projection.starts_with("EPSG:") {
        projection.to_string()
    } else if let Some(code) = parse_epsg(projection) {
        code
    } else {
        projection.to_string()
    }
}

/// Whether two projection strings name the same CRS
pub fn same_crs(a: &str, b: &str) -> bool {
    normalize_crs(a).eq_ignore_ascii_case(&normalize_crs(b))
}

fn spatial_ref(crs: &str) -> Result<SpatialRef, GdalError> {
    let normalized = normalize_crs(crs);
    if let Some(code) = normalized.strip_prefix("EPSG:") {
        let code: u32 = code
            .parse()
            .map_err(|_| GdalError::UnsupportedFormat(format!("bad EPSG code: {}", code)))?;
        Ok(SpatialRef::from_epsg(code)?)
    } else {
        Ok(SpatialRef::from_wkt(&normalized)?)
    }
}

/// Project a WGS84 latitude/longitude into `target_crs`.
pub fn project_lat_lon(lat: f64, lon: f64, target_crs: &str) -> Result<(f64, f64), GdalError> {
    let source = SpatialRef::from_epsg(4326)?; // axis order is lat,lon
    let target = spatial_ref(target_crs)?;
    let transform = CoordTransform::new(&source, &target)?;
    let mut xs = [lat];
    let mut ys = [lon];
    let mut zs: [f64; 0] = [];
    transform.transform_coords(&mut xs, &mut ys, &mut zs)?;
    Ok((xs[0], ys[0]))
}

impl GdalRasterReader {
    /// Open a GDAL-supported dataset (e.g., JPEG2000, GeoTIFF, `NETCDF:"file":var`)
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, GdalError> {
        let dataset = Dataset::open(path.as_ref())?;
        let (size_x, size_y) = dataset.raster_size();
        let bands = dataset.raster_count() as usize;
        if bands == 0 {
            return Err(GdalError::UnsupportedFormat("No raster bands found".into()));
        }
        let geotransform = match dataset.geo_transform() {
            Ok(gt) => gt,
            Err(_) => [0.0, 1.0, 0.0, 0.0, 0.0, 1.0],
        };
        let projection = normalize_crs(&dataset.projection());
        let mut metadata_map = HashMap::new();
        if let Some(entries) = dataset.metadata_domain("") {
            for entry in entries {
                if let Some((key, val)) = entry.split_once('=') {
                    metadata_map.insert(key.to_string(), val.to_string());
                }
            }
        }
        Ok(GdalRasterReader {
            dataset,
            metadata: GdalMetadata {
                size_x: size_x as usize,
                size_y: size_y as usize,
                bands,
                geotransform,
                projection,
                metadata: metadata_map,
            },
        })
    }

    pub fn grid(&self) -> GridGeometry {
        self.metadata.grid()
    }

    fn check_band(&self, index: usize) -> Result<(), GdalError> {
        if index == 0 || index > self.metadata.bands {
            return Err(GdalError::UnsupportedFormat(format!(
                "Band index {} out of range",
                index
            )));
        }
        Ok(())
    }

    /// Read a single band (1-based index) as an f64 ndarray of shape (height, width)
    pub fn read_band(&self, index: usize) -> Result<Array2<f64>, GdalError> {
        let full = PixelWindow::new(0, 0, self.metadata.size_y, self.metadata.size_x);
        self.read_window(index, &full)
    }

    /// Read a pixel window of one band (1-based index) as f64
    pub fn read_window(&self, index: usize, window: &PixelWindow) -> Result<Array2<f64>, GdalError> {
        self.check_band(index)?;
        if window.row_end() > self.metadata.size_y || window.col_end() > self.metadata.size_x {
            return Err(GdalError::WindowOutOfBounds(
                *window,
                self.metadata.size_x,
                self.metadata.size_y,
            ));
        }
        let band = self.dataset.rasterband(index)?;
        let size = (window.cols, window.rows);
        let buf = band.read_as::<f64>(
            (window.col_off as isize, window.row_off as isize),
            size,
            size,
            None,
        )?;
        let array = Array2::from_shape_vec((window.rows, window.cols), buf.data().to_vec())
            .map_err(|_| {
                GdalError::DimensionMismatch(window.cols, window.rows, buf.shape().0, buf.shape().1)
            })?;
        Ok(array)
    }

    /// Read a whole band with its nodata value replaced by NaN
    pub fn read_band_nan(&self, index: usize) -> Result<Array2<f64>, GdalError> {
        let mut values = self.read_band(index)?;
        if let Some(nodata) = self.dataset.rasterband(index)?.no_data_value() {
            values.mapv_inplace(|v| if v == nodata { f64::NAN } else { v });
        }
        Ok(values)
    }

    /// Read a whole band as u8 (classification masks)
    pub fn read_band_u8(&self, index: usize) -> Result<Array2<u8>, GdalError> {
        self.check_band(index)?;
        let band = self.dataset.rasterband(index)?;
        let window = (self.metadata.size_x, self.metadata.size_y);
        let buf = band.read_as::<u8>((0, 0), window, window, None)?;
        Array2::from_shape_vec((self.metadata.size_y, self.metadata.size_x), buf.data().to_vec())
            .map_err(|_| {
                GdalError::DimensionMismatch(
                    self.metadata.size_x,
                    self.metadata.size_y,
                    buf.shape().0,
                    buf.shape().1,
                )
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn epsg_is_extracted_from_wkt() {
        let wkt = r#"PROJCS["WGS 84 / UTM zone 32N",GEOGCS["WGS 84",AUTHORITY["EPSG","4326"]],AUTHORITY["EPSG","32632"]]"#;
        assert_eq!(normalize_crs(wkt), "EPSG:32632");
        assert!(same_crs(wkt, "EPSG:32632"));
        assert!(!same_crs(wkt, "EPSG:32633"));
        assert_eq!(normalize_crs("LOCAL_CS[\"x\"]"), "LOCAL_CS[\"x\"]");
    }
}
