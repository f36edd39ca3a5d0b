use gdal::raster::{Buffer, ColorInterpretation, GdalType};
use gdal::{Dataset, DriverManager};
use ndarray::Array2;
use std::collections::BTreeMap;
use std::path::Path;
use tracing::debug;

use crate::io::gdal::GdalError;
use crate::io::writers::metadata::embed_raster_metadata;
use crate::types::GridGeometry;

fn write_single_band<T: GdalType + Copy>(
    output: &Path,
    values: &Array2<T>,
    grid: &GridGeometry,
    metadata: &BTreeMap<String, String>,
) -> Result<Dataset, GdalError> {
    let (rows, cols) = values.dim();
    if rows != grid.rows || cols != grid.cols {
        return Err(GdalError::DimensionMismatch(grid.cols, grid.rows, cols, rows));
    }
    let driver = DriverManager::get_driver_by_name("GTiff")?;
    let mut ds = driver.create_with_band_type::<T, _>(output, cols, rows, 1)?;
    ds.set_geo_transform(&grid.geotransform)?;
    if !grid.crs.is_empty() {
        ds.set_projection(&grid.crs)?;
    }
    embed_raster_metadata(&mut ds, metadata)?;

    let data: Vec<T> = values.iter().copied().collect();
    let mut buf = Buffer::new((cols, rows), data);
    {
        let mut band = ds.rasterband(1)?;
        band.set_color_interpretation(ColorInterpretation::GrayIndex)?;
        band.write((0, 0), (cols, rows), &mut buf)?;
    }
    debug!("Wrote {}x{} raster {:?}", cols, rows, output);
    Ok(ds)
}

/// Write an index raster (NaN outside the ROI) as a georeferenced float GeoTIFF
pub fn write_tiff_f64(
    output: &Path,
    values: &Array2<f64>,
    grid: &GridGeometry,
    metadata: &BTreeMap<String, String>,
) -> Result<Dataset, GdalError> {
    let ds = write_single_band(output, values, grid, metadata)?;
    ds.rasterband(1)?.set_no_data_value(Some(f64::NAN))?;
    Ok(ds)
}

/// Write a replicated classification mask as a georeferenced u16 GeoTIFF
pub fn write_tiff_u16(
    output: &Path,
    values: &Array2<u16>,
    grid: &GridGeometry,
    metadata: &BTreeMap<String, String>,
) -> Result<Dataset, GdalError> {
    write_single_band(output, values, grid, metadata)
}
