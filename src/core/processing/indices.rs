//! Band math on Sentinel-2 windows: NDVI, reflectance, TOA radiance and NIRv, with the
//! coarse sun zenith grid replicated onto the band grid.
use ndarray::{Array2, Zip};

use crate::error::{Error, Result};
use crate::types::PixelWindow;

/// Normalized difference vegetation index from BOA digital numbers.
///
/// `((nir+o_nir)/Q - (red+o_red)/Q) / ((nir+o_nir)/Q + (red+o_red)/Q)`; cells with a
/// zero denominator are NaN.
pub fn ndvi(
    red: &Array2<f64>,
    nir: &Array2<f64>,
    quantification: f64,
    red_offset: f64,
    nir_offset: f64,
) -> Array2<f64> {
    let mut result = Array2::zeros(red.dim());
    Zip::from(red).and(nir).and(&mut result).par_for_each(|r, n, res| {
        let r = (r + red_offset) / quantification;
        let n = (n + nir_offset) / quantification;
        let sum = n + r;
        *res = if sum != 0.0 { (n - r) / sum } else { f64::NAN };
    });
    result
}

/// Surface reflectance from BOA digital numbers: (dn + offset) / Q
pub fn reflectance(dn: &Array2<f64>, quantification: f64, offset: f64) -> Array2<f64> {
    dn.mapv(|v| (v + offset) / quantification)
}

/// Element-wise product of NDVI with reflectance or radiance
pub fn nirv(ndvi: &Array2<f64>, other: &Array2<f64>) -> Array2<f64> {
    let mut result = Array2::zeros(ndvi.dim());
    Zip::from(ndvi).and(other).and(&mut result).for_each(|a, b, res| {
        *res = a * b;
    });
    result
}

/// Coarse sun-zenith grid and its replication factor onto the 10 m band grid.
#[derive(Debug, Clone, PartialEq)]
pub struct SolarGeometry {
    /// Zenith angles in degrees
    pub zenith: Array2<f64>,
    /// Fine pixels per coarse cell along each axis
    pub block: usize,
}

impl SolarGeometry {
    /// `step_m` is the coarse grid spacing and `resolution_m` the band pixel size. When the
    /// ratio is not a whole number the block falls back to `ceil(fine / coarse)`.
    pub fn new(
        zenith: Array2<f64>,
        step_m: Option<f64>,
        resolution_m: f64,
        fine_shape: (usize, usize),
    ) -> Result<Self> {
        let (coarse_rows, coarse_cols) = zenith.dim();
        if coarse_rows == 0 || coarse_cols == 0 {
            return Err(Error::Processing("empty sun zenith grid".into()));
        }
        let ratio = step_m.map(|step| step / resolution_m);
        let block = match ratio {
            Some(r) if r >= 1.0 && r.fract() == 0.0 => r as usize,
            _ => fine_shape
                .0
                .div_ceil(coarse_rows)
                .max(fine_shape.1.div_ceil(coarse_cols)),
        };
        if coarse_rows * block < fine_shape.0 || coarse_cols * block < fine_shape.1 {
            return Err(Error::Processing(format!(
                "{}x{} zenith grid with block {} does not cover {}x{} pixels",
                coarse_rows, coarse_cols, block, fine_shape.0, fine_shape.1
            )));
        }
        Ok(Self { zenith, block })
    }

    /// Zenith angles replicated onto `window` of the fine grid
    pub fn zenith_for(&self, window: &PixelWindow) -> Result<Array2<f64>> {
        replicate_window(&self.zenith, self.block, window).ok_or_else(|| {
            Error::Processing(format!("window {:?} exceeds the sun zenith grid", window))
        })
    }
}

/// Top-of-atmosphere radiance of the NIR band over `window`.
///
/// `(dn + offset) * cos(zenith) * E / Q / (π / U)`
pub fn radiance(
    nir: &Array2<f64>,
    window: &PixelWindow,
    offset: f64,
    sun: &SolarGeometry,
    solar_irradiance: f64,
    quantification: f64,
    u: f64,
) -> Result<Array2<f64>> {
    let zenith = sun.zenith_for(window)?;
    if zenith.dim() != nir.dim() {
        return Err(Error::Processing(format!(
            "radiance window {:?} does not match band shape {:?}",
            zenith.dim(),
            nir.dim()
        )));
    }
    let scale = solar_irradiance / quantification / (std::f64::consts::PI * (1.0 / u));
    let mut result = Array2::zeros(nir.dim());
    Zip::from(nir).and(&zenith).and(&mut result).par_for_each(|dn, z, res| {
        *res = (dn + offset) * z.to_radians().cos() * scale;
    });
    Ok(result)
}

/// Nearest-neighbour block replication of `coarse`, restricted to `window` of the
/// replicated grid. `None` when the window reaches past `coarse × block`.
pub fn replicate_window<T: Clone>(
    coarse: &Array2<T>,
    block: usize,
    window: &PixelWindow,
) -> Option<Array2<T>> {
    let (rows, cols) = coarse.dim();
    if block == 0 || window.row_end() > rows * block || window.col_end() > cols * block {
        return None;
    }
    Some(Array2::from_shape_fn((window.rows, window.cols), |(r, c)| {
        coarse[[(window.row_off + r) / block, (window.col_off + c) / block]].clone()
    }))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;
    use ndarray::array;

    #[test]
    fn ndvi_stays_in_range_and_flags_zero_denominator() {
        let red = array![[1000.0, 2000.0], [0.0, 500.0]];
        let nir = array![[3000.0, 1000.0], [0.0, 500.0]];
        let v = ndvi(&red, &nir, 10_000.0, 0.0, 0.0);
        assert_abs_diff_eq!(v[[0, 0]], 0.5);
        assert_abs_diff_eq!(v[[0, 1]], -1.0 / 3.0, epsilon = 1e-12);
        assert!(v[[1, 0]].is_nan());
        assert_abs_diff_eq!(v[[1, 1]], 0.0);
        assert!(v.iter().filter(|x| x.is_finite()).all(|x| (-1.0..=1.0).contains(x)));
    }

    #[test]
    fn ndvi_applies_offsets() {
        let red = array![[2000.0]];
        let nir = array![[4000.0]];
        let v = ndvi(&red, &nir, 10_000.0, -1000.0, -1000.0);
        assert_abs_diff_eq!(v[[0, 0]], 0.5);
    }

    #[test]
    fn radiance_uses_replicated_zenith() {
        let zenith = array![[0.0, 60.0], [60.0, 0.0]];
        let sun = SolarGeometry::new(zenith, Some(20.0), 10.0, (4, 4)).unwrap();
        assert_eq!(sun.block, 2);
        let window = PixelWindow::new(1, 1, 2, 2);
        let dn = Array2::from_elem((2, 2), 1000.0);
        let rad = radiance(&dn, &window, 0.0, &sun, std::f64::consts::PI, 1000.0, 1.0).unwrap();
        assert_abs_diff_eq!(rad[[0, 0]], 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(rad[[0, 1]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rad[[1, 0]], 0.5, epsilon = 1e-12);
        assert_abs_diff_eq!(rad[[1, 1]], 1.0, epsilon = 1e-12);
    }

    #[test]
    fn block_falls_back_to_shape_ratio() {
        let zenith = Array2::from_elem((23, 23), 30.0);
        let sun = SolarGeometry::new(zenith.clone(), Some(5000.0), 10.0, (10980, 10980)).unwrap();
        assert_eq!(sun.block, 500);
        let sun = SolarGeometry::new(zenith.clone(), None, 10.0, (10980, 10980)).unwrap();
        assert_eq!(sun.block, 478);
        assert!(SolarGeometry::new(zenith, Some(30.0), 10.0, (10980, 10980)).is_err());
    }

    #[test]
    fn replication_matches_block_layout() {
        let coarse = array![[1u8, 2], [3, 4]];
        let full = replicate_window(&coarse, 3, &PixelWindow::new(0, 0, 6, 6)).unwrap();
        assert_eq!(full[[2, 2]], 1);
        assert_eq!(full[[2, 3]], 2);
        assert_eq!(full[[3, 0]], 3);
        assert_eq!(full[[5, 5]], 4);
        assert!(replicate_window(&coarse, 3, &PixelWindow::new(4, 4, 3, 1)).is_none());
    }
}
