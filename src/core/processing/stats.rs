//! NaN-aware summary statistics over index rasters.
use ndarray::{ArrayBase, Data, Ix2};

/// Mean of the finite cells; NaN when there are none.
pub fn nan_mean<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix2>) -> f64 {
    let (sum, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if n == 0 { f64::NAN } else { sum / n as f64 }
}

/// Population standard deviation of the finite cells.
pub fn nan_std<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix2>) -> f64 {
    let mean = nan_mean(values);
    if mean.is_nan() {
        return f64::NAN;
    }
    let (sq, n) = values
        .iter()
        .filter(|v| v.is_finite())
        .fold((0.0, 0usize), |(s, n), v| (s + (v - mean).powi(2), n + 1));
    (sq / n as f64).sqrt()
}

/// Coefficient of variation `std / mean`; NaN when the mean is zero.
pub fn cv<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix2>) -> f64 {
    let mean = nan_mean(values);
    if mean == 0.0 || mean.is_nan() {
        return f64::NAN;
    }
    nan_std(values) / mean
}

/// 1 when the raster is homogeneous enough (`cv <= threshold`), else 0.
pub fn flag(cv: f64, threshold: f64) -> u8 {
    u8::from(cv <= threshold)
}

/// Mean, spread and homogeneity flag of one index raster.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpatialSummary {
    pub mean: f64,
    pub std: f64,
    pub cv: f64,
    pub flag: u8,
}

impl SpatialSummary {
    pub fn of<S: Data<Elem = f64>>(values: &ArrayBase<S, Ix2>, cv_threshold: f64) -> Self {
        let mean = nan_mean(values);
        let std = nan_std(values);
        let cv = cv(values);
        Self {
            mean,
            std,
            cv,
            flag: flag(cv, cv_threshold),
        }
    }
}
