//! Linear transfer of a ground fluorescence value across a proxy raster.
//!
//! The ground measurement is assumed proportional to the proxy at the site pixel; the
//! same ratio rescales every ROI cell and the mean gives a satellite-scale estimate.
use ndarray::{ArrayBase, Data, Ix2};

use crate::core::processing::stats::nan_mean;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TransferOutcome {
    Applied(f64),
    /// Site pixel is NaN, zero or outside the raster
    NotApplicable,
}

impl TransferOutcome {
    pub fn value(self) -> Option<f64> {
        match self {
            TransferOutcome::Applied(v) => Some(v),
            TransferOutcome::NotApplicable => None,
        }
    }

    /// Raised when the caller should record the invalid-pixel note
    pub fn invalid_pixel(self) -> bool {
        matches!(self, TransferOutcome::NotApplicable)
    }
}

/// `mean((ground / proxy[site]) * proxy)` over the ROI.
pub fn apply<S: Data<Elem = f64>>(
    proxy: &ArrayBase<S, Ix2>,
    site_row: usize,
    site_col: usize,
    ground: f64,
) -> TransferOutcome {
    let Some(&at_site) = proxy.get((site_row, site_col)) else {
        return TransferOutcome::NotApplicable;
    };
    if at_site.is_nan() || at_site == 0.0 {
        return TransferOutcome::NotApplicable;
    }
    let ratio = ground / at_site;
    TransferOutcome::Applied(nan_mean(&proxy.mapv(|v| ratio * v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn rescales_by_site_ratio() {
        let proxy = array![[0.1, 0.2], [0.3, 0.4]];
        let out = apply(&proxy, 0, 1, 2.0);
        assert_relative_eq!(out.value().unwrap(), 2.5, epsilon = 1e-12);
    }

    #[test]
    fn uniform_proxy_returns_ground_value() {
        let proxy = array![[0.3, 0.3], [0.3, f64::NAN]];
        assert_relative_eq!(apply(&proxy, 1, 0, 1.7).value().unwrap(), 1.7, epsilon = 1e-12);
    }

    #[test]
    fn invalid_site_pixel_is_not_applicable() {
        let proxy = array![[0.0, f64::NAN], [0.3, 0.4]];
        assert!(apply(&proxy, 0, 0, 1.0).invalid_pixel());
        assert!(apply(&proxy, 0, 1, 1.0).invalid_pixel());
        assert!(apply(&proxy, 5, 5, 1.0).invalid_pixel());
    }
}
