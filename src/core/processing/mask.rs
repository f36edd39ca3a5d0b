//! Cloud, cirrus and snow screening of a Sentinel-2 ROI.
//!
//! The three `MSK_CLASSI_B00` layers live on a coarse (60 m) grid. A pixel is invalid
//! when any layer is set. The combined mask is replicated onto the band grid, clipped to
//! the ROI and the valid fraction compared with the cloud threshold.
use ndarray::{Array2, Zip};

use crate::core::processing::indices::replicate_window;
use crate::core::processing::roi::RoiBox;
use crate::error::{Error, Result};
use crate::types::{GridGeometry, PixelWindow, RoiSize};

/// Opaque-cloud, cirrus and snow/ice layers of one classification mask.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskTriplet {
    pub opaque: Array2<u8>,
    pub cirrus: Array2<u8>,
    pub snow: Array2<u8>,
}

impl MaskTriplet {
    pub fn new(opaque: Array2<u8>, cirrus: Array2<u8>, snow: Array2<u8>) -> Result<Self> {
        if opaque.dim() != cirrus.dim() || opaque.dim() != snow.dim() {
            return Err(Error::Processing(format!(
                "mask layers differ in shape: {:?} {:?} {:?}",
                opaque.dim(),
                cirrus.dim(),
                snow.dim()
            )));
        }
        Ok(Self {
            opaque,
            cirrus,
            snow,
        })
    }

    /// All-clear mask of the given shape
    pub fn clear(shape: (usize, usize)) -> Self {
        Self {
            opaque: Array2::zeros(shape),
            cirrus: Array2::zeros(shape),
            snow: Array2::zeros(shape),
        }
    }

    pub fn dim(&self) -> (usize, usize) {
        self.opaque.dim()
    }

    /// Sum of the three layers; nonzero means invalid
    pub fn combined(&self) -> Array2<u16> {
        let mut sum = Array2::zeros(self.dim());
        Zip::from(&mut sum)
            .and(&self.opaque)
            .and(&self.cirrus)
            .and(&self.snow)
            .for_each(|s, &a, &b, &c| *s = u16::from(a) + u16::from(b) + u16::from(c));
        sum
    }
}

/// Result of the quality gate. Every field is set explicitly by each branch.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct QualityVerdict {
    pub passed: bool,
    pub valid_pixel_count: usize,
    pub invalid_pixel_count: usize,
    pub valid_fraction: f64,
}

impl QualityVerdict {
    fn all_clear(valid_pixel_count: usize) -> Self {
        Self {
            passed: true,
            valid_pixel_count,
            invalid_pixel_count: 0,
            valid_fraction: 1.0,
        }
    }

    fn measured(valid: usize, invalid: usize, threshold: f64) -> Self {
        let total = valid + invalid;
        let valid_fraction = if total == 0 {
            f64::NAN
        } else {
            valid as f64 / total as f64
        };
        Self {
            passed: valid_fraction >= threshold,
            valid_pixel_count: valid,
            invalid_pixel_count: invalid,
            valid_fraction,
        }
    }

    pub fn valid_percent(&self) -> f64 {
        self.valid_fraction * 100.0
    }
}

/// Verdict plus the replicated, clipped mask when one was built.
#[derive(Debug, Clone, PartialEq)]
pub struct MaskOutcome {
    pub verdict: QualityVerdict,
    pub clipped: Option<(Array2<u16>, PixelWindow)>,
}

/// Whole number of fine pixels per coarse pixel.
pub fn resolution_ratio(coarse: &GridGeometry, fine: &GridGeometry) -> Result<usize> {
    let ratio = coarse.pixel_width().abs() / fine.pixel_width().abs();
    let rounded = ratio.round();
    if rounded < 1.0 || (ratio - rounded).abs() > 1e-6 {
        return Err(Error::Processing(format!(
            "mask resolution {} is not a multiple of band resolution {}",
            coarse.pixel_width(),
            fine.pixel_width()
        )));
    }
    Ok(rounded as usize)
}

/// Evaluate the mask over the ROI on the band grid `grid`.
pub fn evaluate(
    mask: &MaskTriplet,
    grid: &GridGeometry,
    roi: &RoiBox,
    ratio: usize,
    cloud_threshold: f64,
    roi_side: RoiSize,
    resolution: f64,
) -> Result<MaskOutcome> {
    let combined = mask.combined();
    if combined.iter().all(|&v| v == 0) {
        let per_side = (f64::from(roi_side.meters()) / resolution) as usize;
        return Ok(MaskOutcome {
            verdict: QualityVerdict::all_clear(per_side * per_side),
            clipped: None,
        });
    }

    let window = roi
        .window_on(grid)
        .ok_or_else(|| Error::Processing("ROI does not overlap the band grid".into()))?;
    let clipped = replicate_window(&combined, ratio, &window).ok_or_else(|| {
        Error::Processing(format!(
            "{:?} mask with ratio {} does not cover ROI window {:?}",
            combined.dim(),
            ratio,
            window
        ))
    })?;

    let mut valid = 0usize;
    let mut invalid = 0usize;
    for ((r, c), &v) in clipped.indexed_iter() {
        let (x, y) = grid.pixel_center(window.row_off + r, window.col_off + c);
        if !roi.contains(x, y) {
            continue;
        }
        if v == 0 {
            valid += 1;
        } else {
            invalid += 1;
        }
    }

    let verdict = if invalid == 0 {
        QualityVerdict::all_clear(valid)
    } else {
        QualityVerdict::measured(valid, invalid, cloud_threshold)
    };
    Ok(MaskOutcome {
        verdict,
        clipped: Some((clipped, window)),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::processing::roi::ReflectanceRoi;
    use approx::assert_abs_diff_eq;

    fn band_grid() -> GridGeometry {
        GridGeometry {
            geotransform: [600_000.0, 10.0, 0.0, 5_100_000.0, 0.0, -10.0],
            crs: "EPSG:32632".into(),
            rows: 120,
            cols: 120,
        }
    }

    fn roi() -> RoiBox {
        ReflectanceRoi::build(&band_grid(), (600_605.0, 5_099_395.0), RoiSize::M300)
            .unwrap()
            .bbox
    }

    #[test]
    fn all_clear_passes_for_any_threshold_and_ratio() {
        for ratio in [1, 2, 6] {
            let mask = MaskTriplet::clear((120 / ratio, 120 / ratio));
            for threshold in [0.0, 0.5, 1.0] {
                let out = evaluate(&mask, &band_grid(), &roi(), ratio, threshold, RoiSize::M300, 10.0)
                    .unwrap();
                assert!(out.verdict.passed);
                assert_eq!(out.verdict.valid_fraction, 1.0);
                assert_eq!(out.verdict.valid_pixel_count, 900);
                assert!(out.clipped.is_none());
            }
        }
    }

    #[test]
    fn cloud_outside_roi_counts_clipped_pixels() {
        let mut mask = MaskTriplet::clear((20, 20));
        mask.opaque[[0, 0]] = 1;
        let out = evaluate(&mask, &band_grid(), &roi(), 6, 0.9, RoiSize::M300, 10.0).unwrap();
        assert!(out.verdict.passed);
        assert_eq!(out.verdict.valid_fraction, 1.0);
        assert_eq!(out.verdict.valid_pixel_count, 31 * 31);
        assert_eq!(out.verdict.invalid_pixel_count, 0);
    }

    #[test]
    fn partial_cloud_is_measured_against_threshold() {
        // ROI covers rows/cols 45..76; coarse cell (8, 8) spans fine 48..54
        let mut mask = MaskTriplet::clear((20, 20));
        mask.cirrus[[8, 8]] = 1;
        mask.snow[[8, 8]] = 1;
        let out = evaluate(&mask, &band_grid(), &roi(), 6, 0.9, RoiSize::M300, 10.0).unwrap();
        let v = out.verdict;
        assert_eq!(v.invalid_pixel_count, 36);
        assert_eq!(v.valid_pixel_count, 961 - 36);
        assert_abs_diff_eq!(v.valid_fraction, 925.0 / 961.0);
        assert!(v.passed);

        let strict = evaluate(&mask, &band_grid(), &roi(), 6, 0.99, RoiSize::M300, 10.0).unwrap();
        assert!(!strict.verdict.passed);
        assert_eq!(strict.verdict.valid_pixel_count, 925);
        let (clipped, window) = strict.clipped.unwrap();
        assert_eq!(clipped.dim(), (31, 31));
        assert_eq!(window, PixelWindow::new(45, 45, 31, 31));
    }

    #[test]
    fn ratio_comes_from_pixel_sizes() {
        let fine = band_grid();
        let mut coarse = band_grid();
        coarse.geotransform[1] = 60.0;
        assert_eq!(resolution_ratio(&coarse, &fine).unwrap(), 6);
        coarse.geotransform[1] = 25.0;
        assert!(resolution_ratio(&coarse, &fine).is_err());
    }
}
