//! Region-of-interest construction around a site.
//!
//! Reflectance grids get an axis-aligned square in the grid's projected CRS, centred on
//! the centre of the pixel containing the site. Fluorescence grids have non-uniform
//! `lat`/`lon` axes, so their ROI is a range of cell indices found by bracket search.
use std::ops::Range;

use ndarray::{Array2, s};

use crate::error::{Error, Result};
use crate::io::gdal::same_crs;
use crate::types::{GridGeometry, PixelWindow, RoiSize};

const EDGE_EPS: f64 = 1e-9;

/// Axis-aligned box in map coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoiBox {
    pub min_x: f64,
    pub min_y: f64,
    pub max_x: f64,
    pub max_y: f64,
}

impl RoiBox {
    pub fn centered(x: f64, y: f64, half: f64) -> Self {
        Self {
            min_x: x - half,
            min_y: y - half,
            max_x: x + half,
            max_y: y + half,
        }
    }

    pub fn contains(&self, x: f64, y: f64) -> bool {
        x >= self.min_x && x <= self.max_x && y >= self.min_y && y <= self.max_y
    }

    /// Pixels of `grid` whose centre falls inside the box, clamped to the grid.
    pub fn window_on(&self, grid: &GridGeometry) -> Option<PixelWindow> {
        let gt = &grid.geotransform;
        let cols = centre_span(self.min_x, self.max_x, gt[0], gt[1], grid.cols)?;
        let rows = centre_span(self.min_y, self.max_y, gt[3], gt[5], grid.rows)?;
        Some(PixelWindow::new(
            rows.start,
            cols.start,
            rows.end - rows.start,
            cols.end - cols.start,
        ))
    }
}

// Index range of pixel centres origin + (i + 0.5) * step lying in [lo, hi].
fn centre_span(lo: f64, hi: f64, origin: f64, step: f64, len: usize) -> Option<Range<usize>> {
    let a = (lo - origin) / step - 0.5;
    let b = (hi - origin) / step - 0.5;
    let first = (a.min(b) - EDGE_EPS).ceil().max(0.0);
    let last = (a.max(b) + EDGE_EPS).floor().min(len as f64 - 1.0);
    if len == 0 || first > last {
        return None;
    }
    Some(first as usize..last as usize + 1)
}

/// Square ROI on a projected reflectance grid.
#[derive(Debug, Clone, PartialEq)]
pub struct ReflectanceRoi {
    pub bbox: RoiBox,
    /// Centre of the pixel containing the site
    pub centre: (f64, f64),
    /// Grid row/col of that pixel
    pub site_pixel: (usize, usize),
}

impl ReflectanceRoi {
    /// Build the ROI for a site already projected into the grid CRS.
    ///
    /// The half side is padded by half a pixel when it is an even number of metres so
    /// the border pixels keep their centres inside the box.
    pub fn build(grid: &GridGeometry, site_xy: (f64, f64), side: RoiSize) -> Result<Self> {
        let resolution = grid.pixel_width().abs();
        let side_m = f64::from(side.meters());
        if resolution <= 0.0 || (side_m / resolution).fract().abs() > EDGE_EPS {
            return Err(Error::InvalidArgument {
                arg: "roi_size",
                value: format!("{} m is not a whole number of {} m pixels", side_m, resolution),
            });
        }

        let (row, col) = grid.pixel_of(site_xy.0, site_xy.1);
        if !grid.contains_pixel(row, col) {
            return Err(Error::Processing(format!(
                "site ({:.1}, {:.1}) lies outside the {}x{} grid",
                site_xy.0, site_xy.1, grid.cols, grid.rows
            )));
        }
        let site_pixel = (row as usize, col as usize);
        let centre = grid.pixel_center(site_pixel.0, site_pixel.1);

        let mut half = side_m / 2.0;
        if half % 2.0 == 0.0 {
            half += resolution / 2.0;
        }
        Ok(Self {
            bbox: RoiBox::centered(centre.0, centre.1, half),
            centre,
            site_pixel,
        })
    }

    /// Site pixel relative to a window on the same grid
    pub fn site_in(&self, window: &PixelWindow) -> Option<(usize, usize)> {
        window.local(self.site_pixel.0, self.site_pixel.1)
    }
}

/// Fail when two grids expected to share a CRS do not.
pub fn ensure_same_crs(left: &GridGeometry, right: &GridGeometry) -> Result<()> {
    if same_crs(&left.crs, &right.crs) {
        Ok(())
    } else {
        Err(Error::CrsMismatch {
            left: left.crs.clone(),
            right: right.crs.clone(),
        })
    }
}

/// Set cells of `values` (covering `window` of `grid`) whose centre is outside `bbox` to NaN.
pub fn mask_outside(values: &mut Array2<f64>, grid: &GridGeometry, window: &PixelWindow, bbox: &RoiBox) {
    for ((r, c), v) in values.indexed_iter_mut() {
        let (x, y) = grid.pixel_center(window.row_off + r, window.col_off + c);
        if !bbox.contains(x, y) {
            *v = f64::NAN;
        }
    }
}

/// Clip a full-grid raster to the ROI; cells outside the box become NaN.
pub fn clip(values: &Array2<f64>, grid: &GridGeometry, bbox: &RoiBox) -> Option<(Array2<f64>, PixelWindow)> {
    let window = bbox.window_on(grid)?;
    let mut clipped = values
        .slice(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
        .to_owned();
    mask_outside(&mut clipped, grid, &window, bbox);
    Some((clipped, window))
}

/// Index ROI on a FLEX grid with non-uniform coordinate axes.
#[derive(Debug, Clone, PartialEq)]
pub struct FluorescenceRoi {
    pub rows: Range<usize>,
    pub cols: Range<usize>,
    /// Cell nearest to the site
    pub site_cell: (usize, usize),
    /// Extent in degrees (x = lon, y = lat)
    pub bbox: RoiBox,
}

impl FluorescenceRoi {
    /// `lat` indexes rows and `lon` indexes columns of the FLEX layers.
    pub fn build(lat: &[f64], lon: &[f64], site_lat: f64, site_lon: f64, side: RoiSize) -> Result<Self> {
        let row = nearest_axis_index(lat, site_lat)
            .ok_or_else(|| Error::Processing(format!("latitude {} outside FLEX grid", site_lat)))?;
        let col = nearest_axis_index(lon, site_lon)
            .ok_or_else(|| Error::Processing(format!("longitude {} outside FLEX grid", site_lon)))?;

        let growth = side.fluorescence_growth();
        let rows = grow(lat, row, site_lat, growth);
        let cols = grow(lon, col, site_lon, growth);
        let (min_y, max_y) = axis_extent(lat, &rows);
        let (min_x, max_x) = axis_extent(lon, &cols);
        Ok(Self {
            rows,
            cols,
            site_cell: (row, col),
            bbox: RoiBox {
                min_x,
                min_y,
                max_x,
                max_y,
            },
        })
    }

    pub fn shape(&self) -> (usize, usize) {
        (self.rows.len(), self.cols.len())
    }

    /// View of a full FLEX layer restricted to the ROI
    pub fn slice<'a>(&self, layer: &'a Array2<f64>) -> ndarray::ArrayView2<'a, f64> {
        layer.slice(s![self.rows.clone(), self.cols.clone()])
    }
}

/// Nearest index on a monotonic (ascending or descending) axis.
///
/// Brackets `target` between the last coordinate not past it and the first one at or
/// past it and returns the closer of the two. Targets more than half a cell beyond
/// either end give `None`.
pub fn nearest_axis_index(axis: &[f64], target: f64) -> Option<usize> {
    let n = axis.len();
    if n == 0 || !target.is_finite() {
        return None;
    }
    if n == 1 {
        return Some(0);
    }
    let sign = if axis[n - 1] >= axis[0] { 1.0 } else { -1.0 };
    let t = sign * target;
    let keyed: Vec<f64> = axis.iter().map(|a| sign * a).collect();
    let key = |i: usize| keyed[i];

    let first_ge = keyed.partition_point(|&v| v < t);
    let last_le = keyed.partition_point(|&v| v <= t);

    let idx = match (last_le.checked_sub(1), first_ge < n) {
        (Some(lo), true) => {
            let hi = first_ge;
            if (t - key(lo)).abs() <= (key(hi) - t).abs() {
                lo
            } else {
                hi
            }
        }
        (Some(lo), false) => lo,
        (None, true) => first_ge,
        (None, false) => return None,
    };

    let half_pitch = |i: usize| {
        let j = if i + 1 < n { i + 1 } else { i - 1 };
        (axis[j] - axis[i]).abs() / 2.0
    };
    if (axis[idx] - target).abs() > half_pitch(idx) + EDGE_EPS {
        return None;
    }
    Some(idx)
}

fn grow(axis: &[f64], idx: usize, target: f64, growth: usize) -> Range<usize> {
    let n = axis.len();
    match growth {
        0 => idx..idx + 1,
        1 => {
            let toward_next = idx + 1 < n
                && ((target - axis[idx]) * (axis[idx + 1] - axis[idx]) > 0.0 || idx == 0);
            if toward_next {
                idx..idx + 2
            } else if idx > 0 {
                idx - 1..idx + 1
            } else {
                idx..idx + 1
            }
        }
        _ => idx.saturating_sub(1)..(idx + 2).min(n),
    }
}

fn axis_extent(axis: &[f64], range: &Range<usize>) -> (f64, f64) {
    let n = axis.len();
    let pitch = |i: usize| {
        if n < 2 {
            0.0
        } else if i + 1 < n {
            (axis[i + 1] - axis[i]).abs()
        } else {
            (axis[i] - axis[i - 1]).abs()
        }
    };
    let first = range.start;
    let last = range.end - 1;
    let a = axis[first];
    let b = axis[last];
    let (lo, lo_idx, hi, hi_idx) = if a <= b {
        (a, first, b, last)
    } else {
        (b, last, a, first)
    };
    (lo - pitch(lo_idx) / 2.0, hi + pitch(hi_idx) / 2.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn grid(rows: usize, cols: usize) -> GridGeometry {
        GridGeometry {
            geotransform: [500_000.0, 10.0, 0.0, 5_000_000.0, 0.0, -10.0],
            crs: "EPSG:32632".into(),
            rows,
            cols,
        }
    }

    #[test]
    fn reflectance_roi_snaps_to_pixel_centre() {
        let g = grid(200, 200);
        let roi = ReflectanceRoi::build(&g, (500_503.0, 4_999_497.0), RoiSize::M300).unwrap();
        assert_eq!(roi.site_pixel, (50, 50));
        assert_abs_diff_eq!(roi.centre.0, 500_505.0);
        assert_abs_diff_eq!(roi.centre.1, 4_999_495.0);
        assert_abs_diff_eq!(roi.bbox.max_x - roi.bbox.min_x, 310.0);
        let window = roi.bbox.window_on(&g).unwrap();
        assert_eq!(window, PixelWindow::new(35, 35, 31, 31));
        assert_eq!(roi.site_in(&window), Some((15, 15)));
    }

    #[test]
    fn site_outside_grid_is_rejected() {
        let g = grid(10, 10);
        assert!(ReflectanceRoi::build(&g, (400_000.0, 5_000_000.0), RoiSize::M300).is_err());
    }

    #[test]
    fn clip_round_trip_returns_only_the_square() {
        let g = grid(60, 60);
        let roi = ReflectanceRoi::build(&g, (500_305.0, 4_999_695.0), RoiSize::M300).unwrap();
        let window = roi.bbox.window_on(&g).unwrap();
        let mut raster = Array2::<f64>::zeros((60, 60));
        raster
            .slice_mut(s![window.row_off..window.row_end(), window.col_off..window.col_end()])
            .fill(7.0);

        let (clipped, w) = clip(&raster, &g, &roi.bbox).unwrap();
        assert_eq!(w, window);
        assert_eq!(clipped.dim(), (31, 31));
        assert!(clipped.iter().all(|&v| v == 7.0));
        let sevens = raster.iter().filter(|&&v| v == 7.0).count();
        assert_eq!(sevens, clipped.len());
    }

    #[test]
    fn crs_mismatch_is_detected() {
        let a = grid(1, 1);
        let mut b = grid(1, 1);
        b.crs = "EPSG:32633".into();
        assert!(matches!(ensure_same_crs(&a, &b), Err(Error::CrsMismatch { .. })));
        assert!(ensure_same_crs(&a, &a.clone()).is_ok());
    }

    #[test]
    fn bracket_search_on_both_axis_directions() {
        let ascending = [10.0, 10.5, 11.2, 12.0];
        assert_eq!(nearest_axis_index(&ascending, 10.9), Some(2));
        assert_eq!(nearest_axis_index(&ascending, 10.6), Some(1));
        assert_eq!(nearest_axis_index(&ascending, 10.0), Some(0));
        assert_eq!(nearest_axis_index(&ascending, 14.0), None);
        let descending = [46.0, 45.9, 45.7, 45.6];
        assert_eq!(nearest_axis_index(&descending, 45.75), Some(2));
        assert_eq!(nearest_axis_index(&descending, 46.01), Some(0));
    }

    #[test]
    fn fluorescence_roi_grows_with_side() {
        let lat = [45.03, 45.02, 45.01, 45.0, 44.99];
        let lon = [7.0, 7.01, 7.02, 7.03, 7.04];
        let small = FluorescenceRoi::build(&lat, &lon, 45.011, 7.021, RoiSize::M300).unwrap();
        assert_eq!(small.site_cell, (2, 2));
        assert_eq!(small.shape(), (1, 1));
        let medium = FluorescenceRoi::build(&lat, &lon, 45.011, 7.021, RoiSize::M600).unwrap();
        assert_eq!(medium.rows, 1..3);
        assert_eq!(medium.cols, 2..4);
        let large = FluorescenceRoi::build(&lat, &lon, 45.011, 7.021, RoiSize::M900).unwrap();
        assert_eq!(large.rows, 1..4);
        assert_eq!(large.cols, 1..4);
        assert_abs_diff_eq!(large.bbox.min_x, 7.005, epsilon = 1e-9);
        assert_abs_diff_eq!(large.bbox.max_y, 45.025, epsilon = 1e-9);
    }
}
