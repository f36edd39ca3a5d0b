//! Shared types and enums used across flexcal.
//! Includes run configuration enums (`RunMode`, `ProxyIndex`, `RoiSize`), the product
//! vocabulary (`ProcessingLevel`, `SifMetric`) and raster grid geometry (`GridGeometry`,
//! `PixelWindow`).
use clap::ValueEnum;
use serde::{Deserialize, Serialize};

/// Which acquisitions a run processes.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// FLEX images only: SIF summaries and FLEX vs FLOX validation
    Flex,
    /// Sentinel-2 only, paired against a previous run's usable FLEX list
    Sentinel2,
    /// FLEX and Sentinel-2 together, including the transfer function
    Combined,
}

impl RunMode {
    pub fn includes_flex(self) -> bool {
        matches!(self, RunMode::Flex | RunMode::Combined)
    }

    pub fn includes_sentinel2(self) -> bool {
        matches!(self, RunMode::Sentinel2 | RunMode::Combined)
    }
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            RunMode::Flex => "flex",
            RunMode::Sentinel2 => "sentinel2",
            RunMode::Combined => "combined",
        };
        write!(f, "{}", s)
    }
}

/// Sentinel-2 proxy raster used by the transfer function.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, ValueEnum, Debug, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProxyIndex {
    NirvReflectance,
    NirvRadiance,
}

impl std::fmt::Display for ProxyIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProxyIndex::NirvReflectance => "NIRv reflectance",
            ProxyIndex::NirvRadiance => "NIRv radiance",
        };
        write!(f, "{}", s)
    }
}

/// Side length of the square region of interest around a site.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Debug, Serialize, Deserialize)]
#[serde(try_from = "u32", into = "u32")]
pub enum RoiSize {
    M300,
    M600,
    M900,
}

impl RoiSize {
    pub fn meters(self) -> u32 {
        match self {
            RoiSize::M300 => 300,
            RoiSize::M600 => 600,
            RoiSize::M900 => 900,
        }
    }

    /// Neighbour cells added around the site cell on a 300 m fluorescence grid.
    pub fn fluorescence_growth(self) -> usize {
        match self {
            RoiSize::M300 => 0,
            RoiSize::M600 => 1,
            RoiSize::M900 => 2,
        }
    }
}

impl TryFrom<u32> for RoiSize {
    type Error = String;

    fn try_from(value: u32) -> Result<Self, Self::Error> {
        match value {
            300 => Ok(RoiSize::M300),
            600 => Ok(RoiSize::M600),
            900 => Ok(RoiSize::M900),
            other => Err(format!("ROI side must be 300, 600 or 900 m, got {}", other)),
        }
    }
}

impl From<RoiSize> for u32 {
    fn from(value: RoiSize) -> Self {
        value.meters()
    }
}

impl std::fmt::Display for RoiSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.meters())
    }
}

// Manual implementation for ValueEnum since the CLI spells the variants as numbers
impl clap::ValueEnum for RoiSize {
    fn value_variants<'a>() -> &'a [Self] {
        &[RoiSize::M300, RoiSize::M600, RoiSize::M900]
    }

    fn to_possible_value(&self) -> Option<clap::builder::PossibleValue> {
        Some(match self {
            RoiSize::M300 => clap::builder::PossibleValue::new("300"),
            RoiSize::M600 => clap::builder::PossibleValue::new("600"),
            RoiSize::M900 => clap::builder::PossibleValue::new("900"),
        })
    }
}

/// Sentinel-2 processing level.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum ProcessingLevel {
    L1C,
    L2A,
}

impl ProcessingLevel {
    pub const ALL: [ProcessingLevel; 2] = [ProcessingLevel::L1C, ProcessingLevel::L2A];

    /// Subdirectory name inside a product folder
    pub fn dir_name(self) -> &'static str {
        match self {
            ProcessingLevel::L1C => "L1C",
            ProcessingLevel::L2A => "L2A",
        }
    }
}

impl std::fmt::Display for ProcessingLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.dir_name())
    }
}

/// Fluorescence quantities compared between FLOX, FLEX and the transfer function.
#[derive(Copy, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub enum SifMetric {
    FarRedMax,
    RedMax,
    O2A,
    O2B,
    Integrated,
    O2AUncertainty,
    O2BUncertainty,
}

impl SifMetric {
    pub const ALL: [SifMetric; 7] = [
        SifMetric::FarRedMax,
        SifMetric::RedMax,
        SifMetric::O2A,
        SifMetric::O2B,
        SifMetric::Integrated,
        SifMetric::O2AUncertainty,
        SifMetric::O2BUncertainty,
    ];

    /// Column name used by FLOX files and the output tables
    pub fn column(self) -> &'static str {
        match self {
            SifMetric::FarRedMax => "SIF_FARRED_max",
            SifMetric::RedMax => "SIF_RED_max",
            SifMetric::O2A => "SIF_O2A",
            SifMetric::O2B => "SIF_O2B",
            SifMetric::Integrated => "SIF_int",
            SifMetric::O2AUncertainty => "SIF_O2A_un",
            SifMetric::O2BUncertainty => "SIF_O2B_un",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        SifMetric::ALL.into_iter().find(|m| m.column() == name)
    }
}

impl std::fmt::Display for SifMetric {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.column())
    }
}

/// Rectangular block of pixels on a raster grid.
#[derive(Copy, Clone, PartialEq, Eq, Debug, Default, Serialize, Deserialize)]
pub struct PixelWindow {
    pub row_off: usize,
    pub col_off: usize,
    pub rows: usize,
    pub cols: usize,
}

impl PixelWindow {
    pub fn new(row_off: usize, col_off: usize, rows: usize, cols: usize) -> Self {
        Self {
            row_off,
            col_off,
            rows,
            cols,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.rows == 0 || self.cols == 0
    }

    pub fn row_end(&self) -> usize {
        self.row_off + self.rows
    }

    pub fn col_end(&self) -> usize {
        self.col_off + self.cols
    }

    /// Position of a grid pixel relative to the window origin
    pub fn local(&self, row: usize, col: usize) -> Option<(usize, usize)> {
        if row >= self.row_off && row < self.row_end() && col >= self.col_off && col < self.col_end()
        {
            Some((row - self.row_off, col - self.col_off))
        } else {
            None
        }
    }
}

/// North-up raster grid: affine geotransform, CRS and size.
#[derive(Clone, PartialEq, Debug, Serialize, Deserialize)]
pub struct GridGeometry {
    /// [origin_x, pixel_width, rot_x, origin_y, rot_y, pixel_height]
    pub geotransform: [f64; 6],
    /// CRS as `EPSG:<code>` when known, WKT otherwise
    pub crs: String,
    pub rows: usize,
    pub cols: usize,
}

impl GridGeometry {
    pub fn pixel_width(&self) -> f64 {
        self.geotransform[1]
    }

    pub fn pixel_height(&self) -> f64 {
        self.geotransform[5].abs()
    }

    /// Row and column of the pixel containing `(x, y)`; may lie outside the grid.
    pub fn pixel_of(&self, x: f64, y: f64) -> (isize, isize) {
        let gt = &self.geotransform;
        let col = ((x - gt[0]) / gt[1]).floor() as isize;
        let row = ((y - gt[3]) / gt[5]).floor() as isize;
        (row, col)
    }

    /// Map coordinates of a pixel centre
    pub fn pixel_center(&self, row: usize, col: usize) -> (f64, f64) {
        let gt = &self.geotransform;
        (
            gt[0] + (col as f64 + 0.5) * gt[1],
            gt[3] + (row as f64 + 0.5) * gt[5],
        )
    }

    pub fn contains_pixel(&self, row: isize, col: isize) -> bool {
        row >= 0 && col >= 0 && (row as usize) < self.rows && (col as usize) < self.cols
    }

    /// Grid covering only `window`, used when writing clipped rasters
    pub fn subgrid(&self, window: &PixelWindow) -> GridGeometry {
        let gt = &self.geotransform;
        GridGeometry {
            geotransform: [
                gt[0] + window.col_off as f64 * gt[1],
                gt[1],
                gt[2],
                gt[3] + window.row_off as f64 * gt[5],
                gt[4],
                gt[5],
            ],
            crs: self.crs.clone(),
            rows: window.rows,
            cols: window.cols,
        }
    }
}
