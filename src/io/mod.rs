//! I/O layer for reading FLEX, Sentinel-2 and FLOX inputs and writing reports.
//! Provides the `gdal` raster adapter, the `sentinel2`, `flex` and `flox` readers,
//! the `source` abstraction the pipeline reads through, the `scratch` area and
//! `writers` for CSV/GeoTIFF/JSON outputs.
pub mod gdal;
pub use gdal::{GdalError, GdalMetadata, GdalRasterReader};

pub mod sentinel2;
pub use sentinel2::{ProductError, ProductPaths, Sentinel2Product};

pub mod flex;
pub use flex::{FlexError, FlexImage};

pub mod flox;
pub use flox::{FloxIndex, FloxRecord};

pub mod scratch;
pub use scratch::ScratchArea;

pub mod source;
pub use source::{AcquisitionSource, DirectorySource, ReflectanceProduct, SpectralBand};

pub mod writers;
