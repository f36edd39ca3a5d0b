//! Core cal/val building blocks: the site catalog, run parameters and the processing
//! steps (matching, ROI, masks, indices, statistics, transfer, validation). These are
//! internal primitives consumed by the high-level `api` module.
pub mod catalog;
pub mod params;
pub mod processing;
