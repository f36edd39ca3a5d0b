#![doc = r#"
flexcal: calibration/validation of FLEX fluorescence products against Sentinel-2
imagery and FLOX ground spectrometers.

For every monitoring site and every FLEX overpass the pipeline checks that FLOX ground
truth exists for the day, gates the FLEX region of interest on vegetation cover, pairs
the overpass with the nearest Sentinel-2 acquisition, screens clouds, cirrus and snow,
computes NDVI / NIRv inside the ROI, rescales the FLOX measurement across the ROI with a
linear transfer function and finally regresses FLEX against FLOX.

Requirements
------------
- GDAL development headers and runtime available on your system (JPEG2000 and NetCDF
  drivers for real products).
- Rust 2024 edition toolchain.

Work directory layout
---------------------
```text
<work>/Sites.csv                     site catalog
<work>/flox.csv                      FLOX ground truth (';'-delimited)
<work>/calval.json                   optional configuration
<work>/input_flex_images/<site>/PRS_TD_<YYYYMMDD>_<HHMMSS>.nc
<work>/input_s2_images/<site>/<product>/{L1C,L2A}/...
<work>/output/                       reports
<work>/cache/                        interim rasters
```

Quick start: run over a work directory
--------------------------------------
```rust,no_run
use flexcal::{CalValParams, RunMode, WorkspaceLayout, run_workspace};

fn main() -> flexcal::Result<()> {
    let params = CalValParams {
        mode: RunMode::Combined,
        time_window_days: 5,
        ..CalValParams::default()
    };
    let layout = WorkspaceLayout::new("/data/calval");
    let report = run_workspace(&layout, &params)?;
    println!(
        "processed={} skipped={} matchups={}",
        report.counters.processed, report.counters.skipped, report.counters.matchups
    );
    Ok(())
}
```

Bring your own acquisitions
---------------------------
`run_calval` reads products through the `AcquisitionSource` trait, so inputs can come
from any store that yields FLEX layers and Sentinel-2 band windows.

```rust,no_run
use std::path::Path;
use flexcal::{CalValParams, DirectorySource, FloxIndex, SiteCatalog, run_calval};

fn main() -> flexcal::Result<()> {
    let source = DirectorySource::new("/archive/flex", "/archive/s2");
    let catalog = SiteCatalog::load(Path::new("/archive/Sites.csv"))?;
    let flox = FloxIndex::load(Path::new("/archive/flox.csv"))?;
    let report = run_calval(
        &source,
        &catalog,
        Some(&flox),
        &CalValParams::default(),
        Path::new("/tmp/calval-out"),
        None,
    )?;
    for row in &report.validation {
        println!("{} {}: r2={:.3} n={}", row.comparison, row.metric, row.r2, row.n_images);
    }
    Ok(())
}
```

Error handling
--------------
All public functions return `flexcal::Result<T>`. Fatal conditions (missing inputs,
invalid catalog rows, CRS mismatch) are reported by `Error::is_fatal`; everything else
is a per-image skip recorded as a note in the reports.

```rust,no_run
use flexcal::{CalValParams, Error, WorkspaceLayout, run_workspace};

fn main() {
    match run_workspace(&WorkspaceLayout::new("/missing"), &CalValParams::default()) {
        Ok(_) => {}
        Err(Error::MissingInput(path)) => eprintln!("missing input: {:?}", path),
        Err(other) => eprintln!("run failed: {other}"),
    }
}
```

Useful modules
--------------
- [`api`]: work-directory layout and run entry points.
- [`core`]: site catalog, parameters and processing steps.
- [`io`]: FLEX, Sentinel-2 and FLOX readers, acquisition sources and writers.
- [`types`]: enums and grid geometry.
- [`error`]: crate-level `Error` and `Result`.
"#]

// Core modules (public)
pub mod api;
pub mod core;
pub mod error;
pub mod io;
pub mod types;

// Curated public API surface
// Types
pub use core::catalog::{Site, SiteCatalog};
pub use core::params::{CalValParams, SiteSettings};
pub use error::{Error, Result};
pub use types::{GridGeometry, PixelWindow, ProcessingLevel, ProxyIndex, RoiSize, RunMode, SifMetric};

// Readers and sources
pub use io::flex::FlexImage;
pub use io::flox::FloxIndex;
pub use io::scratch::ScratchArea;
pub use io::source::{AcquisitionSource, DirectorySource, ReflectanceProduct, SpectralBand};

// Report rows
pub use io::writers::reports::{MatchupRecord, S2ReportRow, UsableFlexRow, ValidationRow};

// High-level API re-exports
pub use api::{RunReport, WorkspaceLayout, run_calval, run_workspace};
