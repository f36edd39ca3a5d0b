//! Per-site scratch area for interim rasters.
use std::fs;
use std::path::PathBuf;

use tracing::{debug, info};

use crate::error::Result;

/// `<root>/<site>/<product>/...`; deleted wholesale at the end of a run when asked.
#[derive(Debug, Clone)]
pub struct ScratchArea {
    root: PathBuf,
}

impl ScratchArea {
    pub fn create(root: impl Into<PathBuf>) -> Result<Self> {
        let root = root.into();
        fs::create_dir_all(&root)?;
        Ok(Self { root })
    }

    pub fn product_dir(&self, site: &str, product: &str) -> Result<PathBuf> {
        let dir = self.root.join(site).join(product);
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }

    pub fn remove_site(&self, site: &str) -> Result<()> {
        let dir = self.root.join(site);
        if dir.exists() {
            fs::remove_dir_all(&dir)?;
            debug!("Removed scratch directory {:?}", dir);
        }
        Ok(())
    }

    /// Remove the whole area. Raster handles into it must already be dropped.
    pub fn delete_all(self) -> Result<()> {
        if self.root.exists() {
            fs::remove_dir_all(&self.root)?;
            info!("Deleted scratch area {:?}", self.root);
        }
        Ok(())
    }
}
