//! Scoped scratch directory for one extraction.
//!
//! The directory is created next to the destination (not in /tmp) so the
//! final commit is a same-filesystem rename. It is removed when dropped,
//! whichever way the extraction ends.

use std::fs;
use std::path::Path;

use tempfile::TempDir;

use crate::error::{IoContext, Result};

pub struct ScratchDir {
    dir: TempDir,
}

impl ScratchDir {
    /// Create a fresh, empty scratch directory inside `parent`.
    pub fn create_in(parent: &Path) -> Result<Self> {
        let dir = tempfile::Builder::new()
            .prefix(".extractall-")
            .tempdir_in(parent)
            .at(parent)?;
        Ok(Self { dir })
    }

    pub fn path(&self) -> &Path {
        self.dir.path()
    }

    /// Throw away everything written so far and start from an empty directory.
    pub fn reset(&self) -> Result<()> {
        let path = self.dir.path();
        fs::remove_dir_all(path).at(path)?;
        fs::create_dir(path).at(path)
    }
}
