//! Pages as memory-mapped scratch files.
//!
//! Every page is a fresh temporary file in a caller-chosen directory, sized to
//! the page and mapped shared, so the kernel can write dirty pages back to the
//! file instead of keeping them resident. This lets a map grow past both heap
//! and RAM, at the cost of I/O when it does.
//!
//! Files are scratch space only: nothing is ever reopened, and each file is
//! deleted when its page is released.

use std::fmt;
use std::path::{Path, PathBuf};

use memmap2::MmapMut;
use tempfile::NamedTempFile;
use tracing::warn;

use super::PageProvider;
use crate::error::Result;

/// One mapped scratch file.
pub struct MappedPage {
    // Declared before `file` so the mapping goes away before the file is
    // closed and removed.
    map: MmapMut,
    file: NamedTempFile,
}

impl MappedPage {
    /// Path of the backing scratch file.
    pub fn path(&self) -> &Path {
        self.file.path()
    }
}

impl fmt::Debug for MappedPage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MappedPage")
            .field("path", &self.file.path())
            .field("len", &self.map.len())
            .finish()
    }
}

impl AsRef<[u8]> for MappedPage {
    fn as_ref(&self) -> &[u8] {
        &self.map
    }
}

impl AsMut<[u8]> for MappedPage {
    fn as_mut(&mut self) -> &mut [u8] {
        &mut self.map
    }
}

/// Creates pages as scratch files inside `dir`.
#[derive(Clone, Debug)]
pub struct MappedPages {
    dir: PathBuf,
}

impl MappedPages {
    /// Place scratch files in `dir`, which must exist.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Directory holding the scratch files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }
}

impl PageProvider for MappedPages {
    type Page = MappedPage;

    fn name(&self) -> &'static str {
        "mapped"
    }

    fn create(&mut self, size: usize) -> Result<Self::Page> {
        let file = tempfile::Builder::new()
            .prefix("compscan")
            .suffix(".map")
            .tempfile_in(&self.dir)?;
        // A freshly extended file reads back as zeros.
        file.as_file().set_len(size as u64)?;
        // SAFETY: the file was just created for this page alone and is never
        // truncated while mapped, so the mapping stays backed for its lifetime.
        let map = unsafe { MmapMut::map_mut(file.as_file())? };
        Ok(MappedPage { map, file })
    }

    fn release(&mut self, page: Self::Page) -> Result<()> {
        let MappedPage { map, file } = page;
        drop(map);
        let path = file.path().to_path_buf();
        file.close().map_err(|e| {
            warn!(path = %path.display(), error = %e, "failed to delete map scratch file");
            e.into()
        })
    }
}
