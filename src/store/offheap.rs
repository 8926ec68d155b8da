//! Pages as anonymous memory mappings.
//!
//! Each page is its own `mmap` region outside the allocator's heap, obtained
//! from and returned to the kernel directly. Unmapping happens when the page is
//! released, not at some later collection point.

use memmap2::MmapMut;

use super::PageProvider;
use crate::error::Result;

/// Pages are private anonymous mappings.
#[derive(Clone, Copy, Debug, Default)]
pub struct OffHeapPages;

impl PageProvider for OffHeapPages {
    type Page = MmapMut;

    fn name(&self) -> &'static str {
        "off-heap"
    }

    fn create(&mut self, size: usize) -> Result<Self::Page> {
        // Anonymous mappings come back zero-filled.
        Ok(MmapMut::map_anon(size)?)
    }

    fn release(&mut self, page: Self::Page) -> Result<()> {
        // Dropping the mapping munmaps it.
        drop(page);
        Ok(())
    }
}
