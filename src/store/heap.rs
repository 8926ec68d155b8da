//! Pages as plain heap allocations.

use super::PageProvider;
use crate::error::Result;

/// Pages are boxed byte slices owned by the global allocator.
///
/// Fastest of the three, but every page counts against the process heap.
#[derive(Clone, Copy, Debug, Default)]
pub struct HeapPages;

impl PageProvider for HeapPages {
    type Page = Box<[u8]>;

    fn name(&self) -> &'static str {
        "heap"
    }

    fn create(&mut self, size: usize) -> Result<Self::Page> {
        Ok(vec![0u8; size].into_boxed_slice())
    }
}
