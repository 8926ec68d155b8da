//! # mdmap - digest histograms that outgrow the heap
//!
//! Counts how often each fixed-length digest (typically a block hash) was
//! seen during a scan. Small scans can use an ordinary hash map; large ones
//! use a block-addressed trie whose pages live on the heap, in anonymous
//! mappings, or in memory-mapped scratch files.
//!
//! ## Architecture
//!
//! 1. **Block store** ([`store`]): a bump allocator over fixed-size pages
//!    with little-endian, width-masked integer access. Pages come from a
//!    [`PageProvider`].
//!
//! 2. **Trie engine** ([`DataMap`]): 256-way TABLE blocks routing one key byte
//!    per level, with short LIST chains below them that are promoted to
//!    tables when they grow too long.
//!
//! 3. **Facade** ([`MdMap`]): `add`/`get`/`scan` on counters, with
//!    [`MapSupplier`] strategies to create maps per unit of work.
//!
//! ## Example
//!
//! ```rust
//! use mdmap::{MapConfig, MapKind};
//!
//! let config = MapConfig {
//!     md_size: 4,
//!     kind: MapKind::OffHeap,
//!     page_size: 1 << 16,
//!     max_data_size: 1 << 30,
//!     ..MapConfig::default()
//! };
//! let supplier = config.supplier().unwrap();
//! let mut map = supplier.supply().unwrap();
//!
//! map.add(b"abcd", 1).unwrap();
//! map.add(b"abcd", 2).unwrap();
//! assert_eq!(map.get(b"abcd").unwrap(), 3);
//! assert_eq!(map.get(b"wxyz").unwrap(), 0);
//!
//! let mut total = 0;
//! map.scan(&mut |_key, count| total += count).unwrap();
//! assert_eq!(total, 3);
//!
//! map.dispose().unwrap();
//! ```

#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod datamap;
pub mod error;
pub mod mdmap;
pub mod store;
pub mod supplier;

pub use datamap::{Cursor, DataMap, Entry, MapStats, TrieConfig};
pub use error::{Error, Result};
pub use mdmap::{HashMdMap, MdMap, SyncMdMap, TrieMdMap};
pub use store::{
    Address, BlockStore, HeapPages, MappedPage, MappedPages, OffHeapPages, PageProvider,
};
pub use supplier::{
    addr_size_for_data, addr_size_for_entries, HashMapSupplier, MapConfig, MapKind,
    MapSupplier, Medium, TrieMapSupplier,
};

/// Counter map on heap pages.
pub type HeapMap = TrieMdMap<HeapPages>;

/// Counter map on anonymous mappings.
pub type OffHeapMap = TrieMdMap<OffHeapPages>;

/// Counter map on memory-mapped scratch files.
pub type MappedMap = TrieMdMap<MappedPages>;

#[cfg(test)]
mod proptests;
