//! Strategies that build [`MdMap`]s, and the arithmetic that sizes them.
//!
//! A scan creates one map per unit of work, so callers hold a supplier and ask
//! it for fresh maps. [`HashMapSupplier`] hands out [`HashMdMap`]s.
//! [`TrieMapSupplier`] hands out [`TrieMdMap`]s whose address width covers an
//! expected data volume.

use std::fmt;
use std::path::PathBuf;

use crate::datamap::TrieConfig;
use crate::error::{Error, Result};
use crate::mdmap::{HashMdMap, MdMap, TrieMdMap};
use crate::store::{HeapPages, MappedPages, OffHeapPages, MAX_ADDR_SIZE};

/// Counter width of supplied trie maps.
const COUNTER_SIZE: usize = 8;

/// Builds empty [`MdMap`]s of one kind.
pub trait MapSupplier: fmt::Display + Send + Sync {
    /// A new, empty map.
    fn supply(&self) -> Result<Box<dyn MdMap>>;

    /// Key length of the maps supplied.
    fn key_len(&self) -> usize;
}

/// `ceil(log2(n))`, with `0` for `n <= 1`.
pub fn ceil_log2(n: u64) -> u32 {
    if n <= 1 {
        0
    } else {
        u64::BITS - (n - 1).leading_zeros()
    }
}

fn addr_size_for_log(log_page: u32, log_data: u32) -> usize {
    let log_page = log_page as i64;
    let log_data = log_data as i64;
    (((log_page + 7) >> 3) + ((log_data - log_page + 7) >> 3).max(1)) as usize
}

fn check_addr_size(addr_size: usize) -> Result<usize> {
    if addr_size > MAX_ADDR_SIZE {
        return Err(Error::InvalidConfig(format!(
            "{addr_size}-byte addresses needed, at most {MAX_ADDR_SIZE} supported"
        )));
    }
    Ok(addr_size)
}

/// Address width, in bytes, that names every byte of `max_data_size` bytes of
/// `page_size` pages: whole bytes for the in-page offset plus at least one
/// byte of page index.
pub fn addr_size_for_data(max_data_size: u64, page_size: usize) -> Result<usize> {
    check_addr_size(addr_size_for_log(
        ceil_log2(page_size as u64),
        ceil_log2(max_data_size),
    ))
}

/// Address width for a map expected to hold `max_entries` distinct keys.
///
/// Data volume is estimated as one TABLE block per `list_size` entries, which
/// itself depends on the address width, so the width is iterated from the
/// widest down to a fixed point.
pub fn addr_size_for_entries(max_entries: u64, page_size: usize, list_size: usize) -> Result<usize> {
    if list_size == 0 {
        return Err(Error::InvalidConfig("list size must be positive".into()));
    }
    let log_page = ceil_log2(page_size as u64);
    let mut addr_size = MAX_ADDR_SIZE;
    loop {
        let table = (8 + 256 * addr_size) as u64;
        let data = table.saturating_mul(max_entries) / list_size as u64;
        let next = addr_size_for_log(log_page, ceil_log2(data));
        if next == addr_size {
            return check_addr_size(addr_size);
        }
        addr_size = next;
    }
}

/// Render a byte count with the largest binary unit that divides it.
pub fn format_size(mut n: u64) -> String {
    const UNITS: [&str; 5] = ["B", "KiB", "MiB", "GiB", "TiB"];
    let mut scale = 0;
    while n != 0 && n % 1024 == 0 && scale < UNITS.len() - 1 {
        n /= 1024;
        scale += 1;
    }
    format!("{n} {}", UNITS[scale])
}

/// Supplies [`HashMdMap`]s.
#[derive(Clone, Debug)]
pub struct HashMapSupplier {
    md_size: usize,
}

impl HashMapSupplier {
    /// Maps for `md_size`-byte digests.
    pub fn new(md_size: usize) -> Self {
        Self { md_size }
    }
}

impl MapSupplier for HashMapSupplier {
    fn supply(&self) -> Result<Box<dyn MdMap>> {
        Ok(Box::new(HashMdMap::new(self.md_size)))
    }

    fn key_len(&self) -> usize {
        self.md_size
    }
}

impl fmt::Display for HashMapSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "hash map, key={}", self.md_size)
    }
}

/// Where a [`TrieMapSupplier`] puts its pages.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Medium {
    /// [`HeapPages`].
    Heap,
    /// [`OffHeapPages`].
    OffHeap,
    /// [`MappedPages`] in the given directory.
    Mapped(PathBuf),
}

/// Supplies [`TrieMdMap`]s.
#[derive(Clone, Debug)]
pub struct TrieMapSupplier {
    md_size: usize,
    list_size: usize,
    page_size: usize,
    addr_size: usize,
    medium: Medium,
}

impl TrieMapSupplier {
    /// Maps for `md_size`-byte digests on `medium`, addressing up to
    /// `max_data_size` bytes of `page_size` pages.
    pub fn new(
        md_size: usize,
        list_size: usize,
        page_size: usize,
        max_data_size: u64,
        medium: Medium,
    ) -> Result<Self> {
        let addr_size = addr_size_for_data(max_data_size, page_size)?;
        let supplier = Self {
            md_size,
            list_size,
            page_size,
            addr_size,
            medium,
        };
        supplier.validate()?;
        Ok(supplier)
    }

    /// Override the computed address width.
    pub fn with_addr_size(mut self, addr_size: usize) -> Result<Self> {
        self.addr_size = addr_size;
        self.validate()?;
        Ok(self)
    }

    /// Address width of the maps supplied.
    pub fn addr_size(&self) -> usize {
        self.addr_size
    }

    /// Backing medium of the maps supplied.
    pub fn medium(&self) -> &Medium {
        &self.medium
    }

    /// Geometry of the maps supplied.
    pub fn config(&self) -> TrieConfig {
        TrieConfig {
            key_size: self.md_size,
            value_size: COUNTER_SIZE,
            addr_size: self.addr_size,
            max_list_size: self.list_size,
            page_size: self.page_size,
        }
    }

    // Opening a throwaway map would create a page (and, for the mapped
    // medium, a file), so the geometry is checked by hand.
    fn validate(&self) -> Result<()> {
        let config = self.config();
        if config.key_size == 0 || config.max_list_size == 0 {
            return Err(Error::InvalidConfig(
                "key size and list size must be positive".into(),
            ));
        }
        if !config.page_size.is_power_of_two() {
            return Err(Error::InvalidConfig(format!(
                "page size must be a power of two, got {}",
                config.page_size
            )));
        }
        let block = config.list_block_size().max(config.table_block_size());
        if block + crate::store::PAGE_SLACK > config.page_size {
            return Err(Error::InvalidConfig(format!(
                "{block}-byte blocks do not fit {}-byte pages",
                config.page_size
            )));
        }
        if !(1..=MAX_ADDR_SIZE).contains(&config.addr_size)
            || (config.addr_size * 8) < ceil_log2(config.page_size as u64) as usize
        {
            return Err(Error::InvalidConfig(format!(
                "{}-byte addresses do not fit {}-byte pages",
                config.addr_size, config.page_size
            )));
        }
        Ok(())
    }
}

impl MapSupplier for TrieMapSupplier {
    fn supply(&self) -> Result<Box<dyn MdMap>> {
        let config = self.config();
        let map: Box<dyn MdMap> = match &self.medium {
            Medium::Heap => Box::new(TrieMdMap::open(config, HeapPages)?),
            Medium::OffHeap => Box::new(TrieMdMap::open(config, OffHeapPages)?),
            Medium::Mapped(dir) => {
                Box::new(TrieMdMap::open(config, MappedPages::new(dir.clone()))?)
            }
        };
        Ok(map)
    }

    fn key_len(&self) -> usize {
        self.md_size
    }
}

impl fmt::Display for TrieMapSupplier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let medium = match &self.medium {
            Medium::Heap => "heap",
            Medium::OffHeap => "off-heap",
            Medium::Mapped(_) => "mapped",
        };
        write!(
            f,
            "trie map ({medium}), addr={}, list={}, page={}",
            self.addr_size,
            self.list_size,
            format_size(self.page_size as u64)
        )?;
        if let Medium::Mapped(dir) = &self.medium {
            write!(f, ", dir={}", dir.display())?;
        }
        Ok(())
    }
}

/// Which kind of map a [`MapConfig`] asks for.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum MapKind {
    /// [`HashMdMap`]; fine while the distinct keys fit the heap.
    Hash,
    /// Trie on heap pages.
    Heap,
    /// Trie on anonymous mappings.
    #[default]
    OffHeap,
    /// Trie on memory-mapped scratch files.
    Mapped {
        /// Directory for the scratch files.
        dir: PathBuf,
    },
}

/// Facade-level map settings.
#[derive(Clone, Debug)]
pub struct MapConfig {
    /// Digest length in bytes.
    pub md_size: usize,
    /// Kind of map to build.
    pub kind: MapKind,
    /// Longest chain before promotion (trie maps).
    pub list_size: usize,
    /// Page size in bytes (trie maps).
    pub page_size: usize,
    /// Expected total data volume in bytes, sizing addresses (trie maps).
    pub max_data_size: u64,
}

impl Default for MapConfig {
    fn default() -> Self {
        Self {
            md_size: 20,
            kind: MapKind::default(),
            list_size: 8,
            page_size: 1 << 26,
            max_data_size: 1 << 40,
        }
    }
}

impl MapConfig {
    /// The supplier these settings describe.
    pub fn supplier(&self) -> Result<Box<dyn MapSupplier>> {
        let medium = match &self.kind {
            MapKind::Hash => return Ok(Box::new(HashMapSupplier::new(self.md_size))),
            MapKind::Heap => Medium::Heap,
            MapKind::OffHeap => Medium::OffHeap,
            MapKind::Mapped { dir } => Medium::Mapped(dir.clone()),
        };
        Ok(Box::new(TrieMapSupplier::new(
            self.md_size,
            self.list_size,
            self.page_size,
            self.max_data_size,
            medium,
        )?))
    }
}
