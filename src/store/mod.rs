//! Block store: a bump allocator over fixed-size pages.
//!
//! Pages are carved front to back into blocks that are never freed
//! individually. A block is named by an [`Address`], a fixed-width integer
//! packing `(page_index << log2(page_size)) | offset_in_page`. The store owns
//! every page; callers only ever hold addresses.
//!
//! All typed access goes through this module. Integers are little-endian and
//! are read and written as whole 8-byte words, masked to the requested width,
//! so neighbouring fields inside the same word survive a narrow write. Every
//! page keeps [`PAGE_SLACK`] bytes unallocated at its end so such a word never
//! runs past the page.
//!
//! Where the bytes physically live is up to a [`PageProvider`]:
//! [`HeapPages`], [`OffHeapPages`] or [`MappedPages`].

mod heap;
mod mapped;
mod offheap;

pub use heap::HeapPages;
pub use mapped::{MappedPage, MappedPages};
pub use offheap::OffHeapPages;

use tracing::{debug, warn};

use crate::error::{Error, Result};

/// Bytes at the end of each page that are never handed out.
pub const PAGE_SLACK: usize = 8;

/// Largest supported address width, in bytes.
pub const MAX_ADDR_SIZE: usize = 8;

/// Opaque location of a block inside a [`BlockStore`].
///
/// Address `0` doubles as "no block". The very first block of a store lives
/// there, so that block must never be linked to from anywhere.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct Address(u64);

impl Address {
    /// The "no block" address.
    pub const NULL: Address = Address(0);

    /// Wrap a raw address value read back from a block.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw integer stored on disk/in memory.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }

    /// Check if this is the "no block" address.
    #[inline]
    pub const fn is_null(self) -> bool {
        self.0 == 0
    }
}

/// Decoded form of an [`Address`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Location {
    /// Index of the page in allocation order.
    pub page: usize,
    /// Byte offset inside the page.
    pub offset: usize,
}

/// Materializes and releases the pages behind a [`BlockStore`].
///
/// Implementations decide only where a page lives. Every page handed out must
/// be exactly the requested size and zero-filled.
pub trait PageProvider {
    /// A single page of storage.
    type Page: AsRef<[u8]> + AsMut<[u8]>;

    /// Short name used in log lines and descriptions.
    fn name(&self) -> &'static str;

    /// Create a new zeroed page of `size` bytes.
    fn create(&mut self, size: usize) -> Result<Self::Page>;

    /// Release a page. The default just drops it.
    fn release(&mut self, page: Self::Page) -> Result<()> {
        drop(page);
        Ok(())
    }
}

#[inline]
fn width_mask(width: usize) -> u64 {
    debug_assert!((1..=8).contains(&width), "integer width must be 1..=8, got {width}");
    u64::MAX >> ((8 - width) * 8)
}

#[inline]
fn word<const N: usize>(bytes: &[u8]) -> [u8; N] {
    let mut w = [0u8; N];
    w.copy_from_slice(&bytes[..N]);
    w
}

/// Compare two equally long byte runs, widest chunks first.
#[inline]
fn chunks_equal(a: &[u8], b: &[u8]) -> bool {
    debug_assert_eq!(a.len(), b.len());
    let len = a.len();
    let mut i = 0;
    while len - i >= 8 {
        if u64::from_ne_bytes(word(&a[i..])) != u64::from_ne_bytes(word(&b[i..])) {
            return false;
        }
        i += 8;
    }
    if len - i >= 4 {
        if u32::from_ne_bytes(word(&a[i..])) != u32::from_ne_bytes(word(&b[i..])) {
            return false;
        }
        i += 4;
    }
    if len - i >= 2 {
        if u16::from_ne_bytes(word(&a[i..])) != u16::from_ne_bytes(word(&b[i..])) {
            return false;
        }
        i += 2;
    }
    if len - i >= 1 {
        return a[i] == b[i];
    }
    true
}

/// A slab of pages carved into blocks, addressed by fixed-width integers.
pub struct BlockStore<P: PageProvider> {
    provider: P,
    pages: Vec<P::Page>,
    page_size: usize,
    log_page_size: u32,
    offset_mask: u64,
    addr_size: usize,
    max_pages: u64,
    /// Next free offset in the last page.
    current: usize,
}

impl<P: PageProvider> BlockStore<P> {
    /// Create an empty store.
    ///
    /// `page_size` must be a power of two larger than [`PAGE_SLACK`], and
    /// `addr_size` bytes must at least cover an offset inside one page.
    pub fn new(provider: P, page_size: usize, addr_size: usize) -> Result<Self> {
        if !page_size.is_power_of_two() || page_size <= PAGE_SLACK {
            return Err(Error::InvalidConfig(format!(
                "page size must be a power of two above {PAGE_SLACK}, got {page_size}"
            )));
        }
        if !(1..=MAX_ADDR_SIZE).contains(&addr_size) {
            return Err(Error::InvalidConfig(format!(
                "address size must be 1..={MAX_ADDR_SIZE} bytes, got {addr_size}"
            )));
        }
        let log_page_size = page_size.trailing_zeros();
        let addr_bits = (addr_size * 8) as u32;
        if addr_bits < log_page_size {
            return Err(Error::InvalidConfig(format!(
                "{addr_size}-byte addresses cannot reach inside a {page_size}-byte page"
            )));
        }

        Ok(Self {
            provider,
            pages: Vec::new(),
            page_size,
            log_page_size,
            offset_mask: (page_size as u64) - 1,
            addr_size,
            max_pages: 1u64 << (addr_bits - log_page_size),
            current: 0,
        })
    }

    /// Carve `size` bytes out of the current page, opening a new page if it
    /// does not fit. With `clear` the region is zeroed first.
    ///
    /// Fails with [`Error::Overflow`] once the address width cannot name
    /// another page.
    pub fn allocate(&mut self, size: usize, clear: bool) -> Result<Address> {
        if size + PAGE_SLACK > self.page_size {
            return Err(Error::InvalidConfig(format!(
                "block of {size} bytes does not fit a {}-byte page",
                self.page_size
            )));
        }

        if self.pages.is_empty() || self.current + size + PAGE_SLACK > self.page_size {
            if self.pages.len() as u64 >= self.max_pages {
                warn!(
                    provider = self.provider.name(),
                    pages = self.pages.len(),
                    addr_size = self.addr_size,
                    "block store address space exhausted"
                );
                return Err(Error::Overflow {
                    pages: self.pages.len(),
                    max_pages: self.max_pages,
                    addr_size: self.addr_size,
                });
            }
            let page = self.provider.create(self.page_size)?;
            debug_assert_eq!(page.as_ref().len(), self.page_size);
            debug!(
                provider = self.provider.name(),
                page = self.pages.len(),
                page_size = self.page_size,
                "created page"
            );
            self.pages.push(page);
            self.current = 0;
        }

        let page = self.pages.len() - 1;
        let offset = self.current;
        if clear {
            self.pages[page].as_mut()[offset..offset + size].fill(0);
        }
        self.current += size;
        Ok(Address(((page as u64) << self.log_page_size) | offset as u64))
    }

    /// Split an address into page index and offset.
    #[inline]
    pub fn locate(&self, addr: Address) -> Location {
        Location {
            page: (addr.0 >> self.log_page_size) as usize,
            offset: (addr.0 & self.offset_mask) as usize,
        }
    }

    #[inline]
    fn bytes(&self, addr: Address, off: usize) -> &[u8] {
        let loc = self.locate(addr);
        &self.pages[loc.page].as_ref()[loc.offset + off..]
    }

    #[inline]
    fn bytes_mut(&mut self, addr: Address, off: usize) -> &mut [u8] {
        let loc = self.locate(addr);
        &mut self.pages[loc.page].as_mut()[loc.offset + off..]
    }

    /// Read a `width`-byte unsigned integer at `addr + off`.
    #[inline]
    pub fn read_int(&self, addr: Address, off: usize, width: usize) -> u64 {
        u64::from_le_bytes(word(self.bytes(addr, off))) & width_mask(width)
    }

    /// Write the low `width` bytes of `value` at `addr + off`, keeping the
    /// rest of the enclosing word intact.
    #[inline]
    pub fn write_int(&mut self, addr: Address, off: usize, value: u64, width: usize) {
        let mask = width_mask(width);
        let at = self.bytes_mut(addr, off);
        let old = u64::from_le_bytes(word(at));
        let merged = (old & !mask) | (value & mask);
        at[..8].copy_from_slice(&merged.to_le_bytes());
    }

    /// Copy `out.len()` bytes starting at `addr + off` into `out`.
    #[inline]
    pub fn read_bytes(&self, addr: Address, off: usize, out: &mut [u8]) {
        let len = out.len();
        out.copy_from_slice(&self.bytes(addr, off)[..len]);
    }

    /// Copy `data` into the store at `addr + off`.
    #[inline]
    pub fn write_bytes(&mut self, addr: Address, off: usize, data: &[u8]) {
        self.bytes_mut(addr, off)[..data.len()].copy_from_slice(data);
    }

    /// Check whether the stored bytes at `addr + off` equal `key`.
    #[inline]
    pub fn matches(&self, addr: Address, off: usize, key: &[u8]) -> bool {
        chunks_equal(&self.bytes(addr, off)[..key.len()], key)
    }

    /// Bytes handed out so far, counting whole pages before the current one.
    pub fn data_size(&self) -> u64 {
        match self.pages.len() {
            0 => 0,
            n => (n as u64 - 1) * self.page_size as u64 + self.current as u64,
        }
    }

    /// Number of pages created.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Size of every page.
    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Address width in bytes.
    pub fn addr_size(&self) -> usize {
        self.addr_size
    }

    /// Most pages the address width can name.
    pub fn max_pages(&self) -> u64 {
        self.max_pages
    }

    /// Name of the page provider.
    pub fn provider_name(&self) -> &'static str {
        self.provider.name()
    }

    /// Release every page now, reporting the first failure.
    ///
    /// All pages are released even if one of them fails.
    pub fn dispose(mut self) -> Result<()> {
        self.release_all()
    }

    fn release_all(&mut self) -> Result<()> {
        let mut first_err = None;
        while let Some(page) = self.pages.pop() {
            if let Err(e) = self.provider.release(page) {
                warn!(provider = self.provider.name(), error = %e, "failed to release page");
                first_err.get_or_insert(e);
            }
        }
        self.current = 0;
        first_err.map_or(Ok(()), Err)
    }
}

impl<P: PageProvider> Drop for BlockStore<P> {
    fn drop(&mut self) {
        // Errors were already logged; nothing more can be done from drop.
        let _ = self.release_all();
    }
}
