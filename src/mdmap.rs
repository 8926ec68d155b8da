//! Key to count facade used by the scanning pipeline.
//!
//! [`MdMap`] is the only surface callers see: they add counts for fixed-length
//! digests and read back a histogram. Two implementations exist, a plain
//! [`HashMdMap`] for small scans and a [`TrieMdMap`] over a [`DataMap`] for
//! scans that would not fit the heap. [`SyncMdMap`] serializes access for a
//! worker pool.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::datamap::{DataMap, MapStats, TrieConfig};
use crate::error::{Error, Result};
use crate::store::PageProvider;

/// Fixed-length key to counter map.
///
/// Counters saturate instead of wrapping.
pub trait MdMap: Send {
    /// Bytes per key.
    fn key_len(&self) -> usize;

    /// Add `count` to the counter of `key`, inserting it at `count` if absent.
    /// Returns the new total.
    fn add(&mut self, key: &[u8], count: u64) -> Result<u64>;

    /// Counter of `key`, or `0` if it was never added.
    fn get(&self, key: &[u8]) -> Result<u64>;

    /// Number of distinct keys.
    fn len(&self) -> usize;

    /// Check if no key was ever added.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Call `visit` once per distinct key with its counter.
    fn scan(&mut self, visit: &mut dyn FnMut(&[u8], u64)) -> Result<()>;

    /// Release all backing storage.
    fn dispose(self: Box<Self>) -> Result<()>;
}

fn check_key(expected: usize, key: &[u8]) -> Result<()> {
    if key.len() != expected {
        return Err(Error::KeyLength {
            expected,
            actual: key.len(),
        });
    }
    Ok(())
}

/// [`MdMap`] over a `std` hash map keyed by the digest bytes.
#[derive(Debug, Default)]
pub struct HashMdMap {
    key_len: usize,
    counts: HashMap<Box<[u8]>, u64>,
}

impl HashMdMap {
    /// An empty map for `key_len`-byte keys.
    pub fn new(key_len: usize) -> Self {
        Self {
            key_len,
            counts: HashMap::new(),
        }
    }
}

impl MdMap for HashMdMap {
    fn key_len(&self) -> usize {
        self.key_len
    }

    fn add(&mut self, key: &[u8], count: u64) -> Result<u64> {
        check_key(self.key_len, key)?;
        // Look up by slice first so existing keys are not copied.
        if let Some(total) = self.counts.get_mut(key) {
            *total = total.saturating_add(count);
            return Ok(*total);
        }
        self.counts.insert(key.into(), count);
        Ok(count)
    }

    fn get(&self, key: &[u8]) -> Result<u64> {
        check_key(self.key_len, key)?;
        Ok(self.counts.get(key).copied().unwrap_or(0))
    }

    fn len(&self) -> usize {
        self.counts.len()
    }

    fn scan(&mut self, visit: &mut dyn FnMut(&[u8], u64)) -> Result<()> {
        for (key, &count) in &self.counts {
            visit(key, count);
        }
        Ok(())
    }

    fn dispose(self: Box<Self>) -> Result<()> {
        Ok(())
    }
}

/// [`MdMap`] over a [`DataMap`]; the counter fills the whole value.
pub struct TrieMdMap<P: PageProvider> {
    map: DataMap<P>,
    width: usize,
    max: u64,
}

impl<P: PageProvider> TrieMdMap<P> {
    /// Open a trie with `config`, using its values as counters.
    ///
    /// The value size is the counter width and must be 1..=8 bytes.
    pub fn open(config: TrieConfig, provider: P) -> Result<Self> {
        let width = config.value_size;
        if !(1..=8).contains(&width) {
            return Err(Error::InvalidConfig(format!(
                "counter width must be 1..=8 bytes, got {width}"
            )));
        }
        Ok(Self {
            map: DataMap::open(config, provider)?,
            width,
            max: u64::MAX >> (64 - 8 * width),
        })
    }

    /// The underlying trie.
    pub fn data_map(&self) -> &DataMap<P> {
        &self.map
    }

    /// Space accounting of the underlying trie.
    pub fn stats(&self) -> MapStats {
        self.map.stats()
    }
}

impl<P> MdMap for TrieMdMap<P>
where
    P: PageProvider + Send,
    P::Page: Send,
{
    fn key_len(&self) -> usize {
        self.map.key_size()
    }

    fn add(&mut self, key: &[u8], count: u64) -> Result<u64> {
        let (width, max) = (self.width, self.max);
        let mut cursor = self.map.cursor();
        let inserted = cursor.put(key)?;
        let old = if inserted { 0 } else { cursor.read_value(0, width) };
        let total = old.saturating_add(count).min(max);
        cursor.write_value(0, total, width);
        Ok(total)
    }

    fn get(&self, key: &[u8]) -> Result<u64> {
        Ok(self.map.peek(key, 0, self.width)?.unwrap_or(0))
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn scan(&mut self, visit: &mut dyn FnMut(&[u8], u64)) -> Result<()> {
        let width = self.width;
        self.map
            .cursor()
            .scan(|entry| visit(entry.key(), entry.read_value(0, width)))
    }

    fn dispose(self: Box<Self>) -> Result<()> {
        self.map.dispose()
    }
}

/// An [`MdMap`] shared by a worker pool.
///
/// Every call takes one lock, so adds from many threads are applied one at a
/// time. Scan after the workers are done, through [`SyncMdMap::into_inner`].
pub struct SyncMdMap {
    inner: Mutex<Box<dyn MdMap>>,
    key_len: usize,
}

impl SyncMdMap {
    /// Wrap `map`.
    pub fn new(map: Box<dyn MdMap>) -> Self {
        let key_len = map.key_len();
        Self {
            inner: Mutex::new(map),
            key_len,
        }
    }

    /// Bytes per key.
    pub fn key_len(&self) -> usize {
        self.key_len
    }

    /// See [`MdMap::add`].
    pub fn add(&self, key: &[u8], count: u64) -> Result<u64> {
        self.inner.lock().add(key, count)
    }

    /// See [`MdMap::get`].
    pub fn get(&self, key: &[u8]) -> Result<u64> {
        self.inner.lock().get(key)
    }

    /// See [`MdMap::len`].
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    /// See [`MdMap::is_empty`].
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }

    /// The wrapped map, for scanning and disposal.
    pub fn into_inner(self) -> Box<dyn MdMap> {
        self.inner.into_inner()
    }
}
