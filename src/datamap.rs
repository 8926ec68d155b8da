//! Hybrid trie/hash map over a [`BlockStore`].
//!
//! Keys have a fixed length and are routed one byte per level through
//! 256-way TABLE blocks. Below a table slot, entries that share the routed
//! prefix sit in a short chain of LIST blocks. A chain that would grow past
//! `max_list_size` is promoted into a new TABLE keyed by the next key byte,
//! which splits it into shorter chains one level deeper.
//!
//! Block layouts (integers little-endian, `A` = address width):
//!
//! ```text
//! LIST:  [tag=1: 1][next: A][key: key_size][value: value_size]
//! TABLE: [tag=2: 1][slot 0: A][slot 1: A] ... [slot 255: A]
//! ```
//!
//! A slot or `next` of `0` means "empty". The root table is the first block
//! allocated and so sits at address `0`, which nothing ever links to.
//!
//! Keys are stored whole in their LIST block, but a chain at depth `d` only
//! compares `key[d..]`: the leading bytes already picked the path.

use std::fmt::Write as _;

use tracing::{debug, info};

use crate::error::{Error, Result};
use crate::store::{Address, BlockStore, PageProvider};

const LIST: u8 = 1;
const TABLE: u8 = 2;

const TAG_SIZE: usize = 1;
const FAN_OUT: usize = 256;
/// Offset of `next` inside a LIST block.
const NEXT_OFF: usize = TAG_SIZE;

/// The two kinds of block, decoded from the tag byte.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum BlockKind {
    List,
    Table,
}

impl BlockKind {
    #[inline]
    fn from_tag(tag: u8, address: Address) -> Result<Self> {
        match tag {
            LIST => Ok(BlockKind::List),
            TABLE => Ok(BlockKind::Table),
            tag => Err(Error::CorruptBlock {
                tag,
                address: address.raw(),
            }),
        }
    }
}

/// Geometry of a [`DataMap`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrieConfig {
    /// Bytes per key.
    pub key_size: usize,
    /// Bytes per value.
    pub value_size: usize,
    /// Bytes per block address (1..=8).
    pub addr_size: usize,
    /// Longest chain tolerated before promotion to a table.
    pub max_list_size: usize,
    /// Bytes per page; a power of two.
    pub page_size: usize,
}

impl Default for TrieConfig {
    fn default() -> Self {
        Self {
            key_size: 20,
            value_size: 8,
            addr_size: 5,
            max_list_size: 8,
            page_size: 1 << 20,
        }
    }
}

impl TrieConfig {
    /// Bytes taken by one LIST block.
    pub fn list_block_size(&self) -> usize {
        TAG_SIZE + self.addr_size + self.key_size + self.value_size
    }

    /// Bytes taken by one TABLE block.
    pub fn table_block_size(&self) -> usize {
        TAG_SIZE + FAN_OUT * self.addr_size
    }
}

/// Space accounting for a [`DataMap`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MapStats {
    /// Distinct keys stored.
    pub entries: usize,
    /// LIST blocks allocated (one per entry).
    pub list_blocks: usize,
    /// TABLE blocks allocated, root included.
    pub table_blocks: usize,
    /// Pages created.
    pub pages: usize,
    /// Bytes carved out of pages.
    pub bytes_used: u64,
    /// Bytes held by pages, used or not.
    pub bytes_reserved: u64,
    /// `bytes_used / entries`.
    pub bytes_per_entry: f64,
}

/// Fixed-length key to fixed-width value map, stored in blocks.
///
/// Supports insert-or-find, lookup and full scans. There is no removal.
/// Nothing here is synchronized: a map must be mutated by one thread at a time.
pub struct DataMap<P: PageProvider> {
    store: BlockStore<P>,
    key_size: usize,
    value_size: usize,
    addr_size: usize,
    max_list_size: usize,
    list_block_size: usize,
    table_block_size: usize,
    root: Address,
    len: usize,
    list_blocks: usize,
    table_blocks: usize,
    /// Promotion scratch: last entry re-linked under each slot of the new table.
    tails: Box<[Address; FAN_OUT]>,
}

impl<P: PageProvider> DataMap<P> {
    /// Build an empty map on top of `provider` and allocate its root table.
    pub fn open(config: TrieConfig, provider: P) -> Result<Self> {
        if config.key_size == 0 {
            return Err(Error::InvalidConfig("key size must be positive".into()));
        }
        if config.value_size == 0 {
            return Err(Error::InvalidConfig("value size must be positive".into()));
        }
        if config.max_list_size == 0 {
            return Err(Error::InvalidConfig("list size must be positive".into()));
        }
        let list_block_size = config.list_block_size();
        let table_block_size = config.table_block_size();
        let largest = list_block_size.max(table_block_size);
        if largest + crate::store::PAGE_SLACK > config.page_size {
            return Err(Error::InvalidConfig(format!(
                "{largest}-byte blocks do not fit {}-byte pages",
                config.page_size
            )));
        }

        let store = BlockStore::new(provider, config.page_size, config.addr_size)?;
        let mut map = Self {
            store,
            key_size: config.key_size,
            value_size: config.value_size,
            addr_size: config.addr_size,
            max_list_size: config.max_list_size,
            list_block_size,
            table_block_size,
            root: Address::NULL,
            len: 0,
            list_blocks: 0,
            table_blocks: 0,
            tails: Box::new([Address::NULL; FAN_OUT]),
        };
        map.root = map.new_table()?;
        debug_assert!(map.root.is_null(), "root table must sit at address 0");

        info!(
            provider = map.store.provider_name(),
            key_size = map.key_size,
            value_size = map.value_size,
            addr_size = map.addr_size,
            max_list_size = map.max_list_size,
            page_size = config.page_size,
            "opened data map"
        );
        Ok(map)
    }

    /// A cursor bound to this map.
    pub fn cursor(&mut self) -> Cursor<'_, P> {
        let key = vec![0u8; self.key_size];
        Cursor {
            map: self,
            block: None,
            key,
        }
    }

    /// Number of distinct keys.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Check if no key has been inserted.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Bytes per key.
    pub fn key_size(&self) -> usize {
        self.key_size
    }

    /// Bytes per value.
    pub fn value_size(&self) -> usize {
        self.value_size
    }

    /// Bytes per block address.
    pub fn addr_size(&self) -> usize {
        self.addr_size
    }

    /// Chain length that triggers promotion.
    pub fn max_list_size(&self) -> usize {
        self.max_list_size
    }

    /// Bytes carved out of pages so far.
    pub fn data_size(&self) -> u64 {
        self.store.data_size()
    }

    /// Pages created so far.
    pub fn page_count(&self) -> usize {
        self.store.page_count()
    }

    /// Name of the backing page provider.
    pub fn provider_name(&self) -> &'static str {
        self.store.provider_name()
    }

    /// Space accounting snapshot.
    pub fn stats(&self) -> MapStats {
        let bytes_used = self.store.data_size();
        MapStats {
            entries: self.len,
            list_blocks: self.list_blocks,
            table_blocks: self.table_blocks,
            pages: self.store.page_count(),
            bytes_used,
            bytes_reserved: self.store.page_count() as u64 * self.store.page_size() as u64,
            bytes_per_entry: if self.len > 0 {
                bytes_used as f64 / self.len as f64
            } else {
                0.0
            },
        }
    }

    /// Read `width` bytes at `offset` inside the value of `key`, or `None` if
    /// the key is absent.
    pub fn peek(&self, key: &[u8], offset: usize, width: usize) -> Result<Option<u64>> {
        self.check_key(key)?;
        Ok(self
            .find(key)?
            .map(|entry| self.store.read_int(entry, self.value_offset() + offset, width)))
    }

    /// Release every page.
    pub fn dispose(self) -> Result<()> {
        info!(
            provider = self.store.provider_name(),
            entries = self.len,
            pages = self.store.page_count(),
            bytes = self.store.data_size(),
            "disposing data map"
        );
        self.store.dispose()
    }

    // --- block layout ------------------------------------------------------

    #[inline]
    fn key_offset(&self) -> usize {
        TAG_SIZE + self.addr_size
    }

    #[inline]
    fn value_offset(&self) -> usize {
        TAG_SIZE + self.addr_size + self.key_size
    }

    #[inline]
    fn slot_offset(&self, byte: u8) -> usize {
        TAG_SIZE + byte as usize * self.addr_size
    }

    #[inline]
    fn kind(&self, block: Address) -> Result<BlockKind> {
        BlockKind::from_tag(self.store.read_int(block, 0, 1) as u8, block)
    }

    #[inline]
    fn read_addr(&self, block: Address, off: usize) -> Address {
        Address::from_raw(self.store.read_int(block, off, self.addr_size))
    }

    #[inline]
    fn write_addr(&mut self, block: Address, off: usize, addr: Address) {
        self.store.write_int(block, off, addr.raw(), self.addr_size);
    }

    #[inline]
    fn next(&self, entry: Address) -> Address {
        self.read_addr(entry, NEXT_OFF)
    }

    fn check_key(&self, key: &[u8]) -> Result<()> {
        if key.len() != self.key_size {
            return Err(Error::KeyLength {
                expected: self.key_size,
                actual: key.len(),
            });
        }
        Ok(())
    }

    fn new_table(&mut self) -> Result<Address> {
        let addr = self.store.allocate(self.table_block_size, true)?;
        self.store.write_int(addr, 0, TABLE as u64, 1);
        self.table_blocks += 1;
        Ok(addr)
    }

    /// A LIST block holding `key`, with an empty `next` and a zero value.
    fn new_list(&mut self, key: &[u8]) -> Result<Address> {
        let addr = self.store.allocate(self.list_block_size, true)?;
        self.store.write_int(addr, 0, LIST as u64, 1);
        let key_off = self.key_offset();
        self.store.write_bytes(addr, key_off, key);
        self.list_blocks += 1;
        Ok(addr)
    }

    // --- algorithms --------------------------------------------------------

    /// Table slot for `key` at `depth`, refusing tables deeper than the key.
    #[inline]
    fn route(&self, table: Address, depth: usize, key: &[u8]) -> Result<usize> {
        match key.get(depth) {
            Some(&byte) => Ok(self.slot_offset(byte)),
            None => Err(Error::CorruptBlock {
                tag: TABLE,
                address: table.raw(),
            }),
        }
    }

    /// LIST block holding `key`, if any.
    fn find(&self, key: &[u8]) -> Result<Option<Address>> {
        let key_off = self.key_offset();
        let mut block = self.root;
        let mut depth = 0;
        loop {
            match self.kind(block)? {
                BlockKind::Table => {
                    let slot = self.route(block, depth, key)?;
                    let next = self.read_addr(block, slot);
                    if next.is_null() {
                        return Ok(None);
                    }
                    block = next;
                    depth += 1;
                }
                BlockKind::List => {
                    let suffix = &key[depth..];
                    let mut entry = block;
                    while !entry.is_null() {
                        if self.store.matches(entry, key_off + depth, suffix) {
                            return Ok(Some(entry));
                        }
                        entry = self.next(entry);
                    }
                    return Ok(None);
                }
            }
        }
    }

    /// Find `key` or insert it. Returns its LIST block and whether it is new.
    fn insert(&mut self, key: &[u8]) -> Result<(Address, bool)> {
        let key_off = self.key_offset();
        let mut table = self.root;
        let mut depth = 0;
        loop {
            let slot = self.route(table, depth, key)?;
            let head = self.read_addr(table, slot);
            if head.is_null() {
                let entry = self.new_list(key)?;
                self.write_addr(table, slot, entry);
                self.len += 1;
                return Ok((entry, true));
            }

            let level = depth + 1;
            match self.kind(head)? {
                BlockKind::Table => {
                    table = head;
                    depth = level;
                }
                BlockKind::List => {
                    let suffix = &key[level..];
                    let mut entry = head;
                    let mut last = head;
                    let mut n = 0;
                    while !entry.is_null() {
                        if self.store.matches(entry, key_off + level, suffix) {
                            return Ok((entry, false));
                        }
                        last = entry;
                        entry = self.next(entry);
                        n += 1;
                    }

                    if n < self.max_list_size {
                        let entry = self.new_list(key)?;
                        self.write_addr(last, NEXT_OFF, entry);
                        self.len += 1;
                        return Ok((entry, true));
                    }

                    // Chain is full: split it by the next key byte and retry
                    // as a table lookup one level down.
                    let promoted = self.promote(head, level)?;
                    self.write_addr(table, slot, promoted);
                    table = promoted;
                    depth = level;
                }
            }
        }
    }

    /// Re-link the chain starting at `head` under a new table keyed by
    /// `key[level]`, keeping chain order within each slot.
    fn promote(&mut self, head: Address, level: usize) -> Result<Address> {
        debug_assert!(level < self.key_size, "full chain at maximum depth");
        let table = self.new_table()?;
        let byte_off = self.key_offset() + level;
        let mut entry = head;
        let mut moved = 0usize;
        while !entry.is_null() {
            let next = self.next(entry);
            let byte = self.store.read_int(entry, byte_off, 1) as u8;
            let slot = self.slot_offset(byte);
            if self.read_addr(table, slot).is_null() {
                self.write_addr(table, slot, entry);
            } else {
                let tail = self.tails[byte as usize];
                self.write_addr(tail, NEXT_OFF, entry);
            }
            self.write_addr(entry, NEXT_OFF, Address::NULL);
            self.tails[byte as usize] = entry;
            entry = next;
            moved += 1;
        }
        debug!(depth = level, entries = moved, "promoted list to table");
        Ok(table)
    }

    // --- troubleshooting ---------------------------------------------------

    /// Render the geometry and, with `blocks`, every block reachable from the
    /// root. Unknown tags are rendered, not reported as errors.
    pub fn dump(&self, blocks: bool) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "DataMap(");
        let _ = writeln!(out, "  provider={}", self.store.provider_name());
        let _ = writeln!(out, "  keySize={}", self.key_size);
        let _ = writeln!(out, "  valueSize={}", self.value_size);
        let _ = writeln!(out, "  addrSize={}", self.addr_size);
        let _ = writeln!(out, "  maxListSize={}", self.max_list_size);
        let _ = writeln!(out, "  listBlockSize={}", self.list_block_size);
        let _ = writeln!(out, "  tableBlockSize={}", self.table_block_size);
        let _ = writeln!(out, "  pages={}", self.store.page_count());
        let _ = writeln!(out, "  dataSize={}", self.store.data_size());
        let _ = writeln!(out, "  size={}", self.len);
        let _ = writeln!(out, ")");
        if blocks {
            let _ = writeln!(out, "blocks:");
            self.dump_block(self.root, &mut out);
        }
        out
    }

    fn dump_block(&self, block: Address, out: &mut String) {
        let tag = self.store.read_int(block, 0, 1) as u8;
        match BlockKind::from_tag(tag, block) {
            Ok(BlockKind::List) => {
                let mut key = vec![0u8; self.key_size];
                let mut value = vec![0u8; self.value_size];
                let _ = writeln!(out, "{}:{{list:", block.raw());
                let mut entry = block;
                while !entry.is_null() {
                    self.store.read_bytes(entry, self.key_offset(), &mut key);
                    self.store.read_bytes(entry, self.value_offset(), &mut value);
                    let _ = writeln!(out, "    {}:{}", hex(&key), hex(&value));
                    entry = self.next(entry);
                }
                let _ = writeln!(out, "}}");
            }
            Ok(BlockKind::Table) => {
                let _ = writeln!(out, "{}:{{table:", block.raw());
                let children: Vec<(usize, Address)> = (0..FAN_OUT)
                    .map(|i| (i, self.read_addr(block, self.slot_offset(i as u8))))
                    .filter(|(_, child)| !child.is_null())
                    .collect();
                for (i, child) in &children {
                    let _ = writeln!(out, "    {i}: {}", child.raw());
                }
                let _ = writeln!(out, "}}");
                for (_, child) in children {
                    self.dump_block(child, out);
                }
            }
            Err(_) => {
                let _ = writeln!(out, "{}:<bad type: {tag}>", block.raw());
            }
        }
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}

/// Stateful handle on a [`DataMap`].
///
/// Remembers the entry found or created by the last successful
/// [`seek`](Cursor::seek) or [`put`](Cursor::put), so its value can be read
/// and written without searching again. Value offsets are relative to the
/// start of the value region.
pub struct Cursor<'m, P: PageProvider> {
    map: &'m mut DataMap<P>,
    block: Option<Address>,
    key: Vec<u8>,
}

impl<'m, P: PageProvider> Cursor<'m, P> {
    /// Position on `key`. Returns `false`, leaving the position unchanged, if
    /// the key is absent.
    pub fn seek(&mut self, key: &[u8]) -> Result<bool> {
        self.map.check_key(key)?;
        match self.map.find(key)? {
            Some(entry) => {
                self.block = Some(entry);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    /// Position on `key`, inserting it with a zero value if absent. Returns
    /// `true` if the key was inserted.
    pub fn put(&mut self, key: &[u8]) -> Result<bool> {
        self.map.check_key(key)?;
        let (entry, inserted) = self.map.insert(key)?;
        self.block = Some(entry);
        Ok(inserted)
    }

    /// The map this cursor is bound to.
    pub fn map(&self) -> &DataMap<P> {
        &*self.map
    }

    #[inline]
    fn position(&self) -> Address {
        self.block.expect("cursor is not positioned on an entry")
    }

    /// Read a `width`-byte integer at `offset` in the current value.
    ///
    /// # Panics
    /// Panics if no `seek`/`put` has succeeded yet.
    pub fn read_value(&self, offset: usize, width: usize) -> u64 {
        debug_assert!(offset + width <= self.map.value_size);
        self.map
            .store
            .read_int(self.position(), self.map.value_offset() + offset, width)
    }

    /// Write a `width`-byte integer at `offset` in the current value.
    ///
    /// # Panics
    /// Panics if no `seek`/`put` has succeeded yet.
    pub fn write_value(&mut self, offset: usize, value: u64, width: usize) {
        debug_assert!(offset + width <= self.map.value_size);
        let at = self.map.value_offset() + offset;
        let block = self.position();
        self.map.store.write_int(block, at, value, width);
    }

    /// Copy value bytes starting at `offset` into `out`.
    ///
    /// # Panics
    /// Panics if no `seek`/`put` has succeeded yet.
    pub fn read_value_bytes(&self, offset: usize, out: &mut [u8]) {
        debug_assert!(offset + out.len() <= self.map.value_size);
        self.map
            .store
            .read_bytes(self.position(), self.map.value_offset() + offset, out);
    }

    /// Overwrite value bytes starting at `offset`.
    ///
    /// # Panics
    /// Panics if no `seek`/`put` has succeeded yet.
    pub fn write_value_bytes(&mut self, offset: usize, data: &[u8]) {
        debug_assert!(offset + data.len() <= self.map.value_size);
        let at = self.map.value_offset() + offset;
        let block = self.position();
        self.map.store.write_bytes(block, at, data);
    }

    /// Visit every entry, depth first: table slots in ascending order, chain
    /// entries in insertion order. The cursor is left on the last entry.
    pub fn scan<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&mut Entry<'_, P>),
    {
        let key_off = self.map.key_offset();
        let value_off = self.map.value_offset();
        let mut stack: Vec<(Address, usize)> = vec![(self.map.root, 0)];

        while let Some(frame) = stack.last_mut() {
            if frame.1 == FAN_OUT {
                stack.pop();
                continue;
            }
            let (table, slot) = *frame;
            frame.1 += 1;

            let child = self.map.read_addr(table, self.map.slot_offset(slot as u8));
            if child.is_null() {
                continue;
            }
            match self.map.kind(child)? {
                BlockKind::Table => stack.push((child, 0)),
                BlockKind::List => {
                    let mut entry = child;
                    while !entry.is_null() {
                        self.map.store.read_bytes(entry, key_off, &mut self.key);
                        self.block = Some(entry);
                        visit(&mut Entry {
                            store: &mut self.map.store,
                            block: entry,
                            value_offset: value_off,
                            key: &self.key,
                        });
                        entry = self.map.next(entry);
                    }
                }
            }
        }
        Ok(())
    }
}

/// One entry during a [`Cursor::scan`].
pub struct Entry<'a, P: PageProvider> {
    store: &'a mut BlockStore<P>,
    block: Address,
    value_offset: usize,
    key: &'a [u8],
}

impl<P: PageProvider> Entry<'_, P> {
    /// The full key.
    pub fn key(&self) -> &[u8] {
        self.key
    }

    /// Read a `width`-byte integer at `offset` in the value.
    pub fn read_value(&self, offset: usize, width: usize) -> u64 {
        self.store
            .read_int(self.block, self.value_offset + offset, width)
    }

    /// Write a `width`-byte integer at `offset` in the value.
    pub fn write_value(&mut self, offset: usize, value: u64, width: usize) {
        self.store
            .write_int(self.block, self.value_offset + offset, value, width);
    }

    /// Copy value bytes starting at `offset` into `out`.
    pub fn read_value_bytes(&self, offset: usize, out: &mut [u8]) {
        self.store
            .read_bytes(self.block, self.value_offset + offset, out);
    }
}
