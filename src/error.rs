//! Crate error type.

use std::io;

use thiserror::Error;

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;

/// Everything that can go wrong inside a map.
///
/// None of these are recoverable locally. The caller either aborts the scan or
/// rebuilds the map with different parameters.
#[derive(Debug, Error)]
pub enum Error {
    /// The block store ran out of addressable pages.
    #[error("map overflow: {pages} pages in use, at most {max_pages} addressable with {addr_size}-byte addresses")]
    Overflow {
        /// Pages allocated so far.
        pages: usize,
        /// Pages representable by the address width.
        max_pages: u64,
        /// Address width in bytes.
        addr_size: usize,
    },

    /// A block carried a tag that is neither LIST nor TABLE.
    #[error("bad block type {tag} at address {address:#x}")]
    CorruptBlock {
        /// The tag byte found.
        tag: u8,
        /// Address of the offending block.
        address: u64,
    },

    /// A key of the wrong length was handed to a map.
    #[error("key length mismatch: expected {expected} bytes, got {actual}")]
    KeyLength {
        /// Configured key length.
        expected: usize,
        /// Length of the supplied key.
        actual: usize,
    },

    /// The requested geometry cannot be built.
    #[error("invalid map configuration: {0}")]
    InvalidConfig(String),

    /// Creating, mapping or removing backing storage failed.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
