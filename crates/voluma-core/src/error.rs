//! Error types for the volume store.

use thiserror::Error;

/// Store-wide error type.
#[derive(Error, Debug)]
pub enum Error {
    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Magic, version, or checksum mismatch
    #[error("format error: {0}")]
    Format(String),

    /// A brick's stored size does not match its declared size
    #[error("corrupt brick {index}: {reason}")]
    CorruptBrick {
        /// 1D index of the affected brick.
        index: u64,
        /// What went wrong while reading it.
        reason: String,
    },

    /// Brick key or index past the LoD or brick count
    #[error("out of range: {0}")]
    OutOfRange(String),

    /// Unknown component type tag
    #[error("unsupported component type tag {0}")]
    UnsupportedType(u32),

    /// Compression or decompression failure
    #[error("codec error: {0}")]
    Codec(String),

    /// Conversion was cancelled cooperatively
    #[error("conversion cancelled")]
    Cancelled,
}

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;
