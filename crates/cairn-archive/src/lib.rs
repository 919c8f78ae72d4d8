//! Cairn Archive -- nested, length-tagged binary chunks.
//!
//! Every piece of persisted state lives inside a chunk:
//! `{ 4-byte magic, u32 little-endian payload length, payload }`. Chunks nest
//! to any depth. Because every chunk carries its own length, a reader can skip
//! or copy a chunk without understanding its payload, which is what lets whole
//! scenes move between a consolidated save file and standalone shard files
//! byte-for-byte.
//!
//! # Quick Start
//!
//! ```
//! use std::io::Cursor;
//! use cairn_archive::prelude::*;
//!
//! const ROOT: Magic = Magic::new(*b"ROOT");
//! const ITEM: Magic = Magic::new(*b"ITEM");
//!
//! let mut writer = ChunkWriter::new(Cursor::new(Vec::new()));
//! writer
//!     .chunk(ROOT, |w| {
//!         w.chunk(ITEM, |w| w.put_u32(7))?;
//!         w.chunk(ITEM, |w| w.put_str("hello"))
//!     })
//!     .unwrap();
//! let bytes = writer.into_inner().unwrap().into_inner();
//!
//! let mut reader = ChunkReader::new(Cursor::new(bytes)).unwrap();
//! reader.begin(ROOT).unwrap();
//! reader.skip_next().unwrap();
//! let greeting = reader.chunk(ITEM, |r| r.get_string()).unwrap();
//! assert_eq!(greeting, "hello");
//! reader.end(ROOT).unwrap();
//! ```

#![deny(unsafe_code)]

pub mod chunk;
pub mod codec;

use chunk::Magic;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while reading or writing chunked archives.
///
/// Everything except [`ArchiveError::Io`] indicates a structural problem with
/// the chunk stream. Callers treat those as fatal for the whole operation:
/// once the chunk stack is out of step no later read can be trusted.
#[derive(Debug, thiserror::Error)]
pub enum ArchiveError {
    /// Underlying reader or writer failed.
    #[error("archive I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// `end` was called with a magic that is not the innermost open chunk.
    #[error("chunk mismatch: tried to close {closing} while {open} is open")]
    ChunkMismatch { open: Magic, closing: Magic },

    /// `end` was called with no chunk open.
    #[error("tried to close {closing} but no chunk is open")]
    NoOpenChunk { closing: Magic },

    /// The next chunk in the stream is not the one the caller asked for.
    #[error("expected chunk {expected}, found {found}")]
    UnexpectedChunk { expected: Magic, found: Magic },

    /// A chunk was requested but the enclosing scope has no bytes left.
    #[error("expected chunk {expected}, but the enclosing scope is exhausted")]
    MissingChunk { expected: Magic },

    /// Any next chunk was requested but the enclosing scope has no bytes left.
    #[error("no chunk left at offset {offset}")]
    NoMoreChunks { offset: u64 },

    /// A chunk header claims more bytes than its parent holds.
    #[error("chunk {magic} claims {len} bytes but only {available} remain")]
    ChunkOverrun { magic: Magic, len: u64, available: u64 },

    /// A chunk payload grew past what a u32 length field can describe.
    #[error("chunk {magic} payload of {len} bytes exceeds the u32 length field")]
    ChunkTooLarge { magic: Magic, len: u64 },

    /// The writer was finished while chunks were still open.
    #[error("{count} chunk(s) still open, innermost is {innermost}")]
    UnclosedChunks { count: usize, innermost: Magic },

    /// A length-prefixed value declared an implausible size.
    #[error("length prefix {len} exceeds the {limit}-byte limit")]
    LengthOutOfRange { len: u64, limit: u64 },

    /// A length-prefixed string was not valid UTF-8.
    #[error("string payload is not valid UTF-8: {0}")]
    InvalidString(#[from] std::string::FromUtf8Error),

    /// Raw chunk bytes handed to the writer do not form exactly one chunk.
    #[error("raw chunk bytes are malformed: {details}")]
    MalformedRawChunk { details: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, ArchiveError>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::chunk::{ChunkHeader, ChunkReader, ChunkWriter, Magic};
    pub use crate::codec::{ReadExt, WriteExt};
    pub use crate::{ArchiveError, Result};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
