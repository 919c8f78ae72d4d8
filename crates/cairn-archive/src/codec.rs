//! Fixed-width little-endian primitives.
//!
//! [`WriteExt`] and [`ReadExt`] are blanket extension traits over
//! [`std::io::Write`] / [`std::io::Read`], so they work on plain buffers as
//! well as on [`ChunkWriter`](crate::chunk::ChunkWriter) and
//! [`ChunkReader`](crate::chunk::ChunkReader). Variable-length values
//! (strings, blobs) carry a `u32` length prefix.

use std::io::{Read, Write};

use crate::{ArchiveError, Result};

/// Upper bound for a single length-prefixed value. Anything larger is treated
/// as corruption rather than allocated.
pub const MAX_VALUE_LEN: u64 = 256 * 1024 * 1024;

macro_rules! put_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[inline]
            fn $name(&mut self, value: $ty) -> Result<()> {
                self.write_all(&value.to_le_bytes())?;
                Ok(())
            }
        )*
    };
}

macro_rules! get_le {
    ($($name:ident: $ty:ty),* $(,)?) => {
        $(
            #[inline]
            fn $name(&mut self) -> Result<$ty> {
                let mut buf = [0u8; std::mem::size_of::<$ty>()];
                self.read_exact(&mut buf)?;
                Ok(<$ty>::from_le_bytes(buf))
            }
        )*
    };
}

// ---------------------------------------------------------------------------
// WriteExt
// ---------------------------------------------------------------------------

/// Little-endian writers for every primitive the format stores.
pub trait WriteExt: Write {
    put_le! {
        put_u8: u8, put_u16: u16, put_u32: u32, put_u64: u64,
        put_i8: i8, put_i16: i16, put_i32: i32, put_i64: i64,
        put_f32: f32, put_f64: f64,
    }

    /// Booleans are stored as a single byte (0 or 1).
    #[inline]
    fn put_bool(&mut self, value: bool) -> Result<()> {
        self.put_u8(u8::from(value))
    }

    /// Raw bytes with no length prefix.
    fn put_raw(&mut self, bytes: &[u8]) -> Result<()> {
        self.write_all(bytes)?;
        Ok(())
    }

    /// A `u32` length followed by the bytes.
    fn put_blob(&mut self, bytes: &[u8]) -> Result<()> {
        let len = u32::try_from(bytes.len()).map_err(|_| ArchiveError::LengthOutOfRange {
            len: bytes.len() as u64,
            limit: u64::from(u32::MAX),
        })?;
        self.put_u32(len)?;
        self.put_raw(bytes)
    }

    /// A `u32` byte length followed by UTF-8.
    fn put_str(&mut self, value: &str) -> Result<()> {
        self.put_blob(value.as_bytes())
    }
}

impl<W: Write + ?Sized> WriteExt for W {}

// ---------------------------------------------------------------------------
// ReadExt
// ---------------------------------------------------------------------------

/// Readers mirroring [`WriteExt`].
pub trait ReadExt: Read {
    get_le! {
        get_u8: u8, get_u16: u16, get_u32: u32, get_u64: u64,
        get_i8: i8, get_i16: i16, get_i32: i32, get_i64: i64,
        get_f32: f32, get_f64: f64,
    }

    /// Any non-zero byte reads as `true`.
    #[inline]
    fn get_bool(&mut self) -> Result<bool> {
        Ok(self.get_u8()? != 0)
    }

    /// Exactly `N` raw bytes.
    fn get_array<const N: usize>(&mut self) -> Result<[u8; N]> {
        let mut buf = [0u8; N];
        self.read_exact(&mut buf)?;
        Ok(buf)
    }

    /// A `u32`-length-prefixed byte vector.
    fn get_blob(&mut self) -> Result<Vec<u8>> {
        let len = u64::from(self.get_u32()?);
        if len > MAX_VALUE_LEN {
            return Err(ArchiveError::LengthOutOfRange {
                len,
                limit: MAX_VALUE_LEN,
            });
        }
        let mut buf = Vec::with_capacity(len as usize);
        let read = (&mut *self).take(len).read_to_end(&mut buf)?;
        if (read as u64) < len {
            return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into());
        }
        Ok(buf)
    }

    /// A `u32`-length-prefixed UTF-8 string.
    fn get_string(&mut self) -> Result<String> {
        let bytes = self.get_blob()?;
        Ok(String::from_utf8(bytes)?)
    }
}

impl<R: Read + ?Sized> ReadExt for R {}
