//! Chunk framing: [`Magic`], [`ChunkWriter`] and [`ChunkReader`].
//!
//! Both ends keep a stack of open chunks. The writer patches each chunk's
//! length when it is closed; the reader remembers where each open chunk ends
//! so it can clamp reads to the chunk and jump to its end on close, even when
//! the payload was only partially consumed.
//!
//! # Aborted reads and writes
//!
//! The scoped helpers [`ChunkWriter::chunk`] and [`ChunkReader::chunk`] are
//! the preferred way to work with chunks. If the closure fails, every chunk it
//! opened is dropped from the stack (restoring the depth from before the call)
//! and the error is returned unchanged. Nothing tries to resume a half-read
//! stream: the caller is expected to abandon the whole operation.

use std::fmt;
use std::io::{self, Read, Seek, SeekFrom, Write};

use crate::codec::{ReadExt, WriteExt};
use crate::{ArchiveError, Result};

/// Size in bytes of a chunk header (magic + length).
pub const HEADER_LEN: u64 = 8;

// ---------------------------------------------------------------------------
// Magic
// ---------------------------------------------------------------------------

/// Four-byte chunk tag, conventionally upper-case ASCII (`b"SAVE"`).
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Magic(pub [u8; 4]);

impl Magic {
    /// Build a magic from its four bytes.
    #[inline]
    pub const fn new(bytes: [u8; 4]) -> Self {
        Self(bytes)
    }

    /// The raw tag bytes.
    #[inline]
    pub const fn bytes(self) -> [u8; 4] {
        self.0
    }
}

impl fmt::Display for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for &b in &self.0 {
            if b.is_ascii_graphic() || b == b' ' {
                write!(f, "{}", b as char)?;
            } else {
                write!(f, "\\x{b:02x}")?;
            }
        }
        Ok(())
    }
}

impl fmt::Debug for Magic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Magic({self})")
    }
}

// ---------------------------------------------------------------------------
// ChunkHeader
// ---------------------------------------------------------------------------

/// Header of a chunk as found in the stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    pub magic: Magic,
    /// Payload length, excluding the 8-byte header.
    pub len: u32,
}

impl ChunkHeader {
    /// Header plus payload.
    #[inline]
    pub fn total_len(&self) -> u64 {
        HEADER_LEN + u64::from(self.len)
    }
}

// ---------------------------------------------------------------------------
// ChunkWriter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OpenWrite {
    magic: Magic,
    header_pos: u64,
}

/// Writes nested chunks to any seekable sink.
///
/// `ChunkWriter` implements [`Write`], so payload bytes go through the
/// [`WriteExt`] helpers directly.
pub struct ChunkWriter<W: Write + Seek> {
    inner: W,
    open: Vec<OpenWrite>,
}

impl<W: Write + Seek> ChunkWriter<W> {
    /// Wrap a sink. Chunks start at the sink's current position.
    pub fn new(inner: W) -> Self {
        Self {
            inner,
            open: Vec::new(),
        }
    }

    /// Number of currently open chunks.
    #[inline]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Open a chunk. Its length is patched by the matching [`end`](Self::end).
    pub fn begin(&mut self, magic: Magic) -> Result<()> {
        let header_pos = self.inner.stream_position()?;
        self.inner.write_all(&magic.0)?;
        self.inner.put_u32(0)?;
        self.open.push(OpenWrite { magic, header_pos });
        Ok(())
    }

    /// Close the innermost chunk, which must carry `magic`.
    pub fn end(&mut self, magic: Magic) -> Result<()> {
        let top = *self
            .open
            .last()
            .ok_or(ArchiveError::NoOpenChunk { closing: magic })?;
        if top.magic != magic {
            return Err(ArchiveError::ChunkMismatch {
                open: top.magic,
                closing: magic,
            });
        }
        self.open.pop();

        let end_pos = self.inner.stream_position()?;
        let len = end_pos - top.header_pos - HEADER_LEN;
        let len32 = u32::try_from(len).map_err(|_| ArchiveError::ChunkTooLarge { magic, len })?;
        self.inner.seek(SeekFrom::Start(top.header_pos + 4))?;
        self.inner.put_u32(len32)?;
        self.inner.seek(SeekFrom::Start(end_pos))?;
        Ok(())
    }

    /// Run `f` inside a chunk. On error the chunk stack is unwound to its
    /// depth before the call and the error is returned.
    ///
    /// The closure may use any error type that archive errors convert into.
    pub fn chunk<T, E>(
        &mut self,
        magic: Magic,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<ArchiveError>,
    {
        let depth = self.open.len();
        self.begin(magic)?;
        match f(self) {
            Ok(value) => {
                self.end(magic)?;
                Ok(value)
            }
            Err(err) => {
                self.open.truncate(depth);
                Err(err)
            }
        }
    }

    /// Append bytes that already form exactly one complete chunk, such as a
    /// scene shard read from disk.
    pub fn write_raw_chunk(&mut self, bytes: &[u8]) -> Result<ChunkHeader> {
        let header = parse_raw_header(bytes)?;
        if header.total_len() != bytes.len() as u64 {
            return Err(ArchiveError::MalformedRawChunk {
                details: format!(
                    "{} header declares {} bytes but {} were supplied",
                    header.magic,
                    header.total_len(),
                    bytes.len()
                ),
            });
        }
        self.inner.write_all(bytes)?;
        Ok(header)
    }

    /// Finish writing and hand back the sink. Fails if any chunk is open.
    pub fn into_inner(mut self) -> Result<W> {
        if let Some(top) = self.open.last() {
            return Err(ArchiveError::UnclosedChunks {
                count: self.open.len(),
                innermost: top.magic,
            });
        }
        self.inner.flush()?;
        Ok(self.inner)
    }
}

impl<W: Write + Seek> Write for ChunkWriter<W> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Decode the header at the start of `bytes`.
pub fn parse_raw_header(bytes: &[u8]) -> Result<ChunkHeader> {
    if (bytes.len() as u64) < HEADER_LEN {
        return Err(ArchiveError::MalformedRawChunk {
            details: format!("only {} bytes, shorter than a chunk header", bytes.len()),
        });
    }
    let mut magic = [0u8; 4];
    magic.copy_from_slice(&bytes[..4]);
    let mut len = [0u8; 4];
    len.copy_from_slice(&bytes[4..8]);
    Ok(ChunkHeader {
        magic: Magic(magic),
        len: u32::from_le_bytes(len),
    })
}

// ---------------------------------------------------------------------------
// ChunkReader
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy)]
struct OpenRead {
    magic: Magic,
    end: u64,
}

/// Reads nested chunks from any seekable source.
///
/// While a chunk is open, [`Read`] is clamped to that chunk's payload: running
/// off the end surfaces as an `UnexpectedEof` instead of silently consuming
/// the next chunk.
pub struct ChunkReader<R: Read + Seek> {
    inner: R,
    open: Vec<OpenRead>,
    pos: u64,
    stream_end: u64,
}

impl<R: Read + Seek> ChunkReader<R> {
    /// Wrap a source. Reading starts at the source's current position.
    pub fn new(mut inner: R) -> Result<Self> {
        let pos = inner.stream_position()?;
        let stream_end = inner.seek(SeekFrom::End(0))?;
        inner.seek(SeekFrom::Start(pos))?;
        Ok(Self {
            inner,
            open: Vec::new(),
            pos,
            stream_end,
        })
    }

    /// Number of currently open chunks.
    #[inline]
    pub fn depth(&self) -> usize {
        self.open.len()
    }

    /// Absolute cursor position in the underlying source.
    #[inline]
    pub fn position(&self) -> u64 {
        self.pos
    }

    /// End offset of the innermost open chunk (or of the stream).
    #[inline]
    fn scope_end(&self) -> u64 {
        self.open.last().map_or(self.stream_end, |c| c.end)
    }

    /// Bytes left before the end of the innermost open chunk.
    #[inline]
    pub fn remaining(&self) -> u64 {
        self.scope_end().saturating_sub(self.pos)
    }

    /// Whether another chunk header fits in the current scope.
    #[inline]
    pub fn has_more(&self) -> Result<bool> {
        Ok(self.remaining() >= HEADER_LEN)
    }

    /// Move the cursor to an absolute position within the current scope.
    pub fn seek_to(&mut self, pos: u64) -> Result<()> {
        self.inner.seek(SeekFrom::Start(pos))?;
        self.pos = pos;
        Ok(())
    }

    fn read_header(&mut self) -> Result<Option<ChunkHeader>> {
        if self.remaining() < HEADER_LEN {
            return Ok(None);
        }
        let magic = Magic(self.inner.get_array::<4>()?);
        let len = self.inner.get_u32()?;
        self.pos += HEADER_LEN;
        Ok(Some(ChunkHeader { magic, len }))
    }

    fn check_fits(&self, header: ChunkHeader) -> Result<()> {
        let available = self.remaining();
        if u64::from(header.len) > available {
            return Err(ArchiveError::ChunkOverrun {
                magic: header.magic,
                len: u64::from(header.len),
                available,
            });
        }
        Ok(())
    }

    /// Read the next chunk header without consuming it.
    pub fn preview_next(&mut self) -> Result<Option<ChunkHeader>> {
        let start = self.pos;
        let header = self.read_header()?;
        self.seek_to(start)?;
        Ok(header)
    }

    /// Enter the next chunk, which must carry `magic`. On a mismatch the
    /// cursor is left in front of the unexpected chunk.
    pub fn begin(&mut self, magic: Magic) -> Result<ChunkHeader> {
        let start = self.pos;
        let header = self
            .read_header()?
            .ok_or(ArchiveError::MissingChunk { expected: magic })?;
        if header.magic != magic {
            self.seek_to(start)?;
            return Err(ArchiveError::UnexpectedChunk {
                expected: magic,
                found: header.magic,
            });
        }
        self.check_fits(header)?;
        self.open.push(OpenRead {
            magic,
            end: self.pos + u64::from(header.len),
        });
        Ok(header)
    }

    /// Leave the innermost chunk, jumping past any unread payload.
    pub fn end(&mut self, magic: Magic) -> Result<()> {
        let top = *self
            .open
            .last()
            .ok_or(ArchiveError::NoOpenChunk { closing: magic })?;
        if top.magic != magic {
            return Err(ArchiveError::ChunkMismatch {
                open: top.magic,
                closing: magic,
            });
        }
        self.open.pop();
        if self.pos != top.end {
            if self.pos < top.end {
                tracing::debug!(%magic, unread = top.end - self.pos, "skipping unread chunk tail");
            }
            self.seek_to(top.end)?;
        }
        Ok(())
    }

    /// Run `f` inside the next chunk. On error the chunk stack is unwound to
    /// its depth before the call and the error is returned.
    pub fn chunk<T, E>(
        &mut self,
        magic: Magic,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<T, E>
    where
        E: From<ArchiveError>,
    {
        let depth = self.open.len();
        self.begin(magic)?;
        match f(self) {
            Ok(value) => {
                self.end(magic)?;
                Ok(value)
            }
            Err(err) => {
                self.open.truncate(depth);
                Err(err)
            }
        }
    }

    /// Like [`chunk`](Self::chunk), but returns `Ok(None)` when the next chunk
    /// is absent or carries a different magic.
    pub fn optional_chunk<T, E>(
        &mut self,
        magic: Magic,
        f: impl FnOnce(&mut Self) -> std::result::Result<T, E>,
    ) -> std::result::Result<Option<T>, E>
    where
        E: From<ArchiveError>,
    {
        match self.preview_next()? {
            Some(header) if header.magic == magic => self.chunk(magic, f).map(Some),
            _ => Ok(None),
        }
    }

    fn next_header(&mut self) -> Result<ChunkHeader> {
        let offset = self.pos;
        self.read_header()?.ok_or(ArchiveError::NoMoreChunks { offset })
    }

    /// Step over the next chunk using only its length field.
    pub fn skip_next(&mut self) -> Result<ChunkHeader> {
        let header = self.next_header()?;
        self.check_fits(header)?;
        self.seek_to(self.pos + u64::from(header.len))?;
        tracing::trace!(magic = %header.magic, len = header.len, "skipped chunk");
        Ok(header)
    }

    /// Copy the next chunk, header included, to `out` without decoding it.
    pub fn copy_next_raw(&mut self, out: &mut impl Write) -> Result<ChunkHeader> {
        let header = self.next_header()?;
        self.check_fits(header)?;
        out.write_all(&header.magic.0)?;
        out.put_u32(header.len)?;
        let copied = io::copy(&mut (&mut self.inner).take(u64::from(header.len)), out)?;
        self.pos += copied;
        if copied < u64::from(header.len) {
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        Ok(header)
    }

    /// The next chunk's raw bytes, header included.
    pub fn read_next_raw(&mut self) -> Result<Vec<u8>> {
        let mut buf = Vec::new();
        self.copy_next_raw(&mut buf)?;
        Ok(buf)
    }

    /// Hand back the source.
    pub fn into_inner(self) -> R {
        self.inner
    }
}

impl<R: Read + Seek> Read for ChunkReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let limit = self.remaining().min(buf.len() as u64) as usize;
        let read = self.inner.read(&mut buf[..limit])?;
        self.pos += read as u64;
        Ok(read)
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    const OUTER: Magic = Magic::new(*b"OUTR");
    const INNER: Magic = Magic::new(*b"INNR");
    const OTHER: Magic = Magic::new(*b"OTHR");

    fn writer() -> ChunkWriter<Cursor<Vec<u8>>> {
        ChunkWriter::new(Cursor::new(Vec::new()))
    }

    #[test]
    fn end_with_wrong_magic_is_a_mismatch() {
        let mut w = writer();
        w.begin(OUTER).unwrap();
        w.begin(INNER).unwrap();
        match w.end(OUTER) {
            Err(ArchiveError::ChunkMismatch { open, closing }) => {
                assert_eq!(open, INNER);
                assert_eq!(closing, OUTER);
            }
            other => panic!("expected ChunkMismatch, got {other:?}"),
        }
    }

    #[test]
    fn end_without_begin_is_rejected() {
        let mut w = writer();
        assert!(matches!(
            w.end(OUTER),
            Err(ArchiveError::NoOpenChunk { .. })
        ));
    }

    #[test]
    fn length_is_patched_on_end() {
        let mut w = writer();
        w.chunk(OUTER, |w| w.put_raw(&[9; 5])).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        assert_eq!(&bytes[..4], b"OUTR");
        assert_eq!(&bytes[4..8], &5u32.to_le_bytes());
        assert_eq!(bytes.len(), 13);
    }

    #[test]
    fn failed_scoped_write_unwinds_the_stack() {
        let mut w = writer();
        w.begin(OUTER).unwrap();
        let result: Result<()> = w.chunk(INNER, |w| {
            w.begin(OTHER)?;
            Err(ArchiveError::MalformedRawChunk {
                details: "boom".into(),
            })
        });
        assert!(result.is_err());
        assert_eq!(w.depth(), 1);
        w.end(OUTER).unwrap();
    }

    #[test]
    fn unclosed_chunks_block_into_inner() {
        let mut w = writer();
        w.begin(OUTER).unwrap();
        assert!(matches!(
            w.into_inner(),
            Err(ArchiveError::UnclosedChunks { count: 1, .. })
        ));
    }

    #[test]
    fn begin_on_wrong_magic_leaves_cursor_in_place() {
        let mut w = writer();
        w.chunk(OTHER, |w| w.put_u8(1)).unwrap();
        let mut r = ChunkReader::new(w.into_inner().unwrap()).unwrap();
        r.seek_to(0).unwrap();
        assert!(matches!(
            r.begin(INNER),
            Err(ArchiveError::UnexpectedChunk { .. })
        ));
        assert_eq!(r.position(), 0);
        assert_eq!(r.chunk(OTHER, |r| r.get_u8()).unwrap(), 1);
    }

    #[test]
    fn reads_are_clamped_to_the_open_chunk() {
        let mut w = writer();
        w.chunk(OUTER, |w| w.put_u16(7)).unwrap();
        w.chunk(OTHER, |w| w.put_u16(8)).unwrap();
        let mut r = ChunkReader::new(Cursor::new(w.into_inner().unwrap().into_inner())).unwrap();
        r.begin(OUTER).unwrap();
        assert_eq!(r.get_u16().unwrap(), 7);
        assert!(r.get_u16().is_err());
    }

    #[test]
    fn end_skips_unread_payload() {
        let mut w = writer();
        w.chunk(OUTER, |w| {
            w.put_u32(1)?;
            w.put_u32(2)
        })
        .unwrap();
        w.chunk(OTHER, |w| w.put_u8(3)).unwrap();
        let mut r = ChunkReader::new(Cursor::new(w.into_inner().unwrap().into_inner())).unwrap();
        assert_eq!(r.chunk(OUTER, |r| r.get_u32()).unwrap(), 1);
        assert_eq!(r.chunk(OTHER, |r| r.get_u8()).unwrap(), 3);
    }

    #[test]
    fn overrunning_header_is_detected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(b"OUTR");
        bytes.extend_from_slice(&100u32.to_le_bytes());
        bytes.extend_from_slice(&[0; 4]);
        let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();
        assert!(matches!(
            r.begin(OUTER),
            Err(ArchiveError::ChunkOverrun { len: 100, available: 4, .. })
        ));
    }

    #[test]
    fn raw_copy_round_trips_through_write_raw_chunk() {
        let mut w = writer();
        w.chunk(OUTER, |w| w.chunk(INNER, |w| w.put_str("payload")))
            .unwrap();
        let original = w.into_inner().unwrap().into_inner();

        let mut r = ChunkReader::new(Cursor::new(original.clone())).unwrap();
        let raw = r.read_next_raw().unwrap();
        assert_eq!(raw, original);

        let mut w2 = writer();
        let header = w2.write_raw_chunk(&raw).unwrap();
        assert_eq!(header.magic, OUTER);
        assert_eq!(w2.into_inner().unwrap().into_inner(), original);
    }

    #[test]
    fn write_raw_chunk_rejects_truncated_bytes() {
        let mut w = writer();
        w.chunk(OUTER, |w| w.put_u64(5)).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let mut w2 = writer();
        assert!(w2.write_raw_chunk(&bytes[..bytes.len() - 1]).is_err());
    }

    #[test]
    fn optional_chunk_tolerates_absence() {
        let mut w = writer();
        w.chunk(OTHER, |w| w.put_u8(4)).unwrap();
        let mut r = ChunkReader::new(Cursor::new(w.into_inner().unwrap().into_inner())).unwrap();
        assert_eq!(r.optional_chunk(INNER, |r| r.get_u8()).unwrap(), None);
        assert_eq!(r.optional_chunk(OTHER, |r| r.get_u8()).unwrap(), Some(4));
        assert_eq!(r.optional_chunk(OTHER, |r| r.get_u8()).unwrap(), None);
    }

    #[test]
    fn stepping_past_the_last_chunk_reports_where() {
        let mut w = writer();
        w.chunk(OUTER, |w| w.put_u8(1)).unwrap();
        let mut r = ChunkReader::new(Cursor::new(w.into_inner().unwrap().into_inner())).unwrap();
        r.skip_next().unwrap();
        match r.skip_next() {
            Err(ArchiveError::NoMoreChunks { offset }) => assert_eq!(offset, 9),
            other => panic!("expected NoMoreChunks, got {other:?}"),
        }
        assert!(matches!(
            r.read_next_raw(),
            Err(ArchiveError::NoMoreChunks { offset: 9 })
        ));
    }

    #[test]
    fn magic_displays_as_text() {
        assert_eq!(OUTER.to_string(), "OUTR");
        assert_eq!(Magic::new([b'A', 0, b'B', b'C']).to_string(), "A\\x00BC");
    }
}
