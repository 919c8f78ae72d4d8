//! App-defined custom data blobs.
//!
//! Custom data is never schema-checked: whatever an object writes in
//! [`PersistCallbacks::store_custom_data`](crate::model::PersistCallbacks::store_custom_data)
//! is handed back verbatim on restore. Both ends expose chunk framing so apps
//! can version and extend their own blobs the same way the archive does.

use std::io::{self, Cursor, Read, Write};

use cairn_archive::chunk::{ChunkHeader, ChunkReader, ChunkWriter, Magic};

use crate::Result;

/// Sink for one object's custom data.
pub struct CustomDataWriter {
    inner: ChunkWriter<Cursor<Vec<u8>>>,
}

impl CustomDataWriter {
    pub fn new() -> Self {
        Self {
            inner: ChunkWriter::new(Cursor::new(Vec::new())),
        }
    }

    pub fn begin_chunk(&mut self, magic: Magic) -> Result<()> {
        Ok(self.inner.begin(magic)?)
    }

    pub fn end_chunk(&mut self, magic: Magic) -> Result<()> {
        Ok(self.inner.end(magic)?)
    }

    /// Finish and take the bytes. Fails if a chunk was left open.
    pub fn into_bytes(self) -> Result<Vec<u8>> {
        Ok(self.inner.into_inner()?.into_inner())
    }
}

impl Default for CustomDataWriter {
    fn default() -> Self {
        Self::new()
    }
}

impl Write for CustomDataWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.inner.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.inner.flush()
    }
}

/// Source for one object's custom data.
pub struct CustomDataReader<'a> {
    inner: ChunkReader<Cursor<&'a [u8]>>,
}

impl<'a> CustomDataReader<'a> {
    pub fn new(bytes: &'a [u8]) -> Result<Self> {
        Ok(Self {
            inner: ChunkReader::new(Cursor::new(bytes))?,
        })
    }

    pub fn begin_chunk(&mut self, magic: Magic) -> Result<ChunkHeader> {
        Ok(self.inner.begin(magic)?)
    }

    pub fn end_chunk(&mut self, magic: Magic) -> Result<()> {
        Ok(self.inner.end(magic)?)
    }

    pub fn preview_chunk(&mut self) -> Result<Option<ChunkHeader>> {
        Ok(self.inner.preview_next()?)
    }

    /// Bytes left in the innermost open chunk, or in the blob.
    pub fn remaining(&self) -> u64 {
        self.inner.remaining()
    }
}

impl Read for CustomDataReader<'_> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf)
    }
}

#[cfg(test)]
mod tests {
    use cairn_archive::codec::{ReadExt, WriteExt};

    use super::*;

    const QUEST: Magic = Magic::new(*b"QST1");

    #[test]
    fn custom_chunks_round_trip() {
        let mut w = CustomDataWriter::new();
        w.begin_chunk(QUEST).unwrap();
        w.put_str("find the lantern").unwrap();
        w.put_u8(2).unwrap();
        w.end_chunk(QUEST).unwrap();
        let bytes = w.into_bytes().unwrap();

        let mut r = CustomDataReader::new(&bytes).unwrap();
        assert_eq!(r.preview_chunk().unwrap().map(|h| h.magic), Some(QUEST));
        r.begin_chunk(QUEST).unwrap();
        assert_eq!(r.get_string().unwrap(), "find the lantern");
        assert_eq!(r.get_u8().unwrap(), 2);
        assert_eq!(r.remaining(), 0);
        r.end_chunk(QUEST).unwrap();
    }

    #[test]
    fn open_chunk_blocks_finishing() {
        let mut w = CustomDataWriter::new();
        w.begin_chunk(QUEST).unwrap();
        assert!(w.into_bytes().is_err());
    }
}
