//! Stored form of one object.
//!
//! A root object (an entity or a global object) is stored as an
//! [`ObjectData`]: its property blob, the offset table the indexed restore
//! path seeks through, and two opaque blobs owned by other layers (the host's
//! versioned core state and the object's own custom data).

use std::collections::BTreeMap;
use std::io::{Read, Seek, Write};

use cairn_archive::chunk::{ChunkReader, ChunkWriter, Magic};
use cairn_archive::codec::{ReadExt, WriteExt};

use crate::metadata::PrefixId;
use crate::Result;

pub const OBJECT_DATA: Magic = Magic::new(*b"OBJD");

// ---------------------------------------------------------------------------
// PrefixOffsets
// ---------------------------------------------------------------------------

/// `PrefixId -> {ClassDef field index -> byte offset in the blob}`.
///
/// Ordered maps keep the encoding deterministic, which keeps scene digests
/// stable across identical stores.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PrefixOffsets(BTreeMap<PrefixId, BTreeMap<u32, u32>>);

impl PrefixOffsets {
    pub fn record(&mut self, prefix: PrefixId, index: usize, offset: usize) {
        self.0
            .entry(prefix)
            .or_default()
            .insert(index as u32, offset as u32);
    }

    pub fn get(&self, prefix: PrefixId, index: usize) -> Option<u64> {
        self.0
            .get(&prefix)?
            .get(&(index as u32))
            .map(|&off| u64::from(off))
    }

    /// Number of recorded offsets across all prefixes.
    pub fn len(&self) -> usize {
        self.0.values().map(BTreeMap::len).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn write_to(&self, out: &mut impl Write) -> Result<()> {
        out.put_u32(self.0.len() as u32)?;
        for (prefix, entries) in &self.0 {
            out.put_u32(prefix.raw())?;
            out.put_u32(entries.len() as u32)?;
            for (&index, &offset) in entries {
                out.put_u32(index)?;
                out.put_u32(offset)?;
            }
        }
        Ok(())
    }

    fn read_from(input: &mut impl Read) -> Result<Self> {
        let mut offsets = PrefixOffsets::default();
        let prefixes = input.get_u32()?;
        for _ in 0..prefixes {
            let prefix = PrefixId(input.get_u32()?);
            let count = input.get_u32()?;
            let entries = offsets.0.entry(prefix).or_default();
            for _ in 0..count {
                let index = input.get_u32()?;
                let offset = input.get_u32()?;
                entries.insert(index, offset);
            }
        }
        Ok(offsets)
    }
}

// ---------------------------------------------------------------------------
// PropertyData / ObjectData
// ---------------------------------------------------------------------------

/// Field values in ClassDef order plus where each one starts.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PropertyData {
    pub blob: Vec<u8>,
    pub offsets: PrefixOffsets,
}

/// Everything stored for one root object.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectData {
    pub properties: PropertyData,
    /// Versioned pose/velocity record, opaque at this layer.
    pub core: Vec<u8>,
    /// App-defined blob from [`PersistCallbacks::store_custom_data`](crate::model::PersistCallbacks::store_custom_data).
    pub custom: Vec<u8>,
}

impl ObjectData {
    pub fn write_to<W: Write + Seek>(&self, w: &mut ChunkWriter<W>) -> Result<()> {
        w.chunk(OBJECT_DATA, |w| -> Result<()> {
            w.put_blob(&self.properties.blob)?;
            self.properties.offsets.write_to(w)?;
            w.put_blob(&self.core)?;
            w.put_blob(&self.custom)?;
            Ok(())
        })
    }

    pub fn read_from<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<Self> {
        r.chunk(OBJECT_DATA, |r| -> Result<Self> {
            let blob = r.get_blob()?;
            let offsets = PrefixOffsets::read_from(r)?;
            let core = r.get_blob()?;
            let custom = r.get_blob()?;
            Ok(Self {
                properties: PropertyData { blob, offsets },
                core,
                custom,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use super::*;

    #[test]
    fn object_data_keeps_every_part() {
        let mut offsets = PrefixOffsets::default();
        offsets.record(PrefixId::ROOT, 0, 0);
        offsets.record(PrefixId::ROOT, 1, 4);
        offsets.record(PrefixId(3), 0, 9);
        let data = ObjectData {
            properties: PropertyData {
                blob: vec![1, 0, 0, 0, 7, 7, 7, 7, 7, 2],
                offsets,
            },
            core: vec![1, 0, 0xAA],
            custom: b"quest".to_vec(),
        };

        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        data.write_to(&mut w).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let mut r = ChunkReader::new(Cursor::new(bytes)).unwrap();
        let back = ObjectData::read_from(&mut r).unwrap();

        assert_eq!(back, data);
        assert_eq!(back.properties.offsets.get(PrefixId(3), 0), Some(9));
        assert_eq!(back.properties.offsets.get(PrefixId(3), 1), None);
        assert_eq!(back.properties.offsets.len(), 3);
    }
}
