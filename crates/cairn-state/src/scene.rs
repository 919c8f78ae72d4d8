//! Stored state of one scene, and of the global scope.
//!
//! A scene serializes to a single `SCEN` chunk whose payload starts with the
//! scene's name. That chunk is both the shard file of a paged-out scene and
//! the scene's entry inside a save archive, so the two can be exchanged
//! without decoding anything but the name.
//!
//! ```text
//! SCEN { str name, META, SOBJ { u32 n, (str name, OBJD)* },
//!        SPWN { u32 n, (str guid, u32 class, OBJD)* }, DEST { u32 n, str* } }
//! GLOB { META, GOBJ { u32 n, (str id, OBJD)* } }
//! ```

use std::collections::{BTreeMap, BTreeSet};
use std::io::{Cursor, Read, Seek, Write};

use cairn_archive::chunk::{ChunkReader, ChunkWriter, Magic};
use cairn_archive::codec::{ReadExt, WriteExt};
use cairn_schema::metadata::{ClassId, ClassMetadata};
use cairn_schema::object::ObjectData;
use uuid::Uuid;

use crate::resolver::{braced_guid, parse_braced_guid};
use crate::{Result, StateError};

pub const SCENE: Magic = Magic::new(*b"SCEN");
pub const GLOBAL: Magic = Magic::new(*b"GLOB");
const SCENE_OBJECTS: Magic = Magic::new(*b"SOBJ");
const SPAWNED: Magic = Magic::new(*b"SPWN");
const DESTROYED: Magic = Magic::new(*b"DEST");
const GLOBAL_OBJECTS: Magic = Magic::new(*b"GOBJ");

// ---------------------------------------------------------------------------
// SceneData
// ---------------------------------------------------------------------------

/// A runtime-spawned entity: its class, so it can be recreated, and its data.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnedObject {
    pub class: ClassId,
    pub data: ObjectData,
}

/// Everything stored for one scene.
#[derive(Debug, Clone, Default)]
pub struct SceneData {
    pub name: String,
    pub meta: ClassMetadata,
    /// Scene-defined (and non-respawning runtime) entities by local name.
    pub objects: BTreeMap<String, ObjectData>,
    /// Respawning runtime entities by GUID.
    pub spawned: BTreeMap<Uuid, SpawnedObject>,
    /// Scene-defined entities destroyed since the scene was loaded.
    pub destroyed: BTreeSet<String>,
}

impl SceneData {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }

    /// Whether no entity state is held. Metadata does not count.
    pub fn is_empty(&self) -> bool {
        self.objects.is_empty() && self.spawned.is_empty() && self.destroyed.is_empty()
    }

    /// Forget per-entity data before the scene is stored again. Destroyed
    /// entities are kept: they cannot be rediscovered in the live scene.
    pub fn clear_entities(&mut self) {
        self.objects.clear();
        self.spawned.clear();
    }

    pub fn write_to<W: Write + Seek>(&self, w: &mut ChunkWriter<W>) -> Result<()> {
        w.chunk(SCENE, |w| -> Result<()> {
            w.put_str(&self.name)?;
            self.meta.write_to(w)?;
            w.chunk(SCENE_OBJECTS, |w| -> Result<()> {
                put_count(w, self.objects.len())?;
                for (name, data) in &self.objects {
                    w.put_str(name)?;
                    data.write_to(w)?;
                }
                Ok(())
            })?;
            w.chunk(SPAWNED, |w| -> Result<()> {
                put_count(w, self.spawned.len())?;
                for (guid, spawned) in &self.spawned {
                    w.put_str(&braced_guid(*guid))?;
                    w.put_u32(spawned.class.raw())?;
                    spawned.data.write_to(w)?;
                }
                Ok(())
            })?;
            w.chunk(DESTROYED, |w| -> Result<()> {
                put_count(w, self.destroyed.len())?;
                for name in &self.destroyed {
                    w.put_str(name)?;
                }
                Ok(())
            })
        })
    }

    pub fn read_from<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<Self> {
        r.chunk(SCENE, |r| -> Result<Self> {
            let name = r.get_string()?;
            let meta = ClassMetadata::read_from(r)?;

            let objects = r.chunk(SCENE_OBJECTS, |r| -> Result<_> {
                let count = r.get_u32()?;
                let mut objects = BTreeMap::new();
                for _ in 0..count {
                    let local = r.get_string()?;
                    objects.insert(local, ObjectData::read_from(r)?);
                }
                Ok(objects)
            })?;

            let spawned = r.chunk(SPAWNED, |r| -> Result<_> {
                let count = r.get_u32()?;
                let mut spawned = BTreeMap::new();
                for _ in 0..count {
                    let text = r.get_string()?;
                    let guid = parse_braced_guid(&text).ok_or_else(|| StateError::CorruptScene {
                        scene: name.clone(),
                        details: format!("spawned entity key '{text}' is not a braced GUID"),
                    })?;
                    let class = ClassId::from_raw(r.get_u32()?);
                    let data = ObjectData::read_from(r)?;
                    spawned.insert(guid, SpawnedObject { class, data });
                }
                Ok(spawned)
            })?;

            let destroyed = r.chunk(DESTROYED, |r| -> Result<_> {
                let count = r.get_u32()?;
                (0..count)
                    .map(|_| r.get_string().map_err(StateError::from))
                    .collect::<Result<BTreeSet<_>>>()
            })?;

            Ok(Self {
                name,
                meta,
                objects,
                spawned,
                destroyed,
            })
        })
    }

    /// Shard-format bytes: exactly one `SCEN` chunk.
    pub fn to_bytes(&self) -> Result<Vec<u8>> {
        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        self.write_to(&mut w)?;
        Ok(w.into_inner()?.into_inner())
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        Self::read_from(&mut ChunkReader::new(Cursor::new(bytes))?)
    }

    /// Name of the scene in a raw `SCEN` chunk, without decoding the rest.
    pub fn peek_name(bytes: &[u8]) -> Result<String> {
        let mut r = ChunkReader::new(Cursor::new(bytes))?;
        r.begin(SCENE)?;
        Ok(r.get_string()?)
    }
}

// ---------------------------------------------------------------------------
// GlobalData
// ---------------------------------------------------------------------------

/// Singleton objects with no scene affiliation. Always resident.
#[derive(Debug, Clone, Default)]
pub struct GlobalData {
    pub meta: ClassMetadata,
    pub objects: BTreeMap<String, ObjectData>,
}

impl GlobalData {
    pub fn write_to<W: Write + Seek>(&self, w: &mut ChunkWriter<W>) -> Result<()> {
        w.chunk(GLOBAL, |w| -> Result<()> {
            self.meta.write_to(w)?;
            w.chunk(GLOBAL_OBJECTS, |w| -> Result<()> {
                put_count(w, self.objects.len())?;
                for (id, data) in &self.objects {
                    w.put_str(id)?;
                    data.write_to(w)?;
                }
                Ok(())
            })
        })
    }

    pub fn read_from<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<Self> {
        r.chunk(GLOBAL, |r| -> Result<Self> {
            let meta = ClassMetadata::read_from(r)?;
            let objects = r.chunk(GLOBAL_OBJECTS, |r| -> Result<_> {
                let count = r.get_u32()?;
                let mut objects = BTreeMap::new();
                for _ in 0..count {
                    let id = r.get_string()?;
                    objects.insert(id, ObjectData::read_from(r)?);
                }
                Ok(objects)
            })?;
            Ok(Self { meta, objects })
        })
    }
}

fn put_count(w: &mut impl Write, len: usize) -> Result<()> {
    let count = u32::try_from(len).map_err(|_| cairn_archive::ArchiveError::LengthOutOfRange {
        len: len as u64,
        limit: u64::from(u32::MAX),
    })?;
    w.put_u32(count)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use cairn_schema::object::PropertyData;

    use super::*;

    fn object(byte: u8) -> ObjectData {
        ObjectData {
            properties: PropertyData {
                blob: vec![byte; 4],
                offsets: Default::default(),
            },
            core: vec![1, 0, byte],
            custom: Vec::new(),
        }
    }

    fn sample() -> SceneData {
        let mut scene = SceneData::new("Maps/Harbor");
        let class = scene.meta.find_or_add_class("Crate");
        scene.objects.insert("Door_1".into(), object(1));
        scene.spawned.insert(
            Uuid::from_u128(42),
            SpawnedObject {
                class,
                data: object(2),
            },
        );
        scene.destroyed.insert("Barrel_3".into());
        scene
    }

    #[test]
    fn scene_chunk_keeps_every_table() {
        let scene = sample();
        let back = SceneData::from_bytes(&scene.to_bytes().unwrap()).unwrap();
        assert_eq!(back.name, "Maps/Harbor");
        assert_eq!(back.objects, scene.objects);
        assert_eq!(back.spawned, scene.spawned);
        assert_eq!(back.destroyed, scene.destroyed);
        assert_eq!(back.meta.class_name(ClassId::from_raw(0)), Some("Crate"));
    }

    #[test]
    fn name_is_readable_without_decoding_the_rest() {
        let mut bytes = sample().to_bytes().unwrap();
        // Damage the tail; the name must still come out.
        let len = bytes.len();
        bytes[len - 1] ^= 0xff;
        assert_eq!(SceneData::peek_name(&bytes).unwrap(), "Maps/Harbor");
    }

    #[test]
    fn serialization_is_deterministic() {
        assert_eq!(sample().to_bytes().unwrap(), sample().to_bytes().unwrap());
    }

    #[test]
    fn clearing_entities_keeps_destroyed_names() {
        let mut scene = sample();
        scene.clear_entities();
        assert!(scene.objects.is_empty() && scene.spawned.is_empty());
        assert!(!scene.is_empty());
    }

    #[test]
    fn global_chunk_round_trips() {
        let mut global = GlobalData::default();
        global.meta.find_or_add_class("Settings");
        global.objects.insert("settings".into(), object(9));

        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        global.write_to(&mut w).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let back = GlobalData::read_from(&mut ChunkReader::new(Cursor::new(bytes)).unwrap()).unwrap();
        assert_eq!(back.objects, global.objects);
        assert_eq!(back.meta.get_class("Settings"), global.meta.get_class("Settings"));
    }
}
