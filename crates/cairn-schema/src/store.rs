//! Store-side property walk.
//!
//! Fields are visited in declaration order. Every leaf and array field gets a
//! [`FieldDef`](crate::metadata::FieldDef) in the owning class (created on
//! first sight) and an entry in the offset table pointing at its first byte.
//! Nested aggregates write a marker definition and recurse at their own
//! prefix; nested objects write their ClassId and a byte length so a reader
//! can step over them.

use std::io::Write;

use cairn_archive::codec::WriteExt;

use crate::custom::CustomDataWriter;
use crate::kind::DataKind;
use crate::metadata::{ClassId, ClassMetadata, PrefixId};
use crate::model::{FieldKind, PersistableObject};
use crate::object::{ObjectData, PrefixOffsets, PropertyData};
use crate::reference::{ReferenceEncoder, ReferenceStrings};
use crate::value::FieldValue;
use crate::{Result, SchemaError};

/// Encode the fields of `obj`, registering its layout in `meta`.
pub fn store_properties(
    obj: &dyn PersistableObject,
    meta: &mut ClassMetadata,
    refs: &dyn ReferenceEncoder,
) -> Result<PropertyData> {
    let class = meta.find_or_add_class(obj.class_name());
    let mut storer = Storer {
        meta,
        refs,
        blob: Vec::new(),
        offsets: PrefixOffsets::default(),
    };
    storer.store_fields(obj, class, PrefixId::ROOT)?;
    Ok(PropertyData {
        blob: storer.blob,
        offsets: storer.offsets,
    })
}

/// Store a root object: hooks, properties and custom data.
///
/// [`ObjectData::core`] is left empty for the caller to fill.
pub fn store_object(
    obj: &dyn PersistableObject,
    meta: &mut ClassMetadata,
    refs: &dyn ReferenceEncoder,
) -> Result<ObjectData> {
    if let Some(cb) = obj.callbacks() {
        cb.pre_store();
    }
    let properties = store_properties(obj, meta, refs)?;
    let custom = match obj.callbacks() {
        Some(cb) => {
            let mut out = CustomDataWriter::new();
            cb.store_custom_data(&mut out)?;
            cb.post_store();
            out.into_bytes()?
        }
        None => Vec::new(),
    };
    Ok(ObjectData {
        properties,
        core: Vec::new(),
        custom,
    })
}

struct Storer<'a> {
    meta: &'a mut ClassMetadata,
    refs: &'a dyn ReferenceEncoder,
    blob: Vec<u8>,
    offsets: PrefixOffsets,
}

impl Storer<'_> {
    fn store_fields(
        &mut self,
        obj: &dyn PersistableObject,
        class: ClassId,
        prefix: PrefixId,
    ) -> Result<()> {
        for (i, info) in obj.persistent_fields().iter().enumerate() {
            let field = self.meta.find_or_add_field(&info.name);
            let def_index = self.meta.register_field(class, field, prefix, info.kind.tag())?;
            match info.kind {
                FieldKind::Value(kind) => {
                    self.offsets.record(prefix, def_index, self.blob.len());
                    let value = checked_value(obj, i, &info.name, kind);
                    self.put_value(&value, kind)?;
                }
                FieldKind::Array(kind) => {
                    self.offsets.record(prefix, def_index, self.blob.len());
                    let items = match obj.read_field(i) {
                        Some(FieldValue::Array(items)) => items,
                        other => {
                            tracing::warn!(
                                class = obj.class_name(),
                                field = %info.name,
                                got = ?other,
                                "array field did not yield an array -- storing it empty"
                            );
                            Vec::new()
                        }
                    };
                    self.blob.put_u32(items.len() as u32)?;
                    for item in &items {
                        if item.is_kind(kind) {
                            self.put_value(item, kind)?;
                        } else {
                            tracing::warn!(
                                class = obj.class_name(),
                                field = %info.name,
                                expected = ?kind,
                                "array element has the wrong kind -- storing the default"
                            );
                            self.put_value(&FieldValue::default_for(kind), kind)?;
                        }
                    }
                }
                FieldKind::Struct => {
                    let child_prefix = self.meta.find_or_add_prefix(prefix, field);
                    if let Some(child) = obj.nested(i) {
                        self.store_fields(child, class, child_prefix)?;
                    }
                }
                FieldKind::Object => {
                    self.offsets.record(prefix, def_index, self.blob.len());
                    let Some(child) = obj.nested(i) else {
                        self.blob.put_u32(ClassId::NONE.raw())?;
                        continue;
                    };
                    if child.is_shared_asset() {
                        return Err(SchemaError::SharedAssetNotPersistable {
                            class: obj.class_name().to_owned(),
                            field: info.name.clone(),
                        });
                    }
                    let child_class = self.meta.find_or_add_class(child.class_name());
                    let child_prefix = self.meta.find_or_add_prefix(prefix, field);
                    self.blob.put_u32(child_class.raw())?;
                    let len_at = self.blob.len();
                    self.blob.put_u32(0)?;

                    if let Some(cb) = child.callbacks() {
                        cb.pre_store();
                    }
                    self.store_fields(child, child_class, child_prefix)?;
                    if let Some(cb) = child.callbacks() {
                        cb.post_store();
                    }

                    let len = (self.blob.len() - len_at - 4) as u32;
                    self.blob[len_at..len_at + 4].copy_from_slice(&len.to_le_bytes());
                }
            }
        }
        Ok(())
    }

    fn put_value(&mut self, value: &FieldValue, kind: DataKind) -> Result<()> {
        let out = &mut self.blob;
        match value {
            FieldValue::Bool(v) => out.put_bool(*v)?,
            FieldValue::U8(v) => out.put_u8(*v)?,
            FieldValue::U16(v) | FieldValue::Enum(v) => out.put_u16(*v)?,
            FieldValue::U32(v) => out.put_u32(*v)?,
            FieldValue::U64(v) => out.put_u64(*v)?,
            FieldValue::I8(v) => out.put_i8(*v)?,
            FieldValue::I16(v) => out.put_i16(*v)?,
            FieldValue::I32(v) => out.put_i32(*v)?,
            FieldValue::I64(v) => out.put_i64(*v)?,
            FieldValue::F32(v) => out.put_f32(*v)?,
            FieldValue::F64(v) => out.put_f64(*v)?,
            FieldValue::Vector(v) => v.write_to(out)?,
            FieldValue::Rotator(v) => v.write_to(out)?,
            FieldValue::Transform(v) => v.write_to(out)?,
            FieldValue::Guid(v) => out.put_raw(v.as_bytes())?,
            FieldValue::String(v) | FieldValue::Name(v) | FieldValue::Text(v) => out.put_str(v)?,
            FieldValue::AssetPath(v) => out.put_str(v.as_deref().unwrap_or(""))?,
            FieldValue::ClassRef(v) => {
                let id = match v {
                    Some(name) => self.meta.find_or_add_class(name),
                    None => ClassId::NONE,
                };
                self.blob.put_u32(id.raw())?;
            }
            FieldValue::EntityRef(target) => {
                let strings = target
                    .and_then(|id| self.refs.encode_entity(id))
                    .unwrap_or_default();
                put_reference(out, &strings)?;
            }
            FieldValue::Callbacks(bindings) => {
                let encoded: Vec<_> = bindings
                    .iter()
                    .filter_map(|b| {
                        let target = self.refs.encode_entity(b.target);
                        if target.is_none() {
                            tracing::warn!(
                                entity = ?b.target,
                                function = %b.function,
                                "callback target cannot be referenced -- dropping binding"
                            );
                        }
                        target.map(|t| (t, b.function.as_str()))
                    })
                    .collect();
                out.put_u32(encoded.len() as u32)?;
                for (target, function) in encoded {
                    put_reference(out, &target)?;
                    out.put_str(function)?;
                }
            }
            FieldValue::Array(_) => {
                // Nested arrays are not representable; store the element default.
                tracing::warn!(?kind, "nested array value -- storing the default");
                return self.put_value(&FieldValue::default_for(kind), kind);
            }
        }
        Ok(())
    }
}

fn put_reference(out: &mut impl Write, strings: &ReferenceStrings) -> Result<()> {
    out.put_str(&strings.scene)?;
    out.put_str(&strings.entity)?;
    Ok(())
}

/// Read a single-value field, substituting the kind's default when the host
/// hands back something else.
fn checked_value(obj: &dyn PersistableObject, index: usize, name: &str, kind: DataKind) -> FieldValue {
    match obj.read_field(index) {
        Some(value) if value.kind() == Some(kind) => value,
        other => {
            tracing::warn!(
                class = obj.class_name(),
                field = %name,
                expected = ?kind,
                got = ?other,
                "field value does not match its declared kind -- storing the default"
            );
            FieldValue::default_for(kind)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dynamic::DynamicObject;
    use crate::entity::EntityId;
    use crate::reference::NullReferences;

    struct ByIndex;

    impl ReferenceEncoder for ByIndex {
        fn encode_entity(&self, entity: EntityId) -> Option<ReferenceStrings> {
            Some(ReferenceStrings::new("", format!("e{}", entity.index())))
        }
    }

    #[test]
    fn leaf_fields_record_their_offsets() {
        let obj = DynamicObject::new("Lamp")
            .with_value("lit", FieldValue::Bool(true))
            .with_value("power", FieldValue::U32(60));
        let mut meta = ClassMetadata::new();
        let data = store_properties(&obj, &mut meta, &NullReferences).unwrap();

        assert_eq!(data.blob, vec![1, 60, 0, 0, 0]);
        assert_eq!(data.offsets.get(PrefixId::ROOT, 0), Some(0));
        assert_eq!(data.offsets.get(PrefixId::ROOT, 1), Some(1));
        let lamp = meta.get_class("Lamp").unwrap();
        assert_eq!(meta.class_def(lamp).unwrap().fields().len(), 2);
    }

    #[test]
    fn struct_marker_has_no_payload_or_offset() {
        let obj = DynamicObject::new("Lamp").with_struct(
            "shade",
            DynamicObject::new("Shade").with_value("tint", FieldValue::U8(4)),
        );
        let mut meta = ClassMetadata::new();
        let data = store_properties(&obj, &mut meta, &NullReferences).unwrap();

        assert_eq!(data.blob, vec![4]);
        assert_eq!(data.offsets.get(PrefixId::ROOT, 0), None);
        let shade = meta.resolve_prefix_path("shade").unwrap();
        assert_eq!(data.offsets.get(shade, 1), Some(0));
        assert!(meta.get_class("Shade").is_none());
    }

    #[test]
    fn nested_object_carries_class_and_length() {
        let obj = DynamicObject::new("Npc")
            .with_object(
                "brain",
                Some(DynamicObject::new("Brain").with_value("mood", FieldValue::U16(2))),
            )
            .with_value("after", FieldValue::U8(9));
        let mut meta = ClassMetadata::new();
        let data = store_properties(&obj, &mut meta, &NullReferences).unwrap();

        let brain = meta.get_class("Brain").unwrap();
        let mut expected = brain.raw().to_le_bytes().to_vec();
        expected.extend_from_slice(&2u32.to_le_bytes());
        expected.extend_from_slice(&2u16.to_le_bytes());
        expected.push(9);
        assert_eq!(data.blob, expected);
    }

    #[test]
    fn null_nested_object_is_a_single_sentinel() {
        let obj = DynamicObject::new("Npc").with_object("brain", None);
        let mut meta = ClassMetadata::new();
        let data = store_properties(&obj, &mut meta, &NullReferences).unwrap();
        assert_eq!(data.blob, u32::MAX.to_le_bytes().to_vec());
    }

    #[test]
    fn shared_assets_are_refused() {
        let obj = DynamicObject::new("Npc").with_object(
            "mesh",
            Some(DynamicObject::new("MeshAsset").shared_asset()),
        );
        let mut meta = ClassMetadata::new();
        let err = store_properties(&obj, &mut meta, &NullReferences).unwrap_err();
        assert!(matches!(err, SchemaError::SharedAssetNotPersistable { .. }));
    }

    #[test]
    fn entity_refs_go_through_the_encoder() {
        let obj = DynamicObject::new("Switch")
            .with_value("target", FieldValue::EntityRef(Some(EntityId::new(5, 0))));
        let mut meta = ClassMetadata::new();
        let data = store_properties(&obj, &mut meta, &ByIndex).unwrap();

        let mut expected = Vec::new();
        expected.put_str("").unwrap();
        expected.put_str("e5").unwrap();
        assert_eq!(data.blob, expected);
    }

    #[test]
    fn mistyped_value_stores_the_default() {
        let obj = DynamicObject::new("Lamp").with_value("power", FieldValue::U32(60));
        let mut meta = ClassMetadata::new();
        let mut liar = obj.clone();
        liar.force_value("power", FieldValue::String("sixty".into()));
        let data = store_properties(&liar, &mut meta, &NullReferences).unwrap();
        assert_eq!(data.blob, vec![0, 0, 0, 0]);
    }
}
