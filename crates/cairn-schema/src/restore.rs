//! Restore-side property walk and the fast/slow selector.
//!
//! Each class decides once per prefix whether its runtime field sequence is
//! still identical to the stored one ([`RestoreStrategy::Fast`]) or not
//! ([`RestoreStrategy::Slow`]). The decision is memoized on the
//! [`ClassDef`] and forgotten as soon as store appends to it.
//!
//! The memo only says whether streaming is worth trying. The fast path walks
//! the blob in lockstep with the runtime fields and checks every slot against
//! the stored definition and the instance's own offset table, because
//! instances of one class may differ (an aggregate present in one and absent
//! in another). Decoded values are staged and applied only once the whole
//! object decoded, so a miss hands the object to the slow path untouched.
//! The slow path resolves every runtime field by name and seeks to its
//! recorded offset; anything it cannot place is logged and left at its
//! current value.

use std::io::Cursor;

use cairn_archive::codec::ReadExt;
use cairn_archive::ArchiveError;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::custom::CustomDataReader;
use crate::kind::DataKind;
use crate::metadata::{ClassDef, ClassId, ClassMetadata, FieldDef, PrefixId};
use crate::model::{FieldInfo, FieldKind, PersistableObject};
use crate::object::{ObjectData, PropertyData};
use crate::reference::{ReferenceResolver, ReferenceStrings};
use crate::value::{CallbackBinding, FieldValue, Rotator, Transform, Vec3};
use crate::{Result, SchemaError};

// ---------------------------------------------------------------------------
// Configuration and reporting
// ---------------------------------------------------------------------------

/// How one class is restored.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreStrategy {
    /// Stored layout equals the runtime layout: stream the blob.
    Fast,
    /// Layout drifted: resolve fields by name and seek to offsets.
    Slow,
}

/// Which strategies the selector may pick.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestorePath {
    /// Fast when the layout matches, slow otherwise.
    #[default]
    Auto,
    /// Always use the indexed path.
    ForceSlow,
}

/// Options for [`restore_object`].
#[derive(Debug, Clone, Copy, Default)]
pub struct RestoreOptions {
    pub path: RestorePath,
    /// Data-model version of the running app. Upgrade hooks fire when the
    /// stored version differs.
    pub user_data_model_version: u32,
}

/// What a restore did, for diagnostics and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreStats {
    /// Objects (roots and nested objects) restored by streaming.
    pub fast_objects: usize,
    /// Objects restored through the offset table.
    pub slow_objects: usize,
    /// Streaming attempts abandoned for the slow path.
    pub fast_fallbacks: usize,
    /// Runtime fields left untouched (absent, retyped or refused).
    pub skipped_fields: usize,
    /// Non-null references that resolved to nothing.
    pub unresolved_references: usize,
}

impl RestoreStats {
    pub fn merge(&mut self, other: &RestoreStats) {
        self.fast_objects += other.fast_objects;
        self.slow_objects += other.slow_objects;
        self.fast_fallbacks += other.fast_fallbacks;
        self.skipped_fields += other.skipped_fields;
        self.unresolved_references += other.unresolved_references;
    }
}

// ---------------------------------------------------------------------------
// Entry points
// ---------------------------------------------------------------------------

/// Restore the fields of `obj` from `data`.
///
/// Fails with [`SchemaError::UnknownClass`] when `obj`'s class was never
/// stored in `meta`. Drift inside a known class is never an error.
pub fn restore_properties(
    obj: &mut dyn PersistableObject,
    data: &PropertyData,
    meta: &ClassMetadata,
    refs: &dyn ReferenceResolver,
    path: RestorePath,
) -> Result<RestoreStats> {
    let class = meta
        .get_class(obj.class_name())
        .ok_or_else(|| SchemaError::UnknownClass {
            class: obj.class_name().to_owned(),
        })?;
    let mut restorer = Restorer {
        meta,
        refs,
        path,
        data,
        stats: RestoreStats::default(),
    };
    restorer.restore_scope(obj, class, PrefixId::ROOT, &data.blob, 0)?;
    Ok(restorer.stats)
}

/// Restore a root object: hooks, properties and custom data.
pub fn restore_object(
    obj: &mut dyn PersistableObject,
    data: &ObjectData,
    meta: &ClassMetadata,
    refs: &dyn ReferenceResolver,
    options: &RestoreOptions,
) -> Result<RestoreStats> {
    let stored = meta.user_data_model_version();
    let current = options.user_data_model_version;
    if let Some(cb) = obj.callbacks_mut() {
        cb.pre_restore();
        if stored != current {
            cb.pre_restore_upgrade(stored, current);
        }
    }

    let stats = restore_properties(obj, &data.properties, meta, refs, options.path)?;

    if let Some(cb) = obj.callbacks_mut() {
        let mut input = CustomDataReader::new(&data.custom)?;
        cb.restore_custom_data(&mut input)?;
        cb.post_restore();
        if stored != current {
            cb.post_restore_upgrade(stored, current);
        }
    }
    Ok(stats)
}

// ---------------------------------------------------------------------------
// Restorer
// ---------------------------------------------------------------------------

struct Restorer<'a> {
    meta: &'a ClassMetadata,
    refs: &'a dyn ReferenceResolver,
    path: RestorePath,
    data: &'a PropertyData,
    stats: RestoreStats,
}

/// One field decoded by the streaming pass.
struct Staged {
    index: usize,
    name: String,
    value: StagedValue,
}

enum StagedValue {
    Field(FieldValue),
    Struct(Vec<Staged>),
    Object(NestedSlot),
}

/// Header of a stored nested object. `start..end` is its byte range.
enum NestedSlot {
    Null,
    Stored {
        class: ClassId,
        prefix: Option<PrefixId>,
        start: u64,
        end: u64,
    },
}

impl Restorer<'_> {
    /// Restore one object whose fields start at `start` in `bytes`. `bytes`
    /// always begins at blob offset 0 and ends where the object's data ends.
    fn restore_scope(
        &mut self,
        obj: &mut dyn PersistableObject,
        class_id: ClassId,
        prefix: PrefixId,
        bytes: &[u8],
        start: u64,
    ) -> Result<()> {
        let meta = self.meta;
        let class = meta
            .class_def(class_id)
            .ok_or(SchemaError::UnknownClassId { id: class_id.raw() })?;

        if self.strategy(obj, class, prefix) == RestoreStrategy::Fast {
            let before = self.stats.clone();
            let mut cursor = Cursor::new(bytes);
            cursor.set_position(start);
            let mut slot = 0;
            match self.decode_fast(obj, class, prefix, &mut cursor, &mut slot) {
                Ok(staged) => {
                    self.stats.fast_objects += 1;
                    return self.apply(obj, staged, bytes);
                }
                Err(e) if e.is_recoverable_by_slow_path() => {
                    tracing::debug!(
                        class = obj.class_name(),
                        error = %e,
                        "fast restore ran out of step -- retrying on the slow path"
                    );
                    self.stats = before;
                    self.stats.fast_fallbacks += 1;
                }
                Err(e) => return Err(e),
            }
        }

        self.stats.slow_objects += 1;
        self.restore_slow(obj, class, prefix, bytes)
    }

    fn strategy(
        &self,
        obj: &dyn PersistableObject,
        class: &ClassDef,
        prefix: PrefixId,
    ) -> RestoreStrategy {
        if self.path == RestorePath::ForceSlow {
            return RestoreStrategy::Slow;
        }
        let matches = match class.cached_match(prefix) {
            Some(matches) => matches,
            None => {
                let mut slot = 0;
                let matches = self.layout_matches(obj, class, prefix, &mut slot)
                    && slot == class.fields().len();
                class.remember_match(prefix, matches);
                tracing::debug!(
                    class = obj.class_name(),
                    ?prefix,
                    matches,
                    "compared stored layout with runtime fields"
                );
                matches
            }
        };
        if matches {
            RestoreStrategy::Fast
        } else {
            RestoreStrategy::Slow
        }
    }

    /// Lockstep comparison of runtime fields with stored definitions,
    /// descending into nested aggregates the way store does.
    fn layout_matches(
        &self,
        obj: &dyn PersistableObject,
        class: &ClassDef,
        prefix: PrefixId,
        slot: &mut usize,
    ) -> bool {
        for (i, info) in obj.persistent_fields().iter().enumerate() {
            let Some(field) = self.meta.get_field(&info.name) else {
                return false;
            };
            let Some(def) = class.fields().get(*slot) else {
                return false;
            };
            if def.field != field || def.prefix != prefix || def.tag != info.kind.tag() {
                return false;
            }
            *slot += 1;
            if info.kind == FieldKind::Struct {
                let Some(child_prefix) = self.meta.get_prefix(prefix, field) else {
                    return false;
                };
                if let Some(child) = obj.nested(i) {
                    if !self.layout_matches(child, class, child_prefix, slot) {
                        return false;
                    }
                }
            }
        }
        true
    }

    // -- fast path ----------------------------------------------------------

    /// Decode `obj`'s fields in lockstep with the stored definitions without
    /// touching `obj`. Any slot that does not line up is a divergence.
    fn decode_fast(
        &mut self,
        obj: &dyn PersistableObject,
        class: &ClassDef,
        prefix: PrefixId,
        cursor: &mut Cursor<&[u8]>,
        slot: &mut usize,
    ) -> Result<Vec<Staged>> {
        let fields = obj.persistent_fields();
        let mut staged = Vec::with_capacity(fields.len());
        for (i, info) in fields.into_iter().enumerate() {
            let index = *slot;
            let def = self.expect_def(obj, class, prefix, &info, index)?;
            *slot += 1;
            let value = match info.kind {
                FieldKind::Value(kind) => {
                    self.expect_offset(obj, &info, prefix, index, cursor)?;
                    StagedValue::Field(self.read_value(cursor, kind)?)
                }
                FieldKind::Array(kind) => {
                    self.expect_offset(obj, &info, prefix, index, cursor)?;
                    StagedValue::Field(self.read_array(cursor, kind)?)
                }
                FieldKind::Struct => {
                    let Some(child_prefix) = self.meta.get_prefix(prefix, def.field) else {
                        return Err(diverged(obj, &info.name));
                    };
                    match obj.nested(i) {
                        Some(child) => StagedValue::Struct(
                            self.decode_fast(child, class, child_prefix, cursor, slot)?,
                        ),
                        None => {
                            // Absent here but present in some stored instance.
                            if class
                                .fields()
                                .get(*slot)
                                .is_some_and(|next| next.prefix == child_prefix)
                            {
                                return Err(diverged(obj, &info.name));
                            }
                            continue;
                        }
                    }
                }
                FieldKind::Object => {
                    self.expect_offset(obj, &info, prefix, index, cursor)?;
                    let child_prefix = self.meta.get_prefix(prefix, def.field);
                    StagedValue::Object(self.read_nested_slot(cursor, child_prefix)?)
                }
            };
            staged.push(Staged {
                index: i,
                name: info.name,
                value,
            });
        }
        Ok(staged)
    }

    /// The stored definition at `index`, if it is the runtime field.
    fn expect_def(
        &self,
        obj: &dyn PersistableObject,
        class: &ClassDef,
        prefix: PrefixId,
        info: &FieldInfo,
        index: usize,
    ) -> Result<FieldDef> {
        let def = class.fields().get(index).copied();
        match (def, self.meta.get_field(&info.name)) {
            (Some(def), Some(field))
                if def.field == field && def.prefix == prefix && def.tag == info.kind.tag() =>
            {
                Ok(def)
            }
            _ => Err(diverged(obj, &info.name)),
        }
    }

    /// This instance stored the field at `index` exactly where the cursor is.
    fn expect_offset(
        &self,
        obj: &dyn PersistableObject,
        info: &FieldInfo,
        prefix: PrefixId,
        index: usize,
        cursor: &Cursor<&[u8]>,
    ) -> Result<()> {
        if self.data.offsets.get(prefix, index) == Some(cursor.position()) {
            Ok(())
        } else {
            Err(diverged(obj, &info.name))
        }
    }

    fn apply(
        &mut self,
        obj: &mut dyn PersistableObject,
        staged: Vec<Staged>,
        bytes: &[u8],
    ) -> Result<()> {
        for Staged { index, name, value } in staged {
            match value {
                StagedValue::Field(value) => self.assign(obj, index, &name, value),
                StagedValue::Struct(fields) => match obj.nested_mut(index) {
                    Some(child) => self.apply(child, fields, bytes)?,
                    None => self.stats.skipped_fields += 1,
                },
                StagedValue::Object(slot) => self.restore_nested(obj, index, &name, slot, bytes)?,
            }
        }
        Ok(())
    }

    // -- slow path ----------------------------------------------------------

    fn restore_slow(
        &mut self,
        obj: &mut dyn PersistableObject,
        class: &ClassDef,
        prefix: PrefixId,
        bytes: &[u8],
    ) -> Result<()> {
        let mut cursor = Cursor::new(bytes);
        for (i, info) in obj.persistent_fields().iter().enumerate() {
            let Some(field) = self.meta.get_field(&info.name) else {
                tracing::trace!(class = obj.class_name(), field = %info.name, "field not in stored data");
                self.stats.skipped_fields += 1;
                continue;
            };
            let Some(index) = class.field_index(prefix, field) else {
                tracing::trace!(class = obj.class_name(), field = %info.name, "field not stored for this class");
                self.stats.skipped_fields += 1;
                continue;
            };
            let stored_tag = class.fields()[index].tag;
            if stored_tag != info.kind.tag() {
                tracing::warn!(
                    class = obj.class_name(),
                    field = %info.name,
                    stored = ?stored_tag,
                    runtime = ?info.kind.tag(),
                    "field changed type since it was stored -- skipping"
                );
                self.stats.skipped_fields += 1;
                continue;
            }

            if info.kind == FieldKind::Struct {
                match (self.meta.get_prefix(prefix, field), obj.nested_mut(i)) {
                    (Some(child_prefix), Some(child)) => {
                        self.restore_slow(child, class, child_prefix, bytes)?;
                    }
                    _ => self.stats.skipped_fields += 1,
                }
                continue;
            }

            let Some(offset) = self.data.offsets.get(prefix, index) else {
                tracing::trace!(class = obj.class_name(), field = %info.name, "no offset recorded");
                self.stats.skipped_fields += 1;
                continue;
            };
            cursor.set_position(offset);
            match info.kind {
                FieldKind::Value(kind) => {
                    let value = self.read_value(&mut cursor, kind)?;
                    self.assign(obj, i, &info.name, value);
                }
                FieldKind::Array(kind) => {
                    let value = self.read_array(&mut cursor, kind)?;
                    self.assign(obj, i, &info.name, value);
                }
                FieldKind::Object => {
                    let child_prefix = self.meta.get_prefix(prefix, field);
                    let slot = self.read_nested_slot(&mut cursor, child_prefix)?;
                    self.restore_nested(obj, i, &info.name, slot, bytes)?;
                }
                FieldKind::Struct => {}
            }
        }
        Ok(())
    }

    // -- shared decoding ----------------------------------------------------

    fn assign(&mut self, obj: &mut dyn PersistableObject, index: usize, name: &str, value: FieldValue) {
        if !obj.write_field(index, value) {
            tracing::warn!(class = obj.class_name(), field = %name, "host refused restored value");
            self.stats.skipped_fields += 1;
        }
    }

    /// Read a nested object's header and step `cursor` past its bytes.
    fn read_nested_slot(
        &self,
        cursor: &mut Cursor<&[u8]>,
        prefix: Option<PrefixId>,
    ) -> Result<NestedSlot> {
        let raw = cursor.get_u32()?;
        if raw == ClassId::NONE.raw() {
            return Ok(NestedSlot::Null);
        }
        let class = ClassId::from_raw(raw);
        if self.meta.class_name(class).is_none() {
            return Err(SchemaError::UnknownClassId { id: raw });
        }
        let len = u64::from(cursor.get_u32()?);
        let start = cursor.position();
        let end = start + len;
        if end > cursor.get_ref().len() as u64 {
            let eof = std::io::Error::from(std::io::ErrorKind::UnexpectedEof);
            return Err(ArchiveError::from(eof).into());
        }
        cursor.set_position(end);
        Ok(NestedSlot::Stored {
            class,
            prefix,
            start,
            end,
        })
    }

    /// Make the nested object slot `index` hold the stored object and restore
    /// into it. `bytes` is the buffer the slot header was read from.
    fn restore_nested(
        &mut self,
        obj: &mut dyn PersistableObject,
        index: usize,
        name: &str,
        slot: NestedSlot,
        bytes: &[u8],
    ) -> Result<()> {
        let NestedSlot::Stored {
            class: child_class,
            prefix,
            start,
            end,
        } = slot
        else {
            if !obj.prepare_nested(index, None) {
                self.stats.skipped_fields += 1;
            }
            return Ok(());
        };
        let Some(child_prefix) = prefix else {
            self.stats.skipped_fields += 1;
            return Ok(());
        };
        let meta = self.meta;
        let class_name = meta
            .class_name(child_class)
            .ok_or(SchemaError::UnknownClassId { id: child_class.raw() })?;
        if !obj.prepare_nested(index, Some(class_name)) {
            tracing::warn!(
                class = obj.class_name(),
                field = %name,
                nested = class_name,
                "host cannot hold the stored nested class -- skipping"
            );
            self.stats.skipped_fields += 1;
            return Ok(());
        }
        let Some(child) = obj.nested_mut(index) else {
            self.stats.skipped_fields += 1;
            return Ok(());
        };

        if let Some(cb) = child.callbacks_mut() {
            cb.pre_restore();
        }
        self.restore_scope(child, child_class, child_prefix, &bytes[..end as usize], start)?;
        if let Some(cb) = child.callbacks_mut() {
            cb.post_restore();
        }
        Ok(())
    }

    fn read_array(&mut self, cursor: &mut Cursor<&[u8]>, kind: DataKind) -> Result<FieldValue> {
        let count = cursor.get_u32()? as usize;
        let remaining = cursor.get_ref().len().saturating_sub(cursor.position() as usize);
        let mut items = Vec::with_capacity(count.min(remaining));
        for _ in 0..count {
            items.push(self.read_value(cursor, kind)?);
        }
        Ok(FieldValue::Array(items))
    }

    fn read_value(&mut self, cursor: &mut Cursor<&[u8]>, kind: DataKind) -> Result<FieldValue> {
        Ok(match kind {
            DataKind::Bool => FieldValue::Bool(cursor.get_bool()?),
            DataKind::U8 => FieldValue::U8(cursor.get_u8()?),
            DataKind::U16 => FieldValue::U16(cursor.get_u16()?),
            DataKind::Enum => FieldValue::Enum(cursor.get_u16()?),
            DataKind::U32 => FieldValue::U32(cursor.get_u32()?),
            DataKind::U64 => FieldValue::U64(cursor.get_u64()?),
            DataKind::I8 => FieldValue::I8(cursor.get_i8()?),
            DataKind::I16 => FieldValue::I16(cursor.get_i16()?),
            DataKind::I32 => FieldValue::I32(cursor.get_i32()?),
            DataKind::I64 => FieldValue::I64(cursor.get_i64()?),
            DataKind::F32 => FieldValue::F32(cursor.get_f32()?),
            DataKind::F64 => FieldValue::F64(cursor.get_f64()?),
            DataKind::Vector => FieldValue::Vector(Vec3::read_from(cursor)?),
            DataKind::Rotator => FieldValue::Rotator(Rotator::read_from(cursor)?),
            DataKind::Transform => FieldValue::Transform(Transform::read_from(cursor)?),
            DataKind::Guid => FieldValue::Guid(Uuid::from_bytes(cursor.get_array::<16>()?)),
            DataKind::String => FieldValue::String(cursor.get_string()?),
            DataKind::Name => FieldValue::Name(cursor.get_string()?),
            DataKind::Text => FieldValue::Text(cursor.get_string()?),
            DataKind::AssetPath => {
                let path = cursor.get_string()?;
                FieldValue::AssetPath((!path.is_empty()).then_some(path))
            }
            DataKind::ClassRef => {
                let raw = cursor.get_u32()?;
                if raw == ClassId::NONE.raw() {
                    FieldValue::ClassRef(None)
                } else {
                    let name = self.meta.class_name(ClassId::from_raw(raw));
                    if name.is_none() {
                        tracing::warn!(class_id = raw, "class reference points outside the metadata");
                    }
                    FieldValue::ClassRef(name.map(str::to_owned))
                }
            }
            DataKind::EntityRef => {
                let reference = read_reference(cursor)?;
                FieldValue::EntityRef(self.resolve(&reference))
            }
            DataKind::Callbacks => {
                let count = cursor.get_u32()?;
                let mut bindings = Vec::new();
                for _ in 0..count {
                    let reference = read_reference(cursor)?;
                    let function = cursor.get_string()?;
                    if let Some(target) = self.resolve(&reference) {
                        bindings.push(CallbackBinding { target, function });
                    }
                }
                FieldValue::Callbacks(bindings)
            }
        })
    }

    fn resolve(&mut self, reference: &ReferenceStrings) -> Option<crate::entity::EntityId> {
        if reference.is_null() {
            return None;
        }
        let resolved = self.refs.resolve_entity(reference);
        if resolved.is_none() {
            self.stats.unresolved_references += 1;
        }
        resolved
    }
}

fn read_reference(cursor: &mut Cursor<&[u8]>) -> Result<ReferenceStrings> {
    let scene = cursor.get_string()?;
    let entity = cursor.get_string()?;
    Ok(ReferenceStrings { scene, entity })
}

fn diverged(obj: &dyn PersistableObject, field: &str) -> SchemaError {
    SchemaError::FastPathDiverged {
        class: obj.class_name().to_owned(),
        field: field.to_owned(),
    }
}
