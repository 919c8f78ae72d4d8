//! The host object-model contract.
//!
//! The persistence core never touches a concrete reflection system. A host
//! implements [`PersistableObject`] once per object representation and the
//! visitor drives everything through it: the declaration-ordered field list,
//! indexed reads and writes, and access to nested aggregates.
//!
//! Lifecycle hooks are an optional capability. An object that wants them
//! returns itself (or a delegate) from [`PersistableObject::callbacks`] /
//! [`PersistableObject::callbacks_mut`]; the core checks for the capability at
//! each hook point.

use crate::custom::{CustomDataReader, CustomDataWriter};
use crate::kind::{DataKind, KindTag};
use crate::value::FieldValue;
use crate::Result;

// ---------------------------------------------------------------------------
// FieldKind / FieldInfo
// ---------------------------------------------------------------------------

/// Shape of a persistable field.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FieldKind {
    /// A single leaf value.
    Value(DataKind),
    /// A repeated leaf value. Elements share the field's one definition.
    Array(DataKind),
    /// A nested value aggregate whose fields live in the owner's class.
    Struct,
    /// A polymorphic nested object with its own class, possibly absent.
    Object,
}

impl FieldKind {
    /// The tag a field of this shape is stored under.
    pub fn tag(self) -> KindTag {
        match self {
            FieldKind::Value(kind) => KindTag::value(kind),
            FieldKind::Array(kind) => KindTag::array_of(kind),
            FieldKind::Struct => KindTag::STRUCT,
            FieldKind::Object => KindTag::NESTED_OBJECT,
        }
    }
}

/// Name and shape of one persistable field.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldInfo {
    pub name: String,
    pub kind: FieldKind,
}

impl FieldInfo {
    pub fn new(name: impl Into<String>, kind: FieldKind) -> Self {
        Self {
            name: name.into(),
            kind,
        }
    }
}

// ---------------------------------------------------------------------------
// PersistableObject
// ---------------------------------------------------------------------------

/// An object whose fields can be stored and restored.
///
/// Field indices are positions in the list returned by
/// [`persistent_fields`](Self::persistent_fields). That list must be stable
/// for a given class: it is the order fields are written in, and a class
/// whose runtime order matches the stored order restores on the fast path.
pub trait PersistableObject {
    /// Class name used to key metadata. Must be stable across runs.
    fn class_name(&self) -> &str;

    /// Persistable fields in declaration order.
    fn persistent_fields(&self) -> Vec<FieldInfo>;

    /// Current value of a `Value` or `Array` field. Arrays are returned as
    /// [`FieldValue::Array`].
    fn read_field(&self, index: usize) -> Option<FieldValue>;

    /// Assign a `Value` or `Array` field. Returns `false` if the host refused
    /// the value (wrong kind, read-only, out of range).
    fn write_field(&mut self, index: usize, value: FieldValue) -> bool;

    /// The aggregate behind a `Struct` or `Object` field, if present.
    fn nested(&self, _index: usize) -> Option<&dyn PersistableObject> {
        None
    }

    /// Mutable access to the aggregate behind a `Struct` or `Object` field.
    fn nested_mut(&mut self, _index: usize) -> Option<&mut dyn PersistableObject> {
        None
    }

    /// Make an `Object` field hold an instance of `class` (constructing or
    /// replacing it as needed), or clear it when `class` is `None`. Returns
    /// `false` if the host cannot produce that class.
    fn prepare_nested(&mut self, _index: usize, _class: Option<&str>) -> bool {
        false
    }

    /// Shared read-only templates/assets can be referenced but never
    /// persisted as nested objects.
    fn is_shared_asset(&self) -> bool {
        false
    }

    fn callbacks(&self) -> Option<&dyn PersistCallbacks> {
        None
    }

    fn callbacks_mut(&mut self) -> Option<&mut dyn PersistCallbacks> {
        None
    }
}

// ---------------------------------------------------------------------------
// PersistCallbacks
// ---------------------------------------------------------------------------

/// Optional store/restore hooks.
///
/// Custom data hooks only run for root objects (entities and global objects);
/// nested objects receive the pre/post calls alone.
pub trait PersistCallbacks {
    fn pre_store(&self) {}

    /// Write an app-defined blob alongside the fields.
    fn store_custom_data(&self, _out: &mut CustomDataWriter) -> Result<()> {
        Ok(())
    }

    fn post_store(&self) {}

    fn pre_restore(&mut self) {}

    /// Read back what [`store_custom_data`](Self::store_custom_data) wrote.
    fn restore_custom_data(&mut self, _input: &mut CustomDataReader<'_>) -> Result<()> {
        Ok(())
    }

    fn post_restore(&mut self) {}

    /// Called before restore when the data was written by a different user
    /// data-model version.
    fn pre_restore_upgrade(&mut self, _stored_version: u32, _current_version: u32) {}

    /// Called after restore (and custom data) when versions differ.
    fn post_restore_upgrade(&mut self, _stored_version: u32, _current_version: u32) {}
}
