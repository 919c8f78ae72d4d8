//! The closed set of field kinds and their stored tags.
//!
//! A runtime field reports a [`DataKind`]. What lands in a
//! [`FieldDef`](crate::metadata::FieldDef) is a [`KindTag`]: the
//! [`StoredKind`] the value is encoded as, plus an array flag. Several runtime
//! kinds share a stored kind (`Bool` is stored as `U8`, `Enum` as `U16`), so
//! tags are what fast-path matching and slow-path type checks compare.

use std::fmt;

// ---------------------------------------------------------------------------
// DataKind
// ---------------------------------------------------------------------------

/// Kind of a leaf value as the host object model reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataKind {
    Bool,
    U8,
    U16,
    U32,
    U64,
    I8,
    I16,
    I32,
    I64,
    F32,
    F64,
    /// Enumerations are persisted as their 16-bit discriminant.
    Enum,
    Vector,
    Rotator,
    Transform,
    Guid,
    String,
    /// Interned name; persisted as its string form.
    Name,
    /// Display text; persisted as its string form.
    Text,
    /// Reference to another entity, persisted as a (scene, entity) string pair.
    EntityRef,
    /// Path to a shared read-only asset.
    AssetPath,
    /// Reference to a class, persisted as a ClassId of the owning metadata.
    ClassRef,
    /// List of (target entity, function name) callback bindings.
    Callbacks,
}

impl DataKind {
    /// The encoding used for this kind.
    pub fn stored(self) -> StoredKind {
        match self {
            DataKind::Bool | DataKind::U8 => StoredKind::U8,
            DataKind::Enum | DataKind::U16 => StoredKind::U16,
            DataKind::U32 => StoredKind::U32,
            DataKind::U64 => StoredKind::U64,
            DataKind::I8 => StoredKind::I8,
            DataKind::I16 => StoredKind::I16,
            DataKind::I32 => StoredKind::I32,
            DataKind::I64 => StoredKind::I64,
            DataKind::F32 => StoredKind::F32,
            DataKind::F64 => StoredKind::F64,
            DataKind::Vector => StoredKind::Vector,
            DataKind::Rotator => StoredKind::Rotator,
            DataKind::Transform => StoredKind::Transform,
            DataKind::Guid => StoredKind::Guid,
            DataKind::String => StoredKind::String,
            DataKind::Name => StoredKind::Name,
            DataKind::Text => StoredKind::Text,
            DataKind::EntityRef => StoredKind::EntityRef,
            DataKind::AssetPath => StoredKind::AssetPath,
            DataKind::ClassRef => StoredKind::ClassRef,
            DataKind::Callbacks => StoredKind::Callbacks,
        }
    }
}

// ---------------------------------------------------------------------------
// StoredKind
// ---------------------------------------------------------------------------

/// On-disk encoding of a field. Discriminants are part of the file format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum StoredKind {
    U8 = 0,
    U16 = 1,
    U32 = 2,
    U64 = 3,
    I8 = 4,
    I16 = 5,
    I32 = 6,
    I64 = 7,
    F32 = 8,
    F64 = 9,
    Vector = 10,
    Rotator = 11,
    Transform = 12,
    Guid = 13,
    String = 14,
    Name = 15,
    Text = 16,
    EntityRef = 17,
    AssetPath = 18,
    ClassRef = 19,
    Callbacks = 20,
    /// Nested value aggregate marker. Carries no bytes of its own.
    Struct = 21,
    /// Polymorphic nested object: ClassId, then length-prefixed fields.
    NestedObject = 22,
}

impl StoredKind {
    const ALL: [StoredKind; 23] = [
        StoredKind::U8,
        StoredKind::U16,
        StoredKind::U32,
        StoredKind::U64,
        StoredKind::I8,
        StoredKind::I16,
        StoredKind::I32,
        StoredKind::I64,
        StoredKind::F32,
        StoredKind::F64,
        StoredKind::Vector,
        StoredKind::Rotator,
        StoredKind::Transform,
        StoredKind::Guid,
        StoredKind::String,
        StoredKind::Name,
        StoredKind::Text,
        StoredKind::EntityRef,
        StoredKind::AssetPath,
        StoredKind::ClassRef,
        StoredKind::Callbacks,
        StoredKind::Struct,
        StoredKind::NestedObject,
    ];

    /// Decode a discriminant.
    pub fn from_raw(raw: u16) -> Option<Self> {
        Self::ALL.get(raw as usize).copied()
    }
}

// ---------------------------------------------------------------------------
// KindTag
// ---------------------------------------------------------------------------

/// A [`StoredKind`] plus whether the field is an array of it.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct KindTag {
    pub base: StoredKind,
    pub array: bool,
}

impl KindTag {
    /// High bit of the raw tag marks arrays.
    pub const ARRAY_FLAG: u16 = 0x8000;

    pub const STRUCT: KindTag = KindTag {
        base: StoredKind::Struct,
        array: false,
    };

    pub const NESTED_OBJECT: KindTag = KindTag {
        base: StoredKind::NestedObject,
        array: false,
    };

    /// Tag for a single value of `kind`.
    #[inline]
    pub fn value(kind: DataKind) -> Self {
        Self {
            base: kind.stored(),
            array: false,
        }
    }

    /// Tag for an array of `kind`.
    #[inline]
    pub fn array_of(kind: DataKind) -> Self {
        Self {
            base: kind.stored(),
            array: true,
        }
    }

    /// Whether this tag opens a nested scope (struct or nested object).
    #[inline]
    pub fn is_scope(self) -> bool {
        matches!(self.base, StoredKind::Struct | StoredKind::NestedObject)
    }

    pub fn to_raw(self) -> u16 {
        let flag = if self.array { Self::ARRAY_FLAG } else { 0 };
        self.base as u16 | flag
    }

    pub fn from_raw(raw: u16) -> Option<Self> {
        let base = StoredKind::from_raw(raw & !Self::ARRAY_FLAG)?;
        Some(Self {
            base,
            array: raw & Self::ARRAY_FLAG != 0,
        })
    }
}

impl fmt::Debug for KindTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.array {
            write!(f, "[{:?}]", self.base)
        } else {
            write!(f, "{:?}", self.base)
        }
    }
}
