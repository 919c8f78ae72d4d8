//! Cairn Schema -- self-describing property persistence.
//!
//! This crate turns any object that implements [`PersistableObject`] into a
//! compact property blob and back. The blob carries no layout of its own:
//! field names, nesting scopes and stored kinds live in a [`ClassMetadata`]
//! registry that travels next to the data. On restore the registry is compared
//! with the runtime class. When nothing changed the blob is streamed back in
//! one pass; otherwise every field is looked up by name and read from its
//! recorded offset, so added, removed, reordered and retyped fields degrade to
//! defaults instead of errors.
//!
//! # Quick Start
//!
//! ```
//! use cairn_schema::prelude::*;
//!
//! let door = DynamicObject::new("Door")
//!     .with_value("open", FieldValue::Bool(true))
//!     .with_value("health", FieldValue::I32(40));
//!
//! let mut meta = ClassMetadata::new();
//! let data = store_properties(&door, &mut meta, &NullReferences).unwrap();
//!
//! let mut fresh = DynamicObject::new("Door")
//!     .with_value("open", FieldValue::Bool(false))
//!     .with_value("health", FieldValue::I32(100));
//! let stats =
//!     restore_properties(&mut fresh, &data, &meta, &NullReferences, RestorePath::Auto).unwrap();
//!
//! assert_eq!(fresh, door);
//! assert_eq!(stats.fast_objects, 1);
//! ```

#![deny(unsafe_code)]

pub mod custom;
pub mod dynamic;
pub mod entity;
pub mod kind;
pub mod metadata;
pub mod model;
pub mod object;
pub mod reference;
pub mod restore;
pub mod store;
pub mod value;

use cairn_archive::ArchiveError;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced while storing or restoring properties.
#[derive(Debug, thiserror::Error)]
pub enum SchemaError {
    /// The chunk stream or a value encoding was broken.
    #[error(transparent)]
    Archive(#[from] ArchiveError),

    /// A class name has no definition in the metadata being restored from.
    #[error("class '{class}' has no stored definition")]
    UnknownClass { class: String },

    /// A stored ClassId does not exist in the metadata.
    #[error("class id {id} is not present in the metadata")]
    UnknownClassId { id: u32 },

    /// A nested object field points at a shared read-only asset.
    #[error("field '{field}' of class '{class}' holds a shared asset, which cannot be stored inline")]
    SharedAssetNotPersistable { class: String, field: String },

    /// The streaming restore ran out of step with the stored layout.
    #[error("fast restore of class '{class}' diverged at field '{field}'")]
    FastPathDiverged { class: String, field: String },

    /// A stored kind tag is outside the known set.
    #[error("unknown kind tag {raw:#06x}")]
    UnknownKindTag { raw: u16 },

    /// Metadata tables contradict each other.
    #[error("corrupt class metadata: {details}")]
    CorruptMetadata { details: String },
}

impl SchemaError {
    /// Whether a failed streaming restore may be retried on the indexed path.
    ///
    /// A blob written before its class gained fields ends early; a diverged
    /// walk means the memoized layout match no longer holds. Both are local to
    /// one object.
    pub fn is_recoverable_by_slow_path(&self) -> bool {
        match self {
            SchemaError::FastPathDiverged { .. } => true,
            SchemaError::Archive(ArchiveError::Io(e)) => {
                e.kind() == std::io::ErrorKind::UnexpectedEof
            }
            _ => false,
        }
    }
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, SchemaError>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use crate::custom::{CustomDataReader, CustomDataWriter};
    pub use crate::dynamic::DynamicObject;
    pub use crate::entity::EntityId;
    pub use crate::kind::{DataKind, KindTag, StoredKind};
    pub use crate::metadata::{ClassDef, ClassId, ClassMetadata, FieldDef, FieldId, PrefixId};
    pub use crate::model::{FieldInfo, FieldKind, PersistCallbacks, PersistableObject};
    pub use crate::object::{ObjectData, PrefixOffsets, PropertyData};
    pub use crate::reference::{
        NullReferences, ReferenceEncoder, ReferenceResolver, ReferenceStrings,
    };
    pub use crate::restore::{
        restore_object, restore_properties, RestoreOptions, RestorePath, RestoreStats,
        RestoreStrategy,
    };
    pub use crate::store::{store_object, store_properties};
    pub use crate::value::{CallbackBinding, FieldValue, Quat, Rotator, Transform, Vec3};
    pub use crate::{Result, SchemaError};
}

// ---------------------------------------------------------------------------
// Integration Tests
// ---------------------------------------------------------------------------
