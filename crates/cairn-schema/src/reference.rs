//! Entity reference encoding seams.
//!
//! A stored reference is a pair of strings. How a live entity becomes that
//! pair, and how the pair becomes a live entity again, depends on the host's
//! scene bookkeeping, so the property walker only sees these two traits.

use crate::entity::EntityId;

/// `(SceneRef, EntityRef)` as written to the blob.
///
/// `entity` is either a braced GUID (runtime-spawned entity) or a local name
/// (scene-defined entity). An empty `scene` means "the referencing entity's
/// own scene"; an empty `entity` is a null reference.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash)]
pub struct ReferenceStrings {
    pub scene: String,
    pub entity: String,
}

impl ReferenceStrings {
    pub fn new(scene: impl Into<String>, entity: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            entity: entity.into(),
        }
    }

    pub fn is_null(&self) -> bool {
        self.entity.is_empty()
    }

    /// Whether `entity` names a runtime-spawned entity by GUID.
    pub fn is_guid(&self) -> bool {
        self.entity.starts_with('{')
    }
}

/// Store-side: live entity to reference strings.
pub trait ReferenceEncoder {
    /// `None` stores a null reference. Implementations log why.
    fn encode_entity(&self, entity: EntityId) -> Option<ReferenceStrings>;
}

/// Restore-side: reference strings to live entity.
pub trait ReferenceResolver {
    /// Called only for non-null references. `None` leaves the field null.
    fn resolve_entity(&self, reference: &ReferenceStrings) -> Option<EntityId>;
}

/// Encodes every reference as null and resolves nothing. For objects that
/// hold no entity references.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullReferences;

impl ReferenceEncoder for NullReferences {
    fn encode_entity(&self, _entity: EntityId) -> Option<ReferenceStrings> {
        None
    }
}

impl ReferenceResolver for NullReferences {
    fn resolve_entity(&self, _reference: &ReferenceStrings) -> Option<EntityId> {
        None
    }
}
