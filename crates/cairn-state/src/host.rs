//! The host world contract.
//!
//! The orchestrator never owns entities. It asks a [`HostWorld`] which scenes
//! and entities exist, borrows their persistable objects, and asks it to spawn
//! and destroy entities while restoring. Pose and velocity travel through the
//! same trait as an opaque [`CoreState`].

use cairn_schema::entity::EntityId;
use cairn_schema::model::PersistableObject;
use uuid::Uuid;

use crate::core_state::{CoreApply, CoreState};

// ---------------------------------------------------------------------------
// EntityInfo
// ---------------------------------------------------------------------------

/// Where an entity came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityOrigin {
    /// Part of the scene's static definition. Identified by local name.
    SceneDefined,
    /// Created while running. Identified by GUID when it respawns.
    RuntimeSpawned,
}

/// Whether a runtime-spawned entity is recreated on restore.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum RespawnMode {
    /// Respawn unless the host creates the entity itself.
    #[default]
    Default,
    AlwaysRespawn,
    NeverRespawn,
}

/// What the orchestrator needs to know about a live entity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntityInfo {
    /// Host scene the entity lives in.
    pub scene: String,
    /// Name unique within the scene.
    pub local_name: String,
    /// Stable identity for runtime-spawned entities.
    pub guid: Option<Uuid>,
    pub origin: EntityOrigin,
    pub respawn: RespawnMode,
    /// The host recreates this entity on its own (player pawns, rule
    /// objects), so the default respawn mode leaves it alone.
    pub auto_created: bool,
    pub player_controlled: bool,
    pub skip_transform: bool,
    pub skip_velocity: bool,
}

impl EntityInfo {
    pub fn scene_defined(scene: impl Into<String>, local_name: impl Into<String>) -> Self {
        Self {
            scene: scene.into(),
            local_name: local_name.into(),
            guid: None,
            origin: EntityOrigin::SceneDefined,
            respawn: RespawnMode::Default,
            auto_created: false,
            player_controlled: false,
            skip_transform: false,
            skip_velocity: false,
        }
    }

    pub fn runtime(
        scene: impl Into<String>,
        local_name: impl Into<String>,
        guid: Option<Uuid>,
    ) -> Self {
        Self {
            guid,
            origin: EntityOrigin::RuntimeSpawned,
            ..Self::scene_defined(scene, local_name)
        }
    }

    pub fn is_runtime(&self) -> bool {
        self.origin == EntityOrigin::RuntimeSpawned
    }

    /// Whether restore recreates this entity from its stored class.
    pub fn respawns(&self) -> bool {
        self.is_runtime()
            && match self.respawn {
                RespawnMode::AlwaysRespawn => true,
                RespawnMode::NeverRespawn => false,
                RespawnMode::Default => !self.auto_created,
            }
    }
}

// ---------------------------------------------------------------------------
// HostWorld
// ---------------------------------------------------------------------------

/// Lifecycle and object access the host provides.
pub trait HostWorld {
    /// Names of the currently loaded scenes.
    fn scenes(&self) -> Vec<String>;

    /// Live entities of a loaded scene, in a stable order.
    fn scene_entities(&self, scene: &str) -> Vec<EntityId>;

    fn entity_info(&self, id: EntityId) -> Option<EntityInfo>;

    fn object(&self, id: EntityId) -> Option<&dyn PersistableObject>;

    fn object_mut(&mut self, id: EntityId) -> Option<&mut dyn PersistableObject>;

    /// Create an entity of `class` in `scene`. The host must assign `guid`
    /// before the entity finishes construction, so its own startup logic
    /// already sees its stable identity.
    fn spawn_entity(&mut self, scene: &str, class: &str, guid: Uuid) -> Option<EntityId>;

    /// Returns `false` if the entity was already gone.
    fn destroy_entity(&mut self, id: EntityId) -> bool;

    /// Pose and motion to store alongside the entity's fields. `None` stores
    /// no core data.
    fn capture_core_state(&self, _id: EntityId) -> Option<CoreState> {
        None
    }

    fn apply_core_state(&mut self, _id: EntityId, _state: &CoreState, _apply: CoreApply) {}
}
