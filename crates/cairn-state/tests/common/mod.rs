//! Shared test host: an in-memory world of [`DynamicObject`] entities.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};

use cairn_state::prelude::*;
use uuid::Uuid;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A state whose shards live in a fresh temporary directory.
pub fn temp_state() -> anyhow::Result<(tempfile::TempDir, SaveState)> {
    temp_state_with(StateConfig::default())
}

pub fn temp_state_with(config: StateConfig) -> anyhow::Result<(tempfile::TempDir, SaveState)> {
    let dir = tempfile::tempdir()?;
    let state = SaveState::new(config.with_shard_dir(dir.path().join("shards")))?;
    Ok((dir, state))
}

pub struct TestEntity {
    pub info: EntityInfo,
    pub object: DynamicObject,
    pub core: Option<CoreState>,
    /// Last core state the orchestrator applied, with its mask.
    pub applied: Option<(CoreState, CoreApply)>,
}

/// Host world held entirely in memory.
#[derive(Default)]
pub struct TestWorld {
    scenes: Vec<String>,
    entities: BTreeMap<EntityId, TestEntity>,
    /// Blank instances `spawn_entity` clones, by class.
    prototypes: HashMap<String, DynamicObject>,
    next_index: u32,
    pub destroyed: Vec<EntityId>,
}

impl TestWorld {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_scene(&mut self, scene: &str) {
        if !self.scenes.iter().any(|s| s == scene) {
            self.scenes.push(scene.to_owned());
        }
    }

    /// Drop a scene and every entity in it, as unloading it would.
    pub fn unload_scene(&mut self, scene: &str) {
        self.scenes.retain(|s| s != scene);
        self.entities.retain(|_, e| e.info.scene != scene);
    }

    pub fn add_prototype(&mut self, prototype: DynamicObject) {
        self.prototypes
            .insert(prototype.class().to_owned(), prototype);
    }

    pub fn add_entity(&mut self, info: EntityInfo, object: DynamicObject) -> EntityId {
        self.add_scene(&info.scene);
        let id = EntityId::new(self.next_index, 0);
        self.next_index += 1;
        self.entities.insert(
            id,
            TestEntity {
                info,
                object,
                core: None,
                applied: None,
            },
        );
        id
    }

    pub fn add_scene_entity(&mut self, scene: &str, name: &str, object: DynamicObject) -> EntityId {
        self.add_entity(EntityInfo::scene_defined(scene, name), object)
    }

    /// A respawning runtime entity with a fresh GUID.
    pub fn add_runtime_entity(&mut self, scene: &str, name: &str, object: DynamicObject) -> (EntityId, Uuid) {
        let guid = Uuid::new_v4();
        let id = self.add_entity(EntityInfo::runtime(scene, name, Some(guid)), object);
        (id, guid)
    }

    pub fn entity(&self, id: EntityId) -> &TestEntity {
        &self.entities[&id]
    }

    pub fn entity_mut(&mut self, id: EntityId) -> &mut TestEntity {
        self.entities.get_mut(&id).expect("live entity")
    }

    pub fn obj(&self, id: EntityId) -> &DynamicObject {
        &self.entity(id).object
    }

    pub fn obj_mut(&mut self, id: EntityId) -> &mut DynamicObject {
        &mut self.entity_mut(id).object
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.entities.contains_key(&id)
    }

    pub fn find(&self, scene: &str, name: &str) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, e)| e.info.scene == scene && e.info.local_name == name)
            .map(|(id, _)| *id)
    }

    pub fn find_guid(&self, guid: Uuid) -> Option<EntityId> {
        self.entities
            .iter()
            .find(|(_, e)| e.info.guid == Some(guid))
            .map(|(id, _)| *id)
    }

    pub fn entity_count(&self, scene: &str) -> usize {
        self.entities.values().filter(|e| e.info.scene == scene).count()
    }
}

impl HostWorld for TestWorld {
    fn scenes(&self) -> Vec<String> {
        self.scenes.clone()
    }

    fn scene_entities(&self, scene: &str) -> Vec<EntityId> {
        self.entities
            .iter()
            .filter(|(_, e)| e.info.scene == scene)
            .map(|(id, _)| *id)
            .collect()
    }

    fn entity_info(&self, id: EntityId) -> Option<EntityInfo> {
        self.entities.get(&id).map(|e| e.info.clone())
    }

    fn object(&self, id: EntityId) -> Option<&dyn PersistableObject> {
        self.entities
            .get(&id)
            .map(|e| &e.object as &dyn PersistableObject)
    }

    fn object_mut(&mut self, id: EntityId) -> Option<&mut dyn PersistableObject> {
        self.entities
            .get_mut(&id)
            .map(|e| &mut e.object as &mut dyn PersistableObject)
    }

    fn spawn_entity(&mut self, scene: &str, class: &str, guid: Uuid) -> Option<EntityId> {
        let object = self.prototypes.get(class)?.clone();
        let name = format!("{class}_{}", self.next_index);
        Some(self.add_entity(EntityInfo::runtime(scene, name, Some(guid)), object))
    }

    fn destroy_entity(&mut self, id: EntityId) -> bool {
        let removed = self.entities.remove(&id).is_some();
        if removed {
            self.destroyed.push(id);
        }
        removed
    }

    fn capture_core_state(&self, id: EntityId) -> Option<CoreState> {
        self.entities.get(&id)?.core
    }

    fn apply_core_state(&mut self, id: EntityId, state: &CoreState, apply: CoreApply) {
        if let Some(entity) = self.entities.get_mut(&id) {
            entity.applied = Some((*state, apply));
        }
    }
}

// -- fixtures ---------------------------------------------------------------

pub fn door(open: bool, label: &str) -> DynamicObject {
    DynamicObject::new("Door")
        .with_value("open", FieldValue::Bool(open))
        .with_value("label", FieldValue::String(label.into()))
}

pub fn crate_box(coins: u32) -> DynamicObject {
    DynamicObject::new("Crate")
        .with_value("coins", FieldValue::U32(coins))
        .with_value("target", FieldValue::EntityRef(None))
}

pub fn guard(health: f32, target: Option<EntityId>) -> DynamicObject {
    DynamicObject::new("Guard")
        .with_value("health", FieldValue::F32(health))
        .with_value("target", FieldValue::EntityRef(target))
}
