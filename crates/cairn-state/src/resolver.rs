//! Entity reference encoding and resolution against live lookups.
//!
//! References are stored as `(SceneRef, EntityRef)` strings (see
//! [`ReferenceStrings`]). Entities that restore respawns are written as a
//! braced GUID and found again through a GUID map. Everything else
//! (scene-defined entities and runtime entities the game recreates itself) is
//! written as a local name, qualified with its scene's persistent name unless
//! it lives in the referencing entity's own scene.
//!
//! The lookup tables are snapshots taken from the host when a restore starts
//! and extended as entities are respawned. They are owned by that restore
//! and dropped when it returns.

use std::collections::HashMap;

use cairn_schema::entity::EntityId;
use cairn_schema::reference::{ReferenceEncoder, ReferenceResolver, ReferenceStrings};
use uuid::Uuid;

use crate::host::HostWorld;

// ---------------------------------------------------------------------------
// SceneNames
// ---------------------------------------------------------------------------

/// Persistent names assigned to host scenes, plus the patch table used to
/// find scenes whose stored name lost its path.
#[derive(Debug, Clone, Default)]
pub struct SceneNames {
    assigned: HashMap<String, String>,
    patches: HashMap<String, String>,
}

impl SceneNames {
    /// Store `host_scene` under `name`. The segment after the last `/` of
    /// `name` is remembered as a patch for references that only carry it.
    pub fn assign(&mut self, host_scene: &str, name: &str) {
        self.assigned.insert(host_scene.to_owned(), name.to_owned());
        if let Some((_, short)) = name.rsplit_once('/') {
            self.patches.insert(short.to_owned(), name.to_owned());
        }
        let uses = self.assigned.values().filter(|v| *v == name).count();
        if uses > 1 {
            tracing::error!(
                name,
                uses,
                "several host scenes were assigned the same persistent name -- their data will collide"
            );
        }
    }

    /// Forget the assignment of one host scene. Patches stay.
    pub fn unassign(&mut self, host_scene: &str) -> bool {
        self.assigned.remove(host_scene).is_some()
    }

    pub fn clear(&mut self) {
        self.assigned.clear();
        self.patches.clear();
    }

    /// The name `host_scene`'s data is stored under.
    pub fn persistent_name<'a>(&'a self, host_scene: &'a str) -> &'a str {
        self.assigned
            .get(host_scene)
            .map_or(host_scene, String::as_str)
    }

    pub fn patch(&self, name: &str) -> Option<&str> {
        self.patches.get(name).map(String::as_str)
    }
}

/// `{xxxxxxxx-xxxx-xxxx-xxxx-xxxxxxxxxxxx}`
pub fn braced_guid(guid: Uuid) -> String {
    guid.braced().to_string()
}

pub fn parse_braced_guid(text: &str) -> Option<Uuid> {
    let inner = text.strip_prefix('{')?.strip_suffix('}')?;
    Uuid::parse_str(inner).ok()
}

// ---------------------------------------------------------------------------
// HostEncoder
// ---------------------------------------------------------------------------

/// Store-side encoder backed by the host's entity bookkeeping.
pub struct HostEncoder<'a> {
    host: &'a dyn HostWorld,
    names: &'a SceneNames,
    /// Persistent name of the scene being stored. `None` for globals.
    scene: Option<&'a str>,
}

impl<'a> HostEncoder<'a> {
    pub fn new(host: &'a dyn HostWorld, names: &'a SceneNames, scene: Option<&'a str>) -> Self {
        Self { host, names, scene }
    }
}

impl ReferenceEncoder for HostEncoder<'_> {
    fn encode_entity(&self, entity: EntityId) -> Option<ReferenceStrings> {
        let Some(info) = self.host.entity_info(entity) else {
            tracing::warn!(%entity, "referenced entity is unknown to the host -- storing null");
            return None;
        };
        // Entities the game recreates itself get a fresh GUID on load, so
        // only respawned ones travel by GUID.
        if info.respawns() {
            return match info.guid {
                Some(guid) => Some(ReferenceStrings::new("", braced_guid(guid))),
                None => {
                    tracing::warn!(
                        scene = %info.scene,
                        name = %info.local_name,
                        "respawned entity has no GUID and cannot be referenced -- storing null"
                    );
                    None
                }
            };
        }
        let target_scene = self.names.persistent_name(&info.scene);
        let scene = if self.scene == Some(target_scene) {
            ""
        } else {
            target_scene
        };
        Some(ReferenceStrings::new(scene, info.local_name))
    }
}

// ---------------------------------------------------------------------------
// RestoreLookups
// ---------------------------------------------------------------------------

/// Live entity tables for one restore call.
#[derive(Debug, Clone, Default)]
pub struct RestoreLookups {
    guids: HashMap<Uuid, EntityId>,
    /// Persistent scene name -> local name -> entity.
    scenes: HashMap<String, HashMap<String, EntityId>>,
    patches: HashMap<String, String>,
    suffixes: Vec<String>,
}

impl RestoreLookups {
    pub fn new(names: &SceneNames, instancing_suffixes: &[String]) -> Self {
        Self {
            patches: names.patches.clone(),
            suffixes: instancing_suffixes.to_vec(),
            ..Self::default()
        }
    }

    /// Snapshot every live entity of every loaded scene.
    pub fn from_host(
        host: &dyn HostWorld,
        names: &SceneNames,
        instancing_suffixes: &[String],
    ) -> Self {
        let mut lookups = Self::new(names, instancing_suffixes);
        for host_scene in host.scenes() {
            let scene = names.persistent_name(&host_scene).to_owned();
            lookups.scenes.entry(scene.clone()).or_default();
            for id in host.scene_entities(&host_scene) {
                if let Some(info) = host.entity_info(id) {
                    lookups.register(&scene, &info.local_name, info.guid, id);
                }
            }
        }
        lookups
    }

    /// Add one live entity, e.g. right after respawning it.
    pub fn register(&mut self, scene: &str, local_name: &str, guid: Option<Uuid>, id: EntityId) {
        if let Some(guid) = guid {
            self.guids.insert(guid, id);
        }
        self.scenes
            .entry(scene.to_owned())
            .or_default()
            .insert(local_name.to_owned(), id);
    }

    pub fn find_guid(&self, guid: Uuid) -> Option<EntityId> {
        self.guids.get(&guid).copied()
    }

    pub fn find_entity(&self, scene: &str, local_name: &str) -> Option<EntityId> {
        self.scenes.get(scene)?.get(local_name).copied()
    }

    /// Resolver for references stored by an entity of `scene` (`None` for
    /// global objects).
    pub fn resolver<'a>(&'a self, scene: Option<&'a str>) -> SceneResolver<'a> {
        SceneResolver {
            lookups: self,
            scene,
        }
    }

    /// The live scene a stored scene name refers to, falling back to the
    /// instancing-suffix and patch-table fixups.
    fn scene_scope(&self, name: &str) -> Option<&HashMap<String, EntityId>> {
        if let Some(scope) = self.scenes.get(name) {
            return Some(scope);
        }
        for suffix in &self.suffixes {
            if let Some(pos) = name.rfind(suffix.as_str()) {
                let base = &name[..pos];
                let fixed = self.patches.get(base).map_or(base, String::as_str);
                tracing::warn!(stored = name, fixed, "stripped instancing suffix from scene reference");
                return self.scenes.get(fixed);
            }
        }
        self.patches
            .get(name)
            .and_then(|patched| self.scenes.get(patched))
    }
}

// ---------------------------------------------------------------------------
// SceneResolver
// ---------------------------------------------------------------------------

/// [`ReferenceResolver`] for objects of one scene (or the global scope).
pub struct SceneResolver<'a> {
    lookups: &'a RestoreLookups,
    scene: Option<&'a str>,
}

impl ReferenceResolver for SceneResolver<'_> {
    fn resolve_entity(&self, reference: &ReferenceStrings) -> Option<EntityId> {
        if reference.is_guid() {
            let Some(guid) = parse_braced_guid(&reference.entity) else {
                tracing::error!(entity = %reference.entity, "malformed runtime entity GUID");
                return None;
            };
            let found = self.lookups.find_guid(guid);
            if found.is_none() {
                tracing::error!(%guid, "no live runtime entity carries this GUID");
            }
            return found;
        }

        let scope = if reference.scene.is_empty() {
            self.scene.and_then(|s| self.lookups.scenes.get(s))
        } else {
            self.lookups.scene_scope(&reference.scene)
        };
        let Some(scope) = scope else {
            let scene = if reference.scene.is_empty() {
                "LOCAL"
            } else {
                reference.scene.as_str()
            };
            tracing::warn!(
                scene,
                entity = %reference.entity,
                "referenced scene is not loaded"
            );
            return None;
        };
        let found = scope.get(&reference.entity).copied();
        if found.is_none() {
            tracing::warn!(
                scene = %reference.scene,
                entity = %reference.entity,
                "referenced entity does not exist in its scene"
            );
        }
        found
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lookups() -> RestoreLookups {
        let mut names = SceneNames::default();
        names.assign("Tower_LevelInstance_3", "/World/Tower");
        let mut lookups = RestoreLookups::new(&names, &["_LevelInstance_".to_string()]);
        lookups.register("Alpha", "Door_1", None, EntityId::new(1, 0));
        lookups.register("/World/Tower", "Bell", None, EntityId::new(2, 0));
        lookups.register("Alpha", "Crate_9", Some(Uuid::from_u128(9)), EntityId::new(3, 0));
        lookups
    }

    #[test]
    fn guid_strings_are_braced() {
        let guid = Uuid::from_u128(0xabc);
        let text = braced_guid(guid);
        assert!(text.starts_with('{') && text.ends_with('}'));
        assert_eq!(parse_braced_guid(&text), Some(guid));
        assert_eq!(parse_braced_guid("{not-a-guid}"), None);
        assert_eq!(parse_braced_guid(&guid.to_string()), None);
    }

    #[test]
    fn empty_scene_ref_means_own_scene() {
        let lookups = lookups();
        let r = lookups.resolver(Some("Alpha"));
        assert_eq!(
            r.resolve_entity(&ReferenceStrings::new("", "Door_1")),
            Some(EntityId::new(1, 0))
        );
        let global = lookups.resolver(None);
        assert_eq!(global.resolve_entity(&ReferenceStrings::new("", "Door_1")), None);
    }

    #[test]
    fn runtime_entities_resolve_by_guid_from_any_scene() {
        let lookups = lookups();
        let r = lookups.resolver(Some("Beta"));
        let reference = ReferenceStrings::new("", braced_guid(Uuid::from_u128(9)));
        assert_eq!(r.resolve_entity(&reference), Some(EntityId::new(3, 0)));
        let missing = ReferenceStrings::new("", braced_guid(Uuid::from_u128(10)));
        assert_eq!(r.resolve_entity(&missing), None);
    }

    #[test]
    fn instancing_suffix_and_patch_table_find_the_scene() {
        let lookups = lookups();
        let r = lookups.resolver(Some("Alpha"));
        let bell = Some(EntityId::new(2, 0));
        assert_eq!(r.resolve_entity(&ReferenceStrings::new("Tower_LevelInstance_8", "Bell")), bell);
        assert_eq!(r.resolve_entity(&ReferenceStrings::new("Tower", "Bell")), bell);
        assert_eq!(r.resolve_entity(&ReferenceStrings::new("Cellar", "Bell")), None);
    }

    #[test]
    fn assigned_names_override_host_names() {
        let mut names = SceneNames::default();
        names.assign("Tower_LevelInstance_3", "/World/Tower");
        assert_eq!(names.persistent_name("Tower_LevelInstance_3"), "/World/Tower");
        assert_eq!(names.persistent_name("Alpha"), "Alpha");
        assert_eq!(names.patch("Tower"), Some("/World/Tower"));
        assert!(names.unassign("Tower_LevelInstance_3"));
        assert_eq!(names.persistent_name("Tower_LevelInstance_3"), "Tower_LevelInstance_3");
        names.clear();
        assert_eq!(names.patch("Tower"), None);
    }
}
