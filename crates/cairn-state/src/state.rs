//! The save state orchestrator.
//!
//! [`SaveState`] is the programmatic surface an app drives: it stores scenes,
//! entities and global objects from a [`HostWorld`], pages scenes out and in,
//! restores them (one scene or the whole world), and reads and writes save
//! archives.
//!
//! Archive layout:
//!
//! ```text
//! SAVE { VERS { u16 format, u32 data-model version },
//!        INFO { str title, i64 timestamp ms, blob thumbnail, blob custom },
//!        GLOB { .. }, SCNS { SCEN* } }
//! ```
//!
//! Restoring a scene runs three phases: respawn the scene's runtime entities
//! (registering their GUIDs), restore every stored entity's fields and core
//! state, then destroy the scene-defined entities recorded as destroyed. A
//! whole-world restore runs the respawn phase for every scene before any
//! scene's field phase, so references to runtime entities resolve no matter
//! which scene holds them.

use std::collections::BTreeMap;
use std::fs;
use std::io::{BufReader, Cursor, Read, Seek, Write};
use std::path::Path;

use cairn_archive::chunk::{ChunkReader, ChunkWriter, Magic};
use cairn_archive::codec::{ReadExt, WriteExt};
use cairn_schema::entity::EntityId;
use cairn_schema::metadata::ClassMetadata;
use cairn_schema::model::PersistableObject;
use cairn_schema::object::ObjectData;
use cairn_schema::reference::ReferenceResolver;
use cairn_schema::restore::{restore_object, RestoreOptions, RestoreStats};
use cairn_schema::store::store_object;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};

use crate::config::{RestoreMode, StateConfig};
use crate::core_state::{CoreApply, CoreState};
use crate::host::{EntityInfo, HostWorld};
use crate::resolver::{HostEncoder, RestoreLookups, SceneNames};
use crate::scene::{GlobalData, SceneData, SpawnedObject};
use crate::store::{write_atomic, LoadStatus, ReleaseHandle, SceneStore};
use crate::{Result, StateError};

pub const SAVE: Magic = Magic::new(*b"SAVE");
const VERSION: Magic = Magic::new(*b"VERS");
const INFO: Magic = Magic::new(*b"INFO");
const SCENES: Magic = Magic::new(*b"SCNS");

/// Save archive format written by this crate.
pub const FORMAT_VERSION: u16 = 1;

// ---------------------------------------------------------------------------
// Header and reports
// ---------------------------------------------------------------------------

/// Descriptive header of a save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveInfo {
    pub title: String,
    /// Set when the archive is written.
    pub timestamp: DateTime<Utc>,
    pub thumbnail: Vec<u8>,
    /// App-defined header bytes.
    pub custom: Vec<u8>,
}

/// Everything [`SaveState::read_save_info`] reads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SaveHeader {
    pub format_version: u16,
    pub user_data_model_version: u32,
    pub info: SaveInfo,
}

/// Outcome of a store call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreReport {
    pub stored: usize,
    /// Entities left out, e.g. runtime entities without a GUID.
    pub skipped: usize,
}

/// Outcome of a restore call.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RestoreReport {
    /// Field-level statistics summed over all restored objects.
    pub properties: RestoreStats,
    pub restored_entities: usize,
    pub respawned: usize,
    pub destroyed: usize,
    /// Entities whose restore failed and that were left as they were.
    pub failed_entities: usize,
    /// Core state records that could not be decoded.
    pub corrupt_core_records: usize,
}

impl RestoreReport {
    pub fn merge(&mut self, other: &RestoreReport) {
        self.properties.merge(&other.properties);
        self.restored_entities += other.restored_entities;
        self.respawned += other.respawned;
        self.destroyed += other.destroyed;
        self.failed_entities += other.failed_entities;
        self.corrupt_core_records += other.corrupt_core_records;
    }
}

// ---------------------------------------------------------------------------
// SaveState
// ---------------------------------------------------------------------------

/// Persistent state of one world: global objects, every scene, and the save
/// header.
///
/// Scene-level operations lock only the scene they touch, so different
/// scenes can be stored, restored and paged from different threads.
#[derive(Debug)]
pub struct SaveState {
    config: StateConfig,
    info: RwLock<SaveInfo>,
    global: Mutex<GlobalData>,
    scenes: SceneStore,
    names: RwLock<SceneNames>,
}

impl SaveState {
    /// Create an empty state. Stale shards in the configured directory are
    /// deleted.
    pub fn new(config: StateConfig) -> Result<Self> {
        let scenes = SceneStore::new(&config.shard_dir)?;
        Ok(Self {
            config,
            info: RwLock::new(SaveInfo::default()),
            global: Mutex::new(GlobalData::default()),
            scenes,
            names: RwLock::new(SceneNames::default()),
        })
    }

    pub fn config(&self) -> &StateConfig {
        &self.config
    }

    fn restore_options(&self) -> RestoreOptions {
        RestoreOptions {
            path: self.config.restore_path,
            user_data_model_version: self.config.user_data_model_version,
        }
    }

    fn lookups(&self, host: &dyn HostWorld) -> RestoreLookups {
        RestoreLookups::from_host(host, &self.names.read(), &self.config.instancing_suffixes)
    }

    // -- header ---------------------------------------------------------------

    pub fn info(&self) -> SaveInfo {
        self.info.read().clone()
    }

    pub fn set_title(&self, title: impl Into<String>) {
        self.info.write().title = title.into();
    }

    pub fn set_thumbnail(&self, thumbnail: Vec<u8>) {
        self.info.write().thumbnail = thumbnail;
    }

    pub fn set_custom_info(&self, custom: Vec<u8>) {
        self.info.write().custom = custom;
    }

    // -- scene names ----------------------------------------------------------

    /// Store `host_scene`'s data under `name`, e.g. to give each instance of
    /// a reused scene its own identity.
    pub fn assign_scene_name(&self, host_scene: &str, name: &str) {
        self.names.write().assign(host_scene, name);
    }

    pub fn unassign_scene_name(&self, host_scene: &str) -> bool {
        self.names.write().unassign(host_scene)
    }

    pub fn clear_assigned_scene_names(&self) {
        self.names.write().clear();
    }

    /// Name the data of `host_scene` is stored under.
    pub fn persistent_scene_name(&self, host_scene: &str) -> String {
        self.names.read().persistent_name(host_scene).to_owned()
    }

    /// Stored scenes, or only those currently in memory.
    pub fn scene_names(&self, loaded_only: bool) -> Vec<String> {
        if loaded_only {
            self.scenes.resident_names()
        } else {
            self.scenes.scene_names()
        }
    }

    pub fn scene_status(&self, scene: &str) -> Option<LoadStatus> {
        self.scenes.status(scene)
    }

    // -- store ----------------------------------------------------------------

    /// Store every live entity of `host_scene`, replacing what was stored for
    /// the scene before. Destroyed-entity records are kept. With `release`
    /// the scene is paged out afterwards on the calling thread.
    pub fn store_scene(
        &self,
        host: &dyn HostWorld,
        host_scene: &str,
        release: bool,
    ) -> Result<StoreReport> {
        let names = self.names.read();
        let scene = names.persistent_name(host_scene).to_owned();
        let report = self.scenes.with_scene(&scene, |data| {
            data.clear_entities();
            data.meta
                .set_user_data_model_version(self.config.user_data_model_version);
            let encoder = HostEncoder::new(host, &names, Some(&scene));
            let mut report = StoreReport::default();
            for id in host.scene_entities(host_scene) {
                if store_entity_into(host, &encoder, data, id)? {
                    report.stored += 1;
                } else {
                    report.skipped += 1;
                }
            }
            Ok(report)
        })?;
        drop(names);

        tracing::debug!(
            scene = %scene,
            stored = report.stored,
            skipped = report.skipped,
            "stored scene"
        );
        if release {
            self.scenes.release(&scene)?;
        }
        Ok(report)
    }

    /// Store one entity into its scene. `Ok(false)` if it was skipped.
    pub fn store_entity(&self, host: &dyn HostWorld, id: EntityId) -> Result<bool> {
        let info = host
            .entity_info(id)
            .ok_or(StateError::UnknownEntity { entity: id })?;
        let names = self.names.read();
        let scene = names.persistent_name(&info.scene).to_owned();
        self.scenes.with_scene(&scene, |data| {
            data.meta
                .set_user_data_model_version(self.config.user_data_model_version);
            let encoder = HostEncoder::new(host, &names, Some(&scene));
            store_entity_into(host, &encoder, data, id)
        })
    }

    /// Record that an entity was destroyed. Scene-defined entities are
    /// remembered so restore destroys them again; runtime entities are simply
    /// forgotten.
    pub fn store_entity_destroyed(&self, host: &dyn HostWorld, id: EntityId) -> Result<()> {
        let info = host
            .entity_info(id)
            .ok_or(StateError::UnknownEntity { entity: id })?;
        let scene = self.persistent_scene_name(&info.scene);
        self.scenes.with_scene(&scene, |data| {
            if info.respawns() {
                if let Some(guid) = info.guid {
                    data.spawned.remove(&guid);
                }
            } else {
                data.objects.remove(&info.local_name);
                if !info.is_runtime() {
                    data.destroyed.insert(info.local_name.clone());
                }
            }
            Ok(())
        })
    }

    /// Store a global object under `id`.
    pub fn store_global_object(
        &self,
        host: &dyn HostWorld,
        id: &str,
        obj: &dyn PersistableObject,
    ) -> Result<()> {
        let names = self.names.read();
        let encoder = HostEncoder::new(host, &names, None);
        let mut global = self.global.lock();
        global
            .meta
            .set_user_data_model_version(self.config.user_data_model_version);
        let data = store_object(obj, &mut global.meta, &encoder)?;
        global.objects.insert(id.to_owned(), data);
        Ok(())
    }

    // -- paging ---------------------------------------------------------------

    /// Page a stored scene out to its shard. Blocking releases return
    /// `Ok(None)`; otherwise the work runs on a background thread.
    pub fn release_scene(&self, scene: &str, blocking: bool) -> Result<Option<ReleaseHandle>> {
        if blocking {
            self.scenes.release(scene)?;
            Ok(None)
        } else {
            self.scenes.release_in_background(scene)
        }
    }

    /// Release every stored scene. Background handles are returned in scene
    /// order.
    pub fn release_all(&self, blocking: bool) -> Result<Vec<ReleaseHandle>> {
        let mut handles = Vec::new();
        for scene in self.scenes.scene_names() {
            if let Some(handle) = self.release_scene(&scene, blocking)? {
                handles.push(handle);
            }
        }
        Ok(handles)
    }

    /// Page a scene in ahead of restoring it. `Ok(false)` if it was already
    /// resident or has no stored state.
    pub fn preload_scene(&self, scene: &str) -> Result<bool> {
        self.scenes.load(scene)
    }

    // -- restore --------------------------------------------------------------

    /// Restore one scene in the configured [`RestoreMode`].
    pub fn restore_scene(&self, host: &mut dyn HostWorld, host_scene: &str) -> Result<RestoreReport> {
        self.restore_scene_with(host, host_scene, self.config.restore_mode)
    }

    pub fn restore_scene_with(
        &self,
        host: &mut dyn HostWorld,
        host_scene: &str,
        mode: RestoreMode,
    ) -> Result<RestoreReport> {
        let mut lookups = self.lookups(&*host);
        let scene = self.persistent_scene_name(host_scene);
        let mut report = RestoreReport::default();
        let found = self.scenes.with_existing(&scene, |data| {
            respawn_phase(host, host_scene, data, &mut lookups, &mut report);
            self.field_phase(host, host_scene, data, &lookups, mode, &mut report);
            Ok(())
        })?;
        if found.is_none() {
            tracing::debug!(scene = %scene, "no stored state for scene");
        }
        Ok(report)
    }

    /// Restore every loaded scene of the host in the configured mode.
    pub fn restore_world(&self, host: &mut dyn HostWorld) -> Result<RestoreReport> {
        self.restore_world_with(host, self.config.restore_mode)
    }

    pub fn restore_world_with(&self, host: &mut dyn HostWorld, mode: RestoreMode) -> Result<RestoreReport> {
        let host_scenes = host.scenes();
        let mut lookups = self.lookups(&*host);
        let mut report = RestoreReport::default();

        for host_scene in &host_scenes {
            let scene = self.persistent_scene_name(host_scene);
            self.scenes.with_existing(&scene, |data| {
                respawn_phase(host, host_scene, data, &mut lookups, &mut report);
                Ok(())
            })?;
        }
        for host_scene in &host_scenes {
            let scene = self.persistent_scene_name(host_scene);
            self.scenes.with_existing(&scene, |data| {
                self.field_phase(host, host_scene, data, &lookups, mode, &mut report);
                Ok(())
            })?;
        }
        tracing::debug!(
            scenes = host_scenes.len(),
            restored = report.restored_entities,
            respawned = report.respawned,
            "restored world"
        );
        Ok(report)
    }

    /// Restore a single live entity from its scene's stored data.
    /// `Ok(None)` if nothing is stored for it.
    pub fn restore_entity(&self, host: &mut dyn HostWorld, id: EntityId) -> Result<Option<RestoreReport>> {
        let info = host
            .entity_info(id)
            .ok_or(StateError::UnknownEntity { entity: id })?;
        let lookups = self.lookups(&*host);
        let scene = self.persistent_scene_name(&info.scene);
        let options = self.restore_options();
        let mode = self.config.restore_mode;
        let restored = self.scenes.with_existing(&scene, |data| {
            let Some(stored) = stored_for(data, &info) else {
                return Ok(None);
            };
            let mut report = RestoreReport::default();
            let resolver = lookups.resolver(Some(&scene));
            restore_entity_data(host, id, &info, stored, &data.meta, &resolver, &options, mode, &mut report);
            Ok(Some(report))
        })?;
        Ok(restored.flatten())
    }

    /// Restore a global object stored under `id`. `Ok(None)` if nothing is
    /// stored under it.
    pub fn restore_global_object(
        &self,
        host: &dyn HostWorld,
        id: &str,
        obj: &mut dyn PersistableObject,
    ) -> Result<Option<RestoreStats>> {
        let lookups = self.lookups(host);
        let global = self.global.lock();
        let Some(data) = global.objects.get(id) else {
            return Ok(None);
        };
        let stats = restore_object(
            obj,
            data,
            &global.meta,
            &lookups.resolver(None),
            &self.restore_options(),
        )?;
        Ok(Some(stats))
    }

    /// Restore the fields and core state of every stored entity of a scene,
    /// then destroy what was recorded as destroyed.
    fn field_phase(
        &self,
        host: &mut dyn HostWorld,
        host_scene: &str,
        data: &SceneData,
        lookups: &RestoreLookups,
        mode: RestoreMode,
        report: &mut RestoreReport,
    ) {
        let options = self.restore_options();
        let resolver = lookups.resolver(Some(&data.name));
        let mut doomed = Vec::new();
        for id in host.scene_entities(host_scene) {
            let Some(info) = host.entity_info(id) else {
                continue;
            };
            if !info.is_runtime() && data.destroyed.contains(&info.local_name) {
                doomed.push(id);
                continue;
            }
            if let Some(stored) = stored_for(data, &info) {
                restore_entity_data(host, id, &info, stored, &data.meta, &resolver, &options, mode, report);
            }
        }
        for id in doomed {
            if host.destroy_entity(id) {
                report.destroyed += 1;
            }
        }
    }

    // -- archive --------------------------------------------------------------

    /// Write the whole state as one archive. Paged-out scenes are copied from
    /// their shards without decoding. Stamps the header's timestamp.
    pub fn save_to_archive<W: Write + Seek>(&self, out: W) -> Result<W> {
        let info = {
            let mut info = self.info.write();
            // Millisecond precision, as stored.
            info.timestamp = DateTime::from_timestamp_millis(Utc::now().timestamp_millis())
                .unwrap_or_default();
            info.clone()
        };
        let mut w = ChunkWriter::new(out);
        w.chunk(SAVE, |w| -> Result<()> {
            w.chunk(VERSION, |w| -> Result<()> {
                w.put_u16(FORMAT_VERSION)?;
                w.put_u32(self.config.user_data_model_version)?;
                Ok(())
            })?;
            write_info(w, &info)?;
            self.global.lock().write_to(w)?;
            w.chunk(SCENES, |w| -> Result<()> {
                for scene in self.scenes.scene_names() {
                    self.scenes.write_scene(&scene, w)?;
                }
                Ok(())
            })
        })?;
        Ok(w.into_inner()?)
    }

    /// Replace the whole state with an archive's contents.
    ///
    /// With `full_load` every scene is decoded and resident afterwards.
    /// Otherwise each scene chunk is written straight to its shard and stays
    /// paged out until it is needed.
    pub fn load_from_archive<R: Read + Seek>(&self, input: R, full_load: bool) -> Result<SaveHeader> {
        self.scenes.clear()?;
        *self.global.lock() = GlobalData::default();

        let mut r = ChunkReader::new(input)?;
        let header = r.chunk(SAVE, |r| -> Result<SaveHeader> {
            let (format_version, user_data_model_version) = read_version(r)?;
            let info = read_info(r)?;
            let global = GlobalData::read_from(r)?;
            let count = r.chunk(SCENES, |r| -> Result<usize> {
                let mut count = 0;
                while r.has_more()? {
                    let raw = r.read_next_raw()?;
                    if full_load {
                        self.scenes.insert_resident(SceneData::from_bytes(&raw)?);
                    } else {
                        let name = SceneData::peek_name(&raw)?;
                        self.scenes.insert_paged_out(&name, &raw)?;
                    }
                    count += 1;
                }
                Ok(count)
            })?;
            *self.global.lock() = global;
            tracing::debug!(scenes = count, full_load, "loaded save archive");
            Ok(SaveHeader {
                format_version,
                user_data_model_version,
                info,
            })
        })?;
        *self.info.write() = header.info.clone();
        Ok(header)
    }

    /// Read only the version and info chunks of an archive.
    pub fn read_save_info<R: Read + Seek>(input: R) -> Result<SaveHeader> {
        let mut r = ChunkReader::new(input)?;
        r.begin(SAVE)?;
        let (format_version, user_data_model_version) = read_version(&mut r)?;
        let info = read_info(&mut r)?;
        Ok(SaveHeader {
            format_version,
            user_data_model_version,
            info,
        })
    }

    /// [`save_to_archive`](Self::save_to_archive) into a file, replacing it
    /// atomically.
    pub fn save_to_file(&self, path: impl AsRef<Path>) -> Result<()> {
        let bytes = self.save_to_archive(Cursor::new(Vec::new()))?.into_inner();
        write_atomic(path.as_ref(), &bytes)
    }

    pub fn load_from_file(&self, path: impl AsRef<Path>, full_load: bool) -> Result<SaveHeader> {
        let path = path.as_ref();
        let file = fs::File::open(path).map_err(|source| StateError::File {
            path: path.to_path_buf(),
            source,
        })?;
        self.load_from_archive(BufReader::new(file), full_load)
    }

    /// BLAKE3 hex digest of a scene's shard-format bytes.
    pub fn scene_digest(&self, scene: &str) -> Result<Option<String>> {
        Ok(self
            .scenes
            .scene_bytes(scene)?
            .map(|bytes| blake3::hash(&bytes).to_hex().to_string()))
    }

    // -- maintenance ----------------------------------------------------------

    /// Delete one scene's state and shard.
    pub fn clear_scene(&self, scene: &str) -> Result<bool> {
        self.scenes.remove(scene)
    }

    /// Forget everything and delete every shard. Scene name assignments are
    /// kept.
    pub fn reset(&self) -> Result<()> {
        self.scenes.clear()?;
        *self.global.lock() = GlobalData::default();
        *self.info.write() = SaveInfo::default();
        Ok(())
    }

    /// Rename a class in the global scope and in every scene.
    pub fn rename_class(&self, old: &str, new: &str) -> Result<bool> {
        let global = self.global.lock().meta.rename_class(old, new);
        let scenes = self
            .scenes
            .modify_each(|data| data.meta.rename_class(old, new))?;
        Ok(global || scenes)
    }

    /// Rename a field of `class` in the global scope and in every scene. See
    /// [`ClassMetadata::rename_field`].
    pub fn rename_field(
        &self,
        class: &str,
        old: &str,
        new: &str,
        old_prefix_path: &str,
        new_prefix_path: &str,
    ) -> Result<bool> {
        let rename = |meta: &mut ClassMetadata| {
            meta.rename_field(class, old, new, old_prefix_path, new_prefix_path)
        };
        let global = rename(&mut self.global.lock().meta);
        let scenes = self.scenes.modify_each(|data| rename(&mut data.meta))?;
        Ok(global || scenes)
    }

    pub fn rename_global_object(&self, old: &str, new: &str) -> bool {
        rename_key(&mut self.global.lock().objects, old, new)
    }

    /// Rename a scene-defined entity's stored data (and destroyed record).
    pub fn rename_scene_object(&self, scene: &str, old: &str, new: &str) -> Result<bool> {
        let renamed = self.scenes.with_existing(scene, |data| {
            let mut changed = rename_key(&mut data.objects, old, new);
            if data.destroyed.remove(old) {
                data.destroyed.insert(new.to_owned());
                changed = true;
            }
            Ok(changed)
        })?;
        Ok(renamed.unwrap_or(false))
    }
}

// ---------------------------------------------------------------------------
// Store helpers
// ---------------------------------------------------------------------------

/// Store one entity into `data`. `Ok(false)` if it cannot be stored.
fn store_entity_into(
    host: &dyn HostWorld,
    encoder: &HostEncoder<'_>,
    data: &mut SceneData,
    id: EntityId,
) -> Result<bool> {
    let Some(info) = host.entity_info(id) else {
        tracing::warn!(entity = %id, "entity vanished from the host -- skipping");
        return Ok(false);
    };
    let Some(obj) = host.object(id) else {
        tracing::warn!(entity = %id, name = %info.local_name, "entity has no persistable object -- skipping");
        return Ok(false);
    };
    let respawn_guid = if info.respawns() {
        match info.guid {
            Some(guid) => Some(guid),
            None => {
                tracing::warn!(
                    scene = %info.scene,
                    name = %info.local_name,
                    "runtime entity has no GUID and cannot be respawned -- skipping"
                );
                return Ok(false);
            }
        }
    } else {
        None
    };

    let mut stored = store_object(obj, &mut data.meta, encoder)?;
    if let Some(core) = host.capture_core_state(id) {
        stored.core = core.encode()?;
    }
    match respawn_guid {
        Some(guid) => {
            let class = data.meta.find_or_add_class(obj.class_name());
            data.spawned.insert(
                guid,
                SpawnedObject {
                    class,
                    data: stored,
                },
            );
        }
        None => {
            data.objects.insert(info.local_name, stored);
        }
    }
    Ok(true)
}

fn rename_key<V>(map: &mut BTreeMap<String, V>, old: &str, new: &str) -> bool {
    if old == new || !map.contains_key(old) {
        return false;
    }
    if map.contains_key(new) {
        tracing::warn!(old, new, "rename target already has stored data -- leaving both");
        return false;
    }
    match map.remove(old) {
        Some(value) => {
            map.insert(new.to_owned(), value);
            true
        }
        None => false,
    }
}

// ---------------------------------------------------------------------------
// Restore helpers
// ---------------------------------------------------------------------------

fn stored_for<'a>(data: &'a SceneData, info: &EntityInfo) -> Option<&'a ObjectData> {
    if info.respawns() {
        info.guid
            .and_then(|guid| data.spawned.get(&guid))
            .map(|spawned| &spawned.data)
    } else {
        data.objects.get(&info.local_name)
    }
}

/// Recreate the scene's runtime entities that are not live yet.
fn respawn_phase(
    host: &mut dyn HostWorld,
    host_scene: &str,
    data: &SceneData,
    lookups: &mut RestoreLookups,
    report: &mut RestoreReport,
) {
    for (guid, spawned) in &data.spawned {
        if lookups.find_guid(*guid).is_some() {
            continue;
        }
        let Some(class) = data.meta.class_name(spawned.class) else {
            tracing::error!(
                scene = %data.name,
                %guid,
                class_id = spawned.class.raw(),
                "spawned entity has no class name in the metadata -- not respawned"
            );
            report.failed_entities += 1;
            continue;
        };
        match host.spawn_entity(host_scene, class, *guid) {
            Some(id) => {
                let local = host
                    .entity_info(id)
                    .map(|info| info.local_name)
                    .unwrap_or_default();
                lookups.register(&data.name, &local, Some(*guid), id);
                report.respawned += 1;
                tracing::trace!(scene = %data.name, %guid, class, "respawned entity");
            }
            None => {
                tracing::warn!(scene = %data.name, %guid, class, "host could not spawn entity");
                report.failed_entities += 1;
            }
        }
    }
}

/// Which core-state parts apply to an entity.
fn core_apply(info: &EntityInfo, mode: RestoreMode) -> CoreApply {
    if info.player_controlled && mode == RestoreMode::SceneTransition {
        return CoreApply::NONE;
    }
    let pose = !info.skip_transform;
    CoreApply {
        pose,
        velocity: pose && !info.skip_velocity,
        control_rotation: true,
    }
}

#[allow(clippy::too_many_arguments)]
fn restore_entity_data(
    host: &mut dyn HostWorld,
    id: EntityId,
    info: &EntityInfo,
    stored: &ObjectData,
    meta: &ClassMetadata,
    resolver: &dyn ReferenceResolver,
    options: &RestoreOptions,
    mode: RestoreMode,
    report: &mut RestoreReport,
) {
    if !stored.core.is_empty() {
        match CoreState::decode(&stored.core) {
            Ok(core) => host.apply_core_state(id, &core, core_apply(info, mode)),
            Err(err) => {
                tracing::error!(
                    scene = %info.scene,
                    name = %info.local_name,
                    error = %err,
                    "core state not restored"
                );
                report.corrupt_core_records += 1;
            }
        }
    }

    let Some(obj) = host.object_mut(id) else {
        tracing::warn!(entity = %id, name = %info.local_name, "entity has no persistable object -- skipping");
        report.failed_entities += 1;
        return;
    };
    match restore_object(obj, stored, meta, resolver, options) {
        Ok(stats) => {
            report.properties.merge(&stats);
            report.restored_entities += 1;
        }
        Err(err) => {
            tracing::warn!(
                scene = %info.scene,
                name = %info.local_name,
                error = %err,
                "entity restore failed -- leaving it as is"
            );
            report.failed_entities += 1;
        }
    }
}

// ---------------------------------------------------------------------------
// Header chunks
// ---------------------------------------------------------------------------

fn write_info<W: Write + Seek>(w: &mut ChunkWriter<W>, info: &SaveInfo) -> Result<()> {
    w.chunk(INFO, |w| -> Result<()> {
        w.put_str(&info.title)?;
        w.put_i64(info.timestamp.timestamp_millis())?;
        w.put_blob(&info.thumbnail)?;
        w.put_blob(&info.custom)?;
        Ok(())
    })
}

fn read_info<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<SaveInfo> {
    r.chunk(INFO, |r| -> Result<SaveInfo> {
        let title = r.get_string()?;
        let millis = r.get_i64()?;
        let thumbnail = r.get_blob()?;
        let custom = r.get_blob()?;
        Ok(SaveInfo {
            title,
            timestamp: DateTime::from_timestamp_millis(millis).unwrap_or_default(),
            thumbnail,
            custom,
        })
    })
}

fn read_version<R: Read + Seek>(r: &mut ChunkReader<R>) -> Result<(u16, u32)> {
    r.chunk(VERSION, |r| -> Result<(u16, u32)> {
        let format = r.get_u16()?;
        if format != FORMAT_VERSION {
            return Err(StateError::UnsupportedFormat {
                found: format,
                supported: FORMAT_VERSION,
            });
        }
        Ok((format, r.get_u32()?))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn assert_send_sync<T: Send + Sync>() {}

    #[test]
    fn save_state_is_shareable_across_threads() {
        assert_send_sync::<SaveState>();
    }

    #[test]
    fn player_pawns_keep_their_pose_on_scene_transition() {
        let mut info = EntityInfo::runtime("Alpha", "Pawn_0", None);
        info.player_controlled = true;
        assert_eq!(core_apply(&info, RestoreMode::SceneTransition), CoreApply::NONE);
        assert_eq!(core_apply(&info, RestoreMode::LoadingGame), CoreApply::ALL);
    }

    #[test]
    fn skipped_transform_also_skips_velocity() {
        let mut info = EntityInfo::scene_defined("Alpha", "Lift");
        info.skip_transform = true;
        let apply = core_apply(&info, RestoreMode::LoadingGame);
        assert!(!apply.pose && !apply.velocity && apply.control_rotation);

        info.skip_transform = false;
        info.skip_velocity = true;
        let apply = core_apply(&info, RestoreMode::LoadingGame);
        assert!(apply.pose && !apply.velocity);
    }

    #[test]
    fn rename_key_refuses_to_overwrite() {
        let mut map = BTreeMap::new();
        map.insert("a".to_string(), 1);
        map.insert("b".to_string(), 2);
        assert!(!rename_key(&mut map, "a", "b"));
        assert!(rename_key(&mut map, "a", "c"));
        assert!(!rename_key(&mut map, "a", "d"));
        assert_eq!(map.get("c"), Some(&1));
    }

    #[test]
    fn info_chunk_keeps_millisecond_timestamps() {
        let info = SaveInfo {
            title: "Harbor at dusk".into(),
            timestamp: DateTime::from_timestamp_millis(1_700_000_123_456).unwrap(),
            thumbnail: vec![0x89, 0x50],
            custom: b"slot=3".to_vec(),
        };
        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        write_info(&mut w, &info).unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let back = read_info(&mut ChunkReader::new(Cursor::new(bytes)).unwrap()).unwrap();
        assert_eq!(back, info);
    }

    #[test]
    fn unsupported_format_is_rejected() {
        let mut w = ChunkWriter::new(Cursor::new(Vec::new()));
        w.chunk(VERSION, |w| -> Result<()> {
            w.put_u16(FORMAT_VERSION + 1)?;
            w.put_u32(0)?;
            Ok(())
        })
        .unwrap();
        let bytes = w.into_inner().unwrap().into_inner();
        let err = read_version(&mut ChunkReader::new(Cursor::new(bytes)).unwrap()).unwrap_err();
        assert!(matches!(err, StateError::UnsupportedFormat { found: 2, supported: 1 }));
    }
}
