//! Paged scene store.
//!
//! Every scene lives in its own slot behind its own mutex, so streaming
//! threads can page different scenes in and out concurrently while one scene
//! is never stored, restored and released at the same time. The registry of
//! slots takes a lock only long enough to add, look up or remove a slot.
//!
//! A paged-out scene exists only as its shard file: the `SCEN` chunk written
//! by [`SceneData::write_to`]. Shards are written to a temporary file first and
//! renamed into place, so a crash mid-write leaves the previous shard intact.

use std::collections::BTreeMap;
use std::fs;
use std::io::{Seek, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use cairn_archive::chunk::ChunkWriter;
use parking_lot::{Mutex, RwLock};

use crate::scene::SceneData;
use crate::{Result, StateError};

/// Extension of shard files. Only files with it are ever purged.
pub const SHARD_EXTENSION: &str = "scene";

/// Whether a scene's data is in memory.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadStatus {
    Resident,
    PagedOut,
}

#[derive(Debug)]
struct SceneSlot {
    status: LoadStatus,
    /// Empty apart from the name while paged out.
    data: SceneData,
    shard: PathBuf,
    /// Set once the slot left the registry. A release still holding the slot
    /// must not write its shard back.
    removed: bool,
}

impl SceneSlot {
    fn page_in(&mut self) -> Result<bool> {
        if self.status == LoadStatus::Resident {
            return Ok(false);
        }
        let bytes = fs::read(&self.shard).map_err(|source| StateError::File {
            path: self.shard.clone(),
            source,
        })?;
        let data = SceneData::from_bytes(&bytes)?;
        if data.name != self.data.name {
            return Err(StateError::CorruptScene {
                scene: self.data.name.clone(),
                details: format!("shard holds scene '{}'", data.name),
            });
        }
        self.data = data;
        self.status = LoadStatus::Resident;
        tracing::debug!(scene = %self.data.name, "paged scene in");
        Ok(true)
    }

    fn page_out(&mut self) -> Result<bool> {
        if self.removed {
            tracing::debug!(scene = %self.data.name, "scene was removed -- not paging out");
            return Ok(false);
        }
        if self.status == LoadStatus::PagedOut {
            return Ok(false);
        }
        let bytes = self.data.to_bytes()?;
        write_atomic(&self.shard, &bytes)?;
        let name = std::mem::take(&mut self.data.name);
        self.data = SceneData::new(name);
        self.status = LoadStatus::PagedOut;
        tracing::debug!(scene = %self.data.name, bytes = bytes.len(), "paged scene out");
        Ok(true)
    }

    fn bytes(&self) -> Result<Vec<u8>> {
        match self.status {
            LoadStatus::Resident => self.data.to_bytes(),
            LoadStatus::PagedOut => fs::read(&self.shard).map_err(|source| StateError::File {
                path: self.shard.clone(),
                source,
            }),
        }
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let tmp_path = path.with_extension("tmp");
    let shard_err = |source: std::io::Error| StateError::File {
        path: path.to_path_buf(),
        source,
    };
    let mut tmp = fs::File::create(&tmp_path).map_err(shard_err)?;
    tmp.write_all(bytes).map_err(shard_err)?;
    tmp.sync_all().map_err(shard_err)?;
    drop(tmp);
    fs::rename(&tmp_path, path).map_err(shard_err)?;
    Ok(())
}

// ---------------------------------------------------------------------------
// ReleaseHandle
// ---------------------------------------------------------------------------

/// A scene release running on a background thread.
#[derive(Debug)]
pub struct ReleaseHandle {
    scene: String,
    handle: JoinHandle<Result<bool>>,
}

impl ReleaseHandle {
    pub fn scene(&self) -> &str {
        &self.scene
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Wait for the release. `Ok(true)` if the scene was paged out by it.
    pub fn join(self) -> Result<bool> {
        self.handle
            .join()
            .map_err(|_| StateError::ReleasePanicked { scene: self.scene })?
    }
}

// ---------------------------------------------------------------------------
// SceneStore
// ---------------------------------------------------------------------------

/// All scenes of one save state, each resident or paged out.
#[derive(Debug)]
pub struct SceneStore {
    shard_dir: PathBuf,
    slots: RwLock<BTreeMap<String, Arc<Mutex<SceneSlot>>>>,
}

impl SceneStore {
    /// Open a store over `shard_dir`, creating it and deleting shards left
    /// behind by earlier runs.
    pub fn new(shard_dir: impl Into<PathBuf>) -> Result<Self> {
        let store = Self {
            shard_dir: shard_dir.into(),
            slots: RwLock::new(BTreeMap::new()),
        };
        fs::create_dir_all(&store.shard_dir)?;
        store.purge_shards()?;
        Ok(store)
    }

    pub fn shard_dir(&self) -> &Path {
        &self.shard_dir
    }

    /// Shard file of a scene: its name made filesystem-safe plus a short
    /// digest of the full name, so distinct names never share a file.
    pub fn shard_path(&self, scene: &str) -> PathBuf {
        let safe: String = scene
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '_' { c } else { '_' })
            .collect();
        let digest = blake3::hash(scene.as_bytes()).to_hex();
        self.shard_dir
            .join(format!("{}-{}.{SHARD_EXTENSION}", safe, &digest[..16]))
    }

    fn slot(&self, scene: &str) -> Option<Arc<Mutex<SceneSlot>>> {
        self.slots.read().get(scene).cloned()
    }

    fn slot_or_create(&self, scene: &str) -> Arc<Mutex<SceneSlot>> {
        if let Some(slot) = self.slot(scene) {
            return slot;
        }
        let shard = self.shard_path(scene);
        self.slots
            .write()
            .entry(scene.to_owned())
            .or_insert_with(|| {
                Arc::new(Mutex::new(SceneSlot {
                    status: LoadStatus::Resident,
                    data: SceneData::new(scene),
                    shard,
                    removed: false,
                }))
            })
            .clone()
    }

    // -- access ---------------------------------------------------------------

    /// Run `f` on a scene's data, creating the scene if needed and paging it
    /// in if it is out. The scene stays locked for the whole call.
    pub fn with_scene<T>(&self, scene: &str, f: impl FnOnce(&mut SceneData) -> Result<T>) -> Result<T> {
        let slot = self.slot_or_create(scene);
        let mut slot = slot.lock();
        slot.page_in()?;
        f(&mut slot.data)
    }

    /// Like [`with_scene`](Self::with_scene), but `Ok(None)` for a scene with
    /// no stored state.
    pub fn with_existing<T>(
        &self,
        scene: &str,
        f: impl FnOnce(&mut SceneData) -> Result<T>,
    ) -> Result<Option<T>> {
        let Some(slot) = self.slot(scene) else {
            return Ok(None);
        };
        let mut slot = slot.lock();
        slot.page_in()?;
        f(&mut slot.data).map(Some)
    }

    /// Run `f` on every scene. Scenes that were paged out and that `f`
    /// reports as changed are paged back out afterwards.
    pub fn modify_each(&self, mut f: impl FnMut(&mut SceneData) -> bool) -> Result<bool> {
        let mut any = false;
        for slot in self.all_slots() {
            let mut slot = slot.lock();
            let was_out = slot.status == LoadStatus::PagedOut;
            slot.page_in()?;
            let changed = f(&mut slot.data);
            if was_out {
                if changed {
                    slot.page_out()?;
                } else {
                    // Unchanged: the shard on disk is still accurate.
                    let name = std::mem::take(&mut slot.data.name);
                    slot.data = SceneData::new(name);
                    slot.status = LoadStatus::PagedOut;
                }
            }
            any |= changed;
        }
        Ok(any)
    }

    fn all_slots(&self) -> Vec<Arc<Mutex<SceneSlot>>> {
        self.slots.read().values().cloned().collect()
    }

    pub fn contains(&self, scene: &str) -> bool {
        self.slots.read().contains_key(scene)
    }

    pub fn status(&self, scene: &str) -> Option<LoadStatus> {
        self.slot(scene).map(|slot| slot.lock().status)
    }

    pub fn scene_names(&self) -> Vec<String> {
        self.slots.read().keys().cloned().collect()
    }

    /// Scenes currently in memory.
    pub fn resident_names(&self) -> Vec<String> {
        let slots: Vec<_> = self
            .slots
            .read()
            .iter()
            .map(|(name, slot)| (name.clone(), Arc::clone(slot)))
            .collect();
        slots
            .into_iter()
            .filter(|(_, slot)| slot.lock().status == LoadStatus::Resident)
            .map(|(name, _)| name)
            .collect()
    }

    // -- paging -------------------------------------------------------------

    /// Page a scene in. `Ok(false)` if it was already resident or unknown.
    pub fn load(&self, scene: &str) -> Result<bool> {
        let Some(slot) = self.slot(scene) else {
            return Ok(false);
        };
        let mut slot = slot.lock();
        slot.page_in()
    }

    /// Write a resident scene to its shard and free its data on the calling
    /// thread. `Ok(false)` if there was nothing to release.
    pub fn release(&self, scene: &str) -> Result<bool> {
        let Some(slot) = self.slot(scene) else {
            return Ok(false);
        };
        let mut slot = slot.lock();
        slot.page_out()
    }

    /// Release a scene on a named background thread. `Ok(None)` for an
    /// unknown scene.
    pub fn release_in_background(&self, scene: &str) -> Result<Option<ReleaseHandle>> {
        let Some(slot) = self.slot(scene) else {
            return Ok(None);
        };
        let handle = thread::Builder::new()
            .name(format!("cairn-release-{scene}"))
            .spawn(move || {
                let mut slot = slot.lock();
                slot.page_out()
            })?;
        Ok(Some(ReleaseHandle {
            scene: scene.to_owned(),
            handle,
        }))
    }

    // -- archive exchange ---------------------------------------------------

    /// Append a scene's `SCEN` chunk to `w`. Paged-out scenes are copied from
    /// their shard without decoding.
    pub fn write_scene<W: Write + Seek>(&self, scene: &str, w: &mut ChunkWriter<W>) -> Result<bool> {
        let Some(slot) = self.slot(scene) else {
            return Ok(false);
        };
        let slot = slot.lock();
        match slot.status {
            LoadStatus::Resident => slot.data.write_to(w)?,
            LoadStatus::PagedOut => {
                w.write_raw_chunk(&slot.bytes()?)?;
            }
        }
        Ok(true)
    }

    /// Shard-format bytes of a scene, whatever its status.
    pub fn scene_bytes(&self, scene: &str) -> Result<Option<Vec<u8>>> {
        let Some(slot) = self.slot(scene) else {
            return Ok(None);
        };
        let slot = slot.lock();
        slot.bytes().map(Some)
    }

    /// Add a scene straight from its raw chunk, leaving it paged out.
    pub fn insert_paged_out(&self, scene: &str, raw: &[u8]) -> Result<()> {
        let shard = self.shard_path(scene);
        write_atomic(&shard, raw)?;
        let slot = SceneSlot {
            status: LoadStatus::PagedOut,
            data: SceneData::new(scene),
            shard,
            removed: false,
        };
        self.slots
            .write()
            .insert(scene.to_owned(), Arc::new(Mutex::new(slot)));
        Ok(())
    }

    /// Add a decoded scene as resident, replacing any previous state.
    pub fn insert_resident(&self, data: SceneData) {
        let slot = SceneSlot {
            status: LoadStatus::Resident,
            shard: self.shard_path(&data.name),
            data,
            removed: false,
        };
        self.slots
            .write()
            .insert(slot.data.name.clone(), Arc::new(Mutex::new(slot)));
    }

    // -- removal --------------------------------------------------------------

    /// Drop a scene's state and its shard. Waits for any operation holding
    /// the scene's lock.
    pub fn remove(&self, scene: &str) -> Result<bool> {
        let Some(slot) = self.slots.write().remove(scene) else {
            return Ok(false);
        };
        let mut slot = slot.lock();
        slot.removed = true;
        remove_if_present(&slot.shard)?;
        Ok(true)
    }

    /// Drop every scene and delete every shard in the directory.
    pub fn clear(&self) -> Result<()> {
        let slots: Vec<_> = std::mem::take(&mut *self.slots.write()).into_values().collect();
        for slot in slots {
            // Waits for in-flight releases; later ones find the slot removed.
            slot.lock().removed = true;
        }
        self.purge_shards()
    }

    fn purge_shards(&self) -> Result<()> {
        let mut purged = 0usize;
        for entry in fs::read_dir(&self.shard_dir)? {
            let path = entry?.path();
            let ext = path.extension().and_then(|e| e.to_str());
            if ext == Some(SHARD_EXTENSION) || ext == Some("tmp") {
                remove_if_present(&path)?;
                purged += 1;
            }
        }
        if purged > 0 {
            tracing::debug!(dir = %self.shard_dir.display(), purged, "purged stale shards");
        }
        Ok(())
    }
}

fn remove_if_present(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(source) => Err(StateError::File {
            path: path.to_path_buf(),
            source,
        }),
    }
}
