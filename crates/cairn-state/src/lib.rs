//! Cairn State -- paged, scene-aware save state for a host world.
//!
//! This crate builds on [`cairn_schema`] to persist a whole world: entities
//! grouped into scenes, runtime-spawned entities identified by GUID, and
//! global singleton objects. Each scene's data can be paged out to its own
//! shard file and back independently, and the whole state is written to and
//! read from a single chunked save archive.
//!
//! # Quick Start
//!
//! ```
//! use std::io::Cursor;
//! use cairn_state::prelude::*;
//!
//! let dir = std::env::temp_dir().join(format!("cairn-doc-{}", std::process::id()));
//! let state = SaveState::new(StateConfig::default().with_shard_dir(&dir)).unwrap();
//! state.set_title("Chapter one");
//!
//! let bytes = state.save_to_archive(Cursor::new(Vec::new())).unwrap().into_inner();
//! let header = SaveState::read_save_info(Cursor::new(bytes)).unwrap();
//! assert_eq!(header.info.title, "Chapter one");
//! # std::fs::remove_dir_all(&dir).ok();
//! ```

#![deny(unsafe_code)]

pub mod config;
pub mod core_state;
pub mod host;
pub mod resolver;
pub mod scene;
pub mod state;
pub mod store;

use std::path::PathBuf;

use cairn_archive::ArchiveError;
use cairn_schema::entity::EntityId;
use cairn_schema::SchemaError;

// ---------------------------------------------------------------------------
// Re-exports
// ---------------------------------------------------------------------------

/// Re-export the schema crate for convenience.
pub use cairn_schema;

/// Re-export the archive crate for convenience.
pub use cairn_archive;

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by the save state.
#[derive(Debug, thiserror::Error)]
pub enum StateError {
    #[error(transparent)]
    Schema(#[from] SchemaError),

    #[error(transparent)]
    Archive(#[from] ArchiveError),

    #[error("I/O failed: {0}")]
    Io(#[from] std::io::Error),

    /// Reading or writing a shard or save file failed.
    #[error("file I/O failed for {}: {source}", .path.display())]
    File {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration: {0}")]
    Config(#[from] serde_json::Error),

    /// A scene chunk decoded but its contents are inconsistent.
    #[error("scene '{scene}' is corrupt: {details}")]
    CorruptScene { scene: String, details: String },

    /// A packed pose/velocity record could not be decoded.
    #[error("core state record is corrupt: {details}")]
    CorruptCoreState { details: String },

    #[error("save format version {found} is not supported (expected {supported})")]
    UnsupportedFormat { found: u16, supported: u16 },

    #[error("entity {entity} is not known to the host")]
    UnknownEntity { entity: EntityId },

    #[error("background release of scene '{scene}' panicked")]
    ReleasePanicked { scene: String },
}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, StateError>;

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common usage.
pub mod prelude {
    pub use cairn_schema::prelude::*;

    pub use crate::config::{RestoreMode, StateConfig};
    pub use crate::core_state::{CoreApply, CoreState, CORE_STATE_VERSION};
    pub use crate::host::{EntityInfo, EntityOrigin, HostWorld, RespawnMode};
    pub use crate::resolver::{HostEncoder, RestoreLookups, SceneNames, SceneResolver};
    pub use crate::scene::{GlobalData, SceneData, SpawnedObject};
    pub use crate::state::{RestoreReport, SaveHeader, SaveInfo, SaveState, StoreReport};
    pub use crate::store::{LoadStatus, ReleaseHandle, SceneStore};
    pub use crate::{Result as StateResult, StateError};
}
