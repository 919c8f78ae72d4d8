//! Runtime configuration for [`SaveState`](crate::state::SaveState).
//!
//! Everything has a usable default, so a host only spells out what it wants
//! to change:
//!
//! ```
//! use cairn_state::config::{RestoreMode, StateConfig};
//!
//! let config = StateConfig::from_json_str(
//!     r#"{ "user_data_model_version": 3, "restore_mode": "scene_transition" }"#,
//! )
//! .unwrap();
//! assert_eq!(config.user_data_model_version, 3);
//! assert_eq!(config.restore_mode, RestoreMode::SceneTransition);
//! assert_eq!(config.instancing_suffixes, vec!["_LevelInstance_".to_string()]);
//! ```

use std::path::PathBuf;

use cairn_schema::restore::RestorePath;
use serde::{Deserialize, Serialize};

use crate::Result;

// ---------------------------------------------------------------------------
// RestoreMode
// ---------------------------------------------------------------------------

/// Why a restore is happening. Decides whether player-controlled entities get
/// their pose back.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestoreMode {
    /// A save file is being loaded: everything is put back where it was.
    #[default]
    LoadingGame,
    /// The player moved between scenes: player-controlled entities keep the
    /// pose the host gave them.
    SceneTransition,
}

// ---------------------------------------------------------------------------
// StateConfig
// ---------------------------------------------------------------------------

/// Configuration for a [`SaveState`](crate::state::SaveState).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StateConfig {
    /// Directory holding one shard file per paged-out scene. Stale shards in
    /// it are deleted when the state is created.
    pub shard_dir: PathBuf,
    /// Restore strategy selection. `ForceSlow` is a diagnostic switch.
    pub restore_path: RestorePath,
    /// Data-model version of the running app, recorded with stored data.
    pub user_data_model_version: u32,
    /// Suffixes hosts append to instanced scene names. A scene reference that
    /// misses is retried with the last occurrence of each suffix cut off.
    pub instancing_suffixes: Vec<String>,
    /// Default for restores that do not pass a mode explicitly.
    pub restore_mode: RestoreMode,
}

impl Default for StateConfig {
    /// Shards under the system temp directory, automatic restore path,
    /// data-model version 0, the `_LevelInstance_` suffix, loading-game mode.
    fn default() -> Self {
        Self {
            shard_dir: std::env::temp_dir().join("cairn-shards"),
            restore_path: RestorePath::Auto,
            user_data_model_version: 0,
            instancing_suffixes: vec!["_LevelInstance_".to_string()],
            restore_mode: RestoreMode::LoadingGame,
        }
    }
}

impl StateConfig {
    /// Parse a JSON document. Missing keys take their defaults.
    pub fn from_json_str(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }

    /// Same configuration with shards stored under `dir`.
    pub fn with_shard_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.shard_dir = dir.into();
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_the_default() {
        let config = StateConfig::from_json_str("{}").unwrap();
        assert_eq!(config, StateConfig::default());
    }

    #[test]
    fn restore_path_uses_snake_case() {
        let config = StateConfig::from_json_str(r#"{ "restore_path": "force_slow" }"#).unwrap();
        assert_eq!(config.restore_path, RestorePath::ForceSlow);
    }

    #[test]
    fn malformed_json_is_a_config_error() {
        let err = StateConfig::from_json_str("{ nope").unwrap_err();
        assert!(matches!(err, crate::StateError::Config(_)));
    }
}
