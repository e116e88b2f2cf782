use std::{fs, path::Path};

use serde::{Deserialize, Serialize};

use crate::error::SyncError;
use crate::reconcile::types::{MAX_LOGGED_EXCLUDED_PATHS, MAX_LOGGED_SHAPE_KEYS, SCALE_EPSILON};

/// Tunables for a reconciliation pass. Missing fields fall back to defaults.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    /// Per-component tolerance for treating a scale as identity.
    pub scale_epsilon: f32,
    pub max_logged_excluded_paths: usize,
    pub max_logged_shape_keys: usize,
    /// Allow the legacy partial-name match as a last resort.
    pub substring_fallback: bool,
    pub sync_shape_keys: bool,
    /// Read `merge_armature` extras as an explicit bone mapping.
    pub use_merge_armature: bool,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            scale_epsilon: SCALE_EPSILON,
            max_logged_excluded_paths: MAX_LOGGED_EXCLUDED_PATHS,
            max_logged_shape_keys: MAX_LOGGED_SHAPE_KEYS,
            substring_fallback: true,
            sync_shape_keys: true,
            use_merge_armature: true,
        }
    }
}

/// Save sync settings to a JSON file.
pub fn save_settings(path: &Path, settings: &SyncSettings) -> Result<(), SyncError> {
    let content = serde_json::to_string_pretty(settings)
        .map_err(|error| SyncError::Settings(error.to_string()))?;
    fs::write(path, content)?;
    Ok(())
}

/// Load sync settings from a JSON file.
pub fn load_settings(path: &Path) -> Result<SyncSettings, SyncError> {
    let content = fs::read_to_string(path)?;
    serde_json::from_str(&content)
        .map_err(|error| SyncError::Settings(format!("{}: {}", path.display(), error)))
}
