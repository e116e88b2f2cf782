use thiserror::Error;

use crate::scene::SceneError;

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Failed to load scene: {0}")]
    SceneLoad(String),

    #[error("Filesystem error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid settings: {0}")]
    Settings(String),

    #[error("Node not found: {0}")]
    MissingNode(String),

    #[error("Scene data error: {0}")]
    Scene(#[from] SceneError),

    #[error("General error: {0}")]
    General(String),
}

/// Hosts that pass errors across string boundaries.
impl From<SyncError> for String {
    fn from(error: SyncError) -> Self {
        error.to_string()
    }
}
