// Session module
// Snapshot/restore of the engine, undo/redo history, presets and persistence

pub mod backend;
pub mod history;
pub mod presets;
pub mod serialization;
pub mod store;
pub mod types;

pub use backend::{FileBackend, MemoryBackend, SessionBackend};
pub use history::{SnapshotHistory, DEFAULT_HISTORY_DEPTH};
pub use presets::{PresetCatalog, PresetError, FACTORY_PRESET_NAMES};
pub use store::{LoadOutcome, SessionStore};
pub use types::{EventState, Preset, SessionDocument, SessionSnapshot, TimelineState, TrackState};

/// Session error types
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Corrupt session payload: {0}")]
    Corrupt(String),
}
