// Persistence backends - opaque byte stores for sessions and history

use super::history::SnapshotHistory;
use super::SessionError;
use crate::config::EngineConfig;
use std::path::{Path, PathBuf};

/// Byte store consumed by the session store
pub trait SessionBackend {
    /// Persist the serialized session document
    fn save(&mut self, bytes: &[u8]) -> Result<(), SessionError>;

    /// Load the last saved document, if any
    fn load(&mut self) -> Result<Option<Vec<u8>>, SessionError>;

    /// Record the state before a mutating action
    fn push_undo(&mut self, bytes: Vec<u8>);

    /// Previous state; `current` moves onto the redo stack
    fn pop_undo(&mut self, current: Vec<u8>) -> Option<Vec<u8>>;

    /// Next state after an undo; `current` moves onto the undo stack
    fn pop_redo(&mut self, current: Vec<u8>) -> Option<Vec<u8>>;

    /// Entry the next undo would return, without moving any state
    fn peek_undo(&self) -> Option<&[u8]>;

    fn peek_redo(&self) -> Option<&[u8]>;

    /// Drop the next undo entry (e.g. when it cannot be decoded)
    fn discard_undo(&mut self) -> bool;

    fn discard_redo(&mut self) -> bool;

    fn can_undo(&self) -> bool;

    fn can_redo(&self) -> bool;
}

/// Keeps everything in memory
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    saved: Option<Vec<u8>>,
    history: SnapshotHistory,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_history_depth(depth: usize) -> Self {
        Self {
            saved: None,
            history: SnapshotHistory::with_depth(depth),
        }
    }

    /// History bounded by the configured depth
    pub fn from_config(config: &EngineConfig) -> Self {
        Self::with_history_depth(config.history_depth)
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }

    /// Raw saved bytes (e.g. to inject a payload in tests)
    pub fn set_saved(&mut self, bytes: Option<Vec<u8>>) {
        self.saved = bytes;
    }
}

impl SessionBackend for MemoryBackend {
    fn save(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        self.saved = Some(bytes.to_vec());
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        Ok(self.saved.clone())
    }

    fn push_undo(&mut self, bytes: Vec<u8>) {
        self.history.push(bytes);
    }

    fn pop_undo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        self.history.undo(current)
    }

    fn pop_redo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        self.history.redo(current)
    }

    fn peek_undo(&self) -> Option<&[u8]> {
        self.history.peek_undo()
    }

    fn peek_redo(&self) -> Option<&[u8]> {
        self.history.peek_redo()
    }

    fn discard_undo(&mut self) -> bool {
        self.history.discard_undo()
    }

    fn discard_redo(&mut self) -> bool {
        self.history.discard_redo()
    }

    fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
}

/// Stores the session document in a file; history stays in memory
#[derive(Debug, Clone)]
pub struct FileBackend {
    path: PathBuf,
    history: SnapshotHistory,
}

impl FileBackend {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self::with_history_depth(path, super::history::DEFAULT_HISTORY_DEPTH)
    }

    pub fn with_history_depth(path: impl Into<PathBuf>, depth: usize) -> Self {
        Self {
            path: path.into(),
            history: SnapshotHistory::with_depth(depth),
        }
    }

    /// Backend at the platform data directory (e.g. ~/.local/share/mymusic)
    pub fn in_data_dir() -> Option<Self> {
        Self::default_path().map(Self::new)
    }

    pub fn default_path() -> Option<PathBuf> {
        dirs::data_dir().map(|dir| dir.join("mymusic").join("session.json"))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn history(&self) -> &SnapshotHistory {
        &self.history
    }
}

impl SessionBackend for FileBackend {
    fn save(&mut self, bytes: &[u8]) -> Result<(), SessionError> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        // Sibling file first, then rename over the target
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, bytes)?;
        std::fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    fn load(&mut self) -> Result<Option<Vec<u8>>, SessionError> {
        match std::fs::read(&self.path) {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn push_undo(&mut self, bytes: Vec<u8>) {
        self.history.push(bytes);
    }

    fn pop_undo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        self.history.undo(current)
    }

    fn pop_redo(&mut self, current: Vec<u8>) -> Option<Vec<u8>> {
        self.history.redo(current)
    }

    fn peek_undo(&self) -> Option<&[u8]> {
        self.history.peek_undo()
    }

    fn peek_redo(&self) -> Option<&[u8]> {
        self.history.peek_redo()
    }

    fn discard_undo(&mut self) -> bool {
        self.history.discard_undo()
    }

    fn discard_redo(&mut self) -> bool {
        self.history.discard_redo()
    }

    fn can_undo(&self) -> bool {
        self.history.can_undo()
    }

    fn can_redo(&self) -> bool {
        self.history.can_redo()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_memory_backend() {
        let mut backend = MemoryBackend::new();
        assert_eq!(backend.load().unwrap(), None);
        backend.save(b"abc").unwrap();
        assert_eq!(backend.load().unwrap(), Some(b"abc".to_vec()));

        backend.push_undo(b"1".to_vec());
        assert_eq!(backend.history().undo_len(), 1);
        assert!(backend.can_undo());
        assert_eq!(backend.pop_undo(b"2".to_vec()), Some(b"1".to_vec()));
        assert_eq!(backend.pop_redo(b"1".to_vec()), Some(b"2".to_vec()));
    }

    #[test]
    fn test_history_depth_from_config() {
        let config = EngineConfig::from_ron("(history_depth: 3)").unwrap();
        let mut backend = MemoryBackend::from_config(&config);
        for i in 0..5u8 {
            backend.push_undo(vec![i]);
        }
        assert_eq!(backend.history().max_depth(), 3);
        assert_eq!(backend.pop_undo(vec![9]), Some(vec![4]));
        assert_eq!(backend.history().undo_len(), 2);
    }

    #[test]
    fn test_file_backend() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("session.json");
        let mut backend = FileBackend::new(&path);

        assert_eq!(backend.load().unwrap(), None);
        backend.save(b"{}").unwrap();
        assert_eq!(backend.load().unwrap(), Some(b"{}".to_vec()));
        assert!(path.exists());
        assert!(!path.with_extension("json.tmp").exists());

        let mut reopened = FileBackend::new(&path);
        assert_eq!(reopened.load().unwrap(), Some(b"{}".to_vec()));
    }
}
