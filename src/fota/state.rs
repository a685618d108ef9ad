// src/fota/state.rs
//! FOTA state machine states, progress tracking, and resume persistence

use log::warn;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// State of the firmware update pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FotaState {
    Idle,
    CheckingManifest,
    Downloading,
    Verifying,
    Writing,
    Rebooting,
    Rollback,
    Failed,
}

impl Default for FotaState {
    fn default() -> Self {
        FotaState::Idle
    }
}

/// Progress of the current (or last) update attempt
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FotaProgress {
    pub state: FotaState,
    pub current_version: String,
    pub new_version: String,
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub bytes_received: u32,
    pub total_bytes: u32,
    pub verified: bool,
    pub error_message: String,
}

impl FotaProgress {
    /// An update is in progress unless the pipeline is idle or failed
    pub fn is_in_progress(&self) -> bool {
        !matches!(self.state, FotaState::Idle | FotaState::Failed)
    }
}

/// Serialized form of the resume state file
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PersistedFotaState {
    pub state: FotaState,
    pub version: String,
    pub chunks_received: u32,
    pub total_chunks: u32,
    pub verified: bool,
    /// Chunk bitmap, one 0/1 entry per chunk
    pub chunks: Vec<u8>,
}

impl PersistedFotaState {
    pub fn save<P: AsRef<Path>>(&self, path: P) -> std::io::Result<()> {
        let json = serde_json::to_string(self)?;
        std::fs::write(path, json)
    }

    /// Load persisted state; an absent, empty, or unparsable file is "no
    /// state", never an error.
    pub fn load<P: AsRef<Path>>(path: P) -> Option<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return None;
        }

        let content = std::fs::read_to_string(path).ok()?;
        match serde_json::from_str(&content) {
            Ok(state) => Some(state),
            Err(e) => {
                warn!("Ignoring unreadable FOTA state file: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_progress_states() {
        let mut progress = FotaProgress::default();
        assert_eq!(progress.state, FotaState::Idle);
        assert!(!progress.is_in_progress());

        progress.state = FotaState::Downloading;
        assert!(progress.is_in_progress());

        progress.state = FotaState::Rebooting;
        assert!(progress.is_in_progress());

        progress.state = FotaState::Failed;
        assert!(!progress.is_in_progress());
    }

    #[test]
    fn test_state_file_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fota_state.json");

        let state = PersistedFotaState {
            state: FotaState::Downloading,
            version: "1.0.1".to_string(),
            chunks_received: 2,
            total_chunks: 3,
            verified: false,
            chunks: vec![1, 1, 0],
        };
        state.save(&path).unwrap();

        let loaded = PersistedFotaState::load(&path).unwrap();
        assert_eq!(loaded.state, FotaState::Downloading);
        assert_eq!(loaded.chunks, vec![1, 1, 0]);
    }

    #[test]
    fn test_absent_file_loads_as_none() {
        let dir = tempdir().unwrap();
        assert!(PersistedFotaState::load(dir.path().join("missing.json")).is_none());
    }

    #[test]
    fn test_corrupt_file_loads_as_none() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("fota_state.json");

        std::fs::write(&path, "").unwrap();
        assert!(PersistedFotaState::load(&path).is_none());

        std::fs::write(&path, "{broken").unwrap();
        assert!(PersistedFotaState::load(&path).is_none());
    }
}
