//! Persistence gateway: best-effort room snapshots and results.
//!
//! Two snapshot kinds, both keyed by room id: a full-room snapshot
//! for pause/resume and a results-only snapshot written when a
//! session finishes. The default store writes pretty-printed JSON
//! under `saved_games/` and `results/`.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, warn};

use crate::room::types::{Feature, Room};

/// Result type alias for persistence operations.
pub type PersistResult<T> = Result<T, PersistError>;

/// Errors from the snapshot store.
#[derive(Debug, Error)]
pub enum PersistError {
    #[error("no snapshot stored for room '{0}'")]
    NotFound(String),

    #[error("snapshot for room '{room_id}' is malformed: {detail}")]
    Malformed { room_id: String, detail: String },

    #[error("snapshot I/O failed: {0}")]
    Io(#[from] std::io::Error),
}

/// Snapshot capability required by the session engine.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    /// Persist a full-room snapshot, overwriting any previous one.
    async fn save_room(&self, room: &Room) -> PersistResult<()>;

    /// Restore a full-room snapshot.
    async fn load_room(&self, room_id: &str) -> PersistResult<Room>;

    /// Persist the final backlog with estimated values.
    async fn save_results(&self, room_id: &str, backlog: &[Feature]) -> PersistResult<()>;
}

/// File-backed store: `<base>/saved_games/<room>.json` for full
/// snapshots, `<base>/results/<room>_results.json` for results.
#[derive(Debug, Clone)]
pub struct JsonFileStore {
    base_dir: PathBuf,
}

impl JsonFileStore {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn snapshot_path(&self, room_id: &str) -> PathBuf {
        self.base_dir
            .join("saved_games")
            .join(format!("{}.json", sanitize(room_id)))
    }

    fn results_path(&self, room_id: &str) -> PathBuf {
        self.base_dir
            .join("results")
            .join(format!("{}_results.json", sanitize(room_id)))
    }

    async fn write_json(path: &Path, json: String) -> PersistResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        tokio::fs::write(path, json).await?;
        Ok(())
    }
}

/// Room ids come from clients; keep them out of path traversal.
fn sanitize(room_id: &str) -> String {
    room_id
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || c == '-' || c == '_' {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[async_trait]
impl PersistenceGateway for JsonFileStore {
    async fn save_room(&self, room: &Room) -> PersistResult<()> {
        let path = self.snapshot_path(&room.room_id);
        let json = serde_json::to_string_pretty(room).map_err(|e| PersistError::Malformed {
            room_id: room.room_id.clone(),
            detail: e.to_string(),
        })?;
        Self::write_json(&path, json).await?;
        debug!(room_id = %room.room_id, path = %path.display(), "room snapshot saved");
        Ok(())
    }

    async fn load_room(&self, room_id: &str) -> PersistResult<Room> {
        let path = self.snapshot_path(room_id);
        let json = match tokio::fs::read_to_string(&path).await {
            Ok(json) => json,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Err(PersistError::NotFound(room_id.to_string()));
            }
            Err(e) => return Err(PersistError::Io(e)),
        };
        serde_json::from_str(&json).map_err(|e| {
            warn!(room_id, "room snapshot failed to parse: {}", e);
            PersistError::Malformed {
                room_id: room_id.to_string(),
                detail: e.to_string(),
            }
        })
    }

    async fn save_results(&self, room_id: &str, backlog: &[Feature]) -> PersistResult<()> {
        let path = self.results_path(room_id);
        let json = serde_json::to_string_pretty(backlog).map_err(|e| PersistError::Malformed {
            room_id: room_id.to_string(),
            detail: e.to_string(),
        })?;
        Self::write_json(&path, json).await?;
        debug!(room_id, path = %path.display(), "results saved");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::room::types::{ResolutionPolicy, RoomConfig};

    fn sample_room(id: &str) -> Room {
        Room::new(
            RoomConfig {
                room_id: id.to_string(),
                capacity: 2,
                policy: ResolutionPolicy::Median,
                backlog: vec!["a".to_string(), "b".to_string()],
            },
            "c1".to_string(),
            "alice".to_string(),
        )
    }

    #[tokio::test]
    async fn test_save_and_load_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut room = sample_room("sprint-12");
        room.paused = true;

        store.save_room(&room).await.unwrap();
        let loaded = store.load_room("sprint-12").await.unwrap();
        assert_eq!(loaded.room_id, "sprint-12");
        assert!(loaded.paused);
        assert_eq!(loaded.backlog.len(), 2);
    }

    #[tokio::test]
    async fn test_load_missing_room() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let err = store.load_room("nope").await.unwrap_err();
        assert!(matches!(err, PersistError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_load_corrupt_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let path = dir.path().join("saved_games");
        tokio::fs::create_dir_all(&path).await.unwrap();
        tokio::fs::write(path.join("bad.json"), "{ not json")
            .await
            .unwrap();

        let err = store.load_room("bad").await.unwrap_err();
        assert!(matches!(err, PersistError::Malformed { .. }));
    }

    #[tokio::test]
    async fn test_save_results_layout() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let mut backlog = vec![Feature::new("login page")];
        backlog[0].estimate = Some("5".to_string());

        store.save_results("sprint-12", &backlog).await.unwrap();
        let raw = tokio::fs::read_to_string(
            dir.path().join("results").join("sprint-12_results.json"),
        )
        .await
        .unwrap();
        let parsed: Vec<Feature> = serde_json::from_str(&raw).unwrap();
        assert_eq!(parsed[0].estimate.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_room_id_sanitized_in_paths() {
        let dir = tempfile::tempdir().unwrap();
        let store = JsonFileStore::new(dir.path());
        let room = sample_room("../evil");
        store.save_room(&room).await.unwrap();
        // The traversal components were replaced, so the snapshot
        // lands inside the base dir.
        assert!(dir.path().join("saved_games").join("___evil.json").exists());
    }
}
