//! Point-in-time state snapshots.
//!
//! Snapshots are JSON files written atomically (temp file + rename) into a
//! directory, named by microsecond timestamp so lexical order is creation
//! order. Only the newest N are retained.

use std::path::{Path, PathBuf};
use std::time::{SystemTime, UNIX_EPOCH};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};

use cgs_foundation::error::{CgsError, CgsResult};

/// Writes, lists, prunes, and restores snapshots in one directory.
pub struct SnapshotManager {
    dir: PathBuf,
    retain: usize,
}

impl SnapshotManager {
    /// Creates the manager, creating the directory if needed. Keeps the
    /// newest `retain` snapshots after each save.
    pub fn new(dir: &Path, retain: usize) -> CgsResult<Self> {
        std::fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            retain: retain.max(1),
        })
    }

    /// Saves a snapshot atomically and prunes old ones. Returns the
    /// snapshot's path.
    pub fn save<T: Serialize>(&self, state: &T) -> CgsResult<PathBuf> {
        let json = serde_json::to_vec_pretty(state)
            .map_err(|e| CgsError::Io(format!("snapshot serialize: {e}")))?;

        let mut stamp = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_micros() as u64)
            .unwrap_or(0);
        let mut path = self.dir.join(format!("snapshot_{stamp:020}.json"));
        // Two saves in the same microsecond must not collide.
        while path.exists() {
            stamp += 1;
            path = self.dir.join(format!("snapshot_{stamp:020}.json"));
        }

        let tmp = path.with_extension("tmp");
        std::fs::write(&tmp, &json)?;
        std::fs::rename(&tmp, &path)?;
        debug!(path = %path.display(), bytes = json.len(), "wrote snapshot");

        self.prune()?;
        Ok(path)
    }

    /// Loads the newest snapshot.
    ///
    /// # Errors
    /// [`CgsError::SnapshotMissing`] when the directory holds none,
    /// [`CgsError::Io`] when the newest one cannot be parsed.
    pub fn load_latest<T: DeserializeOwned>(&self) -> CgsResult<T> {
        let newest = self
            .list()?
            .into_iter()
            .next_back()
            .ok_or_else(|| CgsError::SnapshotMissing(self.dir.display().to_string()))?;
        let bytes = std::fs::read(&newest)?;
        serde_json::from_slice(&bytes)
            .map_err(|e| CgsError::Io(format!("snapshot parse {}: {e}", newest.display())))
    }

    /// All snapshot paths, oldest first.
    pub fn list(&self) -> CgsResult<Vec<PathBuf>> {
        let mut paths = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let path = entry?.path();
            let name = path.file_name().and_then(|n| n.to_str()).unwrap_or("");
            if name.starts_with("snapshot_") && name.ends_with(".json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    fn prune(&self) -> CgsResult<()> {
        let paths = self.list()?;
        if paths.len() <= self.retain {
            return Ok(());
        }
        for stale in &paths[..paths.len() - self.retain] {
            if let Err(e) = std::fs::remove_file(stale) {
                warn!(path = %stale.display(), error = %e, "failed to prune snapshot");
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct WorldState {
        tick: u64,
        players: Vec<String>,
    }

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path(), 3).unwrap();

        let state = WorldState {
            tick: 42,
            players: vec!["alice".into(), "bob".into()],
        };
        let path = snapshots.save(&state).unwrap();
        assert!(path.exists());

        let restored: WorldState = snapshots.load_latest().unwrap();
        assert_eq!(restored, state);
    }

    #[test]
    fn latest_wins() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path(), 5).unwrap();
        for tick in 1..=3u64 {
            snapshots
                .save(&WorldState {
                    tick,
                    players: vec![],
                })
                .unwrap();
        }
        let restored: WorldState = snapshots.load_latest().unwrap();
        assert_eq!(restored.tick, 3);
    }

    #[test]
    fn retention_prunes_oldest() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path(), 2).unwrap();
        for tick in 1..=5u64 {
            snapshots
                .save(&WorldState {
                    tick,
                    players: vec![],
                })
                .unwrap();
        }
        assert_eq!(snapshots.list().unwrap().len(), 2);
        let restored: WorldState = snapshots.load_latest().unwrap();
        assert_eq!(restored.tick, 5);
    }

    #[test]
    fn missing_snapshot_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path(), 3).unwrap();
        let result: CgsResult<WorldState> = snapshots.load_latest();
        assert!(matches!(result, Err(CgsError::SnapshotMissing(_))));
    }

    #[test]
    fn no_temp_files_left_behind() {
        let dir = tempfile::tempdir().unwrap();
        let snapshots = SnapshotManager::new(dir.path(), 3).unwrap();
        snapshots
            .save(&WorldState {
                tick: 1,
                players: vec![],
            })
            .unwrap();
        let leftovers: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().extension().map(|x| x == "tmp").unwrap_or(false))
            .collect();
        assert!(leftovers.is_empty());
    }
}
