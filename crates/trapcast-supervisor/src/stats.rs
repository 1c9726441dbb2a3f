//! Counter store with optional JSON persistence.

use std::{
    path::{Path, PathBuf},
    sync::{PoisonError, RwLock},
};

use thiserror::Error;
use trapcast_core::Stats;

/// Stats persistence error.
#[derive(Debug, Error)]
pub enum StatsError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Aggregate counters shared by the lifecycle operations.
///
/// Mutations always apply in memory; when a file is configured it is
/// rewritten after each mutation and a failed write is logged, not fatal.
pub struct StatsStore {
    stats: RwLock<Stats>,
    path: Option<PathBuf>,
}

impl StatsStore {
    /// Memory-only store starting from zero.
    #[must_use]
    pub fn in_memory() -> Self {
        Self {
            stats: RwLock::new(Stats::default()),
            path: None,
        }
    }

    /// Store backed by `path`.
    ///
    /// A missing file starts from zero; an unreadable or corrupt one is
    /// logged and also starts from zero.
    #[must_use]
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let stats = match load(&path) {
            Ok(Some(stats)) => stats,
            Ok(None) => Stats::default(),
            Err(e) => {
                tracing::warn!("Failed to load stats, starting from zero: {e}");
                Stats::default()
            }
        };
        Self {
            stats: RwLock::new(stats),
            path: Some(path),
        }
    }

    /// Current counters.
    #[must_use]
    pub fn snapshot(&self) -> Stats {
        self.stats
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Apply `f` to the counters and persist. Returns the updated counters.
    pub fn update<F>(&self, f: F) -> Stats
    where
        F: FnOnce(&mut Stats),
    {
        let updated = {
            let mut stats = self.stats.write().unwrap_or_else(PoisonError::into_inner);
            f(&mut stats);
            stats.clone()
        };
        if let Err(e) = self.persist_snapshot(&updated) {
            tracing::warn!("Failed to persist stats: {e}");
        }
        updated
    }

    /// Write the current counters to the backing file, if any.
    ///
    /// # Errors
    /// Returns error if serialization or the write fails.
    pub(crate) fn persist(&self) -> Result<(), StatsError> {
        self.persist_snapshot(&self.snapshot())
    }

    fn persist_snapshot(&self, stats: &Stats) -> Result<(), StatsError> {
        let Some(path) = &self.path else {
            return Ok(());
        };
        let json = serde_json::to_vec_pretty(stats)?;
        let tmp = path.with_extension("json.tmp");
        std::fs::write(&tmp, json).map_err(|source| StatsError::Io {
            path: tmp.clone(),
            source,
        })?;
        std::fs::rename(&tmp, path).map_err(|source| StatsError::Io {
            path: path.clone(),
            source,
        })
    }
}

impl Default for StatsStore {
    fn default() -> Self {
        Self::in_memory()
    }
}

fn load(path: &Path) -> Result<Option<Stats>, StatsError> {
    let bytes = match std::fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(source) => {
            return Err(StatsError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_update_persists_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");

        let store = StatsStore::open(&path);
        let updated = store.update(|s| s.simulator.start_count += 1);
        assert_eq!(updated.simulator.start_count, 1);

        let reopened = StatsStore::open(&path);
        assert_eq!(reopened.snapshot().simulator.start_count, 1);
    }

    #[test]
    fn test_corrupt_file_falls_back_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("stats.json");
        std::fs::write(&path, b"{not json").unwrap();

        let store = StatsStore::open(&path);
        assert_eq!(store.snapshot(), Stats::default());

        store.update(|s| s.mibs.reload_count = 3);
        let reopened = StatsStore::open(&path);
        assert_eq!(reopened.snapshot().mibs.reload_count, 3);
    }

    #[test]
    fn test_in_memory_never_touches_disk() {
        let store = StatsStore::in_memory();
        store.update(|s| s.traps.received_count += 2);
        assert!(store.persist().is_ok());
        assert_eq!(store.snapshot().traps.received_count, 2);
    }
}
