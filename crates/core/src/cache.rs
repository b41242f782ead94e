//! Fingerprint cache: answers "unchanged / modified / new" for batches of
//! paths with one load per run and one persisted write per checkpoint.

use crate::fingerprint::{self, ALGORITHM_VERSION};
use crate::fs_ops;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FingerprintEntry {
    pub hash: String,
    pub file_size_bytes: u64,
    /// Unix seconds of the last successful check.
    pub last_checked: i64,
    pub version: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileStatus {
    Unchanged,
    Modified,
    New,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct CacheFile {
    entries: HashMap<String, FingerprintEntry>,
}

/// Flat path-keyed map of content fingerprints. The in-memory map sits behind
/// a single mutex; disk persistence happens only at checkpoints via `save`.
pub struct FingerprintCache {
    root: PathBuf,
    path: PathBuf,
    entries: Mutex<HashMap<String, FingerprintEntry>>,
}

impl FingerprintCache {
    /// Load the persisted map, or start empty when the file is missing or
    /// unreadable. Corruption is never fatal.
    pub fn load(root: &Path, cache_path: &Path) -> Self {
        let entries = match std::fs::read(cache_path) {
            Ok(bytes) => match serde_json::from_slice::<CacheFile>(&bytes) {
                Ok(file) => file.entries,
                Err(e) => {
                    warn!(path = %cache_path.display(), error = %e, "corrupt fingerprint cache, starting empty");
                    HashMap::new()
                }
            },
            Err(_) => HashMap::new(),
        };
        debug!(entries = entries.len(), "fingerprint cache loaded");
        Self {
            root: root.to_path_buf(),
            path: cache_path.to_path_buf(),
            entries: Mutex::new(entries),
        }
    }

    fn key_for(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    /// Batch change check. Hashes are computed off the async runtime in one
    /// blocking hop, and the persisted map is consulted once.
    pub async fn check_many(&self, paths: &[PathBuf]) -> Vec<(PathBuf, FileStatus)> {
        let hashes = hash_batch(paths.to_vec()).await;
        let entries = self.entries.lock().await;
        paths
            .iter()
            .zip(hashes)
            .map(|(path, hash)| {
                let status = match (entries.get(&self.key_for(path)), hash) {
                    (Some(entry), Ok(hash)) if entry.version == ALGORITHM_VERSION => {
                        if entry.hash == hash {
                            FileStatus::Unchanged
                        } else {
                            FileStatus::Modified
                        }
                    }
                    // Foreign-format or stale entries count as misses.
                    (Some(_), Ok(_)) => FileStatus::New,
                    (None, Ok(_)) => FileStatus::New,
                    (_, Err(_)) => FileStatus::New,
                };
                (path.clone(), status)
            })
            .collect()
    }

    /// Recompute and overwrite entries for these paths. Unreadable files are
    /// dropped from the map rather than recorded with a stale hash.
    pub async fn update_many(&self, paths: &[PathBuf]) {
        let hashes = hash_batch(paths.to_vec()).await;
        let now = chrono::Utc::now().timestamp();
        let mut entries = self.entries.lock().await;
        for (path, hash) in paths.iter().zip(hashes) {
            let key = self.key_for(path);
            match hash {
                Ok(hash) => {
                    let size = std::fs::metadata(path).map(|m| m.len()).unwrap_or(0);
                    entries.insert(
                        key,
                        FingerprintEntry {
                            hash,
                            file_size_bytes: size,
                            last_checked: now,
                            version: ALGORITHM_VERSION.to_string(),
                        },
                    );
                }
                Err(_) => {
                    entries.remove(&key);
                }
            }
        }
    }

    /// Drop entries for paths that no longer exist under the root.
    pub async fn forget(&self, paths: &[PathBuf]) {
        let mut entries = self.entries.lock().await;
        for path in paths {
            entries.remove(&self.key_for(path));
        }
    }

    pub async fn len(&self) -> usize {
        self.entries.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Persist the whole map atomically (temp file + rename).
    pub async fn save(&self) -> anyhow::Result<()> {
        let snapshot = {
            let entries = self.entries.lock().await;
            CacheFile {
                entries: entries.clone(),
            }
        };
        let bytes = serde_json::to_vec_pretty(&snapshot)?;
        fs_ops::atomic_write(&self.path, &bytes)?;
        debug!(entries = snapshot.entries.len(), "fingerprint cache saved");
        Ok(())
    }
}

/// Always yields exactly one result per input path; callers zip the two.
async fn hash_batch(paths: Vec<PathBuf>) -> Vec<std::io::Result<String>> {
    let count = paths.len();
    let handle = tokio::task::spawn_blocking(move || {
        paths
            .iter()
            .map(|p| fingerprint::full_hash(p))
            .collect::<Vec<_>>()
    });
    match handle.await {
        Ok(hashes) => hashes,
        // A torn-down worker degrades every path to a cache miss instead of
        // dropping it from the pass.
        Err(e) => {
            let msg = e.to_string();
            (0..count)
                .map(|_| {
                    Err(std::io::Error::new(
                        std::io::ErrorKind::Other,
                        msg.clone(),
                    ))
                })
                .collect()
        }
    }
}
