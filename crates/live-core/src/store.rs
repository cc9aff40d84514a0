//! FolderStore: durable local persistence for one shared folder.
//!
//! Lives under `.sync/` inside the folder: a path-map snapshot plus a small
//! JSON meta record counting the remote update batches ever applied. That
//! counter is the input to the "has known peers" heuristic - a folder whose
//! store has accumulated more than a bootstrap-sized history was
//! synchronized by a previous online session.

use crate::fs::{FileSystem, FsError};

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::warn;

/// Directory for sync state inside the folder
pub const SYNC_DIR: &str = ".sync";
const SNAPSHOT_FILE: &str = "pathmap.loro";
const META_FILE: &str = "meta.json";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Meta record error: {0}")]
    Meta(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct StoreMeta {
    /// Remote update batches applied over this folder's lifetime.
    /// Never decreases.
    applied_updates: u64,
}

pub struct FolderStore {
    folder_path: String,
    meta: StoreMeta,
}

impl FolderStore {
    pub fn new(folder_path: &str) -> Self {
        Self {
            folder_path: folder_path.trim_end_matches('/').to_string(),
            meta: StoreMeta::default(),
        }
    }

    fn snapshot_path(&self) -> String {
        format!("{}/{}/{}", self.folder_path, SYNC_DIR, SNAPSHOT_FILE)
    }

    fn meta_path(&self) -> String {
        format!("{}/{}/{}", self.folder_path, SYNC_DIR, META_FILE)
    }

    /// Load persisted state, creating the `.sync` directory on first use.
    /// Returns the path-map snapshot bytes if one was saved before.
    pub async fn load<F: FileSystem>(&mut self, fs: &F) -> Result<Option<Vec<u8>>> {
        fs.mkdir(&format!("{}/{}", self.folder_path, SYNC_DIR))
            .await?;

        if fs.exists(&self.meta_path()).await? {
            let bytes = fs.read(&self.meta_path()).await?;
            match serde_json::from_slice::<StoreMeta>(&bytes) {
                Ok(meta) => self.meta = meta,
                Err(e) => {
                    // A corrupt meta record resets the history heuristic but
                    // must not take the folder down.
                    warn!("Ignoring corrupt store meta for {}: {}", self.folder_path, e);
                    self.meta = StoreMeta::default();
                }
            }
        }

        if fs.exists(&self.snapshot_path()).await? {
            return Ok(Some(fs.read(&self.snapshot_path()).await?));
        }
        Ok(None)
    }

    /// Persist the current path-map snapshot.
    pub async fn save_snapshot<F: FileSystem>(&self, fs: &F, snapshot: &[u8]) -> Result<()> {
        fs.write(&self.snapshot_path(), snapshot).await?;
        Ok(())
    }

    /// Record one applied remote update batch and persist the meta record.
    pub async fn record_applied_update<F: FileSystem>(&mut self, fs: &F) -> Result<()> {
        self.meta.applied_updates += 1;
        let bytes =
            serde_json::to_vec_pretty(&self.meta).map_err(|e| StoreError::Meta(e.to_string()))?;
        fs.write(&self.meta_path(), &bytes).await?;
        Ok(())
    }

    /// Remote update batches applied over this folder's lifetime.
    pub fn applied_updates(&self) -> u64 {
        self.meta.applied_updates
    }
}
