//! SharedFolder: the reconciliation engine for one shared folder.
//!
//! Owns the replicated path map, the document registry, the readiness gate
//! and the durable folder store, and keeps the local filesystem and the map
//! convergent in both directions:
//!
//! - Inbound: every remote-originated map transaction triggers
//!   [`SharedFolder::sync_file_tree`], which diffs the map against the live
//!   file tree and applies creates, renames and (when fully synced) trashes.
//! - Outbound: local file events arrive as `create_file` / `rename_file` /
//!   `delete_file` calls that mutate the map inside atomic transactions.
//!
//! Guid minting is gated: a folder with no known peer history refuses to
//! assign identities until a live connection confirms the replica is caught
//! up, so two offline peers cannot split one logical document in two.

use crate::document::{Document, DocumentError};
use crate::documents::DocumentRegistry;
use crate::fs::{FileSystem, FsError};
use crate::ids::{Guid, ReplicaId};
use crate::observable::ObservableSet;
use crate::path::{validate_virtual_path, FolderBoundary, PathError};
use crate::pathmap::{PathMap, PathMapError};
use crate::readiness::ReadinessGate;
use crate::store::{FolderStore, StoreError};

use loro::VersionVector;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, info, warn};

#[derive(Debug, Error)]
pub enum FolderError {
    #[error("Filesystem error: {0}")]
    Fs(#[from] FsError),

    #[error("Document error: {0}")]
    Document(#[from] DocumentError),

    #[error("Path map error: {0}")]
    PathMap(#[from] PathMapError),

    #[error("Store error: {0}")]
    Store(#[from] StoreError),

    #[error("Path error: {0}")]
    Path(#[from] PathError),

    #[error("Folder is not ready to assign identities (waiting for peers)")]
    NotReady,

    #[error("Invalid creation: no content on disk for {0}")]
    InvalidCreate(String),
}

pub type Result<T> = std::result::Result<T, FolderError>;

/// Persisted identity of one registered folder.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FolderSettings {
    pub id: Guid,
    pub path: String,
}

/// Report from one inbound reconciliation pass.
#[derive(Debug, Default)]
pub struct TreeDiff {
    /// Virtual paths materialized for remotely added docs
    pub created: Vec<String>,
    /// Virtual path moves applied on disk (from, to)
    pub renamed: Vec<(String, String)>,
    /// Virtual paths moved to the trash for remotely deleted docs
    pub trashed: Vec<String>,
    /// Corrupted/foreign map entries deleted during the pass
    pub healed: Vec<String>,
}

impl TreeDiff {
    pub fn has_changes(&self) -> bool {
        !self.created.is_empty()
            || !self.renamed.is_empty()
            || !self.trashed.is_empty()
            || !self.healed.is_empty()
    }
}

/// Operation planned for one map entry, computed once per entry before any
/// side effects run.
#[derive(Debug)]
enum PlannedOp {
    Noop,
    /// Corrupted or foreign entry; delete it from the map.
    Heal { vpath: String },
    /// Materialize a local placeholder for a remotely added doc.
    Create { vpath: String, guid: Guid },
    /// Physically move an existing tracked file.
    Rename {
        guid: Guid,
        from_vpath: String,
        to_vpath: String,
    },
}

pub struct SharedFolder<F: FileSystem> {
    settings: FolderSettings,
    boundary: FolderBoundary,
    replica: ReplicaId,
    fs: F,
    map: PathMap,
    docs: DocumentRegistry,
    store: FolderStore,
    gate: Arc<ReadinessGate>,
}

impl<F: FileSystem> SharedFolder<F> {
    pub fn new(settings: FolderSettings, replica: ReplicaId, fs: F) -> Self {
        let boundary = FolderBoundary::new(settings.path.clone());
        let store = FolderStore::new(boundary.path());
        Self {
            settings,
            boundary,
            replica,
            fs,
            map: PathMap::new(replica),
            docs: DocumentRegistry::new(replica),
            store,
            gate: Arc::new(ReadinessGate::new()),
        }
    }

    pub fn id(&self) -> Guid {
        self.settings.id
    }

    pub fn path(&self) -> &str {
        self.boundary.path()
    }

    pub fn settings(&self) -> FolderSettings {
        self.settings.clone()
    }

    pub fn replica(&self) -> ReplicaId {
        self.replica
    }

    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// Observable set of live document guids.
    pub fn docset(&self) -> &Arc<ObservableSet<Guid>> {
        self.docs.docset()
    }

    pub fn document(&self, guid: Guid) -> Option<&Document> {
        self.docs.get(guid)
    }

    pub fn doc_count(&self) -> usize {
        self.docs.len()
    }

    /// Whether `path` (vault-relative) lives inside this folder.
    pub fn contains(&self, path: &str) -> bool {
        self.boundary.contains(path)
    }

    /// Snapshot of the replicated (vpath, guid) entries.
    pub fn map_entries(&self) -> Vec<(String, Guid)> {
        self.map.entries()
    }

    pub fn map_version(&self) -> VersionVector {
        self.map.version()
    }

    /// Export map transactions a peer at `from` has not seen.
    pub fn export_map_updates(&self, from: &VersionVector) -> Vec<u8> {
        self.map.export_updates(from)
    }

    /// Load persisted state and resolve the readiness heuristic.
    pub async fn attach(&mut self) -> Result<()> {
        if let Some(snapshot) = self.store.load(&self.fs).await? {
            self.map.apply_update(&snapshot)?;
        }
        self.gate.set_persistence_synced(true);
        self.gate.resolve_known_peers(self.store.applied_updates());
        debug!(
            "Attached folder {} ({} map entries, {} applied updates)",
            self.path(),
            self.map.len(),
            self.store.applied_updates()
        );
        Ok(())
    }

    /// Apply a remote-originated map transaction batch, then reconcile the
    /// file tree against the updated map.
    pub async fn apply_remote_update(&mut self, data: &[u8]) -> Result<TreeDiff> {
        self.map.apply_update(data)?;
        self.store.record_applied_update(&self.fs).await?;
        self.persist_map().await?;
        self.sync_file_tree().await
    }

    /// One inbound reconciliation pass: diff the replicated map against the
    /// live filesystem and apply creates, renames and gated trashes.
    ///
    /// Idempotent: re-running against an unchanged (map, filesystem) pair
    /// performs no side effects and emits no notification.
    pub async fn sync_file_tree(&mut self) -> Result<TreeDiff> {
        let mut diff = TreeDiff::default();
        let mut diff_log: Vec<String> = Vec::new();

        let docset = Arc::clone(self.docs.docset());
        let _batch = docset.batch();

        // Plan one explicit op per entry before any side effects run
        let mut planned = Vec::new();
        for (vpath, guid) in self.map.raw_entries() {
            planned.push(self.plan_entry(&vpath, guid).await);
        }

        // Self-heal corrupted entries in one transaction
        let heals: Vec<String> = planned
            .iter()
            .filter_map(|op| match op {
                PlannedOp::Heal { vpath } => Some(vpath.clone()),
                _ => None,
            })
            .collect();
        if !heals.is_empty() {
            self.map.transact(|tx| -> std::result::Result<(), PathMapError> {
                for vpath in &heals {
                    tx.delete(vpath)?;
                }
                Ok(())
            })?;
            for vpath in heals {
                warn!("Deleting doc (somehow moved outside of shared folder): {}", vpath);
                diff_log.push(format!("deleted corrupted entry {}", vpath));
                diff.healed.push(vpath);
            }
        }

        // Apply creates and renames with per-entry failure isolation
        let mut renamed_from: Vec<String> = Vec::new();
        for op in planned {
            match op {
                PlannedOp::Noop | PlannedOp::Heal { .. } => {}
                PlannedOp::Rename {
                    guid,
                    from_vpath,
                    to_vpath,
                } => {
                    if let Err(e) = self
                        .apply_rename(guid, &from_vpath, &to_vpath, &mut diff, &mut diff_log, &mut renamed_from)
                        .await
                    {
                        warn!("Failed to apply rename {} -> {}: {}", from_vpath, to_vpath, e);
                    }
                }
                PlannedOp::Create { vpath, guid } => {
                    if let Err(e) = self.apply_create(&vpath, guid, &mut diff, &mut diff_log).await {
                        warn!("Failed to materialize {}: {}", vpath, e);
                    }
                }
            }
        }

        // Trash files that are no longer shared. Destructive, so only when
        // both persistence and the remote connection report fully synced -
        // never while merely offline with history.
        if self.gate.fully_synced() {
            for path in self.list_files().await? {
                let Ok(vpath) = self.boundary.virtual_path(&path) else {
                    continue;
                };
                if self.map.contains(&vpath) || renamed_from.contains(&path) {
                    continue;
                }
                match self.fs.trash(&path).await {
                    Ok(()) => {
                        if let Some(guid) = self.docs.guid_at(&vpath) {
                            self.docs.remove(guid);
                        }
                        info!("Trashing file {} (remotely deleted)", path);
                        diff_log.push(format!("deleted local file {} for remotely deleted doc", vpath));
                        diff.trashed.push(vpath);
                    }
                    Err(e) => warn!("Failed to trash {}: {}", path, e),
                }
            }
        }

        // One coalesced notification for the whole pass
        if diff.has_changes() {
            docset.notify();
        }
        debug!(
            "sync_file_tree diff for {}:\n{}",
            self.path(),
            diff_log.join("\n")
        );
        Ok(diff)
    }

    async fn plan_entry(&self, vpath: &str, guid: Option<Guid>) -> PlannedOp {
        let Some(guid) = guid else {
            return PlannedOp::Heal {
                vpath: vpath.to_string(),
            };
        };
        if validate_virtual_path(vpath).is_err() {
            return PlannedOp::Heal {
                vpath: vpath.to_string(),
            };
        }

        let abs = self.boundary.expand(vpath);
        match self.fs.exists(&abs).await {
            Ok(true) => PlannedOp::Noop,
            Ok(false) => match self.docs.path_of(guid) {
                Some(current) if current != vpath => PlannedOp::Rename {
                    guid,
                    from_vpath: current,
                    to_vpath: vpath.to_string(),
                },
                _ => PlannedOp::Create {
                    vpath: vpath.to_string(),
                    guid,
                },
            },
            Err(e) => {
                // Leave the entry alone this pass; the next one retries
                warn!("Existence check failed for {}: {}", abs, e);
                PlannedOp::Noop
            }
        }
    }

    async fn apply_rename(
        &mut self,
        guid: Guid,
        from_vpath: &str,
        to_vpath: &str,
        diff: &mut TreeDiff,
        diff_log: &mut Vec<String>,
        renamed_from: &mut Vec<String>,
    ) -> Result<()> {
        let from_abs = self.boundary.expand(from_vpath);
        let to_abs = self.boundary.expand(to_vpath);
        self.ensure_parent_dirs(&to_abs, diff_log).await?;
        self.fs.rename(&from_abs, &to_abs).await?;
        self.docs.move_doc(guid, to_vpath);
        renamed_from.push(from_abs);
        info!("{} was renamed to {}", from_vpath, to_vpath);
        diff_log.push(format!("{} was renamed to {}", from_vpath, to_vpath));
        diff.renamed.push((from_vpath.to_string(), to_vpath.to_string()));
        Ok(())
    }

    async fn apply_create(
        &mut self,
        vpath: &str,
        guid: Guid,
        diff: &mut TreeDiff,
        diff_log: &mut Vec<String>,
    ) -> Result<()> {
        let abs = self.boundary.expand(vpath);
        self.ensure_parent_dirs(&abs, diff_log).await?;
        // Bind the handle first so the host's create event binds to the
        // existing identity instead of minting a fresh one.
        self.docs.bind(vpath, guid);
        // Empty placeholder; the doc's own content channel populates it.
        self.fs.write(&abs, b"").await?;
        diff_log.push(format!("created local file for remotely added doc {}", vpath));
        diff.created.push(vpath.to_string());
        Ok(())
    }

    async fn ensure_parent_dirs(&self, abs: &str, diff_log: &mut Vec<String>) -> Result<()> {
        if let Some((parent, _)) = abs.rsplit_once('/') {
            if !self.fs.exists(parent).await? {
                self.fs.mkdir(parent).await?;
                diff_log.push(format!("creating directory {}", parent));
            }
        }
        Ok(())
    }

    /// Track a locally created file.
    ///
    /// If the virtual path already has an identity (the common case when the
    /// engine itself just wrote the file during an inbound pass), the handle
    /// binds to the existing guid. Otherwise a fresh guid is registered in
    /// one transaction before any other work, shrinking the causal window in
    /// which a concurrent peer could mint its own for the same path.
    pub async fn create_file(&mut self, path: &str) -> Result<Guid> {
        let vpath = self.boundary.virtual_path(path)?;

        if let Some(guid) = self.map.get(&vpath) {
            self.docs.bind(&vpath, guid);
            return Ok(guid);
        }

        if !self.gate.can_mint() {
            return Err(FolderError::NotReady);
        }
        if !self.fs.exists(path).await? {
            return Err(FolderError::InvalidCreate(path.to_string()));
        }

        let guid = Guid::generate();
        debug!("Creating entirely new doc for {}", vpath);
        self.map.transact(|tx| tx.set(&vpath, guid))?;

        let contents = self.fs.read(path).await?;
        let doc = self.docs.bind(&vpath, guid);
        doc.seed_contents(&String::from_utf8_lossy(&contents))?;
        self.persist_map().await?;
        Ok(guid)
    }

    /// Handle a local rename. Four cases, by which side of the boundary the
    /// old and new paths fall on.
    pub async fn rename_file(&mut self, old_path: &str, new_path: &str) -> Result<()> {
        let old_v = self.boundary.virtual_path(old_path).ok();
        let new_v = self.boundary.virtual_path(new_path).ok();

        match (old_v, new_v) {
            // Unrelated to this folder
            (None, None) => Ok(()),

            // Moved in from outside: a fresh local create at the new path
            (None, Some(_)) => {
                debug!("Moving in from outside of shared folder: {}", new_path);
                self.create_file(new_path).await.map(|_| ())
            }

            // Moved out: the document leaves replicated management
            (Some(old_v), None) => {
                debug!("Moving out of shared folder: {}", old_path);
                if let Some(guid) = self.map.get(&old_v) {
                    self.map.transact(|tx| tx.delete(&old_v))?;
                    self.docs.remove(guid);
                    self.persist_map().await?;
                }
                Ok(())
            }

            // Moved within the folder: one transaction, handle moved in place
            (Some(old_v), Some(new_v)) => {
                let Some(guid) = self.map.get(&old_v) else {
                    warn!("Rename of untracked path {}", old_path);
                    return Ok(());
                };
                self.map.transact(|tx| -> std::result::Result<(), PathMapError> {
                    tx.set(&new_v, guid)?;
                    tx.delete(&old_v)
                })?;
                self.docs.move_doc(guid, &new_v);
                self.persist_map().await?;
                Ok(())
            }
        }
    }

    /// Handle a local delete: remove the mapping and destroy the handle.
    pub async fn delete_file(&mut self, path: &str) -> Result<()> {
        let Ok(vpath) = self.boundary.virtual_path(path) else {
            return Ok(());
        };
        if let Some(guid) = self.map.get(&vpath) {
            self.map.transact(|tx| tx.delete(&vpath))?;
            self.docs.remove(guid);
            self.persist_map().await?;
            debug!("Deleted doc {} for {}", guid, vpath);
        }
        Ok(())
    }

    /// Startup reconciliation: register identities for every untracked local
    /// file in one batch transaction (pass 1), then bind handles for every
    /// local file against the now-stable map (pass 2). Emits exactly one
    /// batched change notification.
    pub async fn add_local_docs(&mut self) -> Result<()> {
        let docset = Arc::clone(self.docs.docset());
        let _batch = docset.batch();

        let files = self.list_files().await?;

        // Pass 1: reserve guids for every untracked local file up front, so
        // a remote update arriving mid-scan cannot race a second mint for
        // the same path.
        let mut untracked = Vec::new();
        for path in &files {
            if let Ok(vpath) = self.boundary.virtual_path(path) {
                if !self.map.contains(&vpath) {
                    untracked.push(vpath);
                }
            }
        }
        if !untracked.is_empty() {
            if !self.gate.can_mint() {
                return Err(FolderError::NotReady);
            }
            self.map.transact(|tx| -> std::result::Result<(), PathMapError> {
                for vpath in &untracked {
                    if tx.get(vpath).is_none() {
                        tx.set(vpath, Guid::generate())?;
                    }
                }
                Ok(())
            })?;
            debug!("Registered {} local docs in {}", untracked.len(), self.path());
        }

        // Pass 2: bind handles using the now-stable map
        for path in &files {
            let Ok(vpath) = self.boundary.virtual_path(path) else {
                continue;
            };
            let Some(guid) = self.map.get(&vpath) else {
                continue;
            };
            let contents = self.fs.read(path).await.unwrap_or_default();
            let doc = self.docs.bind(&vpath, guid);
            doc.seed_contents(&String::from_utf8_lossy(&contents))?;
        }

        self.persist_map().await?;
        Ok(())
    }

    /// All files under the folder, skipping the `.sync`/`.trash` areas and
    /// other hidden entries.
    pub async fn list_files(&self) -> Result<Vec<String>> {
        let mut files = Vec::new();
        if !self.fs.exists(self.boundary.path()).await? {
            return Ok(files);
        }

        let mut dirs_to_visit = vec![self.boundary.path().to_string()];
        while let Some(dir) = dirs_to_visit.pop() {
            for entry in self.fs.list(&dir).await? {
                if entry.name.starts_with('.') {
                    continue;
                }
                let path = format!("{}/{}", dir, entry.name);
                if entry.is_dir {
                    dirs_to_visit.push(path);
                } else {
                    files.push(path);
                }
            }
        }

        files.sort();
        Ok(files)
    }

    async fn persist_map(&self) -> Result<()> {
        self.store
            .save_snapshot(&self.fs, &self.map.export_snapshot())
            .await?;
        Ok(())
    }

    /// Tear down every document handle. The folder must not be used after.
    pub fn destroy(&mut self) {
        debug!("Destroying folder {}", self.path());
        self.docs.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::InMemoryFs;
    use crate::pathmap::PathMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn settings(path: &str) -> FolderSettings {
        FolderSettings {
            id: Guid::generate(),
            path: path.to_string(),
        }
    }

    async fn ready_folder(fs: Arc<InMemoryFs>) -> SharedFolder<Arc<InMemoryFs>> {
        let mut folder = SharedFolder::new(settings("shared"), ReplicaId::from(1u64), fs);
        folder.attach().await.unwrap();
        folder.gate().set_connected(true);
        folder.gate().set_server_synced(true);
        folder
    }

    /// A peer's view of the same folder, as a bare path map.
    fn peer_map() -> PathMap {
        PathMap::new(ReplicaId::from(99u64))
    }

    #[tokio::test]
    async fn test_remote_create_materializes_placeholder() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = folder.docset().subscribe(move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        let remote = peer_map();
        let id1 = Guid::generate();
        remote.transact(|tx| tx.set("/a.md", id1)).unwrap();

        let diff = folder
            .apply_remote_update(&remote.export_updates(&folder.map_version()))
            .await
            .unwrap();

        assert_eq!(diff.created, vec!["/a.md".to_string()]);
        assert!(fs.exists("shared/a.md").await.unwrap());
        assert_eq!(fs.read("shared/a.md").await.unwrap(), b"");
        assert_eq!(folder.document(id1).unwrap().vpath(), "/a.md");
        assert_eq!(count.load(Ordering::Relaxed), 1);
    }

    #[tokio::test]
    async fn test_remote_create_ensures_parent_dirs() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let remote = peer_map();
        remote
            .transact(|tx| tx.set("/nested/deep/a.md", Guid::generate()))
            .unwrap();

        folder
            .apply_remote_update(&remote.export_updates(&folder.map_version()))
            .await
            .unwrap();

        assert!(fs.exists("shared/nested/deep").await.unwrap());
        assert!(fs.exists("shared/nested/deep/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_remote_rename_moves_file_and_handle() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        // Local file tracked as /old.md
        fs.write("shared/old.md", b"# contents").await.unwrap();
        let id2 = folder.create_file("shared/old.md").await.unwrap();

        // Remote peer knows the doc and moves it to /b.md
        let remote = peer_map();
        remote
            .apply_update(&folder.export_map_updates(&remote.version()))
            .unwrap();
        let seen = folder.map_version();
        remote
            .transact(|tx| -> std::result::Result<(), PathMapError> {
                tx.set("/b.md", id2)?;
                tx.delete("/old.md")
            })
            .unwrap();

        let diff = folder
            .apply_remote_update(&remote.export_updates(&seen))
            .await
            .unwrap();

        assert_eq!(diff.renamed, vec![("/old.md".to_string(), "/b.md".to_string())]);
        assert!(diff.created.is_empty());
        assert!(diff.trashed.is_empty());
        assert!(!fs.exists("shared/old.md").await.unwrap());
        assert_eq!(fs.read("shared/b.md").await.unwrap(), b"# contents");
        assert_eq!(folder.document(id2).unwrap().vpath(), "/b.md");
        assert_eq!(folder.doc_count(), 1);
        assert!(!fs.in_trash("shared/old.md"));
    }

    #[tokio::test]
    async fn test_unshared_file_trashed_when_fully_synced() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/c.md", b"# local only").await.unwrap();

        let diff = folder.sync_file_tree().await.unwrap();
        assert_eq!(diff.trashed, vec!["/c.md".to_string()]);
        assert!(!fs.exists("shared/c.md").await.unwrap());
        assert!(fs.in_trash("shared/c.md"));
    }

    #[tokio::test]
    async fn test_unshared_file_kept_while_unsynced() {
        let fs = Arc::new(InMemoryFs::new());
        // Offline folder with prior history: ready but not fully synced
        let mut folder = SharedFolder::new(settings("shared"), ReplicaId::from(1u64), Arc::clone(&fs));
        folder.attach().await.unwrap();
        folder.gate().resolve_known_peers(100);
        assert!(folder.gate().can_mint());
        assert!(!folder.gate().fully_synced());

        fs.write("shared/d.md", b"# keep me").await.unwrap();

        let diff = folder.sync_file_tree().await.unwrap();
        assert!(diff.trashed.is_empty());
        assert!(fs.exists("shared/d.md").await.unwrap());
        assert!(!fs.in_trash("shared/d.md"));
    }

    #[tokio::test]
    async fn test_foreign_map_entry_healed() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let remote = peer_map();
        remote
            .transact(|tx| tx.set("/../escape.md", Guid::generate()))
            .unwrap();

        let diff = folder
            .apply_remote_update(&remote.export_updates(&folder.map_version()))
            .await
            .unwrap();

        assert_eq!(diff.healed, vec!["/../escape.md".to_string()]);
        assert!(folder.map_entries().is_empty());
        // Nothing materialized outside the folder
        assert!(!fs.exists("escape.md").await.unwrap());
        assert!(!fs.exists("shared/../escape.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_inbound_pass_is_idempotent() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let remote = peer_map();
        remote
            .transact(|tx| -> std::result::Result<(), PathMapError> {
                tx.set("/a.md", Guid::generate())?;
                tx.set("/b.md", Guid::generate())
            })
            .unwrap();

        let first = folder
            .apply_remote_update(&remote.export_updates(&folder.map_version()))
            .await
            .unwrap();
        assert_eq!(first.created.len(), 2);

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = folder.docset().subscribe(move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        // Unchanged map and filesystem: the second pass is a no-op
        let second = folder.sync_file_tree().await.unwrap();
        assert!(!second.has_changes());
        assert_eq!(count.load(Ordering::Relaxed), 0);
        assert_eq!(folder.doc_count(), 2);
    }

    #[tokio::test]
    async fn test_local_create_binds_existing_identity() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let remote = peer_map();
        let id1 = Guid::generate();
        remote.transact(|tx| tx.set("/a.md", id1)).unwrap();
        folder
            .apply_remote_update(&remote.export_updates(&folder.map_version()))
            .await
            .unwrap();

        // The engine just wrote shared/a.md; the host's create event must
        // bind to the existing identity, not mint a new one
        let bound = folder.create_file("shared/a.md").await.unwrap();
        assert_eq!(bound, id1);
        assert_eq!(folder.map_entries().len(), 1);
    }

    #[tokio::test]
    async fn test_minting_blocked_while_waiting_for_peers() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = SharedFolder::new(settings("shared"), ReplicaId::from(1u64), Arc::clone(&fs));
        folder.attach().await.unwrap();
        assert_eq!(folder.gate().state(), crate::readiness::Readiness::WaitingForPeers);

        fs.write("shared/new.md", b"# local").await.unwrap();
        let err = folder.create_file("shared/new.md").await.unwrap_err();
        assert!(matches!(err, FolderError::NotReady));
        assert!(folder.map_entries().is_empty());

        // Connection established and replica confirmed synced: minting opens
        folder.gate().set_connected(true);
        folder.gate().set_server_synced(true);
        let guid = folder.create_file("shared/new.md").await.unwrap();
        assert_eq!(folder.map_entries(), vec![("/new.md".to_string(), guid)]);
    }

    #[tokio::test]
    async fn test_create_requires_disk_content() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(fs).await;

        let err = folder.create_file("shared/ghost.md").await.unwrap_err();
        assert!(matches!(err, FolderError::InvalidCreate(_)));
    }

    #[tokio::test]
    async fn test_identity_stable_under_renames() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/a.md", b"# doc").await.unwrap();
        let guid = folder.create_file("shared/a.md").await.unwrap();

        fs.rename("shared/a.md", "shared/b.md").await.unwrap();
        folder.rename_file("shared/a.md", "shared/b.md").await.unwrap();
        fs.rename("shared/b.md", "shared/sub/c.md").await.unwrap();
        folder
            .rename_file("shared/b.md", "shared/sub/c.md")
            .await
            .unwrap();

        assert_eq!(folder.map_entries(), vec![("/sub/c.md".to_string(), guid)]);
        assert_eq!(folder.document(guid).unwrap().vpath(), "/sub/c.md");
        assert_eq!(folder.doc_count(), 1);
    }

    #[tokio::test]
    async fn test_rename_out_of_folder_drops_doc() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/a.md", b"# doc").await.unwrap();
        let guid = folder.create_file("shared/a.md").await.unwrap();

        fs.rename("shared/a.md", "private/a.md").await.unwrap();
        folder.rename_file("shared/a.md", "private/a.md").await.unwrap();

        assert!(folder.map_entries().is_empty());
        assert!(folder.document(guid).is_none());
        // The file itself is untouched at its new home
        assert!(fs.exists("private/a.md").await.unwrap());
    }

    #[tokio::test]
    async fn test_rename_into_folder_is_fresh_create() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("private/a.md", b"# doc").await.unwrap();
        fs.rename("private/a.md", "shared/a.md").await.unwrap();
        folder.rename_file("private/a.md", "shared/a.md").await.unwrap();

        assert_eq!(folder.map_entries().len(), 1);
        assert_eq!(folder.map_entries()[0].0, "/a.md");
    }

    #[tokio::test]
    async fn test_rename_outside_folder_ignored() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("private/a.md", b"# doc").await.unwrap();
        fs.rename("private/a.md", "private/b.md").await.unwrap();
        folder.rename_file("private/a.md", "private/b.md").await.unwrap();

        assert!(folder.map_entries().is_empty());
        assert_eq!(folder.doc_count(), 0);
    }

    #[tokio::test]
    async fn test_rename_of_untracked_path_is_noop() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/u.md", b"# untracked").await.unwrap();
        // No map entry for /u.md; the rename logs a warning and does nothing
        folder.rename_file("shared/u.md", "shared/v.md").await.unwrap();
        assert!(folder.map_entries().is_empty());
    }

    #[tokio::test]
    async fn test_local_delete_removes_mapping_and_handle() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/a.md", b"# doc").await.unwrap();
        let guid = folder.create_file("shared/a.md").await.unwrap();

        fs.delete("shared/a.md").await.unwrap();
        folder.delete_file("shared/a.md").await.unwrap();

        assert!(folder.map_entries().is_empty());
        assert!(folder.document(guid).is_none());
    }

    #[tokio::test]
    async fn test_startup_scan_emits_one_notification() {
        let fs = Arc::new(InMemoryFs::new());
        for i in 0..5 {
            fs.write(&format!("shared/note{}.md", i), b"# note")
                .await
                .unwrap();
        }

        let mut folder = ready_folder(Arc::clone(&fs)).await;

        let count = Arc::new(AtomicUsize::new(0));
        let count_clone = Arc::clone(&count);
        let _sub = folder.docset().subscribe(move || {
            count_clone.fetch_add(1, Ordering::Relaxed);
        });

        folder.add_local_docs().await.unwrap();

        assert_eq!(count.load(Ordering::Relaxed), 1);
        assert_eq!(folder.doc_count(), 5);
        assert_eq!(folder.map_entries().len(), 5);
    }

    #[tokio::test]
    async fn test_startup_scan_keeps_existing_identities() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("shared/a.md", b"# a").await.unwrap();

        let mut folder = ready_folder(Arc::clone(&fs)).await;
        folder.add_local_docs().await.unwrap();
        let before = folder.map_entries();

        // A second scan must not re-mint anything
        folder.add_local_docs().await.unwrap();
        assert_eq!(folder.map_entries(), before);
    }

    #[tokio::test]
    async fn test_startup_scan_seeds_contents_from_disk() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("shared/a.md", b"# seeded from disk").await.unwrap();

        let mut folder = ready_folder(Arc::clone(&fs)).await;
        folder.add_local_docs().await.unwrap();

        let (_, guid) = folder.map_entries().into_iter().next().unwrap();
        assert_eq!(folder.document(guid).unwrap().contents(), "# seeded from disk");
    }

    #[tokio::test]
    async fn test_hidden_and_sync_dirs_skipped() {
        let fs = Arc::new(InMemoryFs::new());
        fs.write("shared/a.md", b"# a").await.unwrap();
        fs.write("shared/.sync/meta.json", b"{}").await.unwrap();
        fs.write("shared/.hidden/x.md", b"x").await.unwrap();

        let folder = ready_folder(Arc::clone(&fs)).await;
        let files = folder.list_files().await.unwrap();
        assert_eq!(files, vec!["shared/a.md".to_string()]);
    }

    #[tokio::test]
    async fn test_attach_restores_persisted_map() {
        let fs = Arc::new(InMemoryFs::new());
        let folder_settings = settings("shared");

        let guid = {
            let mut folder = SharedFolder::new(
                folder_settings.clone(),
                ReplicaId::from(1u64),
                Arc::clone(&fs),
            );
            folder.attach().await.unwrap();
            folder.gate().set_connected(true);
            folder.gate().set_server_synced(true);
            fs.write("shared/a.md", b"# a").await.unwrap();
            folder.create_file("shared/a.md").await.unwrap()
        };

        // A new instance over the same filesystem sees the persisted entry
        let mut reloaded =
            SharedFolder::new(folder_settings, ReplicaId::from(1u64), Arc::clone(&fs));
        reloaded.attach().await.unwrap();
        assert_eq!(reloaded.map_entries(), vec![("/a.md".to_string(), guid)]);
    }

    #[tokio::test]
    async fn test_destroy_tears_down_handles() {
        let fs = Arc::new(InMemoryFs::new());
        let mut folder = ready_folder(Arc::clone(&fs)).await;

        fs.write("shared/a.md", b"# a").await.unwrap();
        folder.create_file("shared/a.md").await.unwrap();
        assert_eq!(folder.doc_count(), 1);

        folder.destroy();
        assert_eq!(folder.doc_count(), 0);
        assert!(folder.docset().is_empty());
    }
}
