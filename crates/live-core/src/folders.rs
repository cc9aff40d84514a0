//! SharedFolders: the registry of active shared folders.
//!
//! Folders are held in an observable set (settings listeners re-save on
//! every add/remove) and found by first-match prefix lookup in registration
//! order. Construction is deferred to an injected [`FolderBuilder`] so the
//! registry stays decoupled from how folders obtain their filesystem and
//! replication channel.

use crate::folder::{FolderSettings, Result, SharedFolder, TreeDiff};
use crate::fs::FileSystem;
use crate::ids::Guid;
use crate::observable::{ObservableSet, Subscription};
use crate::path::FolderBoundary;
use crate::readiness::ReadinessGate;

use async_trait::async_trait;
use futures::future::join_all;
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};
use tracing::debug;

/// Cheap-clone handle to one shared folder.
///
/// The readiness gate lives outside the folder mutex so callers can suspend
/// on `wait_ready` without holding the folder lock; mutating operations all
/// wait for readiness first, mirroring the host's "when ready, then act"
/// event handling.
pub struct FolderHandle<F: FileSystem> {
    settings: FolderSettings,
    boundary: FolderBoundary,
    gate: Arc<ReadinessGate>,
    inner: Arc<Mutex<SharedFolder<F>>>,
}

impl<F: FileSystem> Clone for FolderHandle<F> {
    fn clone(&self) -> Self {
        Self {
            settings: self.settings.clone(),
            boundary: self.boundary.clone(),
            gate: Arc::clone(&self.gate),
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<F: FileSystem> PartialEq for FolderHandle<F> {
    fn eq(&self, other: &Self) -> bool {
        self.settings.id == other.settings.id
    }
}

impl<F: FileSystem> FolderHandle<F> {
    pub fn new(folder: SharedFolder<F>) -> Self {
        let settings = folder.settings();
        let boundary = FolderBoundary::new(settings.path.clone());
        let gate = Arc::clone(folder.gate());
        Self {
            settings,
            boundary,
            gate,
            inner: Arc::new(Mutex::new(folder)),
        }
    }

    pub fn id(&self) -> Guid {
        self.settings.id
    }

    pub fn path(&self) -> &str {
        self.boundary.path()
    }

    pub fn settings(&self) -> &FolderSettings {
        &self.settings
    }

    pub fn gate(&self) -> &Arc<ReadinessGate> {
        &self.gate
    }

    /// Whether `path` (vault-relative) lives inside this folder.
    pub fn contains(&self, path: &str) -> bool {
        self.boundary.contains(path)
    }

    /// Lock the underlying folder for direct access.
    pub async fn lock(&self) -> MutexGuard<'_, SharedFolder<F>> {
        self.inner.lock().await
    }

    /// Load persisted state and resolve the readiness heuristic.
    pub async fn attach(&self) -> Result<()> {
        self.inner.lock().await.attach().await
    }

    /// Suspend until the readiness gate resolves, then hand back the folder.
    /// All concurrent callers share one underlying wait.
    pub async fn when_ready(&self) -> &Self {
        self.gate.wait_ready().await;
        self
    }

    /// Run the startup reconciliation once the gate resolves: register
    /// identities for local files, then reconcile the tree against the map.
    pub async fn startup(&self) -> Result<()> {
        self.gate.wait_ready().await;
        let mut folder = self.inner.lock().await;
        folder.add_local_docs().await?;
        folder.sync_file_tree().await?;
        Ok(())
    }

    /// Track a locally created file (waits for readiness).
    pub async fn create_file(&self, path: &str) -> Result<Guid> {
        self.gate.wait_ready().await;
        self.inner.lock().await.create_file(path).await
    }

    /// Handle a local rename (waits for readiness).
    pub async fn rename_file(&self, old_path: &str, new_path: &str) -> Result<()> {
        self.gate.wait_ready().await;
        self.inner.lock().await.rename_file(old_path, new_path).await
    }

    /// Handle a local delete (waits for readiness).
    pub async fn delete_file(&self, path: &str) -> Result<()> {
        self.gate.wait_ready().await;
        self.inner.lock().await.delete_file(path).await
    }

    /// Apply a remote map transaction batch and reconcile. Inbound work is
    /// not gated: materializing peer state is always safe.
    pub async fn apply_remote_update(&self, data: &[u8]) -> Result<TreeDiff> {
        self.inner.lock().await.apply_remote_update(data).await
    }

    /// Tear down every document handle.
    pub async fn destroy(&self) {
        self.inner.lock().await.destroy();
    }
}

/// Builds a folder for the registry. Injected so the registry does not know
/// where filesystems or replication channels come from.
#[async_trait]
pub trait FolderBuilder<F: FileSystem>: Send + Sync {
    async fn build(&self, settings: FolderSettings) -> Result<FolderHandle<F>>;
}

pub struct SharedFolders<F: FileSystem> {
    set: Arc<ObservableSet<FolderHandle<F>>>,
    builder: Box<dyn FolderBuilder<F>>,
}

impl<F: FileSystem> SharedFolders<F> {
    pub fn new(builder: Box<dyn FolderBuilder<F>>) -> Self {
        Self {
            set: Arc::new(ObservableSet::new()),
            builder,
        }
    }

    pub fn folders(&self) -> Vec<FolderHandle<F>> {
        self.set.items()
    }

    pub fn len(&self) -> usize {
        self.set.len()
    }

    pub fn is_empty(&self) -> bool {
        self.set.is_empty()
    }

    /// The folder whose boundary contains `path`: first match in
    /// registration order. Overlapping boundaries are unsupported; the
    /// earlier registration shadows the later one.
    pub fn lookup(&self, path: &str) -> Option<FolderHandle<F>> {
        self.set.find(|folder| folder.contains(path))
    }

    /// The folder registered exactly at `path`, if any.
    pub fn find_by_path(&self, path: &str) -> Option<FolderHandle<F>> {
        self.set.find(|folder| folder.path() == path)
    }

    /// Register (or return the existing) folder at `path`. A missing `id`
    /// mints a fresh folder guid. The new folder is attached before it
    /// becomes visible to lookups.
    pub async fn register(&self, path: &str, id: Option<Guid>) -> Result<FolderHandle<F>> {
        if let Some(existing) = self.find_by_path(path) {
            return Ok(existing);
        }
        let settings = FolderSettings {
            id: id.unwrap_or_else(Guid::generate),
            path: path.to_string(),
        };
        debug!("Registering shared folder {} ({})", settings.path, settings.id);
        let handle = self.builder.build(settings).await?;
        handle.attach().await?;
        self.set.add(handle.clone());
        Ok(handle)
    }

    /// Unregister and destroy the folder at `path`. Returns whether one was
    /// registered.
    pub async fn remove(&self, path: &str) -> bool {
        match self.find_by_path(path) {
            Some(handle) => {
                handle.destroy().await;
                self.set.delete(&handle)
            }
            None => false,
        }
    }

    /// Settings snapshot for persistence.
    pub fn to_settings(&self) -> Vec<FolderSettings> {
        self.set
            .items()
            .iter()
            .map(|folder| folder.settings().clone())
            .collect()
    }

    /// Subscribe to registry changes (add/remove).
    pub fn subscribe(
        &self,
        callback: impl Fn() + Send + Sync + 'static,
    ) -> Subscription<FolderHandle<F>> {
        self.set.subscribe(callback)
    }

    /// Destroy every folder, which destroys every document handle.
    pub async fn destroy(&self) {
        let folders = self.set.items();
        join_all(folders.iter().map(|folder| folder.destroy())).await;
        self.set.clear();
    }
}

impl<F: FileSystem> Drop for SharedFolders<F> {
    fn drop(&mut self) {
        if !self.set.is_empty() {
            debug!("Folder registry dropped with {} live folders", self.set.len());
        }
    }
}
