//! File watcher for vault changes.
//!
//! Uses notify directly rather than a debouncing wrapper because rename
//! events must carry both the old and the new path; debouncers collapse
//! them into per-path blobs and the pairing is lost.

use anyhow::Result;
use live_core::fs::FileEvent;
use notify::event::{ModifyKind, RenameMode};
use notify::{Event, EventKind, RecursiveMode, Watcher};
use std::path::{Path, PathBuf};
use tokio::sync::mpsc;
use tracing::{debug, error};

/// Watches the vault directory and yields [`FileEvent`]s with
/// vault-relative paths.
pub struct VaultWatcher {
    /// Watcher handle (must keep alive)
    _watcher: notify::RecommendedWatcher,
    /// Receiver for translated events
    event_rx: mpsc::UnboundedReceiver<FileEvent>,
}

impl VaultWatcher {
    pub fn new(vault_path: PathBuf) -> Result<Self> {
        // Canonicalize to resolve symlinks; on macOS /var/folders/... is
        // really /private/var/folders/... and FSEvents reports the latter.
        let vault_path = vault_path.canonicalize().unwrap_or(vault_path);

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let root = vault_path.clone();

        let mut watcher =
            notify::recommended_watcher(move |result: notify::Result<Event>| match result {
                Ok(event) => {
                    for file_event in translate(&event, &root) {
                        debug!("watcher event: {:?}", file_event);
                        if event_tx.send(file_event).is_err() {
                            // Receiver dropped
                            return;
                        }
                    }
                }
                Err(e) => error!("watch error: {}", e),
            })?;
        watcher.watch(&vault_path, RecursiveMode::Recursive)?;

        Ok(Self {
            _watcher: watcher,
            event_rx,
        })
    }

    /// Next file event; `None` once the watcher shuts down.
    pub async fn next(&mut self) -> Option<FileEvent> {
        self.event_rx.recv().await
    }
}

/// Translate one notify event into zero or more vault-relative events.
fn translate(event: &Event, root: &Path) -> Vec<FileEvent> {
    match &event.kind {
        EventKind::Create(_) => paths_of(event, root)
            .map(|path| FileEvent::Created { path })
            .collect(),

        EventKind::Remove(_) => paths_of(event, root)
            .map(|path| FileEvent::Deleted { path })
            .collect(),

        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) if event.paths.len() == 2 => {
            match (
                relativize(&event.paths[0], root),
                relativize(&event.paths[1], root),
            ) {
                (Some(old_path), Some(new_path)) => {
                    vec![FileEvent::Renamed { old_path, new_path }]
                }
                // A rename across the vault boundary degrades to the half
                // we can still see
                (Some(path), None) => vec![FileEvent::Deleted { path }],
                (None, Some(path)) => vec![FileEvent::Created { path }],
                (None, None) => vec![],
            }
        }

        // Unpaired rename halves (platform-dependent delivery)
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => paths_of(event, root)
            .map(|path| FileEvent::Deleted { path })
            .collect(),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => paths_of(event, root)
            .map(|path| FileEvent::Created { path })
            .collect(),

        EventKind::Modify(_) => paths_of(event, root)
            .map(|path| FileEvent::Modified { path })
            .collect(),

        _ => vec![],
    }
}

fn paths_of<'a>(event: &'a Event, root: &'a Path) -> impl Iterator<Item = String> + 'a {
    event.paths.iter().filter_map(|p| relativize(p, root))
}

/// Vault-relative path with `/` separators, or `None` for paths outside
/// the vault or inside hidden areas (`.sync`, `.trash`, dotfiles).
fn relativize(path: &Path, root: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    let mut parts = Vec::new();
    for component in rel.components() {
        let part = component.as_os_str().to_str()?;
        if part.starts_with('.') {
            return None;
        }
        parts.push(part);
    }
    if parts.is_empty() {
        return None;
    }
    Some(parts.join("/"))
}
