//! live-daemon: headless host for shared-folder reconciliation.
//!
//! Loads registered folders from settings, watches the vault for file
//! events, probes connectivity, and routes everything into the live-core
//! engine.

use anyhow::Result;
use async_trait::async_trait;
use clap::Parser;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use live_daemon::connectivity::NetworkStatus;
use live_daemon::native_fs::NativeFs;
use live_daemon::settings::SettingsStore;
use live_daemon::watcher::VaultWatcher;

use live_core::folder::{FolderSettings, SharedFolder};
use live_core::{
    FileEvent, FolderBuilder, FolderHandle, ReplicaId, Session, SharedFolders, StaticSession,
};

#[derive(Parser, Debug)]
#[command(name = "live-daemon")]
#[command(about = "Shared-folder sync daemon")]
struct Args {
    /// Path to the vault directory
    #[arg(short, long)]
    vault: PathBuf,

    /// Relay host:port used for the connectivity probe
    #[arg(short, long, default_value = "127.0.0.1:8484")]
    relay: String,

    /// Session token for minting folder channel tokens
    #[arg(long)]
    token: Option<String>,

    /// Register a folder (vault-relative path) before starting
    #[arg(long = "share", value_name = "PATH")]
    share: Vec<String>,

    /// Enable verbose logging
    #[arg(long)]
    verbose: bool,
}

/// Builds folders over the daemon's native filesystem.
struct DaemonBuilder {
    fs: Arc<NativeFs>,
    replica: ReplicaId,
}

#[async_trait]
impl FolderBuilder<Arc<NativeFs>> for DaemonBuilder {
    async fn build(
        &self,
        settings: FolderSettings,
    ) -> live_core::folder::Result<FolderHandle<Arc<NativeFs>>> {
        let folder = SharedFolder::new(settings, self.replica, Arc::clone(&self.fs));
        Ok(FolderHandle::new(folder))
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    info!("Starting live-daemon for vault {}", args.vault.display());

    let store = SettingsStore::new(&args.vault);
    let mut settings = store.load()?;
    let replica = match settings.replica {
        Some(replica) => replica,
        None => {
            let replica = ReplicaId::generate();
            settings.replica = Some(replica);
            store.save(&settings)?;
            replica
        }
    };
    info!("Replica {}", replica);

    let fs = Arc::new(NativeFs::new(args.vault.clone()));
    let session = Arc::new(StaticSession::new(args.token.clone()));
    if !session.has_user() {
        warn!("No session token; folders stay offline until one is provided");
    }

    let folders = Arc::new(SharedFolders::new(Box::new(DaemonBuilder {
        fs: Arc::clone(&fs),
        replica,
    })));

    // Re-save settings on every registry add/remove
    let dirty = Arc::new(AtomicBool::new(false));
    let _settings_sub = folders.subscribe({
        let dirty = Arc::clone(&dirty);
        move || dirty.store(true, Ordering::SeqCst)
    });

    // Folders from settings; loading also sanitizes them
    for folder_settings in settings.shared_folders.clone() {
        if !args.vault.join(&folder_settings.path).exists() {
            warn!("Invalid settings, {} does not exist", folder_settings.path);
            continue;
        }
        let handle = folders
            .register(&folder_settings.path, Some(folder_settings.id))
            .await?;
        spawn_startup(handle);
    }

    // Newly shared folders from the CLI
    for path in &args.share {
        std::fs::create_dir_all(args.vault.join(path))?;
        let handle = folders.register(path, None).await?;
        spawn_startup(handle);
    }

    let mut watcher = VaultWatcher::new(args.vault.clone())?;
    let network = NetworkStatus::new(args.relay.clone());
    let mut online_rx = network.subscribe();
    tokio::spawn(network.run());

    loop {
        tokio::select! {
            event = watcher.next() => {
                match event {
                    Some(event) => dispatch_event(&folders, event),
                    None => break,
                }
            }
            changed = online_rx.changed() => {
                if changed.is_err() {
                    break;
                }
                let online = *online_rx.borrow_and_update();
                on_connectivity(&folders, session.as_ref(), online).await;
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }

        if dirty.swap(false, Ordering::SeqCst) {
            settings.shared_folders = folders.to_settings();
            store.save(&settings)?;
        }
    }

    folders.destroy().await;
    settings.shared_folders = folders.to_settings();
    store.save(&settings)?;
    Ok(())
}

fn spawn_startup(handle: FolderHandle<Arc<NativeFs>>) {
    tokio::spawn(async move {
        if let Err(e) = handle.startup().await {
            warn!("Startup reconciliation failed for {}: {}", handle.path(), e);
        }
    });
}

/// Route one watcher event to the folder whose boundary contains it.
/// Handlers run as their own tasks so an unready folder never stalls the
/// event loop.
fn dispatch_event(folders: &Arc<SharedFolders<Arc<NativeFs>>>, event: FileEvent) {
    match event {
        FileEvent::Created { path } | FileEvent::Modified { path } => {
            if let Some(folder) = folders.lookup(&path) {
                tokio::spawn(async move {
                    if let Err(e) = folder.create_file(&path).await {
                        warn!("Failed to track {}: {}", path, e);
                    }
                });
            }
        }
        FileEvent::Deleted { path } => {
            if folders.find_by_path(&path).is_some() {
                // The shared folder itself was deleted: unregister it
                let folders = Arc::clone(folders);
                tokio::spawn(async move {
                    folders.remove(&path).await;
                });
            } else if let Some(folder) = folders.lookup(&path) {
                tokio::spawn(async move {
                    if let Err(e) = folder.delete_file(&path).await {
                        warn!("Failed to untrack {}: {}", path, e);
                    }
                });
            }
        }
        FileEvent::Renamed { old_path, new_path } => {
            let folder = folders
                .lookup(&old_path)
                .or_else(|| folders.lookup(&new_path));
            if let Some(folder) = folder {
                tokio::spawn(async move {
                    if let Err(e) = folder.rename_file(&old_path, &new_path).await {
                        warn!("Failed to move {} -> {}: {}", old_path, new_path, e);
                    }
                });
            }
        }
    }
}

async fn on_connectivity(
    folders: &Arc<SharedFolders<Arc<NativeFs>>>,
    session: &StaticSession,
    online: bool,
) {
    if online {
        for folder in folders.folders() {
            match session.channel_token(folder.id()).await {
                Ok(_token) => {
                    // Channel transport lives outside this daemon; a minted
                    // token against a reachable relay is the sync point.
                    folder.gate().set_connected(true);
                    folder.gate().set_server_synced(true);
                }
                Err(e) => warn!("No channel token for {}: {}", folder.path(), e),
            }
        }
    } else {
        for folder in folders.folders() {
            folder.gate().set_connected(false);
            folder.gate().set_server_synced(false);
        }
    }
}
