//! Daemon settings persistence.
//!
//! One JSON record per vault at `.folders.json`: the install's replica ID
//! plus the `{id, path}` settings of every registered folder. Loaded at
//! startup, re-saved on every registry add/remove.

use anyhow::{Context, Result};
use live_core::folder::FolderSettings;
use live_core::ids::ReplicaId;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

const SETTINGS_FILE: &str = ".folders.json";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct DaemonSettings {
    /// This installation's replica ID (minted on first run).
    pub replica: Option<ReplicaId>,
    /// All registered shared folders.
    #[serde(default)]
    pub shared_folders: Vec<FolderSettings>,
}

/// File-backed store for [`DaemonSettings`].
pub struct SettingsStore {
    path: PathBuf,
}

impl SettingsStore {
    pub fn new(vault_path: &Path) -> Self {
        Self {
            path: vault_path.join(SETTINGS_FILE),
        }
    }

    /// Load settings; a missing file yields defaults.
    pub fn load(&self) -> Result<DaemonSettings> {
        if !self.path.exists() {
            return Ok(DaemonSettings::default());
        }
        let bytes = fs::read(&self.path)
            .with_context(|| format!("reading {}", self.path.display()))?;
        serde_json::from_slice(&bytes)
            .with_context(|| format!("parsing {}", self.path.display()))
    }

    pub fn save(&self, settings: &DaemonSettings) -> Result<()> {
        let json = serde_json::to_vec_pretty(settings)?;
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&self.path, json)
            .with_context(|| format!("writing {}", self.path.display()))?;
        Ok(())
    }
}
