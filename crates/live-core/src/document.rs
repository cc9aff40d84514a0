//! Document: a live handle binding one guid to its current virtual path.
//!
//! Each document owns a Loro document whose "contents" text replicates
//! independently of the folder's path map. The reconciliation engine only
//! moves handles around; it never touches their text beyond seeding a
//! freshly minted document from disk.

use crate::ids::{Guid, ReplicaId};

use loro::{ExportMode, LoroDoc, LoroText, VersionVector};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DocumentError {
    #[error("Loro error: {0}")]
    Loro(String),
}

pub type Result<T> = std::result::Result<T, DocumentError>;

/// In-memory handle for one replicated document.
pub struct Document {
    guid: Guid,
    vpath: String,
    doc: LoroDoc,
}

impl Document {
    /// Create a handle bound to `guid` at `vpath` with empty contents.
    pub fn new(vpath: &str, guid: Guid, replica: ReplicaId) -> Self {
        let doc = LoroDoc::new();
        // Set peer ID before any operations for consistent version vectors
        doc.set_peer_id(replica.as_u64()).ok();
        let _contents = doc.get_text("contents");

        Self {
            guid,
            vpath: vpath.to_string(),
            doc,
        }
    }

    pub fn guid(&self) -> Guid {
        self.guid
    }

    /// The document's current virtual path within its folder.
    pub fn vpath(&self) -> &str {
        &self.vpath
    }

    /// Move the handle to a new virtual path. The guid is untouched.
    pub fn move_to(&mut self, vpath: &str) {
        self.vpath = vpath.to_string();
    }

    fn text(&self) -> LoroText {
        self.doc.get_text("contents")
    }

    /// Current contents as a string.
    pub fn contents(&self) -> String {
        self.text().to_string()
    }

    pub fn is_blank(&self) -> bool {
        self.contents().is_empty()
    }

    /// Seed the contents from on-disk bytes.
    ///
    /// Only meaningful for a document with no replicated history yet; a
    /// document that already has contents keeps them (a peer's replica is
    /// the authority once one exists). Returns whether anything was written.
    pub fn seed_contents(&self, contents: &str) -> Result<bool> {
        if contents.is_empty() || !self.is_blank() {
            return Ok(false);
        }
        let text = self.text();
        text.insert(0, contents)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        self.doc.commit();
        Ok(true)
    }

    /// Apply a content update received from a peer.
    pub fn apply_update(&self, data: &[u8]) -> Result<()> {
        self.doc
            .import(data)
            .map_err(|e| DocumentError::Loro(e.to_string()))?;
        Ok(())
    }

    /// Export full snapshot
    pub fn export_snapshot(&self) -> Vec<u8> {
        self.doc.export(ExportMode::Snapshot).unwrap()
    }

    /// Export updates since a version
    pub fn export_updates(&self, from: &VersionVector) -> Vec<u8> {
        self.doc.export(ExportMode::updates(from)).unwrap()
    }

    /// Get current version vector
    pub fn version(&self) -> VersionVector {
        self.doc.state_vv()
    }
}
