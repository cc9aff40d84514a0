//! DocumentRegistry: per-folder ownership of live document handles.
//!
//! Maps guid -> `Document` and feeds an observable set of guids that
//! external listeners (UI, settings) subscribe to. Handles are created
//! lazily on first reference and destroyed when their guid leaves the
//! replicated map or the folder is destroyed.

use crate::document::Document;
use crate::ids::{Guid, ReplicaId};
use crate::observable::ObservableSet;

use std::collections::HashMap;
use std::sync::Arc;

pub struct DocumentRegistry {
    replica: ReplicaId,
    docs: HashMap<Guid, Document>,
    docset: Arc<ObservableSet<Guid>>,
}

impl DocumentRegistry {
    pub fn new(replica: ReplicaId) -> Self {
        Self {
            replica,
            docs: HashMap::new(),
            docset: Arc::new(ObservableSet::new()),
        }
    }

    /// The observable set of live guids; add/remove notifications flow
    /// through it (coalesced when the engine opens a batch scope).
    pub fn docset(&self) -> &Arc<ObservableSet<Guid>> {
        &self.docset
    }

    pub fn contains(&self, guid: Guid) -> bool {
        self.docs.contains_key(&guid)
    }

    pub fn get(&self, guid: Guid) -> Option<&Document> {
        self.docs.get(&guid)
    }

    /// Current virtual path of a tracked document.
    pub fn path_of(&self, guid: Guid) -> Option<String> {
        self.docs.get(&guid).map(|d| d.vpath().to_string())
    }

    /// Find the guid of the document currently at `vpath`, if any.
    pub fn guid_at(&self, vpath: &str) -> Option<Guid> {
        self.docs
            .values()
            .find(|d| d.vpath() == vpath)
            .map(|d| d.guid())
    }

    /// Bind a handle for `guid` at `vpath`, creating it if this is the
    /// first reference. An existing handle is moved to `vpath` in place.
    pub fn bind(&mut self, vpath: &str, guid: Guid) -> &mut Document {
        if let Some(doc) = self.docs.get_mut(&guid) {
            if doc.vpath() != vpath {
                doc.move_to(vpath);
            }
        } else {
            self.docs
                .insert(guid, Document::new(vpath, guid, self.replica));
            self.docset.add(guid);
        }
        self.docs.get_mut(&guid).unwrap()
    }

    /// Move a tracked document to a new virtual path. Returns whether a
    /// handle existed.
    pub fn move_doc(&mut self, guid: Guid, vpath: &str) -> bool {
        match self.docs.get_mut(&guid) {
            Some(doc) => {
                doc.move_to(vpath);
                true
            }
            None => false,
        }
    }

    /// Destroy the handle for `guid`. Returns whether one existed.
    pub fn remove(&mut self, guid: Guid) -> bool {
        let removed = self.docs.remove(&guid).is_some();
        if removed {
            self.docset.delete(&guid);
        }
        removed
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    /// Destroy every handle (folder teardown).
    pub fn clear(&mut self) {
        self.docs.clear();
        self.docset.clear();
    }
}
