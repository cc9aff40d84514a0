//! PathMap: the conflict-free replicated mapping virtual path -> guid.
//!
//! One Loro map container ("docs") shared by every peer of a folder. All
//! mutations go through [`PathMap::transact`], which commits exactly once,
//! so multi-key changes (a move is insert + delete) are delivered to peers
//! as a unit and never observed half-applied. Per-key conflicts merge via
//! Loro's last-writer-wins map semantics; the engine never depends on which
//! concurrent writer wins, only that all peers agree.
//!
//! Remote transactions enter exclusively through [`PathMap::apply_update`].
//! That import is the only trigger for the inbound reconciliation pass, so
//! the engine structurally cannot react to its own writes.

use crate::ids::{Guid, ReplicaId};

use loro::{ExportMode, LoroDoc, LoroMap, VersionVector};
use thiserror::Error;

/// Container holding the path -> guid entries.
const DOCS_MAP: &str = "docs";

#[derive(Debug, Error)]
pub enum PathMapError {
    #[error("Loro error: {0}")]
    Loro(String),
}

pub type Result<T> = std::result::Result<T, PathMapError>;

pub struct PathMap {
    doc: LoroDoc,
}

impl PathMap {
    pub fn new(replica: ReplicaId) -> Self {
        let doc = LoroDoc::new();
        // Set peer ID before any operations for consistent version vectors
        doc.set_peer_id(replica.as_u64()).ok();
        let _docs = doc.get_map(DOCS_MAP);
        Self { doc }
    }

    /// Rebuild a map from a persisted snapshot.
    pub fn from_snapshot(replica: ReplicaId, bytes: &[u8]) -> Result<Self> {
        let doc = LoroDoc::new();
        doc.set_peer_id(replica.as_u64()).ok();
        doc.import(bytes)
            .map_err(|e| PathMapError::Loro(e.to_string()))?;
        Ok(Self { doc })
    }

    fn map(&self) -> LoroMap {
        self.doc.get_map(DOCS_MAP)
    }

    pub fn get(&self, vpath: &str) -> Option<Guid> {
        self.map().get(vpath).and_then(|v| {
            if let loro::ValueOrContainer::Value(val) = v {
                val.as_string().and_then(|s| s.parse().ok())
            } else {
                None
            }
        })
    }

    pub fn contains(&self, vpath: &str) -> bool {
        self.map().get(vpath).is_some()
    }

    /// Whether any entry maps to `guid`.
    pub fn contains_guid(&self, guid: Guid) -> bool {
        self.entries().iter().any(|(_, g)| *g == guid)
    }

    /// All (vpath, guid) pairs with parseable guids.
    pub fn entries(&self) -> Vec<(String, Guid)> {
        self.raw_entries()
            .into_iter()
            .filter_map(|(path, guid)| guid.map(|g| (path, g)))
            .collect()
    }

    /// All entries, keeping unparseable values as `None` so the
    /// reconciliation pass can self-heal them.
    pub fn raw_entries(&self) -> Vec<(String, Option<Guid>)> {
        let value = self.map().get_deep_value();
        let mut entries = Vec::new();
        if let loro::LoroValue::Map(map) = value {
            for (path, value) in map.iter() {
                let guid = match value {
                    loro::LoroValue::String(s) => s.parse().ok(),
                    _ => None,
                };
                entries.push((path.clone(), guid));
            }
        }
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        entries
    }

    pub fn len(&self) -> usize {
        self.raw_entries().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Run `f` as one atomic transaction: every mutation inside commits as
    /// a single change delivered to peers as a unit.
    pub fn transact<T>(&self, f: impl FnOnce(&PathMapTxn) -> T) -> T {
        let txn = PathMapTxn { map: self.map() };
        let out = f(&txn);
        self.doc.commit();
        out
    }

    /// Apply a remote-originated transaction batch.
    pub fn apply_update(&self, data: &[u8]) -> Result<()> {
        self.doc
            .import(data)
            .map_err(|e| PathMapError::Loro(e.to_string()))?;
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

/// Mutation scope handed to [`PathMap::transact`] closures.
pub struct PathMapTxn {
    map: LoroMap,
}

impl PathMapTxn {
    pub fn set(&self, vpath: &str, guid: Guid) -> Result<()> {
        self.map
            .insert(vpath, guid.to_string())
            .map_err(|e| PathMapError::Loro(e.to_string()))
    }

    pub fn delete(&self, vpath: &str) -> Result<()> {
        self.map
            .delete(vpath)
            .map_err(|e| PathMapError::Loro(e.to_string()))
    }

    pub fn get(&self, vpath: &str) -> Option<Guid> {
        self.map.get(vpath).and_then(|v| {
            if let loro::ValueOrContainer::Value(val) = v {
                val.as_string().and_then(|s| s.parse().ok())
            } else {
                None
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn replica(n: u64) -> ReplicaId {
        ReplicaId::from(n)
    }

    #[test]
    fn test_set_get_delete() {
        let map = PathMap::new(replica(1));
        let guid = Guid::generate();

        map.transact(|tx| tx.set("/a.md", guid)).unwrap();
        assert_eq!(map.get("/a.md"), Some(guid));
        assert!(map.contains("/a.md"));
        assert!(map.contains_guid(guid));

        map.transact(|tx| tx.delete("/a.md")).unwrap();
        assert!(!map.contains("/a.md"));
        assert!(map.is_empty());
    }

    #[test]
    fn test_entries_sorted() {
        let map = PathMap::new(replica(1));
        let g1 = Guid::generate();
        let g2 = Guid::generate();
        map.transact(|tx| {
            tx.set("/b.md", g2)?;
            tx.set("/a.md", g1)
        })
        .unwrap();

        let entries = map.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0], ("/a.md".to_string(), g1));
        assert_eq!(entries[1], ("/b.md".to_string(), g2));
    }

    #[test]
    fn test_updates_replicate() {
        let a = PathMap::new(replica(1));
        let b = PathMap::new(replica(2));
        let guid = Guid::generate();

        a.transact(|tx| tx.set("/a.md", guid)).unwrap();
        b.apply_update(&a.export_updates(&b.version())).unwrap();

        assert_eq!(b.get("/a.md"), Some(guid));
    }

    #[test]
    fn test_move_is_delivered_as_a_unit() {
        let a = PathMap::new(replica(1));
        let b = PathMap::new(replica(2));
        let guid = Guid::generate();

        a.transact(|tx| tx.set("/old.md", guid)).unwrap();
        b.apply_update(&a.export_updates(&b.version())).unwrap();

        // A move is one transaction: insert new key, delete old key
        a.transact(|tx| {
            tx.set("/new.md", guid)?;
            tx.delete("/old.md")
        })
        .unwrap();
        b.apply_update(&a.export_updates(&b.version())).unwrap();

        assert_eq!(b.get("/new.md"), Some(guid));
        assert!(!b.contains("/old.md"));
        assert_eq!(b.len(), 1);
    }

    #[test]
    fn test_concurrent_writers_converge() {
        let a = PathMap::new(replica(1));
        let b = PathMap::new(replica(2));

        let ga = Guid::generate();
        let gb = Guid::generate();
        a.transact(|tx| tx.set("/same.md", ga)).unwrap();
        b.transact(|tx| tx.set("/same.md", gb)).unwrap();

        // Cross-apply both concurrent transactions
        let from_a = a.export_updates(&VersionVector::new());
        let from_b = b.export_updates(&VersionVector::new());
        a.apply_update(&from_b).unwrap();
        b.apply_update(&from_a).unwrap();

        // Either writer may win, but both peers must agree
        assert_eq!(a.get("/same.md"), b.get("/same.md"));
        assert!(a.get("/same.md").is_some());
    }

    #[test]
    fn test_snapshot_roundtrip() {
        let map = PathMap::new(replica(1));
        let guid = Guid::generate();
        map.transact(|tx| tx.set("/a.md", guid)).unwrap();

        let snapshot = map.export_snapshot();
        let restored = PathMap::from_snapshot(replica(1), &snapshot).unwrap();
        assert_eq!(restored.get("/a.md"), Some(guid));
    }

    #[test]
    fn test_raw_entries_surface_corrupt_values() {
        let map = PathMap::new(replica(1));
        map.transact(|tx| {
            tx.map.insert("/bad.md", "not-a-guid").unwrap();
            tx.set("/good.md", Guid::generate())
        })
        .unwrap();

        let raw = map.raw_entries();
        assert_eq!(raw.len(), 2);
        assert!(raw.iter().any(|(p, g)| p == "/bad.md" && g.is_none()));
        assert_eq!(map.entries().len(), 1);
    }
}
