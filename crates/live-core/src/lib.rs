//! live-core: Shared-folder reconciliation engine over Loro CRDTs.
//!
//! This crate keeps a local filesystem tree convergent with a replicated
//! path -> identity map shared by all peers of a folder:
//! - Replicated path map and per-document content replication
//! - Document registry and lifecycle (create/move/destroy)
//! - Readiness gate for safe identity minting on brand-new folders
//! - Bidirectional reconciliation (remote map changes -> local file
//!   operations, local file events -> identity assignment)
//! - FileSystem and Session trait abstractions for the host

pub mod document;
pub mod documents;
pub mod folder;
pub mod folders;
pub mod fs;
pub mod ids;
pub mod observable;
pub mod path;
pub mod pathmap;
pub mod readiness;
pub mod session;
pub mod store;

pub use document::Document;
pub use documents::DocumentRegistry;
pub use folder::{FolderError, FolderSettings, SharedFolder, TreeDiff};
pub use folders::{FolderBuilder, FolderHandle, SharedFolders};
pub use fs::{FileEntry, FileEvent, FileStat, FileSystem, InMemoryFs};
pub use ids::{Guid, ReplicaId};
pub use observable::{ObservableSet, Subscription};
pub use path::{FolderBoundary, PathError};
pub use pathmap::PathMap;
pub use readiness::{Readiness, ReadinessGate};
pub use session::{ChannelToken, Session, StaticSession};
