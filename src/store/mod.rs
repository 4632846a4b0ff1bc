//! Persistent state: the active document slot, the raw-document archive and
//! the snapshot manifest.

mod atomic;
mod document;
mod manifest;

pub use atomic::{write_atomic, write_new};
pub use document::{DocumentStore, FsDocumentStore, MemoryDocumentStore};
pub use manifest::{sort_newest_first, ManifestLoad, ManifestStore};
