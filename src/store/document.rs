use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};

use super::atomic::{write_atomic, write_new};
use crate::error::{Result, SnapshotError};
use crate::models::{ActiveDocument, Stamp};

/// Owner of the active document slot and the raw-document archive.
///
/// Content is validated upstream; implementations only have to avoid partial writes.
pub trait DocumentStore: Send + Sync {
    /// The document the editor should load: the working slot, else the fallback.
    fn active(&self) -> Result<ActiveDocument>;

    /// Overwrite the working slot. Later `active()` calls see the new content.
    fn set_active(&self, content: &str) -> Result<()>;

    /// Store `content` under the stamp's archive name and return its reference.
    ///
    /// Never overwrites: a taken name fails with an error for which
    /// [`SnapshotError::is_name_taken`] holds.
    fn archive(&self, content: &str, stamp: &Stamp) -> Result<String>;

    /// Read an archived document back by reference.
    fn read_archived(&self, reference: &str) -> Result<String>;

    /// References of every archived document.
    fn archived(&self) -> Result<Vec<String>>;

    /// Delete an archived document.
    fn remove_archived(&self, reference: &str) -> Result<()>;
}

/// Filesystem-backed documents. References are paths relative to `root`.
#[derive(Debug, Clone)]
pub struct FsDocumentStore {
    root: PathBuf,
    working: PathBuf,
    fallback: PathBuf,
    archive_dir: PathBuf,
}

impl FsDocumentStore {
    pub fn new(
        root: impl Into<PathBuf>,
        working: impl Into<PathBuf>,
        fallback: impl Into<PathBuf>,
        archive_dir: impl Into<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            working: working.into(),
            fallback: fallback.into(),
            archive_dir: archive_dir.into(),
        }
    }

    pub fn archive_dir(&self) -> &Path {
        &self.archive_dir
    }

    fn reference(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .replace('\\', "/")
    }

    fn resolve(&self, reference: &str) -> PathBuf {
        let path = Path::new(reference);
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

impl DocumentStore for FsDocumentStore {
    fn active(&self) -> Result<ActiveDocument> {
        for path in [&self.working, &self.fallback] {
            let content = match fs::read_to_string(path) {
                Ok(content) => content,
                Err(e) if e.kind() == io::ErrorKind::NotFound => continue,
                Err(e) => return Err(SnapshotError::storage(path)(e)),
            };
            let modified = fs::metadata(path)
                .and_then(|md| md.modified())
                .map_err(SnapshotError::storage(path))?;
            return Ok(ActiveDocument {
                content,
                source: self.reference(path),
                last_modified: DateTime::<Utc>::from(modified),
            });
        }
        Err(SnapshotError::NotFound {
            searched: vec![self.working.clone(), self.fallback.clone()],
        })
    }

    fn set_active(&self, content: &str) -> Result<()> {
        write_atomic(&self.working, content.as_bytes())
    }

    fn archive(&self, content: &str, stamp: &Stamp) -> Result<String> {
        let path = self.archive_dir.join(stamp.archive_name());
        write_new(&path, content.as_bytes())?;
        Ok(self.reference(&path))
    }

    fn read_archived(&self, reference: &str) -> Result<String> {
        let path = self.resolve(reference);
        fs::read_to_string(&path).map_err(SnapshotError::storage(path))
    }

    fn archived(&self) -> Result<Vec<String>> {
        let entries = match fs::read_dir(&self.archive_dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::storage(&self.archive_dir)(e)),
        };
        let mut references = Vec::new();
        for entry in entries {
            let path = entry.map_err(SnapshotError::storage(&self.archive_dir))?.path();
            if path.is_file() && is_archive_name(&path) {
                references.push(self.reference(&path));
            }
        }
        references.sort();
        Ok(references)
    }

    fn remove_archived(&self, reference: &str) -> Result<()> {
        let path = self.resolve(reference);
        fs::remove_file(&path).map_err(SnapshotError::storage(path))
    }
}

fn is_archive_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|name| name.starts_with("diagram_") && name.ends_with(".xml"))
}

/// In-memory documents for tests and embedding. References look like `raw/diagram_<label>.xml`.
#[derive(Debug, Default)]
pub struct MemoryDocumentStore {
    state: Mutex<MemoryState>,
}

#[derive(Debug, Default)]
struct MemoryState {
    working: Option<(String, DateTime<Utc>)>,
    fallback: Option<(String, DateTime<Utc>)>,
    archive: BTreeMap<String, String>,
}

const MEMORY_WORKING: &str = "memory:working";
const MEMORY_FALLBACK: &str = "memory:fallback";

impl MemoryDocumentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// A store whose fallback slot holds `content`, like a shipped default diagram.
    pub fn with_fallback(content: impl Into<String>) -> Self {
        let store = Self::default();
        store.lock().fallback = Some((content.into(), Utc::now()));
        store
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl DocumentStore for MemoryDocumentStore {
    fn active(&self) -> Result<ActiveDocument> {
        let state = self.lock();
        let slot = state
            .working
            .as_ref()
            .map(|doc| (doc, MEMORY_WORKING))
            .or_else(|| state.fallback.as_ref().map(|doc| (doc, MEMORY_FALLBACK)));
        match slot {
            Some(((content, modified), source)) => Ok(ActiveDocument {
                content: content.clone(),
                source: source.to_string(),
                last_modified: *modified,
            }),
            None => Err(SnapshotError::NotFound {
                searched: vec![PathBuf::from(MEMORY_WORKING), PathBuf::from(MEMORY_FALLBACK)],
            }),
        }
    }

    fn set_active(&self, content: &str) -> Result<()> {
        self.lock().working = Some((content.to_string(), Utc::now()));
        Ok(())
    }

    fn archive(&self, content: &str, stamp: &Stamp) -> Result<String> {
        let reference = format!("raw/{}", stamp.archive_name());
        let mut state = self.lock();
        if state.archive.contains_key(&reference) {
            return Err(SnapshotError::Storage {
                path: PathBuf::from(&reference),
                source: io::Error::from(io::ErrorKind::AlreadyExists),
            });
        }
        state.archive.insert(reference.clone(), content.to_string());
        Ok(reference)
    }

    fn read_archived(&self, reference: &str) -> Result<String> {
        self.lock()
            .archive
            .get(reference)
            .cloned()
            .ok_or_else(|| SnapshotError::Storage {
                path: PathBuf::from(reference),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
    }

    fn archived(&self) -> Result<Vec<String>> {
        Ok(self.lock().archive.keys().cloned().collect())
    }

    fn remove_archived(&self, reference: &str) -> Result<()> {
        match self.lock().archive.remove(reference) {
            Some(_) => Ok(()),
            None => Err(SnapshotError::Storage {
                path: PathBuf::from(reference),
                source: io::Error::from(io::ErrorKind::NotFound),
            }),
        }
    }
}
