use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use uuid::Uuid;

use super::atomic::write_atomic;
use crate::error::{Result, SnapshotError};
use crate::models::SnapshotEntry;

/// Outcome of reading the manifest file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestLoad {
    /// No manifest has been written yet.
    Missing,
    Loaded(Vec<SnapshotEntry>),
    /// The file did not parse and is treated as empty.
    Recovered { reason: String },
}

impl ManifestLoad {
    pub fn into_entries(self) -> Vec<SnapshotEntry> {
        match self {
            ManifestLoad::Loaded(entries) => entries,
            ManifestLoad::Missing | ManifestLoad::Recovered { .. } => Vec::new(),
        }
    }
}

/// The persisted, newest-first list of snapshot entries.
///
/// Every mutation is a full load, modify and atomic rewrite under one lock.
#[derive(Debug)]
pub struct ManifestStore {
    path: PathBuf,
    write_lock: Mutex<()>,
}

impl ManifestStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            write_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Entries in persisted order. Missing or unparseable manifests read as empty.
    pub fn load(&self) -> Result<Vec<SnapshotEntry>> {
        self.load_report().map(ManifestLoad::into_entries)
    }

    /// Like [`load`](Self::load), but says whether the file was missing or recovered.
    pub fn load_report(&self) -> Result<ManifestLoad> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(ManifestLoad::Missing),
            Err(e) if e.kind() == io::ErrorKind::InvalidData => {
                return Ok(self.recovered(e.to_string()));
            }
            Err(e) => return Err(SnapshotError::storage(&self.path)(e)),
        };

        match serde_json::from_str::<Vec<SnapshotEntry>>(&raw) {
            Ok(entries) => Ok(ManifestLoad::Loaded(entries)),
            Err(e) => Ok(self.recovered(e.to_string())),
        }
    }

    fn recovered(&self, reason: String) -> ManifestLoad {
        tracing::warn!(
            path = %self.path.display(),
            reason = %reason,
            "Manifest is unreadable, treating it as empty"
        );
        ManifestLoad::Recovered { reason }
    }

    /// Insert `entry`, replacing any entry with the same filename, then persist
    /// the whole manifest sorted newest first.
    pub fn upsert(&self, entry: SnapshotEntry) -> Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(PoisonError::into_inner);

        let mut entries = match self.load_report()? {
            ManifestLoad::Recovered { .. } => {
                self.preserve_corrupt()?;
                Vec::new()
            }
            loaded => loaded.into_entries(),
        };

        entries.retain(|existing| existing.filename != entry.filename);
        entries.push(entry);
        sort_newest_first(&mut entries);
        self.persist(&entries)
    }

    fn persist(&self, entries: &[SnapshotEntry]) -> Result<()> {
        let mut json = serde_json::to_string_pretty(entries)?;
        json.push('\n');
        write_atomic(&self.path, json.as_bytes())
    }

    /// Manifests moved aside by earlier recoveries, sorted by name.
    pub fn preserved_corrupt(&self) -> Result<Vec<PathBuf>> {
        let prefix = format!("{}.corrupt.", self.file_name());
        let dir = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::storage(dir)(e)),
        };
        let mut preserved = Vec::new();
        for entry in entries {
            let entry = entry.map_err(SnapshotError::storage(dir))?;
            if entry.file_name().to_string_lossy().starts_with(&prefix) {
                preserved.push(entry.path());
            }
        }
        preserved.sort();
        Ok(preserved)
    }

    fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| "manifest.json".to_string())
    }

    /// Move an unparseable manifest aside before it is replaced.
    fn preserve_corrupt(&self) -> Result<()> {
        let aside = self.path.with_file_name(format!(
            "{}.corrupt.{}",
            self.file_name(),
            Uuid::new_v4().simple()
        ));
        fs::rename(&self.path, &aside).map_err(SnapshotError::storage(&self.path))?;
        tracing::warn!(
            path = %self.path.display(),
            preserved = %aside.display(),
            "Replacing unreadable manifest; previous contents kept aside"
        );
        Ok(())
    }
}

/// Sort by `generated_at` descending. Stable: equal timestamps keep their order.
pub fn sort_newest_first(entries: &mut [SnapshotEntry]) {
    entries.sort_by(|a, b| b.generated_at.cmp(&a.generated_at));
}
