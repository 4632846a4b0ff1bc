//! Snapshot orchestration.
//!
//! [`SnapshotService`] is the only writer of the manifest and the catalog. A
//! submission archives the raw document, activates it, renders a snapshot
//! page, records a manifest entry and regenerates the catalog. The steps are
//! not transactional: a failure part way through can leave an archived
//! document or a page that no entry references. [`SnapshotService::sweep`]
//! removes those.

use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};

use crate::config::Config;
use crate::error::{Result, SnapshotError};
use crate::models::*;
use crate::render::{build_catalog, HtmlRenderer, SnapshotPage, SnapshotRenderer, DEFAULT_EMBED_URL};
use crate::store::{write_atomic, write_new, DocumentStore, FsDocumentStore, ManifestLoad, ManifestStore};
use crate::validate;

/// Attempts at finding a free name before giving up on a submission.
const MAX_NAME_PROBES: usize = 64;

/// Where snapshot pages, the manifest and the catalog live.
#[derive(Debug, Clone)]
pub struct SnapshotLayout {
    pub snapshot_dir: PathBuf,
    pub manifest_path: PathBuf,
    pub catalog_path: PathBuf,
    pub embed_url: String,
}

impl SnapshotLayout {
    /// The standard layout inside `snapshot_dir`.
    pub fn in_dir(snapshot_dir: impl Into<PathBuf>) -> Self {
        let snapshot_dir = snapshot_dir.into();
        Self {
            manifest_path: snapshot_dir.join("manifest.json"),
            catalog_path: snapshot_dir.join("index.html"),
            snapshot_dir,
            embed_url: DEFAULT_EMBED_URL.to_string(),
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self {
            snapshot_dir: config.snapshot_dir_path(),
            manifest_path: config.manifest_path(),
            catalog_path: config.catalog_path(),
            embed_url: config.embed_url.clone(),
        }
    }
}

/// Input for rendering an existing document file without archiving or activating it.
#[derive(Debug, Clone)]
pub struct RenderRequest {
    pub document: PathBuf,
    pub title: String,
    /// Defaults to "Generated <timestamp> from <file name>."
    pub note: Option<String>,
    /// Defaults to the configured embed URL.
    pub embed_url: Option<String>,
    /// Defaults to `<snapshot_dir>/diagram_editor_<label>.html`.
    pub output: Option<PathBuf>,
}

/// Result of [`SnapshotService::render_file`].
#[derive(Debug, Clone)]
pub struct RenderOutcome {
    pub artifact: PathBuf,
    /// `None` when the page was written outside the snapshot directory and
    /// therefore not recorded in the manifest.
    pub entry: Option<SnapshotEntry>,
}

/// Files removed (or, on a dry run, that would be removed) by a sweep.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub documents: Vec<String>,
    pub artifacts: Vec<String>,
    pub dry_run: bool,
    /// Set when the sweep refused to run.
    pub skipped: Option<String>,
}

#[derive(Clone)]
pub struct SnapshotService {
    inner: Arc<ServiceInner>,
}

struct ServiceInner {
    documents: Arc<dyn DocumentStore>,
    renderer: Arc<dyn SnapshotRenderer>,
    manifest: ManifestStore,
    layout: SnapshotLayout,
    clock: StampClock,
    /// Serializes operations that allocate names or rewrite the catalog.
    operation_lock: Mutex<()>,
}

impl SnapshotService {
    pub fn new(
        documents: Arc<dyn DocumentStore>,
        renderer: Arc<dyn SnapshotRenderer>,
        layout: SnapshotLayout,
    ) -> Self {
        Self {
            inner: Arc::new(ServiceInner {
                documents,
                renderer,
                manifest: ManifestStore::new(layout.manifest_path.clone()),
                layout,
                clock: StampClock::new(),
                operation_lock: Mutex::new(()),
            }),
        }
    }

    /// Filesystem-backed service for `config`, creating the snapshot directories.
    pub fn open(config: &Config) -> Result<Self> {
        let snapshot_dir = config.snapshot_dir_path();
        let archive_dir = config.archive_dir_path();
        fs::create_dir_all(&archive_dir).map_err(SnapshotError::storage(&archive_dir))?;

        let documents = FsDocumentStore::new(
            config.root.clone(),
            config.working_document_path(),
            config.fallback_document_path(),
            archive_dir,
        );
        tracing::debug!(snapshot_dir = %snapshot_dir.display(), "Opened snapshot tree");
        Ok(Self::new(
            Arc::new(documents),
            Arc::new(HtmlRenderer),
            SnapshotLayout::from_config(config),
        ))
    }

    pub fn layout(&self) -> &SnapshotLayout {
        &self.inner.layout
    }

    pub fn manifest(&self) -> &ManifestStore {
        &self.inner.manifest
    }

    fn lock(&self) -> MutexGuard<'_, ()> {
        self.inner
            .operation_lock
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    // ============================================================
    // Request-layer boundary
    // ============================================================

    /// The document the editor should load.
    pub fn fetch_active_document(&self) -> Result<ActiveDocument> {
        self.inner.documents.active()
    }

    /// Manifest contents, newest first.
    pub fn list_snapshots(&self) -> Result<Vec<SnapshotEntry>> {
        self.inner.manifest.load()
    }

    /// Snapshot a submitted document, applying the editor's default title and note.
    pub fn submit_document(&self, input: &SubmitDocumentInput) -> Result<SnapshotEntry> {
        let xml = input
            .xml
            .as_deref()
            .filter(|xml| !xml.is_empty())
            .ok_or_else(|| SnapshotError::InvalidDocument {
                message: "Missing xml".to_string(),
                line: 1,
                column: 1,
            })?;
        self.create_snapshot(xml, input.title_or_default(), input.note_or_default())
    }

    // ============================================================
    // Snapshots
    // ============================================================

    /// Archive, activate, render, record and catalog `raw`.
    ///
    /// One timestamp is captured up front; the archive name, the page name and
    /// the entry's `generated_at` all derive from it. Malformed markup is
    /// rejected before anything is written.
    pub fn create_snapshot(&self, raw: &str, title: &str, note: &str) -> Result<SnapshotEntry> {
        let now = Utc::now();
        if let Err(e) = validate::check_well_formed(raw) {
            tracing::warn!("Rejected submitted document: {}", e);
            return Err(e);
        }

        let _guard = self.lock();
        let (stamp, archived) = self.archive_unique(raw, now)?;
        self.inner.documents.set_active(raw)?;

        let document = self.inner.documents.read_archived(&archived)?;
        let filename = stamp.artifact_name();
        let html = self.inner.renderer.render(&SnapshotPage {
            document: &document,
            title,
            note,
            embed_url: &self.inner.layout.embed_url,
        });
        // Never overwrite a page another process created after the name check.
        write_new(
            &self.inner.layout.snapshot_dir.join(&filename),
            html.as_bytes(),
        )?;

        let entry = SnapshotEntry {
            filename,
            title: title.to_string(),
            note: note.to_string(),
            generated_at: stamp.at,
            source_document: archived,
            embed_url: None,
        };
        self.record(&entry)?;

        tracing::info!(
            snapshot = %entry.filename,
            source = %entry.source_document,
            "Created snapshot"
        );
        Ok(entry)
    }

    /// Archive under the first stamp whose archive and page names are both free.
    fn archive_unique(&self, raw: &str, now: DateTime<Utc>) -> Result<(Stamp, String)> {
        let mut stamp = self.inner.clock.stamp_at(now);
        let mut last_err = None;
        for _ in 0..MAX_NAME_PROBES {
            if self.artifact_path(&stamp).exists() {
                stamp = self.inner.clock.bump(stamp);
                continue;
            }
            match self.inner.documents.archive(raw, &stamp) {
                Ok(reference) => return Ok((stamp, reference)),
                Err(e) if e.is_name_taken() => {
                    tracing::debug!(label = %stamp, "Archive name taken, probing next");
                    last_err = Some(e);
                    stamp = self.inner.clock.bump(stamp);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SnapshotError::Storage {
            path: self.artifact_path(&stamp),
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        }))
    }

    /// Create the page under the first free artifact name at or after `stamp`.
    ///
    /// Another process with its own clock may already hold the name; a taken
    /// name is never overwritten.
    fn write_unique_artifact(&self, mut stamp: Stamp, html: &str) -> Result<(Stamp, PathBuf)> {
        let mut last_err = None;
        for _ in 0..MAX_NAME_PROBES {
            let path = self.artifact_path(&stamp);
            match write_new(&path, html.as_bytes()) {
                Ok(()) => return Ok((stamp, path)),
                Err(e) if e.is_name_taken() => {
                    tracing::debug!(label = %stamp, "Page name taken, probing next");
                    last_err = Some(e);
                    stamp = self.inner.clock.bump(stamp);
                }
                Err(e) => return Err(e),
            }
        }
        Err(last_err.unwrap_or_else(|| SnapshotError::Storage {
            path: self.artifact_path(&stamp),
            source: io::Error::from(io::ErrorKind::AlreadyExists),
        }))
    }

    fn artifact_path(&self, stamp: &Stamp) -> PathBuf {
        self.inner.layout.snapshot_dir.join(stamp.artifact_name())
    }

    /// Render an existing document file, as the standalone generator does.
    ///
    /// The document is neither archived nor activated. Pages written outside
    /// the snapshot directory are not recorded.
    pub fn render_file(&self, request: RenderRequest) -> Result<RenderOutcome> {
        let now = Utc::now();
        let document = fs::read_to_string(&request.document)
            .map_err(SnapshotError::storage(&request.document))?;
        validate::check_well_formed(&document)?;

        let _guard = self.lock();
        let stamp = self.inner.clock.stamp_at(now);
        let note = request.note.clone().unwrap_or_else(|| {
            format!(
                "Generated {} from {}.",
                format_iso_seconds(&stamp.at),
                request
                    .document
                    .file_name()
                    .map(|n| n.to_string_lossy().into_owned())
                    .unwrap_or_default()
            )
        });
        let embed_url = request
            .embed_url
            .clone()
            .unwrap_or_else(|| self.inner.layout.embed_url.clone());
        let html = self.inner.renderer.render(&SnapshotPage {
            document: &document,
            title: &request.title,
            note: &note,
            embed_url: &embed_url,
        });
        let (stamp, target) = match request.output.clone() {
            Some(target) => {
                write_atomic(&target, html.as_bytes())?;
                (stamp, target)
            }
            None => self.write_unique_artifact(stamp, &html)?,
        };

        let Some(filename) = relative_to(&target, &self.inner.layout.snapshot_dir) else {
            tracing::info!(
                artifact = %target.display(),
                "Page is outside the snapshot directory, skipping manifest update"
            );
            return Ok(RenderOutcome {
                artifact: target,
                entry: None,
            });
        };

        let entry = SnapshotEntry {
            filename,
            title: request.title,
            note,
            generated_at: stamp.at,
            source_document: request.document.to_string_lossy().into_owned(),
            embed_url: Some(embed_url),
        };
        self.record(&entry)?;
        tracing::info!(snapshot = %entry.filename, source = %entry.source_document, "Rendered snapshot");

        Ok(RenderOutcome {
            artifact: target,
            entry: Some(entry),
        })
    }

    fn record(&self, entry: &SnapshotEntry) -> Result<()> {
        self.inner.manifest.upsert(entry.clone())?;
        self.write_catalog().map(|_| ())
    }

    // ============================================================
    // Catalog
    // ============================================================

    /// Regenerate the catalog page from the manifest. Returns the entry count.
    pub fn rebuild_catalog(&self) -> Result<usize> {
        let _guard = self.lock();
        self.write_catalog()
    }

    fn write_catalog(&self) -> Result<usize> {
        let entries = self.inner.manifest.load()?;
        let html = build_catalog(&entries);
        write_atomic(&self.inner.layout.catalog_path, html.as_bytes())?;
        Ok(entries.len())
    }

    // ============================================================
    // Orphan sweep
    // ============================================================

    /// Remove archived documents and snapshot pages that no manifest entry references.
    ///
    /// Refuses to run while the manifest is unreadable, and while a manifest
    /// replaced by an earlier recovery is still kept aside: the entries lost
    /// with it may reference files the current manifest does not. Delete or
    /// merge the `.corrupt.*` files to re-enable sweeping.
    pub fn sweep(&self, dry_run: bool) -> Result<SweepReport> {
        let _guard = self.lock();
        let preserved = self.inner.manifest.preserved_corrupt()?;
        if let Some(first) = preserved.first() {
            let reason = format!(
                "{} unreadable manifest(s) kept aside, starting with {}",
                preserved.len(),
                first.display()
            );
            tracing::warn!("Skipping sweep: {}", reason);
            return Ok(SweepReport {
                dry_run,
                skipped: Some(reason),
                ..SweepReport::default()
            });
        }
        let entries = match self.inner.manifest.load_report()? {
            ManifestLoad::Recovered { reason } => {
                tracing::warn!("Skipping sweep, manifest is unreadable: {}", reason);
                return Ok(SweepReport {
                    dry_run,
                    skipped: Some(reason),
                    ..SweepReport::default()
                });
            }
            loaded => loaded.into_entries(),
        };

        let referenced_documents: HashSet<&str> =
            entries.iter().map(|e| e.source_document.as_str()).collect();
        let referenced_pages: HashSet<&str> = entries.iter().map(|e| e.filename.as_str()).collect();

        let documents: Vec<String> = self
            .inner
            .documents
            .archived()?
            .into_iter()
            .filter(|reference| !referenced_documents.contains(reference.as_str()))
            .collect();
        let artifacts: Vec<String> = self
            .artifact_names()?
            .into_iter()
            .filter(|name| !referenced_pages.contains(name.as_str()))
            .collect();

        if !dry_run {
            for reference in &documents {
                self.inner.documents.remove_archived(reference)?;
            }
            for name in &artifacts {
                let path = self.inner.layout.snapshot_dir.join(name);
                fs::remove_file(&path).map_err(SnapshotError::storage(path))?;
            }
            tracing::info!(
                documents = documents.len(),
                artifacts = artifacts.len(),
                "Swept orphaned snapshot files"
            );
        }

        Ok(SweepReport {
            documents,
            artifacts,
            dry_run,
            skipped: None,
        })
    }

    /// Snapshot page file names directly inside the snapshot directory.
    fn artifact_names(&self) -> Result<Vec<String>> {
        let dir = &self.inner.layout.snapshot_dir;
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(SnapshotError::storage(dir)(e)),
        };
        let mut names = Vec::new();
        for entry in entries {
            let entry = entry.map_err(SnapshotError::storage(dir))?;
            let name = entry.file_name().to_string_lossy().into_owned();
            if name.starts_with(ARTIFACT_PREFIX) && name.ends_with(".html") && entry.path().is_file()
            {
                names.push(name);
            }
        }
        names.sort();
        Ok(names)
    }
}

/// `path` relative to `base` when it lies inside it, using `/` separators.
fn relative_to(path: &Path, base: &Path) -> Option<String> {
    let path = fs::canonicalize(path).ok()?;
    let base = fs::canonicalize(base).ok()?;
    let relative = path.strip_prefix(&base).ok()?;
    Some(relative.to_string_lossy().replace('\\', "/"))
}
