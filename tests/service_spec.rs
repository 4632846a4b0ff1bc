use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use diagram_snapshots::config::Config;
use diagram_snapshots::models::*;
use diagram_snapshots::render::{
    HtmlRenderer, SnapshotPage, SnapshotRenderer, DEFAULT_EMBED_URL, EMPTY_CATALOG_PLACEHOLDER,
};
use diagram_snapshots::service::{RenderRequest, SnapshotLayout, SnapshotService};
use diagram_snapshots::store::{DocumentStore, MemoryDocumentStore};
use diagram_snapshots::SnapshotError;
use speculate2::speculate;
use tempfile::TempDir;

const DIAGRAM: &str = r#"<mxfile host="embed.diagrams.net"><diagram id="p1" name="Page-1"><mxGraphModel><root><mxCell id="0"/><mxCell id="1" parent="0"/></root></mxGraphModel></diagram></mxfile>"#;
const UNCLOSED: &str = r#"<mxfile><diagram id="p1"></mxfile>"#;

/// Every file below `dir`, relative, with its contents.
fn tree(dir: &Path) -> Vec<(PathBuf, Vec<u8>)> {
    let mut files = Vec::new();
    let mut pending = vec![dir.to_path_buf()];
    while let Some(current) = pending.pop() {
        for entry in fs::read_dir(&current).expect("Failed to read dir") {
            let path = entry.expect("Bad entry").path();
            if path.is_dir() {
                pending.push(path);
            } else {
                let contents = fs::read(&path).expect("Failed to read file");
                files.push((path.strip_prefix(dir).unwrap().to_path_buf(), contents));
            }
        }
    }
    files.sort();
    files
}

/// The stamp label embedded in a name like `diagram_editor_<label>.html`.
fn label_of<'a>(name: &'a str, prefix: &str, suffix: &str) -> &'a str {
    name.strip_prefix(prefix)
        .and_then(|rest| rest.strip_suffix(suffix))
        .unwrap_or_else(|| panic!("unexpected name {}", name))
}

/// Document store whose archive always fails, counting the attempts.
struct BrokenArchive {
    inner: MemoryDocumentStore,
    archive_calls: AtomicUsize,
    activations: AtomicUsize,
}

impl BrokenArchive {
    fn new() -> Self {
        Self {
            inner: MemoryDocumentStore::with_fallback("<default/>"),
            archive_calls: AtomicUsize::new(0),
            activations: AtomicUsize::new(0),
        }
    }
}

impl DocumentStore for BrokenArchive {
    fn active(&self) -> diagram_snapshots::Result<ActiveDocument> {
        self.inner.active()
    }

    fn set_active(&self, content: &str) -> diagram_snapshots::Result<()> {
        self.activations.fetch_add(1, Ordering::SeqCst);
        self.inner.set_active(content)
    }

    fn archive(&self, _content: &str, _stamp: &Stamp) -> diagram_snapshots::Result<String> {
        self.archive_calls.fetch_add(1, Ordering::SeqCst);
        Err(SnapshotError::Storage {
            path: PathBuf::from("raw"),
            source: io::Error::from(io::ErrorKind::PermissionDenied),
        })
    }

    fn read_archived(&self, reference: &str) -> diagram_snapshots::Result<String> {
        self.inner.read_archived(reference)
    }

    fn archived(&self) -> diagram_snapshots::Result<Vec<String>> {
        self.inner.archived()
    }

    fn remove_archived(&self, reference: &str) -> diagram_snapshots::Result<()> {
        self.inner.remove_archived(reference)
    }
}

struct FixedRenderer;

impl SnapshotRenderer for FixedRenderer {
    fn render(&self, page: &SnapshotPage<'_>) -> String {
        format!("{}|{}|{}", page.title, page.note, page.document.len())
    }
}

speculate! {
    before {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let config = Config::with_root(dir.path());
        let service = SnapshotService::open(&config).expect("Failed to open service");
    }

    describe "submit_document" {
        it "records exactly one new entry" {
            let entry = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let entries = service.list_snapshots().expect("List failed");
            assert_eq!(entries.len(), 1);
            assert_eq!(entries[0], entry);
            assert!(entry.embed_url.is_none());
        }

        it "derives archive, page and timestamp from one stamp" {
            let entry = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let page_label = label_of(&entry.filename, "diagram_editor_", ".html");
            let archive_label = label_of(&entry.source_document, "snapshots/raw/diagram_", ".xml");
            assert_eq!(page_label, archive_label);
            assert!(page_label.starts_with(&entry.generated_at.format("%Y%m%d_%H%M%S").to_string()));

            assert!(config.snapshot_dir_path().join(&entry.filename).exists());
            assert!(dir.path().join(&entry.source_document).exists());
        }

        it "activates the submitted document" {
            fs::write(config.fallback_document_path(), "<default/>").expect("Write failed");

            service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let active = service.fetch_active_document().expect("Fetch failed");
            assert_eq!(active.content, DIAGRAM);
            assert_eq!(active.source, "diagram_workflow.xml");
        }

        it "archives the document verbatim" {
            let entry = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let archived = fs::read_to_string(dir.path().join(&entry.source_document)).expect("Read failed");
            assert_eq!(archived, DIAGRAM);
        }

        it "applies the editor defaults for title and note" {
            let entry = service
                .submit_document(&SubmitDocumentInput {
                    xml: Some(DIAGRAM.to_string()),
                    title: Some(String::new()),
                    note: None,
                })
                .expect("Submit failed");

            assert_eq!(entry.title, DEFAULT_SUBMIT_TITLE);
            assert_eq!(entry.note, DEFAULT_SUBMIT_NOTE);
        }

        it "renders a page with the escaped title" {
            let entry = service
                .submit_document(&SubmitDocumentInput {
                    xml: Some(DIAGRAM.to_string()),
                    title: Some("Q3 <draft>".to_string()),
                    note: Some("review & merge".to_string()),
                })
                .expect("Submit failed");

            let page = fs::read_to_string(config.snapshot_dir_path().join(&entry.filename)).expect("Read failed");
            assert!(page.contains("<h1>Q3 &lt;draft&gt;</h1>"));
            assert!(page.contains("<p>review &amp; merge</p>"));
        }

        it "lists the snapshot in the catalog" {
            let entry = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let catalog = fs::read_to_string(config.catalog_path()).expect("Read failed");
            assert!(catalog.contains(&format!(r#"href="{}""#, entry.filename)));
            assert!(!catalog.contains(EMPTY_CATALOG_PLACEHOLDER));
        }

        it "gives rapid submissions distinct names" {
            let first = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");
            let second = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            assert_ne!(first.filename, second.filename);
            assert_ne!(first.source_document, second.source_document);
            assert_eq!(service.list_snapshots().expect("List failed").len(), 2);
        }

        it "keeps the listing newest first" {
            for _ in 0..3 {
                service
                    .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                    .expect("Submit failed");
            }

            let entries = service.list_snapshots().expect("List failed");
            assert!(entries.windows(2).all(|pair| pair[0].generated_at >= pair[1].generated_at));
        }

        it "rejects malformed markup without touching any file" {
            fs::write(config.fallback_document_path(), "<default/>").expect("Write failed");
            service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");
            let untouched = tree(dir.path());

            let result = service.submit_document(&SubmitDocumentInput::new(UNCLOSED));

            assert!(matches!(result, Err(SnapshotError::InvalidDocument { .. })));
            assert_eq!(tree(dir.path()), untouched);
        }

        it "rejects a missing document" {
            let result = service.submit_document(&SubmitDocumentInput::default());
            assert!(matches!(result, Err(SnapshotError::InvalidDocument { .. })));
            assert!(service.list_snapshots().expect("List failed").is_empty());
        }

        it "records every submission made concurrently through clones" {
            let count = 6;

            thread::scope(|scope| {
                for i in 0..count {
                    let service = service.clone();
                    scope.spawn(move || {
                        service
                            .submit_document(&SubmitDocumentInput {
                                xml: Some(DIAGRAM.to_string()),
                                title: Some(format!("Concurrent {}", i)),
                                note: None,
                            })
                            .expect("Submit failed");
                    });
                }
            });

            let entries = service.list_snapshots().expect("List failed");
            assert_eq!(entries.len(), count);
            let archived = fs::read_dir(config.archive_dir_path()).expect("Read failed").count();
            assert_eq!(archived, count);
        }

        it "surfaces a catalog write failure without undoing earlier steps" {
            fs::create_dir_all(config.catalog_path()).expect("Failed to block catalog");

            let result = service.submit_document(&SubmitDocumentInput::new(DIAGRAM));

            assert!(matches!(result, Err(SnapshotError::Storage { .. })));
            let entries = service.list_snapshots().expect("List failed");
            assert_eq!(entries.len(), 1);
            assert!(config.snapshot_dir_path().join(&entries[0].filename).exists());
            assert_eq!(fs::read_dir(config.archive_dir_path()).expect("Read failed").count(), 1);
            assert!(config.catalog_path().is_dir());
        }

        it "stops at an archive failure without retrying" {
            fs::write(config.fallback_document_path(), "<default/>").expect("Write failed");
            fs::remove_dir_all(config.archive_dir_path()).expect("Remove failed");
            fs::write(config.archive_dir_path(), "in the way").expect("Write failed");

            let result = service.submit_document(&SubmitDocumentInput::new(DIAGRAM));

            let err = result.expect_err("Submit should fail");
            assert!(matches!(err, SnapshotError::Storage { .. }));
            assert!(!err.is_name_taken());
            assert!(!config.working_document_path().exists());
            assert!(!config.manifest_path().exists());
            assert_eq!(
                service.fetch_active_document().expect("Fetch failed").content,
                "<default/>"
            );
        }

        it "recovers from a corrupt manifest" {
            fs::write(config.manifest_path(), "[{ this is not json").expect("Write failed");
            assert!(service.list_snapshots().expect("List failed").is_empty());

            let entry = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            assert_eq!(service.list_snapshots().expect("List failed"), vec![entry]);
        }
    }

    describe "fetch_active_document" {
        it "fails with NotFound when nothing resolves" {
            assert!(matches!(
                service.fetch_active_document(),
                Err(SnapshotError::NotFound { .. })
            ));
        }

        it "serves the fallback document until something is submitted" {
            fs::write(config.fallback_document_path(), "<default/>").expect("Write failed");

            let active = service.fetch_active_document().expect("Fetch failed");
            assert_eq!(active.content, "<default/>");
            assert_eq!(active.source, "diagram.xml");
        }
    }

    describe "rebuild_catalog" {
        it "renders the placeholder for an empty manifest" {
            assert_eq!(service.rebuild_catalog().expect("Rebuild failed"), 0);

            let catalog = fs::read_to_string(config.catalog_path()).expect("Read failed");
            assert!(catalog.contains(EMPTY_CATALOG_PLACEHOLDER));
            assert!(!catalog.contains("<ul>"));
        }

        it "is byte-identical across rebuilds" {
            service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            service.rebuild_catalog().expect("Rebuild failed");
            let first = fs::read(config.catalog_path()).expect("Read failed");
            service.rebuild_catalog().expect("Rebuild failed");
            let second = fs::read(config.catalog_path()).expect("Read failed");

            assert_eq!(first, second);
        }
    }

    describe "render_file" {
        before {
            let source = dir.path().join("diagram.xml");
            fs::write(&source, DIAGRAM).expect("Write failed");
        }

        it "records a page without archiving or activating the document" {
            let outcome = service
                .render_file(RenderRequest {
                    document: source.clone(),
                    title: "Release".to_string(),
                    note: None,
                    embed_url: None,
                    output: None,
                })
                .expect("Render failed");

            let entry = outcome.entry.expect("Entry should be recorded");
            assert!(outcome.artifact.exists());
            assert!(entry.note.starts_with("Generated "));
            assert!(entry.note.ends_with(" from diagram.xml."));
            assert_eq!(entry.embed_url.as_deref(), Some(DEFAULT_EMBED_URL));
            assert_eq!(service.list_snapshots().expect("List failed"), vec![entry]);
            assert!(!config.working_document_path().exists());
            assert!(fs::read_dir(config.archive_dir_path()).expect("Read failed").next().is_none());
        }

        it "skips the manifest for pages outside the snapshot directory" {
            let output = dir.path().join("export/page.html");

            let outcome = service
                .render_file(RenderRequest {
                    document: source.clone(),
                    title: "Export".to_string(),
                    note: Some("offline copy".to_string()),
                    embed_url: None,
                    output: Some(output.clone()),
                })
                .expect("Render failed");

            assert!(outcome.entry.is_none());
            assert!(output.exists());
            assert!(service.list_snapshots().expect("List failed").is_empty());
        }

        it "never takes over a page written by another service on the same tree" {
            let other = SnapshotService::open(&config).expect("Failed to open service");
            let submitted = other
                .submit_document(&SubmitDocumentInput {
                    xml: Some(DIAGRAM.to_string()),
                    title: Some("Submitted".to_string()),
                    note: None,
                })
                .expect("Submit failed");

            let outcome = service
                .render_file(RenderRequest {
                    document: source.clone(),
                    title: "Rendered".to_string(),
                    note: None,
                    embed_url: None,
                    output: None,
                })
                .expect("Render failed");

            let rendered = outcome.entry.expect("Entry should be recorded");
            assert_ne!(rendered.filename, submitted.filename);
            let entries = service.list_snapshots().expect("List failed");
            assert_eq!(entries.len(), 2);
            assert!(entries.contains(&submitted));
            let page = fs::read_to_string(config.snapshot_dir_path().join(&submitted.filename))
                .expect("Read failed");
            assert!(page.contains("<h1>Submitted</h1>"));
        }

        it "rejects a malformed document file" {
            fs::write(&source, UNCLOSED).expect("Write failed");

            let result = service.render_file(RenderRequest {
                document: source.clone(),
                title: "Broken".to_string(),
                note: None,
                embed_url: None,
                output: None,
            });

            assert!(matches!(result, Err(SnapshotError::InvalidDocument { .. })));
        }
    }

    describe "sweep" {
        before {
            let kept = service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");
            let orphan_document = config.archive_dir_path().join("diagram_19990101_000000.xml");
            let orphan_page = config.snapshot_dir_path().join("diagram_editor_19990101_000000.html");
            fs::write(&orphan_document, DIAGRAM).expect("Write failed");
            fs::write(&orphan_page, "<html></html>").expect("Write failed");
        }

        it "reports orphans without deleting on a dry run" {
            let report = service.sweep(true).expect("Sweep failed");

            assert_eq!(report.documents, ["snapshots/raw/diagram_19990101_000000.xml"]);
            assert_eq!(report.artifacts, ["diagram_editor_19990101_000000.html"]);
            assert!(orphan_document.exists());
            assert!(orphan_page.exists());
        }

        it "deletes orphans and keeps referenced files" {
            service.sweep(false).expect("Sweep failed");

            assert!(!orphan_document.exists());
            assert!(!orphan_page.exists());
            assert!(dir.path().join(&kept.source_document).exists());
            assert!(config.snapshot_dir_path().join(&kept.filename).exists());
            assert!(config.catalog_path().exists());
            assert!(config.manifest_path().exists());
        }

        it "refuses to run while a recovered manifest is kept aside" {
            fs::write(config.manifest_path(), "oops").expect("Write failed");
            service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            let report = service.sweep(false).expect("Sweep failed");

            assert!(report.skipped.is_some());
            assert!(orphan_document.exists());
            assert!(orphan_page.exists());
            assert!(dir.path().join(&kept.source_document).exists());
        }

        it "refuses to run while the manifest is unreadable" {
            fs::write(config.manifest_path(), "oops").expect("Write failed");

            let report = service.sweep(false).expect("Sweep failed");

            assert!(report.skipped.is_some());
            assert!(orphan_document.exists());
            assert!(dir.path().join(&kept.source_document).exists());
        }
    }

    describe "with an in-memory document store" {
        before {
            let documents = Arc::new(MemoryDocumentStore::with_fallback("<default/>"));
            let memory_service = SnapshotService::new(
                documents.clone(),
                Arc::new(HtmlRenderer),
                SnapshotLayout::in_dir(dir.path().join("pages")),
            );
        }

        it "archives into the store and activates the document" {
            let entry = memory_service
                .submit_document(&SubmitDocumentInput::new(DIAGRAM))
                .expect("Submit failed");

            assert!(entry.source_document.starts_with("raw/diagram_"));
            assert_eq!(memory_service.fetch_active_document().expect("Fetch failed").content, DIAGRAM);
            assert_eq!(documents.archived().expect("List failed"), [entry.source_document.clone()]);
        }

        it "propagates a storage failure from the document store once" {
            let broken = Arc::new(BrokenArchive::new());
            let failing = SnapshotService::new(
                broken.clone(),
                Arc::new(HtmlRenderer),
                SnapshotLayout::in_dir(dir.path().join("broken")),
            );

            let result = failing.create_snapshot(DIAGRAM, "T", "N");

            assert!(matches!(result, Err(SnapshotError::Storage { .. })));
            assert_eq!(broken.archive_calls.load(Ordering::SeqCst), 1);
            assert_eq!(broken.activations.load(Ordering::SeqCst), 0);
            assert!(failing.list_snapshots().expect("List failed").is_empty());
            assert!(!dir.path().join("broken").exists());
        }

        it "uses the injected renderer" {
            let custom = SnapshotService::new(
                documents.clone(),
                Arc::new(FixedRenderer),
                SnapshotLayout::in_dir(dir.path().join("custom")),
            );

            let entry = custom
                .create_snapshot(DIAGRAM, "T", "N")
                .expect("Snapshot failed");

            let page = fs::read_to_string(dir.path().join("custom").join(&entry.filename)).expect("Read failed");
            assert_eq!(page, format!("T|N|{}", DIAGRAM.len()));
        }
    }
}
