use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{format_iso_seconds, SnapshotEntry};

/// Default title for snapshots submitted from the embedded editor.
pub const DEFAULT_SUBMIT_TITLE: &str = "Auto-save snapshot";
/// Default note for snapshots submitted from the embedded editor.
pub const DEFAULT_SUBMIT_NOTE: &str = "Saved from embedded editor";

/// The document the live editor currently works on.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActiveDocument {
    pub content: String,
    /// Where the content was resolved from (working or fallback slot).
    pub source: String,
    pub last_modified: DateTime<Utc>,
}

/// Response body of `GET /api/latest`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestDocumentResponse {
    pub xml: String,
    pub source: String,
    pub updated_at: String,
}

impl From<ActiveDocument> for LatestDocumentResponse {
    fn from(doc: ActiveDocument) -> Self {
        Self {
            xml: doc.content,
            source: doc.source,
            updated_at: format_iso_seconds(&doc.last_modified),
        }
    }
}

/// Input for submitting a document. Title and note fall back to the editor defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SubmitDocumentInput {
    #[serde(default)]
    pub xml: Option<String>,
    #[serde(default)]
    pub title: Option<String>,
    #[serde(default)]
    pub note: Option<String>,
}

impl SubmitDocumentInput {
    pub fn new(xml: impl Into<String>) -> Self {
        Self {
            xml: Some(xml.into()),
            title: None,
            note: None,
        }
    }

    /// Title to record; empty strings count as missing.
    pub fn title_or_default(&self) -> &str {
        non_empty(self.title.as_deref()).unwrap_or(DEFAULT_SUBMIT_TITLE)
    }

    /// Note to record; empty strings count as missing.
    pub fn note_or_default(&self) -> &str {
        non_empty(self.note.as_deref()).unwrap_or(DEFAULT_SUBMIT_NOTE)
    }
}

fn non_empty(value: Option<&str>) -> Option<&str> {
    value.filter(|v| !v.is_empty())
}

/// Response body of `POST /api/save`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitDocumentResponse {
    pub status: String,
    pub timestamp: String,
    pub snapshot: String,
    pub raw_xml: String,
}

impl From<&SnapshotEntry> for SubmitDocumentResponse {
    fn from(entry: &SnapshotEntry) -> Self {
        Self {
            status: "ok".to_string(),
            timestamp: format_iso_seconds(&entry.generated_at),
            snapshot: entry.filename.clone(),
            raw_xml: entry.source_document.clone(),
        }
    }
}
