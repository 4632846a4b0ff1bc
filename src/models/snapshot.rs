use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A manifest record describing one rendered snapshot.
///
/// The serialized keys match manifests already written by earlier tooling
/// (`generated_at`, `diagram`); the camel-case names are accepted on read.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    /// Snapshot page path relative to the snapshot directory. Unique within the manifest.
    pub filename: String,
    pub title: String,
    pub note: String,
    #[serde(alias = "generatedAt", with = "iso_seconds")]
    pub generated_at: DateTime<Utc>,
    /// Reference to the document the page was rendered from.
    #[serde(rename = "diagram", alias = "sourceDocument")]
    pub source_document: String,
    /// Editor embed URL the page was rendered with. Set for pages from the
    /// standalone renderer; submitted snapshots use the configured URL and leave it unset.
    #[serde(
        rename = "iframe_url",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub embed_url: Option<String>,
}

impl SnapshotEntry {
    /// Heading shown in the catalog. Falls back to the file name for untitled entries.
    pub fn display_title(&self) -> &str {
        if self.title.trim().is_empty() {
            &self.filename
        } else {
            &self.title
        }
    }
}

/// Formats a timestamp the way manifest records store it: UTC, second precision.
pub fn format_iso_seconds(at: &DateTime<Utc>) -> String {
    at.format("%Y-%m-%dT%H:%M:%S+00:00").to_string()
}

/// Serde adapter for `generated_at`. Writes `YYYY-MM-DDTHH:MM:SS+00:00`,
/// reads any RFC 3339 timestamp.
pub mod iso_seconds {
    use chrono::{DateTime, Utc};
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(at: &DateTime<Utc>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        serializer.serialize_str(&super::format_iso_seconds(at))
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<DateTime<Utc>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let raw = String::deserialize(deserializer)?;
        DateTime::parse_from_rfc3339(&raw)
            .map(|at| at.with_timezone(&Utc))
            .map_err(de::Error::custom)
    }
}
