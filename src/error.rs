use std::io;
use std::path::PathBuf;

use thiserror::Error;

/// Errors surfaced by the snapshot core.
///
/// A corrupt manifest is not an error: it is recovered as an empty
/// manifest and reported through [`ManifestLoad`](crate::store::ManifestLoad).
#[derive(Debug, Error)]
pub enum SnapshotError {
    /// Neither the working nor the fallback document exists.
    #[error("No diagram available")]
    NotFound { searched: Vec<PathBuf> },

    /// The submitted markup is not well-formed. Raised before anything is written.
    #[error("Invalid XML: {message} (line {line}, column {column})")]
    InvalidDocument {
        message: String,
        line: usize,
        column: usize,
    },

    /// A read, write or rename failed at the filesystem boundary.
    #[error("Storage failure at {}: {source}", path.display())]
    Storage {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to serialize manifest: {0}")]
    Serialize(#[from] serde_json::Error),
}

pub type Result<T> = std::result::Result<T, SnapshotError>;

impl SnapshotError {
    /// Adapter for `map_err` on filesystem calls.
    pub(crate) fn storage(path: impl Into<PathBuf>) -> impl FnOnce(io::Error) -> Self {
        let path = path.into();
        move |source| SnapshotError::Storage { path, source }
    }

    /// True when a create-new write hit an existing file.
    pub fn is_name_taken(&self) -> bool {
        matches!(
            self,
            SnapshotError::Storage { source, .. } if source.kind() == io::ErrorKind::AlreadyExists
        )
    }
}
