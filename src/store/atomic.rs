use std::fs;
use std::io::{self, Write};
use std::path::Path;

use uuid::Uuid;

use crate::error::{Result, SnapshotError};

/// Replace `path` with `contents` via a temp file in the same directory and a rename.
///
/// Readers see either the old file or the complete new one, never a truncated write.
pub fn write_atomic(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    ensure_dir(parent)?;

    let file_name = path.file_name().ok_or_else(|| SnapshotError::Storage {
        path: path.to_path_buf(),
        source: io::Error::other("path has no file name"),
    })?;
    let tmp_path = parent.join(format!(
        ".{}.{}.tmp",
        file_name.to_string_lossy(),
        Uuid::new_v4().simple()
    ));

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(&tmp_path)
        .map_err(SnapshotError::storage(&tmp_path))?;
    let written = file.write_all(contents).and_then(|()| file.sync_all());
    drop(file);
    if let Err(source) = written {
        let _ = fs::remove_file(&tmp_path);
        return Err(SnapshotError::Storage {
            path: tmp_path,
            source,
        });
    }

    if let Err(source) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(SnapshotError::Storage {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Create `path` with `contents`, failing with `AlreadyExists` instead of overwriting.
///
/// A failed write removes the partial file.
pub fn write_new(path: &Path, contents: &[u8]) -> Result<()> {
    let parent = parent_dir(path);
    ensure_dir(parent)?;

    let mut file = fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)
        .map_err(SnapshotError::storage(path))?;
    let written = file.write_all(contents).and_then(|()| file.sync_all());
    drop(file);
    if let Err(source) = written {
        let _ = fs::remove_file(path);
        return Err(SnapshotError::Storage {
            path: path.to_path_buf(),
            source,
        });
    }
    Ok(())
}

/// Create `dir` if needed. A non-directory in the way is reported as such, so it
/// is never mistaken for a taken name.
fn ensure_dir(dir: &Path) -> Result<()> {
    fs::create_dir_all(dir).map_err(|source| {
        let source = if source.kind() == io::ErrorKind::AlreadyExists {
            io::Error::other(format!("{} exists and is not a directory", dir.display()))
        } else {
            source
        };
        SnapshotError::Storage {
            path: dir.to_path_buf(),
            source,
        }
    })
}

fn parent_dir(path: &Path) -> &Path {
    match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    }
}
