//! Configuration for the snapshot tree and the HTTP server.
//!
//! Resolution order: built-in defaults, then the optional JSON file at
//! `<config_dir>/diagram-snapshots/config.json`, then environment variables:
//! - `DSNAP_ROOT` - project root holding the working document and snapshots
//! - `DSNAP_SNAPSHOT_DIR` - snapshot directory (relative paths resolve against the root)
//! - `DSNAP_EMBED_URL` - diagram editor embed URL
//! - `DSNAP_ADDR` - HTTP bind address
//!
//! CLI flags are applied on top by the binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::render::DEFAULT_EMBED_URL;

const APP_NAME: &str = "diagram-snapshots";
const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Project root. Static files are served from here.
    pub root: PathBuf,
    /// Document the editor reads and every submission overwrites.
    pub working_document: PathBuf,
    /// Document served when the working document does not exist yet.
    pub fallback_document: PathBuf,
    /// Directory holding snapshot pages, the manifest, the catalog and the raw archive.
    pub snapshot_dir: PathBuf,
    pub embed_url: String,
    pub addr: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            root: PathBuf::from("."),
            working_document: PathBuf::from("diagram_workflow.xml"),
            fallback_document: PathBuf::from("diagram.xml"),
            snapshot_dir: PathBuf::from("snapshots"),
            embed_url: DEFAULT_EMBED_URL.to_string(),
            addr: "127.0.0.1:5000".to_string(),
        }
    }
}

impl Config {
    /// Defaults, the config file and the environment, in that order.
    /// An unreadable config file is reported and skipped.
    pub fn load() -> Self {
        let config = match Self::try_load_file() {
            Ok(config) => config,
            Err(e) => {
                tracing::warn!("Failed to load config file, using defaults: {:#}", e);
                Self::default()
            }
        };
        config.with_env()
    }

    /// A default layout rooted at `root`.
    pub fn with_root(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            ..Self::default()
        }
    }

    fn try_load_file() -> Result<Self> {
        let Some(path) = config_path() else {
            return Ok(Self::default());
        };
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(&path)
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let config = serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse {}", path.display()))?;
        Ok(config)
    }

    fn with_env(mut self) -> Self {
        if let Ok(root) = std::env::var("DSNAP_ROOT") {
            self.root = PathBuf::from(root);
        }
        if let Ok(dir) = std::env::var("DSNAP_SNAPSHOT_DIR") {
            self.snapshot_dir = PathBuf::from(dir);
        }
        if let Ok(url) = std::env::var("DSNAP_EMBED_URL") {
            self.embed_url = url;
        }
        if let Ok(addr) = std::env::var("DSNAP_ADDR") {
            self.addr = addr;
        }
        self
    }

    pub fn working_document_path(&self) -> PathBuf {
        self.resolve(&self.working_document)
    }

    pub fn fallback_document_path(&self) -> PathBuf {
        self.resolve(&self.fallback_document)
    }

    pub fn snapshot_dir_path(&self) -> PathBuf {
        self.resolve(&self.snapshot_dir)
    }

    /// Raw submitted documents, one file per snapshot.
    pub fn archive_dir_path(&self) -> PathBuf {
        self.snapshot_dir_path().join("raw")
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.snapshot_dir_path().join("manifest.json")
    }

    pub fn catalog_path(&self) -> PathBuf {
        self.snapshot_dir_path().join("index.html")
    }

    fn resolve(&self, path: &Path) -> PathBuf {
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }
}

fn config_path() -> Option<PathBuf> {
    let mut path = dirs::config_dir()?;
    path.push(APP_NAME);
    path.push(CONFIG_FILE);
    Some(path)
}
