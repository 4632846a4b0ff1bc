//! Diagram snapshot bookkeeping.
//!
//! A submitted diagram document is archived under a timestamped name, made the
//! active document for the live editor, rendered into a standalone HTML
//! snapshot, recorded in the manifest and listed in the catalog page.
//!
//! - [`store`]: the active document slot, the raw-document archive and the manifest.
//! - [`render`]: snapshot pages and the catalog view.
//! - [`service`]: [`SnapshotService`](service::SnapshotService), which ties the stores together.
//! - [`api`]: the HTTP layer used by the embedded editor page.

pub mod api;
pub mod client;
pub mod config;
pub mod error;
pub mod models;
pub mod render;
pub mod service;
pub mod store;
pub mod validate;

pub use error::{Result, SnapshotError};
