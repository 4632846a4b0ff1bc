//! Domain models for diagram snapshots.
//!
//! # Core Concepts
//!
//! - [`SnapshotEntry`]: one manifest record, tying a rendered snapshot page to the
//!   archived document it was rendered from.
//! - [`ActiveDocument`]: the document the live editor currently reads and writes.
//! - [`Stamp`]: the single timestamp captured per operation. The archive name,
//!   the snapshot file name and the entry's `generated_at` are all derived from it.

mod document;
mod snapshot;
mod stamp;

pub use document::*;
pub use snapshot::*;
pub use stamp::*;
