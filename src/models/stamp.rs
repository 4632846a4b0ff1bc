use std::fmt;
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, SubsecRound, Utc};

/// The timestamp captured once per snapshot operation.
///
/// `seq` disambiguates operations that land on the same wall-clock second.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stamp {
    pub at: DateTime<Utc>,
    pub seq: u32,
}

impl Stamp {
    /// Name component shared by the archive file and the snapshot page,
    /// e.g. `20240101_120000` or `20240101_120000_2`.
    pub fn label(&self) -> String {
        let base = self.at.format("%Y%m%d_%H%M%S");
        if self.seq == 0 {
            base.to_string()
        } else {
            format!("{}_{}", base, self.seq)
        }
    }

    /// File name of the archived raw document.
    pub fn archive_name(&self) -> String {
        format!("diagram_{}.xml", self.label())
    }

    /// File name of the rendered snapshot page.
    pub fn artifact_name(&self) -> String {
        format!("{}{}.html", ARTIFACT_PREFIX, self.label())
    }
}

impl fmt::Display for Stamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.label())
    }
}

/// Prefix shared by every rendered snapshot page.
pub const ARTIFACT_PREFIX: &str = "diagram_editor_";

/// Issues stamps, bumping the disambiguator when a second is reused in-process.
#[derive(Debug, Default)]
pub struct StampClock {
    last: Mutex<Option<Stamp>>,
}

impl StampClock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn now(&self) -> Stamp {
        self.stamp_at(Utc::now())
    }

    pub fn stamp_at(&self, now: DateTime<Utc>) -> Stamp {
        let at = now.trunc_subsecs(0);
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = match *last {
            Some(prev) if prev.at == at => prev.seq + 1,
            _ => 0,
        };
        let stamp = Stamp { at, seq };
        *last = Some(stamp);
        stamp
    }

    /// Next free stamp for the same second, used when a name is already taken on disk.
    pub fn bump(&self, stamp: Stamp) -> Stamp {
        let mut last = self.last.lock().unwrap_or_else(PoisonError::into_inner);
        let seq = match *last {
            Some(prev) if prev.at == stamp.at => prev.seq.max(stamp.seq) + 1,
            _ => stamp.seq + 1,
        };
        let next = Stamp { at: stamp.at, seq };
        *last = Some(next);
        next
    }
}
