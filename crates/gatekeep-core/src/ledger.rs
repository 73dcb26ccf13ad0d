// ── Attendance ledger ──
//
// Three pieces of bookkeeping:
// - admission latches keyed by (identity, course), flipped at most once
//   per epoch through the DashMap entry API;
// - the last known presence status of each identity;
// - an append-only detection log, deduplicated by exact pair equality.

use std::sync::{Mutex, PoisonError};

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

use crate::catalog::IdentityCatalog;
use crate::schedule::NO_SCHEDULE;

/// Placeholder time for identities that have not been seen.
pub const NO_TIME: &str = "-";

/// Presence state as written to the attendance table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
pub enum Presence {
    #[strum(serialize = "Hadir")]
    Present,
    #[strum(serialize = "Tidak Hadir")]
    Absent,
}

/// Last recorded status of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AttendanceStatus {
    pub presence: Presence,
    pub time: String,
    pub course: String,
}

impl AttendanceStatus {
    pub fn present(time: impl Into<String>, course: impl Into<String>) -> Self {
        Self {
            presence: Presence::Present,
            time: time.into(),
            course: course.into(),
        }
    }

    pub fn absent() -> Self {
        Self {
            presence: Presence::Absent,
            time: NO_TIME.into(),
            course: NO_SCHEDULE.into(),
        }
    }
}

/// One line of the detection log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DetectionEntry {
    pub identity: String,
    pub timestamp: String,
}

/// One row of the persisted attendance table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttendanceRow {
    #[serde(rename = "Nama")]
    pub name: String,
    #[serde(rename = "Status")]
    pub status: String,
    #[serde(rename = "Waktu")]
    pub time: String,
    #[serde(rename = "Mata Kuliah")]
    pub course: String,
}

#[derive(Debug, Default)]
pub struct AttendanceLedger {
    latches: DashMap<(String, String), bool>,
    statuses: DashMap<String, AttendanceStatus>,
    detections: Mutex<Vec<DetectionEntry>>,
}

impl AttendanceLedger {
    pub fn new() -> Self {
        Self::default()
    }

    /// Atomically latch `(identity, course)`.
    ///
    /// Returns `true` exactly once per epoch: the first caller flips the
    /// latch, every later caller sees it set.
    pub fn try_latch_admission(&self, identity: &str, course: &str) -> bool {
        match self.latches.entry((identity.to_owned(), course.to_owned())) {
            Entry::Occupied(mut latch) => {
                if *latch.get() {
                    false
                } else {
                    latch.insert(true);
                    true
                }
            }
            Entry::Vacant(slot) => {
                slot.insert(true);
                true
            }
        }
    }

    pub fn is_admitted(&self, identity: &str, course: &str) -> bool {
        self.latches
            .get(&(identity.to_owned(), course.to_owned()))
            .is_some_and(|latch| *latch)
    }

    /// Start a new admission epoch for `course`: every listed identity may
    /// be admitted once more.
    pub fn reset_epoch<'a, I>(&self, course: &str, identities: I) -> usize
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut count = 0;
        for identity in identities {
            self.latches
                .insert((identity.to_owned(), course.to_owned()), false);
            count += 1;
        }
        tracing::debug!(course, identities = count, "admission epoch reset");
        count
    }

    pub fn record_status(&self, identity: &str, status: AttendanceStatus) {
        self.statuses.insert(identity.to_owned(), status);
    }

    pub fn status(&self, identity: &str) -> Option<AttendanceStatus> {
        self.statuses.get(identity).map(|s| s.value().clone())
    }

    /// Append to the detection log unless the identical pair is present.
    pub fn append_detection(&self, identity: &str, timestamp: &str) -> bool {
        let mut log = self
            .detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if log
            .iter()
            .any(|e| e.identity == identity && e.timestamp == timestamp)
        {
            return false;
        }
        log.push(DetectionEntry {
            identity: identity.to_owned(),
            timestamp: timestamp.to_owned(),
        });
        true
    }

    pub fn detections(&self) -> Vec<DetectionEntry> {
        self.detections
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// One row per catalog identity, sorted by name. Identities without a
    /// recorded status get the absent default.
    pub fn snapshot_table(&self, catalog: &IdentityCatalog) -> Vec<AttendanceRow> {
        catalog
            .names()
            .into_iter()
            .map(|name| {
                let status = self.status(&name).unwrap_or_else(AttendanceStatus::absent);
                AttendanceRow {
                    name,
                    status: status.presence.to_string(),
                    time: status.time,
                    course: status.course,
                }
            })
            .collect()
    }
}
