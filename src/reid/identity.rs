//! Global identity and visit records.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::tracker::CameraId;

/// Process-unique identity id, stable for the identity's lifetime.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GlobalId(pub u64);

impl fmt::Display for GlobalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "G{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VisitId(pub u64);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum IdentityStatus {
    Active,
    Exited,
}

/// A deduplicated person spanning all cameras.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GlobalIdentity {
    pub global_id: GlobalId,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub status: IdentityStatus,
}

impl GlobalIdentity {
    pub fn new(global_id: GlobalId, seen_at: DateTime<Utc>) -> Self {
        Self {
            global_id,
            first_seen_at: seen_at,
            last_seen_at: seen_at,
            status: IdentityStatus::Active,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == IdentityStatus::Active
    }

    /// Advance last-seen; older timestamps never move it backwards.
    pub(crate) fn observe(&mut self, at: DateTime<Utc>) {
        if at > self.last_seen_at {
            self.last_seen_at = at;
        }
    }
}

/// One continuous presence interval of an identity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VisitEvent {
    pub visit_id: VisitId,
    pub global_id: GlobalId,
    /// Camera of the observation that opened the visit
    pub camera_id: CameraId,
    pub opened_at: DateTime<Utc>,
    pub closed_at: Option<DateTime<Utc>>,
}

impl VisitEvent {
    pub fn is_open(&self) -> bool {
        self.closed_at.is_none()
    }

    /// Dwell time in seconds; open visits are measured up to `now`.
    pub fn elapsed_seconds(&self, now: DateTime<Utc>) -> f64 {
        let end = self.closed_at.unwrap_or(now);
        let micros = (end - self.opened_at).num_microseconds().unwrap_or(i64::MAX);
        micros.max(0) as f64 / 1_000_000.0
    }
}

/// A record mutation to hand to the persistence adapter.
#[derive(Debug, Clone, PartialEq)]
pub enum RecordUpdate {
    Identity(GlobalIdentity),
    Visit(VisitEvent),
}

/// Identity plus its append-only visit history.
#[derive(Debug, Clone)]
pub(crate) struct IdentityRecord {
    pub(crate) identity: GlobalIdentity,
    pub(crate) visits: Vec<VisitEvent>,
}

impl IdentityRecord {
    pub(crate) fn open_visit_mut(&mut self) -> Option<&mut VisitEvent> {
        self.visits.last_mut().filter(|v| v.is_open())
    }

    /// Close the open visit at last-seen and mark the identity exited.
    ///
    /// Returns the closed visit, or `None` when the identity was already exited.
    pub(crate) fn exit(&mut self, closed_at: DateTime<Utc>) -> Option<VisitEvent> {
        if !self.identity.is_active() {
            return None;
        }
        self.identity.status = IdentityStatus::Exited;
        let visit = self.open_visit_mut()?;
        visit.closed_at = Some(closed_at.max(visit.opened_at));
        Some(visit.clone())
    }
}
