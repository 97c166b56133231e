//! Engine metrics, recorded through the `metrics` facade.
//!
//! Nothing is exported unless the embedding application installs a recorder.

use metrics::{counter, gauge};

use crate::reid::Decision;

/// Metric names as constants for consistency.
pub mod names {
    pub const OBSERVATIONS_TOTAL: &str = "reid_observations_total";
    pub const DECISIONS_TOTAL: &str = "reid_decisions_total";
    pub const EXTRACTION_FAILURES_TOTAL: &str = "reid_extraction_failures_total";
    pub const INVALID_EMBEDDINGS_TOTAL: &str = "reid_invalid_embeddings_total";
    pub const DEGRADED_RESOLUTIONS_TOTAL: &str = "reid_degraded_resolutions_total";
    pub const INDEX_INSERT_FAILURES_TOTAL: &str = "reid_index_insert_failures_total";
    pub const REFRESH_REJECTED_TOTAL: &str = "reid_refresh_rejected_total";
    pub const ACTIVE_IDENTITIES: &str = "reid_active_identities";
    pub const IDENTITIES_REAPED_TOTAL: &str = "reid_identities_reaped_total";
    pub const PERSIST_RETRIES_TOTAL: &str = "reid_persist_retries_total";
    pub const PERSIST_ALARMS_TOTAL: &str = "reid_persist_alarms_total";
    pub const TRACKS_ENDED_TOTAL: &str = "reid_tracks_ended_total";
}

pub fn record_observation(camera_id: &str) {
    counter!(names::OBSERVATIONS_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_decision(decision: Decision) {
    counter!(names::DECISIONS_TOTAL, "decision" => decision.as_str()).increment(1);
}

pub fn record_extraction_failure(camera_id: &str) {
    counter!(names::EXTRACTION_FAILURES_TOTAL, "camera" => camera_id.to_string()).increment(1);
}

pub fn record_invalid_embedding() {
    counter!(names::INVALID_EMBEDDINGS_TOTAL).increment(1);
}

pub fn record_degraded_resolution() {
    counter!(names::DEGRADED_RESOLUTIONS_TOTAL).increment(1);
}

pub fn record_index_insert_failure() {
    counter!(names::INDEX_INSERT_FAILURES_TOTAL).increment(1);
}

pub fn record_refresh_rejected() {
    counter!(names::REFRESH_REJECTED_TOTAL).increment(1);
}

pub fn set_active_identities(count: usize) {
    gauge!(names::ACTIVE_IDENTITIES).set(count as f64);
}

pub fn record_reaped(count: usize) {
    counter!(names::IDENTITIES_REAPED_TOTAL).increment(count as u64);
}

pub fn record_persist_retry() {
    counter!(names::PERSIST_RETRIES_TOTAL).increment(1);
}

pub fn record_persist_alarm() {
    counter!(names::PERSIST_ALARMS_TOTAL).increment(1);
}

pub fn record_track_ended(camera_id: &str) {
    counter!(names::TRACKS_ENDED_TOTAL, "camera" => camera_id.to_string()).increment(1);
}
