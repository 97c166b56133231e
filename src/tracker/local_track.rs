//! Camera-local track (one person inside one camera's view).

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::tracker::matching::{CameraId, Detection};
use crate::tracker::rect::Rect;
use crate::tracker::track_state::TrackState;

/// Track identifier, unique only within the camera that allocated it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct LocalId(pub u64);

impl fmt::Display for LocalId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "L{}", self.0)
    }
}

/// Single camera-local track.
#[derive(Debug, Clone, PartialEq)]
pub struct LocalTrack {
    /// Identifier within the owning camera
    pub local_id: LocalId,
    /// Camera owning the track
    pub camera_id: CameraId,
    /// Current track state
    pub state: TrackState,
    /// Last matched bounding box
    pub bbox: Rect,
    /// Confidence of the last matched detection
    pub score: f32,
    /// Frame number where the track was created
    pub start_frame: u64,
    /// Frame number of the last matched detection
    pub last_frame: u64,
    /// Consecutive frames without a matching detection
    pub misses: u32,
    /// Total matched detections
    pub hits: u32,
}

impl LocalTrack {
    /// Start a track from an unmatched detection.
    pub fn new(local_id: LocalId, detection: &Detection) -> Self {
        Self {
            local_id,
            camera_id: detection.camera_id.clone(),
            state: TrackState::Tracked,
            bbox: detection.bbox,
            score: detection.score,
            start_frame: detection.frame_number,
            last_frame: detection.frame_number,
            misses: 0,
            hits: 1,
        }
    }

    /// Fold a matched detection into the track.
    pub fn update(&mut self, detection: &Detection) {
        self.bbox = detection.bbox;
        self.score = detection.score;
        self.last_frame = detection.frame_number;
        self.misses = 0;
        self.hits += 1;
        self.state = TrackState::Tracked;
    }

    /// Record a frame without a match. Returns true once the track retires.
    pub fn mark_missed(&mut self, max_misses: u32) -> bool {
        self.misses += 1;
        if self.misses > max_misses {
            self.state = TrackState::Retired;
            true
        } else {
            self.state = TrackState::Lost;
            false
        }
    }

    pub fn is_retired(&self) -> bool {
        self.state == TrackState::Retired
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn detection(frame: u64, x: f32) -> Detection {
        Detection::new("cam1", frame, Utc::now(), [x, 0.0, x + 50.0, 100.0], 0.9)
    }

    #[test]
    fn update_resets_misses() {
        let mut track = LocalTrack::new(LocalId(1), &detection(1, 0.0));
        assert!(!track.mark_missed(3));
        assert_eq!(track.state, TrackState::Lost);

        track.update(&detection(3, 5.0));
        assert_eq!(track.misses, 0);
        assert_eq!(track.hits, 2);
        assert_eq!(track.last_frame, 3);
        assert_eq!(track.state, TrackState::Tracked);
    }

    #[test]
    fn retires_after_exceeding_miss_budget() {
        let mut track = LocalTrack::new(LocalId(7), &detection(1, 0.0));
        assert!(!track.mark_missed(2));
        assert!(!track.mark_missed(2));
        assert!(track.mark_missed(2));
        assert!(track.is_retired());
    }
}
