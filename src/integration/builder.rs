//! Builder for creating Detection objects from various input formats.

use chrono::{DateTime, Utc};

use crate::tracker::{CameraId, Detection};

/// Builder for creating `Detection` objects from various box formats.
///
/// Detector backends report boxes in different conventions; the builder
/// normalizes them into the tracker's TLBR input.
#[derive(Debug, Clone)]
pub struct DetectionBuilder {
    camera_id: CameraId,
    frame_number: u64,
    captured_at: DateTime<Utc>,
    x1: f32,
    y1: f32,
    x2: f32,
    y2: f32,
    score: f32,
}

impl DetectionBuilder {
    /// Start a detection for `camera_id`, captured now, on frame 0.
    pub fn new(camera_id: impl Into<CameraId>) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_number: 0,
            captured_at: Utc::now(),
            x1: 0.0,
            y1: 0.0,
            x2: 0.0,
            y2: 0.0,
            score: 0.0,
        }
    }

    pub fn frame(mut self, frame_number: u64) -> Self {
        self.frame_number = frame_number;
        self
    }

    pub fn captured_at(mut self, captured_at: DateTime<Utc>) -> Self {
        self.captured_at = captured_at;
        self
    }

    /// Set bounding box in TLBR format (x1, y1, x2, y2).
    pub fn tlbr(mut self, x1: f32, y1: f32, x2: f32, y2: f32) -> Self {
        self.x1 = x1;
        self.y1 = y1;
        self.x2 = x2;
        self.y2 = y2;
        self
    }

    /// Set bounding box in XYWH format (center_x, center_y, width, height).
    pub fn xywh(mut self, cx: f32, cy: f32, w: f32, h: f32) -> Self {
        self.x1 = cx - w / 2.0;
        self.y1 = cy - h / 2.0;
        self.x2 = cx + w / 2.0;
        self.y2 = cy + h / 2.0;
        self
    }

    /// Set bounding box in TLWH format (left, top, width, height).
    pub fn tlwh(mut self, l: f32, t: f32, w: f32, h: f32) -> Self {
        self.x1 = l;
        self.y1 = t;
        self.x2 = l + w;
        self.y2 = t + h;
        self
    }

    /// Set the confidence score.
    pub fn score(mut self, score: f32) -> Self {
        self.score = score;
        self
    }

    /// Build the final `Detection`.
    pub fn build(self) -> Detection {
        Detection::new(
            self.camera_id,
            self.frame_number,
            self.captured_at,
            [self.x1, self.y1, self.x2, self.y2],
            self.score,
        )
    }
}
