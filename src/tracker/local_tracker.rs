//! Per-camera IoU tracker.

use tracing::{debug, warn};

use crate::tracker::local_track::{LocalId, LocalTrack};
use crate::tracker::matching::{self, AssignmentResult, CameraId, Detection};
use crate::tracker::rect::{Rect, iou_batch};

/// How detections are associated with existing tracks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum AssociationStrategy {
    /// Highest overlap first, one pass.
    #[default]
    Greedy,
    /// Minimum total IoU distance (LAPJV).
    Optimal,
}

/// Configuration for the [`LocalTracker`].
#[derive(Debug, Clone)]
pub struct TrackerConfig {
    /// Overlap a detection must exceed to continue a track
    pub min_iou: f32,
    /// Consecutive missed frames tolerated before a track is retired
    pub max_misses: u32,
    /// Detections below this confidence are ignored
    pub min_confidence: f32,
    pub strategy: AssociationStrategy,
}

impl Default for TrackerConfig {
    fn default() -> Self {
        Self {
            min_iou: 0.3,
            max_misses: 30,
            min_confidence: 0.25,
            strategy: AssociationStrategy::Greedy,
        }
    }
}

/// Result of feeding one frame to the tracker.
#[derive(Debug, Clone, Default)]
pub struct TrackUpdate {
    /// Tracks matched or created this frame, paired with their detection.
    pub observations: Vec<(LocalTrack, Detection)>,
    /// Tracks retired this frame ("track ended").
    pub ended: Vec<LocalTrack>,
}

/// Frame-to-frame association of detections into local tracks for one camera.
pub struct LocalTracker {
    camera_id: CameraId,
    tracks: Vec<LocalTrack>,
    next_local_id: u64,
    last_frame: Option<u64>,
    config: TrackerConfig,
}

impl LocalTracker {
    pub fn new(camera_id: impl Into<CameraId>, config: TrackerConfig) -> Self {
        Self {
            camera_id: camera_id.into(),
            tracks: Vec::new(),
            next_local_id: 1,
            last_frame: None,
            config,
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        &self.camera_id
    }

    /// Tracks currently alive (tracked or lost).
    pub fn tracks(&self) -> &[LocalTrack] {
        &self.tracks
    }

    /// Drop every track, e.g. when the camera source restarts.
    ///
    /// Returns the dropped tracks so the caller can emit "track ended" for them.
    /// Local ids keep increasing so a restarted stream never reuses one.
    pub fn reset(&mut self) -> Vec<LocalTrack> {
        self.last_frame = None;
        self.tracks.drain(..).collect()
    }

    pub fn update(&mut self, frame_number: u64, detections: Vec<Detection>) -> TrackUpdate {
        if let Some(last) = self.last_frame {
            if frame_number < last {
                warn!(
                    camera_id = %self.camera_id,
                    frame_number,
                    last_frame = last,
                    "Frame arrived out of order"
                );
            }
        }
        self.last_frame = Some(frame_number);

        // Step 1: keep confident detections that belong to this camera
        let detections: Vec<Detection> = detections
            .into_iter()
            .filter(|d| {
                if d.camera_id != self.camera_id {
                    warn!(
                        camera_id = %self.camera_id,
                        detection_camera = %d.camera_id,
                        "Dropping detection routed to the wrong camera"
                    );
                    return false;
                }
                d.score >= self.config.min_confidence && !d.bbox.is_empty()
            })
            .collect();

        // Step 2: associate with live tracks
        let track_rects: Vec<Rect> = self.tracks.iter().map(|t| t.bbox).collect();
        let det_rects: Vec<Rect> = detections.iter().map(|d| d.bbox).collect();
        let AssignmentResult {
            matches,
            unmatched_tracks,
            unmatched_detections,
        } = match self.config.strategy {
            AssociationStrategy::Greedy => {
                let ious = iou_batch(&track_rects, &det_rects);
                matching::greedy_assignment(&ious, self.config.min_iou)
            }
            AssociationStrategy::Optimal => {
                let dists = matching::iou_distance(&track_rects, &det_rects);
                matching::linear_assignment(&dists, 1.0 - self.config.min_iou)
            }
        };

        let mut update = TrackUpdate::default();

        for (itrack, idet) in matches {
            let track = &mut self.tracks[itrack];
            track.update(&detections[idet]);
            update
                .observations
                .push((track.clone(), detections[idet].clone()));
        }

        // Step 3: unmatched tracks accrue a miss
        for itrack in unmatched_tracks {
            let track = &mut self.tracks[itrack];
            if track.mark_missed(self.config.max_misses) {
                debug!(
                    camera_id = %self.camera_id,
                    local_id = %track.local_id,
                    hits = track.hits,
                    "Local track retired"
                );
                update.ended.push(track.clone());
            }
        }
        self.tracks.retain(|t| !t.is_retired());

        // Step 4: new tracks for unmatched detections
        for idet in unmatched_detections {
            let local_id = LocalId(self.next_local_id);
            self.next_local_id += 1;
            let track = LocalTrack::new(local_id, &detections[idet]);
            debug!(
                camera_id = %self.camera_id,
                local_id = %local_id,
                frame_number,
                "Local track started"
            );
            update
                .observations
                .push((track.clone(), detections[idet].clone()));
            self.tracks.push(track);
        }

        update
    }
}
