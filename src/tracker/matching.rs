//! Detection input and frame-to-frame association for the local tracker.

use std::fmt;

use chrono::{DateTime, Utc};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

use crate::tracker::rect::Rect;

/// Identifier of one camera stream.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CameraId(String);

impl CameraId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CameraId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CameraId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for CameraId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// One person detection produced by the detector for a single frame.
#[derive(Debug, Clone, PartialEq)]
pub struct Detection {
    /// Camera that produced the frame
    pub camera_id: CameraId,
    /// Frame sequence number within that camera
    pub frame_number: u64,
    /// Capture timestamp of the frame
    pub captured_at: DateTime<Utc>,
    /// Bounding box (TLWH)
    pub bbox: Rect,
    /// Detection confidence score
    pub score: f32,
}

impl Detection {
    /// Create a detection from TLBR corners.
    pub fn new(
        camera_id: impl Into<CameraId>,
        frame_number: u64,
        captured_at: DateTime<Utc>,
        tlbr: [f32; 4],
        score: f32,
    ) -> Self {
        Self {
            camera_id: camera_id.into(),
            frame_number,
            captured_at,
            bbox: Rect::from_tlbr(tlbr[0], tlbr[1], tlbr[2], tlbr[3]),
            score,
        }
    }
}

/// Compute IoU distance matrix between tracks and detections.
pub fn iou_distance(track_boxes: &[Rect], det_boxes: &[Rect]) -> Array2<f32> {
    let mut dists = Array2::zeros((track_boxes.len(), det_boxes.len()));
    for (i, t) in track_boxes.iter().enumerate() {
        for (j, d) in det_boxes.iter().enumerate() {
            dists[[i, j]] = 1.0 - t.iou(d);
        }
    }
    dists
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AssignmentResult {
    pub matches: Vec<(usize, usize)>,
    pub unmatched_tracks: Vec<usize>,
    pub unmatched_detections: Vec<usize>,
}

impl AssignmentResult {
    fn unmatched(num_rows: usize, num_cols: usize) -> Self {
        Self {
            matches: vec![],
            unmatched_tracks: (0..num_rows).collect(),
            unmatched_detections: (0..num_cols).collect(),
        }
    }

    fn from_matches(matches: Vec<(usize, usize)>, num_rows: usize, num_cols: usize) -> Self {
        let mut row_used = vec![false; num_rows];
        let mut col_used = vec![false; num_cols];
        for &(r, c) in &matches {
            row_used[r] = true;
            col_used[c] = true;
        }
        Self {
            matches,
            unmatched_tracks: (0..num_rows).filter(|&r| !row_used[r]).collect(),
            unmatched_detections: (0..num_cols).filter(|&c| !col_used[c]).collect(),
        }
    }
}

/// Greedy association on an IoU matrix (tracks x detections).
///
/// Pairs are taken in descending IoU order; a pair is accepted only when both
/// sides are still free and the overlap strictly exceeds `min_iou`. Equal
/// overlaps resolve to the lower track index, then the lower detection index.
pub fn greedy_assignment(ious: &Array2<f32>, min_iou: f32) -> AssignmentResult {
    let (num_rows, num_cols) = ious.dim();

    let mut pairs: Vec<(usize, usize, f32)> = ious
        .indexed_iter()
        .filter(|&(_, &iou)| iou > min_iou)
        .map(|((r, c), &iou)| (r, c, iou))
        .collect();
    pairs.sort_by(|a, b| {
        b.2.total_cmp(&a.2)
            .then_with(|| a.0.cmp(&b.0))
            .then_with(|| a.1.cmp(&b.1))
    });

    let mut row_used = vec![false; num_rows];
    let mut col_used = vec![false; num_cols];
    let mut matches = Vec::new();
    for (r, c, _) in pairs {
        if row_used[r] || col_used[c] {
            continue;
        }
        row_used[r] = true;
        col_used[c] = true;
        matches.push((r, c));
    }

    AssignmentResult::from_matches(matches, num_rows, num_cols)
}

/// Minimum-cost assignment on a distance matrix using the LAPJV solver.
///
/// Assigned pairs whose cost is not strictly below `max_cost` are reported as
/// unmatched on both sides.
pub fn linear_assignment(cost_matrix: &Array2<f32>, max_cost: f32) -> AssignmentResult {
    let (num_rows, num_cols) = cost_matrix.dim();

    if num_rows == 0 || num_cols == 0 {
        return AssignmentResult::unmatched(num_rows, num_cols);
    }

    let size = num_rows.max(num_cols);
    let mut padded = Array2::<f64>::from_elem((size, size), 1e6);
    for ((i, j), &cost) in cost_matrix.indexed_iter() {
        padded[[i, j]] = cost as f64;
    }

    match lapjv::lapjv(&padded) {
        Ok((row_to_col, _)) => {
            let matches = row_to_col
                .iter()
                .enumerate()
                .filter(|&(row, &col)| {
                    row < num_rows && col < num_cols && cost_matrix[[row, col]] < max_cost
                })
                .map(|(row, &col)| (row, col))
                .collect();
            AssignmentResult::from_matches(matches, num_rows, num_cols)
        }
        Err(_) => AssignmentResult::unmatched(num_rows, num_cols),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn greedy_prefers_highest_overlap() {
        // Track 0 overlaps both detections; detection 1 is the better fit.
        let ious = array![[0.4, 0.9], [0.0, 0.6]];
        let result = greedy_assignment(&ious, 0.3);
        assert_eq!(result.matches, vec![(0, 1)]);
        assert_eq!(result.unmatched_tracks, vec![1]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn greedy_requires_overlap_above_minimum() {
        let ious = array![[0.3]];
        let result = greedy_assignment(&ious, 0.3);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }

    #[test]
    fn greedy_handles_empty_sides() {
        let ious = Array2::<f32>::zeros((0, 3));
        let result = greedy_assignment(&ious, 0.3);
        assert_eq!(result.unmatched_detections, vec![0, 1, 2]);

        let ious = Array2::<f32>::zeros((2, 0));
        let result = greedy_assignment(&ious, 0.3);
        assert_eq!(result.unmatched_tracks, vec![0, 1]);
    }

    #[test]
    fn linear_assignment_finds_global_optimum() {
        // Greedy would pair (0, 0) first and strand track 1.
        let cost = array![[0.1, 0.2], [0.15, 0.9]];
        let result = linear_assignment(&cost, 0.7);
        let mut matches = result.matches.clone();
        matches.sort();
        assert_eq!(matches, vec![(0, 1), (1, 0)]);
    }

    #[test]
    fn linear_assignment_rejects_costly_pairs() {
        let cost = array![[0.95]];
        let result = linear_assignment(&cost, 0.7);
        assert!(result.matches.is_empty());
        assert_eq!(result.unmatched_tracks, vec![0]);
        assert_eq!(result.unmatched_detections, vec![0]);
    }
}
