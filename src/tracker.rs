mod local_track;
mod local_tracker;
mod matching;
mod rect;
mod track_state;

pub use local_track::{LocalId, LocalTrack};
pub use local_tracker::{AssociationStrategy, LocalTracker, TrackUpdate, TrackerConfig};
pub use matching::{
    AssignmentResult, CameraId, Detection, greedy_assignment, iou_distance, linear_assignment,
};
pub use rect::{Rect, iou_batch};
pub use track_state::TrackState;
