/// Lifecycle of a camera-local track.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TrackState {
    /// Matched to a detection in the most recent frame
    #[default]
    Tracked,
    /// Missed at least one frame but still within the miss budget
    Lost,
    /// Exceeded the miss budget; emitted once as a "track ended" signal
    Retired,
}
