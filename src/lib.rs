//! Multi-camera person re-identification.
//!
//! Each camera runs its own IoU [`LocalTracker`]; embedded track observations
//! from every camera are resolved by one shared [`IdentityResolver`] into
//! deduplicated global identities, whose visits are closed by the
//! [`TimeoutReaper`] once the person is no longer seen.

pub mod config;
pub mod error;
pub mod integration;
pub mod metrics;
pub mod reid;
pub mod tracker;

pub use config::{ExitPolicy, ReaperClock, ReidConfig, ResetPolicy, RetryConfig};
pub use error::{ReidError, Result};
pub use integration::{
    CameraWorker, ColorHistogramExtractor, DetectionBuilder, DetectionSource, EmbeddingExtractor,
    Frame, FrameImage, InMemoryStore, MultiCameraRuntime, PersistenceAdapter, ReplaySource,
};
pub use reid::{
    Decision, EmbeddingVector, GlobalId, GlobalIdentity, IdentityResolver, IdentityStatus,
    Observation, Resolution, Stats, TimeSpent, TimeoutReaper, VisitEvent,
};
pub use tracker::{CameraId, Detection, LocalId, LocalTrack, LocalTracker, Rect, TrackerConfig};
