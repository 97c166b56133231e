//! Integration module connecting camera streams to the identity engine.
//!
//! This module provides the collaborator seams (detection sources, embedding
//! extractors, persistence adapters) and the tasks that drive them: one
//! [`CameraWorker`] per camera, the persistence writer, and the
//! [`MultiCameraRuntime`] that owns them all.

mod builder;
mod detector;
mod extractor;
mod persistence;
mod pipeline;
mod runtime;

pub use builder::DetectionBuilder;
pub use detector::{DetectionSource, Frame, FrameImage, ReplaySource};
pub use extractor::{ColorHistogramExtractor, EmbeddingExtractor, PersonCrop};
pub use persistence::{
    InMemoryStore, PersistenceAdapter, PersistenceHandle, PersistenceHealth, PersistenceWriter,
};
pub use pipeline::{CameraWorker, WorkerReport};
pub use runtime::{MultiCameraRuntime, RuntimeBuilder};
