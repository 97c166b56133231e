//! Per-camera worker combining detection, local tracking and identity resolution.

use std::sync::Arc;

use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, error, info, warn};

use crate::error::{ExtractionError, Result};
use crate::integration::detector::{DetectionSource, Frame};
use crate::integration::extractor::{EmbeddingExtractor, PersonCrop};
use crate::reid::{EmbeddingVector, IdentityResolver, Observation};
use crate::tracker::{CameraId, LocalTrack, LocalTracker, TrackerConfig};

/// Consecutive source errors after which the source is restarted.
const MAX_CONSECUTIVE_SOURCE_ERRORS: u32 = 3;

/// Counters of one worker run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct WorkerReport {
    pub camera_id: CameraId,
    pub frames: u64,
    /// Track observations handed to extraction
    pub observations: u64,
    pub resolved: u64,
    pub extraction_failures: u64,
    pub invalid_embeddings: u64,
    pub tracks_ended: u64,
    pub source_errors: u64,
    pub restarts: u64,
}

/// Runs one camera: source, tracker, crop, extraction, resolver.
///
/// Frames are processed to completion; shutdown is honoured between frames.
pub struct CameraWorker {
    source: Box<dyn DetectionSource>,
    tracker: LocalTracker,
    resolver: IdentityResolver,
    extractor: Arc<dyn EmbeddingExtractor>,
    report: WorkerReport,
}

impl CameraWorker {
    pub fn new(
        source: Box<dyn DetectionSource>,
        tracker_config: TrackerConfig,
        resolver: IdentityResolver,
        extractor: Arc<dyn EmbeddingExtractor>,
    ) -> Self {
        let camera_id = source.camera_id().clone();
        Self {
            tracker: LocalTracker::new(camera_id.clone(), tracker_config),
            source,
            resolver,
            extractor,
            report: WorkerReport {
                camera_id,
                ..Default::default()
            },
        }
    }

    pub fn camera_id(&self) -> &CameraId {
        self.tracker.camera_id()
    }

    /// Consume frames until the source ends or `shutdown` becomes true.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) -> WorkerReport {
        info!(camera_id = %self.camera_id(), "Camera worker started");
        let mut consecutive_errors = 0u32;

        loop {
            if *shutdown.borrow() {
                break;
            }
            let next = tokio::select! {
                next = self.source.next_frame() => next,
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            };

            match next {
                None => break,
                Some(Ok(frame)) => {
                    consecutive_errors = 0;
                    self.process_frame(frame).await;
                }
                Some(Err(e)) => {
                    self.report.source_errors += 1;
                    consecutive_errors += 1;
                    warn!(camera_id = %self.camera_id(), "Detection source error: {}", e);
                    if consecutive_errors >= MAX_CONSECUTIVE_SOURCE_ERRORS {
                        if let Err(e) = self.restart().await {
                            error!(camera_id = %self.camera_id(), "Source restart failed, stopping worker: {}", e);
                            break;
                        }
                        consecutive_errors = 0;
                    }
                }
            }
        }

        let remaining = self.tracker.reset();
        self.end_tracks(remaining);
        info!(
            camera_id = %self.camera_id(),
            frames = self.report.frames,
            resolved = self.report.resolved,
            "Camera worker stopped"
        );
        self.report
    }

    /// Restart the source; live tracks of this camera end.
    pub async fn restart(&mut self) -> Result<()> {
        let dropped = self.tracker.reset();
        self.end_tracks(dropped);
        self.source.restart().await?;
        self.report.restarts += 1;
        info!(camera_id = %self.camera_id(), "Detection source restarted");
        Ok(())
    }

    /// Track, extract and resolve one frame.
    pub async fn process_frame(&mut self, frame: Frame) {
        self.report.frames += 1;
        let Frame {
            frame_number,
            detections,
            image,
            ..
        } = frame;

        let update = self.tracker.update(frame_number, detections);
        self.end_tracks(update.ended);

        if update.observations.is_empty() {
            return;
        }
        let Some(image) = image else {
            debug!(
                camera_id = %self.camera_id(),
                frame_number,
                "Frame has no image, skipping extraction"
            );
            return;
        };

        let crops: Vec<PersonCrop> = update
            .observations
            .iter()
            .map(|(_, detection)| image.crop(&detection.bbox))
            .collect();
        self.report.observations += crops.len() as u64;
        let embeddings =
            Self::extract_all(Arc::clone(&self.extractor), self.camera_id().clone(), crops).await;

        for ((track, detection), embedding) in update.observations.into_iter().zip(embeddings) {
            let embedding = match embedding {
                Ok(embedding) => embedding,
                Err(e) => {
                    self.report.extraction_failures += 1;
                    crate::metrics::record_extraction_failure(self.camera_id().as_str());
                    warn!(
                        camera_id = %self.camera_id(),
                        local_id = %track.local_id,
                        frame_number,
                        "Embedding extraction failed, observation dropped: {}", e
                    );
                    continue;
                }
            };

            crate::metrics::record_observation(self.camera_id().as_str());
            let observation = Observation {
                camera_id: track.camera_id.clone(),
                local_id: track.local_id,
                frame_number,
                observed_at: detection.captured_at,
                embedding,
            };
            match self.resolver.resolve(observation) {
                Ok(resolution) => {
                    self.report.resolved += 1;
                    debug!(
                        camera_id = %self.camera_id(),
                        local_id = %track.local_id,
                        global_id = %resolution.global_id,
                        decision = resolution.decision.as_str(),
                        "Observation resolved"
                    );
                }
                Err(e) => {
                    self.report.invalid_embeddings += 1;
                    warn!(
                        camera_id = %self.camera_id(),
                        local_id = %track.local_id,
                        "Observation dropped: {}", e
                    );
                }
            }
        }
    }

    /// Run the extractor over every crop on the blocking pool.
    ///
    /// Takes owned handles so no borrow of the worker spans the await.
    async fn extract_all(
        extractor: Arc<dyn EmbeddingExtractor>,
        camera_id: CameraId,
        crops: Vec<PersonCrop>,
    ) -> Vec<std::result::Result<EmbeddingVector, ExtractionError>> {
        let count = crops.len();
        let task = tokio::task::spawn_blocking(move || {
            crops
                .iter()
                .map(|crop| extractor.extract(crop))
                .collect::<Vec<_>>()
        });
        match task.await {
            Ok(results) => results,
            Err(e) => {
                error!(camera_id = %camera_id, "Extraction task failed: {}", e);
                (0..count)
                    .map(|_| Err(ExtractionError::Failed(e.to_string())))
                    .collect()
            }
        }
    }

    fn end_tracks(&mut self, tracks: Vec<LocalTrack>) {
        for track in tracks {
            self.resolver.end_track(&track.camera_id, track.local_id);
            crate::metrics::record_track_ended(track.camera_id.as_str());
            self.report.tracks_ended += 1;
        }
    }
}
