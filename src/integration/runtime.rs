//! Multi-camera runtime: one worker task per camera, the reaper and the persistence writer.

use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{error, info};

use crate::config::ReidConfig;
use crate::error::{ConfigError, Result};
use crate::integration::detector::DetectionSource;
use crate::integration::extractor::{ColorHistogramExtractor, EmbeddingExtractor};
use crate::integration::persistence::{PersistenceAdapter, PersistenceHealth, PersistenceWriter};
use crate::integration::pipeline::{CameraWorker, WorkerReport};
use crate::reid::{AssignmentSink, IdentityResolver, TimeoutReaper};

pub struct RuntimeBuilder {
    config: ReidConfig,
    sources: Vec<Box<dyn DetectionSource>>,
    extractor: Option<Arc<dyn EmbeddingExtractor>>,
    store: Option<Arc<dyn PersistenceAdapter>>,
    sinks: Vec<Arc<dyn AssignmentSink>>,
    reaper: bool,
}

impl RuntimeBuilder {
    pub fn camera(mut self, source: impl DetectionSource + 'static) -> Self {
        self.sources.push(Box::new(source));
        self
    }

    /// Defaults to a [`ColorHistogramExtractor`] of the configured dimension.
    pub fn extractor(mut self, extractor: Arc<dyn EmbeddingExtractor>) -> Self {
        self.extractor = Some(extractor);
        self
    }

    pub fn persistence(mut self, store: Arc<dyn PersistenceAdapter>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AssignmentSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    /// Do not spawn the timeout reaper; exits then only happen through
    /// explicit [`IdentityResolver::close_stale`] calls.
    pub fn without_reaper(mut self) -> Self {
        self.reaper = false;
        self
    }

    /// Spawn every task on the current tokio runtime.
    pub fn start(self) -> Result<MultiCameraRuntime> {
        self.config.validate()?;
        let mut seen = HashSet::new();
        for source in &self.sources {
            if !seen.insert(source.camera_id().clone()) {
                return Err(ConfigError::new(
                    "cameras",
                    format!("camera {} registered twice", source.camera_id()),
                )
                .into());
            }
        }

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let mut resolver = IdentityResolver::builder(self.config.clone());
        for sink in self.sinks {
            resolver = resolver.sink(sink);
        }
        let (writer, health) = match self.store {
            Some(store) => {
                let (writer, handle) =
                    PersistenceWriter::new(store, self.config.persistence_retry.clone());
                let health = writer.health();
                resolver = resolver.persistence(handle);
                (
                    Some(tokio::spawn(writer.run(shutdown_rx.clone()))),
                    Some(health),
                )
            }
            None => (None, None),
        };
        let resolver = resolver.build()?;

        let extractor = self.extractor.unwrap_or_else(|| {
            Arc::new(ColorHistogramExtractor::new(self.config.embedding_dim))
        });

        let workers = self
            .sources
            .into_iter()
            .map(|source| {
                let worker = CameraWorker::new(
                    source,
                    self.config.tracker.clone(),
                    resolver.clone(),
                    Arc::clone(&extractor),
                );
                tokio::spawn(worker.run(shutdown_rx.clone()))
            })
            .collect::<Vec<_>>();

        let reaper = self.reaper.then(|| {
            let reaper = TimeoutReaper::new(resolver.clone());
            tokio::spawn(reaper.run(shutdown_rx.clone()))
        });

        info!(cameras = workers.len(), "Multi-camera runtime started");
        Ok(MultiCameraRuntime {
            resolver,
            shutdown: shutdown_tx,
            workers,
            reaper,
            writer,
            health,
        })
    }
}

/// Running engine. Dropping it without [`shutdown`](Self::shutdown) leaves the tasks running.
pub struct MultiCameraRuntime {
    resolver: IdentityResolver,
    shutdown: watch::Sender<bool>,
    workers: Vec<JoinHandle<WorkerReport>>,
    reaper: Option<JoinHandle<()>>,
    writer: Option<JoinHandle<()>>,
    health: Option<PersistenceHealth>,
}

impl MultiCameraRuntime {
    pub fn builder(config: ReidConfig) -> RuntimeBuilder {
        RuntimeBuilder {
            config,
            sources: Vec::new(),
            extractor: None,
            store: None,
            sinks: Vec::new(),
            reaper: true,
        }
    }

    pub fn resolver(&self) -> &IdentityResolver {
        &self.resolver
    }

    /// `None` when no persistence adapter was configured.
    pub fn persistence_health(&self) -> Option<&PersistenceHealth> {
        self.health.as_ref()
    }

    /// Wait for every camera source to end, then stop the background tasks.
    pub async fn run_to_completion(mut self) -> Vec<WorkerReport> {
        let reports = Self::join_workers(std::mem::take(&mut self.workers)).await;
        self.stop_background().await;
        reports
    }

    /// Signal every task to stop and wait for them.
    ///
    /// Frames already being processed finish; queued persistence writes are flushed.
    pub async fn shutdown(mut self) -> Vec<WorkerReport> {
        let _ = self.shutdown.send(true);
        let reports = Self::join_workers(std::mem::take(&mut self.workers)).await;
        self.stop_background().await;
        reports
    }

    async fn join_workers(workers: Vec<JoinHandle<WorkerReport>>) -> Vec<WorkerReport> {
        let mut reports = Vec::with_capacity(workers.len());
        for worker in workers {
            match worker.await {
                Ok(report) => reports.push(report),
                Err(e) => error!("Camera worker task failed: {}", e),
            }
        }
        reports
    }

    async fn stop_background(&mut self) {
        let _ = self.shutdown.send(true);
        if let Some(reaper) = self.reaper.take() {
            if let Err(e) = reaper.await {
                error!("Reaper task failed: {}", e);
            }
        }
        if let Some(writer) = self.writer.take() {
            if let Err(e) = writer.await {
                error!("Persistence writer task failed: {}", e);
            }
        }
        info!("Multi-camera runtime stopped");
    }
}
