//! Buffered, retrying persistence of identity and visit records.
//!
//! The resolver hands record updates to a [`PersistenceHandle`] after it
//! releases its lock. A [`PersistenceWriter`] task drains the queue and
//! retries each write with exponential backoff, so a store outage never
//! blocks resolution or loses decided records.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, AtomicUsize, Ordering};

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::{mpsc, watch};
use tracing::{debug, error, info, warn};

use crate::config::RetryConfig;
use crate::error::PersistenceError;
use crate::reid::{GlobalId, GlobalIdentity, RecordUpdate, VisitEvent, VisitId};

/// Durable store for identities and visits. Both operations are upserts.
#[async_trait]
pub trait PersistenceAdapter: Send + Sync {
    async fn upsert_identity(&self, identity: &GlobalIdentity) -> Result<(), PersistenceError>;

    async fn upsert_visit(&self, visit: &VisitEvent) -> Result<(), PersistenceError>;
}

/// In-process store; can be told to fail for outage testing.
#[derive(Debug, Default)]
pub struct InMemoryStore {
    identities: Mutex<BTreeMap<GlobalId, GlobalIdentity>>,
    visits: Mutex<BTreeMap<VisitId, VisitEvent>>,
    unavailable: AtomicBool,
    fail_next: AtomicU32,
    attempts: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail every write until switched back.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Fail the next `count` writes, then recover.
    pub fn fail_next(&self, count: u32) {
        self.fail_next.store(count, Ordering::SeqCst);
    }

    /// Write attempts seen, successful or not.
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    pub fn identity(&self, global_id: GlobalId) -> Option<GlobalIdentity> {
        self.identities.lock().get(&global_id).cloned()
    }

    pub fn identities(&self) -> Vec<GlobalIdentity> {
        self.identities.lock().values().cloned().collect()
    }

    pub fn visits(&self) -> Vec<VisitEvent> {
        self.visits.lock().values().cloned().collect()
    }

    fn check_available(&self) -> Result<(), PersistenceError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(PersistenceError::Unavailable("store is offline".into()));
        }
        let failed = self
            .fail_next
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failed {
            return Err(PersistenceError::Unavailable("transient failure".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl PersistenceAdapter for InMemoryStore {
    async fn upsert_identity(&self, identity: &GlobalIdentity) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.identities
            .lock()
            .insert(identity.global_id, identity.clone());
        Ok(())
    }

    async fn upsert_visit(&self, visit: &VisitEvent) -> Result<(), PersistenceError> {
        self.check_available()?;
        self.visits.lock().insert(visit.visit_id, visit.clone());
        Ok(())
    }
}

#[derive(Debug, Default)]
struct HealthInner {
    alarm: AtomicBool,
    pending: AtomicUsize,
    written: AtomicU64,
    dropped: AtomicU64,
}

/// Shared view of the writer's state.
#[derive(Debug, Clone, Default)]
pub struct PersistenceHealth {
    inner: Arc<HealthInner>,
}

impl PersistenceHealth {
    /// True after a write exhausted its retries, until a later write succeeds.
    pub fn alarm(&self) -> bool {
        self.inner.alarm.load(Ordering::SeqCst)
    }

    /// Updates queued or being retried.
    pub fn pending(&self) -> usize {
        self.inner.pending.load(Ordering::SeqCst)
    }

    pub fn written(&self) -> u64 {
        self.inner.written.load(Ordering::SeqCst)
    }

    /// Updates given up on after retries or rejection.
    pub fn dropped(&self) -> u64 {
        self.inner.dropped.load(Ordering::SeqCst)
    }
}

/// Cloneable sender side of the persistence queue.
#[derive(Debug, Clone)]
pub struct PersistenceHandle {
    tx: mpsc::UnboundedSender<RecordUpdate>,
    health: PersistenceHealth,
}

impl PersistenceHandle {
    /// Queue updates without waiting for the store.
    pub fn submit(&self, updates: Vec<RecordUpdate>) {
        for update in updates {
            self.health.inner.pending.fetch_add(1, Ordering::SeqCst);
            if self.tx.send(update).is_err() {
                self.health.inner.pending.fetch_sub(1, Ordering::SeqCst);
                self.health.inner.dropped.fetch_add(1, Ordering::SeqCst);
                error!("Persistence writer stopped, record update dropped");
            }
        }
    }

    pub fn health(&self) -> &PersistenceHealth {
        &self.health
    }
}

/// Drains the persistence queue into a [`PersistenceAdapter`].
pub struct PersistenceWriter {
    adapter: Arc<dyn PersistenceAdapter>,
    rx: mpsc::UnboundedReceiver<RecordUpdate>,
    retry: RetryConfig,
    health: PersistenceHealth,
}

impl PersistenceWriter {
    pub fn new(
        adapter: Arc<dyn PersistenceAdapter>,
        retry: RetryConfig,
    ) -> (Self, PersistenceHandle) {
        let (tx, rx) = mpsc::unbounded_channel();
        let health = PersistenceHealth::default();
        let writer = Self {
            adapter,
            rx,
            retry,
            health: health.clone(),
        };
        (writer, PersistenceHandle { tx, health })
    }

    pub fn health(&self) -> PersistenceHealth {
        self.health.clone()
    }

    /// Write queued updates until shutdown, then flush what is already queued.
    pub async fn run(mut self, mut shutdown: watch::Receiver<bool>) {
        info!("Starting persistence writer");
        loop {
            tokio::select! {
                update = self.rx.recv() => {
                    match update {
                        Some(update) => self.write_with_retry(update).await,
                        None => break,
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.rx.close();
        let mut flushed = 0usize;
        while let Some(update) = self.rx.recv().await {
            self.write_with_retry(update).await;
            flushed += 1;
        }
        info!(flushed, "Persistence writer stopped");
    }

    async fn write(&self, update: &RecordUpdate) -> Result<(), PersistenceError> {
        match update {
            RecordUpdate::Identity(identity) => self.adapter.upsert_identity(identity).await,
            RecordUpdate::Visit(visit) => self.adapter.upsert_visit(visit).await,
        }
    }

    async fn write_with_retry(&self, update: RecordUpdate) {
        let mut attempt = 0u32;
        let outcome = loop {
            match self.write(&update).await {
                Ok(()) => break Ok(()),
                Err(e) if e.is_retryable() && attempt < self.retry.max_retries => {
                    attempt += 1;
                    let delay = self.retry.delay_for_attempt(attempt);
                    debug!(attempt, ?delay, "Persistence write failed, retrying: {}", e);
                    crate::metrics::record_persist_retry();
                    tokio::time::sleep(delay).await;
                }
                Err(e) => break Err(e),
            }
        };

        let inner = &self.health.inner;
        inner.pending.fetch_sub(1, Ordering::SeqCst);
        match outcome {
            Ok(()) => {
                inner.written.fetch_add(1, Ordering::SeqCst);
                if inner.alarm.swap(false, Ordering::SeqCst) {
                    info!("Persistence store recovered, alarm cleared");
                }
            }
            Err(e) => {
                inner.dropped.fetch_add(1, Ordering::SeqCst);
                if e.is_retryable() {
                    inner.alarm.store(true, Ordering::SeqCst);
                    crate::metrics::record_persist_alarm();
                    error!(
                        attempts = attempt + 1,
                        update = ?update,
                        "Persistence retries exhausted, storage alarm raised: {}", e
                    );
                } else {
                    warn!(update = ?update, "Persistence write rejected: {}", e);
                }
            }
        }
    }
}
