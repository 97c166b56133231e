//! Identity resolver: the single writer of the embedding index and identity records.
//!
//! Every observation goes through one serialized decision path: query the
//! index, decide NEW_VISITOR vs REID_MATCH, then mutate the index and the
//! identity records, all under one lock. Two cameras seeing the same new
//! person at the same instant therefore cannot both observe "no match".
//! Record updates are queued for persistence in decision order while the
//! lock is held; the queue never blocks and the store write happens on the
//! writer task. Assignment sinks run after the lock is released.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::{ExitPolicy, ReidConfig};
use crate::error::{IndexError, Result};
use crate::integration::PersistenceHandle;
use crate::reid::assignment_log::{AssignmentRecord, AssignmentSink};
use crate::reid::embedding::EmbeddingVector;
use crate::reid::identity::{
    GlobalId, GlobalIdentity, IdentityRecord, IdentityStatus, RecordUpdate, VisitEvent, VisitId,
};
use crate::reid::index::{FlatIndex, IndexEntry, SearchHit, VectorIndex};
use crate::reid::report::DailySummary;
use crate::tracker::{CameraId, LocalId};

/// One embedded observation of a local track.
#[derive(Debug, Clone)]
pub struct Observation {
    pub camera_id: CameraId,
    pub local_id: LocalId,
    pub frame_number: u64,
    pub observed_at: DateTime<Utc>,
    pub embedding: EmbeddingVector,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Decision {
    /// No candidate reached the threshold; a new identity was created.
    NewVisitor,
    /// Matched an existing identity through the index.
    ReidMatch,
    /// Repeat observation of a local track already bound to an identity.
    TrackRefresh,
}

impl Decision {
    pub fn as_str(&self) -> &'static str {
        match self {
            Decision::NewVisitor => "NEW_VISITOR",
            Decision::ReidMatch => "REID_MATCH",
            Decision::TrackRefresh => "TRACK_REFRESH",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Resolution {
    pub global_id: GlobalId,
    pub decision: Decision,
    pub similarity: Option<f32>,
    /// An exited identity was reopened with a new visit
    pub reopened: bool,
    /// Resolved without a usable index query
    pub degraded: bool,
    /// Exact replay of an already processed observation; nothing changed
    pub replayed: bool,
}

#[derive(Debug, Clone, Copy)]
struct TrackBinding {
    global_id: GlobalId,
    last_observed_at: DateTime<Utc>,
}

pub(crate) struct ResolverState {
    pub(crate) index: Box<dyn VectorIndex>,
    pub(crate) records: BTreeMap<GlobalId, IdentityRecord>,
    bindings: HashMap<(CameraId, LocalId), TrackBinding>,
    next_global_id: u64,
    next_visit_id: u64,
    pub(crate) active_count: usize,
    pub(crate) day_started_at: DateTime<Utc>,
    pub(crate) daily_history: Vec<DailySummary>,
    /// Newest capture timestamp resolved so far
    latest_observed_at: Option<DateTime<Utc>>,
}

impl ResolverState {
    fn allocate_global_id(&mut self) -> GlobalId {
        let id = GlobalId(self.next_global_id);
        self.next_global_id += 1;
        id
    }

    fn open_visit(
        &mut self,
        global_id: GlobalId,
        camera_id: &CameraId,
        at: DateTime<Utc>,
    ) -> VisitEvent {
        let visit = VisitEvent {
            visit_id: VisitId(self.next_visit_id),
            global_id,
            camera_id: camera_id.clone(),
            opened_at: at,
            closed_at: None,
        };
        self.next_visit_id += 1;
        visit
    }

    /// Close the identity's visit and apply the exit policy to its index entry.
    pub(crate) fn exit_identity(
        &mut self,
        global_id: GlobalId,
        closed_at: DateTime<Utc>,
        exit_policy: ExitPolicy,
    ) -> Vec<RecordUpdate> {
        let Some(record) = self.records.get_mut(&global_id) else {
            return Vec::new();
        };
        if !record.identity.is_active() {
            return Vec::new();
        }
        let closed = record.exit(closed_at);
        let mut updates = vec![RecordUpdate::Identity(record.identity.clone())];
        updates.extend(closed.map(RecordUpdate::Visit));
        self.active_count = self.active_count.saturating_sub(1);

        match exit_policy {
            ExitPolicy::RetainInactive => {
                self.index.mark_inactive(global_id);
            }
            ExitPolicy::Evict => {
                self.index.remove(global_id);
            }
        }
        updates
    }
}

struct ResolverInner {
    config: ReidConfig,
    state: Mutex<ResolverState>,
    sinks: Vec<Arc<dyn AssignmentSink>>,
    persistence: Option<PersistenceHandle>,
}

/// Builder for [`IdentityResolver`].
pub struct ResolverBuilder {
    config: ReidConfig,
    index: Option<Box<dyn VectorIndex>>,
    sinks: Vec<Arc<dyn AssignmentSink>>,
    persistence: Option<PersistenceHandle>,
    day_started_at: DateTime<Utc>,
}

impl ResolverBuilder {
    /// Use a custom index backend instead of the default [`FlatIndex`].
    pub fn index(mut self, index: Box<dyn VectorIndex>) -> Self {
        self.index = Some(index);
        self
    }

    pub fn sink(mut self, sink: Arc<dyn AssignmentSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn persistence(mut self, handle: PersistenceHandle) -> Self {
        self.persistence = Some(handle);
        self
    }

    /// Start of the first reporting day (defaults to construction time).
    pub fn day_started_at(mut self, at: DateTime<Utc>) -> Self {
        self.day_started_at = at;
        self
    }

    pub fn build(self) -> Result<IdentityResolver> {
        self.config.validate()?;
        let index = match self.index {
            Some(index) => {
                if index.dim() != self.config.embedding_dim {
                    return Err(IndexError::DimensionMismatch {
                        expected: self.config.embedding_dim,
                        got: index.dim(),
                    }
                    .into());
                }
                index
            }
            None => Box::new(FlatIndex::new(
                self.config.embedding_dim,
                self.config.index_capacity,
            )),
        };

        Ok(IdentityResolver {
            inner: Arc::new(ResolverInner {
                config: self.config,
                state: Mutex::new(ResolverState {
                    index,
                    records: BTreeMap::new(),
                    bindings: HashMap::new(),
                    next_global_id: 1,
                    next_visit_id: 1,
                    active_count: 0,
                    day_started_at: self.day_started_at,
                    daily_history: Vec::new(),
                    latest_observed_at: None,
                }),
                sinks: self.sinks,
                persistence: self.persistence,
            }),
        })
    }
}

/// Handle to the shared resolver; cheap to clone across camera workers.
#[derive(Clone)]
pub struct IdentityResolver {
    inner: Arc<ResolverInner>,
}

/// Outcome computed under the lock, published after it is released.
struct Pending {
    resolution: Resolution,
    updates: Vec<RecordUpdate>,
    active_count: usize,
}

impl IdentityResolver {
    pub fn builder(config: ReidConfig) -> ResolverBuilder {
        ResolverBuilder {
            config,
            index: None,
            sinks: Vec::new(),
            persistence: None,
            day_started_at: Utc::now(),
        }
    }

    pub fn new(config: ReidConfig) -> Result<Self> {
        Self::builder(config).build()
    }

    pub fn config(&self) -> &ReidConfig {
        &self.inner.config
    }

    /// Resolve one observation to a global identity.
    ///
    /// Fails only for embeddings that cannot be compared (wrong dimension,
    /// zero norm, non-finite); such observations are dropped by the caller.
    pub fn resolve(&self, observation: Observation) -> Result<Resolution> {
        let config = &self.inner.config;
        let query = match observation.embedding.normalized(config.embedding_dim) {
            Ok(query) => query,
            Err(e) => {
                crate::metrics::record_invalid_embedding();
                return Err(e.into());
            }
        };

        let pending = {
            let mut state = self.inner.state.lock();
            let mut pending = self.decide(&mut state, &observation, &query);
            if !pending.resolution.replayed {
                let observed_at = Some(observation.observed_at);
                state.latest_observed_at = state.latest_observed_at.max(observed_at);
            }
            self.submit(std::mem::take(&mut pending.updates));
            pending
        };

        let resolution = pending.resolution.clone();
        if resolution.replayed {
            return Ok(resolution);
        }
        self.publish(&observation, pending);
        Ok(resolution)
    }

    fn decide(
        &self,
        state: &mut ResolverState,
        observation: &Observation,
        query: &EmbeddingVector,
    ) -> Pending {
        let config = &self.inner.config;
        let key = (observation.camera_id.clone(), observation.local_id);

        if let Some(binding) = state.bindings.get(&key).copied() {
            if observation.observed_at <= binding.last_observed_at {
                return Pending {
                    resolution: Resolution {
                        global_id: binding.global_id,
                        decision: Decision::TrackRefresh,
                        similarity: None,
                        reopened: false,
                        degraded: false,
                        replayed: true,
                    },
                    updates: Vec::new(),
                    active_count: state.active_count,
                };
            }

            match state.index.similarity(binding.global_id, query) {
                Ok(Some(score)) if score >= config.match_threshold => {
                    // The track follows whichever identity it now matches best.
                    let better = self
                        .search_with_retry(state, query)
                        .ok()
                        .and_then(|hits| hits.first().copied())
                        .filter(|best| best.global_id != binding.global_id && best.score > score);
                    if let Some(best) = better {
                        info!(
                            camera_id = %observation.camera_id,
                            local_id = %observation.local_id,
                            from = %binding.global_id,
                            to = %best.global_id,
                            similarity = best.score,
                            "Track matches another identity more closely, rebinding"
                        );
                        return self.apply_match(
                            state,
                            observation,
                            query,
                            best.global_id,
                            Some(best.score),
                            Decision::ReidMatch,
                        );
                    }
                    return self.apply_match(
                        state,
                        observation,
                        query,
                        binding.global_id,
                        Some(score),
                        Decision::TrackRefresh,
                    );
                }
                Ok(None) if state.records.contains_key(&binding.global_id) => {
                    // Identity created while the index was full; keep the track on it.
                    debug!(
                        camera_id = %observation.camera_id,
                        local_id = %observation.local_id,
                        global_id = %binding.global_id,
                        "Bound identity has no index entry, refreshing binding"
                    );
                    return self.apply_match(
                        state,
                        observation,
                        query,
                        binding.global_id,
                        None,
                        Decision::TrackRefresh,
                    );
                }
                Ok(score) => {
                    warn!(
                        camera_id = %observation.camera_id,
                        local_id = %observation.local_id,
                        global_id = %binding.global_id,
                        similarity = ?score,
                        "Track appearance drifted from its identity, re-resolving"
                    );
                }
                Err(e) => {
                    warn!(
                        camera_id = %observation.camera_id,
                        local_id = %observation.local_id,
                        "Bound identity lookup failed, re-resolving: {}", e
                    );
                }
            }
            state.bindings.remove(&key);
        }

        match self.search_with_retry(state, query) {
            Ok(hits) => match hits.first() {
                Some(best) if best.score >= config.match_threshold => self.apply_match(
                    state,
                    observation,
                    query,
                    best.global_id,
                    Some(best.score),
                    Decision::ReidMatch,
                ),
                best => self.create_identity(
                    state,
                    observation,
                    query,
                    best.map(|h| h.score),
                    false,
                ),
            },
            Err(e) => {
                warn!(
                    camera_id = %observation.camera_id,
                    local_id = %observation.local_id,
                    "Index query failed, resolving as new visitor in degraded mode: {}", e
                );
                crate::metrics::record_degraded_resolution();
                self.create_identity(state, observation, query, None, true)
            }
        }
    }

    fn search_with_retry(
        &self,
        state: &ResolverState,
        query: &EmbeddingVector,
    ) -> std::result::Result<Vec<SearchHit>, IndexError> {
        let attempts = self.inner.config.index_retry_attempts.max(1);
        let mut last_err = None;
        for attempt in 1..=attempts {
            match state.index.search(query, self.inner.config.search_top_k) {
                Ok(hits) => return Ok(hits),
                Err(e) => {
                    debug!(attempt, attempts, "Index search failed: {}", e);
                    last_err = Some(e);
                }
            }
        }
        Err(last_err.unwrap_or_else(|| IndexError::Unavailable("no attempt made".into())))
    }

    fn apply_match(
        &self,
        state: &mut ResolverState,
        observation: &Observation,
        query: &EmbeddingVector,
        global_id: GlobalId,
        score: Option<f32>,
        decision: Decision,
    ) -> Pending {
        let Some(previous) = state.records.get(&global_id).map(|r| r.identity.clone()) else {
            // Index entry without a record: treat the observation as a new person.
            warn!(global_id = %global_id, "Index entry has no identity record");
            state.index.remove(global_id);
            return self.create_identity(state, observation, query, score, false);
        };

        // A late observation older than the closed visit belongs to that visit.
        let reopen = previous.status == IdentityStatus::Exited
            && observation.observed_at > previous.last_seen_at;
        let visit = reopen.then(|| {
            state.open_visit(global_id, &observation.camera_id, observation.observed_at)
        });

        let mut updates = Vec::with_capacity(2);
        if let Some(record) = state.records.get_mut(&global_id) {
            record.identity.observe(observation.observed_at);
            if let Some(visit) = visit {
                record.identity.status = IdentityStatus::Active;
                record.visits.push(visit.clone());
                updates.push(RecordUpdate::Visit(visit));
            }
            updates.insert(0, RecordUpdate::Identity(record.identity.clone()));
        }

        if reopen {
            state.active_count += 1;
            info!(
                global_id = %global_id,
                camera_id = %observation.camera_id,
                similarity = ?score,
                "Identity re-entered"
            );
        }

        if previous.status == IdentityStatus::Active || reopen {
            self.refresh_entry(state, global_id, query, observation.observed_at);
        }

        state.bindings.insert(
            (observation.camera_id.clone(), observation.local_id),
            TrackBinding {
                global_id,
                last_observed_at: observation.observed_at,
            },
        );

        Pending {
            resolution: Resolution {
                global_id,
                decision,
                similarity: score,
                reopened: reopen,
                degraded: false,
                replayed: false,
            },
            updates,
            active_count: state.active_count,
        }
    }

    /// Fold the observation into the identity's index entry.
    ///
    /// The blend is skipped, and the entry only reactivated, when the blended
    /// vector would reach the match threshold against any other entry; two
    /// identities never become match-eligible with each other.
    fn refresh_entry(
        &self,
        state: &mut ResolverState,
        global_id: GlobalId,
        query: &EmbeddingVector,
        at: DateTime<Utc>,
    ) {
        let config = &self.inner.config;
        let candidate = match state.index.get(global_id) {
            Some(entry) => entry.vector.blend(query, config.ema_momentum),
            None => query.clone(),
        };
        let conflict = match state.index.search(&candidate, state.index.len()) {
            Ok(hits) => hits
                .into_iter()
                .find(|hit| hit.global_id != global_id && hit.score >= config.match_threshold),
            Err(e) => {
                warn!(global_id = %global_id, "Index query failed, keeping previous vector: {}", e);
                state.index.touch(global_id, at);
                return;
            }
        };

        if let Some(hit) = conflict {
            debug!(
                global_id = %global_id,
                conflicting = %hit.global_id,
                similarity = hit.score,
                "Embedding update would collide with another identity, keeping previous vector"
            );
            crate::metrics::record_refresh_rejected();
            state.index.touch(global_id, at);
            return;
        }

        if let Err(e) = state.index.refresh(global_id, query, config.ema_momentum, at) {
            warn!(global_id = %global_id, "Failed to refresh index entry: {}", e);
            crate::metrics::record_index_insert_failure();
        }
    }

    fn create_identity(
        &self,
        state: &mut ResolverState,
        observation: &Observation,
        query: &EmbeddingVector,
        best_score: Option<f32>,
        degraded: bool,
    ) -> Pending {
        let global_id = state.allocate_global_id();
        let identity = GlobalIdentity::new(global_id, observation.observed_at);
        let visit = state.open_visit(global_id, &observation.camera_id, observation.observed_at);

        if let Err(e) = state.index.insert(global_id, query, observation.observed_at) {
            warn!(
                global_id = %global_id,
                "Identity created without an index entry: {}", e
            );
            crate::metrics::record_index_insert_failure();
        }

        state.records.insert(
            global_id,
            IdentityRecord {
                identity: identity.clone(),
                visits: vec![visit.clone()],
            },
        );
        state.active_count += 1;
        state.bindings.insert(
            (observation.camera_id.clone(), observation.local_id),
            TrackBinding {
                global_id,
                last_observed_at: observation.observed_at,
            },
        );

        debug!(
            global_id = %global_id,
            camera_id = %observation.camera_id,
            local_id = %observation.local_id,
            best_score = ?best_score,
            "New identity"
        );

        Pending {
            resolution: Resolution {
                global_id,
                decision: Decision::NewVisitor,
                similarity: best_score,
                reopened: false,
                degraded,
                replayed: false,
            },
            updates: vec![RecordUpdate::Identity(identity), RecordUpdate::Visit(visit)],
            active_count: state.active_count,
        }
    }

    fn publish(&self, observation: &Observation, pending: Pending) {
        let Pending {
            resolution,
            active_count,
            ..
        } = pending;

        crate::metrics::record_decision(resolution.decision);
        crate::metrics::set_active_identities(active_count);

        if self.inner.sinks.is_empty() {
            return;
        }
        let record = AssignmentRecord {
            timestamp: observation.observed_at,
            camera_id: observation.camera_id.clone(),
            frame_number: observation.frame_number,
            local_id: observation.local_id,
            global_id: resolution.global_id,
            assignment_type: resolution.decision,
            similarity_score: resolution.similarity,
            degraded: resolution.degraded,
        };
        for sink in &self.inner.sinks {
            sink.record(&record);
        }
    }

    /// Queue updates for the persistence writer; never blocks.
    pub(crate) fn submit(&self, updates: Vec<RecordUpdate>) {
        if updates.is_empty() {
            return;
        }
        if let Some(persistence) = &self.inner.persistence {
            persistence.submit(updates);
        }
    }

    /// Forget the binding of a retired local track.
    ///
    /// Identities are untouched; exit is left to the reaper.
    pub fn end_track(&self, camera_id: &CameraId, local_id: LocalId) {
        let removed = self
            .inner
            .state
            .lock()
            .bindings
            .remove(&(camera_id.clone(), local_id));
        if let Some(binding) = removed {
            debug!(
                camera_id = %camera_id,
                local_id = %local_id,
                global_id = %binding.global_id,
                "Track binding released"
            );
        }
    }

    /// Close every active identity not seen for longer than `timeout` as of `now`.
    pub fn close_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<GlobalId> {
        let mut state = self.inner.state.lock();
        self.close_stale_locked(&mut state, now, timeout)
    }

    /// Like [`close_stale`](Self::close_stale) but returns `None` instead of
    /// waiting when the lock is held.
    pub fn try_close_stale(&self, now: DateTime<Utc>, timeout: Duration) -> Option<Vec<GlobalId>> {
        let mut state = self.inner.state.try_lock()?;
        Some(self.close_stale_locked(&mut state, now, timeout))
    }

    /// Non-blocking close measured against the newest observation instead of
    /// the wall clock, for recorded media with historical timestamps.
    pub fn try_close_stale_observed(&self, timeout: Duration) -> Option<Vec<GlobalId>> {
        let mut state = self.inner.state.try_lock()?;
        let Some(now) = state.latest_observed_at else {
            return Some(Vec::new());
        };
        Some(self.close_stale_locked(&mut state, now, timeout))
    }

    fn close_stale_locked(
        &self,
        state: &mut ResolverState,
        now: DateTime<Utc>,
        timeout: Duration,
    ) -> Vec<GlobalId> {
        let stale: Vec<(GlobalId, DateTime<Utc>)> = state
            .records
            .values()
            .filter(|r| r.identity.is_active())
            .filter(|r| {
                (now - r.identity.last_seen_at)
                    .to_std()
                    .map(|idle| idle > timeout)
                    .unwrap_or(false)
            })
            .map(|r| (r.identity.global_id, r.identity.last_seen_at))
            .collect();

        if stale.is_empty() {
            return Vec::new();
        }

        let exit_policy = self.inner.config.exit_policy;
        let mut updates = Vec::new();
        for &(global_id, last_seen_at) in &stale {
            updates.extend(state.exit_identity(global_id, last_seen_at, exit_policy));
            info!(global_id = %global_id, last_seen_at = %last_seen_at, "Identity exited");
        }
        crate::metrics::record_reaped(stale.len());
        crate::metrics::set_active_identities(state.active_count);

        self.submit(updates);

        stale.into_iter().map(|(id, _)| id).collect()
    }

    pub(crate) fn with_state<R>(&self, f: impl FnOnce(&mut ResolverState) -> R) -> R {
        let mut state = self.inner.state.lock();
        f(&mut state)
    }

    pub fn identity(&self, global_id: GlobalId) -> Option<GlobalIdentity> {
        self.with_state(|s| s.records.get(&global_id).map(|r| r.identity.clone()))
    }

    /// All identities ordered by id.
    pub fn identities(&self) -> Vec<GlobalIdentity> {
        self.with_state(|s| s.records.values().map(|r| r.identity.clone()).collect())
    }

    pub fn visits(&self, global_id: GlobalId) -> Vec<VisitEvent> {
        self.with_state(|s| {
            s.records
                .get(&global_id)
                .map(|r| r.visits.clone())
                .unwrap_or_default()
        })
    }

    pub fn index_entry(&self, global_id: GlobalId) -> Option<IndexEntry> {
        self.with_state(|s| s.index.get(global_id).cloned())
    }

    pub fn index_len(&self) -> usize {
        self.with_state(|s| s.index.len())
    }

    pub fn active_count(&self) -> usize {
        self.with_state(|s| s.active_count)
    }

    pub fn latest_observed_at(&self) -> Option<DateTime<Utc>> {
        self.with_state(|s| s.latest_observed_at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(ReidConfig::default().with_embedding_dim(3)).unwrap()
    }

    fn obs(camera: &str, local: u64, secs: i64, v: [f32; 3]) -> Observation {
        Observation {
            camera_id: CameraId::from(camera),
            local_id: LocalId(local),
            frame_number: secs as u64,
            observed_at: ts(secs),
            embedding: EmbeddingVector::new(v.to_vec()),
        }
    }

    #[test]
    fn first_observation_creates_identity() {
        let resolver = resolver();
        let res = resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();
        assert_eq!(res.decision, Decision::NewVisitor);
        assert_eq!(res.global_id, GlobalId(1));
        assert_eq!(res.similarity, None);

        let visits = resolver.visits(GlobalId(1));
        assert_eq!(visits.len(), 1);
        assert!(visits[0].is_open());
    }

    #[test]
    fn bound_track_refreshes_same_identity() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();
        let res = resolver.resolve(obs("cam1", 1, 1, [0.99, 0.1, 0.0])).unwrap();
        assert_eq!(res.decision, Decision::TrackRefresh);
        assert_eq!(res.global_id, GlobalId(1));
        assert_eq!(resolver.identity(GlobalId(1)).unwrap().last_seen_at, ts(1));
    }

    #[test]
    fn replayed_observation_changes_nothing() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 5, [1.0, 0.0, 0.0])).unwrap();
        let entry_before = resolver.index_entry(GlobalId(1)).unwrap();

        let res = resolver.resolve(obs("cam1", 1, 5, [0.8, 0.6, 0.0])).unwrap();
        assert!(res.replayed);
        assert_eq!(resolver.identities().len(), 1);
        assert_eq!(resolver.visits(GlobalId(1)).len(), 1);
        assert_eq!(resolver.index_entry(GlobalId(1)).unwrap(), entry_before);
    }

    #[test]
    fn drifted_track_is_re_resolved() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();
        let res = resolver.resolve(obs("cam1", 1, 1, [0.0, 1.0, 0.0])).unwrap();
        assert_eq!(res.decision, Decision::NewVisitor);
        assert_eq!(res.global_id, GlobalId(2));
    }

    #[test]
    fn invalid_embedding_is_rejected() {
        let resolver = resolver();
        let mut bad = obs("cam1", 1, 0, [0.0, 0.0, 0.0]);
        assert!(resolver.resolve(bad.clone()).is_err());
        bad.embedding = EmbeddingVector::new(vec![1.0, 0.0]);
        assert!(resolver.resolve(bad).is_err());
        assert!(resolver.identities().is_empty());
    }

    #[test]
    fn end_track_keeps_identity() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();
        resolver.end_track(&CameraId::from("cam1"), LocalId(1));

        // A new local track of the same person matches through the index.
        let res = resolver.resolve(obs("cam1", 2, 3, [1.0, 0.05, 0.0])).unwrap();
        assert_eq!(res.decision, Decision::ReidMatch);
        assert_eq!(res.global_id, GlobalId(1));
        assert!(resolver.identity(GlobalId(1)).unwrap().is_active());
    }

    #[test]
    fn close_stale_is_idempotent() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();

        let timeout = Duration::from_secs(60);
        assert!(resolver.close_stale(ts(30), timeout).is_empty());
        assert_eq!(resolver.close_stale(ts(61), timeout), vec![GlobalId(1)]);
        assert!(resolver.close_stale(ts(500), timeout).is_empty());

        let identity = resolver.identity(GlobalId(1)).unwrap();
        assert_eq!(identity.status, IdentityStatus::Exited);
        assert_eq!(resolver.visits(GlobalId(1))[0].closed_at, Some(ts(0)));
        assert_eq!(resolver.active_count(), 0);
        assert!(!resolver.index_entry(GlobalId(1)).unwrap().active);
    }

    #[test]
    fn evict_policy_removes_index_entry_on_exit() {
        let config = ReidConfig::default()
            .with_embedding_dim(3)
            .with_exit_policy(ExitPolicy::Evict);
        let resolver = IdentityResolver::new(config).unwrap();
        resolver.resolve(obs("cam1", 1, 0, [1.0, 0.0, 0.0])).unwrap();
        resolver.close_stale(ts(120), Duration::from_secs(60));
        assert_eq!(resolver.index_len(), 0);
    }

    #[test]
    fn late_observation_does_not_reopen_closed_visit() {
        let resolver = resolver();
        resolver.resolve(obs("cam1", 1, 10, [1.0, 0.0, 0.0])).unwrap();
        resolver.close_stale(ts(100), Duration::from_secs(60));

        let res = resolver.resolve(obs("cam2", 4, 8, [1.0, 0.0, 0.0])).unwrap();
        assert_eq!(res.decision, Decision::ReidMatch);
        assert!(!res.reopened);
        assert_eq!(resolver.visits(GlobalId(1)).len(), 1);
        assert_eq!(
            resolver.identity(GlobalId(1)).unwrap().status,
            IdentityStatus::Exited
        );
    }
}
