//! Nearest-neighbour store over identity embeddings.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::IndexError;
use crate::reid::embedding::EmbeddingVector;
use crate::reid::identity::GlobalId;

/// Representative embedding of one identity.
#[derive(Debug, Clone, PartialEq)]
pub struct IndexEntry {
    pub global_id: GlobalId,
    /// Unit-length running average of the identity's observations
    pub vector: EmbeddingVector,
    pub updated_at: DateTime<Utc>,
    /// False once the identity has exited; still searchable for re-entry
    pub active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SearchHit {
    pub global_id: GlobalId,
    /// Cosine similarity in [-1, 1]
    pub score: f32,
}

/// Vector index backend used by the identity resolver.
///
/// Implementations need no internal locking: the resolver is the single
/// writer and serializes every call.
pub trait VectorIndex: Send {
    fn dim(&self) -> usize;

    fn len(&self) -> usize;

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Add or replace the entry for `global_id`.
    fn insert(
        &mut self,
        global_id: GlobalId,
        vector: &EmbeddingVector,
        at: DateTime<Utc>,
    ) -> Result<(), IndexError>;

    /// Blend `vector` into the stored entry (inserting when absent) and mark it active.
    fn refresh(
        &mut self,
        global_id: GlobalId,
        vector: &EmbeddingVector,
        momentum: f32,
        at: DateTime<Utc>,
    ) -> Result<(), IndexError>;

    /// Mark the entry active at `at` without changing its vector.
    ///
    /// Returns false when no entry exists for `global_id`.
    fn touch(&mut self, global_id: GlobalId, at: DateTime<Utc>) -> bool;

    /// Up to `top_k` hits, best first; ties ordered by ascending id.
    fn search(&self, query: &EmbeddingVector, top_k: usize) -> Result<Vec<SearchHit>, IndexError>;

    /// Similarity between `query` and one stored entry, if present.
    fn similarity(
        &self,
        global_id: GlobalId,
        query: &EmbeddingVector,
    ) -> Result<Option<f32>, IndexError>;

    fn get(&self, global_id: GlobalId) -> Option<&IndexEntry>;

    fn remove(&mut self, global_id: GlobalId) -> Option<IndexEntry>;

    /// Returns false when no entry exists for `global_id`.
    fn mark_inactive(&mut self, global_id: GlobalId) -> bool;
}

/// Exhaustive cosine-similarity index.
#[derive(Debug, Clone)]
pub struct FlatIndex {
    dim: usize,
    capacity: usize,
    entries: BTreeMap<GlobalId, IndexEntry>,
}

impl FlatIndex {
    pub fn new(dim: usize, capacity: usize) -> Self {
        Self {
            dim,
            capacity,
            entries: BTreeMap::new(),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn entries(&self) -> impl Iterator<Item = &IndexEntry> {
        self.entries.values()
    }

    /// Make room for one more entry by evicting the stalest inactive one.
    fn reserve_slot(&mut self) -> Result<(), IndexError> {
        if self.entries.len() < self.capacity {
            return Ok(());
        }
        let victim = self
            .entries
            .values()
            .filter(|e| !e.active)
            .min_by_key(|e| (e.updated_at, e.global_id))
            .map(|e| e.global_id)
            .ok_or(IndexError::CapacityExhausted {
                capacity: self.capacity,
            })?;
        self.entries.remove(&victim);
        tracing::debug!(global_id = %victim, "Evicted inactive index entry");
        Ok(())
    }
}

impl VectorIndex for FlatIndex {
    fn dim(&self) -> usize {
        self.dim
    }

    fn len(&self) -> usize {
        self.entries.len()
    }

    fn insert(
        &mut self,
        global_id: GlobalId,
        vector: &EmbeddingVector,
        at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        let vector = vector.normalized(self.dim)?;
        if !self.entries.contains_key(&global_id) {
            self.reserve_slot()?;
        }
        self.entries.insert(
            global_id,
            IndexEntry {
                global_id,
                vector,
                updated_at: at,
                active: true,
            },
        );
        Ok(())
    }

    fn refresh(
        &mut self,
        global_id: GlobalId,
        vector: &EmbeddingVector,
        momentum: f32,
        at: DateTime<Utc>,
    ) -> Result<(), IndexError> {
        let vector = vector.normalized(self.dim)?;
        match self.entries.get_mut(&global_id) {
            Some(entry) => {
                entry.vector = entry.vector.blend(&vector, momentum);
                entry.updated_at = entry.updated_at.max(at);
                entry.active = true;
                Ok(())
            }
            None => self.insert(global_id, &vector, at),
        }
    }

    fn touch(&mut self, global_id: GlobalId, at: DateTime<Utc>) -> bool {
        match self.entries.get_mut(&global_id) {
            Some(entry) => {
                entry.updated_at = entry.updated_at.max(at);
                entry.active = true;
                true
            }
            None => false,
        }
    }

    fn search(&self, query: &EmbeddingVector, top_k: usize) -> Result<Vec<SearchHit>, IndexError> {
        let query = query.normalized(self.dim)?;
        let mut hits: Vec<SearchHit> = self
            .entries
            .values()
            .map(|e| SearchHit {
                global_id: e.global_id,
                score: e.vector.dot(&query).clamp(-1.0, 1.0),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.global_id.cmp(&b.global_id))
        });
        hits.truncate(top_k);
        Ok(hits)
    }

    fn similarity(
        &self,
        global_id: GlobalId,
        query: &EmbeddingVector,
    ) -> Result<Option<f32>, IndexError> {
        let query = query.normalized(self.dim)?;
        Ok(self
            .entries
            .get(&global_id)
            .map(|e| e.vector.dot(&query).clamp(-1.0, 1.0)))
    }

    fn get(&self, global_id: GlobalId) -> Option<&IndexEntry> {
        self.entries.get(&global_id)
    }

    fn remove(&mut self, global_id: GlobalId) -> Option<IndexEntry> {
        self.entries.remove(&global_id)
    }

    fn mark_inactive(&mut self, global_id: GlobalId) -> bool {
        match self.entries.get_mut(&global_id) {
            Some(entry) => {
                entry.active = false;
                true
            }
            None => false,
        }
    }
}
