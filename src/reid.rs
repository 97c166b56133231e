//! Cross-camera identity resolution.
//!
//! Observations from every camera funnel into one [`IdentityResolver`],
//! which owns the embedding index and the identity/visit records.

mod assignment_log;
mod embedding;
mod identity;
mod index;
mod reaper;
mod report;
mod resolver;

pub use assignment_log::{AssignmentRecord, AssignmentSink, JsonlSink, MemorySink, TracingSink};
pub use embedding::EmbeddingVector;
pub use identity::{GlobalId, GlobalIdentity, IdentityStatus, RecordUpdate, VisitEvent, VisitId};
pub use index::{FlatIndex, IndexEntry, SearchHit, VectorIndex};
pub use reaper::TimeoutReaper;
pub use report::{DailySummary, Stats, TimeSpent, format_elapsed};
pub use resolver::{Decision, IdentityResolver, Observation, Resolution, ResolverBuilder};
