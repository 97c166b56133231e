//! Visitor statistics and dwell-time reporting.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::ResetPolicy;
use crate::reid::identity::GlobalId;
use crate::reid::resolver::IdentityResolver;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Stats {
    /// Identities currently ACTIVE
    pub active_count: usize,
    /// Visits opened since the start of the reporting day
    pub total_today: usize,
}

/// Dwell time of one visit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimeSpent {
    pub global_id: GlobalId,
    pub entry_time: DateTime<Utc>,
    pub exit_time: Option<DateTime<Utc>>,
    pub elapsed_seconds: f64,
    pub elapsed_human: String,
}

/// Archived counters of one reporting day.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DailySummary {
    pub day_started_at: DateTime<Utc>,
    pub reset_at: DateTime<Utc>,
    pub total_visits: usize,
    pub active_at_reset: usize,
    /// Identities exited by a force-close reset
    pub force_closed: Vec<GlobalId>,
}

/// Render whole seconds as `"1h 2m 3s"`, `"3m 10s"` or `"45s"`.
pub fn format_elapsed(seconds: f64) -> String {
    let total = if seconds.is_finite() && seconds > 0.0 {
        seconds.floor() as u64
    } else {
        0
    };
    let (hours, minutes, secs) = (total / 3600, (total % 3600) / 60, total % 60);
    if hours > 0 {
        format!("{hours}h {minutes}m {secs}s")
    } else if minutes > 0 {
        format!("{minutes}m {secs}s")
    } else {
        format!("{secs}s")
    }
}

impl IdentityResolver {
    pub fn stats(&self) -> Stats {
        self.with_state(|state| {
            let day_start = state.day_started_at;
            let total_today = state
                .records
                .values()
                .flat_map(|r| r.visits.iter())
                .filter(|v| v.opened_at >= day_start)
                .count();
            Stats {
                active_count: state.active_count,
                total_today,
            }
        })
    }

    /// One row per visit, ordered by identity then visit; open visits are measured to `now`.
    pub fn time_spent(&self, now: DateTime<Utc>) -> Vec<TimeSpent> {
        self.with_state(|state| {
            state
                .records
                .values()
                .flat_map(|r| r.visits.iter())
                .map(|visit| {
                    let elapsed_seconds = visit.elapsed_seconds(now);
                    TimeSpent {
                        global_id: visit.global_id,
                        entry_time: visit.opened_at,
                        exit_time: visit.closed_at,
                        elapsed_seconds,
                        elapsed_human: format_elapsed(elapsed_seconds),
                    }
                })
                .collect()
        })
    }

    /// Start a new reporting day using the configured [`ResetPolicy`].
    pub fn reset_daily(&self, now: DateTime<Utc>) -> DailySummary {
        self.reset_daily_with(now, self.config().reset_policy)
    }

    pub fn reset_daily_with(&self, now: DateTime<Utc>, policy: ResetPolicy) -> DailySummary {
        let exit_policy = self.config().exit_policy;
        let (summary, active_count) = self.with_state(|state| {
            let day_started_at = state.day_started_at;
            let total_visits = state
                .records
                .values()
                .flat_map(|r| r.visits.iter())
                .filter(|v| v.opened_at >= day_started_at)
                .count();
            let active_at_reset = state.active_count;

            let mut updates = Vec::new();
            let mut force_closed = Vec::new();
            if policy == ResetPolicy::ForceClose {
                let open: Vec<GlobalId> = state
                    .records
                    .values()
                    .filter(|r| r.identity.is_active())
                    .map(|r| r.identity.global_id)
                    .collect();
                for global_id in open {
                    updates.extend(state.exit_identity(global_id, now, exit_policy));
                    force_closed.push(global_id);
                }
            }

            let summary = DailySummary {
                day_started_at,
                reset_at: now,
                total_visits,
                active_at_reset,
                force_closed,
            };
            state.day_started_at = now;
            state.daily_history.push(summary.clone());
            self.submit(updates);
            (summary, state.active_count)
        });

        crate::metrics::set_active_identities(active_count);
        info!(
            total_visits = summary.total_visits,
            active_at_reset = summary.active_at_reset,
            force_closed = summary.force_closed.len(),
            ?policy,
            "Daily counters reset"
        );
        summary
    }

    /// Summaries of every completed reporting day, oldest first.
    pub fn daily_history(&self) -> Vec<DailySummary> {
        self.with_state(|state| state.daily_history.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReidConfig;
    use crate::reid::embedding::EmbeddingVector;
    use crate::reid::resolver::Observation;
    use crate::tracker::{CameraId, LocalId};
    use chrono::{NaiveDate, TimeZone};
    use std::time::Duration;

    fn at(h: u32, m: u32, s: u32, micros: u32) -> DateTime<Utc> {
        let naive = NaiveDate::from_ymd_opt(2024, 3, 14)
            .unwrap()
            .and_hms_micro_opt(h, m, s, micros)
            .unwrap();
        Utc.from_utc_datetime(&naive)
    }

    fn observe(resolver: &IdentityResolver, camera: &str, local: u64, t: DateTime<Utc>, v: [f32; 2]) {
        resolver
            .resolve(Observation {
                camera_id: CameraId::from(camera),
                local_id: LocalId(local),
                frame_number: 0,
                observed_at: t,
                embedding: EmbeddingVector::new(v.to_vec()),
            })
            .unwrap();
    }

    fn resolver(day_start: DateTime<Utc>) -> IdentityResolver {
        IdentityResolver::builder(ReidConfig::default().with_embedding_dim(2))
            .day_started_at(day_start)
            .build()
            .unwrap()
    }

    #[test]
    fn format_elapsed_variants() {
        assert_eq!(format_elapsed(190.507371), "3m 10s");
        assert_eq!(format_elapsed(3723.9), "1h 2m 3s");
        assert_eq!(format_elapsed(45.0), "45s");
        assert_eq!(format_elapsed(0.4), "0s");
        assert_eq!(format_elapsed(-3.0), "0s");
    }

    #[test]
    fn closed_visit_time_spent() {
        let resolver = resolver(at(0, 0, 0, 0));
        observe(&resolver, "cam1", 1, at(5, 51, 8, 241_193), [1.0, 0.0]);
        observe(&resolver, "cam1", 1, at(5, 54, 18, 748_564), [1.0, 0.0]);
        resolver.close_stale(at(6, 0, 0, 0), Duration::from_secs(60));

        let rows = resolver.time_spent(at(7, 0, 0, 0));
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].global_id, GlobalId(1));
        assert_eq!(rows[0].exit_time, Some(at(5, 54, 18, 748_564)));
        assert!((rows[0].elapsed_seconds - 190.507371).abs() < 1e-6);
        assert_eq!(rows[0].elapsed_human, "3m 10s");
    }

    #[test]
    fn open_visit_measured_to_now() {
        let resolver = resolver(at(0, 0, 0, 0));
        observe(&resolver, "cam1", 1, at(9, 0, 0, 0), [1.0, 0.0]);
        let rows = resolver.time_spent(at(9, 0, 45, 0));
        assert_eq!(rows[0].exit_time, None);
        assert_eq!(rows[0].elapsed_human, "45s");
    }

    #[test]
    fn stats_count_active_and_today() {
        let resolver = resolver(at(0, 0, 0, 0));
        observe(&resolver, "cam1", 1, at(9, 0, 0, 0), [1.0, 0.0]);
        observe(&resolver, "cam2", 1, at(9, 0, 10, 0), [0.0, 1.0]);
        assert_eq!(
            resolver.stats(),
            Stats {
                active_count: 2,
                total_today: 2
            }
        );

        resolver.close_stale(at(9, 0, 50, 0), Duration::from_secs(45));
        let stats = resolver.stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.total_today, 2);
    }

    #[test]
    fn carry_over_reset_keeps_open_visits() {
        let resolver = resolver(at(0, 0, 0, 0));
        observe(&resolver, "cam1", 1, at(23, 50, 0, 0), [1.0, 0.0]);

        let midnight = at(23, 59, 59, 999_999);
        let summary = resolver.reset_daily_with(midnight, ResetPolicy::CarryOver);
        assert_eq!(summary.total_visits, 1);
        assert_eq!(summary.active_at_reset, 1);
        assert!(summary.force_closed.is_empty());

        let stats = resolver.stats();
        assert_eq!(stats.active_count, 1);
        assert_eq!(stats.total_today, 0);
        assert!(resolver.time_spent(midnight)[0].exit_time.is_none());
        assert_eq!(resolver.daily_history(), vec![summary]);
    }

    #[test]
    fn force_close_reset_exits_identities() {
        let resolver = resolver(at(0, 0, 0, 0));
        observe(&resolver, "cam1", 1, at(23, 50, 0, 0), [1.0, 0.0]);

        let reset_at = at(23, 59, 0, 0);
        let summary = resolver.reset_daily_with(reset_at, ResetPolicy::ForceClose);
        assert_eq!(summary.force_closed, vec![GlobalId(1)]);
        assert_eq!(resolver.stats().active_count, 0);
        assert_eq!(resolver.visits(GlobalId(1))[0].closed_at, Some(reset_at));
        assert!(!resolver.identity(GlobalId(1)).unwrap().is_active());
    }
}
