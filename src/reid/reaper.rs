//! Background closing of visits for identities that stopped being observed.

use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::time::{MissedTickBehavior, interval};
use tracing::{debug, info, warn};

use crate::config::ReaperClock;
use crate::reid::identity::GlobalId;
use crate::reid::resolver::IdentityResolver;

/// Timeout reaper.
///
/// Shares the resolver's serialization point, so an identity is never
/// closed while a match is refreshing it.
pub struct TimeoutReaper {
    resolver: IdentityResolver,
    timeout: Duration,
    interval: Duration,
    clock: ReaperClock,
}

impl TimeoutReaper {
    /// Reaper using the resolver's configured timeout and interval.
    pub fn new(resolver: IdentityResolver) -> Self {
        let timeout = resolver.config().inactivity_timeout;
        let interval = resolver.config().reap_interval;
        let clock = resolver.config().reaper_clock;
        Self {
            resolver,
            timeout,
            interval,
            clock,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Close every identity idle for longer than the timeout as of `now`.
    ///
    /// Returns the exited ids. Never waits for the resolver lock: contention
    /// skips this scan and the next tick picks the identities up.
    pub fn scan(&self, now: DateTime<Utc>) -> Vec<GlobalId> {
        self.finish_scan(self.resolver.try_close_stale(now, self.timeout))
    }

    /// One tick against the configured [`ReaperClock`].
    pub fn tick(&self) -> Vec<GlobalId> {
        match self.clock {
            ReaperClock::Wall => self.scan(Utc::now()),
            ReaperClock::Observed => {
                self.finish_scan(self.resolver.try_close_stale_observed(self.timeout))
            }
        }
    }

    fn finish_scan(&self, outcome: Option<Vec<GlobalId>>) -> Vec<GlobalId> {
        match outcome {
            Some(exited) => {
                if !exited.is_empty() {
                    info!(count = exited.len(), "Reaper closed idle identities");
                }
                exited
            }
            None => {
                warn!("Resolver busy, reaper retrying next tick");
                Vec::new()
            }
        }
    }

    /// Tick every `reap_interval` until `shutdown` becomes true.
    ///
    /// With [`ReaperClock::Wall`], media replayed with historical timestamps
    /// looks idle on every tick; use [`ReaperClock::Observed`] for it.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            "Starting timeout reaper (timeout: {:?}, interval: {:?}, clock: {:?})",
            self.timeout, self.interval, self.clock
        );

        let mut ticker = interval(self.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let exited = self.tick();
                    debug!(exited = exited.len(), "Reaper tick");
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        info!("Timeout reaper stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ReidConfig;
    use crate::reid::embedding::EmbeddingVector;
    use crate::reid::identity::IdentityStatus;
    use crate::reid::resolver::Observation;
    use crate::tracker::{CameraId, LocalId};

    fn resolver() -> IdentityResolver {
        IdentityResolver::new(
            ReidConfig::default()
                .with_embedding_dim(2)
                .with_inactivity_timeout(Duration::from_secs(60)),
        )
        .unwrap()
    }

    fn observe(resolver: &IdentityResolver, local: u64, at: DateTime<Utc>) {
        resolver
            .resolve(Observation {
                camera_id: CameraId::from("cam1"),
                local_id: LocalId(local),
                frame_number: 1,
                observed_at: at,
                embedding: EmbeddingVector::new(vec![1.0, 0.0]),
            })
            .unwrap();
    }

    #[test]
    fn scan_respects_timeout_boundary() {
        let resolver = resolver();
        let reaper = TimeoutReaper::new(resolver.clone());
        let t0 = Utc::now();
        observe(&resolver, 1, t0);

        assert!(reaper.scan(t0 + chrono::Duration::seconds(60)).is_empty());
        assert_eq!(
            reaper.scan(t0 + chrono::Duration::milliseconds(60_001)),
            vec![GlobalId(1)]
        );
        assert!(reaper.scan(t0 + chrono::Duration::seconds(600)).is_empty());
        assert_eq!(
            resolver.identity(GlobalId(1)).unwrap().status,
            IdentityStatus::Exited
        );
    }

    #[test]
    fn scan_ignores_future_last_seen() {
        let resolver = resolver();
        let reaper = TimeoutReaper::new(resolver.clone());
        let t0 = Utc::now();
        observe(&resolver, 1, t0 + chrono::Duration::seconds(30));
        assert!(reaper.scan(t0).is_empty());
    }

    #[test]
    fn scan_skips_when_resolver_busy() {
        let resolver = resolver();
        let reaper = TimeoutReaper::new(resolver.clone());
        let t0 = Utc::now();
        observe(&resolver, 1, t0);

        let later = t0 + chrono::Duration::seconds(120);
        let busy = resolver.with_state(|_| reaper.scan(later));
        assert!(busy.is_empty());
        assert!(resolver.identity(GlobalId(1)).unwrap().is_active());

        assert_eq!(reaper.scan(later), vec![GlobalId(1)]);
    }

    #[test]
    fn observed_clock_follows_replayed_timestamps() {
        let resolver = IdentityResolver::new(
            ReidConfig::default()
                .with_embedding_dim(2)
                .with_inactivity_timeout(Duration::from_secs(60))
                .with_reaper_clock(ReaperClock::Observed),
        )
        .unwrap();
        let reaper = TimeoutReaper::new(resolver.clone());
        assert!(reaper.tick().is_empty());

        // A recording from long ago: the wall clock would exit it at once.
        let recorded = Utc::now() - chrono::Duration::days(30);
        observe(&resolver, 1, recorded);
        assert!(reaper.tick().is_empty());
        assert!(resolver.identity(GlobalId(1)).unwrap().is_active());

        resolver
            .resolve(Observation {
                camera_id: CameraId::from("cam2"),
                local_id: LocalId(1),
                frame_number: 2,
                observed_at: recorded + chrono::Duration::seconds(90),
                embedding: EmbeddingVector::new(vec![0.0, 1.0]),
            })
            .unwrap();
        assert_eq!(
            resolver.latest_observed_at(),
            Some(recorded + chrono::Duration::seconds(90))
        );
        assert_eq!(reaper.tick(), vec![GlobalId(1)]);
        assert!(resolver.identity(GlobalId(2)).unwrap().is_active());
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_shutdown() {
        let reaper = TimeoutReaper::new(resolver());
        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(reaper.run(rx));

        tokio::time::sleep(Duration::from_secs(12)).await;
        tx.send(true).unwrap();
        handle.await.unwrap();
    }
}
