//! Engine configuration.

use std::time::Duration;

use crate::error::ConfigError;
use crate::tracker::TrackerConfig;

/// What happens to an identity's index entry when its visit is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExitPolicy {
    /// Keep the entry, flagged inactive, so a returning visitor gets the same id.
    #[default]
    RetainInactive,
    /// Remove the entry; bounds index growth at the cost of re-entry accuracy.
    Evict,
}

/// What `reset_daily` does with visits still open at reset time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ResetPolicy {
    /// Open visits stay open; only the counting window restarts.
    #[default]
    CarryOver,
    /// Close every open visit at reset time and mark its identity exited.
    ForceClose,
}

/// Time source the reaper measures inactivity against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReaperClock {
    /// Current wall-clock time; for live feeds.
    #[default]
    Wall,
    /// Newest capture timestamp resolved so far; for recorded media whose
    /// timestamps lie in the past.
    Observed,
}

/// Backoff schedule for persistence writes.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Retries after the initial attempt.
    pub max_retries: u32,
    /// Base delay, doubled on each retry.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
        }
    }
}

impl RetryConfig {
    /// Delay before retry number `attempt` (1-based).
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Configuration of the identity resolution engine.
#[derive(Debug, Clone)]
pub struct ReidConfig {
    /// Minimum cosine similarity for a re-identification match (inclusive)
    pub match_threshold: f32,
    /// Embedding vector dimensionality
    pub embedding_dim: usize,
    /// Weight kept by the stored vector when folding in a new observation
    pub ema_momentum: f32,
    /// Candidates fetched per index query
    pub search_top_k: usize,
    /// Maximum number of index entries
    pub index_capacity: usize,
    /// Index query attempts before falling back to degraded mode
    pub index_retry_attempts: u32,
    /// Inactivity window after which a visit is closed
    pub inactivity_timeout: Duration,
    /// Reaper tick interval
    pub reap_interval: Duration,
    pub reaper_clock: ReaperClock,
    pub exit_policy: ExitPolicy,
    pub reset_policy: ResetPolicy,
    pub persistence_retry: RetryConfig,
    pub tracker: TrackerConfig,
}

impl Default for ReidConfig {
    fn default() -> Self {
        Self {
            match_threshold: 0.7,
            embedding_dim: 256,
            ema_momentum: 0.9,
            search_top_k: 5,
            index_capacity: 10_000,
            index_retry_attempts: 2,
            inactivity_timeout: Duration::from_secs(60),
            reap_interval: Duration::from_secs(5),
            reaper_clock: ReaperClock::Wall,
            exit_policy: ExitPolicy::RetainInactive,
            reset_policy: ResetPolicy::CarryOver,
            persistence_retry: RetryConfig::default(),
            tracker: TrackerConfig::default(),
        }
    }
}

impl ReidConfig {
    /// Create config from `REID_*` environment variables, falling back to defaults.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        let tracker = TrackerConfig {
            min_iou: env_parse("REID_TRACK_MIN_IOU").unwrap_or(defaults.tracker.min_iou),
            max_misses: env_parse("REID_TRACK_MAX_MISSES").unwrap_or(defaults.tracker.max_misses),
            min_confidence: env_parse("REID_TRACK_MIN_CONFIDENCE")
                .unwrap_or(defaults.tracker.min_confidence),
            strategy: defaults.tracker.strategy,
        };

        Self {
            match_threshold: env_parse("REID_MATCH_THRESHOLD").unwrap_or(defaults.match_threshold),
            embedding_dim: env_parse("REID_EMBEDDING_DIM").unwrap_or(defaults.embedding_dim),
            ema_momentum: env_parse("REID_EMA_MOMENTUM").unwrap_or(defaults.ema_momentum),
            search_top_k: env_parse("REID_SEARCH_TOP_K").unwrap_or(defaults.search_top_k),
            index_capacity: env_parse("REID_INDEX_CAPACITY").unwrap_or(defaults.index_capacity),
            index_retry_attempts: env_parse("REID_INDEX_RETRY_ATTEMPTS")
                .unwrap_or(defaults.index_retry_attempts),
            inactivity_timeout: env_parse("REID_INACTIVITY_TIMEOUT_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.inactivity_timeout),
            reap_interval: env_parse("REID_REAP_INTERVAL_SECS")
                .map(Duration::from_secs)
                .unwrap_or(defaults.reap_interval),
            reaper_clock: match std::env::var("REID_REAPER_CLOCK").as_deref() {
                Ok("observed") => ReaperClock::Observed,
                _ => defaults.reaper_clock,
            },
            exit_policy: match std::env::var("REID_EXIT_POLICY").as_deref() {
                Ok("evict") => ExitPolicy::Evict,
                _ => defaults.exit_policy,
            },
            reset_policy: match std::env::var("REID_RESET_POLICY").as_deref() {
                Ok("force_close") => ResetPolicy::ForceClose,
                _ => defaults.reset_policy,
            },
            persistence_retry: RetryConfig {
                max_retries: env_parse("REID_PERSIST_MAX_RETRIES")
                    .unwrap_or(defaults.persistence_retry.max_retries),
                ..defaults.persistence_retry
            },
            tracker,
        }
    }

    pub fn with_match_threshold(mut self, threshold: f32) -> Self {
        self.match_threshold = threshold;
        self
    }

    pub fn with_embedding_dim(mut self, dim: usize) -> Self {
        self.embedding_dim = dim;
        self
    }

    pub fn with_inactivity_timeout(mut self, timeout: Duration) -> Self {
        self.inactivity_timeout = timeout;
        self
    }

    pub fn with_reap_interval(mut self, interval: Duration) -> Self {
        self.reap_interval = interval;
        self
    }

    pub fn with_reaper_clock(mut self, clock: ReaperClock) -> Self {
        self.reaper_clock = clock;
        self
    }

    pub fn with_exit_policy(mut self, policy: ExitPolicy) -> Self {
        self.exit_policy = policy;
        self
    }

    pub fn with_reset_policy(mut self, policy: ResetPolicy) -> Self {
        self.reset_policy = policy;
        self
    }

    pub fn with_index_capacity(mut self, capacity: usize) -> Self {
        self.index_capacity = capacity;
        self
    }

    pub fn with_tracker(mut self, tracker: TrackerConfig) -> Self {
        self.tracker = tracker;
        self
    }

    pub fn with_persistence_retry(mut self, retry: RetryConfig) -> Self {
        self.persistence_retry = retry;
        self
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(-1.0..=1.0).contains(&self.match_threshold) {
            return Err(ConfigError::new(
                "match_threshold",
                format!("{} is outside [-1, 1]", self.match_threshold),
            ));
        }
        if self.embedding_dim == 0 {
            return Err(ConfigError::new("embedding_dim", "must be positive"));
        }
        if !(0.0..=1.0).contains(&self.ema_momentum) {
            return Err(ConfigError::new("ema_momentum", "must be within [0, 1]"));
        }
        if self.search_top_k == 0 {
            return Err(ConfigError::new("search_top_k", "must be positive"));
        }
        if self.index_capacity == 0 {
            return Err(ConfigError::new("index_capacity", "must be positive"));
        }
        if self.index_retry_attempts == 0 {
            return Err(ConfigError::new("index_retry_attempts", "must be positive"));
        }
        if self.inactivity_timeout.is_zero() {
            return Err(ConfigError::new("inactivity_timeout", "must be positive"));
        }
        if self.reap_interval.is_zero() {
            return Err(ConfigError::new("reap_interval", "must be positive"));
        }
        if !(0.0..1.0).contains(&self.tracker.min_iou) {
            return Err(ConfigError::new("tracker.min_iou", "must be within [0, 1)"));
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|s| s.parse().ok())
}
