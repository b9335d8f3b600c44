//! Session configuration.

use std::time::Duration;

use pulse_core::defaults;

use crate::retry::RetryPolicy;

/// Shortest accepted resync interval.
pub const MIN_RESYNC_INTERVAL: Duration = Duration::from_secs(1);

/// Tuning for a live session.
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Capacity of the event window.
    pub window_capacity: usize,
    /// Page size of the full notification view; also the load limit.
    pub page_size: usize,
    /// Page size of the compact notification view.
    pub compact_page_size: usize,
    /// Interval between periodic full resyncs.
    pub resync_interval: Duration,
    /// Retry policy for loads triggered by pushes and the resync ticker.
    pub retry: RetryPolicy,
    /// How long an owner may leave the session untouched before stopping it.
    pub idle_timeout: Duration,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            window_capacity: defaults::WINDOW_CAPACITY,
            page_size: defaults::PAGE_SIZE_FULL,
            compact_page_size: defaults::PAGE_SIZE_COMPACT,
            resync_interval: Duration::from_secs(defaults::RESYNC_INTERVAL_SECS),
            retry: RetryPolicy::default(),
            idle_timeout: Duration::from_secs(defaults::SESSION_IDLE_SECS),
        }
    }
}

fn env_parse<T: std::str::FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

impl SessionConfig {
    /// Create config from environment variables (with defaults).
    ///
    /// | Variable | Default | Description |
    /// |----------|---------|-------------|
    /// | `PULSE_WINDOW_CAPACITY` | `20` | Events kept in the live window |
    /// | `PULSE_PAGE_SIZE` | `50` | Notifications per full view |
    /// | `PULSE_COMPACT_PAGE_SIZE` | `5` | Notifications per compact view |
    /// | `PULSE_RESYNC_INTERVAL_SECS` | `30` | Periodic resync interval |
    /// | `PULSE_LOAD_MAX_ATTEMPTS` | `3` | Attempts per load, first included |
    /// | `PULSE_LOAD_BACKOFF_MS` | `250` | Initial retry backoff |
    /// | `PULSE_SESSION_IDLE_SECS` | `300` | Idle time before a held session is stopped |
    ///
    /// Unparseable values fall back to the default.
    pub fn from_env() -> Self {
        let base = Self::default();
        let window_capacity = env_parse::<usize>("PULSE_WINDOW_CAPACITY")
            .unwrap_or(base.window_capacity)
            .max(1);
        let page_size = env_parse::<usize>("PULSE_PAGE_SIZE")
            .unwrap_or(base.page_size)
            .max(1);
        let compact_page_size = env_parse::<usize>("PULSE_COMPACT_PAGE_SIZE")
            .unwrap_or(base.compact_page_size)
            .clamp(1, page_size);
        let resync_interval = env_parse::<u64>("PULSE_RESYNC_INTERVAL_SECS")
            .map(|s| Duration::from_secs(s).max(MIN_RESYNC_INTERVAL))
            .unwrap_or(base.resync_interval);

        let mut retry = base.retry;
        if let Some(n) = env_parse::<u32>("PULSE_LOAD_MAX_ATTEMPTS") {
            retry.max_attempts = n.max(1);
        }
        if let Some(ms) = env_parse::<u64>("PULSE_LOAD_BACKOFF_MS") {
            retry.base_backoff = Duration::from_millis(ms);
        }

        let idle_timeout = env_parse::<u64>("PULSE_SESSION_IDLE_SECS")
            .map(Duration::from_secs)
            .unwrap_or(base.idle_timeout);

        Self {
            window_capacity,
            page_size,
            compact_page_size,
            resync_interval,
            retry,
            idle_timeout,
        }
    }

    pub fn with_window_capacity(mut self, capacity: usize) -> Self {
        self.window_capacity = capacity;
        self
    }

    pub fn with_page_size(mut self, size: usize) -> Self {
        self.page_size = size;
        self
    }

    /// Intervals below [`MIN_RESYNC_INTERVAL`] are raised to it.
    pub fn with_resync_interval(mut self, interval: Duration) -> Self {
        self.resync_interval = interval.max(MIN_RESYNC_INTERVAL);
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_idle_timeout(mut self, idle: Duration) -> Self {
        self.idle_timeout = idle;
        self
    }
}
