//! Centralized default constants for the pulse telemetry surface.
//!
//! **This module is the single source of truth** for shared default values.
//! Crates reference these constants instead of defining their own magic
//! numbers. Environment overrides are applied by the configuration types
//! that consume them (`SessionConfig::from_env` in pulse-live, the server
//! bootstrap in pulse-api).

// =============================================================================
// EVENT WINDOW
// =============================================================================

/// Maximum number of raw events held by the live event window.
pub const WINDOW_CAPACITY: usize = 20;

/// Number of buckets in the event activity histogram.
pub const HISTOGRAM_WIDTH: usize = 20;

// =============================================================================
// NOTIFICATION REGISTRY
// =============================================================================

/// Page size of the full notification view.
pub const PAGE_SIZE_FULL: usize = 50;

/// Page size of the compact notification view (dashboard panel).
pub const PAGE_SIZE_COMPACT: usize = 5;

/// Interval between periodic full resynchronizations, in seconds.
pub const RESYNC_INTERVAL_SECS: u64 = 30;

/// Maximum attempts for a single registry load before giving up until the
/// next trigger.
pub const LOAD_MAX_ATTEMPTS: u32 = 3;

/// Initial backoff between load attempts, in milliseconds.
pub const LOAD_BACKOFF_MS: u64 = 250;

/// Upper bound on the backoff between load attempts, in milliseconds.
pub const LOAD_BACKOFF_MAX_MS: u64 = 5_000;

/// A server-held session untouched for this long is stopped, in seconds.
pub const SESSION_IDLE_SECS: u64 = 300;

/// How often idle sessions are looked for, in seconds.
pub const SESSION_SWEEP_INTERVAL_SECS: u64 = 60;

/// How often pool metrics are logged, in seconds.
pub const POOL_METRICS_INTERVAL_SECS: u64 = 60;

// =============================================================================
// CHANGE FEED
// =============================================================================

/// Broadcast buffer capacity of the change feed.
///
/// Recommended: 256 for production, 32 for tests.
pub const CHANGE_FEED_CAPACITY: usize = 256;

/// PostgreSQL NOTIFY channel carrying insert envelopes.
pub const NOTIFY_CHANNEL: &str = "pulse_inserts";

// =============================================================================
// ALERT RULES
// =============================================================================

/// Maximum length of an alert rule name, in characters.
pub const ALERT_NAME_MAX_LEN: usize = 120;

// =============================================================================
// AUDIT
// =============================================================================

/// Default number of audit records returned by the audit trail.
pub const AUDIT_PAGE_LIMIT: i64 = 200;

// =============================================================================
// SERVER
// =============================================================================

/// Default HTTP server port.
pub const SERVER_PORT: u16 = 3000;

/// SSE keep-alive interval, in seconds.
pub const SSE_KEEPALIVE_SECS: u64 = 15;

/// Default rate limit: max requests per period.
pub const RATE_LIMIT_REQUESTS: u64 = 100;

/// Default rate limit: period in seconds.
pub const RATE_LIMIT_PERIOD_SECS: u64 = 60;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_compact_view_fits_in_full_view() {
        assert!(PAGE_SIZE_COMPACT <= PAGE_SIZE_FULL);
    }

    #[test]
    fn test_histogram_matches_window() {
        assert_eq!(HISTOGRAM_WIDTH, WINDOW_CAPACITY);
    }

    #[test]
    fn test_sweep_runs_within_idle_timeout() {
        assert!(SESSION_SWEEP_INTERVAL_SECS <= SESSION_IDLE_SECS);
    }

    #[test]
    fn test_backoff_bounds() {
        assert!(LOAD_BACKOFF_MS <= LOAD_BACKOFF_MAX_MS);
        assert!(LOAD_MAX_ATTEMPTS >= 1);
    }
}
