//! Structured logging schema and field name constants for pulse.
//!
//! All crates use these names for structured `tracing` fields so that log
//! aggregation tools can query the same field across every subsystem.
//!
//! ## Log Level Contract
//!
//! | Level | Usage |
//! |-------|-------|
//! | ERROR | Degraded service, requires operator attention |
//! | WARN  | Recoverable issue, automatic fallback applied (stale snapshot kept) |
//! | INFO  | Lifecycle events (session start/stop, subscriptions), mutations |
//! | DEBUG | Resync decisions, discarded stale loads, config choices |
//! | TRACE | Per-delivery and per-event traffic |

// ─── Identity fields ───────────────────────────────────────────────────────

/// Subsystem originating the log event.
/// Values: "api", "db", "live", "feed"
pub const SUBSYSTEM: &str = "subsystem";

/// Component within a subsystem.
/// Examples: "registry", "window", "session", "listener", "pool"
pub const COMPONENT: &str = "component";

/// Logical operation name.
/// Examples: "load", "mark_read", "dismiss", "subscribe"
pub const OPERATION: &str = "op";

// ─── Entity fields ─────────────────────────────────────────────────────────

/// Viewer UUID the operation runs for.
pub const VIEWER_ID: &str = "viewer_id";

/// Notification UUID being operated on.
pub const NOTIFICATION_ID: &str = "notification_id";

/// Alert rule UUID being operated on.
pub const ALERT_ID: &str = "alert_id";

/// Table a change-feed envelope or subscription refers to.
pub const TABLE: &str = "table";

/// Subscription identifier on the change feed.
pub const SUBSCRIPTION_ID: &str = "subscription_id";

// ─── Measurement fields ────────────────────────────────────────────────────

/// Wall-clock duration in milliseconds.
pub const DURATION_MS: &str = "duration_ms";

/// Number of records returned by a fetch.
pub const RESULT_COUNT: &str = "result_count";

/// Retry attempt number (1-based).
pub const ATTEMPT: &str = "attempt";

/// Load ticket issued by the registry.
pub const TICKET: &str = "ticket";

/// Number of broadcast envelopes a lagging receiver missed.
pub const MISSED: &str = "missed";

// ─── Database fields ───────────────────────────────────────────────────────

/// Number of active connections in the pool.
pub const POOL_SIZE: &str = "pool_size";

/// Number of idle connections in the pool.
pub const POOL_IDLE: &str = "pool_idle";

// ─── Outcome fields ────────────────────────────────────────────────────────

/// Boolean success/failure indicator.
pub const SUCCESS: &str = "success";

/// Error message when an operation fails.
pub const ERROR_MSG: &str = "error";
