//! # pulse-live
//!
//! The live event and notification pipeline.
//!
//! - [`EventWindow`]: bounded newest-first buffer of raw events fed by the
//!   push channel.
//! - [`NotificationRegistry`]: a viewer's notifications, refreshed only by
//!   full loads, with the mark-read / mark-all-read / dismiss lifecycle.
//! - [`LiveSession`]: wires both to the push channel, runs periodic resyncs,
//!   and releases its subscriptions on shutdown.
//! - [`AlertRuleService`] and [`AuditTrail`]: viewer-scoped rule CRUD and
//!   the audit log.
//!
//! ## Example
//!
//! ```rust,ignore
//! use pulse_live::{Backend, LiveSession, SessionConfig};
//!
//! let session = LiveSession::new(backend, SessionConfig::from_env())
//!     .start(Some(identity))
//!     .await?;
//! session.mark_all_read().await?;
//! println!("{} unread", session.unread_count());
//! session.shutdown().await;
//! ```

pub mod alerts;
pub mod audit;
pub mod channel;
pub mod config;
pub mod lifecycle;
pub mod registry;
pub mod retry;
pub mod session;
pub mod views;
pub mod window;

pub use alerts::{AlertRuleService, Audited};
pub use audit::{distinct_actions, AuditQuery, AuditTrail};
pub use channel::Backend;
pub use config::SessionConfig;
pub use lifecycle::MutationOutcome;
pub use registry::{LoadOutcome, NotificationRegistry, RegistrySnapshot};
pub use retry::RetryPolicy;
pub use session::{LiveSession, LoadTrigger, SessionEvent, SessionHandle};
pub use views::DashboardView;
pub use window::EventWindow;
