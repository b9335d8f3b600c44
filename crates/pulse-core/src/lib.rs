//! # pulse-core
//!
//! Core types, traits, and abstractions for the pulse live telemetry surface.
//!
//! This crate provides the data model (events, notifications, alert rules,
//! audit records), the error taxonomy, the interfaces to durable storage
//! and role lookup, and the broadcast change feed that backs the push
//! channel. Other pulse crates depend on it.

pub mod defaults;
pub mod error;
pub mod events;
pub mod logging;
pub mod models;
pub mod traits;

// Re-export commonly used types at crate root
pub use error::{Error, Result};
pub use events::{ChangeFeed, Delivery, InsertEnvelope, Subscription, SubscriptionId, Table};
pub use models::*;
pub use traits::*;
