//! HTTP handlers, one module per resource.

pub mod alerts;
pub mod audit;
pub mod events;
pub mod health;
pub mod notifications;
pub mod stream;
