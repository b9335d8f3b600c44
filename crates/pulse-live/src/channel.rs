//! Collaborators a live session talks to, and push-channel helpers.

use std::sync::Arc;

use tracing::{debug, warn};

use pulse_core::{
    AlertRuleRepository, AuditRepository, Event, EventRepository, InsertEnvelope,
    NotificationRepository, RealtimeChannel, Result, RoleDirectory, Subscription, Table,
};

/// Bundle of storage, identity, and realtime collaborators.
#[derive(Clone)]
pub struct Backend {
    pub notifications: Arc<dyn NotificationRepository>,
    pub events: Arc<dyn EventRepository>,
    pub alerts: Arc<dyn AlertRuleRepository>,
    pub audit: Arc<dyn AuditRepository>,
    pub roles: Arc<dyn RoleDirectory>,
    pub realtime: Arc<dyn RealtimeChannel>,
}

impl Backend {
    /// Build from one store that implements every storage interface.
    pub fn from_store<S>(store: Arc<S>, realtime: Arc<dyn RealtimeChannel>) -> Self
    where
        S: NotificationRepository
            + EventRepository
            + AlertRuleRepository
            + AuditRepository
            + RoleDirectory
            + 'static,
    {
        Self {
            notifications: store.clone(),
            events: store.clone(),
            alerts: store.clone(),
            audit: store.clone(),
            roles: store,
            realtime,
        }
    }
}

/// Open a subscription, logging the outcome.
pub async fn open_subscription(
    realtime: &dyn RealtimeChannel,
    table: Table,
) -> Result<Subscription> {
    match realtime.subscribe(table).await {
        Ok(sub) => {
            debug!(
                subsystem = "live",
                component = "channel",
                op = "subscribe",
                table = %table,
                subscription_id = sub.id(),
                "Subscribed"
            );
            Ok(sub)
        }
        Err(e) => {
            warn!(
                subsystem = "live",
                component = "channel",
                op = "subscribe",
                table = %table,
                error = %e,
                "Subscribe failed"
            );
            Err(e)
        }
    }
}

/// Decode a pushed analytics row. Undecodable rows are logged and skipped.
pub fn decode_event(envelope: &InsertEnvelope) -> Option<Event> {
    match envelope.decode::<Event>() {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(
                subsystem = "live",
                component = "channel",
                table = %envelope.table,
                envelope_id = %envelope.envelope_id,
                error = %e,
                "Skipping undecodable event row"
            );
            None
        }
    }
}
