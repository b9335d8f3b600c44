//! Bridge from PostgreSQL `LISTEN/NOTIFY` into the [`ChangeFeed`].
//!
//! The `AFTER INSERT` triggers installed by the migrations publish
//! `{"table": ..., "row": ...}` on the `pulse_inserts` channel. The listener
//! decodes each payload into an [`InsertEnvelope`] and republishes it.
//! Payloads that fail to decode are logged and skipped; they never stop the
//! loop.
//!
//! Rows too large for a notification arrive as `{"id": ...}` with
//! `"truncated": true`. Analytics events are then read back by id before
//! they are published, since the window needs the whole row.

use std::sync::Arc;

use serde::Deserialize;
use serde_json::Value as JsonValue;
use sqlx::postgres::PgListener;
use sqlx::{Pool, Postgres};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use pulse_core::defaults::NOTIFY_CHANNEL;
use pulse_core::{ChangeFeed, Error, EventRepository, InsertEnvelope, Result, Table};

use crate::events::PgEventRepository;

#[derive(Debug, Deserialize)]
struct NotifyPayload {
    table: String,
    #[serde(default)]
    row: JsonValue,
    #[serde(default)]
    truncated: bool,
}

/// One decoded trigger notification.
#[derive(Debug)]
pub struct Notice {
    pub envelope: InsertEnvelope,
    /// The trigger replaced the row with its id.
    pub truncated: bool,
}

/// Decode one notification payload.
pub fn decode_payload(payload: &str) -> Result<Notice> {
    let raw: NotifyPayload = serde_json::from_str(payload)?;
    let table = Table::parse(&raw.table)
        .ok_or_else(|| Error::Serialization(format!("unknown table: {}", raw.table)))?;
    Ok(Notice {
        envelope: InsertEnvelope::new(table, raw.row),
        truncated: raw.truncated,
    })
}

/// Handle to a running listener.
pub struct ListenerHandle {
    shutdown_tx: mpsc::Sender<()>,
    task: JoinHandle<()>,
}

impl ListenerHandle {
    /// Stop listening and wait for the loop to exit.
    pub async fn shutdown(self) -> Result<()> {
        self.shutdown_tx
            .send(())
            .await
            .map_err(|_| Error::Internal("Failed to send listener shutdown signal".into()))?;
        self.task
            .await
            .map_err(|e| Error::Internal(format!("listener task failed: {}", e)))
    }
}

/// Republishes trigger notifications onto a change feed.
pub struct PgChangeListener {
    pool: Pool<Postgres>,
    feed: Arc<ChangeFeed>,
    events: Arc<dyn EventRepository>,
    channel: String,
}

impl PgChangeListener {
    pub fn new(pool: Pool<Postgres>, feed: Arc<ChangeFeed>) -> Self {
        Self {
            events: Arc::new(PgEventRepository::new(pool.clone())),
            pool,
            feed,
            channel: NOTIFY_CHANNEL.to_string(),
        }
    }

    /// Listen on a different notification channel.
    pub fn with_channel(mut self, channel: impl Into<String>) -> Self {
        self.channel = channel.into();
        self
    }

    /// Connect, `LISTEN`, and spawn the forwarding loop.
    ///
    /// Connection errors at startup are returned; later ones are logged and
    /// the listener reconnects on its own.
    pub async fn start(self) -> Result<ListenerHandle> {
        let mut listener = PgListener::connect_with(&self.pool)
            .await
            .map_err(|e| Error::Connectivity(format!("listener connect failed: {}", e)))?;
        listener
            .listen(&self.channel)
            .await
            .map_err(|e| Error::Connectivity(format!("LISTEN {} failed: {}", self.channel, e)))?;

        info!(
            subsystem = "db",
            component = "listener",
            op = "start",
            channel = %self.channel,
            "Change listener started"
        );

        let (shutdown_tx, mut shutdown_rx) = mpsc::channel(1);
        let feed = self.feed;
        let events = self.events;
        let task = tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown_rx.recv() => {
                        info!(subsystem = "db", component = "listener", "Change listener stopping");
                        break;
                    }
                    next = listener.try_recv() => match next {
                        Ok(Some(notification)) => {
                            forward(&feed, events.as_ref(), notification.payload()).await
                        }
                        Ok(None) => {
                            // Connection dropped; the next try_recv reconnects.
                            // Inserts committed in between are lost to the push
                            // path and picked up by periodic resync.
                            warn!(
                                subsystem = "db",
                                component = "listener",
                                "Listener connection lost, reconnecting"
                            );
                        }
                        Err(e) => {
                            warn!(
                                subsystem = "db",
                                component = "listener",
                                error = %e,
                                "Listener receive failed"
                            );
                            tokio::time::sleep(std::time::Duration::from_secs(1)).await;
                        }
                    }
                }
            }
        });

        Ok(ListenerHandle { shutdown_tx, task })
    }
}

async fn forward(feed: &ChangeFeed, events: &dyn EventRepository, payload: &str) {
    let notice = match decode_payload(payload) {
        Ok(notice) => notice,
        Err(e) => {
            warn!(
                subsystem = "db",
                component = "listener",
                error = %e,
                payload_len = payload.len(),
                "Skipping undecodable notification"
            );
            return;
        }
    };

    let mut envelope = notice.envelope;
    if notice.truncated && envelope.table == Table::AnalyticsEvents {
        match complete_event_row(events, &envelope).await {
            Ok(row) => envelope.row = row,
            Err(e) => {
                warn!(
                    subsystem = "db",
                    component = "listener",
                    envelope_id = %envelope.envelope_id,
                    error = %e,
                    "Dropping truncated event, row fetch failed"
                );
                return;
            }
        }
    }

    let table = envelope.table;
    let receivers = feed.publish(envelope);
    debug!(
        subsystem = "db",
        component = "listener",
        table = %table,
        truncated = notice.truncated,
        receivers,
        "Insert forwarded"
    );
}

/// Full row of a truncated analytics event notice.
async fn complete_event_row(
    events: &dyn EventRepository,
    envelope: &InsertEnvelope,
) -> Result<JsonValue> {
    let id = envelope
        .row
        .get("id")
        .and_then(|v| v.as_str())
        .and_then(|s| uuid::Uuid::parse_str(s).ok())
        .ok_or_else(|| Error::Serialization("truncated notice without id".into()))?;
    let event = events
        .fetch_by_id(id)
        .await?
        .ok_or_else(|| Error::not_found("analytics event", id))?;
    Ok(serde_json::to_value(&event)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryStore;
    use pulse_core::{Delivery, Event, NewEvent};
    use serde_json::json;
    use uuid::Uuid;

    #[test]
    fn test_decode_payload() {
        let notice = decode_payload(
            r#"{"table":"analytics_events","row":{"id":"0192a000-0000-7000-8000-000000000001","kind":"click"}}"#,
        )
        .unwrap();
        assert_eq!(notice.envelope.table, Table::AnalyticsEvents);
        assert_eq!(notice.envelope.row["kind"], "click");
        assert!(!notice.truncated);
    }

    #[test]
    fn test_decode_payload_truncated_flag() {
        let notice = decode_payload(
            r#"{"table":"analytics_events","row":{"id":"0192a000-0000-7000-8000-000000000001"},"truncated":true}"#,
        )
        .unwrap();
        assert!(notice.truncated);
    }

    #[test]
    fn test_decode_payload_unknown_table() {
        let err = decode_payload(r#"{"table":"users","row":{}}"#).unwrap_err();
        assert!(matches!(err, Error::Serialization(_)));
    }

    #[test]
    fn test_decode_payload_garbage() {
        assert!(decode_payload("not json").is_err());
    }

    #[tokio::test]
    async fn test_forward_publishes_and_skips_bad_payloads() {
        let feed = ChangeFeed::new(8);
        let store = MemoryStore::new(Arc::new(ChangeFeed::new(8)));
        let mut sub = feed.open(Table::Notifications);

        forward(&feed, &store, "{broken").await;
        forward(&feed, &store, r#"{"table":"notifications","row":{"id":"x"}}"#).await;

        match sub.recv().await {
            Some(Delivery::Insert(env)) => assert_eq!(env.row["id"], "x"),
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_completes_truncated_event_from_storage() {
        let feed = ChangeFeed::new(8);
        let store = MemoryStore::new(Arc::new(ChangeFeed::new(8)));
        let big = "x".repeat(10_000);
        let stored = EventRepository::insert(
            &store,
            NewEvent {
                kind: "page_view".to_string(),
                page_path: None,
                session_id: None,
                context: Some(json!({"blob": big})),
            },
        )
        .await
        .unwrap();
        let mut sub = feed.open(Table::AnalyticsEvents);

        let payload = json!({
            "table": "analytics_events",
            "row": {"id": stored.id},
            "truncated": true,
        })
        .to_string();
        forward(&feed, &store, &payload).await;

        match sub.recv().await {
            Some(Delivery::Insert(env)) => {
                let event: Event = env.decode().unwrap();
                assert_eq!(event.id, stored.id);
                assert_eq!(event.context["blob"].as_str().unwrap().len(), 10_000);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_forward_drops_truncated_event_missing_from_storage() {
        let feed = ChangeFeed::new(8);
        let store = MemoryStore::new(Arc::new(ChangeFeed::new(8)));
        let mut sub = feed.open(Table::AnalyticsEvents);

        let payload = json!({
            "table": "analytics_events",
            "row": {"id": Uuid::now_v7()},
            "truncated": true,
        })
        .to_string();
        forward(&feed, &store, &payload).await;

        assert!(sub.try_recv().is_none());
    }
}
