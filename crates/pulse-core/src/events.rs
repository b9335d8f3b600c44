//! Insert envelopes and the change feed behind the push channel.
//!
//! Storage backends publish one [`InsertEnvelope`] per accepted insert
//! (PostgreSQL through `LISTEN/NOTIFY`, the in-memory backend directly).
//! Consumers open a [`Subscription`] per table. The feed is a plain
//! broadcast channel: no ordering across publishers, no replay, and a
//! consumer that falls behind loses envelopes and is told so through
//! [`Delivery::Lagged`].
//!
//! Every subscription is tracked until it is released, either explicitly
//! with [`Subscription::unsubscribe`] or by dropping it. A subscription that
//! is never released keeps its broadcast slot open, which is what
//! [`ChangeFeed::open_subscriptions`] makes visible.

use std::collections::HashMap;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::error::Result;
use crate::traits::RealtimeChannel;

// ============================================================================
// Envelope
// ============================================================================

/// Durable table an insert envelope refers to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Table {
    AnalyticsEvents,
    Notifications,
    AlertRules,
    AuditLogs,
}

impl Table {
    pub fn as_str(&self) -> &'static str {
        match self {
            Table::AnalyticsEvents => "analytics_events",
            Table::Notifications => "notifications",
            Table::AlertRules => "alert_rules",
            Table::AuditLogs => "audit_logs",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "analytics_events" => Some(Table::AnalyticsEvents),
            "notifications" => Some(Table::Notifications),
            "alert_rules" => Some(Table::AlertRules),
            "audit_logs" => Some(Table::AuditLogs),
            _ => None,
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One "record inserted" notification.
///
/// The row is kept as opaque JSON. Consumers that need a typed record call
/// [`InsertEnvelope::decode`]; consumers that only need to know *that*
/// something changed never look at it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsertEnvelope {
    /// Unique envelope identifier (UUIDv7 for temporal ordering).
    pub envelope_id: Uuid,
    pub table: Table,
    /// When the backend accepted the insert.
    pub committed_at: DateTime<Utc>,
    pub row: JsonValue,
}

impl InsertEnvelope {
    pub fn new(table: Table, row: JsonValue) -> Self {
        Self {
            envelope_id: Uuid::now_v7(),
            table,
            committed_at: Utc::now(),
            row,
        }
    }

    /// Decode the inserted row into a typed record.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<T> {
        Ok(serde_json::from_value(self.row.clone())?)
    }

    /// Owner carried by the row, if it has a parseable `owner_id`.
    pub fn owner_id(&self) -> Option<Uuid> {
        self.row
            .get("owner_id")
            .and_then(|v| v.as_str())
            .and_then(|s| Uuid::parse_str(s).ok())
    }

    /// SSE event name, e.g. `"notifications.insert"`.
    pub fn event_name(&self) -> String {
        format!("{}.insert", self.table)
    }
}

/// What a subscription yields.
#[derive(Debug, Clone)]
pub enum Delivery {
    /// A row was inserted into the subscribed table.
    Insert(InsertEnvelope),
    /// The receiver fell behind and this many envelopes (across all tables)
    /// were dropped.
    Lagged(u64),
}

// ============================================================================
// Change Feed
// ============================================================================

/// Identifier of a live subscription on a [`ChangeFeed`].
pub type SubscriptionId = u64;

type OpenSet = Arc<Mutex<HashMap<SubscriptionId, Table>>>;

/// Broadcast-based change feed distributing insert envelopes to subscribers.
///
/// Uses `tokio::sync::broadcast` with a configurable buffer size. Slow
/// receivers that fall behind receive a `Lagged` delivery and miss
/// envelopes; the push channel is best-effort.
pub struct ChangeFeed {
    tx: broadcast::Sender<InsertEnvelope>,
    open: OpenSet,
    next_id: AtomicU64,
}

impl ChangeFeed {
    /// Create a new change feed with the given buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            tx,
            open: Arc::new(Mutex::new(HashMap::new())),
            next_id: AtomicU64::new(1),
        }
    }

    /// Publish an envelope to all subscribers.
    ///
    /// Returns the number of receivers it was handed to. With no receivers
    /// the envelope is silently dropped.
    pub fn publish(&self, envelope: InsertEnvelope) -> usize {
        tracing::trace!(
            subsystem = "feed",
            table = %envelope.table,
            envelope_id = %envelope.envelope_id,
            receivers = self.tx.receiver_count(),
            "ChangeFeed publish"
        );
        self.tx.send(envelope).unwrap_or(0)
    }

    /// Wrap a row in an envelope and publish it.
    pub fn publish_row(&self, table: Table, row: JsonValue) -> usize {
        self.publish(InsertEnvelope::new(table, row))
    }

    /// Open a tracked subscription for one table.
    pub fn open(&self, table: Table) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let rx = self.tx.subscribe();
        self.lock_open().insert(id, table);
        tracing::debug!(
            subsystem = "feed",
            op = "subscribe",
            subscription_id = id,
            table = %table,
            "Subscription opened"
        );
        Subscription {
            id,
            table,
            rx: Some(rx),
            open: self.open.clone(),
        }
    }

    /// Raw receiver over every table (SSE fan-out). Not tracked.
    pub fn tap(&self) -> broadcast::Receiver<InsertEnvelope> {
        self.tx.subscribe()
    }

    /// Number of unreleased subscriptions for a table.
    pub fn open_subscriptions(&self, table: Table) -> usize {
        self.lock_open().values().filter(|t| **t == table).count()
    }

    /// Number of unreleased subscriptions across all tables.
    pub fn total_open(&self) -> usize {
        self.lock_open().len()
    }

    /// Returns the number of active broadcast receivers (tracked and taps).
    pub fn receiver_count(&self) -> usize {
        self.tx.receiver_count()
    }

    fn lock_open(&self) -> std::sync::MutexGuard<'_, HashMap<SubscriptionId, Table>> {
        self.open.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl Default for ChangeFeed {
    fn default() -> Self {
        Self::new(crate::defaults::CHANGE_FEED_CAPACITY)
    }
}

#[async_trait]
impl RealtimeChannel for ChangeFeed {
    async fn subscribe(&self, table: Table) -> Result<Subscription> {
        Ok(self.open(table))
    }
}

// ============================================================================
// Subscription
// ============================================================================

/// A table-filtered subscription handle.
///
/// Independent of every other subscription to the same table. Releasing is
/// idempotent and also happens on drop.
pub struct Subscription {
    id: SubscriptionId,
    table: Table,
    rx: Option<broadcast::Receiver<InsertEnvelope>>,
    open: OpenSet,
}

impl Subscription {
    pub fn id(&self) -> SubscriptionId {
        self.id
    }

    pub fn table(&self) -> Table {
        self.table
    }

    /// Whether the subscription has not been released yet.
    pub fn is_active(&self) -> bool {
        self.rx.is_some()
    }

    /// Wait for the next delivery for this table.
    ///
    /// Returns `None` once the subscription is released or the feed is gone.
    pub async fn recv(&mut self) -> Option<Delivery> {
        let table = self.table;
        let rx = self.rx.as_mut()?;
        loop {
            match rx.recv().await {
                Ok(envelope) if envelope.table == table => {
                    return Some(Delivery::Insert(envelope));
                }
                Ok(_) => continue,
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    return Some(Delivery::Lagged(n));
                }
                Err(broadcast::error::RecvError::Closed) => return None,
            }
        }
    }

    /// Next delivery if one is already queued, without waiting.
    pub fn try_recv(&mut self) -> Option<Delivery> {
        let table = self.table;
        let rx = self.rx.as_mut()?;
        loop {
            match rx.try_recv() {
                Ok(envelope) if envelope.table == table => {
                    return Some(Delivery::Insert(envelope));
                }
                Ok(_) => continue,
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    return Some(Delivery::Lagged(n));
                }
                Err(_) => return None,
            }
        }
    }

    /// Release the subscription. Returns `true` only for the call that
    /// actually released it.
    pub fn unsubscribe(&mut self) -> bool {
        if self.rx.take().is_none() {
            return false;
        }
        self.open
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .remove(&self.id);
        tracing::debug!(
            subsystem = "feed",
            op = "unsubscribe",
            subscription_id = self.id,
            table = %self.table,
            "Subscription released"
        );
        true
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.id)
            .field("table", &self.table)
            .field("active", &self.is_active())
            .finish()
    }
}

// ============================================================================
// Tests
// ============================================================================
