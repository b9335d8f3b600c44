//! Core traits for the collaborators the live pipeline depends on.
//!
//! Durable storage, the realtime channel, and role lookup are external to
//! the pipeline. These traits define the interfaces concrete backends must
//! satisfy (PostgreSQL and in-memory in pulse-db), enabling pluggable
//! backends and testability.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::events::{Subscription, Table};
use crate::models::*;

// =============================================================================
// NOTIFICATION REPOSITORY
// =============================================================================

/// Durable store of notification records.
#[async_trait]
pub trait NotificationRepository: Send + Sync {
    /// Fetch active (non-dismissed) notifications in the scope, newest first.
    async fn fetch_active(&self, scope: ViewerScope, limit: i64) -> Result<Vec<Notification>>;

    /// Apply a lifecycle transition.
    ///
    /// Fails with `NotFound` if `id` does not exist within `scope`.
    /// Re-applying a transition that already holds is a successful no-op.
    async fn update(&self, scope: ViewerScope, id: Uuid, update: NotificationUpdate)
        -> Result<()>;

    /// Mark every unread active notification in the scope as read.
    /// Returns the number of records changed.
    async fn mark_all_read(&self, scope: ViewerScope) -> Result<u64>;

    /// Insert a notification (producer side).
    async fn insert(&self, req: NewNotification) -> Result<Notification>;
}

// =============================================================================
// EVENT REPOSITORY
// =============================================================================

/// Durable store of raw analytics events.
#[async_trait]
pub trait EventRepository: Send + Sync {
    /// Fetch the most recent events, newest first.
    async fn fetch_recent(&self, limit: i64) -> Result<Vec<Event>>;

    /// Fetch one event by id.
    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Event>>;

    /// Record an event (producer side).
    async fn insert(&self, req: NewEvent) -> Result<Event>;
}

// =============================================================================
// ALERT RULE REPOSITORY
// =============================================================================

/// Durable store of alert rules, scoped to their owning viewer.
#[async_trait]
pub trait AlertRuleRepository: Send + Sync {
    /// List the scope's rules, newest first.
    async fn list(&self, scope: ViewerScope) -> Result<Vec<AlertRule>>;

    /// Fetch one rule. `None` if absent or outside the scope.
    async fn get(&self, scope: ViewerScope, id: Uuid) -> Result<Option<AlertRule>>;

    /// Persist an already validated rule.
    async fn create(&self, scope: ViewerScope, rule: ValidAlertRule) -> Result<AlertRule>;

    /// Update non-`None` fields. `NotFound` if absent or outside the scope.
    async fn update(
        &self,
        scope: ViewerScope,
        id: Uuid,
        req: UpdateAlertRuleRequest,
    ) -> Result<AlertRule>;

    /// Delete a rule. `NotFound` if absent or outside the scope.
    async fn delete(&self, scope: ViewerScope, id: Uuid) -> Result<()>;
}

// =============================================================================
// AUDIT REPOSITORY
// =============================================================================

/// Append-only audit log.
#[async_trait]
pub trait AuditRepository: Send + Sync {
    /// Append a record, returning its id.
    async fn append(&self, record: NewAuditRecord) -> Result<Uuid>;

    /// List the most recent records, newest first.
    async fn list(&self, limit: i64) -> Result<Vec<AuditRecord>>;
}

// =============================================================================
// IDENTITY / AUTHORIZATION
// =============================================================================

/// Role lookup for an authenticated viewer.
#[async_trait]
pub trait RoleDirectory: Send + Sync {
    async fn has_role(&self, identity: &Identity, role: Role) -> Result<bool>;
}

// =============================================================================
// REALTIME
// =============================================================================

/// Push channel delivering "record inserted" notifications per table.
#[async_trait]
pub trait RealtimeChannel: Send + Sync {
    /// Open an independent subscription to inserts on `table`.
    async fn subscribe(&self, table: Table) -> Result<Subscription>;
}
