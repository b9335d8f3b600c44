//! Notification lifecycle operations.
//!
//! Each operation writes to durable storage first and then runs a full
//! [`NotificationRegistry::load`]. A failed write is returned as is and
//! leaves the registry untouched. A failed follow-up load does not undo the
//! write: it is reported in [`MutationOutcome::resync_error`] and the
//! registry is left stale until the next load succeeds.

use tracing::{info, warn};
use uuid::Uuid;

use pulse_core::{Error, NotificationUpdate, Result};

use crate::registry::NotificationRegistry;

/// Result of a lifecycle operation whose durable write succeeded.
#[derive(Debug)]
pub struct MutationOutcome {
    /// Records changed, when the backend reports it.
    pub changed: Option<u64>,
    /// Failure of the follow-up load, if any.
    pub resync_error: Option<Error>,
}

impl MutationOutcome {
    pub fn resynced(&self) -> bool {
        self.resync_error.is_none()
    }
}

impl NotificationRegistry {
    /// Mark one notification read.
    pub async fn mark_read(&self, id: Uuid) -> Result<MutationOutcome> {
        self.apply_update(id, NotificationUpdate::MarkRead).await
    }

    /// Dismiss one notification. Dismissing twice is a successful no-op.
    pub async fn dismiss(&self, id: Uuid) -> Result<MutationOutcome> {
        self.apply_update(id, NotificationUpdate::Dismiss).await
    }

    /// Mark every unread active notification of the viewer read.
    pub async fn mark_all_read(&self) -> Result<MutationOutcome> {
        let scope = self.scope()?;
        let changed = self.repo().mark_all_read(scope).await?;
        info!(
            subsystem = "live",
            component = "lifecycle",
            op = "mark_all_read",
            viewer_id = %scope.owner_id(),
            result_count = changed,
            "Marked all notifications read"
        );
        Ok(self.resync(Some(changed), "mark_all_read").await)
    }

    async fn apply_update(&self, id: Uuid, update: NotificationUpdate) -> Result<MutationOutcome> {
        let scope = self.scope()?;
        self.repo().update(scope, id, update).await?;
        if update == NotificationUpdate::Dismiss {
            self.tombstone(id);
        }
        info!(
            subsystem = "live",
            component = "lifecycle",
            op = update.as_str(),
            viewer_id = %scope.owner_id(),
            notification_id = %id,
            "Notification updated"
        );
        Ok(self.resync(None, update.as_str()).await)
    }

    async fn resync(&self, changed: Option<u64>, op: &'static str) -> MutationOutcome {
        let resync_error = match self.load().await {
            Ok(_) => None,
            Err(e) => {
                warn!(
                    subsystem = "live",
                    component = "lifecycle",
                    op,
                    error = %e,
                    "Write succeeded but resync failed"
                );
                Some(e)
            }
        };
        MutationOutcome {
            changed,
            resync_error,
        }
    }
}
