//! Client-side registry of a viewer's notifications.
//!
//! The registry is reconciled against durable storage only through
//! [`NotificationRegistry::load`], a full replace-in-place refresh. Pushes
//! and local mutations both end in a `load`; nothing merges partial rows.
//!
//! Loads may complete out of issue order. Each load takes a ticket before it
//! reads, and a completed load is applied only if its ticket is newer than
//! the last one applied. A read that started before a mutation can therefore
//! never overwrite a read that started after it.
//!
//! Ids dismissed through this registry are tombstoned for its lifetime and
//! filtered out of every snapshot, whatever a later load returns.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_core::{Error, Identity, Notification, NotificationRepository, Result, ViewerScope};

use crate::views;

/// Point-in-time copy of the registry.
#[derive(Debug, Clone, Default, Serialize)]
pub struct RegistrySnapshot {
    /// Active records, newest first.
    pub records: Vec<Notification>,
    /// Ticket of the load these records came from. 0 before the first load.
    pub ticket: u64,
    pub loaded_at: Option<DateTime<Utc>>,
    /// Set when the most recent load failed.
    pub stale: bool,
    pub last_error: Option<String>,
}

/// Result of a load that reached storage successfully.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The fetched records replaced the registry contents.
    Applied { ticket: u64, count: usize },
    /// A load issued later had already been applied; this one was dropped.
    Superseded { ticket: u64 },
}

#[derive(Default)]
struct RegistryState {
    records: Vec<Notification>,
    applied_ticket: u64,
    tombstones: HashSet<Uuid>,
    loaded_at: Option<DateTime<Utc>>,
    stale: bool,
    last_error: Option<String>,
}

/// The authoritative in-memory view of one viewer's notifications.
pub struct NotificationRegistry {
    repo: Arc<dyn NotificationRepository>,
    viewer: Option<Identity>,
    page_size: usize,
    next_ticket: AtomicU64,
    state: RwLock<RegistryState>,
}

impl NotificationRegistry {
    pub fn new(
        repo: Arc<dyn NotificationRepository>,
        viewer: Option<Identity>,
        page_size: usize,
    ) -> Self {
        Self {
            repo,
            viewer,
            page_size,
            next_ticket: AtomicU64::new(0),
            state: RwLock::new(RegistryState::default()),
        }
    }

    pub fn viewer(&self) -> Option<&Identity> {
        self.viewer.as_ref()
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    pub(crate) fn repo(&self) -> &Arc<dyn NotificationRepository> {
        &self.repo
    }

    /// Scope of the current viewer, or `Unauthenticated`.
    pub(crate) fn scope(&self) -> Result<ViewerScope> {
        self.viewer
            .as_ref()
            .map(Identity::scope)
            .ok_or(Error::Unauthenticated)
    }

    /// Full refresh from durable storage.
    ///
    /// On failure the previous records are kept and the registry is marked
    /// stale, unless a newer load has already been applied. The error is
    /// returned either way.
    pub async fn load(&self) -> Result<LoadOutcome> {
        let scope = self.scope()?;
        let ticket = self.next_ticket.fetch_add(1, Ordering::SeqCst) + 1;
        let start = Instant::now();
        let limit = i64::try_from(self.page_size).unwrap_or(i64::MAX);

        match self.repo.fetch_active(scope, limit).await {
            Ok(rows) => {
                let mut state = self.write_state();
                if ticket <= state.applied_ticket {
                    debug!(
                        subsystem = "live",
                        component = "registry",
                        op = "load",
                        ticket,
                        applied = state.applied_ticket,
                        "Discarding superseded load"
                    );
                    return Ok(LoadOutcome::Superseded { ticket });
                }
                for n in rows.iter().filter(|n| n.is_dismissed) {
                    state.tombstones.insert(n.id);
                }
                let tombstones = &state.tombstones;
                let records: Vec<Notification> = rows
                    .into_iter()
                    .filter(|n| n.is_active() && !tombstones.contains(&n.id))
                    .collect();
                let count = records.len();
                state.records = records;
                state.applied_ticket = ticket;
                state.loaded_at = Some(Utc::now());
                state.stale = false;
                state.last_error = None;
                debug!(
                    subsystem = "live",
                    component = "registry",
                    op = "load",
                    viewer_id = %scope.owner_id(),
                    ticket,
                    result_count = count,
                    duration_ms = start.elapsed().as_millis() as u64,
                    "Registry loaded"
                );
                Ok(LoadOutcome::Applied { ticket, count })
            }
            Err(e) => {
                let mut state = self.write_state();
                if ticket <= state.applied_ticket {
                    debug!(
                        subsystem = "live",
                        component = "registry",
                        op = "load",
                        ticket,
                        applied = state.applied_ticket,
                        error = %e,
                        "Superseded load failed, snapshot unaffected"
                    );
                    return Err(e);
                }
                state.stale = true;
                state.last_error = Some(e.to_string());
                warn!(
                    subsystem = "live",
                    component = "registry",
                    op = "load",
                    viewer_id = %scope.owner_id(),
                    ticket,
                    error = %e,
                    "Registry load failed, keeping last snapshot"
                );
                Err(e)
            }
        }
    }

    /// Record that `id` is dismissed and drop it from the current records.
    pub(crate) fn tombstone(&self, id: Uuid) {
        let mut state = self.write_state();
        state.tombstones.insert(id);
        state.records.retain(|n| n.id != id);
    }

    /// Whether `id` has been dismissed during this registry's lifetime.
    pub fn is_tombstoned(&self, id: Uuid) -> bool {
        self.read_state().tombstones.contains(&id)
    }

    pub fn snapshot(&self) -> RegistrySnapshot {
        let state = self.read_state();
        RegistrySnapshot {
            records: state
                .records
                .iter()
                .filter(|n| !state.tombstones.contains(&n.id))
                .cloned()
                .collect(),
            ticket: state.applied_ticket,
            loaded_at: state.loaded_at,
            stale: state.stale,
            last_error: state.last_error.clone(),
        }
    }

    /// Active records, newest first, capped at the page size.
    pub fn active_view(&self) -> Vec<Notification> {
        views::active_notifications(&self.snapshot().records, self.page_size)
    }

    pub fn unread_count(&self) -> usize {
        views::unread_count(&self.snapshot().records)
    }

    pub fn is_stale(&self) -> bool {
        self.read_state().stale
    }

    fn read_state(&self) -> RwLockReadGuard<'_, RegistryState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write_state(&self) -> RwLockWriteGuard<'_, RegistryState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }
}
