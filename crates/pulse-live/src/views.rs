//! Derived views over the registry and the event window.
//!
//! Everything here is a pure function of a snapshot and is recomputed on
//! every read. None of it is cached.

use chrono::{DateTime, Utc};
use serde::Serialize;

use pulse_core::defaults::HISTOGRAM_WIDTH;
use pulse_core::{Event, Notification};

use crate::registry::RegistrySnapshot;
use crate::window::EventWindow;

/// Active notifications not yet read.
pub fn unread_count(records: &[Notification]) -> usize {
    records
        .iter()
        .filter(|n| n.is_active() && !n.is_read)
        .count()
}

/// Active notifications, newest first, at most `limit`.
pub fn active_notifications(records: &[Notification], limit: usize) -> Vec<Notification> {
    records
        .iter()
        .filter(|n| n.is_active())
        .take(limit)
        .cloned()
        .collect()
}

/// Occupancy bars for the event window.
pub fn event_activity_histogram(window: &EventWindow, width: usize) -> Vec<bool> {
    window.histogram(width)
}

/// Everything a dashboard renders, computed from one pair of snapshots.
#[derive(Debug, Clone, Serialize)]
pub struct DashboardView {
    pub events: Vec<Event>,
    pub histogram: Vec<bool>,
    /// Short list for the side panel.
    pub compact: Vec<Notification>,
    pub notifications: Vec<Notification>,
    pub unread_count: usize,
    /// The last load failed; the lists are the last good snapshot.
    pub stale: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub loaded_at: Option<DateTime<Utc>>,
}

impl DashboardView {
    pub fn build(
        registry: &RegistrySnapshot,
        window: &EventWindow,
        compact_limit: usize,
        full_limit: usize,
    ) -> Self {
        Self {
            events: window.snapshot(),
            histogram: event_activity_histogram(window, HISTOGRAM_WIDTH),
            compact: active_notifications(&registry.records, compact_limit),
            notifications: active_notifications(&registry.records, full_limit),
            unread_count: unread_count(&registry.records),
            stale: registry.stale,
            last_error: registry.last_error.clone(),
            loaded_at: registry.loaded_at,
        }
    }
}
