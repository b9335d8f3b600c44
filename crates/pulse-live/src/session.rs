//! Live session: the reconciliation loop for one viewer.
//!
//! A session owns an [`EventWindow`] and a [`NotificationRegistry`] and keeps
//! them current from three sources:
//!
//! - the analytics-events subscription, whose rows are prepended to the
//!   window (a lagged subscription rebuilds the window from storage),
//! - the notifications subscription, where a delivery for this viewer (or
//!   a lag report) only triggers a registry `load`; deliveries already queued
//!   behind it are folded into that same load,
//! - a periodic ticker that runs a `load` regardless of pushes, so missed
//!   deliveries and failed loads are eventually repaired.
//!
//! Subscriptions are opened before the initial loads, so an insert racing
//! the initial fetch is either in the fetched batch, queued on the
//! subscription, or both (the window ignores the duplicate).
//!
//! Anonymous sessions only run the event window.

use std::sync::{Arc, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};

use serde::Serialize;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use pulse_core::{
    Delivery, Event, EventRepository, Identity, InsertEnvelope, Result, Subscription, Table,
};

use crate::channel::{decode_event, open_subscription, Backend};
use crate::config::SessionConfig;
use crate::lifecycle::MutationOutcome;
use crate::registry::{LoadOutcome, NotificationRegistry};
use crate::retry::RetryPolicy;
use crate::views::DashboardView;
use crate::window::EventWindow;

const SESSION_EVENT_CAPACITY: usize = 64;

/// Why a registry load ran.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LoadTrigger {
    Initial,
    Push,
    Lagged,
    Periodic,
    Manual,
}

/// Observable progress of a session.
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The window changed; `len` is its new length.
    WindowUpdated { len: usize },
    RegistryLoaded {
        trigger: LoadTrigger,
        outcome: LoadOutcome,
    },
    LoadFailed {
        trigger: LoadTrigger,
        error: String,
    },
    Stopped,
}

type SharedWindow = Arc<RwLock<EventWindow>>;

fn read_window(window: &RwLock<EventWindow>) -> RwLockReadGuard<'_, EventWindow> {
    window.read().unwrap_or_else(|e| e.into_inner())
}

fn write_window(window: &RwLock<EventWindow>) -> RwLockWriteGuard<'_, EventWindow> {
    window.write().unwrap_or_else(|e| e.into_inner())
}

/// Builder for a live session.
pub struct LiveSession {
    backend: Backend,
    config: SessionConfig,
}

impl LiveSession {
    pub fn new(backend: Backend, config: SessionConfig) -> Self {
        Self { backend, config }
    }

    /// Subscribe, run the initial loads, and spawn the pumps.
    ///
    /// Only a failed subscribe is fatal. Failed initial loads leave the
    /// window empty or the registry stale, and later loads repair them.
    pub async fn start(self, viewer: Option<Identity>) -> Result<SessionHandle> {
        let LiveSession { backend, config } = self;
        let viewer_id = viewer.as_ref().map(|v| v.viewer_id);

        let event_sub = open_subscription(backend.realtime.as_ref(), Table::AnalyticsEvents).await?;
        let notification_sub = match viewer_id {
            Some(id) => Some((
                open_subscription(backend.realtime.as_ref(), Table::Notifications).await?,
                id,
            )),
            None => None,
        };

        let (events_tx, _) = broadcast::channel(SESSION_EVENT_CAPACITY);
        let (shutdown_tx, _) = watch::channel(false);
        let window: SharedWindow = Arc::new(RwLock::new(EventWindow::new(config.window_capacity)));
        let registry = Arc::new(NotificationRegistry::new(
            backend.notifications.clone(),
            viewer.clone(),
            config.page_size,
        ));

        if let Err(e) = rebuild_window(backend.events.as_ref(), &window, &config.retry).await {
            warn!(
                subsystem = "live",
                component = "session",
                op = "initial_window",
                error = %e,
                "Initial event load failed, starting with an empty window"
            );
        }

        let mut tasks = Vec::with_capacity(3);
        tasks.push(tokio::spawn(run_event_pump(
            event_sub,
            window.clone(),
            backend.events.clone(),
            config.retry,
            events_tx.clone(),
            shutdown_tx.subscribe(),
        )));

        if let Some((sub, owner_id)) = notification_sub {
            reload(&registry, &config.retry, LoadTrigger::Initial, &events_tx).await;
            tasks.push(tokio::spawn(run_invalidation_pump(
                sub,
                owner_id,
                registry.clone(),
                config.retry,
                events_tx.clone(),
                shutdown_tx.subscribe(),
            )));
            tasks.push(tokio::spawn(run_periodic_resync(
                registry.clone(),
                config.clone(),
                events_tx.clone(),
                shutdown_tx.subscribe(),
            )));
        }

        info!(
            subsystem = "live",
            component = "session",
            op = "start",
            viewer_id = ?viewer_id,
            window_len = read_window(&window).len(),
            tasks = tasks.len(),
            "Live session started"
        );

        Ok(SessionHandle {
            viewer,
            config,
            registry,
            window,
            events_tx,
            shutdown_tx,
            tasks: Mutex::new(tasks),
        })
    }
}

/// Handle to a running session.
///
/// Dropping the handle stops the session as well; [`SessionHandle::shutdown`]
/// additionally waits until both subscriptions are released.
pub struct SessionHandle {
    viewer: Option<Identity>,
    config: SessionConfig,
    registry: Arc<NotificationRegistry>,
    window: SharedWindow,
    events_tx: broadcast::Sender<SessionEvent>,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl SessionHandle {
    pub fn viewer(&self) -> Option<&Identity> {
        self.viewer.as_ref()
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    pub fn registry(&self) -> &Arc<NotificationRegistry> {
        &self.registry
    }

    /// Get a receiver for session events.
    pub fn events(&self) -> broadcast::Receiver<SessionEvent> {
        self.events_tx.subscribe()
    }

    pub fn is_running(&self) -> bool {
        !*self.shutdown_tx.borrow()
    }

    /// Newest-first copy of the event window.
    pub fn window_snapshot(&self) -> Vec<Event> {
        read_window(&self.window).snapshot()
    }

    pub fn histogram(&self, width: usize) -> Vec<bool> {
        read_window(&self.window).histogram(width)
    }

    pub fn unread_count(&self) -> usize {
        self.registry.unread_count()
    }

    pub fn dashboard(&self) -> DashboardView {
        let snapshot = self.registry.snapshot();
        let window = read_window(&self.window);
        DashboardView::build(
            &snapshot,
            &window,
            self.config.compact_page_size,
            self.config.page_size,
        )
    }

    pub async fn mark_read(&self, id: Uuid) -> Result<MutationOutcome> {
        self.registry.mark_read(id).await
    }

    pub async fn mark_all_read(&self) -> Result<MutationOutcome> {
        self.registry.mark_all_read().await
    }

    pub async fn dismiss(&self, id: Uuid) -> Result<MutationOutcome> {
        self.registry.dismiss(id).await
    }

    /// Run a load now, outside the periodic schedule.
    pub async fn resync(&self) -> Result<LoadOutcome> {
        let result = self.registry.load().await;
        let _ = self.events_tx.send(match &result {
            Ok(outcome) => SessionEvent::RegistryLoaded {
                trigger: LoadTrigger::Manual,
                outcome: *outcome,
            },
            Err(e) => SessionEvent::LoadFailed {
                trigger: LoadTrigger::Manual,
                error: e.to_string(),
            },
        });
        result
    }

    /// Stop the pumps and wait for them to release their subscriptions.
    /// Calling it again is a no-op.
    pub async fn shutdown(&self) {
        let tasks = {
            let mut guard = self.tasks.lock().unwrap_or_else(|e| e.into_inner());
            std::mem::take(&mut *guard)
        };
        if tasks.is_empty() {
            return;
        }
        self.shutdown_tx.send_replace(true);
        for result in futures::future::join_all(tasks).await {
            if let Err(e) = result {
                error!(
                    subsystem = "live",
                    component = "session",
                    op = "shutdown",
                    error = %e,
                    "Session task ended abnormally"
                );
            }
        }
        let _ = self.events_tx.send(SessionEvent::Stopped);
        info!(
            subsystem = "live",
            component = "session",
            op = "shutdown",
            viewer_id = ?self.viewer.as_ref().map(|v| v.viewer_id),
            "Live session stopped"
        );
    }
}

impl Drop for SessionHandle {
    fn drop(&mut self) {
        self.shutdown_tx.send_replace(true);
        let tasks = self.tasks.get_mut().unwrap_or_else(|e| e.into_inner());
        for task in tasks.drain(..) {
            task.abort();
        }
    }
}

async fn rebuild_window(
    events: &dyn EventRepository,
    window: &RwLock<EventWindow>,
    retry: &RetryPolicy,
) -> Result<usize> {
    let capacity = read_window(window).capacity();
    let limit = i64::try_from(capacity).unwrap_or(i64::MAX);
    let batch = retry.run("window_load", || events.fetch_recent(limit)).await?;
    let mut window = write_window(window);
    window.initialize(batch);
    Ok(window.len())
}

async fn reload(
    registry: &NotificationRegistry,
    retry: &RetryPolicy,
    trigger: LoadTrigger,
    events_tx: &broadcast::Sender<SessionEvent>,
) {
    let event = match retry.run("registry_load", || registry.load()).await {
        Ok(outcome) => SessionEvent::RegistryLoaded { trigger, outcome },
        Err(e) => SessionEvent::LoadFailed {
            trigger,
            error: e.to_string(),
        },
    };
    let _ = events_tx.send(event);
}

async fn run_event_pump(
    mut sub: Subscription,
    window: SharedWindow,
    events: Arc<dyn EventRepository>,
    retry: RetryPolicy,
    events_tx: broadcast::Sender<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            delivery = sub.recv() => match delivery {
                Some(Delivery::Insert(envelope)) => {
                    let Some(event) = decode_event(&envelope) else { continue };
                    let id = event.id;
                    let (inserted, len) = {
                        let mut window = write_window(&window);
                        (window.on_live_insert(event), window.len())
                    };
                    if inserted {
                        let _ = events_tx.send(SessionEvent::WindowUpdated { len });
                    } else {
                        debug!(subsystem = "live", component = "window", event_id = %id, "Duplicate arrival ignored");
                    }
                }
                Some(Delivery::Lagged(missed)) => {
                    warn!(subsystem = "live", component = "window", missed, "Event subscription lagged, rebuilding window");
                    match rebuild_window(events.as_ref(), &window, &retry).await {
                        Ok(len) => {
                            let _ = events_tx.send(SessionEvent::WindowUpdated { len });
                        }
                        Err(e) => {
                            warn!(subsystem = "live", component = "window", error = %e, "Window rebuild failed");
                        }
                    }
                }
                None => {
                    warn!(subsystem = "live", component = "window", "Event subscription closed");
                    break;
                }
            }
        }
    }
    sub.unsubscribe();
}

/// Whether a notification insert can change `viewer_id`'s registry. Rows
/// without a readable owner are assumed to.
fn concerns_viewer(envelope: &InsertEnvelope, viewer_id: Uuid) -> bool {
    envelope.owner_id().map_or(true, |owner| owner == viewer_id)
}

async fn run_invalidation_pump(
    mut sub: Subscription,
    viewer_id: Uuid,
    registry: Arc<NotificationRegistry>,
    retry: RetryPolicy,
    events_tx: broadcast::Sender<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        let trigger = tokio::select! {
            _ = shutdown.changed() => break,
            delivery = sub.recv() => match delivery {
                Some(Delivery::Insert(envelope)) if concerns_viewer(&envelope, viewer_id) => {
                    LoadTrigger::Push
                }
                Some(Delivery::Insert(envelope)) => {
                    debug!(
                        subsystem = "live",
                        component = "registry",
                        envelope_id = %envelope.envelope_id,
                        "Skipping another viewer's insert"
                    );
                    continue;
                }
                Some(Delivery::Lagged(missed)) => {
                    debug!(subsystem = "live", component = "registry", missed, "Notification subscription lagged");
                    LoadTrigger::Lagged
                }
                None => {
                    warn!(subsystem = "live", component = "registry", "Notification subscription closed");
                    break;
                }
            }
        };
        let mut folded = 0u32;
        while sub.try_recv().is_some() {
            folded += 1;
        }
        if folded > 0 {
            debug!(subsystem = "live", component = "registry", folded, "Queued deliveries folded into one load");
        }
        reload(&registry, &retry, trigger, &events_tx).await;
    }
    sub.unsubscribe();
}

async fn run_periodic_resync(
    registry: Arc<NotificationRegistry>,
    config: SessionConfig,
    events_tx: broadcast::Sender<SessionEvent>,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = interval(config.resync_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    // The first tick completes immediately; the initial load already ran.
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            _ = ticker.tick() => {
                reload(&registry, &config.retry, LoadTrigger::Periodic, &events_tx).await;
            }
        }
    }
}
