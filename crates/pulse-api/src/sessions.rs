//! One live session per viewer, started on first use and stopped once idle.
//!
//! The map lock is only held to find or create a viewer's slot. Starting a
//! session happens outside it, so a slow start for one viewer never blocks
//! requests for another.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::{Duration, Instant};

use tokio::sync::{Mutex, OnceCell};
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info};
use uuid::Uuid;

use pulse_core::{Identity, Result};
use pulse_live::{Backend, LiveSession, SessionConfig, SessionHandle};

struct SessionSlot {
    handle: OnceCell<Arc<SessionHandle>>,
    last_access: StdMutex<Instant>,
}

impl SessionSlot {
    fn new() -> Self {
        Self {
            handle: OnceCell::new(),
            last_access: StdMutex::new(Instant::now()),
        }
    }

    fn touch(&self) {
        *self.last_access.lock().unwrap_or_else(|e| e.into_inner()) = Instant::now();
    }

    fn idle_for(&self) -> Duration {
        self.last_access
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .elapsed()
    }

    /// A slot whose session stopped must be replaced.
    fn is_usable(&self) -> bool {
        self.handle.get().map_or(true, |h| h.is_running())
    }

    /// Idle long enough and not held by any in-flight request.
    fn is_expired(&self, idle_timeout: Duration) -> bool {
        self.idle_for() >= idle_timeout
            && self.handle.get().map_or(true, |h| Arc::strong_count(h) == 1)
    }
}

/// Registry of running sessions keyed by viewer (`None` is the shared
/// anonymous window session).
pub struct SessionManager {
    backend: Backend,
    config: SessionConfig,
    sessions: Mutex<HashMap<Option<Uuid>, Arc<SessionSlot>>>,
}

impl SessionManager {
    pub fn new(backend: Backend, config: SessionConfig) -> Self {
        Self {
            backend,
            config,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &SessionConfig {
        &self.config
    }

    /// The running session for `viewer`, starting it if needed.
    pub async fn session(&self, viewer: Option<&Identity>) -> Result<Arc<SessionHandle>> {
        let key = viewer.map(|v| v.viewer_id);
        let slot = {
            let mut sessions = self.sessions.lock().await;
            let slot = sessions
                .entry(key)
                .or_insert_with(|| Arc::new(SessionSlot::new()));
            if !slot.is_usable() {
                *slot = Arc::new(SessionSlot::new());
            }
            slot.touch();
            slot.clone()
        };

        let handle = slot
            .handle
            .get_or_try_init(|| async {
                LiveSession::new(self.backend.clone(), self.config.clone())
                    .start(viewer.cloned())
                    .await
                    .map(Arc::new)
            })
            .await?;
        Ok(handle.clone())
    }

    pub async fn len(&self) -> usize {
        self.sessions.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// Stop and forget sessions idle for at least the configured timeout.
    /// Returns how many were removed.
    pub async fn sweep_idle(&self) -> usize {
        let idle_timeout = self.config.idle_timeout;
        let expired: Vec<Arc<SessionSlot>> = {
            let mut sessions = self.sessions.lock().await;
            let keys: Vec<Option<Uuid>> = sessions
                .iter()
                .filter(|(_, slot)| slot.is_expired(idle_timeout))
                .map(|(key, _)| *key)
                .collect();
            keys.iter().filter_map(|key| sessions.remove(key)).collect()
        };

        for slot in &expired {
            if let Some(handle) = slot.handle.get() {
                handle.shutdown().await;
            }
        }
        if !expired.is_empty() {
            debug!(
                subsystem = "api",
                component = "sessions",
                op = "sweep",
                count = expired.len(),
                "Idle sessions stopped"
            );
        }
        expired.len()
    }

    /// Run [`SessionManager::sweep_idle`] every `every` until aborted.
    pub fn spawn_sweeper(self: &Arc<Self>, every: Duration) -> JoinHandle<()> {
        let manager = self.clone();
        tokio::spawn(async move {
            let mut ticker = interval(every);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                manager.sweep_idle().await;
            }
        })
    }

    /// Stop every session and wait for their subscriptions to be released.
    pub async fn shutdown_all(&self) {
        let slots: Vec<_> = self.sessions.lock().await.drain().map(|(_, s)| s).collect();
        let count = slots.len();
        for slot in slots {
            if let Some(handle) = slot.handle.get() {
                handle.shutdown().await;
            }
        }
        info!(subsystem = "api", component = "sessions", count, "All live sessions stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::Table;
    use pulse_db::test_fixtures::memory_store;
    use pulse_db::MemoryStore;
    use pulse_live::RetryPolicy;

    fn manager(store: &Arc<MemoryStore>, config: SessionConfig) -> Arc<SessionManager> {
        Arc::new(SessionManager::new(
            Backend::from_store(store.clone(), store.feed()),
            config,
        ))
    }

    #[tokio::test]
    async fn test_session_is_reused_per_viewer() {
        let store = memory_store();
        let feed = store.feed();
        let manager = manager(&store, SessionConfig::default());
        let viewer = Identity::new(Uuid::new_v4());

        let a = manager.session(Some(&viewer)).await.unwrap();
        let b = manager.session(Some(&viewer)).await.unwrap();
        assert!(Arc::ptr_eq(&a, &b));
        manager.session(None).await.unwrap();
        assert_eq!(manager.len().await, 2);
        assert_eq!(feed.open_subscriptions(Table::AnalyticsEvents), 2);

        drop((a, b));
        manager.shutdown_all().await;
        assert!(manager.is_empty().await);
        assert_eq!(feed.total_open(), 0);
    }

    #[tokio::test]
    async fn test_idle_sessions_release_their_subscriptions() {
        let store = memory_store();
        let feed = store.feed();
        let manager = manager(&store, SessionConfig::default().with_idle_timeout(Duration::ZERO));

        for _ in 0..20 {
            manager
                .session(Some(&Identity::new(Uuid::new_v4())))
                .await
                .unwrap();
        }
        assert_eq!(manager.len().await, 20);
        assert_eq!(feed.total_open(), 40);

        assert_eq!(manager.sweep_idle().await, 20);
        assert!(manager.is_empty().await);
        assert_eq!(feed.total_open(), 0);
    }

    #[tokio::test]
    async fn test_sweep_keeps_held_and_recent_sessions() {
        let store = memory_store();
        let idle = manager(&store, SessionConfig::default().with_idle_timeout(Duration::ZERO));
        let held = idle
            .session(Some(&Identity::new(Uuid::new_v4())))
            .await
            .unwrap();
        idle.session(Some(&Identity::new(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(idle.sweep_idle().await, 1);
        assert!(held.is_running());
        assert_eq!(idle.len().await, 1);
        drop(held);
        idle.shutdown_all().await;

        let recent = manager(&store, SessionConfig::default());
        recent
            .session(Some(&Identity::new(Uuid::new_v4())))
            .await
            .unwrap();
        assert_eq!(recent.sweep_idle().await, 0);
        assert_eq!(recent.len().await, 1);
        recent.shutdown_all().await;
    }

    #[tokio::test]
    async fn test_sweeper_task_stops_idle_sessions() {
        let store = memory_store();
        let feed = store.feed();
        let manager = manager(&store, SessionConfig::default().with_idle_timeout(Duration::ZERO));
        manager
            .session(Some(&Identity::new(Uuid::new_v4())))
            .await
            .unwrap();

        let sweeper = manager.spawn_sweeper(Duration::from_millis(20));
        tokio::time::timeout(Duration::from_secs(5), async {
            while !manager.is_empty().await || feed.total_open() > 0 {
                tokio::time::sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .expect("idle session was not swept");
        sweeper.abort();
    }

    #[tokio::test]
    async fn test_slow_start_does_not_block_other_viewers() {
        let store = memory_store();
        let manager = manager(&store, SessionConfig::default().with_retry(RetryPolicy::none()));
        let ready = Identity::new(Uuid::new_v4());
        manager.session(Some(&ready)).await.unwrap();

        store.delay_next_fetch(Duration::from_secs(2));
        let slow_manager = manager.clone();
        let slow = tokio::spawn(async move {
            slow_manager
                .session(Some(&Identity::new(Uuid::new_v4())))
                .await
                .map(|_| ())
        });
        // Let the slow start reach storage and pick up the delay.
        tokio::time::sleep(Duration::from_millis(50)).await;

        let again = tokio::time::timeout(Duration::from_millis(500), manager.session(Some(&ready)))
            .await
            .expect("existing session blocked behind a slow start");
        assert!(again.unwrap().is_running());
        assert_eq!(manager.len().await, 2);

        slow.await.unwrap().unwrap();
        manager.shutdown_all().await;
    }
}
