//! In-memory storage backend.
//!
//! Implements every repository trait plus [`RoleDirectory`] over plain
//! vectors, and publishes each insert on a [`ChangeFeed`] the same way the
//! PostgreSQL triggers do. Used by tests and by the server's `memory`
//! backend.
//!
//! Fault injection: [`MemoryStore::fail_next_fetches`] makes the next reads
//! fail with [`Error::Connectivity`], [`MemoryStore::fail_next_writes`] does
//! the same for mutations, and [`MemoryStore::delay_next_fetch`] makes one
//! read take its snapshot immediately but return late, which is how a stale
//! resync is reproduced.

use std::collections::HashSet;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use tokio::sync::RwLock;
use tracing::trace;
use uuid::Uuid;

use pulse_core::{
    AlertChannel, AlertRule, AlertRuleRepository, AuditRecord, AuditRepository, ChangeFeed, Error,
    Event, EventKind, EventRepository, Identity, InsightCategory, NewAuditRecord, NewEvent,
    NewNotification, Notification, NotificationRepository, NotificationUpdate, Result, Role,
    RoleDirectory, Severity, Table, UpdateAlertRuleRequest, ValidAlertRule, ViewerScope,
};

#[derive(Default)]
struct State {
    // All vectors are in insertion order.
    events: Vec<Event>,
    notifications: Vec<Notification>,
    alert_rules: Vec<AlertRule>,
    audit: Vec<AuditRecord>,
    roles: HashSet<(Uuid, Role)>,
}

/// In-memory implementation of all storage interfaces.
pub struct MemoryStore {
    feed: Arc<ChangeFeed>,
    state: RwLock<State>,
    failing_fetches: AtomicU32,
    failing_writes: AtomicU32,
    fetch_delay: Mutex<Option<Duration>>,
    notification_fetches: AtomicU64,
}

impl MemoryStore {
    pub fn new(feed: Arc<ChangeFeed>) -> Self {
        Self {
            feed,
            state: RwLock::new(State::default()),
            failing_fetches: AtomicU32::new(0),
            failing_writes: AtomicU32::new(0),
            fetch_delay: Mutex::new(None),
            notification_fetches: AtomicU64::new(0),
        }
    }

    /// The feed inserts are published on.
    pub fn feed(&self) -> Arc<ChangeFeed> {
        self.feed.clone()
    }

    /// Fail the next `n` fetches with a connectivity error.
    pub fn fail_next_fetches(&self, n: u32) {
        self.failing_fetches.store(n, Ordering::SeqCst);
    }

    /// Fail the next `n` writes with a connectivity error.
    pub fn fail_next_writes(&self, n: u32) {
        self.failing_writes.store(n, Ordering::SeqCst);
    }

    /// Hold the result of the next fetch for `delay` after reading it.
    pub fn delay_next_fetch(&self, delay: Duration) {
        *self.fetch_delay.lock().unwrap_or_else(|e| e.into_inner()) = Some(delay);
    }

    /// Number of notification fetches served so far, failed ones included.
    pub fn notification_fetches(&self) -> u64 {
        self.notification_fetches.load(Ordering::SeqCst)
    }

    /// Durable view of one notification, dismissed or not.
    pub async fn notification(&self, id: Uuid) -> Option<Notification> {
        let state = self.state.read().await;
        state.notifications.iter().find(|n| n.id == id).cloned()
    }

    /// Grant a role to a viewer.
    pub async fn grant(&self, viewer_id: Uuid, role: Role) {
        self.state.write().await.roles.insert((viewer_id, role));
    }

    fn check_fetch(&self) -> Result<()> {
        take_failure(&self.failing_fetches, "fetch")
    }

    fn check_write(&self) -> Result<()> {
        take_failure(&self.failing_writes, "write")
    }

    fn take_delay(&self) -> Option<Duration> {
        self.fetch_delay
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .take()
    }

    async fn settle<T>(&self, value: T) -> T {
        if let Some(delay) = self.take_delay() {
            tokio::time::sleep(delay).await;
        }
        value
    }
}

fn take_failure(counter: &AtomicU32, what: &str) -> Result<()> {
    let remaining = counter.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1));
    if remaining.is_ok() {
        return Err(Error::Connectivity(format!("injected {} failure", what)));
    }
    Ok(())
}

fn clamp(limit: i64) -> usize {
    usize::try_from(limit).unwrap_or(0)
}

#[async_trait]
impl NotificationRepository for MemoryStore {
    async fn fetch_active(&self, scope: ViewerScope, limit: i64) -> Result<Vec<Notification>> {
        self.notification_fetches.fetch_add(1, Ordering::SeqCst);
        self.check_fetch()?;
        let mut rows: Vec<Notification> = {
            let state = self.state.read().await;
            state
                .notifications
                .iter()
                .rev()
                .filter(|n| n.owner_id == scope.owner_id() && n.is_active())
                .cloned()
                .collect()
        };
        // Stable sort keeps later inserts first on equal timestamps.
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        rows.truncate(clamp(limit));
        Ok(self.settle(rows).await)
    }

    async fn update(
        &self,
        scope: ViewerScope,
        id: Uuid,
        update: NotificationUpdate,
    ) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let record = state
            .notifications
            .iter_mut()
            .find(|n| n.id == id && n.owner_id == scope.owner_id())
            .ok_or_else(|| Error::not_found("notification", id))?;
        let changed = record.apply(update);
        trace!(
            subsystem = "db",
            component = "memory",
            op = update.as_str(),
            notification_id = %id,
            changed,
            "Notification updated"
        );
        Ok(())
    }

    async fn mark_all_read(&self, scope: ViewerScope) -> Result<u64> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let mut changed = 0;
        for n in state
            .notifications
            .iter_mut()
            .filter(|n| n.owner_id == scope.owner_id() && n.is_active())
        {
            if n.apply(NotificationUpdate::MarkRead) {
                changed += 1;
            }
        }
        Ok(changed)
    }

    async fn insert(&self, req: NewNotification) -> Result<Notification> {
        self.check_write()?;
        let notification = Notification {
            id: Uuid::now_v7(),
            owner_id: req.owner_id,
            category: InsightCategory::parse(&req.category),
            severity: Severity::parse(req.severity.as_deref()),
            title: req.title,
            description: req.description,
            data: req.data.unwrap_or_else(|| json!({})),
            is_read: false,
            is_dismissed: false,
            created_at: Utc::now(),
        };
        self.state
            .write()
            .await
            .notifications
            .push(notification.clone());
        self.feed.publish_row(
            Table::Notifications,
            json!({"id": notification.id, "owner_id": notification.owner_id}),
        );
        Ok(notification)
    }
}

#[async_trait]
impl EventRepository for MemoryStore {
    async fn fetch_recent(&self, limit: i64) -> Result<Vec<Event>> {
        self.check_fetch()?;
        let rows: Vec<Event> = {
            let state = self.state.read().await;
            state
                .events
                .iter()
                .rev()
                .take(clamp(limit))
                .cloned()
                .collect()
        };
        Ok(self.settle(rows).await)
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok(state.events.iter().find(|e| e.id == id).cloned())
    }

    async fn insert(&self, req: NewEvent) -> Result<Event> {
        self.check_write()?;
        let event = Event {
            id: Uuid::now_v7(),
            kind: EventKind::parse(&req.kind),
            occurred_at: Utc::now(),
            page_path: req.page_path,
            session_id: req.session_id,
            context: req.context.unwrap_or_else(|| json!({})),
        };
        self.state.write().await.events.push(event.clone());
        self.feed
            .publish_row(Table::AnalyticsEvents, serde_json::to_value(&event)?);
        Ok(event)
    }
}

#[async_trait]
impl AlertRuleRepository for MemoryStore {
    async fn list(&self, scope: ViewerScope) -> Result<Vec<AlertRule>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok(state
            .alert_rules
            .iter()
            .rev()
            .filter(|r| r.owner_id == scope.owner_id())
            .cloned()
            .collect())
    }

    async fn get(&self, scope: ViewerScope, id: Uuid) -> Result<Option<AlertRule>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok(state
            .alert_rules
            .iter()
            .find(|r| r.id == id && r.owner_id == scope.owner_id())
            .cloned())
    }

    async fn create(&self, scope: ViewerScope, rule: ValidAlertRule) -> Result<AlertRule> {
        self.check_write()?;
        let now = Utc::now();
        let created = AlertRule {
            id: Uuid::now_v7(),
            owner_id: scope.owner_id(),
            name: rule.name,
            metric_type: rule.metric_type,
            condition: rule.condition,
            threshold: rule.threshold,
            is_active: true,
            channels: AlertChannel::normalize(rule.channels),
            last_triggered_at: None,
            created_at: now,
            updated_at: now,
        };
        self.state.write().await.alert_rules.push(created.clone());
        self.feed
            .publish_row(Table::AlertRules, json!({"id": created.id}));
        Ok(created)
    }

    async fn update(
        &self,
        scope: ViewerScope,
        id: Uuid,
        req: UpdateAlertRuleRequest,
    ) -> Result<AlertRule> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let rule = state
            .alert_rules
            .iter_mut()
            .find(|r| r.id == id && r.owner_id == scope.owner_id())
            .ok_or_else(|| Error::not_found("alert rule", id))?;
        if let Some(name) = req.name {
            rule.name = name;
        }
        if let Some(threshold) = req.threshold {
            rule.threshold = threshold;
        }
        if let Some(active) = req.is_active {
            rule.is_active = active;
        }
        if let Some(channels) = req.channels {
            rule.channels = AlertChannel::normalize(channels);
        }
        rule.updated_at = Utc::now();
        Ok(rule.clone())
    }

    async fn delete(&self, scope: ViewerScope, id: Uuid) -> Result<()> {
        self.check_write()?;
        let mut state = self.state.write().await;
        let before = state.alert_rules.len();
        state
            .alert_rules
            .retain(|r| !(r.id == id && r.owner_id == scope.owner_id()));
        if state.alert_rules.len() == before {
            return Err(Error::not_found("alert rule", id));
        }
        Ok(())
    }
}

#[async_trait]
impl AuditRepository for MemoryStore {
    async fn append(&self, record: NewAuditRecord) -> Result<Uuid> {
        self.check_write()?;
        let id = Uuid::now_v7();
        self.state.write().await.audit.push(AuditRecord {
            id,
            actor_id: record.actor_id,
            action: record.action,
            resource_type: record.resource_type,
            resource_id: record.resource_id,
            old_values: record.old_values,
            new_values: record.new_values,
            ip_address: record.ip_address,
            user_agent: record.user_agent,
            created_at: Utc::now(),
        });
        self.feed.publish_row(Table::AuditLogs, json!({"id": id}));
        Ok(id)
    }

    async fn list(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        self.check_fetch()?;
        let state = self.state.read().await;
        Ok(state
            .audit
            .iter()
            .rev()
            .take(clamp(limit))
            .cloned()
            .collect())
    }
}

#[async_trait]
impl RoleDirectory for MemoryStore {
    async fn has_role(&self, identity: &Identity, role: Role) -> Result<bool> {
        let state = self.state.read().await;
        Ok(state.roles.contains(&(identity.viewer_id, role)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pulse_core::{AlertCondition, Delivery, MetricType};

    fn store() -> MemoryStore {
        MemoryStore::new(Arc::new(ChangeFeed::new(64)))
    }

    fn note(owner: Uuid, title: &str) -> NewNotification {
        NewNotification {
            owner_id: owner,
            category: "trend".to_string(),
            severity: None,
            title: title.to_string(),
            description: String::new(),
            data: None,
        }
    }

    #[tokio::test]
    async fn test_insert_publishes_event_row() {
        let store = store();
        let mut sub = store.feed().open(Table::AnalyticsEvents);

        let event = EventRepository::insert(
            &store,
            NewEvent {
                kind: "click".to_string(),
                page_path: Some("/".to_string()),
                session_id: None,
                context: None,
            },
        )
        .await
        .unwrap();

        match sub.recv().await {
            Some(Delivery::Insert(env)) => {
                let decoded: Event = env.decode().unwrap();
                assert_eq!(decoded, event);
            }
            other => panic!("unexpected delivery: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_fetch_recent_newest_first_and_limited() {
        let store = store();
        for i in 0..5 {
            EventRepository::insert(
                &store,
                NewEvent {
                    kind: format!("k{}", i),
                    page_path: None,
                    session_id: None,
                    context: Some(json!({"n": i})),
                },
            )
            .await
            .unwrap();
        }
        let recent = store.fetch_recent(3).await.unwrap();
        let ns: Vec<i64> = recent
            .iter()
            .map(|e| e.context["n"].as_i64().unwrap())
            .collect();
        assert_eq!(ns, vec![4, 3, 2]);
    }

    #[tokio::test]
    async fn test_notification_scope_and_dismiss() {
        let store = store();
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        let n = NotificationRepository::insert(&store, note(a, "a")).await.unwrap();
        NotificationRepository::insert(&store, note(b, "b")).await.unwrap();

        let err = NotificationRepository::update(&store, ViewerScope(b), n.id, NotificationUpdate::Dismiss)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));

        NotificationRepository::update(&store, ViewerScope(a), n.id, NotificationUpdate::Dismiss)
            .await
            .unwrap();
        assert!(store.fetch_active(ViewerScope(a), 50).await.unwrap().is_empty());
        assert_eq!(store.fetch_active(ViewerScope(b), 50).await.unwrap().len(), 1);
        assert!(store.notification(n.id).await.unwrap().is_dismissed);
    }

    #[tokio::test]
    async fn test_mark_all_read_counts_changes() {
        let store = store();
        let a = Uuid::new_v4();
        for i in 0..3 {
            NotificationRepository::insert(&store, note(a, &i.to_string()))
                .await
                .unwrap();
        }
        assert_eq!(store.mark_all_read(ViewerScope(a)).await.unwrap(), 3);
        assert_eq!(store.mark_all_read(ViewerScope(a)).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_fault_injection() {
        let store = store();
        store.fail_next_fetches(2);
        assert!(matches!(
            store.fetch_recent(10).await,
            Err(Error::Connectivity(_))
        ));
        assert!(store.fetch_active(ViewerScope(Uuid::nil()), 10).await.is_err());
        assert!(store.fetch_recent(10).await.is_ok());
        assert_eq!(store.notification_fetches(), 1);

        store.fail_next_writes(1);
        assert!(NotificationRepository::insert(&store, note(Uuid::nil(), "x"))
            .await
            .is_err());
        assert!(NotificationRepository::insert(&store, note(Uuid::nil(), "x"))
            .await
            .is_ok());
    }

    #[tokio::test]
    async fn test_alert_rule_crud_scoped() {
        let store = store();
        let owner = ViewerScope(Uuid::new_v4());
        let rule = store
            .create(
                owner,
                ValidAlertRule {
                    name: "Traffic".to_string(),
                    metric_type: MetricType::SessionsPerHour,
                    condition: AlertCondition::Below,
                    threshold: 10.0,
                    channels: vec![],
                },
            )
            .await
            .unwrap();
        assert_eq!(rule.channels, vec![AlertChannel::InApp]);

        let other = ViewerScope(Uuid::new_v4());
        assert!(AlertRuleRepository::list(&store, other)
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            AlertRuleRepository::update(&store, other, rule.id, UpdateAlertRuleRequest::toggle(false)).await,
            Err(Error::NotFound(_))
        ));

        let updated =
            AlertRuleRepository::update(&store, owner, rule.id, UpdateAlertRuleRequest::toggle(false))
                .await
                .unwrap();
        assert!(!updated.is_active);
        store.delete(owner, rule.id).await.unwrap();
        assert!(matches!(
            store.delete(owner, rule.id).await,
            Err(Error::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_roles() {
        let store = store();
        let admin = Identity::new(Uuid::new_v4());
        store.grant(admin.viewer_id, Role::Admin).await;
        assert!(store.has_role(&admin, Role::Admin).await.unwrap());
        assert!(!store
            .has_role(&Identity::new(Uuid::new_v4()), Role::Admin)
            .await
            .unwrap());
    }
}
