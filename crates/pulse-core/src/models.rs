//! Core data models for the pulse telemetry surface.
//!
//! Tag-like columns (event kind, insight category, severity) are stored as
//! free-form text by producers. They decode into closed enums with an
//! explicit fallback variant, so a row written by a newer producer never
//! fails to load. Alert rule tags are the exception on the write path:
//! creating a rule with an unknown metric or condition is a validation
//! failure.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use uuid::Uuid;

use crate::error::Error;

// =============================================================================
// EVENTS
// =============================================================================

/// Kind of a raw analytics event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum EventKind {
    SessionStart,
    SessionEnd,
    ScrollDepth,
    PageView,
    Click,
    /// Any tag not listed above.
    Other,
}

impl EventKind {
    /// Decode a wire tag; unrecognized tags map to [`EventKind::Other`].
    pub fn parse(tag: &str) -> Self {
        match tag {
            "session_start" => EventKind::SessionStart,
            "session_end" => EventKind::SessionEnd,
            "scroll_depth" | "scroll" => EventKind::ScrollDepth,
            "page_view" => EventKind::PageView,
            "click" => EventKind::Click,
            _ => EventKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EventKind::SessionStart => "session_start",
            EventKind::SessionEnd => "session_end",
            EventKind::ScrollDepth => "scroll_depth",
            EventKind::PageView => "page_view",
            EventKind::Click => "click",
            EventKind::Other => "other",
        }
    }
}

impl From<String> for EventKind {
    fn from(tag: String) -> Self {
        EventKind::parse(&tag)
    }
}

impl From<EventKind> for String {
    fn from(kind: EventKind) -> Self {
        kind.as_str().to_string()
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A raw analytics event. Ephemeral from the core's point of view: it only
/// lives in the event window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
    pub id: Uuid,
    pub kind: EventKind,
    pub occurred_at: DateTime<Utc>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub page_path: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session_id: Option<Uuid>,
    /// Opaque payload, never interpreted by the core.
    #[serde(default)]
    pub context: JsonValue,
}

/// Request for recording a new analytics event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewEvent {
    /// Raw kind tag as sent by the producer.
    pub kind: String,
    #[serde(default)]
    pub page_path: Option<String>,
    #[serde(default)]
    pub session_id: Option<Uuid>,
    #[serde(default)]
    pub context: Option<JsonValue>,
}

// =============================================================================
// NOTIFICATIONS
// =============================================================================

/// Category of a server-derived insight.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum InsightCategory {
    /// Also the fallback for unrecognized categories.
    #[default]
    Trend,
    Anomaly,
    Recommendation,
    Prediction,
}

impl InsightCategory {
    pub fn parse(tag: &str) -> Self {
        match tag {
            "anomaly" => InsightCategory::Anomaly,
            "recommendation" => InsightCategory::Recommendation,
            "prediction" => InsightCategory::Prediction,
            _ => InsightCategory::Trend,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            InsightCategory::Trend => "trend",
            InsightCategory::Anomaly => "anomaly",
            InsightCategory::Recommendation => "recommendation",
            InsightCategory::Prediction => "prediction",
        }
    }
}

impl From<String> for InsightCategory {
    fn from(tag: String) -> Self {
        InsightCategory::parse(&tag)
    }
}

impl From<InsightCategory> for String {
    fn from(category: InsightCategory) -> Self {
        category.as_str().to_string()
    }
}

/// Notification severity. Absent or unrecognized values are `Info`.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(from = "Option<String>", into = "String")]
pub enum Severity {
    #[default]
    Info,
    Warning,
    Critical,
}

impl Severity {
    pub fn parse(tag: Option<&str>) -> Self {
        match tag {
            Some("warning") => Severity::Warning,
            Some("critical") => Severity::Critical,
            _ => Severity::Info,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Info => "info",
            Severity::Warning => "warning",
            Severity::Critical => "critical",
        }
    }
}

impl From<Option<String>> for Severity {
    fn from(tag: Option<String>) -> Self {
        Severity::parse(tag.as_deref())
    }
}

impl From<Severity> for String {
    fn from(severity: Severity) -> Self {
        severity.as_str().to_string()
    }
}

/// Lifecycle state of a notification, derived from its two flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationState {
    Unread,
    Read,
    /// Terminal.
    Dismissed,
}

/// A durable notification (insight) record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Notification {
    pub id: Uuid,
    /// Viewer the notification is scoped to.
    pub owner_id: Uuid,
    pub category: InsightCategory,
    #[serde(default)]
    pub severity: Severity,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub data: JsonValue,
    #[serde(default)]
    pub is_read: bool,
    #[serde(default)]
    pub is_dismissed: bool,
    pub created_at: DateTime<Utc>,
}

impl Notification {
    pub fn state(&self) -> NotificationState {
        if self.is_dismissed {
            NotificationState::Dismissed
        } else if self.is_read {
            NotificationState::Read
        } else {
            NotificationState::Unread
        }
    }

    /// Active means not dismissed.
    pub fn is_active(&self) -> bool {
        !self.is_dismissed
    }

    /// Apply an update in place, returning whether anything changed.
    pub fn apply(&mut self, update: NotificationUpdate) -> bool {
        match update {
            NotificationUpdate::MarkRead if !self.is_read => {
                self.is_read = true;
                true
            }
            NotificationUpdate::Dismiss if !self.is_dismissed => {
                self.is_dismissed = true;
                true
            }
            _ => false,
        }
    }
}

/// A durable lifecycle transition. Both flags only ever move false → true;
/// there is deliberately no variant that clears one.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationUpdate {
    MarkRead,
    Dismiss,
}

impl NotificationUpdate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationUpdate::MarkRead => "mark_read",
            NotificationUpdate::Dismiss => "dismiss",
        }
    }
}

/// Request for producing a new notification.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewNotification {
    pub owner_id: Uuid,
    /// Raw category tag as sent by the producer.
    pub category: String,
    #[serde(default)]
    pub severity: Option<String>,
    pub title: String,
    pub description: String,
    #[serde(default)]
    pub data: Option<JsonValue>,
}

// =============================================================================
// ALERT RULES
// =============================================================================

/// Metric an alert rule watches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricType {
    #[default]
    SessionsPerHour,
    EventsPerMinute,
    ErrorRate,
    AvgSessionDuration,
    ConversionRate,
}

impl MetricType {
    pub const ALL: [MetricType; 5] = [
        MetricType::SessionsPerHour,
        MetricType::EventsPerMinute,
        MetricType::ErrorRate,
        MetricType::AvgSessionDuration,
        MetricType::ConversionRate,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            MetricType::SessionsPerHour => "sessions_per_hour",
            MetricType::EventsPerMinute => "events_per_minute",
            MetricType::ErrorRate => "error_rate",
            MetricType::AvgSessionDuration => "avg_session_duration",
            MetricType::ConversionRate => "conversion_rate",
        }
    }

    /// Decode a stored tag, falling back to the default metric.
    pub fn parse_lossy(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }
}

impl FromStr for MetricType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        MetricType::ALL
            .into_iter()
            .find(|m| m.as_str() == s)
            .ok_or_else(|| Error::Validation(format!("unknown metric type: {}", s)))
    }
}

/// Comparison applied between the metric and the threshold.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AlertCondition {
    #[default]
    Above,
    Below,
    Equals,
}

impl AlertCondition {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertCondition::Above => "above",
            AlertCondition::Below => "below",
            AlertCondition::Equals => "equals",
        }
    }

    pub fn parse_lossy(tag: &str) -> Self {
        tag.parse().unwrap_or_default()
    }
}

impl FromStr for AlertCondition {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "above" => Ok(AlertCondition::Above),
            "below" => Ok(AlertCondition::Below),
            "equals" => Ok(AlertCondition::Equals),
            other => Err(Error::Validation(format!(
                "unknown alert condition: {}",
                other
            ))),
        }
    }
}

/// Delivery target for a triggered alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertChannel {
    InApp,
    Email,
    Webhook,
}

impl AlertChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            AlertChannel::InApp => "in_app",
            AlertChannel::Email => "email",
            AlertChannel::Webhook => "webhook",
        }
    }

    pub fn parse(tag: &str) -> Option<Self> {
        match tag {
            "in_app" => Some(AlertChannel::InApp),
            "email" => Some(AlertChannel::Email),
            "webhook" => Some(AlertChannel::Webhook),
            _ => None,
        }
    }

    /// Sort, dedupe, and default an empty set to in-app delivery.
    pub fn normalize(mut channels: Vec<AlertChannel>) -> Vec<AlertChannel> {
        channels.sort();
        channels.dedup();
        if channels.is_empty() {
            channels.push(AlertChannel::InApp);
        }
        channels
    }
}

/// A threshold alert rule. Configuration only: evaluation happens outside
/// this system, which is also the only writer of `last_triggered_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AlertRule {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub metric_type: MetricType,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub is_active: bool,
    pub channels: Vec<AlertChannel>,
    pub last_triggered_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Request for creating an alert rule. Tags are raw strings so validation
/// can reject unknown values with a precise message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateAlertRuleRequest {
    pub name: String,
    pub metric_type: String,
    pub condition: String,
    pub threshold: f64,
    #[serde(default)]
    pub channels: Option<Vec<String>>,
}

/// Partial update of an alert rule. `None` fields are left untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct UpdateAlertRuleRequest {
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub threshold: Option<f64>,
    #[serde(default)]
    pub is_active: Option<bool>,
    #[serde(default)]
    pub channels: Option<Vec<AlertChannel>>,
}

impl UpdateAlertRuleRequest {
    pub fn toggle(active: bool) -> Self {
        Self {
            is_active: Some(active),
            ..Default::default()
        }
    }

    pub fn is_empty(&self) -> bool {
        self.name.is_none()
            && self.threshold.is_none()
            && self.is_active.is_none()
            && self.channels.is_none()
    }
}

/// A create request after validation: typed and normalized.
#[derive(Debug, Clone, PartialEq)]
pub struct ValidAlertRule {
    pub name: String,
    pub metric_type: MetricType,
    pub condition: AlertCondition,
    pub threshold: f64,
    pub channels: Vec<AlertChannel>,
}

// =============================================================================
// AUDIT
// =============================================================================

/// An append-only audit record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditRecord {
    pub id: Uuid,
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Request for appending an audit record.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NewAuditRecord {
    pub actor_id: Option<Uuid>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub old_values: Option<JsonValue>,
    pub new_values: Option<JsonValue>,
    pub ip_address: Option<String>,
    pub user_agent: Option<String>,
}

impl NewAuditRecord {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            ..Default::default()
        }
    }

    pub fn resource(mut self, id: impl ToString) -> Self {
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn old_values(mut self, values: JsonValue) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: JsonValue) -> Self {
        self.new_values = Some(values);
        self
    }
}

// =============================================================================
// IDENTITY
// =============================================================================

/// Opaque viewer identity handed to the core by the auth layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Identity {
    pub viewer_id: Uuid,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub display_name: Option<String>,
}

impl Identity {
    pub fn new(viewer_id: Uuid) -> Self {
        Self {
            viewer_id,
            display_name: None,
        }
    }

    pub fn scope(&self) -> ViewerScope {
        ViewerScope(self.viewer_id)
    }
}

/// Ownership boundary for scoped reads and writes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ViewerScope(pub Uuid);

impl ViewerScope {
    pub fn owner_id(&self) -> Uuid {
        self.0
    }
}

/// Application role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Admin => "admin",
            Role::User => "user",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn sample_notification() -> Notification {
        Notification {
            id: Uuid::nil(),
            owner_id: Uuid::nil(),
            category: InsightCategory::Anomaly,
            severity: Severity::Warning,
            title: "Traffic spike".to_string(),
            description: "Sessions doubled in the last hour".to_string(),
            data: json!({}),
            is_read: false,
            is_dismissed: false,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_event_kind_known_tags() {
        assert_eq!(EventKind::parse("session_start"), EventKind::SessionStart);
        assert_eq!(EventKind::parse("session_end"), EventKind::SessionEnd);
        assert_eq!(EventKind::parse("scroll_depth"), EventKind::ScrollDepth);
        assert_eq!(EventKind::parse("page_view"), EventKind::PageView);
        assert_eq!(EventKind::parse("click"), EventKind::Click);
    }

    #[test]
    fn test_event_kind_unknown_tag_falls_back() {
        assert_eq!(EventKind::parse("purchase"), EventKind::Other);
        assert_eq!(EventKind::parse(""), EventKind::Other);
    }

    #[test]
    fn test_event_deserializes_unknown_kind() {
        let raw = json!({
            "id": "01234567-89ab-cdef-0123-456789abcdef",
            "kind": "hover",
            "occurred_at": "2026-01-01T00:00:00Z",
            "context": {"x": 1}
        });
        let event: Event = serde_json::from_value(raw).unwrap();
        assert_eq!(event.kind, EventKind::Other);
        assert_eq!(event.context["x"], 1);
        assert!(event.page_path.is_none());
    }

    #[test]
    fn test_event_kind_serializes_as_tag() {
        let json = serde_json::to_string(&EventKind::PageView).unwrap();
        assert_eq!(json, r#""page_view""#);
    }

    #[test]
    fn test_category_fallback_is_trend() {
        assert_eq!(InsightCategory::parse("forecast"), InsightCategory::Trend);
        assert_eq!(
            InsightCategory::parse("recommendation"),
            InsightCategory::Recommendation
        );
    }

    #[test]
    fn test_severity_absent_is_info() {
        let n: Notification = serde_json::from_value(json!({
            "id": Uuid::nil(),
            "owner_id": Uuid::nil(),
            "category": "trend",
            "severity": null,
            "title": "t",
            "description": "d",
            "created_at": "2026-01-01T00:00:00Z"
        }))
        .unwrap();
        assert_eq!(n.severity, Severity::Info);
        assert!(!n.is_read);
        assert!(!n.is_dismissed);
    }

    #[test]
    fn test_severity_unknown_is_info() {
        assert_eq!(Severity::parse(Some("fatal")), Severity::Info);
        assert_eq!(Severity::parse(Some("critical")), Severity::Critical);
    }

    #[test]
    fn test_notification_state_machine() {
        let mut n = sample_notification();
        assert_eq!(n.state(), NotificationState::Unread);

        assert!(n.apply(NotificationUpdate::MarkRead));
        assert_eq!(n.state(), NotificationState::Read);
        assert!(!n.apply(NotificationUpdate::MarkRead));

        assert!(n.apply(NotificationUpdate::Dismiss));
        assert_eq!(n.state(), NotificationState::Dismissed);
        assert!(!n.is_active());
        assert!(!n.apply(NotificationUpdate::Dismiss));
    }

    #[test]
    fn test_dismiss_from_unread() {
        let mut n = sample_notification();
        n.apply(NotificationUpdate::Dismiss);
        assert_eq!(n.state(), NotificationState::Dismissed);
        assert!(!n.is_read);
    }

    #[test]
    fn test_metric_type_strict_and_lossy() {
        assert_eq!(
            "error_rate".parse::<MetricType>().unwrap(),
            MetricType::ErrorRate
        );
        assert!(matches!(
            "latency_p99".parse::<MetricType>(),
            Err(Error::Validation(_))
        ));
        assert_eq!(
            MetricType::parse_lossy("latency_p99"),
            MetricType::SessionsPerHour
        );
    }

    #[test]
    fn test_alert_condition_parse() {
        assert_eq!(
            "below".parse::<AlertCondition>().unwrap(),
            AlertCondition::Below
        );
        assert!("between".parse::<AlertCondition>().is_err());
        assert_eq!(AlertCondition::parse_lossy("between"), AlertCondition::Above);
    }

    #[test]
    fn test_alert_channels_normalize() {
        let channels = AlertChannel::normalize(vec![
            AlertChannel::Webhook,
            AlertChannel::InApp,
            AlertChannel::Webhook,
        ]);
        assert_eq!(channels, vec![AlertChannel::InApp, AlertChannel::Webhook]);
        assert_eq!(AlertChannel::normalize(vec![]), vec![AlertChannel::InApp]);
    }

    #[test]
    fn test_update_alert_rule_toggle() {
        let req = UpdateAlertRuleRequest::toggle(false);
        assert_eq!(req.is_active, Some(false));
        assert!(!req.is_empty());
        assert!(UpdateAlertRuleRequest::default().is_empty());
    }

    #[test]
    fn test_audit_record_builder() {
        let id = Uuid::nil();
        let rec = NewAuditRecord::new("alert.create", "alert_rule")
            .resource(id)
            .new_values(json!({"name": "High traffic"}));
        assert_eq!(rec.action, "alert.create");
        assert_eq!(rec.resource_id.as_deref(), Some(id.to_string().as_str()));
        assert!(rec.old_values.is_none());
        assert_eq!(rec.new_values.unwrap()["name"], "High traffic");
    }

    #[test]
    fn test_identity_scope() {
        let id = Uuid::new_v4();
        let identity = Identity::new(id);
        assert_eq!(identity.scope().owner_id(), id);
    }
}
