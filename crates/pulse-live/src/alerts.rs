//! Alert rule management.
//!
//! Rules are configuration only; nothing here evaluates them. Every
//! successful mutation is followed by an audit append whose failure is
//! reported next to the result instead of failing the mutation.

use std::sync::Arc;

use serde_json::json;
use tracing::info;
use uuid::Uuid;

use pulse_core::defaults::ALERT_NAME_MAX_LEN;
use pulse_core::{
    AlertChannel, AlertCondition, AlertRule, AlertRuleRepository, CreateAlertRuleRequest, Error,
    Identity, MetricType, NewAuditRecord, Result, UpdateAlertRuleRequest, ValidAlertRule,
    ViewerScope,
};

use crate::audit::AuditTrail;

const RESOURCE_TYPE: &str = "alert_rule";

/// A mutation result plus the outcome of its audit append.
#[derive(Debug)]
pub struct Audited<T> {
    pub value: T,
    pub audit_error: Option<Error>,
}

fn validate_name(name: &str) -> Result<String> {
    let name = name.trim();
    if name.is_empty() {
        return Err(Error::Validation("alert name must not be empty".into()));
    }
    if name.chars().count() > ALERT_NAME_MAX_LEN {
        return Err(Error::Validation(format!(
            "alert name must be at most {} characters",
            ALERT_NAME_MAX_LEN
        )));
    }
    Ok(name.to_string())
}

fn validate_threshold(threshold: f64) -> Result<f64> {
    if !threshold.is_finite() {
        return Err(Error::Validation("threshold must be a finite number".into()));
    }
    Ok(threshold)
}

/// Check and normalize a create request.
pub fn validate(req: CreateAlertRuleRequest) -> Result<ValidAlertRule> {
    let name = validate_name(&req.name)?;
    let metric_type: MetricType = req.metric_type.trim().parse()?;
    let condition: AlertCondition = req.condition.trim().parse()?;
    let threshold = validate_threshold(req.threshold)?;
    let channels = req
        .channels
        .unwrap_or_default()
        .iter()
        .map(|tag| {
            AlertChannel::parse(tag.trim())
                .ok_or_else(|| Error::Validation(format!("unknown alert channel: {}", tag)))
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(ValidAlertRule {
        name,
        metric_type,
        condition,
        threshold,
        channels: AlertChannel::normalize(channels),
    })
}

/// Check and normalize an update request.
pub fn validate_update(mut req: UpdateAlertRuleRequest) -> Result<UpdateAlertRuleRequest> {
    if req.is_empty() {
        return Err(Error::Validation("update has no fields".into()));
    }
    if let Some(name) = req.name.as_deref() {
        req.name = Some(validate_name(name)?);
    }
    if let Some(threshold) = req.threshold {
        validate_threshold(threshold)?;
    }
    req.channels = req.channels.map(AlertChannel::normalize);
    Ok(req)
}

fn snapshot(rule: &AlertRule) -> serde_json::Value {
    json!({
        "name": rule.name,
        "metric_type": rule.metric_type,
        "condition": rule.condition,
        "threshold": rule.threshold,
        "is_active": rule.is_active,
        "channels": rule.channels,
    })
}

/// Viewer-scoped alert rule operations.
#[derive(Clone)]
pub struct AlertRuleService {
    repo: Arc<dyn AlertRuleRepository>,
    audit: AuditTrail,
}

impl AlertRuleService {
    pub fn new(repo: Arc<dyn AlertRuleRepository>, audit: AuditTrail) -> Self {
        Self { repo, audit }
    }

    fn scope(viewer: Option<&Identity>) -> Result<ViewerScope> {
        viewer.map(Identity::scope).ok_or(Error::Unauthenticated)
    }

    pub async fn list(&self, viewer: Option<&Identity>) -> Result<Vec<AlertRule>> {
        let scope = Self::scope(viewer)?;
        self.repo.list(scope).await
    }

    /// Validate, then persist. Invalid input never reaches storage.
    pub async fn create(
        &self,
        viewer: Option<&Identity>,
        req: CreateAlertRuleRequest,
    ) -> Result<Audited<AlertRule>> {
        let scope = Self::scope(viewer)?;
        let rule = validate(req)?;
        let created = self.repo.create(scope, rule).await?;
        info!(
            subsystem = "live",
            component = "alerts",
            op = "create",
            viewer_id = %scope.owner_id(),
            alert_id = %created.id,
            "Alert rule created"
        );
        let record = NewAuditRecord::new("alert_rule.create", RESOURCE_TYPE)
            .resource(created.id)
            .new_values(snapshot(&created));
        let audit_error = self.audit.record(viewer, record).await.err();
        Ok(Audited {
            value: created,
            audit_error,
        })
    }

    /// Enable or disable a rule.
    pub async fn toggle(
        &self,
        viewer: Option<&Identity>,
        id: Uuid,
        active: bool,
    ) -> Result<Audited<AlertRule>> {
        self.apply_update(viewer, id, UpdateAlertRuleRequest::toggle(active), "alert_rule.toggle")
            .await
    }

    pub async fn update(
        &self,
        viewer: Option<&Identity>,
        id: Uuid,
        req: UpdateAlertRuleRequest,
    ) -> Result<Audited<AlertRule>> {
        self.apply_update(viewer, id, req, "alert_rule.update").await
    }

    pub async fn delete(&self, viewer: Option<&Identity>, id: Uuid) -> Result<Audited<()>> {
        let scope = Self::scope(viewer)?;
        let existing = self
            .repo
            .get(scope, id)
            .await?
            .ok_or_else(|| Error::not_found("alert rule", id))?;
        self.repo.delete(scope, id).await?;
        info!(
            subsystem = "live",
            component = "alerts",
            op = "delete",
            viewer_id = %scope.owner_id(),
            alert_id = %id,
            "Alert rule deleted"
        );
        let record = NewAuditRecord::new("alert_rule.delete", RESOURCE_TYPE)
            .resource(id)
            .old_values(snapshot(&existing));
        let audit_error = self.audit.record(viewer, record).await.err();
        Ok(Audited {
            value: (),
            audit_error,
        })
    }

    async fn apply_update(
        &self,
        viewer: Option<&Identity>,
        id: Uuid,
        req: UpdateAlertRuleRequest,
        action: &'static str,
    ) -> Result<Audited<AlertRule>> {
        let scope = Self::scope(viewer)?;
        let req = validate_update(req)?;
        let existing = self
            .repo
            .get(scope, id)
            .await?
            .ok_or_else(|| Error::not_found("alert rule", id))?;
        let updated = self.repo.update(scope, id, req).await?;
        info!(
            subsystem = "live",
            component = "alerts",
            op = action,
            viewer_id = %scope.owner_id(),
            alert_id = %id,
            is_active = updated.is_active,
            "Alert rule updated"
        );
        let record = NewAuditRecord::new(action, RESOURCE_TYPE)
            .resource(id)
            .old_values(snapshot(&existing))
            .new_values(snapshot(&updated));
        let audit_error = self.audit.record(viewer, record).await.err();
        Ok(Audited {
            value: updated,
            audit_error,
        })
    }
}
