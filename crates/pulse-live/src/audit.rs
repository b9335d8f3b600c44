//! Audit trail: append on behalf of a viewer, admin-only listing.

use std::collections::BTreeSet;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use pulse_core::defaults::AUDIT_PAGE_LIMIT;
use pulse_core::{
    AuditRecord, AuditRepository, Error, Identity, NewAuditRecord, Result, Role, RoleDirectory,
};

/// Filters for the audit listing.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditQuery {
    /// Case-insensitive substring over action, resource type, and resource id.
    #[serde(default)]
    pub search: Option<String>,
    /// Exact action match.
    #[serde(default)]
    pub action: Option<String>,
    #[serde(default)]
    pub limit: Option<i64>,
}

impl AuditQuery {
    fn matches(&self, record: &AuditRecord) -> bool {
        if let Some(action) = self.action.as_deref().filter(|a| !a.is_empty()) {
            if record.action != action {
                return false;
            }
        }
        match self.search.as_deref().map(str::trim).filter(|s| !s.is_empty()) {
            None => true,
            Some(needle) => {
                let needle = needle.to_lowercase();
                record.action.to_lowercase().contains(&needle)
                    || record.resource_type.to_lowercase().contains(&needle)
                    || record
                        .resource_id
                        .as_deref()
                        .is_some_and(|id| id.to_lowercase().contains(&needle))
            }
        }
    }
}

/// Records and lists audit entries.
#[derive(Clone)]
pub struct AuditTrail {
    repo: Arc<dyn AuditRepository>,
    roles: Arc<dyn RoleDirectory>,
}

impl AuditTrail {
    pub fn new(repo: Arc<dyn AuditRepository>, roles: Arc<dyn RoleDirectory>) -> Self {
        Self { repo, roles }
    }

    /// Append a record attributed to `viewer`.
    ///
    /// Without a viewer nothing is written and `Ok(None)` is returned.
    pub async fn record(
        &self,
        viewer: Option<&Identity>,
        mut record: NewAuditRecord,
    ) -> Result<Option<Uuid>> {
        let Some(viewer) = viewer else {
            debug!(
                subsystem = "live",
                component = "audit",
                action = %record.action,
                "No viewer, audit record skipped"
            );
            return Ok(None);
        };
        record.actor_id = Some(viewer.viewer_id);
        let action = record.action.clone();
        match self.repo.append(record).await {
            Ok(id) => Ok(Some(id)),
            Err(e) => {
                warn!(
                    subsystem = "live",
                    component = "audit",
                    action = %action,
                    viewer_id = %viewer.viewer_id,
                    error = %e,
                    "Audit append failed"
                );
                Err(e)
            }
        }
    }

    /// Newest-first audit entries. Admins only.
    pub async fn list(&self, viewer: Option<&Identity>, query: &AuditQuery) -> Result<Vec<AuditRecord>> {
        let viewer = viewer.ok_or(Error::Unauthenticated)?;
        if !self.roles.has_role(viewer, Role::Admin).await? {
            return Err(Error::Forbidden("audit log requires the admin role".into()));
        }
        let limit = query
            .limit
            .unwrap_or(AUDIT_PAGE_LIMIT)
            .clamp(1, AUDIT_PAGE_LIMIT);
        let records = self.repo.list(limit).await?;
        Ok(records.into_iter().filter(|r| query.matches(r)).collect())
    }
}

/// Sorted distinct actions, for building a filter menu.
pub fn distinct_actions(records: &[AuditRecord]) -> Vec<String> {
    records
        .iter()
        .map(|r| r.action.clone())
        .collect::<BTreeSet<_>>()
        .into_iter()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn record(action: &str, resource_type: &str, resource_id: Option<&str>) -> AuditRecord {
        AuditRecord {
            id: Uuid::new_v4(),
            actor_id: None,
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: resource_id.map(Into::into),
            old_values: None,
            new_values: None,
            ip_address: None,
            user_agent: None,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_query_search_is_case_insensitive() {
        let query = AuditQuery {
            search: Some("ALERT".into()),
            ..Default::default()
        };
        assert!(query.matches(&record("alert_rule.create", "alert_rule", None)));
        assert!(!query.matches(&record("login", "session", None)));
    }

    #[test]
    fn test_query_search_covers_resource_id() {
        let query = AuditQuery {
            search: Some("abc".into()),
            ..Default::default()
        };
        assert!(query.matches(&record("x", "y", Some("id-ABC-1"))));
    }

    #[test]
    fn test_query_action_filter_is_exact() {
        let query = AuditQuery {
            action: Some("alert_rule.delete".into()),
            ..Default::default()
        };
        assert!(query.matches(&record("alert_rule.delete", "alert_rule", None)));
        assert!(!query.matches(&record("alert_rule.delete_all", "alert_rule", None)));
    }

    #[test]
    fn test_distinct_actions_sorted() {
        let records = vec![
            record("b", "r", None),
            record("a", "r", None),
            record("b", "r", None),
        ];
        assert_eq!(distinct_actions(&records), vec!["a", "b"]);
    }
}
