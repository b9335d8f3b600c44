//! Alert rule repository backed by the `alert_rules` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use pulse_core::{
    AlertChannel, AlertCondition, AlertRule, AlertRuleRepository, Error, MetricType, Result,
    UpdateAlertRuleRequest, ValidAlertRule, ViewerScope,
};

const COLUMNS: &str = "id, owner_id, name, metric_type, condition, threshold, is_active,
                       channels, last_triggered_at, created_at, updated_at";

fn channel_tags(channels: &[AlertChannel]) -> Vec<String> {
    channels.iter().map(|c| c.as_str().to_string()).collect()
}

/// PostgreSQL alert rule repository.
pub struct PgAlertRuleRepository {
    pool: Pool<Postgres>,
}

impl PgAlertRuleRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> AlertRule {
        let metric: String = row.get("metric_type");
        let condition: String = row.get("condition");
        let channels: Vec<String> = row.get("channels");
        AlertRule {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            name: row.get("name"),
            metric_type: MetricType::parse_lossy(&metric),
            condition: AlertCondition::parse_lossy(&condition),
            threshold: row.get("threshold"),
            is_active: row.get("is_active"),
            channels: AlertChannel::normalize(
                channels
                    .iter()
                    .filter_map(|c| AlertChannel::parse(c))
                    .collect(),
            ),
            last_triggered_at: row.get("last_triggered_at"),
            created_at: row.get("created_at"),
            updated_at: row.get("updated_at"),
        }
    }
}

#[async_trait]
impl AlertRuleRepository for PgAlertRuleRepository {
    async fn list(&self, scope: ViewerScope) -> Result<Vec<AlertRule>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM alert_rules
             WHERE owner_id = $1
             ORDER BY created_at DESC, id DESC"
        );
        let rows = sqlx::query(&sql)
            .bind(scope.owner_id())
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn get(&self, scope: ViewerScope, id: Uuid) -> Result<Option<AlertRule>> {
        let sql = format!("SELECT {COLUMNS} FROM alert_rules WHERE id = $1 AND owner_id = $2");
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(scope.owner_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn create(&self, scope: ViewerScope, rule: ValidAlertRule) -> Result<AlertRule> {
        let now = Utc::now();
        let sql = format!(
            "INSERT INTO alert_rules
                (id, owner_id, name, metric_type, condition, threshold, is_active,
                 channels, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, true, $7, $8, $8)
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(Uuid::now_v7())
            .bind(scope.owner_id())
            .bind(&rule.name)
            .bind(rule.metric_type.as_str())
            .bind(rule.condition.as_str())
            .bind(rule.threshold)
            .bind(channel_tags(&rule.channels))
            .bind(now)
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }

    async fn update(
        &self,
        scope: ViewerScope,
        id: Uuid,
        req: UpdateAlertRuleRequest,
    ) -> Result<AlertRule> {
        let sql = format!(
            "UPDATE alert_rules SET
                name = COALESCE($1, name),
                threshold = COALESCE($2, threshold),
                is_active = COALESCE($3, is_active),
                channels = COALESCE($4, channels),
                updated_at = $5
             WHERE id = $6 AND owner_id = $7
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(req.name.as_deref())
            .bind(req.threshold)
            .bind(req.is_active)
            .bind(req.channels.as_deref().map(channel_tags))
            .bind(Utc::now())
            .bind(id)
            .bind(scope.owner_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        row.as_ref()
            .map(Self::parse_row)
            .ok_or_else(|| Error::not_found("alert rule", id))
    }

    async fn delete(&self, scope: ViewerScope, id: Uuid) -> Result<()> {
        let result = sqlx::query("DELETE FROM alert_rules WHERE id = $1 AND owner_id = $2")
            .bind(id)
            .bind(scope.owner_id())
            .execute(&self.pool)
            .await
            .map_err(Error::Database)?;

        if result.rows_affected() == 0 {
            return Err(Error::not_found("alert rule", id));
        }
        Ok(())
    }
}
