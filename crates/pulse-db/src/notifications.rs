//! Notification repository backed by the `notifications` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use tracing::debug;
use uuid::Uuid;

use pulse_core::{
    Error, InsightCategory, NewNotification, Notification, NotificationRepository,
    NotificationUpdate, Result, Severity, ViewerScope,
};

const COLUMNS: &str = "id, owner_id, insight_type, severity, title, description, data,
                       is_read, is_dismissed, created_at";

/// PostgreSQL notification repository.
pub struct PgNotificationRepository {
    pool: Pool<Postgres>,
}

impl PgNotificationRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Notification {
        let severity: Option<String> = row.get("severity");
        let category: String = row.get("insight_type");
        Notification {
            id: row.get("id"),
            owner_id: row.get("owner_id"),
            category: InsightCategory::parse(&category),
            severity: Severity::parse(severity.as_deref()),
            title: row.get("title"),
            description: row.get("description"),
            data: row.get("data"),
            is_read: row.get("is_read"),
            is_dismissed: row.get("is_dismissed"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl NotificationRepository for PgNotificationRepository {
    async fn fetch_active(&self, scope: ViewerScope, limit: i64) -> Result<Vec<Notification>> {
        let sql = format!(
            "SELECT {COLUMNS} FROM notifications
             WHERE owner_id = $1 AND is_dismissed = false
             ORDER BY created_at DESC, id DESC
             LIMIT $2"
        );
        let rows = sqlx::query(&sql)
            .bind(scope.owner_id())
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn update(
        &self,
        scope: ViewerScope,
        id: Uuid,
        update: NotificationUpdate,
    ) -> Result<()> {
        // Flags only move to true, so re-applying is harmless.
        let sql = match update {
            NotificationUpdate::MarkRead => {
                "UPDATE notifications SET is_read = true
                 WHERE id = $1 AND owner_id = $2 RETURNING id"
            }
            NotificationUpdate::Dismiss => {
                "UPDATE notifications SET is_dismissed = true
                 WHERE id = $1 AND owner_id = $2 RETURNING id"
            }
        };
        let row = sqlx::query(sql)
            .bind(id)
            .bind(scope.owner_id())
            .fetch_optional(&self.pool)
            .await
            .map_err(Error::Database)?;

        if row.is_none() {
            return Err(Error::not_found("notification", id));
        }
        debug!(
            subsystem = "db",
            component = "notifications",
            op = update.as_str(),
            notification_id = %id,
            "Notification updated"
        );
        Ok(())
    }

    async fn mark_all_read(&self, scope: ViewerScope) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE notifications SET is_read = true
             WHERE owner_id = $1 AND is_read = false AND is_dismissed = false",
        )
        .bind(scope.owner_id())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(result.rows_affected())
    }

    async fn insert(&self, req: NewNotification) -> Result<Notification> {
        let id = Uuid::now_v7();
        let sql = format!(
            "INSERT INTO notifications
                (id, owner_id, insight_type, severity, title, description, data, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             RETURNING {COLUMNS}"
        );
        let row = sqlx::query(&sql)
            .bind(id)
            .bind(req.owner_id)
            .bind(&req.category)
            .bind(&req.severity)
            .bind(&req.title)
            .bind(&req.description)
            .bind(req.data.unwrap_or_else(|| serde_json::json!({})))
            .bind(Utc::now())
            .fetch_one(&self.pool)
            .await
            .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::test_database_url;
    use sqlx::postgres::PgPoolOptions;

    async fn setup() -> PgNotificationRepository {
        let url = test_database_url();
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("Failed to connect to test database");
        PgNotificationRepository::new(pool)
    }

    fn sample(owner: Uuid, title: &str) -> NewNotification {
        NewNotification {
            owner_id: owner,
            category: "anomaly".to_string(),
            severity: Some("warning".to_string()),
            title: title.to_string(),
            description: "test".to_string(),
            data: None,
        }
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_insert_and_fetch_active() {
        let repo = setup().await;
        let owner = Uuid::new_v4();
        let n = repo.insert(sample(owner, "first")).await.unwrap();
        assert_eq!(n.category, InsightCategory::Anomaly);
        assert_eq!(n.severity, Severity::Warning);

        let active = repo.fetch_active(ViewerScope(owner), 50).await.unwrap();
        assert_eq!(active.len(), 1);
        assert_eq!(active[0].id, n.id);
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_dismiss_hides_from_fetch() {
        let repo = setup().await;
        let owner = Uuid::new_v4();
        let n = repo.insert(sample(owner, "gone")).await.unwrap();
        repo.update(ViewerScope(owner), n.id, NotificationUpdate::Dismiss)
            .await
            .unwrap();
        // Idempotent.
        repo.update(ViewerScope(owner), n.id, NotificationUpdate::Dismiss)
            .await
            .unwrap();
        assert!(repo
            .fetch_active(ViewerScope(owner), 50)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_update_outside_scope_is_not_found() {
        let repo = setup().await;
        let owner = Uuid::new_v4();
        let n = repo.insert(sample(owner, "mine")).await.unwrap();
        let err = repo
            .update(ViewerScope(Uuid::new_v4()), n.id, NotificationUpdate::MarkRead)
            .await
            .unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_mark_all_read_scoped() {
        let repo = setup().await;
        let a = Uuid::new_v4();
        let b = Uuid::new_v4();
        repo.insert(sample(a, "a1")).await.unwrap();
        repo.insert(sample(a, "a2")).await.unwrap();
        repo.insert(sample(b, "b1")).await.unwrap();

        assert_eq!(repo.mark_all_read(ViewerScope(a)).await.unwrap(), 2);
        let b_rows = repo.fetch_active(ViewerScope(b), 50).await.unwrap();
        assert!(!b_rows[0].is_read);
    }
}
