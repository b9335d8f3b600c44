//! Append-only audit log backed by the `audit_logs` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use pulse_core::{AuditRecord, AuditRepository, Error, NewAuditRecord, Result};

/// PostgreSQL audit repository.
pub struct PgAuditRepository {
    pool: Pool<Postgres>,
}

impl PgAuditRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> AuditRecord {
        AuditRecord {
            id: row.get("id"),
            actor_id: row.get("user_id"),
            action: row.get("action"),
            resource_type: row.get("resource_type"),
            resource_id: row.get("resource_id"),
            old_values: row.get("old_values"),
            new_values: row.get("new_values"),
            ip_address: row.get("ip_address"),
            user_agent: row.get("user_agent"),
            created_at: row.get("created_at"),
        }
    }
}

#[async_trait]
impl AuditRepository for PgAuditRepository {
    async fn append(&self, record: NewAuditRecord) -> Result<Uuid> {
        let id = Uuid::now_v7();
        sqlx::query(
            "INSERT INTO audit_logs
                (id, user_id, action, resource_type, resource_id, old_values, new_values,
                 ip_address, user_agent, created_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)",
        )
        .bind(id)
        .bind(record.actor_id)
        .bind(&record.action)
        .bind(&record.resource_type)
        .bind(&record.resource_id)
        .bind(&record.old_values)
        .bind(&record.new_values)
        .bind(&record.ip_address)
        .bind(&record.user_agent)
        .bind(Utc::now())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(id)
    }

    async fn list(&self, limit: i64) -> Result<Vec<AuditRecord>> {
        let rows = sqlx::query(
            "SELECT id, user_id, action, resource_type, resource_id, old_values, new_values,
                    ip_address, user_agent, created_at
             FROM audit_logs
             ORDER BY created_at DESC, id DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_fixtures::test_database_url;
    use sqlx::postgres::PgPoolOptions;

    #[tokio::test]
    #[ignore = "requires PostgreSQL"]
    async fn test_append_then_list() {
        let url = test_database_url();
        let pool = PgPoolOptions::new()
            .max_connections(2)
            .connect(&url)
            .await
            .expect("Failed to connect to test database");
        let repo = PgAuditRepository::new(pool);

        let mut record = NewAuditRecord::new("alert.delete", "alert_rule")
            .resource(Uuid::new_v4())
            .old_values(serde_json::json!({"name": "Old"}));
        record.actor_id = Some(Uuid::new_v4());
        let id = repo.append(record).await.unwrap();

        let listed = repo.list(200).await.unwrap();
        let found = listed.iter().find(|r| r.id == id).expect("record listed");
        assert_eq!(found.action, "alert.delete");
        assert_eq!(found.old_values.as_ref().unwrap()["name"], "Old");
    }
}
