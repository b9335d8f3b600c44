//! Analytics event repository backed by the `analytics_events` table.

use async_trait::async_trait;
use chrono::Utc;
use sqlx::{postgres::PgRow, Pool, Postgres, Row};
use uuid::Uuid;

use pulse_core::{Error, Event, EventKind, EventRepository, NewEvent, Result};

/// PostgreSQL analytics event repository.
pub struct PgEventRepository {
    pool: Pool<Postgres>,
}

impl PgEventRepository {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    fn parse_row(row: &PgRow) -> Event {
        let kind: String = row.get("event_type");
        Event {
            id: row.get("id"),
            kind: EventKind::parse(&kind),
            occurred_at: row.get("created_at"),
            page_path: row.get("page_path"),
            session_id: row.get("session_id"),
            context: row.get("payload"),
        }
    }
}

#[async_trait]
impl EventRepository for PgEventRepository {
    async fn fetch_recent(&self, limit: i64) -> Result<Vec<Event>> {
        let rows = sqlx::query(
            "SELECT id, event_type, page_path, session_id, payload, created_at
             FROM analytics_events
             ORDER BY created_at DESC, id DESC
             LIMIT $1",
        )
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(rows.iter().map(Self::parse_row).collect())
    }

    async fn fetch_by_id(&self, id: Uuid) -> Result<Option<Event>> {
        let row = sqlx::query(
            "SELECT id, event_type, page_path, session_id, payload, created_at
             FROM analytics_events
             WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(row.as_ref().map(Self::parse_row))
    }

    async fn insert(&self, req: NewEvent) -> Result<Event> {
        let row = sqlx::query(
            "INSERT INTO analytics_events (id, event_type, page_path, session_id, payload, created_at)
             VALUES ($1, $2, $3, $4, $5, $6)
             RETURNING id, event_type, page_path, session_id, payload, created_at",
        )
        .bind(Uuid::now_v7())
        .bind(&req.kind)
        .bind(&req.page_path)
        .bind(req.session_id)
        .bind(req.context.unwrap_or_else(|| serde_json::json!({})))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;

        Ok(Self::parse_row(&row))
    }
}
