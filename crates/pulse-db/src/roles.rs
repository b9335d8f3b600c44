//! Role lookup against the `user_roles` table.

use async_trait::async_trait;
use sqlx::{Pool, Postgres, Row};

use pulse_core::{Error, Identity, Result, Role, RoleDirectory};

/// PostgreSQL role directory.
pub struct PgRoleDirectory {
    pool: Pool<Postgres>,
}

impl PgRoleDirectory {
    pub fn new(pool: Pool<Postgres>) -> Self {
        Self { pool }
    }

    /// Grant a role. Granting twice is a no-op.
    pub async fn grant(&self, identity: &Identity, role: Role) -> Result<()> {
        sqlx::query(
            "INSERT INTO user_roles (user_id, role) VALUES ($1, $2)
             ON CONFLICT (user_id, role) DO NOTHING",
        )
        .bind(identity.viewer_id)
        .bind(role.as_str())
        .execute(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(())
    }
}

#[async_trait]
impl RoleDirectory for PgRoleDirectory {
    async fn has_role(&self, identity: &Identity, role: Role) -> Result<bool> {
        let row = sqlx::query(
            "SELECT EXISTS(SELECT 1 FROM user_roles WHERE user_id = $1 AND role = $2) AS present",
        )
        .bind(identity.viewer_id)
        .bind(role.as_str())
        .fetch_one(&self.pool)
        .await
        .map_err(Error::Database)?;
        Ok(row.get("present"))
    }
}
