use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use super::{ApprovalStore, IdentityStore, ProjectStore, Transition};
use crate::models::approval::{ApprovalRequest, ApprovalStatus};
use crate::models::identity::{Identity, Project};
use crate::models::relation::Relation;

const APPROVAL_COLUMNS: &str = "id, project_id, relation, invited_user_id, token, status, \
     created_at, decided_at, notified_at, delivery_attempts, last_attempt_at";

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Run pending migrations from the migrations/ directory.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    async fn current_status(&self, token: &str) -> anyhow::Result<Transition> {
        let status = sqlx::query_scalar::<_, ApprovalStatus>(
            "SELECT status FROM approval_requests WHERE token = $1",
        )
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        Ok(match status {
            Some(s) => Transition::AlreadyDecided(s),
            None => Transition::NotFound,
        })
    }
}

// -- Identity Operations --

#[async_trait]
impl IdentityStore for PgStore {
    async fn find_by_email(&self, email: &str) -> anyhow::Result<Option<Identity>> {
        let row = sqlx::query_as::<_, Identity>(
            "SELECT id, email, first_name, last_name FROM users WHERE lower(email) = lower($1)",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn find_by_id(&self, id: Uuid) -> anyhow::Result<Option<Identity>> {
        let row = sqlx::query_as::<_, Identity>(
            "SELECT id, email, first_name, last_name FROM users WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }
}

// -- Project Operations --

#[async_trait]
impl ProjectStore for PgStore {
    async fn find_project(&self, id: Uuid) -> anyhow::Result<Option<Project>> {
        let row = sqlx::query_as::<_, Project>(
            "SELECT id, name, created_at FROM projects WHERE id = $1",
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn project_exists(&self, id: Uuid) -> anyhow::Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            "SELECT EXISTS(SELECT 1 FROM projects WHERE id = $1)",
        )
        .bind(id)
        .fetch_one(&self.pool)
        .await?;
        Ok(exists)
    }

    async fn attach_user(
        &self,
        project_id: Uuid,
        relation: Relation,
        user_id: Uuid,
    ) -> anyhow::Result<bool> {
        let result = sqlx::query(
            r#"INSERT INTO project_relations (project_id, relation, user_id)
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(project_id)
        .bind(relation)
        .bind(user_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn relation_members(
        &self,
        project_id: Uuid,
        relation: Relation,
    ) -> anyhow::Result<Vec<Identity>> {
        let rows = sqlx::query_as::<_, Identity>(
            r#"SELECT u.id, u.email, u.first_name, u.last_name
               FROM project_relations pr
               JOIN users u ON u.id = pr.user_id
               WHERE pr.project_id = $1 AND pr.relation = $2
               ORDER BY pr.created_at ASC"#,
        )
        .bind(project_id)
        .bind(relation)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }
}

// -- Approval Operations --

#[async_trait]
impl ApprovalStore for PgStore {
    async fn insert_batch(&self, requests: &[ApprovalRequest]) -> anyhow::Result<()> {
        let mut tx = self.pool.begin().await?;
        for req in requests {
            sqlx::query(
                r#"INSERT INTO approval_requests (id, project_id, relation, invited_user_id, token, status, created_at)
                   VALUES ($1, $2, $3, $4, $5, $6, $7)"#,
            )
            .bind(req.id)
            .bind(req.project_id)
            .bind(req.relation)
            .bind(req.invited_user_id)
            .bind(&req.token)
            .bind(req.status)
            .bind(req.created_at)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                tracing::error!("insert_batch insert failed: {:?}", e);
                e
            })?;
        }
        tx.commit().await?;
        Ok(())
    }

    async fn find_by_token(&self, token: &str) -> anyhow::Result<Option<ApprovalRequest>> {
        let row = sqlx::query_as::<_, ApprovalRequest>(&format!(
            "SELECT {APPROVAL_COLUMNS} FROM approval_requests WHERE token = $1"
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row)
    }

    async fn list_for_project(
        &self,
        project_id: Uuid,
        status: Option<ApprovalStatus>,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"SELECT {APPROVAL_COLUMNS} FROM approval_requests
               WHERE project_id = $1 AND ($2::varchar IS NULL OR status = $2)
               ORDER BY created_at ASC"#
        ))
        .bind(project_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn redeem(&self, token: &str) -> anyhow::Result<Transition> {
        let mut tx = self.pool.begin().await?;

        // Row lock + status guard: a concurrent redeemer blocks here and then
        // matches zero rows once this transaction commits.
        let approved = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approval_requests
               SET status = 'approved', decided_at = NOW()
               WHERE token = $1 AND status = 'pending'
               RETURNING {APPROVAL_COLUMNS}"#
        ))
        .bind(token)
        .fetch_optional(&mut *tx)
        .await?;

        let Some(approved) = approved else {
            tx.rollback().await?;
            return self.current_status(token).await;
        };

        sqlx::query(
            r#"INSERT INTO project_relations (project_id, relation, user_id)
               VALUES ($1, $2, $3)
               ON CONFLICT DO NOTHING"#,
        )
        .bind(approved.project_id)
        .bind(approved.relation)
        .bind(approved.invited_user_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(Transition::Applied(approved))
    }

    async fn reject(&self, token: &str) -> anyhow::Result<Transition> {
        let rejected = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"UPDATE approval_requests
               SET status = 'rejected', decided_at = NOW()
               WHERE token = $1 AND status = 'pending'
               RETURNING {APPROVAL_COLUMNS}"#
        ))
        .bind(token)
        .fetch_optional(&self.pool)
        .await?;

        match rejected {
            Some(row) => Ok(Transition::Applied(row)),
            None => self.current_status(token).await,
        }
    }

    async fn mark_notified(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            "UPDATE approval_requests SET notified_at = $1 WHERE id = $2 AND notified_at IS NULL",
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn record_delivery_failure(&self, id: Uuid, at: DateTime<Utc>) -> anyhow::Result<()> {
        sqlx::query(
            r#"UPDATE approval_requests
               SET delivery_attempts = delivery_attempts + 1, last_attempt_at = $1
               WHERE id = $2"#,
        )
        .bind(at)
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_undelivered(
        &self,
        created_before: DateTime<Utc>,
        max_attempts: i32,
        limit: i64,
    ) -> anyhow::Result<Vec<ApprovalRequest>> {
        let rows = sqlx::query_as::<_, ApprovalRequest>(&format!(
            r#"SELECT {APPROVAL_COLUMNS} FROM approval_requests
               WHERE status = 'pending' AND notified_at IS NULL
                 AND delivery_attempts < $2 AND created_at < $1
               ORDER BY last_attempt_at ASC NULLS FIRST, created_at ASC
               LIMIT $3"#
        ))
        .bind(created_before)
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows)
    }

    async fn ping(&self) -> anyhow::Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }
}
