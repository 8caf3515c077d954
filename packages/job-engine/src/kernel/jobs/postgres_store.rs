//! PostgreSQL-backed job record store.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use uuid::Uuid;

use super::job::{JobRecord, JobUpdate};
use super::store::JobStore;

/// Job store backed by the `job_records` table.
pub struct PostgresJobStore {
    pool: PgPool,
}

impl PostgresJobStore {
    /// Wrap an existing pool.
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Connect to `database_url` with a small dedicated pool.
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(5)
            .connect(database_url)
            .await
            .context("Failed to connect to job store database")?;

        Ok(Self::new(pool))
    }

    /// Apply the bundled migrations.
    pub async fn migrate(&self) -> Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .context("Failed to run job store migrations")?;

        Ok(())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl JobStore for PostgresJobStore {
    async fn insert(&self, record: &JobRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO job_records (
                id, name, status, created_at, started_at, completed_at, last_updated_at, error_message
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(record.id)
        .bind(&record.name)
        .bind(record.status)
        .bind(record.created_at)
        .bind(record.started_at)
        .bind(record.completed_at)
        .bind(record.last_updated_at)
        .bind(&record.error_message)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to insert job {}", record.id))?;

        Ok(())
    }

    async fn exists_active(&self, name: &str) -> Result<bool> {
        let exists = sqlx::query_scalar::<_, bool>(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM job_records
                WHERE name = $1
                  AND status IN ('pending', 'running')
            )
            "#,
        )
        .bind(name)
        .fetch_one(&self.pool)
        .await
        .context("Failed to check for active jobs")?;

        Ok(exists)
    }

    async fn update(&self, id: Uuid, update: &JobUpdate) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE job_records
            SET status = COALESCE($2, status),
                started_at = COALESCE($3, started_at),
                completed_at = COALESCE($4, completed_at),
                last_updated_at = GREATEST(COALESCE($5, last_updated_at), created_at),
                error_message = COALESCE($6, error_message)
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(update.status)
        .bind(update.started_at)
        .bind(update.completed_at)
        .bind(update.last_updated_at)
        .bind(&update.error_message)
        .execute(&self.pool)
        .await
        .with_context(|| format!("Failed to update job {}", id))?;

        if result.rows_affected() == 0 {
            bail!("job {} not found", id);
        }

        Ok(())
    }

    async fn get(&self, id: Uuid) -> Result<Option<JobRecord>> {
        let record = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, name, status, created_at, started_at, completed_at, last_updated_at, error_message
            FROM job_records
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .with_context(|| format!("Failed to load job {}", id))?;

        Ok(record)
    }

    async fn list(&self) -> Result<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, name, status, created_at, started_at, completed_at, last_updated_at, error_message
            FROM job_records
            ORDER BY created_at DESC, id DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list jobs")?;

        Ok(records)
    }

    async fn list_active(&self) -> Result<Vec<JobRecord>> {
        let records = sqlx::query_as::<_, JobRecord>(
            r#"
            SELECT id, name, status, created_at, started_at, completed_at, last_updated_at, error_message
            FROM job_records
            WHERE status IN ('pending', 'running')
            ORDER BY created_at ASC, id ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .context("Failed to list active jobs")?;

        Ok(records)
    }
}
