//! Transactional `JobQueue` over `sqlx::Any` (§6.4): the same schema and
//! query set runs against SQLite or Postgres, selected at runtime by the
//! pool's connection URL scheme and the `sqlite`/`postgres` Cargo features.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::any::{AnyPoolOptions, AnyRow};
use sqlx::{AnyPool, Row};

use super::{Job, JobId, JobQueue, JobStatus, JobType};
use crate::error::Result;

pub struct SqlxJobQueue {
    pool: AnyPool,
}

impl SqlxJobQueue {
    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = AnyPoolOptions::new().max_connections(8).connect(database_url).await?;
        let queue = Self { pool };
        queue.migrate().await?;
        Ok(queue)
    }

    pub fn from_pool(pool: AnyPool) -> Self {
        Self { pool }
    }

    /// Creates the §6.4 schema if absent. Timestamps are stored as RFC3339
    /// text and payload/result as blobs, so the same statements are valid
    /// against both the SQLite and Postgres `Any` drivers.
    async fn migrate(&self) -> Result<()> {
        sqlx::query(
            "CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                type TEXT NOT NULL,
                status TEXT NOT NULL,
                priority INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                payload BLOB NOT NULL,
                result BLOB,
                error TEXT
            )",
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            "CREATE TABLE IF NOT EXISTS job_dependencies (
                job_id TEXT NOT NULL,
                depends_on_id TEXT NOT NULL,
                PRIMARY KEY (job_id, depends_on_id)
            )",
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn all_dependencies_completed(tx: &mut sqlx::Transaction<'_, sqlx::Any>, job_id: JobId) -> Result<bool> {
        let row = sqlx::query(
            "SELECT COUNT(*) as remaining FROM job_dependencies d
             JOIN jobs j ON j.id = d.depends_on_id
             WHERE d.job_id = ? AND j.status != 'completed'",
        )
        .bind(job_id.to_string())
        .fetch_one(&mut **tx)
        .await?;
        let remaining: i64 = row.try_get("remaining")?;
        Ok(remaining == 0)
    }

    async fn unblock_dependents(tx: &mut sqlx::Transaction<'_, sqlx::Any>, completed_id: JobId) -> Result<()> {
        let rows = sqlx::query("SELECT job_id FROM job_dependencies WHERE depends_on_id = ?")
            .bind(completed_id.to_string())
            .fetch_all(&mut **tx)
            .await?;

        for row in rows {
            let dependent_id: String = row.try_get("job_id")?;
            let dependent_id = JobId::parse_str(&dependent_id).map_err(|e| crate::error::Error::Storage(e.to_string()))?;
            if Self::all_dependencies_completed(tx, dependent_id).await? {
                sqlx::query("UPDATE jobs SET status = 'pending', updated_at = ? WHERE id = ? AND status = 'blocked'")
                    .bind(Utc::now().to_rfc3339())
                    .bind(dependent_id.to_string())
                    .execute(&mut **tx)
                    .await?;
            }
        }
        Ok(())
    }
}

fn row_to_job(row: AnyRow) -> Result<Job> {
    let id: String = row.try_get("id")?;
    let job_type: String = row.try_get("type")?;
    let status: String = row.try_get("status")?;
    let created_at: String = row.try_get("created_at")?;
    let updated_at: String = row.try_get("updated_at")?;

    Ok(Job {
        id: JobId::parse_str(&id).map_err(|e| crate::error::Error::Storage(e.to_string()))?,
        job_type: JobType::parse(&job_type)?,
        status: JobStatus::parse(&status)?,
        priority: row.try_get::<i32, _>("priority")?,
        created_at: parse_rfc3339(&created_at)?,
        updated_at: parse_rfc3339(&updated_at)?,
        payload: row.try_get("payload")?,
        result: row.try_get("result")?,
        error: row.try_get("error")?,
    })
}

fn parse_rfc3339(s: &str) -> Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| crate::error::Error::Storage(e.to_string()))
}

#[async_trait]
impl JobQueue for SqlxJobQueue {
    async fn add(&self, mut job: Job, deps: Vec<JobId>) -> Result<()> {
        job.status = if deps.is_empty() { JobStatus::Pending } else { JobStatus::Blocked };
        let mut tx = self.pool.begin().await?;

        sqlx::query(
            "INSERT INTO jobs (id, type, status, priority, created_at, updated_at, payload, result, error)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
        )
        .bind(job.id.to_string())
        .bind(job.job_type.as_str())
        .bind(job.status.as_str())
        .bind(job.priority)
        .bind(job.created_at.to_rfc3339())
        .bind(job.updated_at.to_rfc3339())
        .bind(job.payload.clone())
        .bind(job.result.clone())
        .bind(job.error.clone())
        .execute(&mut *tx)
        .await?;

        for depends_on_id in deps {
            sqlx::query("INSERT INTO job_dependencies (job_id, depends_on_id) VALUES (?, ?)")
                .bind(job.id.to_string())
                .bind(depends_on_id.to_string())
                .execute(&mut *tx)
                .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn claim_next_ready(&self) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE jobs SET status = 'running', updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs WHERE status = 'pending'
                 ORDER BY priority DESC, created_at ASC LIMIT 1
             )
             RETURNING *",
        )
        .bind(Utc::now().to_rfc3339())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        row.map(row_to_job).transpose()
    }

    async fn claim_next_ready_of_type(&self, job_type: JobType) -> Result<Option<Job>> {
        let mut tx = self.pool.begin().await?;
        let row = sqlx::query(
            "UPDATE jobs SET status = 'running', updated_at = ?
             WHERE id = (
                 SELECT id FROM jobs WHERE status = 'pending' AND type = ?
                 ORDER BY priority DESC, created_at ASC LIMIT 1
             )
             RETURNING *",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(job_type.as_str())
        .fetch_optional(&mut *tx)
        .await?;
        tx.commit().await?;
        row.map(row_to_job).transpose()
    }

    async fn update(&self, job: Job) -> Result<()> {
        let mut tx = self.pool.begin().await?;

        let existing = sqlx::query("SELECT status FROM jobs WHERE id = ?")
            .bind(job.id.to_string())
            .fetch_optional(&mut *tx)
            .await?;
        if let Some(row) = existing {
            let status: String = row.try_get("status")?;
            if JobStatus::parse(&status)?.is_terminal() {
                // §3.3 invariant: terminal states never transition back; repeating
                // an update on an already-terminal job is a silent no-op.
                tx.commit().await?;
                return Ok(());
            }
        }

        sqlx::query(
            "UPDATE jobs SET status = ?, result = ?, error = ?, updated_at = ? WHERE id = ?",
        )
        .bind(job.status.as_str())
        .bind(job.result.clone())
        .bind(job.error.clone())
        .bind(Utc::now().to_rfc3339())
        .bind(job.id.to_string())
        .execute(&mut *tx)
        .await?;

        if job.status == JobStatus::Completed {
            Self::unblock_dependents(&mut tx, job.id).await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn get(&self, id: JobId) -> Result<Option<Job>> {
        let row = sqlx::query("SELECT * FROM jobs WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;
        row.map(row_to_job).transpose()
    }

    async fn cancel(&self, id: JobId) -> Result<()> {
        sqlx::query(
            "UPDATE jobs SET status = 'cancelled', updated_at = ?
             WHERE id = ? AND status IN ('pending', 'blocked', 'running')",
        )
        .bind(Utc::now().to_rfc3339())
        .bind(id.to_string())
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}
