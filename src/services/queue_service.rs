//! services/queue_service.rs
//! Cola de trabajos sobre SQLite: entrega at-least-once con lease, reintentos
//! con backoff exponencial y dead-letter inspeccionable.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::config::engine_config::EngineConfig;
use crate::models::{
    queue_model::{DeadLetter, FailureDisposition, JobKind, QueueJob},
    ts,
};

#[derive(Clone, Debug)]
pub struct QueueService {
    db_pool: Pool<Sqlite>,
    max_attempts: i64,
    retry_base_delay: Duration,
    retry_max_delay: Duration,
}

/// Jobs abiertos (`pending`/`running`) de un tipo para una campaña.
pub async fn count_open_of_kind_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    kind: JobKind,
) -> Result<i64> {
    let (count,): (i64,) = sqlx::query_as(
        r#"
        SELECT COUNT(*) FROM jobs
        WHERE campaign_id = ?1 AND kind = ?2 AND status IN ('pending', 'running')
        "#,
    )
    .bind(campaign_id)
    .bind(kind.as_str())
    .fetch_one(conn)
    .await
    .context("Failed to count open jobs")?;
    Ok(count)
}

/// Inserta un job usando la conexión dada (para enqueues dentro de una transacción).
pub async fn enqueue_in(
    conn: &mut SqliteConnection,
    kind: JobKind,
    campaign_id: &str,
    payload: &str,
    max_attempts: i64,
    run_at: DateTime<Utc>,
) -> Result<String> {
    let job_id = Uuid::new_v4().to_string();
    let now = ts(Utc::now());

    sqlx::query(
        r#"
        INSERT INTO jobs (
            id, kind, campaign_id, payload, status, attempts,
            max_attempts, run_at, created_at, updated_at
        )
        VALUES (?1, ?2, ?3, ?4, 'pending', 0, ?5, ?6, ?7, ?7)
        "#,
    )
    .bind(&job_id)
    .bind(kind.as_str())
    .bind(campaign_id)
    .bind(payload)
    .bind(max_attempts)
    .bind(ts(run_at))
    .bind(now)
    .execute(conn)
    .await
    .context("Failed to enqueue job")?;

    Ok(job_id)
}

impl QueueService {
    pub fn new(db_pool: Pool<Sqlite>, config: &EngineConfig) -> Self {
        QueueService {
            db_pool,
            max_attempts: config.job_max_attempts,
            retry_base_delay: Duration::seconds(config.retry_base_delay_secs),
            retry_max_delay: Duration::seconds(config.retry_max_delay_secs),
        }
    }

    pub fn max_attempts(&self) -> i64 {
        self.max_attempts
    }

    pub async fn enqueue(
        &self,
        kind: JobKind,
        campaign_id: &str,
        payload: &str,
        run_at: DateTime<Utc>,
    ) -> Result<String> {
        let mut conn = self.db_pool.acquire().await?;
        enqueue_in(&mut *conn, kind, campaign_id, payload, self.max_attempts, run_at).await
    }

    /// Reclama el siguiente job listo (`run_at <= now`). El UPDATE ... RETURNING
    /// es atómico: dos workers nunca reclaman el mismo job.
    pub async fn claim_next(&self, now: DateTime<Utc>) -> Result<Option<QueueJob>> {
        let now_s = ts(now);
        let row = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'running',
                attempts = attempts + 1,
                locked_at = ?1,
                updated_at = ?1
            WHERE id = (
                SELECT id FROM jobs
                WHERE status = 'pending' AND run_at <= ?1
                ORDER BY run_at, created_at
                LIMIT 1
            )
            RETURNING id, kind, campaign_id, payload, attempts, max_attempts
            "#,
        )
        .bind(&now_s)
        .fetch_optional(&self.db_pool)
        .await
        .context("Failed to claim job")?;

        row.as_ref().map(QueueJob::from_row).transpose()
    }

    /// Éxito (o fallo permanente ya absorbido): el job sale de la cola.
    pub async fn complete(&self, job_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM jobs WHERE id = ?1")
            .bind(job_id)
            .execute(&self.db_pool)
            .await
            .context("Failed to complete job")?;
        Ok(())
    }

    /// Falla de un intento: se reprograma con backoff o pasa a dead-letter.
    pub async fn fail(
        &self,
        job: &QueueJob,
        error: &str,
        now: DateTime<Utc>,
    ) -> Result<FailureDisposition> {
        if job.is_last_attempt() {
            sqlx::query(
                r#"
                UPDATE jobs
                SET status = 'dead', last_error = ?2, locked_at = NULL, updated_at = ?3
                WHERE id = ?1
                "#,
            )
            .bind(&job.id)
            .bind(error)
            .bind(ts(now))
            .execute(&self.db_pool)
            .await
            .context("Failed to dead-letter job")?;
            return Ok(FailureDisposition::DeadLettered);
        }

        let run_at = now + self.backoff_for(job.attempts);
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', last_error = ?2, run_at = ?3,
                locked_at = NULL, updated_at = ?4
            WHERE id = ?1
            "#,
        )
        .bind(&job.id)
        .bind(error)
        .bind(ts(run_at))
        .bind(ts(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to reschedule job")?;

        Ok(FailureDisposition::Retrying { run_at })
    }

    /// Reprograma sin consumir intento (p.ej. remitente sin capacidad hoy).
    pub async fn defer(&self, job_id: &str, delay: Duration, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending',
                attempts = MAX(attempts - 1, 0),
                run_at = ?2,
                locked_at = NULL,
                updated_at = ?3
            WHERE id = ?1
            "#,
        )
        .bind(job_id)
        .bind(ts(now + delay))
        .bind(ts(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to defer job")?;
        Ok(())
    }

    /// `base * 2^(attempt-1)`, acotado por `retry_max_delay`.
    pub fn backoff_for(&self, attempt: i64) -> Duration {
        let exp = (attempt - 1).clamp(0, 20) as u32;
        let secs = self
            .retry_base_delay
            .num_seconds()
            .saturating_mul(2_i64.saturating_pow(exp));
        Duration::seconds(secs).min(self.retry_max_delay)
    }

    /// Jobs pendientes o en vuelo de una campaña (introspección para el sweeper).
    pub async fn count_open_for_campaign(&self, campaign_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM jobs WHERE campaign_id = ?1 AND status IN ('pending', 'running')",
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(count)
    }

    /// Devuelve a `pending` los jobs cuyo lease venció (worker caído).
    pub async fn release_stale(&self, now: DateTime<Utc>, lease: Duration) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', locked_at = NULL, run_at = ?2, updated_at = ?2
            WHERE status = 'running' AND locked_at < ?1
            "#,
        )
        .bind(ts(now - lease))
        .bind(ts(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to release stale jobs")?;
        Ok(result.rows_affected())
    }

    pub async fn list_dead_letters(&self, limit: i64) -> Result<Vec<DeadLetter>> {
        let rows = sqlx::query(
            r#"
            SELECT id, kind, campaign_id, payload, attempts, last_error, updated_at
            FROM jobs
            WHERE status = 'dead'
            ORDER BY updated_at DESC
            LIMIT ?1
            "#,
        )
        .bind(limit)
        .fetch_all(&self.db_pool)
        .await?;

        rows.iter().map(DeadLetter::from_row).collect()
    }

    /// Reencola un dead-letter con el presupuesto de intentos completo.
    pub async fn requeue_dead_letter(&self, job_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE jobs
            SET status = 'pending', attempts = 0, run_at = ?2, updated_at = ?2
            WHERE id = ?1 AND status = 'dead'
            "#,
        )
        .bind(job_id)
        .bind(ts(now))
        .execute(&self.db_pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    /// Purga explícita de los jobs pendientes de una campaña (no toca los que
    /// están en vuelo).
    pub async fn purge_campaign(&self, campaign_id: &str) -> Result<u64> {
        let result = sqlx::query("DELETE FROM jobs WHERE campaign_id = ?1 AND status = 'pending'")
            .bind(campaign_id)
            .execute(&self.db_pool)
            .await?;
        Ok(result.rows_affected())
    }
}
