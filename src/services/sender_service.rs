//! services/sender_service.rs
//! Remitentes: perfiles SMTP, capacidad diaria y contadores de uso por día.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::errors::{EngineError, EngineResult};
use crate::models::{
    day_key,
    sender_model::{CreateSenderRequest, SenderBudget, SenderCapacity, SenderProfile},
    ts,
};

const DEFAULT_MAX_DAILY_LIMIT: i64 = 500;
const DEFAULT_MANUAL_INCREASE_PCT: i64 = 10;

const PROFILE_COLUMNS: &str =
    "id, owner_id, from_address, smtp_host, smtp_port, smtp_user, smtp_pass, active";
const CAPACITY_COLUMNS: &str = "id, current_daily_limit, max_daily_limit, training_mode, \
    manual_daily_increase_pct, last_trained_at";

#[derive(Clone, Debug)]
pub struct SenderService {
    db_pool: Pool<Sqlite>,
}

impl SenderService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        SenderService { db_pool }
    }

    pub async fn create_sender(&self, req: CreateSenderRequest) -> EngineResult<SenderProfile> {
        let max_limit = req.max_daily_limit.unwrap_or(DEFAULT_MAX_DAILY_LIMIT);
        if req.current_daily_limit < 0 || req.current_daily_limit > max_limit {
            return Err(EngineError::Validation(format!(
                "current_daily_limit must be between 0 and {max_limit}"
            )));
        }
        let pct = req
            .manual_daily_increase_pct
            .unwrap_or(DEFAULT_MANUAL_INCREASE_PCT);
        if pct < 0 {
            return Err(EngineError::Validation(
                "manual_daily_increase_pct must be >= 0".to_string(),
            ));
        }

        let sender_id = Uuid::new_v4().to_string();
        let now = ts(Utc::now());
        sqlx::query(
            r#"
            INSERT INTO senders (
                id, owner_id, from_address, smtp_host, smtp_port, smtp_user, smtp_pass,
                active, current_daily_limit, max_daily_limit, training_mode,
                manual_daily_increase_pct, last_trained_at, created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, 1, ?8, ?9, ?10, ?11, NULL, ?12, ?12)
            "#,
        )
        .bind(&sender_id)
        .bind(&req.owner_id)
        .bind(&req.from_address)
        .bind(&req.smtp_host)
        .bind(i64::from(req.smtp_port))
        .bind(&req.smtp_user)
        .bind(&req.smtp_pass)
        .bind(req.current_daily_limit)
        .bind(max_limit)
        .bind(req.training_mode.map(|m| m.as_str()))
        .bind(pct)
        .bind(&now)
        .execute(&self.db_pool)
        .await?;

        log::info!("(create_sender) Remitente {} creado ({})", sender_id, req.from_address);
        self.get_profile(&sender_id).await
    }

    pub async fn get_profile(&self, sender_id: &str) -> EngineResult<SenderProfile> {
        let sql = format!("SELECT {PROFILE_COLUMNS} FROM senders WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(sender_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| EngineError::SenderNotFound(sender_id.to_string()))?;
        Ok(SenderProfile::from_row(&row)?)
    }

    pub async fn get_capacity(&self, sender_id: &str) -> EngineResult<SenderCapacity> {
        let sql = format!("SELECT {CAPACITY_COLUMNS} FROM senders WHERE id = ?1");
        let row = sqlx::query(&sql)
            .bind(sender_id)
            .fetch_optional(&self.db_pool)
            .await?
            .ok_or_else(|| EngineError::SenderNotFound(sender_id.to_string()))?;
        Ok(SenderCapacity::from_row(&row)?)
    }

    /// Remitentes activos que no tienen el entrenamiento deshabilitado
    /// explícitamente (los `NULL` usan el modo por defecto).
    pub async fn list_trainable(&self) -> Result<Vec<SenderCapacity>> {
        let sql = format!(
            "SELECT {CAPACITY_COLUMNS} FROM senders \
             WHERE active = 1 AND (training_mode IS NULL OR training_mode <> 'disabled') \
             ORDER BY id"
        );
        let rows = sqlx::query(&sql).fetch_all(&self.db_pool).await?;
        rows.iter().map(SenderCapacity::from_row).collect()
    }

    pub async fn sent_today(&self, sender_id: &str, now: DateTime<Utc>) -> Result<i64> {
        let sent: Option<(i64,)> =
            sqlx::query_as("SELECT sent FROM sender_daily_usage WHERE sender_id = ?1 AND day = ?2")
                .bind(sender_id)
                .bind(day_key(now))
                .fetch_optional(&self.db_pool)
                .await?;
        Ok(sent.map(|(s,)| s).unwrap_or(0))
    }

    /// Presupuesto de hoy para cada remitente activo de la campaña, en orden
    /// de rotación: `limit - enviados_hoy - asignados_sin_resultado`.
    pub async fn campaign_budgets(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<SenderBudget>> {
        let rows: Vec<(String, i64, i64, i64)> = sqlx::query_as(
            r#"
            SELECT
                s.id,
                s.current_daily_limit,
                COALESCE(u.sent, 0),
                (SELECT COUNT(*) FROM tracking_records t
                  WHERE t.sender_id = s.id
                    AND t.enqueued_at IS NOT NULL
                    AND t.sent_at IS NULL AND t.failed_at IS NULL)
            FROM campaign_senders cs
            JOIN senders s ON s.id = cs.sender_id
            LEFT JOIN sender_daily_usage u ON u.sender_id = s.id AND u.day = ?2
            WHERE cs.campaign_id = ?1 AND s.active = 1
            ORDER BY cs.position
            "#,
        )
        .bind(campaign_id)
        .bind(day_key(now))
        .fetch_all(&self.db_pool)
        .await
        .context("Failed to compute sender budgets")?;

        Ok(rows
            .into_iter()
            .map(|(sender_id, limit, sent, outstanding)| SenderBudget {
                sender_id,
                remaining: (limit - sent - outstanding).max(0),
            })
            .collect())
    }

    /// Reserva un envío en el contador diario. UPSERT condicional: nunca supera
    /// `current_daily_limit`, aunque varios workers usen el mismo remitente.
    pub async fn try_reserve_slot(&self, sender_id: &str, now: DateTime<Utc>) -> Result<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO sender_daily_usage (sender_id, day, sent)
            SELECT id, ?2, 1 FROM senders WHERE id = ?1 AND current_daily_limit > 0
            ON CONFLICT(sender_id, day) DO UPDATE SET sent = sent + 1
            WHERE sent < (SELECT current_daily_limit FROM senders WHERE id = excluded.sender_id)
            "#,
        )
        .bind(sender_id)
        .bind(day_key(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to reserve sender slot")?;
        Ok(result.rows_affected() == 1)
    }

    /// Libera una reserva cuando el intento no terminó en envío.
    pub async fn release_slot(&self, sender_id: &str, now: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            r#"
            UPDATE sender_daily_usage SET sent = sent - 1
            WHERE sender_id = ?1 AND day = ?2 AND sent > 0
            "#,
        )
        .bind(sender_id)
        .bind(day_key(now))
        .execute(&self.db_pool)
        .await
        .context("Failed to release sender slot")?;
        Ok(())
    }

    /// Compare-and-set del límite: sólo aplica si el límite sigue siendo
    /// `expected` y no hubo entrenamiento desde `window_start`.
    pub async fn apply_trained_limit(
        &self,
        sender_id: &str,
        expected: i64,
        new_limit: i64,
        window_start: DateTime<Utc>,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let now_s = ts(now);
        let result = sqlx::query(
            r#"
            UPDATE senders
            SET current_daily_limit = MIN(?3, max_daily_limit),
                last_trained_at = ?4,
                updated_at = ?4
            WHERE id = ?1
              AND current_daily_limit = ?2
              AND (last_trained_at IS NULL OR last_trained_at <= ?5)
            "#,
        )
        .bind(sender_id)
        .bind(expected)
        .bind(new_limit)
        .bind(&now_s)
        .bind(ts(window_start))
        .execute(&self.db_pool)
        .await
        .context("Failed to apply trained limit")?;
        Ok(result.rows_affected() == 1)
    }

    /// Reset administrativo: única vía (fuera de la política automática) para
    /// bajar un límite.
    pub async fn reset_limit(&self, sender_id: &str, limit: i64) -> EngineResult<SenderCapacity> {
        let capacity = self.get_capacity(sender_id).await?;
        if limit < 0 || limit > capacity.max_daily_limit {
            return Err(EngineError::Validation(format!(
                "limit must be between 0 and {}",
                capacity.max_daily_limit
            )));
        }
        sqlx::query(
            "UPDATE senders SET current_daily_limit = ?2, updated_at = ?3 WHERE id = ?1",
        )
        .bind(sender_id)
        .bind(limit)
        .bind(ts(Utc::now()))
        .execute(&self.db_pool)
        .await?;

        log::warn!(
            "(reset_limit) Límite de sender_id={} reseteado {} -> {}",
            sender_id,
            capacity.current_daily_limit,
            limit
        );
        self.get_capacity(sender_id).await
    }
}
