//! services/tracking_service.rs
//! Acceso al ledger de tracking. La unicidad (campaign_id, recipient) es la
//! llave de idempotencia de todo el pipeline: un resultado terminal sólo se
//! escribe una vez y sólo entonces se incrementa el contador de la campaña.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::collaborators::suppression::{record_suppression, REASON_UNSUBSCRIBED};
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    tracking_model::{BeaconKind, DeliveryOutcome, LedgerTotals, TrackingRecord},
    ts,
};

#[derive(Clone, Debug)]
pub struct TrackingService {
    db_pool: Pool<Sqlite>,
}

/// Filas pendientes para el set de destinatarios resuelto. Re-ejecutar es
/// inofensivo gracias al `INSERT OR IGNORE`.
pub async fn insert_pending_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    recipients: &[String],
    now: DateTime<Utc>,
) -> Result<u64> {
    let now_s = ts(now);
    let mut inserted = 0;
    for recipient in recipients {
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO tracking_records (id, campaign_id, recipient, created_at)
            VALUES (?1, ?2, ?3, ?4)
            "#,
        )
        .bind(Uuid::new_v4().simple().to_string())
        .bind(campaign_id)
        .bind(recipient)
        .bind(&now_s)
        .execute(&mut *conn)
        .await
        .context("Failed to insert tracking record")?;
        inserted += result.rows_affected();
    }
    Ok(inserted)
}

/// Siguiente bloque de filas sin encolar: `(tracking_id, recipient)`.
pub async fn next_unenqueued_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    limit: i64,
) -> Result<Vec<(String, String)>> {
    let rows: Vec<(String, String)> = sqlx::query_as(
        r#"
        SELECT id, recipient FROM tracking_records
        WHERE campaign_id = ?1 AND enqueued_at IS NULL
        ORDER BY recipient
        LIMIT ?2
        "#,
    )
    .bind(campaign_id)
    .bind(limit)
    .fetch_all(conn)
    .await
    .context("Failed to read unenqueued tracking records")?;
    Ok(rows)
}

/// Marca la fila como encolada. `false` si otro dispatch ya la había tomado.
pub async fn mark_enqueued_in(
    conn: &mut SqliteConnection,
    tracking_id: &str,
    sender_id: Option<&str>,
    variant_id: Option<&str>,
    now: DateTime<Utc>,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE tracking_records
        SET enqueued_at = ?2, sender_id = ?3, variant_id = ?4
        WHERE id = ?1 AND enqueued_at IS NULL
        "#,
    )
    .bind(tracking_id)
    .bind(ts(now))
    .bind(sender_id)
    .bind(variant_id)
    .execute(conn)
    .await
    .context("Failed to mark tracking record as enqueued")?;
    Ok(result.rows_affected() == 1)
}

/// Escribe el resultado terminal y, sólo si la fila no tenía uno, incrementa
/// el contador de la campaña con un UPDATE atómico. Devuelve si se aplicó.
pub async fn record_outcome_in(
    conn: &mut SqliteConnection,
    campaign_id: &str,
    tracking_id: &str,
    outcome: &DeliveryOutcome,
    now: DateTime<Utc>,
) -> Result<bool> {
    let now_s = ts(now);
    let (column, counter, reason) = match outcome {
        DeliveryOutcome::Sent => ("sent_at", "total_sent", None),
        DeliveryOutcome::Failed(reason) => ("failed_at", "total_failed", Some(reason.as_str())),
    };

    let sql = format!(
        r#"
        UPDATE tracking_records
        SET {column} = ?1, failure_reason = ?2
        WHERE id = ?3 AND campaign_id = ?4 AND sent_at IS NULL AND failed_at IS NULL
        "#
    );
    let ledger = sqlx::query(&sql)
        .bind(&now_s)
        .bind(reason)
        .bind(tracking_id)
        .bind(campaign_id)
        .execute(&mut *conn)
        .await
        .context("Failed to record delivery outcome")?;

    if ledger.rows_affected() == 0 {
        return Ok(false);
    }

    let sql = format!(
        r#"
        UPDATE campaigns
        SET {counter} = {counter} + 1, updated_at = ?1
        WHERE id = ?2 AND total_sent + total_failed < recipient_count
        "#
    );
    let counters = sqlx::query(&sql)
        .bind(&now_s)
        .bind(campaign_id)
        .execute(&mut *conn)
        .await
        .context("Failed to increment campaign counter")?;

    if counters.rows_affected() == 0 {
        log::warn!(
            "(record_outcome) Contadores de campaign_id={} ya en el tope; el sweeper reconciliará",
            campaign_id
        );
    }
    Ok(true)
}

impl TrackingService {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        TrackingService { db_pool }
    }

    pub async fn get(&self, campaign_id: &str, recipient: &str) -> Result<Option<TrackingRecord>> {
        let sql = format!(
            "SELECT {} FROM tracking_records WHERE campaign_id = ?1 AND recipient = ?2",
            TrackingRecord::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(campaign_id)
            .bind(recipient)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(TrackingRecord::from_row).transpose()
    }

    pub async fn get_by_tracking_id(&self, tracking_id: &str) -> Result<Option<TrackingRecord>> {
        let sql = format!(
            "SELECT {} FROM tracking_records WHERE id = ?1",
            TrackingRecord::COLUMNS
        );
        let row = sqlx::query(&sql)
            .bind(tracking_id)
            .fetch_optional(&self.db_pool)
            .await?;
        row.as_ref().map(TrackingRecord::from_row).transpose()
    }

    /// Versión transaccional de `record_outcome_in` sobre el pool.
    pub async fn record_outcome(
        &self,
        campaign_id: &str,
        tracking_id: &str,
        outcome: &DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let mut tx = self.db_pool.begin().await?;
        let applied = record_outcome_in(&mut tx, campaign_id, tracking_id, outcome, now).await?;
        tx.commit().await?;
        Ok(applied)
    }

    /// Evento de beacon (open/click/unsubscribe). Se rechaza si el registro
    /// todavía no tiene `sent_at`; cada timestamp se escribe una sola vez.
    pub async fn record_beacon(
        &self,
        tracking_id: &str,
        kind: BeaconKind,
        now: DateTime<Utc>,
    ) -> EngineResult<TrackingRecord> {
        let record = self
            .get_by_tracking_id(tracking_id)
            .await?
            .ok_or_else(|| EngineError::TrackingNotFound(tracking_id.to_string()))?;

        if record.sent_at.is_none() {
            return Err(EngineError::BeaconBeforeSend(tracking_id.to_string()));
        }

        let now_s = ts(now);
        let mut tx = self.db_pool.begin().await?;

        let column = kind.column();
        let sql = format!(
            "UPDATE tracking_records SET {column} = COALESCE({column}, ?1) \
             WHERE id = ?2 AND sent_at IS NOT NULL"
        );
        sqlx::query(&sql)
            .bind(&now_s)
            .bind(tracking_id)
            .execute(&mut *tx)
            .await?;

        match kind {
            // Un click implica que el mensaje se abrió
            BeaconKind::Click => {
                sqlx::query(
                    "UPDATE tracking_records SET opened_at = COALESCE(opened_at, ?1) WHERE id = ?2",
                )
                .bind(&now_s)
                .bind(tracking_id)
                .execute(&mut *tx)
                .await?;
            }
            BeaconKind::Unsubscribe => {
                record_suppression(&mut tx, &record.recipient, REASON_UNSUBSCRIBED, now).await?;
            }
            BeaconKind::Open => {}
        }
        tx.commit().await?;

        log::info!(
            "(record_beacon) {} registrado para tracking_id={} campaign_id={}",
            kind,
            tracking_id,
            record.campaign_id
        );

        self.get_by_tracking_id(tracking_id)
            .await?
            .ok_or_else(|| EngineError::TrackingNotFound(tracking_id.to_string()))
    }

    pub async fn ledger_totals(&self, campaign_id: &str) -> Result<LedgerTotals> {
        let (rows, sent, failed, unenqueued, opened, clicked, unsubscribed): (
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
            i64,
        ) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(sent_at IS NOT NULL), 0),
                COALESCE(SUM(failed_at IS NOT NULL), 0),
                COALESCE(SUM(enqueued_at IS NULL), 0),
                COALESCE(SUM(opened_at IS NOT NULL), 0),
                COALESCE(SUM(clicked_at IS NOT NULL), 0),
                COALESCE(SUM(unsubscribed_at IS NOT NULL), 0)
            FROM tracking_records
            WHERE campaign_id = ?1
            "#,
        )
        .bind(campaign_id)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to compute ledger totals")?;

        Ok(LedgerTotals {
            rows,
            sent,
            failed,
            unenqueued,
            opened,
            clicked,
            unsubscribed,
        })
    }

    /// Envíos asignados a un remitente que todavía no tienen resultado.
    pub async fn outstanding_for_sender(&self, sender_id: &str) -> Result<i64> {
        let (count,): (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*) FROM tracking_records
            WHERE sender_id = ?1
              AND enqueued_at IS NOT NULL
              AND sent_at IS NULL AND failed_at IS NULL
            "#,
        )
        .bind(sender_id)
        .fetch_one(&self.db_pool)
        .await?;
        Ok(count)
    }
}
