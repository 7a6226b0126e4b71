//! services/sweeper_service.rs
//! Sweeper de reconciliación: re-deriva la verdad desde el ledger y la cola y
//! repara campañas cuyo estado registrado se desvió. Cada pasada es
//! idempotente; sobre una campaña consistente no hace nada.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use sqlx::{Pool, Sqlite};
use uuid::Uuid;

use crate::config::engine_config::EngineConfig;
use crate::errors::EngineError;
use crate::models::{
    campaign_model::{Campaign, CampaignStatus},
    sweep_model::SweepReport,
    tracking_model::LedgerTotals,
    ts,
};
use crate::services::{
    campaign_service::CampaignService, queue_service::QueueService,
    tracking_service::TrackingService,
};

#[derive(Clone)]
pub struct SweeperService {
    db_pool: Pool<Sqlite>,
    campaigns: CampaignService,
    tracking: TrackingService,
    queue: QueueService,
    stall_threshold: Duration,
    job_lease: Duration,
}

impl SweeperService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        campaigns: CampaignService,
        tracking: TrackingService,
        queue: QueueService,
        config: &EngineConfig,
    ) -> Self {
        Self {
            db_pool,
            campaigns,
            tracking,
            queue,
            stall_threshold: Duration::seconds(config.stall_threshold_secs),
            job_lease: Duration::seconds(config.job_lease_secs),
        }
    }

    pub async fn run_reconciliation_sweep(&self, now: DateTime<Utc>) -> Result<SweepReport> {
        let mut report = SweepReport {
            stale_jobs_released: self.queue.release_stale(now, self.job_lease).await?,
            ..SweepReport::default()
        };
        if report.stale_jobs_released > 0 {
            log::warn!(
                "(sweep) {} jobs con lease vencido devueltos a la cola",
                report.stale_jobs_released
            );
        }

        let campaigns = self
            .campaigns
            .list_by_status(&[
                CampaignStatus::Processing,
                CampaignStatus::Sending,
                CampaignStatus::Paused,
            ])
            .await?;

        for campaign in &campaigns {
            report.campaigns_examined += 1;
            if let Err(e) = self.reconcile_campaign(campaign, now, &mut report).await {
                match e.downcast_ref::<EngineError>() {
                    Some(EngineError::ReconciliationConflict(id)) => {
                        report.conflicts += 1;
                        log::warn!("(sweep) Conflicto en campaña {}; otro escritor ganó", id);
                    }
                    _ => {
                        report.errors += 1;
                        log::error!("(sweep) Error reconciliando {}: {:?}", campaign.id, e);
                    }
                }
            }
        }

        self.backfill_completed_at(&mut report).await?;

        if report.corrective_actions() > 0 {
            log::warn!("(sweep) Pasada terminada con correcciones: {:?}", report);
        } else {
            log::info!(
                "(sweep) Pasada terminada sin correcciones ({} campañas)",
                report.campaigns_examined
            );
        }
        Ok(report)
    }

    async fn reconcile_campaign(
        &self,
        campaign: &Campaign,
        now: DateTime<Utc>,
        report: &mut SweepReport,
    ) -> Result<()> {
        let ledger = self.tracking.ledger_totals(&campaign.id).await?;

        let mut campaign = campaign.clone();
        if campaign.total_sent != ledger.sent || campaign.total_failed != ledger.failed {
            self.repair_counters(&campaign, &ledger, now).await?;
            report.counters_repaired += 1;
            campaign = self.campaigns.get_campaign(&campaign.id).await?;
        }

        // Una campaña pausada espera a `resume`; sólo se corrigen contadores.
        if !campaign.status.is_active() {
            return Ok(());
        }

        let open_jobs = self.queue.count_open_for_campaign(&campaign.id).await?;
        if open_jobs > 0 {
            return Ok(());
        }

        if campaign.is_fully_accounted() {
            self.force_terminal(&campaign, CampaignStatus::Completed, now, "completed_by_sweep")
                .await?;
            report.completed += 1;
            return Ok(());
        }

        let stalled = campaign.updated_at < now - self.stall_threshold;
        if stalled {
            self.force_terminal(&campaign, CampaignStatus::Failed, now, "failed_stalled")
                .await?;
            report.failed += 1;
            return Ok(());
        }

        if campaign.status == CampaignStatus::Processing && ledger.unenqueued > 0 {
            // Dispatch perdido (enqueue que nunca llegó o dispatch en dead-letter)
            let mut tx = self.db_pool.begin().await?;
            let job_id = self
                .campaigns
                .enqueue_dispatch_in(&mut tx, &campaign.id, now)
                .await?;
            audit_in(
                &mut tx,
                &campaign.id,
                "dispatch_requeued",
                &format!("{} rows unenqueued, job {}", ledger.unenqueued, job_id),
                now,
            )
            .await?;
            tx.commit().await?;
            log::warn!(
                "(sweep) Campaña {} sin dispatch activo; reencolado job {}",
                campaign.id,
                job_id
            );
            report.dispatch_requeued += 1;
        }
        Ok(())
    }

    async fn repair_counters(
        &self,
        campaign: &Campaign,
        ledger: &LedgerTotals,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let sent = ledger.sent.min(campaign.recipient_count);
        let failed = ledger.failed.min(campaign.recipient_count - sent);

        let mut tx = self.db_pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET total_sent = ?2, total_failed = ?3, version = version + 1
            WHERE id = ?1 AND version = ?4 AND total_sent = ?5 AND total_failed = ?6
            "#,
        )
        .bind(&campaign.id)
        .bind(sent)
        .bind(failed)
        .bind(campaign.version)
        .bind(campaign.total_sent)
        .bind(campaign.total_failed)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ReconciliationConflict(campaign.id.clone()).into());
        }

        let details = format!(
            "sent {} -> {}, failed {} -> {}",
            campaign.total_sent, sent, campaign.total_failed, failed
        );
        audit_in(&mut tx, &campaign.id, "counters_repaired", &details, now).await?;
        tx.commit().await?;

        log::warn!("(sweep) Contadores de {} corregidos: {}", campaign.id, details);
        Ok(())
    }

    /// Transición forzada a un estado terminal, CAS sobre (status, version).
    async fn force_terminal(
        &self,
        campaign: &Campaign,
        to: CampaignStatus,
        now: DateTime<Utc>,
        action: &str,
    ) -> Result<()> {
        let now_s = ts(now);
        let completed_at = if to == CampaignStatus::Completed {
            Some(campaign.completed_at.map(ts).unwrap_or_else(|| now_s.clone()))
        } else {
            None
        };

        let mut tx = self.db_pool.begin().await?;
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = ?2, completed_at = ?3, updated_at = ?4, version = version + 1
            WHERE id = ?1 AND status = ?5 AND version = ?6
            "#,
        )
        .bind(&campaign.id)
        .bind(to.as_str())
        .bind(&completed_at)
        .bind(&now_s)
        .bind(campaign.status.as_str())
        .bind(campaign.version)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            return Err(EngineError::ReconciliationConflict(campaign.id.clone()).into());
        }

        let details = format!(
            "{} -> {} (sent={}, failed={}, recipients={})",
            campaign.status, to, campaign.total_sent, campaign.total_failed, campaign.recipient_count
        );
        audit_in(&mut tx, &campaign.id, action, &details, now).await?;
        tx.commit().await?;

        log::warn!("(sweep) Campaña {} forzada: {}", campaign.id, details);
        Ok(())
    }

    /// `completed` sin `completed_at` (dato cargado por otra vía): se toma
    /// `updated_at`.
    async fn backfill_completed_at(&self, report: &mut SweepReport) -> Result<()> {
        let rows: Vec<(String, String)> = sqlx::query_as(
            "SELECT id, updated_at FROM campaigns WHERE status = 'completed' AND completed_at IS NULL",
        )
        .fetch_all(&self.db_pool)
        .await?;

        for (campaign_id, updated_at) in rows {
            let mut tx = self.db_pool.begin().await?;
            let result = sqlx::query(
                r#"
                UPDATE campaigns SET completed_at = updated_at, version = version + 1
                WHERE id = ?1 AND status = 'completed' AND completed_at IS NULL
                "#,
            )
            .bind(&campaign_id)
            .execute(&mut *tx)
            .await?;
            if result.rows_affected() == 1 {
                audit_in(
                    &mut tx,
                    &campaign_id,
                    "completed_at_backfilled",
                    &format!("completed_at = {updated_at}"),
                    Utc::now(),
                )
                .await?;
                report.completed_at_backfilled += 1;
                log::warn!(
                    "(sweep) completed_at de {} rellenado con updated_at={}",
                    campaign_id,
                    updated_at
                );
            }
            tx.commit().await?;
        }
        Ok(())
    }

    pub async fn list_audit(&self, campaign_id: &str) -> Result<Vec<(String, Option<String>)>> {
        let rows: Vec<(String, Option<String>)> = sqlx::query_as(
            "SELECT action, details FROM reconciliation_log WHERE campaign_id = ?1 ORDER BY created_at",
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows)
    }
}

async fn audit_in(
    conn: &mut sqlx::SqliteConnection,
    campaign_id: &str,
    action: &str,
    details: &str,
    now: DateTime<Utc>,
) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO reconciliation_log (id, campaign_id, action, details, created_at)
        VALUES (?1, ?2, ?3, ?4, ?5)
        "#,
    )
    .bind(Uuid::new_v4().to_string())
    .bind(campaign_id)
    .bind(action)
    .bind(details)
    .bind(ts(now))
    .execute(conn)
    .await
    .context("Failed to write reconciliation log")?;
    Ok(())
}
