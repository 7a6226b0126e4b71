//! services/campaign_service.rs
//! Máquina de estados de campañas. Todas las transiciones son compare-and-set
//! sobre `status` (nunca sobrescritura ciega), así que varios workers o el
//! sweeper pueden competir sin reabrir una campaña terminal.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::Context;
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite, SqliteConnection};
use uuid::Uuid;

use crate::collaborators::{suppression::normalize_address, SuppressionOracle};
use crate::config::engine_config::EngineConfig;
use crate::errors::{EngineError, EngineResult};
use crate::models::{
    campaign_model::{
        Campaign, CampaignCommand, CampaignStatus, CampaignStatusResponse, CampaignVariant,
        CreateCampaignRequest,
    },
    queue_model::{DispatchTask, JobKind},
    ts,
};
use crate::services::{
    queue_service::{count_open_of_kind_in, enqueue_in, QueueService},
    tracking_service::{insert_pending_in, TrackingService},
};

#[derive(Clone)]
pub struct CampaignService {
    db_pool: Pool<Sqlite>,
    queue: QueueService,
    tracking: TrackingService,
    suppression: Arc<dyn SuppressionOracle>,
    config: EngineConfig,
}

fn placeholders(start: usize, count: usize) -> String {
    (start..start + count)
        .map(|i| format!("?{i}"))
        .collect::<Vec<_>>()
        .join(", ")
}

impl CampaignService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        queue: QueueService,
        tracking: TrackingService,
        suppression: Arc<dyn SuppressionOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db_pool,
            queue,
            tracking,
            suppression,
            config,
        }
    }

    /// Crea la campaña en `draft` con sus destinatarios, remitentes y variantes.
    pub async fn create_campaign(&self, req: CreateCampaignRequest) -> EngineResult<Campaign> {
        let mut seen = HashSet::new();
        let recipients: Vec<String> = req
            .recipients
            .iter()
            .map(|r| normalize_address(r))
            .filter(|r| !r.is_empty() && seen.insert(r.clone()))
            .collect();
        if recipients.is_empty() {
            return Err(EngineError::Validation(
                "campaign needs at least one recipient".to_string(),
            ));
        }
        if req.sender_ids.is_empty() {
            return Err(EngineError::Validation(
                "campaign needs at least one sender".to_string(),
            ));
        }

        let campaign_id = Uuid::new_v4().to_string();
        let now = ts(Utc::now());
        let mut tx = self.db_pool.begin().await?;

        sqlx::query(
            r#"
            INSERT INTO campaigns (
                id, owner_id, name, subject, content, status,
                created_at, updated_at
            )
            VALUES (?1, ?2, ?3, ?4, ?5, 'draft', ?6, ?6)
            "#,
        )
        .bind(&campaign_id)
        .bind(&req.owner_id)
        .bind(&req.name)
        .bind(&req.subject)
        .bind(&req.content)
        .bind(&now)
        .execute(&mut *tx)
        .await?;

        for address in &recipients {
            sqlx::query("INSERT INTO campaign_recipients (campaign_id, address) VALUES (?1, ?2)")
                .bind(&campaign_id)
                .bind(address)
                .execute(&mut *tx)
                .await?;
        }

        for (position, sender_id) in req.sender_ids.iter().enumerate() {
            let exists: Option<(String,)> = sqlx::query_as("SELECT id FROM senders WHERE id = ?1")
                .bind(sender_id)
                .fetch_optional(&mut *tx)
                .await?;
            if exists.is_none() {
                return Err(EngineError::SenderNotFound(sender_id.clone()));
            }
            sqlx::query(
                r#"
                INSERT OR IGNORE INTO campaign_senders (campaign_id, sender_id, position)
                VALUES (?1, ?2, ?3)
                "#,
            )
            .bind(&campaign_id)
            .bind(sender_id)
            .bind(position as i64)
            .execute(&mut *tx)
            .await?;
        }

        for (position, variant) in req.variants.iter().flatten().enumerate() {
            sqlx::query(
                r#"
                INSERT INTO campaign_variants (id, campaign_id, position, subject, content, weight)
                VALUES (?1, ?2, ?3, ?4, ?5, ?6)
                "#,
            )
            .bind(Uuid::new_v4().to_string())
            .bind(&campaign_id)
            .bind(position as i64)
            .bind(&variant.subject)
            .bind(&variant.content)
            .bind(i64::from(variant.weight.unwrap_or(1).max(1)))
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        log::info!(
            "(create_campaign) Campaña {} creada en draft con {} destinatarios",
            campaign_id,
            recipients.len()
        );
        self.get_campaign(&campaign_id).await
    }

    pub async fn get_campaign(&self, campaign_id: &str) -> EngineResult<Campaign> {
        let mut conn = self.db_pool.acquire().await?;
        fetch_campaign(&mut conn, campaign_id).await
    }

    pub async fn get_campaign_status(&self, campaign_id: &str) -> EngineResult<CampaignStatusResponse> {
        let campaign = self.get_campaign(campaign_id).await?;
        let ledger = self.tracking.ledger_totals(campaign_id).await?;
        Ok(CampaignStatusResponse {
            id: campaign.id.clone(),
            status: campaign.status,
            recipient_count: campaign.recipient_count,
            total_sent: campaign.total_sent,
            total_failed: campaign.total_failed,
            pending: (campaign.recipient_count - campaign.accounted()).max(0),
            opened: ledger.opened,
            clicked: ledger.clicked,
            unsubscribed: ledger.unsubscribed,
            started_at: campaign.started_at,
            completed_at: campaign.completed_at,
            updated_at: campaign.updated_at,
        })
    }

    pub async fn list_by_status(&self, statuses: &[CampaignStatus]) -> EngineResult<Vec<Campaign>> {
        let sql = format!(
            "SELECT {} FROM campaigns WHERE status IN ({}) ORDER BY updated_at",
            Campaign::COLUMNS,
            placeholders(1, statuses.len())
        );
        let mut query = sqlx::query(&sql);
        for status in statuses {
            query = query.bind(status.as_str());
        }
        let rows = query.fetch_all(&self.db_pool).await?;
        let campaigns = rows
            .iter()
            .map(Campaign::from_row)
            .collect::<anyhow::Result<Vec<_>>>()?;
        Ok(campaigns)
    }

    pub async fn variants(&self, campaign_id: &str) -> EngineResult<Vec<CampaignVariant>> {
        let rows: Vec<(String, String, String, i64)> = sqlx::query_as(
            r#"
            SELECT id, subject, content, weight FROM campaign_variants
            WHERE campaign_id = ?1 ORDER BY position
            "#,
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|(id, subject, content, weight)| CampaignVariant {
                id,
                subject,
                content,
                weight,
            })
            .collect())
    }

    /// `start`: sólo desde `draft`. Filtra supresiones, fija `recipient_count`,
    /// crea las filas del ledger y encola el dispatch, todo en una transacción.
    pub async fn start_campaign(&self, campaign_id: &str) -> EngineResult<Campaign> {
        let campaign = self.get_campaign(campaign_id).await?;
        if !CampaignCommand::Start.is_allowed_from(campaign.status) {
            return Err(invalid(campaign_id, CampaignCommand::Start, campaign.status));
        }

        let raw: Vec<(String,)> = sqlx::query_as(
            "SELECT address FROM campaign_recipients WHERE campaign_id = ?1 ORDER BY address",
        )
        .bind(campaign_id)
        .fetch_all(&self.db_pool)
        .await?;

        let mut eligible = Vec::with_capacity(raw.len());
        for (address,) in raw {
            let suppressed = tokio::time::timeout(
                self.config.oracle_timeout(),
                self.suppression.is_suppressed(&address),
            )
            .await
            .context("Suppression oracle timed out")??;
            if !suppressed {
                eligible.push(address);
            }
        }

        if eligible.is_empty() {
            log::warn!(
                "(start_campaign) Campaña {} sin destinatarios elegibles; queda en draft",
                campaign_id
            );
            return Err(EngineError::EmptyRecipientSet(campaign_id.to_string()));
        }

        let now = Utc::now();
        let now_s = ts(now);
        let mut tx = self.db_pool.begin().await?;

        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'processing',
                recipient_count = ?2,
                total_sent = 0,
                total_failed = 0,
                dispatched_count = 0,
                started_at = ?3,
                completed_at = NULL,
                updated_at = ?3,
                version = version + 1
            WHERE id = ?1 AND status = 'draft'
            "#,
        )
        .bind(campaign_id)
        .bind(eligible.len() as i64)
        .bind(&now_s)
        .execute(&mut *tx)
        .await?;

        if result.rows_affected() == 0 {
            // Alguien ganó la carrera; reportamos el estado real.
            let current = fetch_campaign(&mut tx, campaign_id).await?;
            return Err(invalid(campaign_id, CampaignCommand::Start, current.status));
        }

        insert_pending_in(&mut tx, campaign_id, &eligible, now).await?;
        self.enqueue_dispatch_in(&mut tx, campaign_id, now).await?;
        tx.commit().await?;

        log::info!(
            "(start_campaign) Campaña {} -> processing con {} destinatarios",
            campaign_id,
            eligible.len()
        );
        self.get_campaign(campaign_id).await
    }

    /// `pause`: processing/sending -> paused. Lo que ya está en la cola termina.
    pub async fn pause_campaign(&self, campaign_id: &str) -> EngineResult<Campaign> {
        let mut conn = self.db_pool.acquire().await?;
        self.transition_in(
            &mut conn,
            campaign_id,
            CampaignCommand::Pause,
            CampaignStatus::Paused,
            Utc::now(),
        )
        .await?;
        drop(conn);
        log::info!("(pause_campaign) Campaña {} pausada", campaign_id);
        self.get_campaign(campaign_id).await
    }

    /// `resume`: vuelve a `processing` (y reencola el dispatch) si faltan filas
    /// por encolar; si no, a `sending`. Luego re-evalúa la finalización.
    pub async fn resume_campaign(&self, campaign_id: &str) -> EngineResult<Campaign> {
        let now = Utc::now();
        let mut tx = self.db_pool.begin().await?;
        let campaign = fetch_campaign(&mut tx, campaign_id).await?;
        if !CampaignCommand::Resume.is_allowed_from(campaign.status) {
            return Err(invalid(campaign_id, CampaignCommand::Resume, campaign.status));
        }

        let (unenqueued,): (i64,) = sqlx::query_as(
            "SELECT COUNT(*) FROM tracking_records WHERE campaign_id = ?1 AND enqueued_at IS NULL",
        )
        .bind(campaign_id)
        .fetch_one(&mut *tx)
        .await?;

        let target = if unenqueued > 0 {
            CampaignStatus::Processing
        } else {
            CampaignStatus::Sending
        };
        self.transition_in(&mut tx, campaign_id, CampaignCommand::Resume, target, now)
            .await?;
        if target == CampaignStatus::Processing
            && count_open_of_kind_in(&mut tx, campaign_id, JobKind::DispatchCampaign).await? == 0
        {
            self.enqueue_dispatch_in(&mut tx, campaign_id, now).await?;
        }
        tx.commit().await?;

        log::info!("(resume_campaign) Campaña {} reanudada -> {}", campaign_id, target);
        self.check_completion(campaign_id, now).await?;
        self.get_campaign(campaign_id).await
    }

    /// `stop`: terminal forzado desde cualquier estado no terminal.
    pub async fn stop_campaign(&self, campaign_id: &str) -> EngineResult<Campaign> {
        let mut conn = self.db_pool.acquire().await?;
        self.transition_in(
            &mut conn,
            campaign_id,
            CampaignCommand::Stop,
            CampaignStatus::Stopped,
            Utc::now(),
        )
        .await?;
        drop(conn);
        log::info!("(stop_campaign) Campaña {} detenida", campaign_id);
        self.get_campaign(campaign_id).await
    }

    /// Si todos los destinatarios tienen resultado y la campaña está activa,
    /// pasa a `completed`. Un solo UPDATE condicional: con varios workers
    /// terminando a la vez, exactamente uno gana.
    pub async fn check_completion(&self, campaign_id: &str, now: DateTime<Utc>) -> EngineResult<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'completed',
                completed_at = COALESCE(completed_at, ?2),
                updated_at = ?2,
                version = version + 1
            WHERE id = ?1
              AND status IN ('processing', 'sending')
              AND total_sent + total_failed >= recipient_count
            "#,
        )
        .bind(campaign_id)
        .bind(ts(now))
        .execute(&self.db_pool)
        .await?;

        let completed = result.rows_affected() == 1;
        if completed {
            log::info!("(check_completion) Campaña {} completada", campaign_id);
        }
        Ok(completed)
    }

    pub(crate) async fn enqueue_dispatch_in(
        &self,
        conn: &mut SqliteConnection,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> EngineResult<String> {
        let payload = serde_json::to_string(&DispatchTask {
            campaign_id: campaign_id.to_string(),
        })?;
        let job_id = enqueue_in(
            conn,
            JobKind::DispatchCampaign,
            campaign_id,
            &payload,
            self.queue.max_attempts(),
            now,
        )
        .await?;
        Ok(job_id)
    }

    /// Transición compare-and-set validada contra la tabla de comandos.
    async fn transition_in(
        &self,
        conn: &mut SqliteConnection,
        campaign_id: &str,
        command: CampaignCommand,
        to: CampaignStatus,
        now: DateTime<Utc>,
    ) -> EngineResult<()> {
        let allowed = command.allowed_from();
        let sql = format!(
            r#"
            UPDATE campaigns
            SET status = ?1, updated_at = ?2, version = version + 1
            WHERE id = ?3 AND status IN ({})
            "#,
            placeholders(4, allowed.len())
        );
        let mut query = sqlx::query(&sql)
            .bind(to.as_str())
            .bind(ts(now))
            .bind(campaign_id);
        for status in allowed {
            query = query.bind(status.as_str());
        }
        let result = query.execute(&mut *conn).await?;

        if result.rows_affected() == 0 {
            let current = fetch_campaign(conn, campaign_id).await?;
            return Err(invalid(campaign_id, command, current.status));
        }
        Ok(())
    }
}

pub(crate) async fn fetch_campaign(
    conn: &mut SqliteConnection,
    campaign_id: &str,
) -> EngineResult<Campaign> {
    let sql = format!("SELECT {} FROM campaigns WHERE id = ?1", Campaign::COLUMNS);
    let row = sqlx::query(&sql)
        .bind(campaign_id)
        .fetch_optional(conn)
        .await?
        .ok_or_else(|| EngineError::CampaignNotFound(campaign_id.to_string()))?;
    Ok(Campaign::from_row(&row)?)
}

fn invalid(campaign_id: &str, command: CampaignCommand, from: CampaignStatus) -> EngineError {
    EngineError::InvalidTransition {
        campaign_id: campaign_id.to_string(),
        command,
        from,
    }
}
