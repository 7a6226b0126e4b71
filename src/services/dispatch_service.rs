//! services/dispatch_service.rs
//! Dispatcher: expande una campaña en un SendTask por destinatario, por
//! bloques acotados. Cada bloque se encola en su propia transacción y marca
//! sus filas del ledger como encoladas, así que un dispatch interrumpido se
//! retoma donde quedó sin duplicar trabajo.

use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::{Pool, Sqlite};

use crate::collaborators::SuppressionOracle;
use crate::config::engine_config::EngineConfig;
use crate::models::{
    campaign_model::{CampaignStatus, CampaignVariant},
    queue_model::{JobKind, SendTask},
    sender_model::SenderBudget,
    tracking_model::DeliveryOutcome,
    ts,
};
use crate::services::{
    campaign_service::{fetch_campaign, CampaignService},
    queue_service::{enqueue_in, QueueService},
    sender_service::SenderService,
    tracking_service::{mark_enqueued_in, next_unenqueued_in, record_outcome_in},
};

pub const SUPPRESSED_REASON: &str = "suppressed";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// Todas las filas encoladas; la campaña pasó a `sending`.
    Finished { enqueued: usize },
    /// La campaña dejó de estar en `processing` (pausa, stop...).
    Halted {
        status: CampaignStatus,
        enqueued: usize,
    },
    /// Ningún remitente con capacidad hoy; hay que reintentar más tarde.
    Deferred { enqueued: usize },
}

enum Assignment {
    Suppressed {
        tracking_id: String,
    },
    Send {
        tracking_id: String,
        recipient: String,
        sender_id: String,
        variant_id: Option<String>,
    },
}

#[derive(Clone)]
pub struct DispatchService {
    db_pool: Pool<Sqlite>,
    campaigns: CampaignService,
    senders: SenderService,
    queue: QueueService,
    suppression: Arc<dyn SuppressionOracle>,
    config: EngineConfig,
}

/// Round-robin sobre los remitentes con presupuesto, empezando en `cursor`.
pub fn pick_sender(budgets: &mut [SenderBudget], cursor: &mut usize) -> Option<String> {
    let n = budgets.len();
    for offset in 0..n {
        let idx = (*cursor + offset) % n;
        if budgets[idx].remaining > 0 {
            budgets[idx].remaining -= 1;
            *cursor = (idx + 1) % n;
            return Some(budgets[idx].sender_id.clone());
        }
    }
    None
}

/// Round-robin ponderado y determinista sobre el índice de dispatch.
pub fn pick_variant(variants: &[CampaignVariant], index: i64) -> Option<&CampaignVariant> {
    let total: i64 = variants.iter().map(|v| v.weight.max(1)).sum();
    if total == 0 {
        return None;
    }
    let mut slot = index.rem_euclid(total);
    for variant in variants {
        let weight = variant.weight.max(1);
        if slot < weight {
            return Some(variant);
        }
        slot -= weight;
    }
    None
}

impl DispatchService {
    pub fn new(
        db_pool: Pool<Sqlite>,
        campaigns: CampaignService,
        senders: SenderService,
        queue: QueueService,
        suppression: Arc<dyn SuppressionOracle>,
        config: EngineConfig,
    ) -> Self {
        Self {
            db_pool,
            campaigns,
            senders,
            queue,
            suppression,
            config,
        }
    }

    /// Ejecuta el fan-out de una campaña. Los errores (oráculo, DB) se propagan
    /// para que la cola reintente el dispatch completo.
    pub async fn dispatch_campaign(
        &self,
        campaign_id: &str,
        now: DateTime<Utc>,
    ) -> Result<DispatchOutcome> {
        let variants = self.campaigns.variants(campaign_id).await?;
        let mut enqueued = 0usize;

        loop {
            let campaign = self.campaigns.get_campaign(campaign_id).await?;
            if campaign.status != CampaignStatus::Processing {
                log::info!(
                    "(dispatch_campaign) Campaña {} en estado {}; no se encolan más envíos",
                    campaign_id,
                    campaign.status
                );
                return Ok(DispatchOutcome::Halted {
                    status: campaign.status,
                    enqueued,
                });
            }

            let chunk = {
                let mut conn = self.db_pool.acquire().await?;
                next_unenqueued_in(&mut conn, campaign_id, self.config.dispatch_batch_size)
                    .await?
            };
            if chunk.is_empty() {
                self.finish_fan_out(campaign_id, now).await?;
                log::info!(
                    "(dispatch_campaign) Fan-out de {} terminado ({} encolados en esta pasada)",
                    campaign_id,
                    enqueued
                );
                return Ok(DispatchOutcome::Finished { enqueued });
            }

            let mut budgets = self.senders.campaign_budgets(campaign_id, now).await?;
            if budgets.iter().all(|b| b.remaining == 0) {
                log::warn!(
                    "(dispatch_campaign) Sin capacidad de remitentes para {}; se difiere",
                    campaign_id
                );
                return Ok(DispatchOutcome::Deferred { enqueued });
            }

            let mut suppressed = HashSet::new();
            for (tracking_id, recipient) in &chunk {
                let is_suppressed = tokio::time::timeout(
                    self.config.oracle_timeout(),
                    self.suppression.is_suppressed(recipient),
                )
                .await
                .context("Suppression oracle timed out")??;
                if is_suppressed {
                    suppressed.insert(tracking_id.clone());
                }
            }

            let mut cursor = campaign.dispatched_count.max(0) as usize % budgets.len();
            let mut index = campaign.dispatched_count;
            let mut ran_out = false;
            let mut assignments = Vec::with_capacity(chunk.len());
            for (tracking_id, recipient) in chunk {
                if suppressed.contains(&tracking_id) {
                    assignments.push(Assignment::Suppressed { tracking_id });
                    continue;
                }
                let Some(sender_id) = pick_sender(&mut budgets, &mut cursor) else {
                    ran_out = true;
                    break;
                };
                let variant_id = pick_variant(&variants, index).map(|v| v.id.clone());
                index += 1;
                assignments.push(Assignment::Send {
                    tracking_id,
                    recipient,
                    sender_id,
                    variant_id,
                });
            }

            let sent_now = match self.enqueue_chunk(campaign_id, &assignments, now).await? {
                Some(n) => n,
                None => {
                    let current = self.campaigns.get_campaign(campaign_id).await?;
                    return Ok(DispatchOutcome::Halted {
                        status: current.status,
                        enqueued,
                    });
                }
            };
            enqueued += sent_now;

            if ran_out {
                log::warn!(
                    "(dispatch_campaign) Capacidad agotada a mitad de bloque para {}; se difiere",
                    campaign_id
                );
                return Ok(DispatchOutcome::Deferred { enqueued });
            }
        }
    }

    /// Encola un bloque en una transacción. Devuelve `None` si la campaña salió
    /// de `processing` mientras tanto (se hace rollback).
    async fn enqueue_chunk(
        &self,
        campaign_id: &str,
        assignments: &[Assignment],
        now: DateTime<Utc>,
    ) -> Result<Option<usize>> {
        let mut tx = self.db_pool.begin().await?;
        let mut sends = 0usize;
        let mut marked = 0i64;

        for assignment in assignments {
            match assignment {
                Assignment::Suppressed { tracking_id } => {
                    if !mark_enqueued_in(&mut tx, tracking_id, None, None, now).await? {
                        continue;
                    }
                    marked += 1;
                    record_outcome_in(
                        &mut tx,
                        campaign_id,
                        tracking_id,
                        &DeliveryOutcome::Failed(SUPPRESSED_REASON.to_string()),
                        now,
                    )
                    .await?;
                }
                Assignment::Send {
                    tracking_id,
                    recipient,
                    sender_id,
                    variant_id,
                } => {
                    let claimed = mark_enqueued_in(
                        &mut tx,
                        tracking_id,
                        Some(sender_id),
                        variant_id.as_deref(),
                        now,
                    )
                    .await?;
                    if !claimed {
                        // Otro dispatch concurrente ya encoló esta fila
                        continue;
                    }
                    marked += 1;
                    let payload = serde_json::to_string(&SendTask {
                        campaign_id: campaign_id.to_string(),
                        recipient: recipient.clone(),
                        tracking_id: tracking_id.clone(),
                        sender_id: sender_id.clone(),
                        variant_id: variant_id.clone(),
                    })?;
                    enqueue_in(
                        &mut tx,
                        JobKind::SendEmail,
                        campaign_id,
                        &payload,
                        self.queue.max_attempts(),
                        now,
                    )
                    .await?;
                    sends += 1;
                }
            }
        }

        let guard = sqlx::query(
            r#"
            UPDATE campaigns
            SET dispatched_count = dispatched_count + ?2, updated_at = ?3
            WHERE id = ?1 AND status = 'processing'
            "#,
        )
        .bind(campaign_id)
        .bind(marked)
        .bind(ts(now))
        .execute(&mut *tx)
        .await?;

        if guard.rows_affected() == 0 {
            tx.rollback().await?;
            return Ok(None);
        }
        tx.commit().await?;
        Ok(Some(sends))
    }

    /// processing -> sending (CAS) y chequeo de finalización, por si todo el
    /// set quedó resuelto durante el dispatch (p.ej. todos suprimidos).
    async fn finish_fan_out(&self, campaign_id: &str, now: DateTime<Utc>) -> Result<()> {
        let mut conn = self.db_pool.acquire().await?;
        sqlx::query(
            r#"
            UPDATE campaigns
            SET status = 'sending', updated_at = ?2, version = version + 1
            WHERE id = ?1 AND status = 'processing'
            "#,
        )
        .bind(campaign_id)
        .bind(ts(now))
        .execute(&mut *conn)
        .await?;
        let campaign = fetch_campaign(&mut conn, campaign_id).await?;
        drop(conn);

        if campaign.status.is_active() {
            self.campaigns.check_completion(campaign_id, now).await?;
        }
        Ok(())
    }
}
