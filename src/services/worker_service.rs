//! services/worker_service.rs
//! Workers de la cola: procesan `dispatch_campaign` y `send_email`.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use tokio::sync::watch;
use tokio::task::JoinHandle;

use crate::collaborators::{
    suppression::{record_suppression, REASON_HARD_BOUNCE},
    Collaborators, SendOutcome,
};
use crate::config::engine_config::EngineConfig;
use crate::errors::EngineError;
use crate::models::{
    queue_model::{DispatchTask, FailureDisposition, JobKind, QueueJob, SendTask},
    tracking_model::DeliveryOutcome,
};
use crate::services::{
    campaign_service::CampaignService,
    dispatch_service::{DispatchOutcome, DispatchService, SUPPRESSED_REASON},
    queue_service::QueueService,
    sender_service::SenderService,
    tracking_service::TrackingService,
};

/// Qué hacer con el job después de procesarlo
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    /// Fuera de la cola (éxito, fallo permanente absorbido o no-op idempotente)
    Done,
    /// Reprogramar sin consumir intento
    Defer(Duration),
    /// Fallo transitorio: la cola decide reintento o dead-letter
    Retry(String),
}

#[derive(Clone)]
pub struct Worker {
    db_pool: sqlx::Pool<sqlx::Sqlite>,
    queue: QueueService,
    tracking: TrackingService,
    senders: SenderService,
    campaigns: CampaignService,
    dispatcher: DispatchService,
    collaborators: Collaborators,
    config: EngineConfig,
}

impl Worker {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        db_pool: sqlx::Pool<sqlx::Sqlite>,
        queue: QueueService,
        tracking: TrackingService,
        senders: SenderService,
        campaigns: CampaignService,
        dispatcher: DispatchService,
        collaborators: Collaborators,
        config: EngineConfig,
    ) -> Self {
        Self {
            db_pool,
            queue,
            tracking,
            senders,
            campaigns,
            dispatcher,
            collaborators,
            config,
        }
    }

    /// Procesa un job listo, si hay. Devuelve `false` si la cola estaba vacía.
    pub async fn process_next(&self, now: DateTime<Utc>) -> Result<bool> {
        let Some(job) = self.queue.claim_next(now).await? else {
            return Ok(false);
        };

        let outcome = match job.kind {
            JobKind::SendEmail => self.handle_send(&job, now).await,
            JobKind::DispatchCampaign => self.handle_dispatch(&job, now).await,
        };
        // Un error inesperado (DB, payload) cuenta como fallo transitorio.
        let outcome = outcome.unwrap_or_else(|e| JobOutcome::Retry(format!("{e:#}")));

        match outcome {
            JobOutcome::Done => self.queue.complete(&job.id).await?,
            JobOutcome::Defer(delay) => {
                log::info!(
                    "(worker) Job {} ({}) diferido {}s",
                    job.id,
                    job.kind,
                    delay.num_seconds()
                );
                self.queue.defer(&job.id, delay, now).await?
            }
            JobOutcome::Retry(error) => {
                match self.queue.fail(&job, &error, now).await? {
                    FailureDisposition::Retrying { run_at } => log::warn!(
                        "(worker) Job {} ({}) falló intento {}/{}: {}. Reintento en {}",
                        job.id,
                        job.kind,
                        job.attempts,
                        job.max_attempts,
                        error,
                        run_at
                    ),
                    FailureDisposition::DeadLettered => {
                        log::error!(
                            "(worker) Job {} ({}) a dead-letter tras {} intentos: {}",
                            job.id,
                            job.kind,
                            job.attempts,
                            error
                        );
                        self.on_dead_letter(&job, &error, now).await?;
                    }
                }
            }
        }
        Ok(true)
    }

    async fn handle_dispatch(&self, job: &QueueJob, now: DateTime<Utc>) -> Result<JobOutcome> {
        let task: DispatchTask =
            serde_json::from_str(&job.payload).context("Invalid dispatch payload")?;
        let outcome = self.dispatcher.dispatch_campaign(&task.campaign_id, now).await?;
        Ok(match outcome {
            DispatchOutcome::Finished { .. } | DispatchOutcome::Halted { .. } => JobOutcome::Done,
            DispatchOutcome::Deferred { .. } => {
                JobOutcome::Defer(Duration::seconds(self.config.capacity_defer_secs))
            }
        })
    }

    /// Un SendTask:
    /// 1. no-op si el ledger ya tiene resultado
    /// 2. re-chequeo de supresión y capacidad del remitente
    /// 3. envío por el transporte (con timeout)
    /// 4/5. resultado terminal en el ledger + contador atómico
    /// 6. fallos transitorios vuelven a la cola sin tocar contadores
    /// 7. chequeo de finalización
    pub async fn handle_send(&self, job: &QueueJob, now: DateTime<Utc>) -> Result<JobOutcome> {
        let task: SendTask = serde_json::from_str(&job.payload).context("Invalid send payload")?;

        let Some(record) = self.tracking.get(&task.campaign_id, &task.recipient).await? else {
            log::warn!(
                "(handle_send) Sin fila de ledger para {} / {}; se descarta",
                task.campaign_id,
                task.recipient
            );
            return Ok(JobOutcome::Done);
        };
        if record.is_terminal() {
            log::debug!(
                "(handle_send) Duplicado para tracking_id={}; ya tiene resultado",
                record.id
            );
            return Ok(JobOutcome::Done);
        }

        let suppressed = tokio::time::timeout(
            self.config.oracle_timeout(),
            self.collaborators.suppression.is_suppressed(&task.recipient),
        )
        .await
        .context("Suppression oracle timed out")??;
        if suppressed {
            self.finish(&task, DeliveryOutcome::Failed(SUPPRESSED_REASON.to_string()), now)
                .await?;
            return Ok(JobOutcome::Done);
        }

        if !self.senders.try_reserve_slot(&task.sender_id, now).await? {
            return Ok(JobOutcome::Defer(Duration::seconds(
                self.config.capacity_defer_secs,
            )));
        }

        let outcome = match self.attempt_delivery(&task).await {
            Ok(outcome) => outcome,
            Err(e) => SendOutcome::TransientFailure(format!("{e:#}")),
        };

        match outcome {
            SendOutcome::Success => {
                self.finish(&task, DeliveryOutcome::Sent, now).await?;
                Ok(JobOutcome::Done)
            }
            SendOutcome::PermanentFailure(reason) => {
                self.senders.release_slot(&task.sender_id, now).await?;
                let err = EngineError::PermanentSendFailure(reason.clone());
                log::warn!("(handle_send) {} -> {}", task.recipient, err);
                {
                    let mut conn = self.db_pool.acquire().await?;
                    record_suppression(&mut conn, &task.recipient, REASON_HARD_BOUNCE, now)
                        .await?;
                }
                self.finish(&task, DeliveryOutcome::Failed(reason), now).await?;
                Ok(JobOutcome::Done)
            }
            SendOutcome::TransientFailure(reason) => {
                self.senders.release_slot(&task.sender_id, now).await?;
                Ok(JobOutcome::Retry(
                    EngineError::TransientSendFailure(reason).to_string(),
                ))
            }
        }
    }

    async fn attempt_delivery(&self, task: &SendTask) -> Result<SendOutcome> {
        let sender = self.senders.get_profile(&task.sender_id).await?;
        let content = self
            .collaborators
            .content
            .render(
                &task.campaign_id,
                task.variant_id.as_deref(),
                &task.recipient,
                &task.tracking_id,
            )
            .await
            .context("Failed to render content")?;

        match tokio::time::timeout(
            self.config.send_timeout(),
            self.collaborators
                .transport
                .send(&sender, &task.recipient, &content),
        )
        .await
        {
            Ok(outcome) => Ok(outcome),
            Err(_) => Ok(SendOutcome::TransientFailure(format!(
                "transport timed out after {}s",
                self.config.send_timeout_secs
            ))),
        }
    }

    /// Resultado terminal + chequeo de finalización. Si otra entrega ya había
    /// escrito el resultado, no se toca ningún contador.
    async fn finish(
        &self,
        task: &SendTask,
        outcome: DeliveryOutcome,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let applied = self
            .tracking
            .record_outcome(&task.campaign_id, &task.tracking_id, &outcome, now)
            .await?;
        if applied {
            self.campaigns.check_completion(&task.campaign_id, now).await?;
        }
        Ok(())
    }

    /// Un SendTask que agotó los reintentos cuenta como `failed_at`.
    async fn on_dead_letter(&self, job: &QueueJob, error: &str, now: DateTime<Utc>) -> Result<()> {
        if job.kind != JobKind::SendEmail {
            // El sweeper se ocupa de campañas cuyo dispatch murió.
            return Ok(());
        }
        let task: SendTask = serde_json::from_str(&job.payload).context("Invalid send payload")?;
        let reason = format!("retry budget exhausted: {error}");
        self.finish(&task, DeliveryOutcome::Failed(reason), now).await
    }
}

/// Pool de workers: N loops independientes sobre la misma cola.
pub struct WorkerPool {
    handles: Vec<JoinHandle<()>>,
    shutdown: watch::Sender<bool>,
}

impl WorkerPool {
    pub fn spawn(worker: Arc<Worker>, count: usize, poll_interval: StdDuration) -> Self {
        let (shutdown, rx) = watch::channel(false);
        let handles = (0..count)
            .map(|id| {
                let worker = worker.clone();
                let mut rx = rx.clone();
                tokio::spawn(async move {
                    log::info!("(worker-{}) Iniciado", id);
                    loop {
                        if *rx.borrow() {
                            break;
                        }
                        match worker.process_next(Utc::now()).await {
                            Ok(true) => continue,
                            Ok(false) => {}
                            Err(e) => log::error!("(worker-{}) Error procesando job: {:?}", id, e),
                        }
                        tokio::select! {
                            _ = tokio::time::sleep(poll_interval) => {}
                            changed = rx.changed() => {
                                if changed.is_err() {
                                    break;
                                }
                            }
                        }
                    }
                    log::info!("(worker-{}) Detenido", id);
                })
            })
            .collect();

        WorkerPool { handles, shutdown }
    }

    /// Señala el cierre y espera a que los jobs en curso terminen.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        futures::future::join_all(self.handles).await;
    }
}
