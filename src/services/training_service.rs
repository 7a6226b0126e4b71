//! services/training_service.rs
//! Entrenamiento de remitentes: sube (o, en modo automático, ajusta) el
//! límite diario como mucho una vez por ventana de 24h por remitente.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};

use crate::collaborators::ReputationSignal;
use crate::models::sender_model::{
    HealthScore, SenderCapacity, TrainingDecision, TrainingMode, TrainingReport,
};
use crate::services::sender_service::SenderService;

/// Política del modo automático: de la señal de reputación al nuevo límite.
pub trait TrainingPolicy: Send + Sync {
    fn next_limit(&self, current: i64, max: i64, health: HealthScore) -> i64;
}

/// healthy -> +X%, degraded -> mantener, critical -> -Y% (Y=0 mantiene).
#[derive(Debug, Clone)]
pub struct ReputationCurve {
    pub healthy_increase_pct: i64,
    pub critical_decrease_pct: i64,
}

impl TrainingPolicy for ReputationCurve {
    fn next_limit(&self, current: i64, max: i64, health: HealthScore) -> i64 {
        match health {
            HealthScore::Healthy => manual_next_limit(current, self.healthy_increase_pct, max),
            HealthScore::Degraded => current,
            HealthScore::Critical => {
                let decrease = current * self.critical_decrease_pct / 100;
                (current - decrease).max(0)
            }
        }
    }
}

/// `current + floor(current * pct / 100)`, acotado a `max`.
pub fn manual_next_limit(current: i64, pct: i64, max: i64) -> i64 {
    if current >= max {
        return current.min(max);
    }
    let increase = current * pct.max(0) / 100;
    (current + increase).min(max)
}

#[derive(Clone)]
pub struct TrainingService {
    senders: SenderService,
    reputation: Arc<dyn ReputationSignal>,
    policy: Arc<dyn TrainingPolicy>,
    default_mode: TrainingMode,
    locks: Arc<Mutex<HashMap<String, Arc<tokio::sync::Mutex<()>>>>>,
}

impl TrainingService {
    pub fn new(
        senders: SenderService,
        reputation: Arc<dyn ReputationSignal>,
        policy: Arc<dyn TrainingPolicy>,
        default_mode: TrainingMode,
    ) -> Self {
        Self {
            senders,
            reputation,
            policy,
            default_mode,
            locks: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Una pasada sobre todos los remitentes entrenables. Los errores de un
    /// remitente se loguean y no frenan al resto.
    pub async fn run_sender_training(&self, now: DateTime<Utc>) -> Result<TrainingReport> {
        let candidates = self.senders.list_trainable().await?;
        let mut report = TrainingReport::default();

        for capacity in candidates {
            report.examined += 1;
            match self.train_sender(&capacity.sender_id, now).await {
                Ok(TrainingDecision::Increased { .. }) => report.increased += 1,
                Ok(TrainingDecision::Decreased { .. }) => report.decreased += 1,
                Ok(_) => report.unchanged += 1,
                Err(e) => {
                    report.errors += 1;
                    log::error!(
                        "(run_sender_training) Error entrenando {}: {:?}",
                        capacity.sender_id,
                        e
                    );
                }
            }
        }

        log::info!("(run_sender_training) Pasada terminada: {:?}", report);
        Ok(report)
    }

    /// Entrena un remitente. Serializado por remitente dentro del proceso
    /// (mutex) y entre procesos (UPDATE condicional sobre límite y ventana).
    pub async fn train_sender(&self, sender_id: &str, now: DateTime<Utc>) -> Result<TrainingDecision> {
        let lock = self.lock_for(sender_id)?;
        let _guard = lock.lock().await;

        let capacity = self.senders.get_capacity(sender_id).await?;
        let mode = capacity.effective_mode(self.default_mode);
        if mode == TrainingMode::Disabled {
            return Ok(TrainingDecision::Disabled);
        }

        let window_start = now - Duration::hours(24);
        if matches!(capacity.last_trained_at, Some(last) if last > window_start) {
            return Ok(TrainingDecision::NotDue);
        }

        let target = self.target_limit(&capacity, mode).await?;
        let current = capacity.current_daily_limit;
        if target == current {
            return Ok(if current >= capacity.max_daily_limit {
                TrainingDecision::AtMaximum
            } else {
                TrainingDecision::Held
            });
        }

        let applied = self
            .senders
            .apply_trained_limit(sender_id, current, target, window_start, now)
            .await?;
        if !applied {
            log::warn!(
                "(train_sender) Otro proceso entrenó {} en esta ventana; no se aplica",
                sender_id
            );
            return Ok(TrainingDecision::Conflict);
        }

        log::info!(
            "(train_sender) {} ({}) límite diario {} -> {}",
            sender_id,
            mode,
            current,
            target
        );
        Ok(if target > current {
            TrainingDecision::Increased {
                from: current,
                to: target,
            }
        } else {
            TrainingDecision::Decreased {
                from: current,
                to: target,
            }
        })
    }

    async fn target_limit(&self, capacity: &SenderCapacity, mode: TrainingMode) -> Result<i64> {
        let current = capacity.current_daily_limit;
        let max = capacity.max_daily_limit;
        let target = match mode {
            TrainingMode::Manual => {
                manual_next_limit(current, capacity.manual_daily_increase_pct, max)
            }
            TrainingMode::Automatic => {
                let health = self
                    .reputation
                    .get_health_score(&capacity.sender_id)
                    .await?;
                self.policy.next_limit(current, max, health)
            }
            TrainingMode::Disabled => current,
        };
        Ok(target.clamp(0, max))
    }

    fn lock_for(&self, sender_id: &str) -> Result<Arc<tokio::sync::Mutex<()>>> {
        let mut locks = self
            .locks
            .lock()
            .map_err(|_| anyhow!("training lock map poisoned"))?;
        Ok(locks
            .entry(sender_id.to_string())
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone())
    }
}
