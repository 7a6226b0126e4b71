//! config/engine_config.rs
//! Configuración global del motor de campañas. Los valores por defecto se
//! pueden sobreescribir con variables de entorno (o un `.env`).

use std::env;
use std::str::FromStr;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::models::sender_model::TrainingMode;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    pub database_url: String,
    pub bind_addr: String,
    pub port: u16,

    // Workers / cola
    pub worker_count: usize,
    pub worker_poll_interval_ms: u64,
    pub dispatch_batch_size: i64,
    pub job_max_attempts: i64,
    pub retry_base_delay_secs: i64,
    pub retry_max_delay_secs: i64,
    pub capacity_defer_secs: i64,
    pub job_lease_secs: i64,

    // Timeouts de colaboradores externos
    pub send_timeout_secs: u64,
    pub oracle_timeout_secs: u64,

    // Tareas programadas
    pub sweep_interval_secs: u64,
    pub stall_threshold_secs: i64,
    pub training_interval_secs: u64,

    // Entrenamiento de remitentes
    pub default_training_mode: TrainingMode,
    pub auto_healthy_increase_pct: i64,
    pub auto_critical_decrease_pct: i64,
    pub reputation_api_url: Option<String>,

    /// Base para los links de tracking (pixel, unsubscribe)
    pub tracking_base_url: String,
}

impl Default for EngineConfig {
    fn default() -> Self {
        EngineConfig {
            database_url: "sqlite:./data/campaigns.db?mode=rwc".to_string(),
            bind_addr: "0.0.0.0".to_string(),
            port: 5022,
            worker_count: 4,
            worker_poll_interval_ms: 500,
            dispatch_batch_size: 250,
            job_max_attempts: 3,
            retry_base_delay_secs: 30,
            retry_max_delay_secs: 3600,
            capacity_defer_secs: 900,
            job_lease_secs: 600,
            send_timeout_secs: 30,
            oracle_timeout_secs: 5,
            sweep_interval_secs: 300,
            stall_threshold_secs: 2 * 3600,
            training_interval_secs: 3600,
            default_training_mode: TrainingMode::Manual,
            auto_healthy_increase_pct: 10,
            auto_critical_decrease_pct: 0,
            reputation_api_url: None,
            tracking_base_url: "http://localhost:5022".to_string(),
        }
    }
}

impl EngineConfig {
    /// Lee la configuración desde el entorno. Las variables ausentes o mal
    /// formadas conservan el valor por defecto (se avisa en el log).
    pub fn from_env() -> Self {
        let d = EngineConfig::default();
        EngineConfig {
            database_url: env::var("DATABASE_URL").unwrap_or(d.database_url),
            bind_addr: env::var("BIND_ADDR").unwrap_or(d.bind_addr),
            port: env_or("PORT", d.port),
            worker_count: env_or("WORKER_COUNT", d.worker_count).max(1),
            worker_poll_interval_ms: env_or("WORKER_POLL_INTERVAL_MS", d.worker_poll_interval_ms),
            dispatch_batch_size: env_or("DISPATCH_BATCH_SIZE", d.dispatch_batch_size).max(1),
            job_max_attempts: env_or("JOB_MAX_ATTEMPTS", d.job_max_attempts).max(1),
            retry_base_delay_secs: env_or("RETRY_BASE_DELAY_SECS", d.retry_base_delay_secs),
            retry_max_delay_secs: env_or("RETRY_MAX_DELAY_SECS", d.retry_max_delay_secs),
            capacity_defer_secs: env_or("CAPACITY_DEFER_SECS", d.capacity_defer_secs),
            job_lease_secs: env_or("JOB_LEASE_SECS", d.job_lease_secs),
            send_timeout_secs: env_or("SEND_TIMEOUT_SECS", d.send_timeout_secs),
            oracle_timeout_secs: env_or("ORACLE_TIMEOUT_SECS", d.oracle_timeout_secs),
            sweep_interval_secs: env_or("SWEEP_INTERVAL_SECS", d.sweep_interval_secs).max(1),
            stall_threshold_secs: env_or("STALL_THRESHOLD_SECS", d.stall_threshold_secs),
            training_interval_secs: env_or("TRAINING_INTERVAL_SECS", d.training_interval_secs)
                .max(1),
            default_training_mode: env_or("DEFAULT_TRAINING_MODE", d.default_training_mode),
            auto_healthy_increase_pct: env_or(
                "AUTO_HEALTHY_INCREASE_PCT",
                d.auto_healthy_increase_pct,
            ),
            auto_critical_decrease_pct: env_or(
                "AUTO_CRITICAL_DECREASE_PCT",
                d.auto_critical_decrease_pct,
            ),
            reputation_api_url: env::var("REPUTATION_API_URL")
                .ok()
                .filter(|v| !v.trim().is_empty()),
            tracking_base_url: env::var("TRACKING_BASE_URL").unwrap_or(d.tracking_base_url),
        }
    }

    pub fn send_timeout(&self) -> Duration {
        Duration::from_secs(self.send_timeout_secs)
    }

    pub fn oracle_timeout(&self) -> Duration {
        Duration::from_secs(self.oracle_timeout_secs)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_millis(self.worker_poll_interval_ms)
    }
}

fn env_or<T: FromStr>(key: &str, default: T) -> T {
    match env::var(key) {
        Ok(raw) => match raw.trim().parse::<T>() {
            Ok(v) => v,
            Err(_) => {
                log::warn!("Valor inválido para {}='{}', usando el default", key, raw);
                default
            }
        },
        Err(_) => default,
    }
}
