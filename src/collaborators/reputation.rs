//! collaborators/reputation.rs
//! Señales de reputación para el entrenamiento automático.

use std::time::Duration as StdDuration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use reqwest::Client;
use serde::Deserialize;
use sqlx::{Pool, Sqlite};

use super::ReputationSignal;
use crate::models::{sender_model::HealthScore, ts};

/// Consulta un servicio externo: `GET {base}/senders/{id}/health`
/// -> `{"status": "healthy" | "degraded" | "critical"}`
#[derive(Clone)]
pub struct HttpReputationSignal {
    http_client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct HealthResponse {
    status: HealthScore,
}

impl HttpReputationSignal {
    /// `timeout` acota cada consulta: una API colgada no debe frenar el trainer.
    pub fn new(base_url: impl Into<String>, timeout: StdDuration) -> Result<Self> {
        let http_client = Client::builder()
            .timeout(timeout)
            .build()
            .context("Failed to build reputation HTTP client")?;
        Ok(Self {
            http_client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }
}

#[async_trait]
impl ReputationSignal for HttpReputationSignal {
    async fn get_health_score(&self, sender_id: &str) -> Result<HealthScore> {
        let url = format!("{}/senders/{}/health", self.base_url, sender_id);
        let resp = self
            .http_client
            .get(&url)
            .send()
            .await
            .context("Fallo al consultar reputation API")?;

        if !resp.status().is_success() {
            let body_txt = resp.text().await.unwrap_or_default();
            return Err(anyhow!("Reputation API respondió error: {}", body_txt));
        }
        let parsed = resp.json::<HealthResponse>().await?;
        Ok(parsed.status)
    }
}

/// Deriva la reputación de la tasa de fallos del propio ledger en una ventana.
#[derive(Debug, Clone)]
pub struct LedgerReputationSignal {
    db_pool: Pool<Sqlite>,
    window: Duration,
}

const DEGRADED_FAILURE_RATE: f64 = 0.02;
const CRITICAL_FAILURE_RATE: f64 = 0.05;
/// Con menos intentos que esto la muestra no dice nada: se mantiene el límite.
const MIN_SAMPLE: i64 = 20;

impl LedgerReputationSignal {
    pub fn new(db_pool: Pool<Sqlite>) -> Self {
        Self {
            db_pool,
            window: Duration::days(7),
        }
    }
}

pub fn classify_failure_rate(attempted: i64, failed: i64) -> HealthScore {
    if attempted < MIN_SAMPLE {
        return HealthScore::Degraded;
    }
    let rate = failed as f64 / attempted as f64;
    if rate >= CRITICAL_FAILURE_RATE {
        HealthScore::Critical
    } else if rate >= DEGRADED_FAILURE_RATE {
        HealthScore::Degraded
    } else {
        HealthScore::Healthy
    }
}

#[async_trait]
impl ReputationSignal for LedgerReputationSignal {
    async fn get_health_score(&self, sender_id: &str) -> Result<HealthScore> {
        let since = ts(Utc::now() - self.window);
        let (attempted, failed): (i64, i64) = sqlx::query_as(
            r#"
            SELECT
                COUNT(*),
                COALESCE(SUM(CASE WHEN failed_at IS NOT NULL
                                   AND failure_reason <> 'suppressed' THEN 1 ELSE 0 END), 0)
            FROM tracking_records
            WHERE sender_id = ?1
              AND (sent_at >= ?2 OR failed_at >= ?2)
            "#,
        )
        .bind(sender_id)
        .bind(since)
        .fetch_one(&self.db_pool)
        .await
        .context("Failed to compute sender failure rate")?;

        Ok(classify_failure_rate(attempted, failed))
    }
}
