//! models/queue_model.rs
//! Trabajos de la cola y sus payloads.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::parse_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobKind {
    DispatchCampaign,
    SendEmail,
}

impl JobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobKind::DispatchCampaign => "dispatch_campaign",
            JobKind::SendEmail => "send_email",
        }
    }
}

impl fmt::Display for JobKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "dispatch_campaign" => Ok(JobKind::DispatchCampaign),
            "send_email" => Ok(JobKind::SendEmail),
            other => Err(anyhow!("Tipo de job desconocido: {other}")),
        }
    }
}

/// Payload del job `dispatch_campaign`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DispatchTask {
    pub campaign_id: String,
}

/// Payload del job `send_email` (un destinatario)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SendTask {
    pub campaign_id: String,
    pub recipient: String,
    pub tracking_id: String,
    pub sender_id: String,
    pub variant_id: Option<String>,
}

/// Job reclamado por un worker
#[derive(Debug, Clone)]
pub struct QueueJob {
    pub id: String,
    pub kind: JobKind,
    pub campaign_id: String,
    pub payload: String,
    /// Incluye el intento en curso
    pub attempts: i64,
    pub max_attempts: i64,
}

impl QueueJob {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let kind: String = row.try_get("kind")?;
        Ok(QueueJob {
            id: row.try_get("id")?,
            kind: kind.parse()?,
            campaign_id: row.try_get("campaign_id")?,
            payload: row.try_get("payload")?,
            attempts: row.try_get("attempts")?,
            max_attempts: row.try_get("max_attempts")?,
        })
    }

    pub fn is_last_attempt(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

/// Qué pasó con un job que falló
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FailureDisposition {
    Retrying { run_at: DateTime<Utc> },
    DeadLettered,
}

#[derive(Debug, Clone, Serialize)]
pub struct DeadLetter {
    pub id: String,
    pub kind: JobKind,
    pub campaign_id: String,
    pub payload: String,
    pub attempts: i64,
    pub last_error: Option<String>,
    pub updated_at: DateTime<Utc>,
}

impl DeadLetter {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let kind: String = row.try_get("kind")?;
        Ok(DeadLetter {
            id: row.try_get("id")?,
            kind: kind.parse()?,
            campaign_id: row.try_get("campaign_id")?,
            payload: row.try_get("payload")?,
            attempts: row.try_get("attempts")?,
            last_error: row.try_get("last_error")?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        })
    }
}
