//! models/campaign_model.rs
//! Campañas, estados y comandos de usuario.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::{parse_opt_ts, parse_ts};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignStatus {
    Draft,
    Processing,
    Sending,
    Paused,
    Completed,
    Failed,
    Stopped,
}

impl CampaignStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            CampaignStatus::Draft => "draft",
            CampaignStatus::Processing => "processing",
            CampaignStatus::Sending => "sending",
            CampaignStatus::Paused => "paused",
            CampaignStatus::Completed => "completed",
            CampaignStatus::Failed => "failed",
            CampaignStatus::Stopped => "stopped",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            CampaignStatus::Completed | CampaignStatus::Failed | CampaignStatus::Stopped
        )
    }

    /// Estados en los que los envíos avanzan y puede detectarse la finalización.
    pub fn is_active(&self) -> bool {
        matches!(self, CampaignStatus::Processing | CampaignStatus::Sending)
    }
}

impl fmt::Display for CampaignStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for CampaignStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "draft" => Ok(CampaignStatus::Draft),
            "processing" => Ok(CampaignStatus::Processing),
            "sending" => Ok(CampaignStatus::Sending),
            "paused" => Ok(CampaignStatus::Paused),
            "completed" => Ok(CampaignStatus::Completed),
            "failed" => Ok(CampaignStatus::Failed),
            "stopped" => Ok(CampaignStatus::Stopped),
            other => Err(anyhow!("Estado de campaña desconocido: {other}")),
        }
    }
}

/// Comandos explícitos que un usuario puede aplicar a una campaña.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CampaignCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

impl CampaignCommand {
    /// Estados desde los que el comando es válido.
    pub fn allowed_from(&self) -> &'static [CampaignStatus] {
        match self {
            CampaignCommand::Start => &[CampaignStatus::Draft],
            CampaignCommand::Pause => &[CampaignStatus::Processing, CampaignStatus::Sending],
            CampaignCommand::Resume => &[CampaignStatus::Paused],
            CampaignCommand::Stop => &[
                CampaignStatus::Draft,
                CampaignStatus::Processing,
                CampaignStatus::Sending,
                CampaignStatus::Paused,
            ],
        }
    }

    pub fn is_allowed_from(&self, status: CampaignStatus) -> bool {
        self.allowed_from().contains(&status)
    }
}

impl fmt::Display for CampaignCommand {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CampaignCommand::Start => "start",
            CampaignCommand::Pause => "pause",
            CampaignCommand::Resume => "resume",
            CampaignCommand::Stop => "stop",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Campaign {
    pub id: String,
    pub owner_id: String,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub status: CampaignStatus,
    pub recipient_count: i64,
    pub total_sent: i64,
    pub total_failed: i64,
    pub dispatched_count: i64,
    pub version: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Campaign {
    pub const COLUMNS: &'static str = "id, owner_id, name, subject, content, status, \
        recipient_count, total_sent, total_failed, dispatched_count, version, \
        started_at, completed_at, created_at, updated_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let status: String = row.try_get("status")?;
        Ok(Campaign {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            name: row.try_get("name")?,
            subject: row.try_get("subject")?,
            content: row.try_get("content")?,
            status: status.parse()?,
            recipient_count: row.try_get("recipient_count")?,
            total_sent: row.try_get("total_sent")?,
            total_failed: row.try_get("total_failed")?,
            dispatched_count: row.try_get("dispatched_count")?,
            version: row.try_get("version")?,
            started_at: parse_opt_ts(row.try_get("started_at")?)?,
            completed_at: parse_opt_ts(row.try_get("completed_at")?)?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
            updated_at: parse_ts(&row.try_get::<String, _>("updated_at")?)?,
        })
    }

    pub fn accounted(&self) -> i64 {
        self.total_sent + self.total_failed
    }

    pub fn is_fully_accounted(&self) -> bool {
        self.accounted() >= self.recipient_count
    }
}

/// Variante de contenido (A/B) con su peso relativo.
#[derive(Debug, Clone, Serialize)]
pub struct CampaignVariant {
    pub id: String,
    pub subject: String,
    pub content: String,
    pub weight: i64,
}

/// Request para crear una campaña en `draft`
#[derive(Debug, Clone, Deserialize)]
pub struct CreateCampaignRequest {
    pub owner_id: String,
    pub name: String,
    pub subject: String,
    pub content: String,
    pub recipients: Vec<String>,
    pub sender_ids: Vec<String>,
    pub variants: Option<Vec<VariantRequest>>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct VariantRequest {
    pub subject: String,
    pub content: String,
    pub weight: Option<u32>,
}

/// Respuesta para el polling de la UI
#[derive(Debug, Clone, Serialize)]
pub struct CampaignStatusResponse {
    pub id: String,
    pub status: CampaignStatus,
    pub recipient_count: i64,
    pub total_sent: i64,
    pub total_failed: i64,
    pub pending: i64,
    pub opened: i64,
    pub clicked: i64,
    pub unsubscribed: i64,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}
