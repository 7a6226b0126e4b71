//! models/sender_model.rs
//! Remitentes (identidad SMTP) y su capacidad diaria.

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::parse_opt_ts;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TrainingMode {
    Manual,
    Automatic,
    Disabled,
}

impl TrainingMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            TrainingMode::Manual => "manual",
            TrainingMode::Automatic => "automatic",
            TrainingMode::Disabled => "disabled",
        }
    }
}

impl fmt::Display for TrainingMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TrainingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "manual" => Ok(TrainingMode::Manual),
            "automatic" => Ok(TrainingMode::Automatic),
            "disabled" => Ok(TrainingMode::Disabled),
            other => Err(anyhow!("Modo de entrenamiento desconocido: {other}")),
        }
    }
}

/// Señal de reputación entregada por el procesamiento de rebotes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthScore {
    Healthy,
    Degraded,
    Critical,
}

/// Datos necesarios para enviar a través de un remitente
#[derive(Debug, Clone, Serialize)]
pub struct SenderProfile {
    pub id: String,
    pub owner_id: String,
    pub from_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    #[serde(skip_serializing)]
    pub smtp_pass: String,
    pub active: bool,
}

impl SenderProfile {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let port: i64 = row.try_get("smtp_port")?;
        Ok(SenderProfile {
            id: row.try_get("id")?,
            owner_id: row.try_get("owner_id")?,
            from_address: row.try_get("from_address")?,
            smtp_host: row.try_get("smtp_host")?,
            smtp_port: u16::try_from(port).map_err(|_| anyhow!("smtp_port fuera de rango"))?,
            smtp_user: row.try_get("smtp_user")?,
            smtp_pass: row.try_get("smtp_pass")?,
            active: row.try_get::<i64, _>("active")? != 0,
        })
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct SenderCapacity {
    pub sender_id: String,
    pub current_daily_limit: i64,
    pub max_daily_limit: i64,
    /// `None` = usar el modo por defecto del sistema
    pub training_mode: Option<TrainingMode>,
    pub manual_daily_increase_pct: i64,
    pub last_trained_at: Option<DateTime<Utc>>,
}

impl SenderCapacity {
    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        let mode: Option<String> = row.try_get("training_mode")?;
        Ok(SenderCapacity {
            sender_id: row.try_get("id")?,
            current_daily_limit: row.try_get("current_daily_limit")?,
            max_daily_limit: row.try_get("max_daily_limit")?,
            training_mode: mode.as_deref().map(str::parse::<TrainingMode>).transpose()?,
            manual_daily_increase_pct: row.try_get("manual_daily_increase_pct")?,
            last_trained_at: parse_opt_ts(row.try_get("last_trained_at")?)?,
        })
    }

    pub fn effective_mode(&self, default_mode: TrainingMode) -> TrainingMode {
        self.training_mode.unwrap_or(default_mode)
    }
}

/// Remitente asignable en el dispatch, con su presupuesto restante del día.
#[derive(Debug, Clone)]
pub struct SenderBudget {
    pub sender_id: String,
    pub remaining: i64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateSenderRequest {
    pub owner_id: String,
    pub from_address: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub current_daily_limit: i64,
    pub max_daily_limit: Option<i64>,
    pub training_mode: Option<TrainingMode>,
    pub manual_daily_increase_pct: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ResetLimitRequest {
    pub current_daily_limit: i64,
}

/// Resultado de entrenar un remitente en una pasada.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum TrainingDecision {
    Increased { from: i64, to: i64 },
    Decreased { from: i64, to: i64 },
    Held,
    AtMaximum,
    NotDue,
    Disabled,
    /// Otro proceso aplicó un cambio en la misma ventana
    Conflict,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct TrainingReport {
    pub examined: usize,
    pub increased: usize,
    pub decreased: usize,
    pub unchanged: usize,
    pub errors: usize,
}
