//! models/tracking_model.rs
//! Ledger de entregas: una fila por (campaña, destinatario).

use std::fmt;
use std::str::FromStr;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{sqlite::SqliteRow, Row};

use super::{parse_opt_ts, parse_ts};

#[derive(Debug, Clone, Serialize)]
pub struct TrackingRecord {
    pub id: String,
    pub campaign_id: String,
    pub recipient: String,
    pub sender_id: Option<String>,
    pub variant_id: Option<String>,
    pub enqueued_at: Option<DateTime<Utc>>,
    pub sent_at: Option<DateTime<Utc>>,
    pub failed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<String>,
    pub opened_at: Option<DateTime<Utc>>,
    pub clicked_at: Option<DateTime<Utc>>,
    pub unsubscribed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl TrackingRecord {
    pub const COLUMNS: &'static str = "id, campaign_id, recipient, sender_id, variant_id, \
        enqueued_at, sent_at, failed_at, failure_reason, opened_at, clicked_at, \
        unsubscribed_at, created_at";

    pub fn from_row(row: &SqliteRow) -> Result<Self> {
        Ok(TrackingRecord {
            id: row.try_get("id")?,
            campaign_id: row.try_get("campaign_id")?,
            recipient: row.try_get("recipient")?,
            sender_id: row.try_get("sender_id")?,
            variant_id: row.try_get("variant_id")?,
            enqueued_at: parse_opt_ts(row.try_get("enqueued_at")?)?,
            sent_at: parse_opt_ts(row.try_get("sent_at")?)?,
            failed_at: parse_opt_ts(row.try_get("failed_at")?)?,
            failure_reason: row.try_get("failure_reason")?,
            opened_at: parse_opt_ts(row.try_get("opened_at")?)?,
            clicked_at: parse_opt_ts(row.try_get("clicked_at")?)?,
            unsubscribed_at: parse_opt_ts(row.try_get("unsubscribed_at")?)?,
            created_at: parse_ts(&row.try_get::<String, _>("created_at")?)?,
        })
    }

    pub fn is_terminal(&self) -> bool {
        self.sent_at.is_some() || self.failed_at.is_some()
    }
}

/// Resultado final de un intento de envío
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Sent,
    Failed(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BeaconKind {
    Open,
    Click,
    Unsubscribe,
}

impl BeaconKind {
    pub fn column(&self) -> &'static str {
        match self {
            BeaconKind::Open => "opened_at",
            BeaconKind::Click => "clicked_at",
            BeaconKind::Unsubscribe => "unsubscribed_at",
        }
    }
}

impl fmt::Display for BeaconKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BeaconKind::Open => "open",
            BeaconKind::Click => "click",
            BeaconKind::Unsubscribe => "unsubscribe",
        };
        f.write_str(s)
    }
}

impl FromStr for BeaconKind {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "open" => Ok(BeaconKind::Open),
            "click" => Ok(BeaconKind::Click),
            "unsubscribe" => Ok(BeaconKind::Unsubscribe),
            other => Err(anyhow!("Tipo de beacon desconocido: {other}")),
        }
    }
}

/// Totales derivados del ledger (fuente de verdad para el sweeper)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LedgerTotals {
    pub rows: i64,
    pub sent: i64,
    pub failed: i64,
    pub unenqueued: i64,
    pub opened: i64,
    pub clicked: i64,
    pub unsubscribed: i64,
}
