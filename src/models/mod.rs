//! models/mod.rs
//! Módulo raíz para modelos/estructuras compartidas.

use anyhow::{Context, Result};
use chrono::{DateTime, SecondsFormat, Utc};

pub mod campaign_model;
pub mod queue_model;
pub mod sender_model;
pub mod sweep_model;
pub mod tracking_model;

/// Formato fijo (milisegundos + `Z`) para que las comparaciones de texto en
/// SQLite sean cronológicas.
pub fn ts(dt: DateTime<Utc>) -> String {
    dt.to_rfc3339_opts(SecondsFormat::Millis, true)
}

pub fn parse_ts(raw: &str) -> Result<DateTime<Utc>> {
    let parsed = DateTime::parse_from_rfc3339(raw)
        .with_context(|| format!("Timestamp inválido en DB: '{raw}'"))?;
    Ok(parsed.with_timezone(&Utc))
}

pub fn parse_opt_ts(raw: Option<String>) -> Result<Option<DateTime<Utc>>> {
    raw.as_deref().map(parse_ts).transpose()
}

/// Día UTC (YYYY-MM-DD) usado como clave de los contadores diarios.
pub fn day_key(dt: DateTime<Utc>) -> String {
    dt.format("%Y-%m-%d").to_string()
}
