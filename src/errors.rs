//! errors.rs
//! Errores tipados del motor de campañas.

use actix_web::http::StatusCode;
use thiserror::Error;

use crate::models::campaign_model::{CampaignCommand, CampaignStatus};

pub type EngineResult<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    /// Comando ilegal para el estado actual. Se reporta al llamador, no se reintenta.
    #[error("cannot {command} campaign {campaign_id} while it is {from}")]
    InvalidTransition {
        campaign_id: String,
        command: CampaignCommand,
        from: CampaignStatus,
    },

    /// Ningún destinatario elegible después de filtrar supresiones.
    #[error("campaign {0} has no eligible recipients after suppression filtering")]
    EmptyRecipientSet(String),

    #[error("transient send failure: {0}")]
    TransientSendFailure(String),

    #[error("permanent send failure: {0}")]
    PermanentSendFailure(String),

    /// Dos escritores compitiendo por el mismo estado terminal (compare-and-set perdido).
    #[error("reconciliation conflict on campaign {0}")]
    ReconciliationConflict(String),

    #[error("campaign {0} not found")]
    CampaignNotFound(String),

    #[error("sender {0} not found")]
    SenderNotFound(String),

    #[error("tracking record {0} not found")]
    TrackingNotFound(String),

    /// Evento de beacon para un registro que todavía no tiene `sent_at`.
    #[error("tracking record {0} has not been sent yet")]
    BeaconBeforeSend(String),

    #[error("invalid input: {0}")]
    Validation(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl EngineError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            EngineError::InvalidTransition { .. } | EngineError::BeaconBeforeSend(_) => {
                StatusCode::CONFLICT
            }
            EngineError::EmptyRecipientSet(_) | EngineError::Validation(_) => {
                StatusCode::UNPROCESSABLE_ENTITY
            }
            EngineError::CampaignNotFound(_)
            | EngineError::SenderNotFound(_)
            | EngineError::TrackingNotFound(_) => StatusCode::NOT_FOUND,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
