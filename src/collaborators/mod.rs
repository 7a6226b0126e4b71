//! collaborators/mod.rs
//! Interfaces de los colaboradores externos que consume el motor, más sus
//! implementaciones por defecto (SQLite, SMTP, HTTP).

use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;

use crate::models::sender_model::{HealthScore, SenderProfile};

pub mod content;
pub mod reputation;
pub mod smtp_transport;
pub mod suppression;

/// ¿La dirección está suprimida (unsubscribe, hard bounce, queja)?
#[async_trait]
pub trait SuppressionOracle: Send + Sync {
    async fn is_suppressed(&self, address: &str) -> Result<bool>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SendOutcome {
    Success,
    PermanentFailure(String),
    TransientFailure(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedContent {
    pub subject: String,
    pub html: String,
}

/// Transporte de correo. Nunca devuelve error: toda falla se clasifica.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(
        &self,
        sender: &SenderProfile,
        recipient: &str,
        content: &RenderedContent,
    ) -> SendOutcome;
}

#[async_trait]
pub trait ReputationSignal: Send + Sync {
    async fn get_health_score(&self, sender_id: &str) -> Result<HealthScore>;
}

/// Render de plantilla + inyección de pixel/unsubscribe. Recibe el
/// `tracking_id` porque los links de tracking dependen de él.
#[async_trait]
pub trait ContentResolver: Send + Sync {
    async fn render(
        &self,
        campaign_id: &str,
        variant_id: Option<&str>,
        recipient: &str,
        tracking_id: &str,
    ) -> Result<RenderedContent>;
}

/// Conjunto de colaboradores que se inyecta en los servicios.
#[derive(Clone)]
pub struct Collaborators {
    pub suppression: Arc<dyn SuppressionOracle>,
    pub transport: Arc<dyn Transport>,
    pub reputation: Arc<dyn ReputationSignal>,
    pub content: Arc<dyn ContentResolver>,
}
