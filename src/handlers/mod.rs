//! handlers/mod.rs
//! Endpoints HTTP del motor (campañas, tracking, remitentes, mantenimiento).

use actix_web::HttpResponse;
use serde_json::json;

use crate::errors::EngineError;

pub mod campaign_handler;
pub mod maintenance_handler;
pub mod sender_handler;
pub mod tracking_handler;

/// Traduce un `EngineError` al status HTTP que corresponde.
pub fn engine_error_response(e: &EngineError) -> HttpResponse {
    let status = e.status_code();
    if status.is_server_error() {
        log::error!("Error interno: {:?}", e);
    }
    HttpResponse::build(status).json(json!({
        "success": false,
        "error": e.to_string()
    }))
}

pub fn internal_error_response(e: &anyhow::Error) -> HttpResponse {
    log::error!("Error interno: {:?}", e);
    HttpResponse::InternalServerError().json(json!({
        "success": false,
        "error": format!("{:#}", e)
    }))
}
