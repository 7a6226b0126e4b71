//! handlers/sender_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::engine_error_response;
use crate::models::sender_model::{CreateSenderRequest, ResetLimitRequest};
use crate::services::sender_service::SenderService;

/// POST /api/senders
pub async fn create_sender_endpoint(
    sender_service: web::Data<SenderService>,
    body: web::Json<CreateSenderRequest>,
) -> HttpResponse {
    match sender_service.create_sender(body.into_inner()).await {
        Ok(sender) => HttpResponse::Created().json(json!({
            "success": true,
            "sender": sender
        })),
        Err(e) => engine_error_response(&e),
    }
}

/// POST /api/senders/{id}/reset-limit
pub async fn reset_limit_endpoint(
    sender_service: web::Data<SenderService>,
    path: web::Path<String>,
    body: web::Json<ResetLimitRequest>,
) -> HttpResponse {
    let sender_id = path.into_inner();
    match sender_service
        .reset_limit(&sender_id, body.current_daily_limit)
        .await
    {
        Ok(capacity) => HttpResponse::Ok().json(json!({
            "success": true,
            "capacity": capacity
        })),
        Err(e) => engine_error_response(&e),
    }
}
