//! handlers/maintenance_handler.rs
//! Operaciones administrativas: disparar sweeper/entrenamiento a mano y
//! gestionar la cola de dead-letters.

use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde::Deserialize;
use serde_json::json;

use crate::handlers::internal_error_response;
use crate::services::{
    queue_service::QueueService, sweeper_service::SweeperService,
    training_service::TrainingService,
};

#[derive(Deserialize)]
pub struct DeadLetterQuery {
    limit: Option<i64>,
}

/// POST /api/maintenance/sweep
pub async fn run_sweep_endpoint(sweeper_service: web::Data<SweeperService>) -> HttpResponse {
    match sweeper_service.run_reconciliation_sweep(Utc::now()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => internal_error_response(&e),
    }
}

/// POST /api/maintenance/train
pub async fn run_training_endpoint(training_service: web::Data<TrainingService>) -> HttpResponse {
    match training_service.run_sender_training(Utc::now()).await {
        Ok(report) => HttpResponse::Ok().json(report),
        Err(e) => internal_error_response(&e),
    }
}

/// GET /api/queue/dead-letters
pub async fn list_dead_letters_endpoint(
    queue_service: web::Data<QueueService>,
    query: web::Query<DeadLetterQuery>,
) -> HttpResponse {
    let limit = query.limit.unwrap_or(50).clamp(1, 500);
    match queue_service.list_dead_letters(limit).await {
        Ok(jobs) => HttpResponse::Ok().json(jobs),
        Err(e) => internal_error_response(&e),
    }
}

/// POST /api/queue/dead-letters/{id}/requeue
pub async fn requeue_dead_letter_endpoint(
    queue_service: web::Data<QueueService>,
    path: web::Path<String>,
) -> HttpResponse {
    let job_id = path.into_inner();
    match queue_service.requeue_dead_letter(&job_id, Utc::now()).await {
        Ok(true) => HttpResponse::Ok().json(json!({
            "success": true,
            "job_id": job_id
        })),
        Ok(false) => HttpResponse::NotFound().json(json!({
            "success": false,
            "error": format!("dead letter {} not found", job_id)
        })),
        Err(e) => internal_error_response(&e),
    }
}

/// DELETE /api/queue/campaigns/{id}
pub async fn purge_campaign_jobs_endpoint(
    queue_service: web::Data<QueueService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    match queue_service.purge_campaign(&campaign_id).await {
        Ok(purged) => {
            log::warn!("Purgados {} jobs de la campaña {}", purged, campaign_id);
            HttpResponse::Ok().json(json!({
                "success": true,
                "purged": purged
            }))
        }
        Err(e) => internal_error_response(&e),
    }
}
