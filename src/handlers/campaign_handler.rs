//! handlers/campaign_handler.rs
use actix_web::{web, HttpResponse};
use serde_json::json;

use crate::handlers::{engine_error_response, internal_error_response};
use crate::models::campaign_model::{Campaign, CreateCampaignRequest};
use crate::services::{campaign_service::CampaignService, sweeper_service::SweeperService};

fn command_response(result: crate::errors::EngineResult<Campaign>) -> HttpResponse {
    match result {
        Ok(campaign) => HttpResponse::Ok().json(json!({
            "success": true,
            "campaign": campaign
        })),
        Err(e) => engine_error_response(&e),
    }
}

/// POST /api/campaigns
pub async fn create_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    body: web::Json<CreateCampaignRequest>,
) -> HttpResponse {
    match campaign_service.create_campaign(body.into_inner()).await {
        Ok(campaign) => HttpResponse::Created().json(json!({
            "success": true,
            "campaign": campaign
        })),
        Err(e) => engine_error_response(&e),
    }
}

/// GET /api/campaigns/{id}
pub async fn campaign_status_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    match campaign_service.get_campaign_status(&campaign_id).await {
        Ok(status) => HttpResponse::Ok().json(status),
        Err(e) => engine_error_response(&e),
    }
}

/// POST /api/campaigns/{id}/start
pub async fn start_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    command_response(campaign_service.start_campaign(&path.into_inner()).await)
}

/// POST /api/campaigns/{id}/pause
pub async fn pause_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    command_response(campaign_service.pause_campaign(&path.into_inner()).await)
}

/// POST /api/campaigns/{id}/resume
pub async fn resume_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    command_response(campaign_service.resume_campaign(&path.into_inner()).await)
}

/// POST /api/campaigns/{id}/stop
pub async fn stop_campaign_endpoint(
    campaign_service: web::Data<CampaignService>,
    path: web::Path<String>,
) -> HttpResponse {
    command_response(campaign_service.stop_campaign(&path.into_inner()).await)
}

/// GET /api/campaigns/{id}/audit
pub async fn campaign_audit_endpoint(
    sweeper_service: web::Data<SweeperService>,
    path: web::Path<String>,
) -> HttpResponse {
    let campaign_id = path.into_inner();
    match sweeper_service.list_audit(&campaign_id).await {
        Ok(entries) => {
            let entries: Vec<_> = entries
                .into_iter()
                .map(|(action, details)| json!({ "action": action, "details": details }))
                .collect();
            HttpResponse::Ok().json(json!({
                "campaign_id": campaign_id,
                "entries": entries
            }))
        }
        Err(e) => internal_error_response(&e),
    }
}
