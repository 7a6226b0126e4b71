//! handlers/tracking_handler.rs
use actix_web::{web, HttpResponse};
use chrono::Utc;
use serde_json::json;

use crate::handlers::engine_error_response;
use crate::models::tracking_model::BeaconKind;
use crate::services::tracking_service::TrackingService;

/// GET|POST /api/tracking/{tracking_id}/{open|click|unsubscribe}
pub async fn beacon_endpoint(
    tracking_service: web::Data<TrackingService>,
    path: web::Path<(String, String)>,
) -> HttpResponse {
    let (tracking_id, kind) = path.into_inner();
    let kind: BeaconKind = match kind.parse() {
        Ok(kind) => kind,
        Err(e) => {
            return HttpResponse::BadRequest().json(json!({
                "success": false,
                "error": format!("{}", e)
            }))
        }
    };

    match tracking_service
        .record_beacon(&tracking_id, kind, Utc::now())
        .await
    {
        Ok(record) => HttpResponse::Ok().json(json!({
            "success": true,
            "tracking": record
        })),
        Err(e) => engine_error_response(&e),
    }
}
