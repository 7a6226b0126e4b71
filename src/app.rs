//! app.rs
use crate::handlers::{campaign_handler, maintenance_handler, sender_handler, tracking_handler};
use actix_web::web;

pub fn init_app(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api")
            .service(
                web::scope("/campaigns")
                    .route(
                        "",
                        web::post().to(campaign_handler::create_campaign_endpoint),
                    )
                    .route(
                        "/{id}",
                        web::get().to(campaign_handler::campaign_status_endpoint),
                    )
                    .route(
                        "/{id}/audit",
                        web::get().to(campaign_handler::campaign_audit_endpoint),
                    )
                    .route(
                        "/{id}/start",
                        web::post().to(campaign_handler::start_campaign_endpoint),
                    )
                    .route(
                        "/{id}/pause",
                        web::post().to(campaign_handler::pause_campaign_endpoint),
                    )
                    .route(
                        "/{id}/resume",
                        web::post().to(campaign_handler::resume_campaign_endpoint),
                    )
                    .route(
                        "/{id}/stop",
                        web::post().to(campaign_handler::stop_campaign_endpoint),
                    ),
            )
            .service(
                web::scope("/tracking")
                    .route(
                        "/{tracking_id}/{kind}",
                        web::get().to(tracking_handler::beacon_endpoint),
                    )
                    .route(
                        "/{tracking_id}/{kind}",
                        web::post().to(tracking_handler::beacon_endpoint),
                    ),
            )
            .service(
                web::scope("/senders")
                    .route("", web::post().to(sender_handler::create_sender_endpoint))
                    .route(
                        "/{id}/reset-limit",
                        web::post().to(sender_handler::reset_limit_endpoint),
                    ),
            )
            .service(
                web::scope("/queue")
                    .route(
                        "/dead-letters",
                        web::get().to(maintenance_handler::list_dead_letters_endpoint),
                    )
                    .route(
                        "/dead-letters/{id}/requeue",
                        web::post().to(maintenance_handler::requeue_dead_letter_endpoint),
                    )
                    .route(
                        "/campaigns/{id}",
                        web::delete().to(maintenance_handler::purge_campaign_jobs_endpoint),
                    ),
            )
            .service(
                web::scope("/maintenance")
                    .route(
                        "/sweep",
                        web::post().to(maintenance_handler::run_sweep_endpoint),
                    )
                    .route(
                        "/train",
                        web::post().to(maintenance_handler::run_training_endpoint),
                    ),
            ),
    );
}
