// API route configuration

use crate::api::handlers;
use actix_web::web;

pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.route("/health", web::get().to(handlers::health_check))
        .service(
            web::scope("/api/admin/ingest")
                .route("/full/{account_id}", web::post().to(handlers::ingest_full))
                .route("/{account_id}", web::get().to(handlers::ingest_recent))
                .route("/{account_id}", web::post().to(handlers::ingest_recent)),
        );
}
