use actix_web::web;

use super::handlers;

/// Configures the API routes
///
/// # Arguments
///
/// * `cfg` - The service configuration
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(
        web::scope("/api/v1")
            .route("/chains", web::get().to(handlers::get_owners))
            .route("/chains/{owner}", web::get().to(handlers::get_chain))
            .route("/chains/{owner}/blocks", web::post().to(handlers::record_session))
            .route("/chains/{owner}/blocks/append", web::post().to(handlers::append_block))
            .route("/chains/{owner}/blocks/{sequence_number}", web::get().to(handlers::get_block))
            .route(
                "/chains/{owner}/blocks/{sequence_number}/complete",
                web::post().to(handlers::complete_session),
            )
            .route("/chains/{owner}/tail", web::get().to(handlers::get_tail))
            .route("/chains/{owner}/verify", web::get().to(handlers::verify_owner))
            .route("/chains/{owner}/stats", web::get().to(handlers::get_stats))
            .route("/chains/{owner}/export", web::get().to(handlers::export_chain))
            .route("/verify", web::get().to(handlers::verify_all))
    );
}
