// Route exports
pub mod matches;

use actix_web::web;

/// Mount every endpoint under `/api/v1`
///
/// Handlers expect `web::Data<matches::AppState>` to be registered on the app.
pub fn configure_routes(cfg: &mut web::ServiceConfig) {
    cfg.service(web::scope("/api/v1").configure(matches::configure));
}
