use actix_web::{http::StatusCode, web, HttpResponse, Responder};
use std::path::PathBuf;
use std::sync::Arc;
use validator::Validate;

use crate::core::{AutoMatchScheduler, SchedulerError, StatsAggregator};
use crate::models::{
    BulkDeleteRequest, BulkDeleteResponse, DeleteResponse, ErrorResponse, HealthResponse,
    LastRunResponse, MatchFilter, RunMatchingRequest, SchedulerStatusResponse, SetIntervalRequest,
    UpdateStatusRequest,
};
use crate::services::{DemandRepository, MatchStore, PropertyRepository, StoreError};

/// Application state shared across all handlers
#[derive(Clone)]
pub struct AppState {
    pub scheduler: AutoMatchScheduler,
    pub store: Arc<MatchStore>,
    pub demands: Arc<dyn DemandRepository>,
    pub properties: Arc<dyn PropertyRepository>,
    pub stats: StatsAggregator,
    pub matches_path: Option<PathBuf>,
}

impl AppState {
    /// Wire the state from the scheduler's engine
    pub fn new(scheduler: AutoMatchScheduler, matches_path: Option<PathBuf>) -> Self {
        let engine = scheduler.engine();
        let store = Arc::clone(engine.store());
        Self {
            store: Arc::clone(&store),
            demands: Arc::clone(engine.demands()),
            properties: Arc::clone(engine.properties()),
            stats: StatsAggregator::new(store),
            scheduler,
            matches_path,
        }
    }

    /// Save the match snapshot after an operator mutation
    fn persist(&self) {
        if let Some(path) = &self.matches_path {
            if let Err(e) = self.store.save(path) {
                tracing::warn!("Failed to persist match snapshot to {}: {}", path.display(), e);
            }
        }
    }

    fn scheduler_status(&self) -> SchedulerStatusResponse {
        SchedulerStatusResponse {
            running: self.scheduler.is_running(),
            interval_minutes: self.scheduler.interval_minutes(),
            last_run_at: self.scheduler.last_run_at(),
        }
    }
}

/// Configure all match-related routes
pub fn configure(cfg: &mut web::ServiceConfig) {
    cfg
        .route("/health", web::get().to(health_check))
        .route("/matching/run", web::post().to(run_matching))
        .route("/matching/auto/run", web::post().to(run_auto_match))
        .route("/matching/auto/start", web::post().to(start_auto_match))
        .route("/matching/auto/stop", web::post().to(stop_auto_match))
        .route("/matching/auto/interval", web::put().to(set_interval))
        .route("/matching/auto/status", web::get().to(auto_match_status))
        .route("/matching/last-run", web::get().to(last_run))
        .route("/matches", web::get().to(list_matches))
        .route("/matches/stats", web::get().to(match_stats))
        .route("/matches/bulk-delete", web::post().to(bulk_delete))
        .route("/matches/{id}/status", web::patch().to(update_status))
        .route("/matches/{id}", web::delete().to(delete_match))
        .route("/demands/{id}/matches", web::get().to(demand_matches));
}

fn error_response(status: StatusCode, error: &str, message: impl Into<String>) -> HttpResponse {
    HttpResponse::build(status).json(ErrorResponse {
        error: error.to_string(),
        message: message.into(),
        status_code: status.as_u16(),
    })
}

/// Empty or whitespace-only bodies yield the default request
fn parse_optional_body<T: serde::de::DeserializeOwned + Default>(body: &[u8]) -> Result<T, serde_json::Error> {
    if body.iter().all(u8::is_ascii_whitespace) {
        Ok(T::default())
    } else {
        serde_json::from_slice(body)
    }
}

/// Health check endpoint
async fn health_check(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        matches: state.store.len(),
        timestamp: chrono::Utc::now(),
    })
}

/// Run the matching engine
///
/// POST /api/v1/matching/run
///
/// Request body (optional; an empty body runs every demand):
/// ```json
/// { "demandId": "string" }
/// ```
async fn run_matching(state: web::Data<AppState>, body: web::Bytes) -> impl Responder {
    let req = match parse_optional_body::<RunMatchingRequest>(&body) {
        Ok(req) => req,
        Err(e) => {
            tracing::info!("Rejected matching run body: {}", e);
            return error_response(StatusCode::BAD_REQUEST, "invalid_json", format!("Invalid JSON: {}", e));
        }
    };

    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    tracing::info!("Manual matching run requested, scope: {:?}", req.demand_id);

    let scheduler = state.scheduler.clone();
    let ran = web::block(move || scheduler.run_scoped(req.demand_id.as_deref())).await;

    match ran {
        Ok(Ok(summary)) => HttpResponse::Ok().json(summary),
        Ok(Err(e @ SchedulerError::Busy)) => error_response(StatusCode::CONFLICT, "Matching busy", e.to_string()),
        Ok(Err(e)) => error_response(StatusCode::BAD_REQUEST, "Matching rejected", e.to_string()),
        Err(e) => {
            tracing::error!("Matching run could not be scheduled: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Matching failed", e.to_string())
        }
    }
}

/// Trigger a full auto-match pass now
///
/// POST /api/v1/matching/auto/run
async fn run_auto_match(state: web::Data<AppState>) -> impl Responder {
    let scheduler = state.scheduler.clone();
    match web::block(move || scheduler.run_now()).await {
        Ok(outcome) => HttpResponse::Ok().json(outcome),
        Err(e) => {
            tracing::error!("Auto-match run could not be scheduled: {}", e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Matching failed", e.to_string())
        }
    }
}

async fn start_auto_match(state: web::Data<AppState>) -> impl Responder {
    state.scheduler.start();
    HttpResponse::Ok().json(state.scheduler_status())
}

async fn stop_auto_match(state: web::Data<AppState>) -> impl Responder {
    state.scheduler.stop();
    HttpResponse::Ok().json(state.scheduler_status())
}

/// Change the auto-match period
///
/// PUT /api/v1/matching/auto/interval
///
/// Request body:
/// ```json
/// { "minutes": 15 }
/// ```
async fn set_interval(
    state: web::Data<AppState>,
    req: web::Json<SetIntervalRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    match state.scheduler.set_interval(req.minutes) {
        Ok(()) => HttpResponse::Ok().json(state.scheduler_status()),
        Err(e) => error_response(StatusCode::BAD_REQUEST, "Invalid interval", e.to_string()),
    }
}

async fn auto_match_status(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.scheduler_status())
}

async fn last_run(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(LastRunResponse {
        last_run_at: state.scheduler.last_run_at(),
    })
}

/// List matches joined with their demand and counterpart
///
/// GET /api/v1/matches?status={status}&matchType={matchType}
async fn list_matches(
    state: web::Data<AppState>,
    filter: web::Query<MatchFilter>,
) -> impl Responder {
    let matches = state
        .store
        .list_enriched(&filter, state.demands.as_ref(), state.properties.as_ref());

    tracing::debug!("Listing {} matches for filter {:?}", matches.len(), *filter);

    HttpResponse::Ok().json(matches)
}

async fn match_stats(state: web::Data<AppState>) -> impl Responder {
    HttpResponse::Ok().json(state.stats.stats())
}

/// Matches owned by a demand plus demand-to-demand matches pointing at it
///
/// GET /api/v1/demands/{id}/matches
async fn demand_matches(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    HttpResponse::Ok().json(state.store.list_for_demand(&path))
}

/// Move a match along its lifecycle
///
/// PATCH /api/v1/matches/{id}/status
///
/// Request body:
/// ```json
/// { "status": "pending|notified|contacted|successful|rejected" }
/// ```
async fn update_status(
    state: web::Data<AppState>,
    path: web::Path<String>,
    req: web::Json<UpdateStatusRequest>,
) -> impl Responder {
    let id = path.into_inner();

    match state.store.update_status(&id, req.status) {
        Ok(Some(updated)) => {
            tracing::info!("Match {} is now {}", id, updated.status);
            state.persist();
            HttpResponse::Ok().json(updated)
        }
        Ok(None) => error_response(StatusCode::NOT_FOUND, "Match not found", format!("No match with id {}", id)),
        Err(e @ StoreError::InvalidTransition { .. }) => {
            error_response(StatusCode::CONFLICT, "Invalid status transition", e.to_string())
        }
        Err(e) => {
            tracing::error!("Failed to update match {}: {}", id, e);
            error_response(StatusCode::INTERNAL_SERVER_ERROR, "Failed to update match", e.to_string())
        }
    }
}

async fn delete_match(state: web::Data<AppState>, path: web::Path<String>) -> impl Responder {
    let id = path.into_inner();

    if state.store.delete(&id) {
        tracing::info!("Deleted match {}", id);
        state.persist();
        HttpResponse::Ok().json(DeleteResponse { deleted: true })
    } else {
        error_response(StatusCode::NOT_FOUND, "Match not found", format!("No match with id {}", id))
    }
}

/// Delete several matches; unknown ids are ignored
///
/// POST /api/v1/matches/bulk-delete
///
/// Request body:
/// ```json
/// { "ids": ["string"] }
/// ```
async fn bulk_delete(
    state: web::Data<AppState>,
    req: web::Json<BulkDeleteRequest>,
) -> impl Responder {
    if let Err(errors) = req.validate() {
        return error_response(StatusCode::BAD_REQUEST, "Validation failed", errors.to_string());
    }

    let deleted = state.store.bulk_delete(&req.ids);
    tracing::info!("Bulk delete removed {} of {} requested matches", deleted, req.ids.len());
    if deleted > 0 {
        state.persist();
    }

    HttpResponse::Ok().json(BulkDeleteResponse { deleted })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::{MatchScorer, MatchingEngine, SystemClock};
    use crate::models::{Demand, Match, Property};
    use crate::services::SnapshotRepository;
    use actix_web::{test, App};
    use serde_json::{json, Value};

    fn state() -> AppState {
        let demands: Vec<Demand> = serde_json::from_value(json!([
            {
                "id": "d1",
                "fullName": "Salma Bennani",
                "type": "search",
                "criteria": {
                    "transaction": "SALE",
                    "cities": ["Casablanca"],
                    "budgetMin": 1000000,
                    "budgetMax": 2000000
                }
            }
        ]))
        .unwrap();
        let properties: Vec<Property> = serde_json::from_value(json!([
            { "id": "p1", "type": "Appartement", "category": "SALE", "location": "Maarif, Casablanca",
              "city": "Casablanca", "priceNumeric": 1500000, "beds": 3, "areaNumeric": 120 },
            { "id": "p2", "type": "Villa", "category": "SALE", "location": "Hivernage, Marrakech",
              "city": "Marrakech", "priceNumeric": 9000000 }
        ]))
        .unwrap();

        let engine = MatchingEngine::new(
            MatchScorer::default(),
            Arc::new(SnapshotRepository::from_records(demands)),
            Arc::new(SnapshotRepository::from_records(properties)),
            Arc::new(MatchStore::default()),
        );
        AppState::new(AutoMatchScheduler::new(Arc::new(engine), Arc::new(SystemClock)), None)
    }

    macro_rules! app {
        ($state:expr) => {
            test::init_service(
                App::new()
                    .app_data(web::Data::new($state.clone()))
                    .configure(crate::routes::configure_routes),
            )
            .await
        };
    }

    #[actix_web::test]
    async fn test_health_reports_match_count() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/health").to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;

        assert_eq!(body["status"], "healthy");
        assert_eq!(body["matches"], 0);
    }

    #[actix_web::test]
    async fn test_run_then_list_enriched() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/matching/run")
            .set_json(json!({}))
            .to_request();
        let summary: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary["newMatches"], 1);

        let req = test::TestRequest::get()
            .uri("/api/v1/matches?status=pending&matchType=demand_to_property")
            .to_request();
        let listed: Value = test::call_and_read_body_json(&app, req).await;
        let listed = listed.as_array().unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0]["matchedEntityId"], "p1");
        assert_eq!(listed[0]["demand"]["fullName"], "Salma Bennani");
        assert_eq!(listed[0]["counterpart"]["kind"], "property");

        let req = test::TestRequest::get().uri("/api/v1/matching/last-run").to_request();
        let last: Value = test::call_and_read_body_json(&app, req).await;
        assert!(!last["lastRunAt"].is_null());
    }

    #[actix_web::test]
    async fn test_run_body_is_optional_but_must_be_valid() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::post().uri("/api/v1/matching/run").to_request();
        let summary: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(summary["demandsProcessed"], 1);

        let req = test::TestRequest::post()
            .uri("/api/v1/matching/run")
            .set_json(json!({ "demandId": 5 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::post()
            .uri("/api/v1/matching/run")
            .set_json(json!({ "demandId": "" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        // Only the empty-body run reached the engine
        assert_eq!(state.store.len(), 1);
        assert!(state.scheduler.last_run_at().is_some());
    }

    #[actix_web::test]
    async fn test_status_transitions_map_to_http_codes() {
        let state = state();
        state.scheduler.run_now();
        let id = state.store.snapshot()[0].id.clone();
        let app = app!(state);

        let req = test::TestRequest::patch()
            .uri(&format!("/api/v1/matches/{}/status", id))
            .set_json(json!({ "status": "contacted" }))
            .to_request();
        let updated: Match = test::call_and_read_body_json(&app, req).await;
        assert_eq!(updated.status.as_str(), "contacted");

        let req = test::TestRequest::patch()
            .uri(&format!("/api/v1/matches/{}/status", id))
            .set_json(json!({ "status": "pending" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let req = test::TestRequest::patch()
            .uri("/api/v1/matches/missing/status")
            .set_json(json!({ "status": "notified" }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_interval_validation() {
        let state = state();
        let app = app!(state);

        let req = test::TestRequest::put()
            .uri("/api/v1/matching/auto/interval")
            .set_json(json!({ "minutes": 0 }))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let req = test::TestRequest::put()
            .uri("/api/v1/matching/auto/interval")
            .set_json(json!({ "minutes": 5 }))
            .to_request();
        let status: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(status["intervalMinutes"], 5);
        assert_eq!(status["running"], false);
    }

    #[actix_web::test]
    async fn test_delete_and_bulk_delete() {
        let state = state();
        state.scheduler.run_now();
        let id = state.store.snapshot()[0].id.clone();
        let app = app!(state);

        let req = test::TestRequest::post()
            .uri("/api/v1/matches/bulk-delete")
            .set_json(json!({ "ids": [id.clone(), "nope"] }))
            .to_request();
        let body: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(body["deleted"], 1);

        let req = test::TestRequest::delete()
            .uri(&format!("/api/v1/matches/{}", id))
            .to_request();
        let resp = test::call_service(&app, req).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[actix_web::test]
    async fn test_stats_and_demand_matches() {
        let state = state();
        state.scheduler.run_now();
        let app = app!(state);

        let req = test::TestRequest::get().uri("/api/v1/matches/stats").to_request();
        let stats: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(stats["total"], 1);
        assert_eq!(stats["byStatus"]["pending"], 1);

        let req = test::TestRequest::get().uri("/api/v1/demands/d1/matches").to_request();
        let owned: Value = test::call_and_read_body_json(&app, req).await;
        assert_eq!(owned.as_array().map(Vec::len), Some(1));
    }
}
