use actix_cors::Cors;
use actix_web::{error, http::StatusCode, middleware, web, App, HttpResponse, HttpServer};
use immo_match::config::Settings;
use immo_match::core::{AutoMatchScheduler, Clock, MatchScorer, MatchingEngine, SystemClock};
use immo_match::models::{Demand, Property};
use immo_match::routes::{self, matches::AppState};
use immo_match::services::{MatchStore, SnapshotRepository};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

/// JSON error response for JSON payload errors
#[derive(Debug, serde::Serialize)]
pub struct JsonError {
    pub error: String,
    pub message: String,
    pub status_code: u16,
}

impl std::fmt::Display for JsonError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}: {}", self.error, self.message)
    }
}

impl std::error::Error for JsonError {}

impl error::ResponseError for JsonError {
    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(StatusCode::from_u16(self.status_code).unwrap_or(StatusCode::BAD_REQUEST))
            .json(self)
    }
}

/// Handle JSON payload errors
pub fn handle_json_payload_error(err: error::JsonPayloadError, req: &actix_web::HttpRequest) -> actix_web::Error {
    tracing::info!("JSON payload error on {}: {}", req.path(), err);
    JsonError {
        error: "invalid_json".to_string(),
        message: format!("Invalid JSON: {}", err),
        status_code: 400,
    }
    .into()
}

/// Handle query payload errors
pub fn handle_query_payload_error(err: error::QueryPayloadError, _req: &actix_web::HttpRequest) -> actix_web::Error {
    JsonError {
        error: "invalid_query".to_string(),
        message: format!("Invalid query: {}", err),
        status_code: 400,
    }
    .into()
}

fn init_logging(level: &str, format: &str) {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));

    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_level(true);

    if format == "pretty" {
        subscriber.pretty().init();
    } else {
        subscriber.compact().init();
    }
}

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // Load .env file if present
    dotenv::dotenv().ok();

    let settings = Settings::load().map_err(|e| {
        eprintln!("Configuration error: {}", e);
        std::io::Error::new(std::io::ErrorKind::InvalidInput, e.to_string())
    })?;

    init_logging(&settings.logging.level, &settings.logging.format);

    info!("Starting Immo Match service...");

    let clock: Arc<dyn Clock> = Arc::new(SystemClock);

    // Inventory and demand snapshots; a missing file starts empty and is picked up on reload
    let properties: Arc<SnapshotRepository<Property>> =
        Arc::new(SnapshotRepository::from_file_or_empty(&settings.data.properties_path));
    let demands: Arc<SnapshotRepository<Demand>> =
        Arc::new(SnapshotRepository::from_file_or_empty(&settings.data.demands_path));

    let store = match &settings.data.matches_path {
        Some(path) => MatchStore::load(path, Arc::clone(&clock)).map_err(|e| {
            error!("Failed to load match snapshot {}: {}", path.display(), e);
            std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string())
        })?,
        None => MatchStore::new(Arc::clone(&clock)),
    };
    let store = Arc::new(store);

    info!(
        "Loaded {} properties, {} demands, {} matches",
        properties.len(),
        demands.len(),
        store.len()
    );

    // Initialize scorer with configured weights
    let weights = settings.scoring_weights();
    let scorer = MatchScorer::new(weights).with_near_miss_tolerance(settings.scoring.near_miss_tolerance);

    info!("Scorer initialized with weights: {:?}", weights);

    let engine = MatchingEngine::new(scorer, demands.clone(), properties.clone(), Arc::clone(&store))
        .with_min_score(settings.matching.min_score)
        .with_clock(Arc::clone(&clock));

    let scheduler = AutoMatchScheduler::new(Arc::new(engine), clock);
    if let Err(e) = scheduler.set_interval(settings.matching.interval_minutes) {
        error!("Ignoring configured interval: {}", e);
    }

    scheduler.on_complete(|outcome| {
        info!("Auto-match completed: {} new matches", outcome.new_matches);
        Ok(())
    });

    if let Some(path) = settings.data.matches_path.clone() {
        let store = Arc::clone(&store);
        scheduler.on_complete(move |_| {
            store.save(&path)?;
            Ok(())
        });
    }

    if settings.data.refresh_secs > 0 {
        let period = Duration::from_secs(settings.data.refresh_secs);
        let (properties, demands) = (properties.clone(), demands.clone());
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            // The first tick completes immediately; snapshots were just loaded
            ticker.tick().await;
            loop {
                ticker.tick().await;
                if let Err(e) = properties.reload() {
                    tracing::warn!("Property reload failed, keeping previous snapshot: {}", e);
                }
                if let Err(e) = demands.reload() {
                    tracing::warn!("Demand reload failed, keeping previous snapshot: {}", e);
                }
            }
        });
    }

    if settings.matching.auto_start {
        scheduler.start();
    }

    let app_state = AppState::new(scheduler, settings.data.matches_path.clone());

    // Configure HTTP server
    let host = settings.server.host.clone();
    let port = settings.server.port;
    let workers = settings.server.workers.unwrap_or(4);

    info!("Starting HTTP server on {}:{}", host, port);

    HttpServer::new(move || {
        let cors = Cors::permissive();

        App::new()
            .app_data(web::Data::new(app_state.clone()))
            .app_data(web::JsonConfig::default().error_handler(handle_json_payload_error))
            .app_data(web::QueryConfig::default().error_handler(handle_query_payload_error))
            .wrap(cors)
            .wrap(middleware::Logger::default())
            .wrap(middleware::Compress::default())
            .configure(routes::configure_routes)
    })
    .workers(workers)
    .bind((host, port))?
    .run()
    .await
}
