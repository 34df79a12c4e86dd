//! HTTP route definitions

use axum::{
    extract::{Query, State},
    http::{header, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
    routing::get,
    Router,
};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing::warn;

use crate::app::AppState;
use crate::store::{HighscoreEntry, HighscoreError};
use crate::util::time::uptime_secs;
use crate::ws::handler::ws_handler;
use crate::ws::protocol::{MatchSnapshot, MatchState};

const DEFAULT_HIGHSCORE_LIMIT: usize = 10;
const MAX_HIGHSCORE_LIMIT: usize = 100;

/// Build the application router
pub fn build_router(state: AppState) -> Router {
    let cors = cors_layer(&state.config.client_origin);

    Router::new()
        .route("/health", get(health_handler))
        .route("/ws", get(ws_handler))
        .route("/state", get(state_handler))
        .route("/highscores", get(highscores_handler))
        .layer(CompressionLayer::new())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

/// CORS from a comma-separated origin list, `*` allows any origin
fn cors_layer(client_origin: &str) -> CorsLayer {
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE]);

    if client_origin.trim() == "*" {
        return cors.allow_origin(Any);
    }

    let allowed_origins: Vec<HeaderValue> = client_origin
        .split(',')
        .filter_map(|s| s.trim().parse::<HeaderValue>().ok())
        .collect();
    cors.allow_origin(allowed_origins)
}

// ============================================================================
// Health endpoint
// ============================================================================

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    uptime_secs: u64,
    connections: usize,
    match_state: MatchState,
}

async fn health_handler(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        uptime_secs: uptime_secs(),
        connections: state.connections.len(),
        match_state: state.match_handle.latest_snapshot().state,
    })
}

// ============================================================================
// Session state
// ============================================================================

/// Last published snapshot, for late joiners and debugging
async fn state_handler(State(state): State<AppState>) -> Json<MatchSnapshot> {
    Json(state.match_handle.latest_snapshot().as_ref().clone())
}

// ============================================================================
// Highscores
// ============================================================================

#[derive(Deserialize)]
struct HighscoreQuery {
    limit: Option<usize>,
}

#[derive(Serialize)]
struct HighscoreResponse {
    scores: Vec<HighscoreEntry>,
}

async fn highscores_handler(
    State(state): State<AppState>,
    Query(query): Query<HighscoreQuery>,
) -> Result<Json<HighscoreResponse>, AppError> {
    let limit = query.limit.unwrap_or(DEFAULT_HIGHSCORE_LIMIT);
    if limit == 0 || limit > MAX_HIGHSCORE_LIMIT {
        return Err(AppError::BadRequest(format!(
            "limit must be between 1 and {MAX_HIGHSCORE_LIMIT}"
        )));
    }

    let scores = state.highscores.fetch_scores(limit).await?;
    Ok(Json(HighscoreResponse { scores }))
}

// ============================================================================
// Error handling
// ============================================================================

#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Highscore backend unavailable")]
    Upstream(#[from] HighscoreError),
}

impl IntoResponse for AppError {
    fn into_response(self) -> axum::response::Response {
        let (status, message) = match &self {
            AppError::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg.clone()),
            AppError::Upstream(e) => {
                warn!(error = %e, "Highscore fetch failed");
                (StatusCode::BAD_GATEWAY, self.to_string())
            }
        };

        let body = serde_json::json!({
            "error": message
        });

        (status, Json(body)).into_response()
    }
}
