use std::path::Path;
use std::sync::Arc;
use axum::{
    extract::State,
    response::Json,
    routing::get,
    Router,
};
use tower_http::cors::CorsLayer;
use tower_http::services::ServeDir;

use crate::api::stream::stream_prices;
use crate::data::{HistoryBuffer, SubscriberRegistry};

#[derive(Clone)]
pub struct ApiState {
    pub registry: Arc<SubscriberRegistry>,
    pub history: Arc<HistoryBuffer>,
}

// GET /api/health - Health check endpoint
pub async fn health_check(State(state): State<ApiState>) -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "price_stream",
        "timestamp": chrono::Utc::now(),
        "subscribers": state.registry.len(),
        "buffered_samples": state.history.len(),
    }))
}

// Create the HTTP router: SSE stream, health, and the static frontend
pub fn create_router(state: ApiState, frontend_dir: impl AsRef<Path>) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check));

    Router::new()
        .route("/stream", get(stream_prices))
        .nest("/api", api_routes)
        .fallback_service(ServeDir::new(frontend_dir.as_ref()))
        .with_state(state)
        .layer(CorsLayer::permissive())
}
