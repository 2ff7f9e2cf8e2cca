use axum::{extract::State, http::StatusCode, response::Json, routing::get, Router};
use serde_json::json;
use std::sync::Arc;

use crate::AppState;

pub mod activities;
pub mod automation;
pub mod sagas;

pub use activities::activity_routes;
pub use automation::automation_routes;
pub use sagas::saga_routes;

/// Every API route, without middleware layers.
pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/", get(|| async { "SalesFlow Automation API v1.0.0" }))
        .route("/health", get(health_check))
        .route("/health/detailed", get(detailed_health_check))
        .nest("/api/v1", saga_routes())
        .nest("/api/v1/automation", automation_routes())
        .nest("/api/v1/activities", activity_routes())
        .with_state(state)
}

pub async fn health_check() -> (StatusCode, Json<serde_json::Value>) {
    (StatusCode::OK, Json(json!({"status": "healthy", "service": "salesflow-api"})))
}

pub async fn detailed_health_check(State(state): State<Arc<AppState>>) -> (StatusCode, Json<serde_json::Value>) {
    let Some(pool) = &state.db_pool else {
        return (
            StatusCode::OK,
            Json(json!({"status": "healthy", "database": "in_memory"})),
        );
    };

    if crate::database::health_check(pool).await {
        (
            StatusCode::OK,
            Json(json!({
                "status": "healthy",
                "database": "connected",
                "pool": crate::database::get_pool_stats(pool),
            })),
        )
    } else {
        (
            StatusCode::SERVICE_UNAVAILABLE,
            Json(json!({"status": "unhealthy", "database": "unreachable"})),
        )
    }
}
