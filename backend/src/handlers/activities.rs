use axum::{
    extract::{Path, Query, State},
    response::Json,
    routing::get,
    Router,
};
use salesflow_shared::Activity;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::pagination::{LimitParams, ListResponse};
use crate::AppState;

pub fn activity_routes() -> Router<Arc<AppState>> {
    Router::new().route("/:entity_type/:entity_id", get(list_activities))
}

/// Activity feed for one entity, most recent first
async fn list_activities(
    State(state): State<Arc<AppState>>,
    Path((entity_type, entity_id)): Path<(String, Uuid)>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ListResponse<Activity>>> {
    let activities = state
        .orchestrator
        .activities()
        .history(&entity_type, entity_id, params.limit)
        .await?;
    Ok(Json(ListResponse::new(activities, params.limit())))
}
