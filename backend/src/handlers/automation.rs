use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::pagination::{LimitParams, ListResponse};
use crate::workflows::{
    fixtures, AutomationRule, EventPayload, EventSource, ExecutionLog, InvokeRequest, InvokeResponse, RuleDefinition,
    TriggerEvent, TriggerType, ACTION_TYPES, CONDITION_TYPES,
};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct EventCreate {
    pub trigger_type: String,
    #[serde(default)]
    pub payload: EventPayload,
    pub correlation_id: Option<Uuid>,
}

#[derive(Debug, Deserialize, Default)]
pub struct RuleInvoke {
    pub trigger_type: Option<String>,
    pub trigger_data: Option<EventPayload>,
}

#[derive(Debug, Serialize)]
pub struct DispatchSummary {
    pub event_id: Uuid,
    pub rules_fired: usize,
    pub executions: Vec<ExecutionLog>,
}

pub fn automation_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/catalog", get(catalog))
        .route("/sample-payload/:trigger_type", get(sample_payload))
        .route("/rules", post(create_rule))
        .route("/rules/:id", get(get_rule))
        .route("/rules/:id/invoke", post(invoke_rule))
        .route("/rules/:id/executions", get(execution_history))
        .route("/invoke", post(invoke))
        .route("/events", post(dispatch_event))
        .route("/webhooks/*path", post(receive_webhook))
}

async fn catalog() -> Json<serde_json::Value> {
    let triggers: Vec<&str> = TriggerType::ALL.iter().map(|t| t.as_str()).collect();
    Json(json!({
        "triggers": triggers,
        "conditions": CONDITION_TYPES,
        "actions": ACTION_TYPES,
    }))
}

async fn sample_payload(Path(trigger_type): Path<String>) -> ApiResult<Json<EventPayload>> {
    Ok(Json(fixtures::sample_payload_for(&trigger_type)?))
}

async fn create_rule(
    State(state): State<Arc<AppState>>,
    Json(definition): Json<RuleDefinition>,
) -> ApiResult<(StatusCode, Json<AutomationRule>)> {
    let rule = state.engine.create_rule(definition.decode()?).await?;

    if let Some(scheduler) = &state.scheduler {
        // Persisted already; a failed registration is retried at the next start
        if let Err(e) = scheduler.register_rule(&rule).await {
            tracing::error!(rule_id = %rule.id, error = %e, "Failed to schedule new rule");
        }
    }
    Ok((StatusCode::CREATED, Json(rule)))
}

async fn get_rule(State(state): State<Arc<AppState>>, Path(rule_id): Path<Uuid>) -> ApiResult<Json<AutomationRule>> {
    Ok(Json(state.engine.get_rule(rule_id).await?))
}

/// Rule invocation RPC
async fn invoke(
    State(state): State<Arc<AppState>>,
    Json(request): Json<InvokeRequest>,
) -> ApiResult<Json<InvokeResponse>> {
    Ok(Json(state.engine.invoke(request).await?))
}

async fn invoke_rule(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
    body: Option<Json<RuleInvoke>>,
) -> ApiResult<Json<InvokeResponse>> {
    let Json(body) = body.unwrap_or_default();
    let response = state
        .engine
        .invoke(InvokeRequest {
            rule_id,
            trigger_type: body.trigger_type,
            trigger_data: body.trigger_data,
        })
        .await?;
    Ok(Json(response))
}

async fn execution_history(
    State(state): State<Arc<AppState>>,
    Path(rule_id): Path<Uuid>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<ListResponse<ExecutionLog>>> {
    let logs = state.engine.execution_history(rule_id, params.limit).await?;
    Ok(Json(ListResponse::new(logs, params.limit())))
}

async fn dispatch_event(
    State(state): State<Arc<AppState>>,
    Json(body): Json<EventCreate>,
) -> ApiResult<Json<DispatchSummary>> {
    let mut event = TriggerEvent::new(body.trigger_type.parse()?, body.payload, EventSource::Api);
    if let Some(correlation_id) = body.correlation_id {
        event = event.with_correlation_id(correlation_id);
    }
    dispatch(&state, event).await
}

async fn receive_webhook(
    State(state): State<Arc<AppState>>,
    Path(path): Path<String>,
    Json(body): Json<serde_json::Value>,
) -> ApiResult<Json<DispatchSummary>> {
    dispatch(&state, TriggerEvent::webhook_received(&path, body)).await
}

async fn dispatch(state: &AppState, event: TriggerEvent) -> ApiResult<Json<DispatchSummary>> {
    let executions = state.engine.dispatch(&event).await?;
    Ok(Json(DispatchSummary {
        event_id: event.event_id,
        rules_fired: executions.len(),
        executions,
    }))
}
