use chrono::Utc;
use salesflow_shared::Activity;
use serde::Serialize;
use serde_json::Value as JsonValue;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::pagination::clamp_limit;
use crate::store::{bounded, DocumentStore};
use crate::workflows::ExecutionLog;

/// Builder for activity feed entries
#[derive(Debug, Clone)]
pub struct ActivityEntryBuilder {
    entity_type: String,
    entity_id: Uuid,
    action: String,
    description: Option<String>,
    metadata: serde_json::Map<String, JsonValue>,
}

impl ActivityEntryBuilder {
    pub fn new(entity_type: impl Into<String>, entity_id: Uuid, action: impl Into<String>) -> Self {
        Self {
            entity_type: entity_type.into(),
            entity_id,
            action: action.into(),
            description: None,
            metadata: serde_json::Map::new(),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Add one metadata key; values that fail to serialize are stored as null.
    pub fn meta<T: Serialize>(mut self, key: &str, value: T) -> Self {
        self.metadata.insert(
            key.to_string(),
            serde_json::to_value(value).unwrap_or(JsonValue::Null),
        );
        self
    }

    pub fn correlation_id(self, id: Uuid) -> Self {
        self.meta("correlation_id", id)
    }

    pub fn build(self) -> Activity {
        Activity {
            id: Uuid::new_v4(),
            entity_type: self.entity_type,
            entity_id: self.entity_id,
            action: self.action,
            description: self.description,
            metadata: JsonValue::Object(self.metadata),
            created_at: Utc::now(),
        }
    }
}

/// Append-only writer for the activity feed
#[derive(Clone)]
pub struct ActivityLogger {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl ActivityLogger {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn log(&self, entry: ActivityEntryBuilder) -> ApiResult<Activity> {
        let activity = entry.build();
        bounded(self.timeout, "insert_activity", self.store.insert_activity(&activity)).await?;

        tracing::debug!(
            entity_type = %activity.entity_type,
            entity_id = %activity.entity_id,
            action = %activity.action,
            "Activity recorded"
        );
        Ok(activity)
    }

    /// Most recent first
    pub async fn history(&self, entity_type: &str, entity_id: Uuid, limit: Option<i64>) -> ApiResult<Vec<Activity>> {
        bounded(
            self.timeout,
            "list_activities",
            self.store.list_activities(entity_type, entity_id, clamp_limit(limit)),
        )
        .await
    }
}

/// Append-only writer for rule execution logs
#[derive(Clone)]
pub struct ExecutionLogger {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
}

impl ExecutionLogger {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration) -> Self {
        Self { store, timeout }
    }

    pub async fn append(&self, log: &ExecutionLog) -> ApiResult<()> {
        bounded(self.timeout, "insert_execution_log", self.store.insert_execution_log(log)).await?;

        tracing::info!(
            rule_id = %log.rule_id,
            log_id = %log.id,
            success = log.execution_result.success,
            execution_time_ms = log.execution_time_ms,
            "Rule execution logged"
        );
        Ok(())
    }

    /// Most recent first; limit clamped to the page bounds.
    pub async fn history(&self, rule_id: Uuid, limit: Option<i64>) -> ApiResult<Vec<ExecutionLog>> {
        bounded(
            self.timeout,
            "list_execution_logs",
            self.store.list_execution_logs(rule_id, clamp_limit(limit)),
        )
        .await
    }
}
