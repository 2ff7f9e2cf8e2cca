// Workflow Triggers - Event types that can start an automation rule

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use salesflow_shared::{Contact, Deal, Task};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::{AppError, ValidationBuilder};

/// Types of events that can trigger automation rules
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    // Deal triggers
    DealStageChanged,
    DealCreated,

    // Contact triggers
    ContactCreated,

    // Task triggers
    TaskDeadlineMissed,
    TaskCompleted,

    // Engagement triggers
    FormSubmitted,
    EmailOpened,
    EmailClicked,

    // Integration triggers
    WebhookReceived,
    ScheduledTrigger,
    ApiCall,
    DatabaseChange,
}

impl TriggerType {
    /// Every trigger type the engine, the rule library and the sample
    /// payload generator understand.
    pub const ALL: [TriggerType; 12] = [
        Self::DealStageChanged,
        Self::DealCreated,
        Self::ContactCreated,
        Self::TaskDeadlineMissed,
        Self::TaskCompleted,
        Self::FormSubmitted,
        Self::EmailOpened,
        Self::EmailClicked,
        Self::WebhookReceived,
        Self::ScheduledTrigger,
        Self::ApiCall,
        Self::DatabaseChange,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::DealStageChanged => "deal_stage_changed",
            Self::DealCreated => "deal_created",
            Self::ContactCreated => "contact_created",
            Self::TaskDeadlineMissed => "task_deadline_missed",
            Self::TaskCompleted => "task_completed",
            Self::FormSubmitted => "form_submitted",
            Self::EmailOpened => "email_opened",
            Self::EmailClicked => "email_clicked",
            Self::WebhookReceived => "webhook_received",
            Self::ScheduledTrigger => "scheduled_trigger",
            Self::ApiCall => "api_call",
            Self::DatabaseChange => "database_change",
        }
    }
}

impl fmt::Display for TriggerType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TriggerType {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|t| t.as_str() == s)
            .ok_or_else(|| AppError::UnknownTriggerType(s.to_string()))
    }
}

/// Trigger declared on a rule
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Trigger {
    pub trigger_type: TriggerType,
    #[serde(default)]
    pub config: TriggerConfig,
}

/// Optional narrowing of a trigger beyond its type
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TriggerConfig {
    /// Dot path into the payload -> value it must equal
    #[serde(default)]
    pub filters: BTreeMap<String, serde_json::Value>,
    /// Cron expression, only meaningful for scheduled_trigger
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron: Option<String>,
}

impl Trigger {
    pub fn new(trigger_type: TriggerType) -> Self {
        Self {
            trigger_type,
            config: TriggerConfig::default(),
        }
    }

    pub fn with_filter(mut self, path: &str, value: serde_json::Value) -> Self {
        self.config.filters.insert(path.to_string(), value);
        self
    }

    pub fn with_cron(mut self, expression: &str) -> Self {
        self.config.cron = Some(expression.to_string());
        self
    }

    /// scheduled_trigger needs a six-field cron expression (seconds first).
    pub(crate) fn collect_errors(&self, field: &str, errors: &mut ValidationBuilder) {
        if self.trigger_type != TriggerType::ScheduledTrigger {
            return;
        }
        match self.config.cron.as_deref().map(str::trim) {
            None | Some("") => errors.push(field, "scheduled_trigger needs config.cron"),
            Some(expression) => {
                if let Err(e) = cron::Schedule::from_str(expression) {
                    errors.push(field, &format!("invalid cron expression '{}': {}", expression, e));
                }
            }
        }
    }

    /// Exact type equality, then every configured filter must hold.
    pub fn matches(&self, trigger_type: TriggerType, payload: &EventPayload) -> bool {
        if self.trigger_type.as_str() != trigger_type.as_str() {
            return false;
        }

        self.config
            .filters
            .iter()
            .all(|(path, expected)| value_at(payload, path) == Some(expected))
    }
}

/// Payload for trigger events
pub type EventPayload = serde_json::Value;

/// A trigger event that can start rule evaluation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerEvent {
    pub event_id: Uuid,
    pub trigger_type: TriggerType,
    pub payload: EventPayload,
    pub source: EventSource,
    pub timestamp: DateTime<Utc>,
    pub correlation_id: Option<Uuid>,
}

/// Source of the trigger event
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum EventSource {
    System,
    Api,
    Webhook,
    Scheduler,
    DryRun,
}

impl TriggerEvent {
    /// Create a new trigger event
    pub fn new(trigger_type: TriggerType, payload: EventPayload, source: EventSource) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            trigger_type,
            payload,
            source,
            timestamp: Utc::now(),
            correlation_id: None,
        }
    }

    /// Create a deal stage changed event
    pub fn deal_stage_changed(deal: &Deal, previous_stage: &str) -> Self {
        Self::new(
            TriggerType::DealStageChanged,
            serde_json::json!({
                "deal": {
                    "id": deal.id,
                    "title": deal.title,
                    "value": deal.value,
                    "currency": deal.currency,
                    "probability": deal.probability,
                    "status": deal.status,
                    "contact_id": deal.contact_id,
                    "company_id": deal.company_id,
                    "stage": {
                        "previous": previous_stage,
                        "current": deal.stage
                    }
                }
            }),
            EventSource::System,
        )
    }

    /// Create a deal created event
    pub fn deal_created(deal: &Deal) -> Self {
        Self::new(
            TriggerType::DealCreated,
            serde_json::json!({ "deal": deal }),
            EventSource::System,
        )
    }

    /// Create a contact created event
    pub fn contact_created(contact: &Contact) -> Self {
        Self::new(
            TriggerType::ContactCreated,
            serde_json::json!({ "contact": contact }),
            EventSource::System,
        )
    }

    /// Create a missed task deadline event
    pub fn task_deadline_missed(task: &Task, now: DateTime<Utc>) -> Self {
        let hours_overdue = task
            .due_at
            .map(|due| (now - due).num_hours().max(0))
            .unwrap_or(0);

        Self::new(
            TriggerType::TaskDeadlineMissed,
            serde_json::json!({
                "task": task,
                "hours_overdue": hours_overdue
            }),
            EventSource::Scheduler,
        )
    }

    /// Create a task completed event
    pub fn task_completed(task: &Task) -> Self {
        Self::new(
            TriggerType::TaskCompleted,
            serde_json::json!({ "task": task }),
            EventSource::System,
        )
    }

    /// Create a webhook received event
    pub fn webhook_received(path: &str, body: serde_json::Value) -> Self {
        Self::new(
            TriggerType::WebhookReceived,
            serde_json::json!({
                "webhook": {
                    "path": path,
                    "received_at": Utc::now()
                },
                "body": body
            }),
            EventSource::Webhook,
        )
    }

    /// Create a scheduled tick for one rule
    pub fn scheduled(rule_id: Uuid, cron: &str) -> Self {
        Self::new(
            TriggerType::ScheduledTrigger,
            serde_json::json!({
                "schedule": {
                    "rule_id": rule_id,
                    "cron": cron,
                    "fired_at": Utc::now()
                }
            }),
            EventSource::Scheduler,
        )
    }

    /// Add correlation ID for tracking related events
    pub fn with_correlation_id(mut self, correlation_id: Uuid) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }
}

/// Resolve a dot path (`deal.stage.current`, `items.0.name`) inside a payload.
pub fn value_at<'a>(payload: &'a serde_json::Value, path: &str) -> Option<&'a serde_json::Value> {
    let mut current = payload;

    for part in path.split('.').filter(|p| !p.is_empty()) {
        current = match current {
            serde_json::Value::Object(map) => map.get(part)?,
            serde_json::Value::Array(items) => items.get(part.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }

    Some(current)
}

/// Numbers and numeric strings both count; decimals serialize as strings.
pub fn value_as_decimal(value: &serde_json::Value) -> Option<Decimal> {
    match value {
        serde_json::Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Some(Decimal::from(i))
            } else {
                n.as_f64().and_then(|f| Decimal::try_from(f).ok())
            }
        }
        serde_json::Value::String(s) => Decimal::from_str(s.trim()).ok(),
        _ => None,
    }
}

/// Text rendering used by templates and string operators.
pub fn value_as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
