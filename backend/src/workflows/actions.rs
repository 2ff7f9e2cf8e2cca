// Workflow Actions - Effects a rule fires once its conditions pass

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use super::conditions::Condition;
use crate::error::{ApiResult, ValidationBuilder};

/// Action type keys accepted in stored rules
pub const ACTION_TYPES: [&str; 13] = [
    "send_email",
    "create_task",
    "update_record",
    "add_note",
    "send_notification",
    "create_calendar_event",
    "webhook_call",
    "api_integration",
    "data_transformation",
    "conditional_action",
    "delay_action",
    "batch_processing",
    "ai_action",
];

/// Furthest ahead, in hours, a task due date or calendar event may be placed
pub const MAX_SCHEDULE_HOURS: i64 = 24 * 365;

/// An action to be executed by a rule; stored as `{"type": ..., "config": {...}}`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", content = "config", rename_all = "snake_case")]
pub enum Action {
    // Communication
    SendEmail(SendEmailConfig),
    SendNotification(SendNotificationConfig),
    CreateCalendarEvent(CalendarEventConfig),

    // CRM records
    CreateTask(CreateTaskConfig),
    UpdateRecord(UpdateRecordConfig),
    AddNote(AddNoteConfig),

    // Integrations
    WebhookCall(WebhookCallConfig),
    ApiIntegration(ApiIntegrationConfig),
    AiAction(AiActionConfig),

    // Data and control flow
    DataTransformation(DataTransformationConfig),
    ConditionalAction(ConditionalActionConfig),
    DelayAction(DelayConfig),
    BatchProcessing(BatchProcessingConfig),
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendEmailConfig {
    pub to: String,
    pub subject: String,
    pub body: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SendNotificationConfig {
    pub recipient: String,
    pub title: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CalendarEventConfig {
    pub title: String,
    #[serde(default = "default_starts_in_hours")]
    pub starts_in_hours: i64,
    #[serde(default = "default_duration_minutes")]
    pub duration_minutes: i64,
    #[serde(default)]
    pub attendees: Vec<String>,
}

fn default_starts_in_hours() -> i64 {
    24
}

fn default_duration_minutes() -> i64 {
    30
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateTaskConfig {
    pub title: String,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default = "default_priority")]
    pub priority: String,
    #[serde(default = "default_due_in_hours")]
    pub due_in_hours: i64,
    #[serde(default)]
    pub assignee: Option<String>,
}

fn default_priority() -> String {
    "medium".to_string()
}

fn default_due_in_hours() -> i64 {
    24
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpdateRecordConfig {
    pub entity_type: String,
    /// Literal id or a `{{path}}` template
    pub entity_id: String,
    pub field: String,
    pub value: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AddNoteConfig {
    pub entity_type: String,
    pub entity_id: String,
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WebhookCallConfig {
    pub url: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    /// Defaults to the whole trigger payload
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

fn default_method() -> String {
    "POST".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ApiIntegrationConfig {
    pub service: String,
    pub base_url: String,
    pub endpoint: String,
    #[serde(default = "default_method")]
    pub method: String,
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub payload: Option<serde_json::Value>,
}

impl ApiIntegrationConfig {
    pub fn url(&self) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            self.endpoint.trim_start_matches('/')
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AiActionConfig {
    pub prompt: String,
    /// Run variable receiving the generated text
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DataTransformationConfig {
    /// Payload path to read
    pub source: String,
    /// Run variable to write; later actions read it as `{{vars.<target>}}`
    pub target: String,
    pub transform: Transform,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Transform {
    Uppercase,
    Lowercase,
    Trim,
    ToNumber,
    Round,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ConditionalActionConfig {
    pub condition: Condition,
    #[serde(default)]
    pub then: Vec<Action>,
    #[serde(default)]
    pub otherwise: Vec<Action>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DelayConfig {
    pub seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BatchProcessingConfig {
    /// Payload path of an array; each element is bound to `{{item}}`
    pub items: String,
    pub action: Box<Action>,
}

/// Outcome of one action
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionResult {
    pub action_type: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub output: Option<serde_json::Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_time_ms: i64,
}

impl ActionResult {
    pub fn success(action_type: &str, output: Option<serde_json::Value>) -> Self {
        Self {
            action_type: action_type.to_string(),
            success: true,
            output,
            error: None,
            execution_time_ms: 0,
        }
    }

    pub fn failure(action_type: &str, error: &str) -> Self {
        Self {
            action_type: action_type.to_string(),
            success: false,
            output: None,
            error: Some(error.to_string()),
            execution_time_ms: 0,
        }
    }

    pub fn with_duration(mut self, duration_ms: i64) -> Self {
        self.execution_time_ms = duration_ms;
        self
    }
}

impl Action {
    /// Decode a `(type, config)` pair from the catalog.
    pub fn decode(action_type: &str, config: serde_json::Value) -> ApiResult<Self> {
        if !ACTION_TYPES.contains(&action_type) {
            return Err(crate::error::validation_error(
                "actions",
                &format!("unknown action type '{}'", action_type),
            ));
        }

        let action: Action = serde_json::from_value(serde_json::json!({
            "type": action_type,
            "config": config,
        }))
        .map_err(|e| {
            crate::error::validation_error(
                "actions",
                &format!("malformed {} config: {}", action_type, e),
            )
        })?;

        let mut errors = ValidationBuilder::new();
        action.collect_errors("actions", &mut errors);
        match errors.build() {
            Some(err) => Err(err),
            None => Ok(action),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::SendEmail(_) => "send_email",
            Self::SendNotification(_) => "send_notification",
            Self::CreateCalendarEvent(_) => "create_calendar_event",
            Self::CreateTask(_) => "create_task",
            Self::UpdateRecord(_) => "update_record",
            Self::AddNote(_) => "add_note",
            Self::WebhookCall(_) => "webhook_call",
            Self::ApiIntegration(_) => "api_integration",
            Self::AiAction(_) => "ai_action",
            Self::DataTransformation(_) => "data_transformation",
            Self::ConditionalAction(_) => "conditional_action",
            Self::DelayAction(_) => "delay_action",
            Self::BatchProcessing(_) => "batch_processing",
        }
    }

    pub(crate) fn collect_errors(&self, field: &str, errors: &mut ValidationBuilder) {
        let blank = |s: &str| s.trim().is_empty();

        match self {
            Self::SendEmail(c) if blank(&c.to) || blank(&c.subject) => {
                errors.push(field, "send_email needs a recipient and a subject");
            }
            Self::CreateTask(c) => {
                if blank(&c.title) {
                    errors.push(field, "create_task needs a title");
                }
                if !(0..=MAX_SCHEDULE_HOURS).contains(&c.due_in_hours) {
                    errors.push(
                        field,
                        &format!("create_task due_in_hours must be between 0 and {}", MAX_SCHEDULE_HOURS),
                    );
                }
            }
            Self::CreateCalendarEvent(c) => {
                if !(0..=MAX_SCHEDULE_HOURS).contains(&c.starts_in_hours) {
                    errors.push(
                        field,
                        &format!(
                            "create_calendar_event starts_in_hours must be between 0 and {}",
                            MAX_SCHEDULE_HOURS
                        ),
                    );
                }
                if !(1..=MAX_SCHEDULE_HOURS * 60).contains(&c.duration_minutes) {
                    errors.push(field, "create_calendar_event duration_minutes is out of range");
                }
            }
            Self::UpdateRecord(c) if blank(&c.entity_id) || blank(&c.field) => {
                errors.push(field, "update_record needs entity_id and field");
            }
            Self::AddNote(c) if blank(&c.content) => {
                errors.push(field, "add_note needs content");
            }
            Self::WebhookCall(c) if !c.url.starts_with("http") => {
                errors.push(field, "webhook_call needs an http(s) url");
            }
            Self::ApiIntegration(c) if !c.base_url.starts_with("http") => {
                errors.push(field, "api_integration needs an http(s) base_url");
            }
            Self::AiAction(c) if blank(&c.prompt) => {
                errors.push(field, "ai_action needs a prompt");
            }
            Self::DataTransformation(c) if blank(&c.source) || blank(&c.target) => {
                errors.push(field, "data_transformation needs source and target");
            }
            Self::ConditionalAction(c) => {
                c.condition.collect_errors(field, errors);
                if c.then.is_empty() && c.otherwise.is_empty() {
                    errors.push(field, "conditional_action has no branch actions");
                }
                for nested in c.then.iter().chain(c.otherwise.iter()) {
                    nested.collect_errors(field, errors);
                }
            }
            Self::BatchProcessing(c) => {
                if blank(&c.items) {
                    errors.push(field, "batch_processing needs an items path");
                }
                c.action.collect_errors(field, errors);
            }
            _ => {}
        }
    }
}

/// Builders for common actions
impl Action {
    pub fn send_email(to: &str, subject: &str, body: &str) -> Self {
        Self::SendEmail(SendEmailConfig {
            to: to.to_string(),
            subject: subject.to_string(),
            body: body.to_string(),
        })
    }

    pub fn send_notification(recipient: &str, title: &str, message: &str) -> Self {
        Self::SendNotification(SendNotificationConfig {
            recipient: recipient.to_string(),
            title: title.to_string(),
            message: message.to_string(),
        })
    }

    pub fn create_task(title: &str, priority: &str, due_in_hours: i64) -> Self {
        Self::CreateTask(CreateTaskConfig {
            title: title.to_string(),
            description: None,
            priority: priority.to_string(),
            due_in_hours,
            assignee: None,
        })
    }

    pub fn update_record(entity_type: &str, entity_id: &str, field: &str, value: serde_json::Value) -> Self {
        Self::UpdateRecord(UpdateRecordConfig {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            field: field.to_string(),
            value,
        })
    }

    pub fn add_note(entity_type: &str, entity_id: &str, content: &str) -> Self {
        Self::AddNote(AddNoteConfig {
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            content: content.to_string(),
        })
    }

    pub fn webhook(url: &str, payload: Option<serde_json::Value>) -> Self {
        Self::WebhookCall(WebhookCallConfig {
            url: url.to_string(),
            method: default_method(),
            headers: BTreeMap::new(),
            payload,
        })
    }

    pub fn transform(source: &str, target: &str, transform: Transform) -> Self {
        Self::DataTransformation(DataTransformationConfig {
            source: source.to_string(),
            target: target.to_string(),
            transform,
        })
    }

    pub fn delay(seconds: u64) -> Self {
        Self::DelayAction(DelayConfig { seconds })
    }

    pub fn when(condition: Condition, then: Vec<Action>, otherwise: Vec<Action>) -> Self {
        Self::ConditionalAction(ConditionalActionConfig {
            condition,
            then,
            otherwise,
        })
    }

    pub fn for_each(items: &str, action: Action) -> Self {
        Self::BatchProcessing(BatchProcessingConfig {
            items: items.to_string(),
            action: Box::new(action),
        })
    }
}
