// Workflow Executor - Runs rule actions against the store and the notification sink

use chrono::{DateTime, Duration as ChronoDuration, Utc};
use futures::future::{BoxFuture, FutureExt};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::{Decimal, RoundingStrategy};
use salesflow_shared::{Task, TaskStatus};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::{Action, ActionResult, Transform};
use super::conditions::EvaluationContext;
use super::triggers::{value_as_decimal, value_as_text, value_at, EventPayload};
use crate::config::EngineConfig;
use crate::error::{ApiResult, AppError};
use crate::services::audit::{ActivityEntryBuilder, ActivityLogger};
use crate::services::notifications::{CalendarEvent, HttpRequest, Notification};
use crate::services::NotificationSink;
use crate::store::{bounded, ensure_updatable, DocumentStore};

/// State shared by the actions of one rule run
#[derive(Debug, Clone)]
pub struct RunContext {
    pub rule_id: Uuid,
    pub correlation_id: Uuid,
    pub payload: EventPayload,
    /// Written by data_transformation and ai_action, read as `{{vars.name}}`
    pub variables: serde_json::Map<String, serde_json::Value>,
    /// Current element inside batch_processing, read as `{{item}}`
    pub item: Option<serde_json::Value>,
}

impl RunContext {
    pub fn new(rule_id: Uuid, payload: EventPayload) -> Self {
        Self {
            rule_id,
            correlation_id: Uuid::new_v4(),
            payload,
            variables: serde_json::Map::new(),
            item: None,
        }
    }

    /// Payload plus `vars` and `item`, the namespace templates resolve against.
    fn scope(&self) -> serde_json::Value {
        let mut scope = match &self.payload {
            serde_json::Value::Object(map) => map.clone(),
            other => {
                let mut map = serde_json::Map::new();
                map.insert("payload".to_string(), other.clone());
                map
            }
        };
        scope.insert("vars".to_string(), serde_json::Value::Object(self.variables.clone()));
        if let Some(item) = &self.item {
            scope.insert("item".to_string(), item.clone());
        }
        serde_json::Value::Object(scope)
    }

    pub fn render(&self, template: &str) -> String {
        render_template(template, &self.scope())
    }

    /// Render every string inside a JSON value. A string that is exactly one
    /// placeholder keeps the referenced value's JSON type.
    pub fn render_value(&self, value: &serde_json::Value) -> serde_json::Value {
        render_json(value, &self.scope())
    }
}

fn template_pattern() -> Option<regex::Regex> {
    regex::Regex::new(r"\{\{\s*([^}]+?)\s*\}\}").ok()
}

/// Replace `{{path}}` placeholders; unresolved placeholders are left in place.
pub fn render_template(template: &str, scope: &serde_json::Value) -> String {
    let Some(re) = template_pattern() else {
        return template.to_string();
    };

    re.replace_all(template, |caps: &regex::Captures| match value_at(scope, &caps[1]) {
        Some(value) => value_as_text(value),
        None => caps[0].to_string(),
    })
    .into_owned()
}

fn render_json(value: &serde_json::Value, scope: &serde_json::Value) -> serde_json::Value {
    match value {
        serde_json::Value::String(s) => {
            let whole = template_pattern()
                .and_then(|re| re.captures(s).filter(|c| c[0].len() == s.len()).map(|c| c[1].to_string()));
            match whole.and_then(|path| value_at(scope, &path).cloned()) {
                Some(resolved) => resolved,
                None => serde_json::Value::String(render_template(s, scope)),
            }
        }
        serde_json::Value::Object(map) => serde_json::Value::Object(
            map.iter()
                .map(|(k, v)| (k.clone(), render_json(v, scope)))
                .collect(),
        ),
        serde_json::Value::Array(items) => {
            serde_json::Value::Array(items.iter().map(|v| render_json(v, scope)).collect())
        }
        other => other.clone(),
    }
}

pub struct ActionExecutor {
    store: Arc<dyn DocumentStore>,
    sink: Arc<dyn NotificationSink>,
    activities: ActivityLogger,
    config: EngineConfig,
}

impl ActionExecutor {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        let activities = ActivityLogger::new(store.clone(), config.store_timeout);
        Self {
            store,
            sink,
            activities,
            config,
        }
    }

    pub fn sink(&self) -> &dyn NotificationSink {
        self.sink.as_ref()
    }

    /// Execute one action. Never fails: errors and timeouts become a failed result.
    /// Compound actions are not bounded as a whole; each nested action gets its own
    /// `action_timeout`.
    pub fn execute<'a>(&'a self, action: &'a Action, ctx: &'a mut RunContext) -> BoxFuture<'a, ActionResult> {
        async move {
            let start = Instant::now();
            let kind = action.kind();
            info!(rule_id = %ctx.rule_id, action = %kind, "Executing action");

            let unbounded = matches!(
                action,
                Action::DelayAction(_) | Action::ConditionalAction(_) | Action::BatchProcessing(_)
            );
            let outcome = if unbounded {
                self.run(action, ctx).await
            } else {
                match tokio::time::timeout(self.config.action_timeout, self.run(action, ctx)).await {
                    Ok(outcome) => outcome,
                    Err(_) => Err(AppError::Unavailable(format!(
                        "{} timed out after {}ms",
                        kind,
                        self.config.action_timeout.as_millis()
                    ))),
                }
            };

            let duration = start.elapsed().as_millis() as i64;
            match outcome {
                Ok(output) => ActionResult::success(kind, output).with_duration(duration),
                Err(e) => {
                    error!(rule_id = %ctx.rule_id, action = %kind, error = %e, "Action failed");
                    ActionResult::failure(kind, &e.to_string()).with_duration(duration)
                }
            }
        }
        .boxed()
    }

    fn run<'a>(
        &'a self,
        action: &'a Action,
        ctx: &'a mut RunContext,
    ) -> BoxFuture<'a, ApiResult<Option<serde_json::Value>>> {
        async move {
            match action {
                Action::SendEmail(c) => {
                    let to = ctx.render(&c.to);
                    self.sink
                        .send_email(&to, &ctx.render(&c.subject), &ctx.render(&c.body))
                        .await?;
                    Ok(Some(serde_json::json!({ "to": to })))
                }

                Action::SendNotification(c) => {
                    let notification = Notification {
                        recipient: ctx.render(&c.recipient),
                        title: ctx.render(&c.title),
                        message: ctx.render(&c.message),
                    };
                    self.sink.notify(&notification).await?;
                    Ok(Some(serde_json::json!({ "recipient": notification.recipient })))
                }

                Action::CreateCalendarEvent(c) => {
                    let event = CalendarEvent {
                        title: ctx.render(&c.title),
                        starts_at: hours_from(Utc::now(), c.starts_in_hours, "starts_in_hours")?,
                        duration_minutes: c.duration_minutes,
                        attendees: c.attendees.iter().map(|a| ctx.render(a)).collect(),
                    };
                    let event_id = self.sink.schedule_event(&event).await?;
                    Ok(Some(serde_json::json!({ "event_id": event_id, "starts_at": event.starts_at })))
                }

                Action::CreateTask(c) => {
                    let now = Utc::now();
                    let payload = &ctx.payload;
                    let task = Task {
                        id: Uuid::new_v4(),
                        title: ctx.render(&c.title),
                        description: c.description.as_deref().map(|d| ctx.render(d)),
                        priority: c.priority.clone(),
                        status: TaskStatus::Open,
                        due_at: Some(hours_from(now, c.due_in_hours, "due_in_hours")?),
                        deal_id: uuid_at(payload, "deal.id"),
                        contact_id: uuid_at(payload, "contact.id"),
                        assignee: c.assignee.as_deref().map(|a| ctx.render(a)),
                        created_at: now,
                        completed_at: None,
                    };
                    bounded(self.config.store_timeout, "insert_task", self.store.insert_task(&task)).await?;
                    Ok(Some(serde_json::json!({ "task_id": task.id })))
                }

                Action::UpdateRecord(c) => {
                    ensure_updatable(&c.entity_type, &c.field)?;
                    let entity_id = parse_id(&ctx.render(&c.entity_id))?;
                    let value = ctx.render_value(&c.value);
                    bounded(
                        self.config.store_timeout,
                        "update_record",
                        self.store.update_record(&c.entity_type, entity_id, &c.field, &value),
                    )
                    .await?;
                    Ok(Some(serde_json::json!({
                        "entity_type": c.entity_type,
                        "entity_id": entity_id,
                        "field": c.field,
                        "value": value
                    })))
                }

                Action::AddNote(c) => {
                    let entity_id = parse_id(&ctx.render(&c.entity_id))?;
                    let activity = self
                        .activities
                        .log(
                            ActivityEntryBuilder::new(c.entity_type.clone(), entity_id, "note")
                                .description(ctx.render(&c.content))
                                .meta("rule_id", ctx.rule_id)
                                .correlation_id(ctx.correlation_id),
                        )
                        .await?;
                    Ok(Some(serde_json::json!({ "activity_id": activity.id })))
                }

                Action::WebhookCall(c) => {
                    let request = HttpRequest {
                        method: c.method.clone(),
                        url: ctx.render(&c.url),
                        headers: c.headers.iter().map(|(k, v)| (k.clone(), ctx.render(v))).collect(),
                        body: Some(match &c.payload {
                            Some(payload) => ctx.render_value(payload),
                            None => ctx.payload.clone(),
                        }),
                    };
                    self.send_http("webhook_call", &request).await
                }

                Action::ApiIntegration(c) => {
                    let request = HttpRequest {
                        method: c.method.clone(),
                        url: ctx.render(&c.url()),
                        headers: c.headers.iter().map(|(k, v)| (k.clone(), ctx.render(v))).collect(),
                        body: c.payload.as_ref().map(|p| ctx.render_value(p)),
                    };
                    let mut output = self.send_http(&c.service, &request).await?;
                    if let Some(serde_json::Value::Object(map)) = output.as_mut() {
                        map.insert("service".to_string(), serde_json::json!(c.service));
                    }
                    Ok(output)
                }

                Action::AiAction(c) => {
                    let text = self.sink.generate_text(&ctx.render(&c.prompt)).await?;
                    if let Some(target) = &c.target {
                        ctx.variables.insert(target.clone(), serde_json::json!(text));
                    }
                    Ok(Some(serde_json::json!({ "text": text })))
                }

                Action::DataTransformation(c) => {
                    let source = value_at(&ctx.scope(), &c.source).cloned().ok_or_else(|| {
                        crate::error::validation_error("source", &format!("path '{}' not found in payload", c.source))
                    })?;
                    let transformed = apply_transform(c.transform, &source)?;
                    ctx.variables.insert(c.target.clone(), transformed.clone());
                    Ok(Some(serde_json::json!({ "target": c.target, "value": transformed })))
                }

                Action::ConditionalAction(c) => {
                    let eval_ctx = EvaluationContext {
                        now: Utc::now(),
                        sink: self.sink.as_ref(),
                    };
                    let passed = tokio::time::timeout(
                        self.config.action_timeout,
                        c.condition.evaluate(&ctx.payload, &eval_ctx),
                    )
                    .await
                    .map_err(|_| {
                        AppError::Unavailable(format!(
                            "{} condition timed out after {}ms",
                            c.condition.kind(),
                            self.config.action_timeout.as_millis()
                        ))
                    })??;
                    let branch = if passed { &c.then } else { &c.otherwise };

                    let mut results = Vec::with_capacity(branch.len());
                    for nested in branch {
                        results.push(self.execute(nested, ctx).await);
                    }
                    nested_outcome(
                        serde_json::json!({ "condition_passed": passed, "results": results }),
                        &results,
                    )
                }

                Action::DelayAction(c) => {
                    let requested = std::time::Duration::from_secs(c.seconds);
                    let delay = requested.min(self.config.max_action_delay);
                    if delay < requested {
                        warn!(requested_secs = c.seconds, "Delay capped at {}s", delay.as_secs());
                    }
                    tokio::time::sleep(delay).await;
                    Ok(Some(serde_json::json!({ "delayed_ms": delay.as_millis() as u64 })))
                }

                Action::BatchProcessing(c) => {
                    let items = match value_at(&ctx.scope(), &c.items) {
                        Some(serde_json::Value::Array(items)) => items.clone(),
                        Some(_) => {
                            return Err(crate::error::validation_error(
                                "items",
                                &format!("'{}' is not an array", c.items),
                            ))
                        }
                        None => {
                            return Err(crate::error::validation_error(
                                "items",
                                &format!("path '{}' not found in payload", c.items),
                            ))
                        }
                    };

                    let mut results = Vec::with_capacity(items.len());
                    for item in items {
                        let mut child = ctx.clone();
                        child.item = Some(item);
                        results.push(self.execute(&c.action, &mut child).await);
                    }
                    nested_outcome(
                        serde_json::json!({ "processed": results.len(), "results": results }),
                        &results,
                    )
                }
            }
        }
        .boxed()
    }

    async fn send_http(&self, service: &str, request: &HttpRequest) -> ApiResult<Option<serde_json::Value>> {
        let response = self.sink.http_request(request).await?;
        if !response.is_success() {
            return Err(AppError::ExternalServiceError {
                service: service.to_string(),
                message: format!("{} {} returned status {}", request.method, request.url, response.status),
            });
        }
        Ok(Some(serde_json::json!({ "status": response.status, "body": response.body })))
    }
}

/// A compound action succeeds only if every nested action did.
fn nested_outcome(
    output: serde_json::Value,
    results: &[ActionResult],
) -> ApiResult<Option<serde_json::Value>> {
    let failed: Vec<String> = results
        .iter()
        .filter(|r| !r.success)
        .map(|r| format!("{}: {}", r.action_type, r.error.as_deref().unwrap_or("failed")))
        .collect();

    if failed.is_empty() {
        Ok(Some(output))
    } else {
        Err(AppError::BadRequest(format!(
            "{} of {} nested action(s) failed ({})",
            failed.len(),
            results.len(),
            failed.join("; ")
        )))
    }
}

fn hours_from(start: DateTime<Utc>, hours: i64, field: &str) -> ApiResult<DateTime<Utc>> {
    ChronoDuration::try_hours(hours)
        .and_then(|offset| start.checked_add_signed(offset))
        .ok_or_else(|| crate::error::validation_error(field, &format!("{} hours is out of range", hours)))
}

fn parse_id(raw: &str) -> ApiResult<Uuid> {
    Uuid::parse_str(raw.trim())
        .map_err(|_| crate::error::validation_error("entity_id", &format!("'{}' is not a valid id", raw)))
}

fn uuid_at(payload: &EventPayload, path: &str) -> Option<Uuid> {
    value_at(payload, path)
        .and_then(|v| v.as_str())
        .and_then(|s| Uuid::parse_str(s).ok())
}

fn apply_transform(transform: Transform, value: &serde_json::Value) -> ApiResult<serde_json::Value> {
    let text = value_as_text(value);
    let number = |v: &serde_json::Value| {
        value_as_decimal(v).ok_or_else(|| {
            crate::error::validation_error("source", &format!("'{}' is not numeric", text))
        })
    };

    Ok(match transform {
        Transform::Uppercase => serde_json::json!(text.to_uppercase()),
        Transform::Lowercase => serde_json::json!(text.to_lowercase()),
        Transform::Trim => serde_json::json!(text.trim()),
        Transform::ToNumber => decimal_json(number(value)?),
        Transform::Round => decimal_json(number(value)?.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero)),
    })
}

fn decimal_json(value: Decimal) -> serde_json::Value {
    if value.fract().is_zero() {
        if let Some(i) = value.to_i64() {
            return serde_json::json!(i);
        }
    }
    value
        .to_f64()
        .map(|f| serde_json::json!(f))
        .unwrap_or_else(|| serde_json::json!(value.to_string()))
}
