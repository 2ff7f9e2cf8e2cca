// Workflow Engine - Rule definitions, the per-invocation state machine and execution logging

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, warn};
use uuid::Uuid;

use super::actions::{Action, ActionResult};
use super::conditions::{Condition, ConditionResult, EvaluationContext};
use super::executor::{ActionExecutor, RunContext};
use super::fixtures;
use super::triggers::{EventPayload, EventSource, Trigger, TriggerConfig, TriggerEvent, TriggerType};
use crate::config::EngineConfig;
use crate::error::{ApiResult, ValidationBuilder};
use crate::services::audit::ExecutionLogger;
use crate::services::NotificationSink;
use crate::store::{bounded, required, DocumentStore};

/// A stored automation rule. Rules are stateless templates; each firing is a fresh run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AutomationRule {
    pub id: Uuid,
    pub name: String,
    pub description: Option<String>,
    pub is_active: bool,
    pub trigger: Option<Trigger>,
    /// AND-combined, evaluated in order
    pub conditions: Vec<Condition>,
    /// Executed in order
    pub actions: Vec<Action>,
    pub execution_count: i64,
    pub success_count: i64,
    pub failure_count: i64,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AutomationRule {
    pub fn new(name: &str, trigger: Trigger, conditions: Vec<Condition>, actions: Vec<Action>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            description: None,
            is_active: true,
            trigger: Some(trigger),
            conditions,
            actions,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            last_executed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        }
    }

    /// A rule must declare a trigger and at least one action.
    pub fn validate(&self) -> ApiResult<()> {
        let mut errors = ValidationBuilder::new();

        if self.name.trim().is_empty() {
            errors.push("name", "Rule name is required");
        }
        match &self.trigger {
            Some(trigger) => trigger.collect_errors("trigger", &mut errors),
            None => errors.push("trigger", "Rule has no trigger"),
        }
        if self.actions.is_empty() {
            errors.push("actions", "Rule has no actions");
        }
        for condition in &self.conditions {
            condition.collect_errors("conditions", &mut errors);
        }
        for action in &self.actions {
            action.collect_errors("actions", &mut errors);
        }

        match errors.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

/// `{"type": ..., "config": {...}}` as submitted by clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: serde_json::Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerSpec {
    #[serde(rename = "type")]
    pub kind: String,
    #[serde(default)]
    pub config: TriggerConfig,
}

/// Rule as submitted by clients; decoded through the catalogs
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleDefinition {
    pub name: String,
    pub description: Option<String>,
    #[serde(default = "default_true")]
    pub is_active: bool,
    pub trigger: Option<TriggerSpec>,
    #[serde(default)]
    pub conditions: Vec<CatalogEntry>,
    #[serde(default)]
    pub actions: Vec<CatalogEntry>,
}

fn default_true() -> bool {
    true
}

impl RuleDefinition {
    pub fn decode(self) -> ApiResult<AutomationRule> {
        let trigger = match self.trigger {
            Some(declared) => Some(Trigger {
                trigger_type: declared.kind.parse()?,
                config: declared.config,
            }),
            None => None,
        };
        let conditions = self
            .conditions
            .into_iter()
            .map(|c| Condition::decode(&c.kind, c.config))
            .collect::<ApiResult<Vec<_>>>()?;
        let actions = self
            .actions
            .into_iter()
            .map(|a| Action::decode(&a.kind, a.config))
            .collect::<ApiResult<Vec<_>>>()?;

        Ok(AutomationRule {
            id: Uuid::new_v4(),
            name: self.name,
            description: self.description,
            is_active: self.is_active,
            trigger,
            conditions,
            actions,
            execution_count: 0,
            success_count: 0,
            failure_count: 0,
            last_executed_at: None,
            created_at: Utc::now(),
            updated_at: None,
        })
    }
}

/// States of one rule invocation; every run ends in `Logged`
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Matching,
    EvaluatingConditions,
    ExecutingActions,
    Logged,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionDetails {
    pub trigger_matched: bool,
    pub conditions_matched: bool,
    pub condition_results: Vec<ConditionResult>,
    /// In declared order, one per executed action
    pub action_results: Vec<ActionResult>,
    /// States visited by this run
    pub states: Vec<RunState>,
    pub correlation_id: Uuid,
    pub source: EventSource,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionResult {
    /// trigger matched AND conditions matched AND every action succeeded
    pub success: bool,
    pub message: String,
    pub details: ExecutionDetails,
}

/// Append-only record of one rule firing attempt
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ExecutionLog {
    pub id: Uuid,
    pub rule_id: Uuid,
    pub trigger_type: String,
    pub trigger_data: EventPayload,
    pub execution_result: ExecutionResult,
    pub execution_time_ms: i64,
    pub executed_at: DateTime<Utc>,
}

/// Rule invocation RPC input
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct InvokeRequest {
    pub rule_id: Uuid,
    /// Defaults to the rule's own trigger type
    #[serde(default)]
    pub trigger_type: Option<String>,
    /// Synthesized from the trigger type when omitted
    #[serde(default)]
    pub trigger_data: Option<EventPayload>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ActionOutcome {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Milliseconds
    pub execution_time: i64,
}

/// Rule invocation RPC output
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvokeResponse {
    pub success: bool,
    pub results: Vec<ActionOutcome>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub execution_log_id: Uuid,
}

impl From<&ExecutionLog> for InvokeResponse {
    fn from(log: &ExecutionLog) -> Self {
        let result = &log.execution_result;
        Self {
            success: result.success,
            results: result
                .details
                .action_results
                .iter()
                .map(|r| ActionOutcome {
                    success: r.success,
                    error: r.error.clone(),
                    execution_time: r.execution_time_ms,
                })
                .collect(),
            error: (!result.success).then(|| result.message.clone()),
            execution_log_id: log.id,
        }
    }
}

pub struct RuleEngine {
    store: Arc<dyn DocumentStore>,
    executor: ActionExecutor,
    logger: ExecutionLogger,
    config: EngineConfig,
}

impl RuleEngine {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn NotificationSink>,
        config: EngineConfig,
    ) -> Self {
        Self {
            executor: ActionExecutor::new(store.clone(), sink, config.clone()),
            logger: ExecutionLogger::new(store.clone(), config.store_timeout),
            store,
            config,
        }
    }

    /// Validate and persist a rule.
    pub async fn create_rule(&self, rule: AutomationRule) -> ApiResult<AutomationRule> {
        rule.validate()?;
        bounded(self.config.store_timeout, "insert_rule", self.store.insert_rule(&rule)).await?;

        info!(rule_id = %rule.id, name = %rule.name, "Automation rule created");
        Ok(rule)
    }

    pub async fn get_rule(&self, rule_id: Uuid) -> ApiResult<AutomationRule> {
        let rule = bounded(self.config.store_timeout, "get_rule", self.store.get_rule(rule_id)).await?;
        required(rule, "Automation rule", rule_id)
    }

    /// Run one rule for an explicit invocation. Always logs, even when the trigger does not match.
    pub async fn invoke(&self, request: InvokeRequest) -> ApiResult<InvokeResponse> {
        let rule = self.get_rule(request.rule_id).await?;
        rule.validate()?;

        let trigger_type = match &request.trigger_type {
            Some(raw) => raw.parse::<TriggerType>()?,
            None => rule
                .trigger
                .as_ref()
                .map(|t| t.trigger_type)
                .ok_or_else(|| crate::error::validation_error("trigger", "Rule has no trigger"))?,
        };

        let event = match request.trigger_data {
            Some(payload) => TriggerEvent::new(trigger_type, payload, EventSource::Api),
            None => TriggerEvent::new(trigger_type, fixtures::sample_payload(trigger_type), EventSource::DryRun),
        };

        let log = self.run(&rule, &event).await?;
        Ok(InvokeResponse::from(&log))
    }

    /// Fan an event out to every active rule listening for its trigger type.
    /// Rules whose trigger filters reject the payload are skipped without a log.
    pub async fn dispatch(&self, event: &TriggerEvent) -> ApiResult<Vec<ExecutionLog>> {
        let rules = bounded(
            self.config.store_timeout,
            "list_active_rules",
            self.store.list_active_rules(event.trigger_type),
        )
        .await?;

        let runnable: Vec<&AutomationRule> = rules
            .iter()
            .filter(|rule| match rule.validate() {
                Ok(()) => rule
                    .trigger
                    .as_ref()
                    .map(|t| t.matches(event.trigger_type, &event.payload))
                    .unwrap_or(false),
                Err(e) => {
                    warn!(rule_id = %rule.id, error = %e, "Skipping invalid rule");
                    false
                }
            })
            .collect();

        info!(
            event_id = %event.event_id,
            trigger_type = %event.trigger_type,
            candidates = rules.len(),
            matched = runnable.len(),
            "Dispatching event"
        );

        let outcomes = join_all(runnable.into_iter().map(|rule| self.run(rule, event))).await;

        let mut logs = Vec::with_capacity(outcomes.len());
        for outcome in outcomes {
            match outcome {
                Ok(log) => logs.push(log),
                Err(e) => error!(event_id = %event.event_id, error = %e, "Rule run could not be logged"),
            }
        }
        Ok(logs)
    }

    /// Most recent first; limit clamped to 1..=100, default 25.
    pub async fn execution_history(&self, rule_id: Uuid, limit: Option<i64>) -> ApiResult<Vec<ExecutionLog>> {
        self.get_rule(rule_id).await?;
        self.logger.history(rule_id, limit).await
    }

    /// Matching -> EvaluatingConditions -> ExecutingActions -> Logged
    pub async fn run(&self, rule: &AutomationRule, event: &TriggerEvent) -> ApiResult<ExecutionLog> {
        rule.validate()?;

        let started = Instant::now();
        let executed_at = Utc::now();
        let correlation_id = event.correlation_id.unwrap_or_else(Uuid::new_v4);
        let mut states = vec![RunState::Matching];
        let mut condition_results = Vec::new();
        let mut action_results = Vec::new();

        let trigger_matched = rule
            .trigger
            .as_ref()
            .map(|t| t.matches(event.trigger_type, &event.payload))
            .unwrap_or(false);

        let mut conditions_matched = false;
        if trigger_matched {
            states.push(RunState::EvaluatingConditions);
            conditions_matched = self
                .evaluate_conditions(&rule.conditions, &event.payload, &mut condition_results)
                .await;

            if conditions_matched {
                states.push(RunState::ExecutingActions);
                let mut ctx = RunContext::new(rule.id, event.payload.clone());
                ctx.correlation_id = correlation_id;

                for action in &rule.actions {
                    action_results.push(self.executor.execute(action, &mut ctx).await);
                }
            }
        }
        states.push(RunState::Logged);

        let failed_actions = action_results.iter().filter(|r| !r.success).count();
        let success = trigger_matched && conditions_matched && failed_actions == 0;
        let message = if !trigger_matched {
            format!("Trigger {} did not match rule trigger", event.trigger_type)
        } else if !conditions_matched {
            "Conditions not met".to_string()
        } else if failed_actions > 0 {
            format!("{} of {} action(s) failed", failed_actions, action_results.len())
        } else {
            format!("{} action(s) executed", action_results.len())
        };

        let log = ExecutionLog {
            id: Uuid::new_v4(),
            rule_id: rule.id,
            trigger_type: event.trigger_type.as_str().to_string(),
            trigger_data: event.payload.clone(),
            execution_result: ExecutionResult {
                success,
                message,
                details: ExecutionDetails {
                    trigger_matched,
                    conditions_matched,
                    condition_results,
                    action_results,
                    states,
                    correlation_id,
                    source: event.source.clone(),
                },
            },
            execution_time_ms: started.elapsed().as_millis() as i64,
            executed_at,
        };

        self.logger.append(&log).await?;

        if let Err(e) = bounded(
            self.config.store_timeout,
            "record_rule_run",
            self.store.record_rule_run(rule.id, success, executed_at),
        )
        .await
        {
            warn!(rule_id = %rule.id, error = %e, "Failed to update rule counters");
        }

        Ok(log)
    }

    /// AND over the conditions, stopping at the first failure.
    async fn evaluate_conditions(
        &self,
        conditions: &[Condition],
        payload: &EventPayload,
        results: &mut Vec<ConditionResult>,
    ) -> bool {
        let ctx = EvaluationContext {
            now: Utc::now(),
            sink: self.executor.sink(),
        };

        for condition in conditions {
            let (passed, error) = match condition.evaluate(payload, &ctx).await {
                Ok(passed) => (passed, None),
                Err(e) => {
                    warn!(condition = %condition.kind(), error = %e, "Condition evaluation failed");
                    (false, Some(e.to_string()))
                }
            };
            results.push(ConditionResult {
                condition_type: condition.kind().to_string(),
                passed,
                error,
            });
            if !passed {
                return false;
            }
        }
        true
    }
}
