use chrono::Utc;
use rust_decimal::Decimal;
use salesflow_shared::{Deal, DealStatus};
use serde_json::json;
use uuid::Uuid;

use crate::error::AppError;
use crate::jobs::DeadlineSweepJob;
use crate::services::notifications::MockNotificationSink;
use crate::store::DocumentStore;
use crate::tests::{fixtures, TestContext};
use crate::workflows::{
    Action, AutomationRule, ComparisonOperator, Condition, EventSource, InvokeRequest, InvokeResponse, RuleDefinition,
    RuleEngine, RunState, Trigger, TriggerEvent, TriggerType,
};

fn deal(title: &str, value: i64, stage: &str) -> Deal {
    Deal {
        id: Uuid::new_v4(),
        title: title.to_string(),
        value: Decimal::from(value),
        currency: "USD".into(),
        probability: 40,
        status: DealStatus::Open,
        stage: stage.to_string(),
        contact_id: None,
        company_id: None,
        expected_close_date: None,
        metadata: json!({}),
        created_at: Utc::now(),
        updated_at: None,
    }
}

fn deal_payload(value: i64, probability: i64) -> serde_json::Value {
    json!({
        "deal": {
            "id": Uuid::new_v4(),
            "title": "Fleet renewal",
            "value": value,
            "probability": probability,
            "stage": { "previous": "qualified", "current": "proposal" }
        }
    })
}

async fn invoke(engine: &RuleEngine, rule_id: Uuid, payload: serde_json::Value) -> InvokeResponse {
    engine
        .invoke(InvokeRequest {
            rule_id,
            trigger_type: Some("deal_stage_changed".into()),
            trigger_data: Some(payload),
        })
        .await
        .unwrap()
}

#[tokio::test]
async fn test_stage_change_rule_from_json_definition() {
    let ctx = TestContext::new();
    let definition: RuleDefinition = serde_json::from_value(json!({
        "name": "Proposal follow-up",
        "trigger": {
            "type": "deal_stage_changed",
            "config": { "filters": { "deal.stage.current": "proposal" } }
        },
        "conditions": [
            { "type": "deal_value", "config": { "operator": "gte", "value": 10000 } }
        ],
        "actions": [
            {
                "type": "create_task",
                "config": { "title": "Send proposal for {{deal.title}}", "priority": "high", "due_in_hours": 24 }
            },
            {
                "type": "add_note",
                "config": { "entity_type": "deal", "entity_id": "{{deal.id}}", "content": "Moved to {{deal.stage.current}}" }
            }
        ]
    }))
    .unwrap();
    let rule = ctx.state.engine.create_rule(definition.decode().unwrap()).await.unwrap();

    let big = deal("Fleet renewal", 25_000, "proposal");
    ctx.store.insert_deal(&big).await.unwrap();
    let logs = ctx
        .state
        .engine
        .dispatch(&TriggerEvent::deal_stage_changed(&big, "qualified"))
        .await
        .unwrap();

    assert_eq!(logs.len(), 1);
    let result = &logs[0].execution_result;
    assert!(result.success, "{}", result.message);
    assert_eq!(result.message, "2 action(s) executed");
    assert_eq!(
        result.details.states,
        vec![
            RunState::Matching,
            RunState::EvaluatingConditions,
            RunState::ExecutingActions,
            RunState::Logged
        ]
    );

    let tasks = ctx.store.tasks().await;
    assert_eq!(tasks.len(), 1);
    assert_eq!(tasks[0].title, "Send proposal for Fleet renewal");
    assert_eq!(tasks[0].priority, "high");
    assert_eq!(tasks[0].deal_id, Some(big.id));

    let notes = ctx.state.orchestrator.activities().history("deal", big.id, None).await.unwrap();
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].action, "note");
    assert_eq!(notes[0].description.as_deref(), Some("Moved to proposal"));

    // Filter rejects other stages without a log
    let other = deal("Fleet renewal", 25_000, "negotiation");
    let skipped = ctx
        .state
        .engine
        .dispatch(&TriggerEvent::deal_stage_changed(&other, "proposal"))
        .await
        .unwrap();
    assert!(skipped.is_empty());

    let stored = ctx.state.engine.get_rule(rule.id).await.unwrap();
    assert_eq!(stored.execution_count, 1);
    assert_eq!(stored.success_count, 1);
    assert_eq!(stored.failure_count, 0);
    assert!(stored.last_executed_at.is_some());
}

#[tokio::test]
async fn test_one_failed_action_does_not_stop_siblings() {
    let ctx = TestContext::new();
    let rule = ctx
        .state
        .engine
        .create_rule(AutomationRule::new(
            "Big deal playbook",
            Trigger::new(TriggerType::DealStageChanged),
            vec![],
            vec![
                Action::create_task("Call {{deal.title}}", "high", 4),
                Action::add_note("deal", "{{deal.id}}", "Playbook started"),
                Action::send_notification("sales-lead@example.com", "Big deal", "{{deal.title}} moved"),
            ],
        ))
        .await
        .unwrap();
    ctx.store.fail_on("insert_task");

    let response = ctx
        .state
        .engine
        .invoke(InvokeRequest {
            rule_id: rule.id,
            trigger_type: None,
            trigger_data: Some(deal_payload(50_000, 70)),
        })
        .await
        .unwrap();

    assert!(!response.success);
    assert_eq!(response.results.len(), 3);
    assert!(!response.results[0].success);
    assert!(response.results[0].error.as_deref().unwrap().contains("insert_task"));
    assert!(response.results[1].success);
    assert!(response.results[2].success);
    assert_eq!(response.error.as_deref(), Some("1 of 3 action(s) failed"));

    assert!(ctx.store.tasks().await.is_empty());
    assert_eq!(ctx.store.activities().await.len(), 1);

    let history = ctx.state.engine.execution_history(rule.id, None).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].id, response.execution_log_id);
    let recorded: Vec<bool> = history[0]
        .execution_result
        .details
        .action_results
        .iter()
        .map(|r| r.success)
        .collect();
    assert_eq!(recorded, vec![false, true, true]);

    let stored = ctx.state.engine.get_rule(rule.id).await.unwrap();
    assert_eq!(stored.failure_count, 1);
}

#[tokio::test]
async fn test_conditions_are_anded() {
    let ctx = TestContext::new();
    let rule = ctx
        .state
        .engine
        .create_rule(AutomationRule::new(
            "Hot deal",
            Trigger::new(TriggerType::DealStageChanged),
            vec![
                Condition::deal_value(ComparisonOperator::GreaterThanOrEqual, Decimal::from(10_000)),
                Condition::deal_probability(ComparisonOperator::GreaterThanOrEqual, 50),
            ],
            vec![Action::add_note("deal", "{{deal.id}}", "Hot deal")],
        ))
        .await
        .unwrap();

    let engine = &ctx.state.engine;
    let both = invoke(engine, rule.id, deal_payload(25_000, 60)).await;
    assert!(both.success);
    assert_eq!(both.results.len(), 1);

    let low_value = invoke(engine, rule.id, deal_payload(500, 90)).await;
    assert!(!low_value.success);
    assert!(low_value.results.is_empty());
    assert_eq!(low_value.error.as_deref(), Some("Conditions not met"));

    let low_probability = invoke(engine, rule.id, deal_payload(25_000, 20)).await;
    assert!(!low_probability.success);
    assert!(low_probability.results.is_empty());

    let history = ctx.state.engine.execution_history(rule.id, None).await.unwrap();
    assert_eq!(history.len(), 3);
    // Most recent first; evaluation stops at the first failing condition
    let passed = |i: usize| -> Vec<bool> {
        history[i]
            .execution_result
            .details
            .condition_results
            .iter()
            .map(|c| c.passed)
            .collect()
    };
    assert_eq!(passed(0), vec![true, false]);
    assert_eq!(passed(1), vec![false]);
    assert_eq!(passed(2), vec![true, true]);
    assert_eq!(ctx.store.activities().await.len(), 1);
}

#[tokio::test]
async fn test_empty_condition_list_always_passes() {
    let ctx = TestContext::new();
    let rule = ctx
        .state
        .engine
        .create_rule(AutomationRule::new(
            "Log every webhook",
            Trigger::new(TriggerType::WebhookReceived),
            vec![],
            vec![Action::delay(0)],
        ))
        .await
        .unwrap();

    for body in [json!({}), json!({"anything": [1, 2, 3]}), json!(null)] {
        let logs = ctx
            .state
            .engine
            .dispatch(&TriggerEvent::webhook_received("stripe", body))
            .await
            .unwrap();
        assert_eq!(logs.len(), 1);
        assert!(logs[0].execution_result.success);
        assert!(logs[0].execution_result.details.condition_results.is_empty());
    }

    let stored = ctx.state.engine.get_rule(rule.id).await.unwrap();
    assert_eq!(stored.execution_count, 3);
}

#[tokio::test]
async fn test_external_check_failure_is_recorded_on_condition() {
    let mut sink = MockNotificationSink::new();
    sink.expect_check_status().returning(|url| {
        Err(AppError::ExternalServiceError {
            service: "status_check".into(),
            message: format!("connection refused: {}", url),
        })
    });
    let ctx = TestContext::with_sink(sink);

    let rule = ctx
        .state
        .engine
        .create_rule(AutomationRule::new(
            "Only when billing is up",
            Trigger::new(TriggerType::ApiCall),
            vec![Condition::ExternalApiCheck(crate::workflows::conditions::ExternalApiCheckCondition {
                url: "https://billing.example.com/health".into(),
                expected_status: 200,
            })],
            vec![Action::delay(0)],
        ))
        .await
        .unwrap();

    let response = ctx
        .state
        .engine
        .invoke(InvokeRequest {
            rule_id: rule.id,
            ..Default::default()
        })
        .await
        .unwrap();
    assert!(!response.success);
    assert!(response.results.is_empty());

    let history = ctx.state.engine.execution_history(rule.id, Some(1)).await.unwrap();
    let condition = &history[0].execution_result.details.condition_results[0];
    assert_eq!(condition.condition_type, "external_api_check");
    assert!(!condition.passed);
    assert!(condition.error.as_deref().unwrap().contains("connection refused"));
}

#[tokio::test]
async fn test_notification_rendered_from_payload() {
    let mut sink = MockNotificationSink::new();
    sink.expect_notify()
        .withf(|n| n.recipient == "owner@example.com" && n.title == "Form from Dana Scully")
        .times(1)
        .returning(|_| Ok(()));
    let ctx = TestContext::with_sink(sink);

    ctx.state
        .engine
        .create_rule(AutomationRule::new(
            "Form alert",
            Trigger::new(TriggerType::FormSubmitted).with_filter("form.name", json!("Contact us")),
            vec![Condition::valid_email("submission.email")],
            vec![Action::send_notification(
                "owner@example.com",
                "Form from {{submission.name}}",
                "{{submission.email}} wrote in",
            )],
        ))
        .await
        .unwrap();

    let event = TriggerEvent::new(
        TriggerType::FormSubmitted,
        json!({
            "form": { "name": "Contact us" },
            "submission": { "name": "Dana Scully", "email": "dana@fbi.gov" }
        }),
        EventSource::Webhook,
    );
    let logs = ctx.state.engine.dispatch(&event).await.unwrap();
    assert_eq!(logs.len(), 1);
    assert!(logs[0].execution_result.success);
}

#[tokio::test]
async fn test_deadline_sweep_escalates_high_priority_tasks() {
    let ctx = TestContext::new();
    ctx.state
        .engine
        .create_rule(AutomationRule::new(
            "Escalate overdue",
            Trigger::new(TriggerType::TaskDeadlineMissed),
            vec![Condition::task_priority_in(&["high"])],
            vec![Action::update_record("task", "{{task.id}}", "priority", json!("urgent"))],
        ))
        .await
        .unwrap();

    let high = fixtures::task("high", -3);
    let low = fixtures::task("low", -3);
    let upcoming = fixtures::task("high", 12);
    for task in [&high, &low, &upcoming] {
        ctx.store.insert_task(task).await.unwrap();
    }

    let sweep = DeadlineSweepJob::new(
        ctx.state.engine.clone(),
        ctx.store.clone(),
        std::time::Duration::from_secs(1),
    );
    let result = sweep.run(Utc::now()).await.unwrap();

    assert_eq!(result.tasks_checked, 2);
    assert_eq!(result.events_dispatched, 2);
    assert_eq!(result.rules_fired, 2);
    assert!(result.errors.is_empty());

    assert_eq!(ctx.store.get_task(high.id).await.unwrap().unwrap().priority, "urgent");
    assert_eq!(ctx.store.get_task(low.id).await.unwrap().unwrap().priority, "low");
    assert_eq!(ctx.store.get_task(upcoming.id).await.unwrap().unwrap().priority, "high");
}
