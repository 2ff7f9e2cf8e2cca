use serde_json::{json, Value};

use crate::error::AppError;
use crate::workflows::fixtures::{sample_payload, sample_payload_for};
use crate::workflows::{Action, Condition, Trigger, TriggerType, ACTION_TYPES, CONDITION_TYPES};

/// One documented config per condition type
fn condition_configs() -> Vec<(&'static str, Value)> {
    vec![
        ("deal_value", json!({ "operator": "gt", "value": 10000 })),
        ("deal_probability", json!({ "operator": ">=", "value": 50 })),
        ("task_priority", json!({ "operator": "in", "value": ["high", "urgent"] })),
        ("contact_tags", json!({ "operator": "contains_any", "tags": ["vip"] })),
        ("time_based", json!({ "mode": "business_hours" })),
        ("custom_field", json!({ "field": "lead.source", "operator": "equals", "value": "web" })),
        (
            "complex_logic",
            json!({
                "logic": "OR",
                "conditions": [
                    { "type": "deal_value", "config": { "operator": "gt", "value": 5000 } },
                    { "type": "contact_tags", "config": { "operator": "contains_all", "tags": ["partner"] } }
                ]
            }),
        ),
        ("data_validation", json!({ "field": "contact.email", "rule": "email" })),
        ("external_api_check", json!({ "url": "https://status.example.com" })),
        ("machine_learning", json!({ "threshold": 70 })),
    ]
}

/// One documented config per action type
fn action_configs() -> Vec<(&'static str, Value)> {
    vec![
        ("send_email", json!({ "to": "{{contact.email}}", "subject": "Hi", "body": "Thanks" })),
        ("create_task", json!({ "title": "Call {{contact.first_name}}" })),
        (
            "update_record",
            json!({ "entity_type": "deal", "entity_id": "{{deal.id}}", "field": "stage", "value": "won" }),
        ),
        ("add_note", json!({ "entity_type": "deal", "entity_id": "{{deal.id}}", "content": "Closed" })),
        ("send_notification", json!({ "recipient": "team", "title": "Won", "message": "{{deal.title}}" })),
        ("create_calendar_event", json!({ "title": "Kickoff" })),
        ("webhook_call", json!({ "url": "https://hooks.example.com/deal" })),
        (
            "api_integration",
            json!({ "service": "erp", "base_url": "https://erp.example.com/", "endpoint": "/orders" }),
        ),
        ("data_transformation", json!({ "source": "lead.name", "target": "upper", "transform": "uppercase" })),
        (
            "conditional_action",
            json!({
                "condition": { "type": "deal_value", "config": { "operator": "gt", "value": 1000 } },
                "then": [ { "type": "delay_action", "config": { "seconds": 1 } } ]
            }),
        ),
        ("delay_action", json!({ "seconds": 60 })),
        (
            "batch_processing",
            json!({
                "items": "form.fields",
                "action": { "type": "add_note", "config": { "entity_type": "lead", "entity_id": "{{lead.id}}", "content": "{{item}}" } }
            }),
        ),
        ("ai_action", json!({ "prompt": "Summarize {{deal.title}}", "target": "summary" })),
    ]
}

#[test]
fn test_every_trigger_type_parses_and_has_a_matching_sample() {
    assert_eq!(TriggerType::ALL.len(), 12);
    for trigger_type in TriggerType::ALL {
        let parsed: TriggerType = trigger_type.as_str().parse().unwrap();
        assert_eq!(parsed, trigger_type);

        let payload = sample_payload(trigger_type);
        assert!(payload.is_object(), "{} sample is not an object", trigger_type);
        assert!(Trigger::new(trigger_type).matches(trigger_type, &payload));

        // Ids and timestamps are fresh per call; the top-level shape is stable
        let again = sample_payload_for(trigger_type.as_str()).unwrap();
        assert_eq!(top_level_keys(&again), top_level_keys(&payload));
    }
}

#[test]
fn test_trigger_matching_is_exact() {
    let payload = sample_payload(TriggerType::DealCreated);
    assert!(!Trigger::new(TriggerType::DealStageChanged).matches(TriggerType::DealCreated, &payload));
    assert!(matches!(
        "deal_updated".parse::<TriggerType>(),
        Err(AppError::UnknownTriggerType(t)) if t == "deal_updated"
    ));
}

#[test]
fn test_every_condition_type_decodes() {
    let configs = condition_configs();
    let covered: Vec<&str> = configs.iter().map(|(kind, _)| *kind).collect();
    assert_eq!(covered, CONDITION_TYPES.to_vec());

    for (kind, config) in configs {
        let condition = Condition::decode(kind, config).unwrap_or_else(|e| panic!("{}: {}", kind, e));
        assert_eq!(condition.kind(), kind);
    }
}

#[test]
fn test_every_action_type_decodes() {
    let configs = action_configs();
    let mut covered: Vec<&str> = configs.iter().map(|(kind, _)| *kind).collect();
    let mut expected = ACTION_TYPES.to_vec();
    covered.sort_unstable();
    expected.sort_unstable();
    assert_eq!(covered, expected);

    for (kind, config) in configs {
        let action = Action::decode(kind, config).unwrap_or_else(|e| panic!("{}: {}", kind, e));
        assert_eq!(action.kind(), kind);
    }
}

#[test]
fn test_malformed_configs_are_validation_errors() {
    let cases: Vec<Result<(), AppError>> = vec![
        Condition::decode("lead_score", json!({})).map(|_| ()),
        Condition::decode("deal_value", json!({ "operator": "contains", "value": 1 })).map(|_| ()),
        Condition::decode("contact_tags", json!({ "operator": "contains_any", "tags": [] })).map(|_| ()),
        Condition::decode("time_based", json!({ "mode": "within_hours" })).map(|_| ()),
        Action::decode("send_sms", json!({})).map(|_| ()),
        Action::decode("create_task", json!({ "priority": "high" })).map(|_| ()),
        Action::decode("webhook_call", json!({ "url": "ftp://example.com" })).map(|_| ()),
        Action::decode("conditional_action", json!({
            "condition": { "type": "deal_value", "config": { "operator": "gt", "value": 1 } }
        }))
        .map(|_| ()),
    ];

    for (i, case) in cases.into_iter().enumerate() {
        assert!(
            matches!(case, Err(AppError::ValidationError { .. })),
            "case {} was {:?}",
            i,
            case
        );
    }
}

fn top_level_keys(payload: &Value) -> Vec<String> {
    payload
        .as_object()
        .map(|o| o.keys().cloned().collect())
        .unwrap_or_default()
}
