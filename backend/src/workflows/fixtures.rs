// Synthetic trigger payloads for dry runs. Shapes mirror the TriggerEvent constructors.

use chrono::{Duration, Utc};
use serde_json::{json, Value};
use uuid::Uuid;

use super::triggers::TriggerType;
use crate::error::ApiResult;

fn sample_deal() -> Value {
    json!({
        "id": Uuid::new_v4(),
        "title": "Sample Deal - Acme Corp",
        "value": "25000.00",
        "currency": "USD",
        "probability": 60,
        "status": "open",
        "stage": "proposal",
        "contact_id": Uuid::new_v4(),
        "company_id": Uuid::new_v4(),
        "expected_close_date": (Utc::now() + Duration::days(30)).date_naive()
    })
}

fn sample_contact() -> Value {
    json!({
        "id": Uuid::new_v4(),
        "first_name": "Jamie",
        "last_name": "Rivera",
        "email": "jamie.rivera@example.com",
        "phone": "+1 555 0100",
        "company_id": Uuid::new_v4(),
        "tags": ["prospect", "enterprise"],
        "created_at": Utc::now()
    })
}

fn sample_task(overdue: bool) -> Value {
    let now = Utc::now();
    let due_at = if overdue { now - Duration::hours(6) } else { now + Duration::hours(6) };
    json!({
        "id": Uuid::new_v4(),
        "title": "Send proposal to Acme Corp",
        "description": "Draft and send the revised proposal",
        "priority": "high",
        "status": if overdue { "open" } else { "completed" },
        "assignee": "sales-rep@example.com",
        "due_at": due_at,
        "entity_type": "deal",
        "entity_id": Uuid::new_v4(),
        "created_at": now - Duration::days(2)
    })
}

fn sample_email_event(event: &str) -> Value {
    let mut payload = json!({
        "email": {
            "message_id": Uuid::new_v4(),
            "subject": "Your proposal from Acme Corp",
            "recipient": "jamie.rivera@example.com",
            "event": event,
            "occurred_at": Utc::now()
        },
        "contact": sample_contact()
    });
    if event == "clicked" {
        payload["email"]["link"] = json!("https://example.com/pricing");
    }
    payload
}

/// Representative payload for one trigger type.
pub fn sample_payload(trigger_type: TriggerType) -> Value {
    let now = Utc::now();

    match trigger_type {
        TriggerType::DealStageChanged => {
            let mut deal = sample_deal();
            deal["stage"] = json!({ "previous": "qualified", "current": "proposal" });
            json!({ "deal": deal })
        }
        TriggerType::DealCreated => json!({ "deal": sample_deal() }),
        TriggerType::ContactCreated => json!({ "contact": sample_contact() }),
        TriggerType::TaskDeadlineMissed => json!({
            "task": sample_task(true),
            "hours_overdue": 6
        }),
        TriggerType::TaskCompleted => json!({ "task": sample_task(false) }),
        TriggerType::FormSubmitted => json!({
            "form": {
                "id": Uuid::new_v4(),
                "name": "Contact us",
                "submitted_at": now,
                "fields": {
                    "name": "Jamie Rivera",
                    "email": "jamie.rivera@example.com",
                    "company": "Acme Corp",
                    "message": "Interested in a demo"
                }
            },
            "lead": {
                "name": "Jamie Rivera",
                "email": "jamie.rivera@example.com",
                "company_name": "Acme Corp",
                "source": "website",
                "score": 72
            }
        }),
        TriggerType::EmailOpened => sample_email_event("opened"),
        TriggerType::EmailClicked => sample_email_event("clicked"),
        TriggerType::WebhookReceived => json!({
            "webhook": {
                "path": "/hooks/sample",
                "received_at": now
            },
            "body": {
                "event": "sample.event",
                "data": { "id": Uuid::new_v4() }
            }
        }),
        TriggerType::ScheduledTrigger => json!({
            "schedule": {
                "rule_id": Uuid::new_v4(),
                "cron": "0 0 9 * * Mon-Fri",
                "fired_at": now
            }
        }),
        TriggerType::ApiCall => json!({
            "request": {
                "method": "POST",
                "path": "/api/automation/events",
                "caller": "integration-test"
            },
            "data": { "deal": sample_deal() }
        }),
        TriggerType::DatabaseChange => json!({
            "change": {
                "table": "deals",
                "operation": "update",
                "record_id": Uuid::new_v4(),
                "changed_fields": ["stage", "probability"],
                "occurred_at": now
            },
            "deal": sample_deal()
        }),
    }
}

/// Same as `sample_payload`, keyed by catalog string.
pub fn sample_payload_for(trigger_type: &str) -> ApiResult<Value> {
    Ok(sample_payload(trigger_type.parse()?))
}
