use axum::http::StatusCode;
use serde_json::json;
use std::time::Duration;
use tower::ServiceExt;
use uuid::Uuid;

use crate::store::DocumentStore;
use crate::tests::helpers::{get_request, json_request, read_json};
use crate::tests::{fixtures, TestContext};

fn note_rule(trigger: &str) -> serde_json::Value {
    json!({
        "name": format!("Note on {}", trigger),
        "trigger": { "type": trigger },
        "actions": [
            {
                "type": "add_note",
                "config": { "entity_type": "deal", "entity_id": "{{deal.id}}", "content": "Welcome {{deal.title}}" }
            }
        ]
    })
}

// ============================================
// Health
// ============================================

#[tokio::test]
async fn test_health_endpoints() {
    let ctx = TestContext::new();

    let response = ctx.router().oneshot(get_request("/health")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["status"], "healthy");

    let response = ctx.router().oneshot(get_request("/health/detailed")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(read_json(response).await["database"], "in_memory");
}

// ============================================
// Sagas
// ============================================

#[tokio::test]
async fn test_convert_lead_endpoint_dispatches_deal_created() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request("POST", "/api/v1/automation/rules", note_rule("deal_created")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let lead = fixtures::lead("John Smith", "john@techcorp.com", Some("TechCorp"));
    ctx.store.insert_lead(&lead).await.unwrap();

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/leads/{}/convert", lead.id),
            json!({ "estimated_value": "12500.00" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let body = read_json(response).await;
    let deal_id: Uuid = serde_json::from_value(body["deal_id"].clone()).unwrap();
    assert!(body["contact_id"].is_string());
    assert!(body["company_id"].is_string());

    // The deal_created dispatch runs after the response
    let mut notes = Vec::new();
    for _ in 0..50 {
        notes = ctx
            .store
            .activities()
            .await
            .into_iter()
            .filter(|a| a.entity_id == deal_id && a.action == "note")
            .collect();
        if !notes.is_empty() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert_eq!(notes.len(), 1);
    assert_eq!(notes[0].description.as_deref(), Some("Welcome TechCorp - John Smith"));

    let response = ctx
        .router()
        .oneshot(get_request(&format!("/api/v1/activities/deal/{}", deal_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let feed = read_json(response).await;
    assert_eq!(feed["count"], 2);
    assert_eq!(feed["limit"], 25);
}

#[tokio::test]
async fn test_convert_unknown_lead_returns_404() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/leads/{}/convert", Uuid::new_v4()),
            json!({}),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = read_json(response).await;
    assert_eq!(body["code"], "NOT_FOUND");
    assert_eq!(body["retryable"], false);
}

#[tokio::test]
async fn test_quote_to_paid_invoice_over_http() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;

    let response = ctx
        .router()
        .oneshot(json_request("POST", &format!("/api/v1/quotes/{}/confirm", quote.id), json!({})))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let order = read_json(response).await;
    assert!(order["number"].as_str().unwrap().starts_with("SO-"));

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/sales-orders/{}/invoice", order["sales_order_id"].as_str().unwrap()),
            json!({}),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let invoice = read_json(response).await;
    let invoice_id = invoice["invoice_id"].as_str().unwrap().to_string();

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/invoices/{}/payments", invoice_id),
            json!({ "amount": "110.00", "currency": "USD", "method": "bank_transfer", "provider_ref": "tr_001" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let payment = read_json(response).await;
    assert_eq!(payment["invoice_status"], "paid");
    assert_eq!(payment["ledger_posted"], true);
}

#[tokio::test]
async fn test_zero_payment_is_unprocessable() {
    let ctx = TestContext::new();
    let invoice = fixtures::seed_invoice(&ctx.store, 110).await;

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            &format!("/api/v1/invoices/{}/payments", invoice.id),
            json!({ "amount": "0", "currency": "USD", "method": "card" }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = read_json(response).await;
    assert_eq!(body["code"], "VALIDATION_ERROR");
    assert!(body["details"]["amount"].is_array());
}

// ============================================
// Automation
// ============================================

#[tokio::test]
async fn test_catalog_lists_every_type() {
    let ctx = TestContext::new();
    let response = ctx.router().oneshot(get_request("/api/v1/automation/catalog")).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = read_json(response).await;
    assert_eq!(body["triggers"].as_array().unwrap().len(), 12);
    assert_eq!(body["conditions"].as_array().unwrap().len(), 10);
    assert_eq!(body["actions"].as_array().unwrap().len(), 13);
}

#[tokio::test]
async fn test_sample_payload_endpoint() {
    let ctx = TestContext::new();

    let response = ctx
        .router()
        .oneshot(get_request("/api/v1/automation/sample-payload/task_deadline_missed"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(read_json(response).await["task"].is_object());

    let response = ctx
        .router()
        .oneshot(get_request("/api/v1/automation/sample-payload/invoice_overdue"))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_unknown_trigger_type_is_bad_request() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/events",
            json!({ "trigger_type": "deal_exploded", "payload": {} }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(read_json(response).await["code"], "UNKNOWN_TRIGGER_TYPE");
}

#[tokio::test]
async fn test_rule_without_actions_is_rejected() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/rules",
            json!({ "name": "Empty", "trigger": { "type": "deal_created" } }),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_scheduled_rule_is_registered_on_create() {
    let (ctx, scheduler) = TestContext::with_scheduler().await;
    let rule = |cron: Option<&str>| {
        json!({
            "name": "Weekly pipeline review",
            "trigger": { "type": "scheduled_trigger", "config": { "cron": cron } },
            "actions": [ { "type": "create_task", "config": { "title": "Review pipeline" } } ]
        })
    };

    let response = ctx
        .router()
        .oneshot(json_request("POST", "/api/v1/automation/rules", rule(Some("0 0 9 * * Mon"))))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(scheduler.registered_rules().await, 1);

    for bad in [None, Some("whenever")] {
        let response = ctx
            .router()
            .oneshot(json_request("POST", "/api/v1/automation/rules", rule(bad)))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(read_json(response).await["details"]["trigger"].is_array());
    }
    assert_eq!(scheduler.registered_rules().await, 1);
}

#[tokio::test]
async fn test_create_invoke_and_list_executions() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request("POST", "/api/v1/automation/rules", note_rule("deal_created")))
        .await
        .unwrap();
    let rule = read_json(response).await;
    let rule_id = rule["id"].as_str().unwrap().to_string();
    assert_eq!(rule["is_active"], true);

    let response = ctx
        .router()
        .oneshot(get_request(&format!("/api/v1/automation/rules/{}", rule_id)))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    // No body: the engine supplies a sample deal_created payload
    let response = ctx
        .router()
        .oneshot(
            axum::http::Request::builder()
                .method("POST")
                .uri(format!("/api/v1/automation/rules/{}/invoke", rule_id))
                .body(axum::body::Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let invoked = read_json(response).await;
    assert_eq!(invoked["success"], true);
    assert_eq!(invoked["results"].as_array().unwrap().len(), 1);

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/invoke",
            json!({
                "rule_id": rule_id,
                "trigger_type": "contact_created",
                "trigger_data": { "contact": { "id": Uuid::new_v4() } }
            }),
        ))
        .await
        .unwrap();
    let mismatched = read_json(response).await;
    assert_eq!(mismatched["success"], false);
    assert_eq!(mismatched["error"], "Trigger contact_created did not match rule trigger");

    let response = ctx
        .router()
        .oneshot(get_request(&format!(
            "/api/v1/automation/rules/{}/executions?limit=500",
            rule_id
        )))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let history = read_json(response).await;
    assert_eq!(history["limit"], 100);
    assert_eq!(history["count"], 2);
    assert_eq!(history["data"][0]["id"], mismatched["execution_log_id"]);
}

#[tokio::test]
async fn test_invoke_unknown_rule_returns_404() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/invoke",
            json!({ "rule_id": Uuid::new_v4() }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_webhook_dispatches_matching_rules() {
    let ctx = TestContext::new();
    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/rules",
            json!({
                "name": "Forward webhooks",
                "trigger": { "type": "webhook_received" },
                "conditions": [
                    { "type": "custom_field", "config": { "field": "body.event", "operator": "equals", "value": "invoice.paid" } }
                ],
                "actions": [ { "type": "delay_action", "config": { "seconds": 0 } } ]
            }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);

    let response = ctx
        .router()
        .oneshot(json_request(
            "POST",
            "/api/v1/automation/webhooks/stripe/events",
            json!({ "event": "invoice.paid" }),
        ))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let summary = read_json(response).await;
    assert_eq!(summary["rules_fired"], 1);
    let execution = &summary["executions"][0];
    assert_eq!(execution["execution_result"]["success"], true);
    assert!(execution["trigger_data"]["webhook"]["path"]
        .as_str()
        .unwrap()
        .ends_with("stripe/events"));
}
