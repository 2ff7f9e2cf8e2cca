use axum::http::StatusCode;
use axum::response::IntoResponse;
use uuid::Uuid;

use crate::error::AppError;
use crate::tests::helpers::read_json;

#[tokio::test]
async fn test_partial_saga_failure_body() {
    let correlation_id = Uuid::new_v4();
    let response = AppError::PartialSagaFailure {
        saga: "record_payment".into(),
        correlation_id,
        failed_step: "post_ledger".into(),
        completed_steps: vec!["create_payment".into(), "mark_invoice_paid".into()],
        compensated: true,
        source: Box::new(AppError::MissingLedgerAccounts {
            missing: vec!["1010".into()],
        }),
    }
    .into_response();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let body = read_json(response).await;
    assert_eq!(body["code"], "PARTIAL_SAGA_FAILURE");
    assert_eq!(body["retryable"], false);
    assert_eq!(body["details"]["failed_step"][0], "post_ledger");
    assert_eq!(body["details"]["completed_steps"].as_array().unwrap().len(), 2);
    assert_eq!(body["details"]["correlation_id"][0], correlation_id.to_string());
    assert_eq!(body["details"]["compensated"][0], "true");
}

#[tokio::test]
async fn test_store_errors_are_not_leaked() {
    let response = AppError::DatabaseError("relation \"leads\" does not exist".into()).into_response();
    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);

    let body = read_json(response).await;
    assert_eq!(body["message"], "A database error occurred");
    assert!(body.get("details").is_none());
}

#[tokio::test]
async fn test_timeouts_are_retryable_over_http() {
    let response = AppError::Unavailable("insert_deal".into()).into_response();
    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(read_json(response).await["retryable"], true);
}

#[tokio::test]
async fn test_missing_accounts_listed_in_details() {
    let response = AppError::MissingLedgerAccounts {
        missing: vec!["1010".into(), "1100".into()],
    }
    .into_response();

    let body = read_json(response).await;
    assert_eq!(body["code"], "MISSING_LEDGER_ACCOUNTS");
    assert_eq!(body["details"]["accounts"], serde_json::json!(["1010", "1100"]));
}
