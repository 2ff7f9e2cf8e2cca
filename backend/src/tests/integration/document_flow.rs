use chrono::{Datelike, Duration, Utc};
use rust_decimal::Decimal;
use salesflow_shared::{InvoiceStatus, QuoteStatus, SalesOrderStatus};
use uuid::Uuid;

use crate::error::AppError;
use crate::store::{DocumentKind, DocumentStore};
use crate::tests::{fixtures, TestContext};

// ============================================
// Quote -> Sales order
// ============================================

#[tokio::test]
async fn test_widget_quote_becomes_sales_order() {
    let ctx = TestContext::new();
    let (quote, items) = fixtures::seed_widget_quote(&ctx.store).await;

    let created = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    let order = ctx.store.get_sales_order(created.sales_order_id).await.unwrap().unwrap();
    assert_eq!(order.totals(), quote.totals());
    assert_eq!(order.subtotal, Decimal::from(100));
    assert_eq!(order.tax, Decimal::from(10));
    assert_eq!(order.total, Decimal::from(110));
    assert_eq!(order.status, SalesOrderStatus::Confirmed);
    assert_eq!(order.quote_id, Some(quote.id));
    assert_eq!(order.number, format!("SO-{}-001", Utc::now().year()));

    let cloned = ctx
        .store
        .list_line_items(DocumentKind::SalesOrder, order.id)
        .await
        .unwrap();
    assert_eq!(cloned.len(), 1);
    assert!(cloned[0].same_content(&items[0]));
    assert_eq!(cloned[0].name, "Widget");
    assert_eq!(cloned[0].quantity, Decimal::from(2));
    assert_eq!(cloned[0].unit_price, Decimal::from(50));
    assert_ne!(cloned[0].id, items[0].id);
    assert_eq!(cloned[0].document_id, order.id);

    let confirmed = ctx.store.get_quote(quote.id).await.unwrap().unwrap();
    assert_eq!(confirmed.status, QuoteStatus::Confirmed);
}

#[tokio::test]
async fn test_quote_without_items_still_confirms() {
    let ctx = TestContext::new();
    let quote = fixtures::quote("Q-EMPTY", 0, 0, QuoteStatus::Sent);
    ctx.store.insert_quote(&quote).await.unwrap();

    let created = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    let items = ctx
        .store
        .list_line_items(DocumentKind::SalesOrder, created.sales_order_id)
        .await
        .unwrap();
    assert!(items.is_empty());
}

#[tokio::test]
async fn test_confirm_retry_returns_existing_order() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;

    let first = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();
    let second = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    assert_eq!(first, second);
    assert_eq!(ctx.store.sales_orders().await.len(), 1);
}

#[tokio::test]
async fn test_closed_quotes_rejected() {
    let ctx = TestContext::new();
    for status in [QuoteStatus::Rejected, QuoteStatus::Expired] {
        let quote = fixtures::quote("Q-CLOSED", 100, 10, status);
        ctx.store.insert_quote(&quote).await.unwrap();

        let err = ctx
            .state
            .orchestrator
            .confirm_quote_to_sales_order(quote.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::ValidationError { .. }), "{:?} accepted", status);
    }
    assert!(ctx.store.sales_orders().await.is_empty());
}

#[tokio::test]
async fn test_missing_quote_is_not_found() {
    let ctx = TestContext::new();
    let err = ctx
        .state
        .orchestrator
        .confirm_quote_to_sales_order(Uuid::new_v4())
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn test_quote_update_failure_rolls_back_order() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;
    ctx.store.fail_on("update_quote");

    let err = ctx
        .state
        .orchestrator
        .confirm_quote_to_sales_order(quote.id)
        .await
        .unwrap_err();

    match err {
        AppError::PartialSagaFailure {
            failed_step,
            completed_steps,
            compensated,
            ..
        } => {
            assert_eq!(failed_step, "confirm_quote");
            assert_eq!(completed_steps, vec!["create_sales_order", "clone_line_items"]);
            assert!(compensated);
        }
        other => panic!("unexpected error {:?}", other),
    }
    assert!(ctx.store.sales_orders().await.is_empty());
    assert_eq!(
        ctx.store.get_quote(quote.id).await.unwrap().unwrap().status,
        QuoteStatus::Accepted
    );

    // The consumed sequence value is not reused
    ctx.store.clear_failures();
    let created = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();
    assert_eq!(created.number, format!("SO-{}-002", Utc::now().year()));
}

// ============================================
// Sales order -> Invoice
// ============================================

#[tokio::test]
async fn test_invoice_mirrors_sales_order() {
    let ctx = TestContext::new();
    let (quote, items) = fixtures::seed_widget_quote(&ctx.store).await;
    let order = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    let created = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(order.sales_order_id)
        .await
        .unwrap();

    let invoice = ctx.store.get_invoice(created.invoice_id).await.unwrap().unwrap();
    assert_eq!(invoice.totals(), quote.totals());
    assert_eq!(invoice.status, InvoiceStatus::Posted);
    assert_eq!(invoice.currency, "USD");
    assert_eq!(invoice.sales_order_id, Some(order.sales_order_id));
    assert_eq!(invoice.due_date, invoice.issue_date + Duration::days(14));
    assert_eq!(invoice.number, format!("INV-{}-001", Utc::now().year()));

    let invoice_items = ctx
        .store
        .list_line_items(DocumentKind::Invoice, invoice.id)
        .await
        .unwrap();
    assert_eq!(invoice_items.len(), items.len());
    assert!(invoice_items[0].same_content(&items[0]));

    let fulfilled = ctx.store.get_sales_order(order.sales_order_id).await.unwrap().unwrap();
    assert_eq!(fulfilled.status, SalesOrderStatus::Fulfilled);
}

#[tokio::test]
async fn test_invoice_retry_returns_existing_invoice() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;
    let order = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    let first = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(order.sales_order_id)
        .await
        .unwrap();
    let second = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(order.sales_order_id)
        .await
        .unwrap();

    assert_eq!(first, second);
    assert_eq!(ctx.store.invoices().await.len(), 1);
}

#[tokio::test]
async fn test_cancelled_order_cannot_be_invoiced() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;
    let created = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();

    let mut order = ctx.store.get_sales_order(created.sales_order_id).await.unwrap().unwrap();
    order.status = SalesOrderStatus::Cancelled;
    ctx.store.update_sales_order(&order).await.unwrap();

    let err = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(order.id)
        .await
        .unwrap_err();
    assert!(matches!(err, AppError::ValidationError { .. }));
    assert!(ctx.store.invoices().await.is_empty());
}

#[tokio::test]
async fn test_fulfilment_failure_removes_invoice() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;
    let created = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();
    ctx.store.fail_on("update_sales_order");

    let err = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(created.sales_order_id)
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        AppError::PartialSagaFailure { ref failed_step, compensated: true, .. } if failed_step == "fulfil_sales_order"
    ));
    assert!(ctx.store.invoices().await.is_empty());
    let order = ctx.store.get_sales_order(created.sales_order_id).await.unwrap().unwrap();
    assert_eq!(order.status, SalesOrderStatus::Confirmed);
}

#[tokio::test]
async fn test_document_flow_writes_activity_feed() {
    let ctx = TestContext::new();
    let (quote, _) = fixtures::seed_widget_quote(&ctx.store).await;
    let order = ctx.state.orchestrator.confirm_quote_to_sales_order(quote.id).await.unwrap();
    let invoice = ctx
        .state
        .orchestrator
        .create_invoice_from_sales_order(order.sales_order_id)
        .await
        .unwrap();

    let activities = ctx.state.orchestrator.activities();
    let order_feed = activities.history("sales_order", order.sales_order_id, None).await.unwrap();
    assert_eq!(order_feed.len(), 1);
    assert_eq!(order_feed[0].action, "created");
    assert_eq!(order_feed[0].metadata["quote_id"], serde_json::json!(quote.id));
    assert_eq!(order_feed[0].metadata["line_items"], serde_json::json!(1));

    let invoice_feed = activities.history("invoice", invoice.invoice_id, None).await.unwrap();
    assert_eq!(invoice_feed.len(), 1);
    assert_eq!(invoice_feed[0].metadata["sales_order_id"], serde_json::json!(order.sales_order_id));
    assert!(invoice_feed[0].metadata["correlation_id"].is_string());
}
