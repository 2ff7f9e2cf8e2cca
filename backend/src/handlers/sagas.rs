use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
    routing::post,
    Router,
};
use rust_decimal::Decimal;
use serde::Deserialize;
use std::sync::Arc;
use tracing::warn;
use uuid::Uuid;

use crate::error::ApiResult;
use crate::services::{
    ConvertLeadOptions, InvoiceCreated, LeadConversion, PaymentRecorded, PaymentRequest, SalesOrderCreated,
};
use crate::workflows::TriggerEvent;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct PaymentCreate {
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    pub provider_ref: Option<String>,
}

pub fn saga_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/leads/:id/convert", post(convert_lead))
        .route("/quotes/:id/confirm", post(confirm_quote))
        .route("/sales-orders/:id/invoice", post(create_invoice))
        .route("/invoices/:id/payments", post(record_payment))
}

async fn convert_lead(
    State(state): State<Arc<AppState>>,
    Path(lead_id): Path<Uuid>,
    Json(options): Json<ConvertLeadOptions>,
) -> ApiResult<(StatusCode, Json<LeadConversion>)> {
    let conversion = state.orchestrator.convert_lead_to_deal(lead_id, options).await?;

    // Automations react to the new deal outside the request
    let engine = state.engine.clone();
    let store = state.store.clone();
    let deal_id = conversion.deal_id;
    tokio::spawn(async move {
        match store.get_deal(deal_id).await {
            Ok(Some(deal)) => {
                if let Err(e) = engine.dispatch(&TriggerEvent::deal_created(&deal)).await {
                    warn!(deal_id = %deal_id, error = %e, "deal_created dispatch failed");
                }
            }
            Ok(None) => {}
            Err(e) => warn!(deal_id = %deal_id, error = %e, "Could not load converted deal"),
        }
    });

    Ok((StatusCode::CREATED, Json(conversion)))
}

async fn confirm_quote(
    State(state): State<Arc<AppState>>,
    Path(quote_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<SalesOrderCreated>)> {
    let created = state.orchestrator.confirm_quote_to_sales_order(quote_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn create_invoice(
    State(state): State<Arc<AppState>>,
    Path(sales_order_id): Path<Uuid>,
) -> ApiResult<(StatusCode, Json<InvoiceCreated>)> {
    let created = state.orchestrator.create_invoice_from_sales_order(sales_order_id).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

async fn record_payment(
    State(state): State<Arc<AppState>>,
    Path(invoice_id): Path<Uuid>,
    Json(body): Json<PaymentCreate>,
) -> ApiResult<(StatusCode, Json<PaymentRecorded>)> {
    let recorded = state
        .orchestrator
        .record_payment(PaymentRequest {
            invoice_id,
            amount: body.amount,
            currency: body.currency,
            method: body.method,
            provider_ref: body.provider_ref,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(recorded)))
}
