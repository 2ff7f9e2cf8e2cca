//! Document storage seam.
//!
//! The orchestrator, the ledger poster and the rule engine only ever see a
//! `dyn DocumentStore`. [`PgStore`] is the production implementation;
//! [`InMemoryStore`] backs the test suite and local dry runs.

mod memory;
mod postgres;

pub use memory::InMemoryStore;
pub use postgres::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use salesflow_shared::{
    Account, Activity, Company, Contact, Deal, Invoice, Lead, LedgerEntry, LineItem, Payment,
    Quote, SalesOrder, Task,
};
use std::future::Future;
use std::time::Duration;
use uuid::Uuid;

use crate::error::{ApiResult, AppError};
use crate::workflows::{AutomationRule, ExecutionLog, TriggerType};

/// Documents that own line items
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DocumentKind {
    Quote,
    SalesOrder,
    Invoice,
}

impl DocumentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Quote => "quote",
            Self::SalesOrder => "sales_order",
            Self::Invoice => "invoice",
        }
    }
}

/// Fields the update_record action may touch, per entity type.
pub fn updatable_fields(entity_type: &str) -> &'static [&'static str] {
    match entity_type {
        "lead" => &["status", "score", "notes", "source"],
        "contact" => &["phone", "tags"],
        "deal" => &["stage", "probability", "value", "status", "expected_close_date"],
        "task" => &["priority", "status", "assignee", "due_at"],
        _ => &[],
    }
}

pub fn ensure_updatable(entity_type: &str, field: &str) -> ApiResult<()> {
    if updatable_fields(entity_type).contains(&field) {
        Ok(())
    } else {
        Err(crate::error::validation_error(
            "field",
            &format!("{}.{} cannot be updated by automation", entity_type, field),
        ))
    }
}

#[async_trait]
pub trait DocumentStore: Send + Sync {
    // Leads
    async fn get_lead(&self, id: Uuid) -> ApiResult<Option<Lead>>;
    async fn insert_lead(&self, lead: &Lead) -> ApiResult<()>;
    async fn update_lead(&self, lead: &Lead) -> ApiResult<()>;

    // Companies
    async fn find_company_by_name(&self, name: &str) -> ApiResult<Option<Company>>;
    async fn insert_company(&self, company: &Company) -> ApiResult<()>;
    async fn delete_company(&self, id: Uuid) -> ApiResult<()>;

    // Contacts
    async fn get_contact(&self, id: Uuid) -> ApiResult<Option<Contact>>;
    async fn find_contact_by_email(&self, email: &str) -> ApiResult<Option<Contact>>;
    async fn insert_contact(&self, contact: &Contact) -> ApiResult<()>;
    async fn update_contact(&self, contact: &Contact) -> ApiResult<()>;
    async fn delete_contact(&self, id: Uuid) -> ApiResult<()>;

    // Deals
    async fn get_deal(&self, id: Uuid) -> ApiResult<Option<Deal>>;
    async fn insert_deal(&self, deal: &Deal) -> ApiResult<()>;
    async fn delete_deal(&self, id: Uuid) -> ApiResult<()>;

    // Quotes, sales orders, invoices
    async fn get_quote(&self, id: Uuid) -> ApiResult<Option<Quote>>;
    async fn insert_quote(&self, quote: &Quote) -> ApiResult<()>;
    async fn update_quote(&self, quote: &Quote) -> ApiResult<()>;

    async fn get_sales_order(&self, id: Uuid) -> ApiResult<Option<SalesOrder>>;
    async fn find_sales_order_by_quote(&self, quote_id: Uuid) -> ApiResult<Option<SalesOrder>>;
    async fn insert_sales_order(&self, order: &SalesOrder) -> ApiResult<()>;
    async fn update_sales_order(&self, order: &SalesOrder) -> ApiResult<()>;
    async fn delete_sales_order(&self, id: Uuid) -> ApiResult<()>;

    async fn get_invoice(&self, id: Uuid) -> ApiResult<Option<Invoice>>;
    async fn find_invoice_by_sales_order(&self, sales_order_id: Uuid) -> ApiResult<Option<Invoice>>;
    async fn insert_invoice(&self, invoice: &Invoice) -> ApiResult<()>;
    async fn update_invoice(&self, invoice: &Invoice) -> ApiResult<()>;
    async fn delete_invoice(&self, id: Uuid) -> ApiResult<()>;

    /// Ordered by position
    async fn list_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<Vec<LineItem>>;
    async fn insert_line_items(&self, kind: DocumentKind, items: &[LineItem]) -> ApiResult<()>;
    async fn delete_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<()>;

    /// Atomically returns the next value of the `(prefix, year)` counter, starting at 1.
    async fn next_sequence(&self, prefix: &str, year: i32) -> ApiResult<i64>;

    // Payments
    async fn insert_payment(&self, payment: &Payment) -> ApiResult<()>;
    async fn find_payment_by_provider_ref(&self, provider_ref: &str) -> ApiResult<Option<Payment>>;
    async fn list_payments_for_invoice(&self, invoice_id: Uuid) -> ApiResult<Vec<Payment>>;
    async fn delete_payment(&self, id: Uuid) -> ApiResult<()>;

    // Ledger
    async fn find_account_by_code(&self, code: &str) -> ApiResult<Option<Account>>;
    async fn insert_account(&self, account: &Account) -> ApiResult<()>;
    async fn insert_ledger_entries(&self, entries: &[LedgerEntry]) -> ApiResult<()>;
    async fn list_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<Vec<LedgerEntry>>;
    async fn delete_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<()>;

    // Activity feed
    async fn insert_activity(&self, activity: &Activity) -> ApiResult<()>;
    /// Most recent first
    async fn list_activities(&self, entity_type: &str, entity_id: Uuid, limit: i64) -> ApiResult<Vec<Activity>>;

    // Tasks
    async fn get_task(&self, id: Uuid) -> ApiResult<Option<Task>>;
    async fn insert_task(&self, task: &Task) -> ApiResult<()>;
    /// Open tasks whose due_at lies before `now`
    async fn list_overdue_tasks(&self, now: DateTime<Utc>) -> ApiResult<Vec<Task>>;

    /// Set one allowlisted field on a lead, contact, deal or task.
    async fn update_record(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> ApiResult<()>;

    // Automation rules
    async fn insert_rule(&self, rule: &AutomationRule) -> ApiResult<()>;
    async fn get_rule(&self, id: Uuid) -> ApiResult<Option<AutomationRule>>;
    async fn list_active_rules(&self, trigger_type: TriggerType) -> ApiResult<Vec<AutomationRule>>;
    /// Bump execution counters after a run
    async fn record_rule_run(&self, rule_id: Uuid, success: bool, at: DateTime<Utc>) -> ApiResult<()>;

    // Execution logs
    async fn insert_execution_log(&self, log: &ExecutionLog) -> ApiResult<()>;
    /// Most recent first
    async fn list_execution_logs(&self, rule_id: Uuid, limit: i64) -> ApiResult<Vec<ExecutionLog>>;
}

/// Run a store call under a deadline; an elapsed deadline is a retryable `Unavailable`.
pub async fn bounded<T, F>(timeout: Duration, operation: &str, fut: F) -> ApiResult<T>
where
    F: Future<Output = ApiResult<T>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result,
        Err(_) => {
            tracing::warn!(operation = %operation, timeout_ms = timeout.as_millis() as u64, "Store call timed out");
            Err(AppError::Unavailable(format!(
                "{} timed out after {}ms",
                operation,
                timeout.as_millis()
            )))
        }
    }
}

/// Unwrap an optional lookup into `NotFound`.
pub fn required<T>(value: Option<T>, what: &str, id: Uuid) -> ApiResult<T> {
    value.ok_or_else(|| AppError::NotFound(format!("{} {}", what, id)))
}
