use async_trait::async_trait;
use chrono::{DateTime, Utc};
use salesflow_shared::{
    Account, Activity, Company, Contact, Deal, Invoice, Lead, LedgerEntry, LineItem, Payment,
    Quote, SalesOrder, Task, TaskStatus,
};
use serde::{de::DeserializeOwned, Serialize};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::RwLock;
use uuid::Uuid;

use super::{ensure_updatable, DocumentKind, DocumentStore};
use crate::error::{ApiResult, AppError};
use crate::workflows::{AutomationRule, ExecutionLog, TriggerType};

#[derive(Default)]
struct Tables {
    leads: HashMap<Uuid, Lead>,
    companies: Vec<Company>,
    contacts: HashMap<Uuid, Contact>,
    deals: HashMap<Uuid, Deal>,
    quotes: HashMap<Uuid, Quote>,
    sales_orders: HashMap<Uuid, SalesOrder>,
    invoices: HashMap<Uuid, Invoice>,
    line_items: HashMap<(DocumentKind, Uuid), Vec<LineItem>>,
    sequences: HashMap<(String, i32), i64>,
    payments: Vec<Payment>,
    accounts: Vec<Account>,
    ledger: Vec<LedgerEntry>,
    activities: Vec<Activity>,
    tasks: HashMap<Uuid, Task>,
    rules: HashMap<Uuid, AutomationRule>,
    execution_logs: Vec<ExecutionLog>,
}

/// In-memory store with failure injection for saga and engine tests
#[derive(Clone, Default)]
pub struct InMemoryStore {
    tables: Arc<RwLock<Tables>>,
    failing: Arc<Mutex<HashSet<String>>>,
    delays: Arc<Mutex<HashMap<String, Duration>>>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store seeded with the bank (1010) and receivable (1100) accounts
    pub fn with_chart_of_accounts() -> Self {
        let tables = Tables {
            accounts: vec![
                Account {
                    id: Uuid::new_v4(),
                    code: "1010".to_string(),
                    name: "Bank".to_string(),
                    account_type: "asset".to_string(),
                },
                Account {
                    id: Uuid::new_v4(),
                    code: "1100".to_string(),
                    name: "Accounts Receivable".to_string(),
                    account_type: "asset".to_string(),
                },
            ],
            ..Default::default()
        };

        Self {
            tables: Arc::new(RwLock::new(tables)),
            ..Default::default()
        }
    }

    /// Make every call of `operation` fail with a database error.
    pub fn fail_on(&self, operation: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(operation.to_string());
        }
    }

    pub fn clear_failures(&self) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.clear();
        }
        if let Ok(mut delays) = self.delays.lock() {
            delays.clear();
        }
    }

    /// Make every call of `operation` sleep first.
    pub fn delay_on(&self, operation: &str, delay: Duration) {
        if let Ok(mut delays) = self.delays.lock() {
            delays.insert(operation.to_string(), delay);
        }
    }

    async fn check(&self, operation: &str) -> ApiResult<()> {
        let delay = self
            .delays
            .lock()
            .ok()
            .and_then(|d| d.get(operation).copied());
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(operation))
            .unwrap_or(false);
        if failing {
            return Err(AppError::DatabaseError(format!("injected failure in {}", operation)));
        }
        Ok(())
    }

    // Snapshot helpers for assertions

    pub async fn companies(&self) -> Vec<Company> {
        self.tables.read().await.companies.clone()
    }

    pub async fn contacts(&self) -> Vec<Contact> {
        self.tables.read().await.contacts.values().cloned().collect()
    }

    pub async fn deals(&self) -> Vec<Deal> {
        self.tables.read().await.deals.values().cloned().collect()
    }

    pub async fn tasks(&self) -> Vec<Task> {
        self.tables.read().await.tasks.values().cloned().collect()
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.tables.read().await.payments.clone()
    }

    pub async fn ledger_entries(&self) -> Vec<LedgerEntry> {
        self.tables.read().await.ledger.clone()
    }

    pub async fn activities(&self) -> Vec<Activity> {
        self.tables.read().await.activities.clone()
    }

    pub async fn sales_orders(&self) -> Vec<SalesOrder> {
        self.tables.read().await.sales_orders.values().cloned().collect()
    }

    pub async fn invoices(&self) -> Vec<Invoice> {
        self.tables.read().await.invoices.values().cloned().collect()
    }
}

fn patch<T: Serialize + DeserializeOwned>(record: &T, field: &str, value: &serde_json::Value) -> ApiResult<T> {
    let mut json = serde_json::to_value(record)
        .map_err(|e| AppError::InternalError(format!("serialize record: {}", e)))?;
    json[field] = value.clone();
    if json.get("updated_at").is_some() {
        json["updated_at"] = serde_json::json!(Utc::now());
    }
    serde_json::from_value(json).map_err(|e| {
        crate::error::validation_error("value", &format!("invalid value for {}: {}", field, e))
    })
}

fn missing(what: &str, id: Uuid) -> AppError {
    AppError::NotFound(format!("{} {}", what, id))
}

#[async_trait]
impl DocumentStore for InMemoryStore {
    async fn get_lead(&self, id: Uuid) -> ApiResult<Option<Lead>> {
        self.check("get_lead").await?;
        Ok(self.tables.read().await.leads.get(&id).cloned())
    }

    async fn insert_lead(&self, lead: &Lead) -> ApiResult<()> {
        self.check("insert_lead").await?;
        self.tables.write().await.leads.insert(lead.id, lead.clone());
        Ok(())
    }

    async fn update_lead(&self, lead: &Lead) -> ApiResult<()> {
        self.check("update_lead").await?;
        let mut tables = self.tables.write().await;
        match tables.leads.get_mut(&lead.id) {
            Some(existing) => {
                *existing = lead.clone();
                Ok(())
            }
            None => Err(missing("Lead", lead.id)),
        }
    }

    async fn find_company_by_name(&self, name: &str) -> ApiResult<Option<Company>> {
        self.check("find_company_by_name").await?;
        let tables = self.tables.read().await;
        Ok(tables.companies.iter().find(|c| c.name == name).cloned())
    }

    async fn insert_company(&self, company: &Company) -> ApiResult<()> {
        self.check("insert_company").await?;
        self.tables.write().await.companies.push(company.clone());
        Ok(())
    }

    async fn delete_company(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_company").await?;
        self.tables.write().await.companies.retain(|c| c.id != id);
        Ok(())
    }

    async fn get_contact(&self, id: Uuid) -> ApiResult<Option<Contact>> {
        self.check("get_contact").await?;
        Ok(self.tables.read().await.contacts.get(&id).cloned())
    }

    async fn find_contact_by_email(&self, email: &str) -> ApiResult<Option<Contact>> {
        self.check("find_contact_by_email").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .contacts
            .values()
            .find(|c| c.email.as_deref() == Some(email))
            .cloned())
    }

    async fn insert_contact(&self, contact: &Contact) -> ApiResult<()> {
        self.check("insert_contact").await?;
        self.tables.write().await.contacts.insert(contact.id, contact.clone());
        Ok(())
    }

    async fn update_contact(&self, contact: &Contact) -> ApiResult<()> {
        self.check("update_contact").await?;
        let mut tables = self.tables.write().await;
        match tables.contacts.get_mut(&contact.id) {
            Some(existing) => {
                *existing = contact.clone();
                Ok(())
            }
            None => Err(missing("Contact", contact.id)),
        }
    }

    async fn delete_contact(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_contact").await?;
        self.tables.write().await.contacts.remove(&id);
        Ok(())
    }

    async fn get_deal(&self, id: Uuid) -> ApiResult<Option<Deal>> {
        self.check("get_deal").await?;
        Ok(self.tables.read().await.deals.get(&id).cloned())
    }

    async fn insert_deal(&self, deal: &Deal) -> ApiResult<()> {
        self.check("insert_deal").await?;
        self.tables.write().await.deals.insert(deal.id, deal.clone());
        Ok(())
    }

    async fn delete_deal(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_deal").await?;
        self.tables.write().await.deals.remove(&id);
        Ok(())
    }

    async fn get_quote(&self, id: Uuid) -> ApiResult<Option<Quote>> {
        self.check("get_quote").await?;
        Ok(self.tables.read().await.quotes.get(&id).cloned())
    }

    async fn insert_quote(&self, quote: &Quote) -> ApiResult<()> {
        self.check("insert_quote").await?;
        self.tables.write().await.quotes.insert(quote.id, quote.clone());
        Ok(())
    }

    async fn update_quote(&self, quote: &Quote) -> ApiResult<()> {
        self.check("update_quote").await?;
        let mut tables = self.tables.write().await;
        match tables.quotes.get_mut(&quote.id) {
            Some(existing) => {
                *existing = quote.clone();
                Ok(())
            }
            None => Err(missing("Quote", quote.id)),
        }
    }

    async fn get_sales_order(&self, id: Uuid) -> ApiResult<Option<SalesOrder>> {
        self.check("get_sales_order").await?;
        Ok(self.tables.read().await.sales_orders.get(&id).cloned())
    }

    async fn find_sales_order_by_quote(&self, quote_id: Uuid) -> ApiResult<Option<SalesOrder>> {
        self.check("find_sales_order_by_quote").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .sales_orders
            .values()
            .find(|o| o.quote_id == Some(quote_id))
            .cloned())
    }

    async fn insert_sales_order(&self, order: &SalesOrder) -> ApiResult<()> {
        self.check("insert_sales_order").await?;
        self.tables.write().await.sales_orders.insert(order.id, order.clone());
        Ok(())
    }

    async fn update_sales_order(&self, order: &SalesOrder) -> ApiResult<()> {
        self.check("update_sales_order").await?;
        let mut tables = self.tables.write().await;
        match tables.sales_orders.get_mut(&order.id) {
            Some(existing) => {
                *existing = order.clone();
                Ok(())
            }
            None => Err(missing("Sales order", order.id)),
        }
    }

    async fn delete_sales_order(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_sales_order").await?;
        self.tables.write().await.sales_orders.remove(&id);
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> ApiResult<Option<Invoice>> {
        self.check("get_invoice").await?;
        Ok(self.tables.read().await.invoices.get(&id).cloned())
    }

    async fn find_invoice_by_sales_order(&self, sales_order_id: Uuid) -> ApiResult<Option<Invoice>> {
        self.check("find_invoice_by_sales_order").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .invoices
            .values()
            .find(|i| i.sales_order_id == Some(sales_order_id))
            .cloned())
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> ApiResult<()> {
        self.check("insert_invoice").await?;
        self.tables.write().await.invoices.insert(invoice.id, invoice.clone());
        Ok(())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> ApiResult<()> {
        self.check("update_invoice").await?;
        let mut tables = self.tables.write().await;
        match tables.invoices.get_mut(&invoice.id) {
            Some(existing) => {
                *existing = invoice.clone();
                Ok(())
            }
            None => Err(missing("Invoice", invoice.id)),
        }
    }

    async fn delete_invoice(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_invoice").await?;
        self.tables.write().await.invoices.remove(&id);
        Ok(())
    }

    async fn list_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<Vec<LineItem>> {
        self.check("list_line_items").await?;
        let tables = self.tables.read().await;
        let mut items = tables
            .line_items
            .get(&(kind, document_id))
            .cloned()
            .unwrap_or_default();
        items.sort_by_key(|i| i.position);
        Ok(items)
    }

    async fn insert_line_items(&self, kind: DocumentKind, items: &[LineItem]) -> ApiResult<()> {
        self.check("insert_line_items").await?;
        let mut tables = self.tables.write().await;
        for item in items {
            tables
                .line_items
                .entry((kind, item.document_id))
                .or_default()
                .push(item.clone());
        }
        Ok(())
    }

    async fn delete_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<()> {
        self.check("delete_line_items").await?;
        self.tables.write().await.line_items.remove(&(kind, document_id));
        Ok(())
    }

    async fn next_sequence(&self, prefix: &str, year: i32) -> ApiResult<i64> {
        self.check("next_sequence").await?;
        let mut tables = self.tables.write().await;
        let counter = tables.sequences.entry((prefix.to_string(), year)).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn insert_payment(&self, payment: &Payment) -> ApiResult<()> {
        self.check("insert_payment").await?;
        self.tables.write().await.payments.push(payment.clone());
        Ok(())
    }

    async fn find_payment_by_provider_ref(&self, provider_ref: &str) -> ApiResult<Option<Payment>> {
        self.check("find_payment_by_provider_ref").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .find(|p| p.provider_ref.as_deref() == Some(provider_ref))
            .cloned())
    }

    async fn list_payments_for_invoice(&self, invoice_id: Uuid) -> ApiResult<Vec<Payment>> {
        self.check("list_payments_for_invoice").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .payments
            .iter()
            .filter(|p| p.invoice_id == invoice_id)
            .cloned()
            .collect())
    }

    async fn delete_payment(&self, id: Uuid) -> ApiResult<()> {
        self.check("delete_payment").await?;
        self.tables.write().await.payments.retain(|p| p.id != id);
        Ok(())
    }

    async fn find_account_by_code(&self, code: &str) -> ApiResult<Option<Account>> {
        self.check("find_account_by_code").await?;
        let tables = self.tables.read().await;
        Ok(tables.accounts.iter().find(|a| a.code == code).cloned())
    }

    async fn insert_account(&self, account: &Account) -> ApiResult<()> {
        self.check("insert_account").await?;
        self.tables.write().await.accounts.push(account.clone());
        Ok(())
    }

    async fn insert_ledger_entries(&self, entries: &[LedgerEntry]) -> ApiResult<()> {
        self.check("insert_ledger_entries").await?;
        self.tables.write().await.ledger.extend_from_slice(entries);
        Ok(())
    }

    async fn list_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<Vec<LedgerEntry>> {
        self.check("list_ledger_entries").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .ledger
            .iter()
            .filter(|e| e.ref_type == ref_type && e.ref_id == ref_id)
            .cloned()
            .collect())
    }

    async fn delete_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<()> {
        self.check("delete_ledger_entries").await?;
        self.tables
            .write()
            .await
            .ledger
            .retain(|e| !(e.ref_type == ref_type && e.ref_id == ref_id));
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> ApiResult<()> {
        self.check("insert_activity").await?;
        self.tables.write().await.activities.push(activity.clone());
        Ok(())
    }

    async fn list_activities(&self, entity_type: &str, entity_id: Uuid, limit: i64) -> ApiResult<Vec<Activity>> {
        self.check("list_activities").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .activities
            .iter()
            .rev()
            .filter(|a| a.entity_type == entity_type && a.entity_id == entity_id)
            .take(limit.max(0) as usize)
            .cloned()
            .collect())
    }

    async fn get_task(&self, id: Uuid) -> ApiResult<Option<Task>> {
        self.check("get_task").await?;
        Ok(self.tables.read().await.tasks.get(&id).cloned())
    }

    async fn insert_task(&self, task: &Task) -> ApiResult<()> {
        self.check("insert_task").await?;
        self.tables.write().await.tasks.insert(task.id, task.clone());
        Ok(())
    }

    async fn list_overdue_tasks(&self, now: DateTime<Utc>) -> ApiResult<Vec<Task>> {
        self.check("list_overdue_tasks").await?;
        let tables = self.tables.read().await;
        Ok(tables
            .tasks
            .values()
            .filter(|t| t.status == TaskStatus::Open && t.due_at.map(|d| d < now).unwrap_or(false))
            .cloned()
            .collect())
    }

    async fn update_record(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> ApiResult<()> {
        self.check("update_record").await?;
        ensure_updatable(entity_type, field)?;
        let mut tables = self.tables.write().await;

        match entity_type {
            "lead" => {
                let lead = tables.leads.get_mut(&entity_id).ok_or_else(|| missing("Lead", entity_id))?;
                *lead = patch(lead, field, value)?;
            }
            "contact" => {
                let contact = tables
                    .contacts
                    .get_mut(&entity_id)
                    .ok_or_else(|| missing("Contact", entity_id))?;
                *contact = patch(contact, field, value)?;
            }
            "deal" => {
                let deal = tables.deals.get_mut(&entity_id).ok_or_else(|| missing("Deal", entity_id))?;
                *deal = patch(deal, field, value)?;
            }
            "task" => {
                let task = tables.tasks.get_mut(&entity_id).ok_or_else(|| missing("Task", entity_id))?;
                *task = patch(task, field, value)?;
            }
            other => {
                return Err(crate::error::validation_error(
                    "entity_type",
                    &format!("unsupported entity type '{}'", other),
                ));
            }
        }
        Ok(())
    }

    async fn insert_rule(&self, rule: &AutomationRule) -> ApiResult<()> {
        self.check("insert_rule").await?;
        self.tables.write().await.rules.insert(rule.id, rule.clone());
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> ApiResult<Option<AutomationRule>> {
        self.check("get_rule").await?;
        Ok(self.tables.read().await.rules.get(&id).cloned())
    }

    async fn list_active_rules(&self, trigger_type: TriggerType) -> ApiResult<Vec<AutomationRule>> {
        self.check("list_active_rules").await?;
        let tables = self.tables.read().await;
        let mut rules: Vec<AutomationRule> = tables
            .rules
            .values()
            .filter(|r| {
                r.is_active
                    && r.trigger
                        .as_ref()
                        .map(|t| t.trigger_type == trigger_type)
                        .unwrap_or(false)
            })
            .cloned()
            .collect();
        rules.sort_by_key(|r| r.created_at);
        Ok(rules)
    }

    async fn record_rule_run(&self, rule_id: Uuid, success: bool, at: DateTime<Utc>) -> ApiResult<()> {
        self.check("record_rule_run").await?;
        let mut tables = self.tables.write().await;
        let rule = tables
            .rules
            .get_mut(&rule_id)
            .ok_or_else(|| missing("Automation rule", rule_id))?;
        rule.execution_count += 1;
        if success {
            rule.success_count += 1;
        } else {
            rule.failure_count += 1;
        }
        rule.last_executed_at = Some(at);
        Ok(())
    }

    async fn insert_execution_log(&self, log: &ExecutionLog) -> ApiResult<()> {
        self.check("insert_execution_log").await?;
        self.tables.write().await.execution_logs.push(log.clone());
        Ok(())
    }

    async fn list_execution_logs(&self, rule_id: Uuid, limit: i64) -> ApiResult<Vec<ExecutionLog>> {
        self.check("list_execution_logs").await?;
        let tables = self.tables.read().await;
        let mut logs: Vec<ExecutionLog> = tables
            .execution_logs
            .iter()
            .rev()
            .filter(|l| l.rule_id == rule_id)
            .cloned()
            .collect();
        logs.sort_by(|a, b| b.executed_at.cmp(&a.executed_at));
        logs.truncate(limit.max(0) as usize);
        Ok(logs)
    }
}
