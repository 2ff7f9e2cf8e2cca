use async_trait::async_trait;
use chrono::{DateTime, Utc};
use salesflow_shared::{
    Account, Activity, Company, Contact, Deal, Invoice, Lead, LedgerEntry, LineItem, Payment,
    Quote, SalesOrder, Task,
};
use sqlx::types::Json;
use sqlx::{FromRow, PgPool};
use uuid::Uuid;

use super::{ensure_updatable, DocumentKind, DocumentStore};
use crate::error::{ApiResult, AppError};
use crate::workflows::{
    Action, AutomationRule, Condition, ExecutionLog, ExecutionResult, Trigger, TriggerType,
};

/// PostgreSQL-backed document store
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[derive(FromRow)]
struct RuleRow {
    id: Uuid,
    name: String,
    description: Option<String>,
    is_active: bool,
    trigger: Option<Json<Trigger>>,
    conditions: Json<Vec<Condition>>,
    actions: Json<Vec<Action>>,
    execution_count: i64,
    success_count: i64,
    failure_count: i64,
    last_executed_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: Option<DateTime<Utc>>,
}

impl From<RuleRow> for AutomationRule {
    fn from(row: RuleRow) -> Self {
        Self {
            id: row.id,
            name: row.name,
            description: row.description,
            is_active: row.is_active,
            trigger: row.trigger.map(|t| t.0),
            conditions: row.conditions.0,
            actions: row.actions.0,
            execution_count: row.execution_count,
            success_count: row.success_count,
            failure_count: row.failure_count,
            last_executed_at: row.last_executed_at,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

#[derive(FromRow)]
struct ExecutionLogRow {
    id: Uuid,
    rule_id: Uuid,
    trigger_type: String,
    trigger_data: serde_json::Value,
    execution_result: Json<ExecutionResult>,
    execution_time_ms: i64,
    executed_at: DateTime<Utc>,
}

impl From<ExecutionLogRow> for ExecutionLog {
    fn from(row: ExecutionLogRow) -> Self {
        Self {
            id: row.id,
            rule_id: row.rule_id,
            trigger_type: row.trigger_type,
            trigger_data: row.trigger_data,
            execution_result: row.execution_result.0,
            execution_time_ms: row.execution_time_ms,
            executed_at: row.executed_at,
        }
    }
}

const RULE_COLUMNS: &str = "id, name, description, is_active, trigger, conditions, actions, \
    execution_count, success_count, failure_count, last_executed_at, created_at, updated_at";

#[async_trait]
impl DocumentStore for PgStore {
    async fn get_lead(&self, id: Uuid) -> ApiResult<Option<Lead>> {
        let lead = sqlx::query_as::<_, Lead>("SELECT * FROM leads WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(lead)
    }

    async fn insert_lead(&self, lead: &Lead) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO leads (id, name, email, company_name, source, status, score, notes,
                               converted_deal_id, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(lead.id)
        .bind(&lead.name)
        .bind(&lead.email)
        .bind(&lead.company_name)
        .bind(&lead.source)
        .bind(lead.status)
        .bind(lead.score)
        .bind(&lead.notes)
        .bind(lead.converted_deal_id)
        .bind(&lead.metadata)
        .bind(lead.created_at)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_lead(&self, lead: &Lead) -> ApiResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE leads
            SET status = $2, score = $3, notes = $4, converted_deal_id = $5, metadata = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(lead.id)
        .bind(lead.status)
        .bind(lead.score)
        .bind(&lead.notes)
        .bind(lead.converted_deal_id)
        .bind(&lead.metadata)
        .bind(lead.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Lead {}", lead.id)));
        }
        Ok(())
    }

    async fn find_company_by_name(&self, name: &str) -> ApiResult<Option<Company>> {
        let company = sqlx::query_as::<_, Company>(
            "SELECT * FROM companies WHERE name = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await?;
        Ok(company)
    }

    async fn insert_company(&self, company: &Company) -> ApiResult<()> {
        sqlx::query(
            "INSERT INTO companies (id, name, domain, industry, metadata, created_at) VALUES ($1, $2, $3, $4, $5, $6)",
        )
        .bind(company.id)
        .bind(&company.name)
        .bind(&company.domain)
        .bind(&company.industry)
        .bind(&company.metadata)
        .bind(company.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_company(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM companies WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_contact(&self, id: Uuid) -> ApiResult<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>("SELECT * FROM contacts WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(contact)
    }

    async fn find_contact_by_email(&self, email: &str) -> ApiResult<Option<Contact>> {
        let contact = sqlx::query_as::<_, Contact>(
            "SELECT * FROM contacts WHERE email = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(email)
        .fetch_optional(&self.pool)
        .await?;
        Ok(contact)
    }

    async fn insert_contact(&self, contact: &Contact) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO contacts (id, first_name, last_name, email, phone, company_id, tags, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(contact.id)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.email)
        .bind(&contact.phone)
        .bind(contact.company_id)
        .bind(&contact.tags)
        .bind(contact.created_at)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_contact(&self, contact: &Contact) -> ApiResult<()> {
        let result = sqlx::query(
            r#"
            UPDATE contacts
            SET first_name = $2, last_name = $3, phone = $4, company_id = $5, tags = $6, updated_at = $7
            WHERE id = $1
            "#,
        )
        .bind(contact.id)
        .bind(&contact.first_name)
        .bind(&contact.last_name)
        .bind(&contact.phone)
        .bind(contact.company_id)
        .bind(&contact.tags)
        .bind(contact.updated_at)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Contact {}", contact.id)));
        }
        Ok(())
    }

    async fn delete_contact(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM contacts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_deal(&self, id: Uuid) -> ApiResult<Option<Deal>> {
        let deal = sqlx::query_as::<_, Deal>("SELECT * FROM deals WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(deal)
    }

    async fn insert_deal(&self, deal: &Deal) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO deals (id, title, value, currency, probability, status, stage, contact_id,
                               company_id, expected_close_date, metadata, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(deal.id)
        .bind(&deal.title)
        .bind(deal.value)
        .bind(&deal.currency)
        .bind(deal.probability)
        .bind(deal.status)
        .bind(&deal.stage)
        .bind(deal.contact_id)
        .bind(deal.company_id)
        .bind(deal.expected_close_date)
        .bind(&deal.metadata)
        .bind(deal.created_at)
        .bind(deal.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete_deal(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM deals WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_quote(&self, id: Uuid) -> ApiResult<Option<Quote>> {
        let quote = sqlx::query_as::<_, Quote>("SELECT * FROM quotes WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(quote)
    }

    async fn insert_quote(&self, quote: &Quote) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO quotes (id, number, status, deal_id, currency, subtotal, tax, total,
                                valid_until, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(quote.id)
        .bind(&quote.number)
        .bind(quote.status)
        .bind(quote.deal_id)
        .bind(&quote.currency)
        .bind(quote.subtotal)
        .bind(quote.tax)
        .bind(quote.total)
        .bind(quote.valid_until)
        .bind(quote.created_at)
        .bind(quote.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_quote(&self, quote: &Quote) -> ApiResult<()> {
        let result = sqlx::query("UPDATE quotes SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(quote.id)
            .bind(quote.status)
            .bind(quote.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Quote {}", quote.id)));
        }
        Ok(())
    }

    async fn get_sales_order(&self, id: Uuid) -> ApiResult<Option<SalesOrder>> {
        let order = sqlx::query_as::<_, SalesOrder>("SELECT * FROM sales_orders WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(order)
    }

    async fn find_sales_order_by_quote(&self, quote_id: Uuid) -> ApiResult<Option<SalesOrder>> {
        let order = sqlx::query_as::<_, SalesOrder>(
            "SELECT * FROM sales_orders WHERE quote_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(quote_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(order)
    }

    async fn insert_sales_order(&self, order: &SalesOrder) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO sales_orders (id, number, status, quote_id, currency, subtotal, tax, total,
                                      created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            "#,
        )
        .bind(order.id)
        .bind(&order.number)
        .bind(order.status)
        .bind(order.quote_id)
        .bind(&order.currency)
        .bind(order.subtotal)
        .bind(order.tax)
        .bind(order.total)
        .bind(order.created_at)
        .bind(order.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_sales_order(&self, order: &SalesOrder) -> ApiResult<()> {
        let result = sqlx::query("UPDATE sales_orders SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(order.id)
            .bind(order.status)
            .bind(order.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Sales order {}", order.id)));
        }
        Ok(())
    }

    async fn delete_sales_order(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM sales_orders WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn get_invoice(&self, id: Uuid) -> ApiResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>("SELECT * FROM invoices WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(invoice)
    }

    async fn find_invoice_by_sales_order(&self, sales_order_id: Uuid) -> ApiResult<Option<Invoice>> {
        let invoice = sqlx::query_as::<_, Invoice>(
            "SELECT * FROM invoices WHERE sales_order_id = $1 ORDER BY created_at LIMIT 1",
        )
        .bind(sales_order_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(invoice)
    }

    async fn insert_invoice(&self, invoice: &Invoice) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO invoices (id, number, status, sales_order_id, currency, subtotal, tax, total,
                                  issue_date, due_date, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
            "#,
        )
        .bind(invoice.id)
        .bind(&invoice.number)
        .bind(invoice.status)
        .bind(invoice.sales_order_id)
        .bind(&invoice.currency)
        .bind(invoice.subtotal)
        .bind(invoice.tax)
        .bind(invoice.total)
        .bind(invoice.issue_date)
        .bind(invoice.due_date)
        .bind(invoice.created_at)
        .bind(invoice.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn update_invoice(&self, invoice: &Invoice) -> ApiResult<()> {
        let result = sqlx::query("UPDATE invoices SET status = $2, updated_at = $3 WHERE id = $1")
            .bind(invoice.id)
            .bind(invoice.status)
            .bind(invoice.updated_at)
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("Invoice {}", invoice.id)));
        }
        Ok(())
    }

    async fn delete_invoice(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn list_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<Vec<LineItem>> {
        let items = sqlx::query_as::<_, LineItem>(
            r#"
            SELECT id, document_id, product_id, name, quantity, unit_price, tax_rate, position
            FROM line_items
            WHERE document_type = $1 AND document_id = $2
            ORDER BY position
            "#,
        )
        .bind(kind.as_str())
        .bind(document_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(items)
    }

    async fn insert_line_items(&self, kind: DocumentKind, items: &[LineItem]) -> ApiResult<()> {
        let mut tx = self.pool.begin().await?;

        for item in items {
            sqlx::query(
                r#"
                INSERT INTO line_items (id, document_type, document_id, product_id, name, quantity,
                                        unit_price, tax_rate, position)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(item.id)
            .bind(kind.as_str())
            .bind(item.document_id)
            .bind(item.product_id)
            .bind(&item.name)
            .bind(item.quantity)
            .bind(item.unit_price)
            .bind(item.tax_rate)
            .bind(item.position)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn delete_line_items(&self, kind: DocumentKind, document_id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM line_items WHERE document_type = $1 AND document_id = $2")
            .bind(kind.as_str())
            .bind(document_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn next_sequence(&self, prefix: &str, year: i32) -> ApiResult<i64> {
        let value: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO document_sequences (prefix, year, last_value)
            VALUES ($1, $2, 1)
            ON CONFLICT (prefix, year)
            DO UPDATE SET last_value = document_sequences.last_value + 1
            RETURNING last_value
            "#,
        )
        .bind(prefix)
        .bind(year)
        .fetch_one(&self.pool)
        .await?;
        Ok(value)
    }

    async fn insert_payment(&self, payment: &Payment) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO payments (id, invoice_id, amount, currency, method, status, provider_ref, received_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
            "#,
        )
        .bind(payment.id)
        .bind(payment.invoice_id)
        .bind(payment.amount)
        .bind(&payment.currency)
        .bind(&payment.method)
        .bind(payment.status)
        .bind(&payment.provider_ref)
        .bind(payment.received_at)
        .execute(&self.pool)
        .await
        .map_err(|e| match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => AppError::Conflict(format!(
                "payment with provider reference {} already recorded",
                payment.provider_ref.as_deref().unwrap_or("?")
            )),
            _ => AppError::from(e),
        })?;
        Ok(())
    }

    async fn find_payment_by_provider_ref(&self, provider_ref: &str) -> ApiResult<Option<Payment>> {
        let payment = sqlx::query_as::<_, Payment>("SELECT * FROM payments WHERE provider_ref = $1")
            .bind(provider_ref)
            .fetch_optional(&self.pool)
            .await?;
        Ok(payment)
    }

    async fn list_payments_for_invoice(&self, invoice_id: Uuid) -> ApiResult<Vec<Payment>> {
        let payments = sqlx::query_as::<_, Payment>(
            "SELECT * FROM payments WHERE invoice_id = $1 ORDER BY received_at",
        )
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(payments)
    }

    async fn delete_payment(&self, id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM payments WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn find_account_by_code(&self, code: &str) -> ApiResult<Option<Account>> {
        let account = sqlx::query_as::<_, Account>(
            "SELECT id, code, name, account_type FROM accounts WHERE code = $1",
        )
        .bind(code)
        .fetch_optional(&self.pool)
        .await?;
        Ok(account)
    }

    async fn insert_account(&self, account: &Account) -> ApiResult<()> {
        sqlx::query("INSERT INTO accounts (id, code, name, account_type) VALUES ($1, $2, $3, $4)")
            .bind(account.id)
            .bind(&account.code)
            .bind(&account.name)
            .bind(&account.account_type)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_ledger_entries(&self, entries: &[LedgerEntry]) -> ApiResult<()> {
        // Both legs of a posting land together or not at all
        let mut tx = self.pool.begin().await?;

        for entry in entries {
            sqlx::query(
                r#"
                INSERT INTO ledger_entries (id, account_id, account_code, ref_type, ref_id, debit, credit, memo, created_at)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
                "#,
            )
            .bind(entry.id)
            .bind(entry.account_id)
            .bind(&entry.account_code)
            .bind(&entry.ref_type)
            .bind(entry.ref_id)
            .bind(entry.debit)
            .bind(entry.credit)
            .bind(&entry.memo)
            .bind(entry.created_at)
            .execute(&mut *tx)
            .await?;
        }

        tx.commit().await?;
        Ok(())
    }

    async fn list_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<Vec<LedgerEntry>> {
        let entries = sqlx::query_as::<_, LedgerEntry>(
            "SELECT * FROM ledger_entries WHERE ref_type = $1 AND ref_id = $2 ORDER BY created_at, debit DESC",
        )
        .bind(ref_type)
        .bind(ref_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(entries)
    }

    async fn delete_ledger_entries(&self, ref_type: &str, ref_id: Uuid) -> ApiResult<()> {
        sqlx::query("DELETE FROM ledger_entries WHERE ref_type = $1 AND ref_id = $2")
            .bind(ref_type)
            .bind(ref_id)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn insert_activity(&self, activity: &Activity) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO activities (id, entity_type, entity_id, action, description, metadata, created_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(activity.id)
        .bind(&activity.entity_type)
        .bind(activity.entity_id)
        .bind(&activity.action)
        .bind(&activity.description)
        .bind(&activity.metadata)
        .bind(activity.created_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_activities(&self, entity_type: &str, entity_id: Uuid, limit: i64) -> ApiResult<Vec<Activity>> {
        let activities = sqlx::query_as::<_, Activity>(
            r#"
            SELECT * FROM activities
            WHERE entity_type = $1 AND entity_id = $2
            ORDER BY created_at DESC
            LIMIT $3
            "#,
        )
        .bind(entity_type)
        .bind(entity_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(activities)
    }

    async fn get_task(&self, id: Uuid) -> ApiResult<Option<Task>> {
        let task = sqlx::query_as::<_, Task>("SELECT * FROM tasks WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(task)
    }

    async fn insert_task(&self, task: &Task) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO tasks (id, title, description, priority, status, due_at, deal_id, contact_id,
                               assignee, created_at, completed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            "#,
        )
        .bind(task.id)
        .bind(&task.title)
        .bind(&task.description)
        .bind(&task.priority)
        .bind(task.status)
        .bind(task.due_at)
        .bind(task.deal_id)
        .bind(task.contact_id)
        .bind(&task.assignee)
        .bind(task.created_at)
        .bind(task.completed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_overdue_tasks(&self, now: DateTime<Utc>) -> ApiResult<Vec<Task>> {
        let tasks = sqlx::query_as::<_, Task>(
            "SELECT * FROM tasks WHERE status = 'open' AND due_at < $1 ORDER BY due_at",
        )
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        Ok(tasks)
    }

    async fn update_record(
        &self,
        entity_type: &str,
        entity_id: Uuid,
        field: &str,
        value: &serde_json::Value,
    ) -> ApiResult<()> {
        ensure_updatable(entity_type, field)?;
        let table = match entity_type {
            "lead" => "leads",
            "contact" => "contacts",
            "deal" => "deals",
            "task" => "tasks",
            other => {
                return Err(crate::error::validation_error(
                    "entity_type",
                    &format!("unsupported entity type '{}'", other),
                ))
            }
        };

        // Table and column come from the allowlist; jsonb_populate_record casts the value
        // to the column's own type, including enums.
        let sql = format!(
            "UPDATE {table} SET {field} = (jsonb_populate_record(NULL::{table}, $2)).{field} WHERE id = $1"
        );
        let mut patch = serde_json::Map::new();
        patch.insert(field.to_string(), value.clone());

        let result = sqlx::query(&sql)
            .bind(entity_id)
            .bind(serde_json::Value::Object(patch))
            .execute(&self.pool)
            .await?;

        if result.rows_affected() == 0 {
            return Err(AppError::NotFound(format!("{} {}", entity_type, entity_id)));
        }
        Ok(())
    }

    async fn insert_rule(&self, rule: &AutomationRule) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO automation_rules (id, name, description, is_active, trigger_type, trigger,
                                          conditions, actions, execution_count, success_count,
                                          failure_count, last_executed_at, created_at, updated_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14)
            "#,
        )
        .bind(rule.id)
        .bind(&rule.name)
        .bind(&rule.description)
        .bind(rule.is_active)
        .bind(rule.trigger.as_ref().map(|t| t.trigger_type.as_str()))
        .bind(rule.trigger.as_ref().map(Json))
        .bind(Json(&rule.conditions))
        .bind(Json(&rule.actions))
        .bind(rule.execution_count)
        .bind(rule.success_count)
        .bind(rule.failure_count)
        .bind(rule.last_executed_at)
        .bind(rule.created_at)
        .bind(rule.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_rule(&self, id: Uuid) -> ApiResult<Option<AutomationRule>> {
        let sql = format!("SELECT {RULE_COLUMNS} FROM automation_rules WHERE id = $1");
        let row = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(row.map(AutomationRule::from))
    }

    async fn list_active_rules(&self, trigger_type: TriggerType) -> ApiResult<Vec<AutomationRule>> {
        let sql = format!(
            "SELECT {RULE_COLUMNS} FROM automation_rules WHERE is_active AND trigger_type = $1 ORDER BY created_at"
        );
        let rows = sqlx::query_as::<_, RuleRow>(&sql)
            .bind(trigger_type.as_str())
            .fetch_all(&self.pool)
            .await?;
        Ok(rows.into_iter().map(AutomationRule::from).collect())
    }

    async fn record_rule_run(&self, rule_id: Uuid, success: bool, at: DateTime<Utc>) -> ApiResult<()> {
        sqlx::query(
            r#"
            UPDATE automation_rules
            SET execution_count = execution_count + 1,
                success_count = success_count + CASE WHEN $2 THEN 1 ELSE 0 END,
                failure_count = failure_count + CASE WHEN $2 THEN 0 ELSE 1 END,
                last_executed_at = $3
            WHERE id = $1
            "#,
        )
        .bind(rule_id)
        .bind(success)
        .bind(at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn insert_execution_log(&self, log: &ExecutionLog) -> ApiResult<()> {
        sqlx::query(
            r#"
            INSERT INTO execution_logs (id, rule_id, trigger_type, trigger_data, execution_result,
                                        execution_time_ms, executed_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            "#,
        )
        .bind(log.id)
        .bind(log.rule_id)
        .bind(&log.trigger_type)
        .bind(&log.trigger_data)
        .bind(Json(&log.execution_result))
        .bind(log.execution_time_ms)
        .bind(log.executed_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_execution_logs(&self, rule_id: Uuid, limit: i64) -> ApiResult<Vec<ExecutionLog>> {
        let rows = sqlx::query_as::<_, ExecutionLogRow>(
            r#"
            SELECT id, rule_id, trigger_type, trigger_data, execution_result, execution_time_ms, executed_at
            FROM execution_logs
            WHERE rule_id = $1
            ORDER BY executed_at DESC
            LIMIT $2
            "#,
        )
        .bind(rule_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(ExecutionLog::from).collect())
    }
}
