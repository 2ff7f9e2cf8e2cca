// Document conversion sagas: lead -> deal, quote -> sales order,
// sales order -> invoice, payment -> ledger.

use chrono::{Datelike, Duration as ChronoDuration, NaiveDate, Utc};
use rust_decimal::Decimal;
use salesflow_shared::{
    Company, Contact, Deal, DealStatus, InvoiceStatus, Invoice, Lead, LeadStatus, Payment, PaymentStatus, QuoteStatus,
    SalesOrder, SalesOrderStatus,
};
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};
use uuid::Uuid;

use super::audit::{ActivityEntryBuilder, ActivityLogger};
use super::ledger::LedgerPoster;
use super::saga::{compensation, Compensation, KeyedLocks, SagaLog};
use crate::config::{LedgerPolicy, OrganizationConfig};
use crate::error::{validation_error, ApiResult, AppError, ValidationBuilder};
use crate::store::{bounded, required, DocumentKind, DocumentStore};

const DEFAULT_DEAL_PROBABILITY: i32 = 10;
const DEFAULT_DEAL_STAGE: &str = "qualified";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvertLeadOptions {
    pub deal_title: Option<String>,
    pub estimated_value: Option<Decimal>,
    pub stage: Option<String>,
    pub expected_close_date: Option<NaiveDate>,
    #[serde(default = "default_true")]
    pub create_contact: bool,
    #[serde(default = "default_true")]
    pub create_company: bool,
}

impl Default for ConvertLeadOptions {
    fn default() -> Self {
        Self {
            deal_title: None,
            estimated_value: None,
            stage: None,
            expected_close_date: None,
            create_contact: true,
            create_company: true,
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LeadConversion {
    pub deal_id: Uuid,
    pub contact_id: Option<Uuid>,
    pub company_id: Option<Uuid>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SalesOrderCreated {
    pub sales_order_id: Uuid,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InvoiceCreated {
    pub invoice_id: Uuid,
    pub number: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRequest {
    pub invoice_id: Uuid,
    pub amount: Decimal,
    pub currency: String,
    pub method: String,
    /// Idempotency key from the payment provider
    pub provider_ref: Option<String>,
}

impl PaymentRequest {
    fn validate(&self) -> ApiResult<()> {
        let mut errors = ValidationBuilder::new();
        if self.amount <= Decimal::ZERO {
            errors.push("amount", "Payment amount must be greater than zero");
        }
        if self.currency.trim().is_empty() {
            errors.push("currency", "Currency is required");
        }
        if self.method.trim().is_empty() {
            errors.push("method", "Payment method is required");
        }
        match errors.build() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PaymentRecorded {
    pub payment_id: Uuid,
    pub invoice_status: InvoiceStatus,
    pub ledger_posted: bool,
}

pub struct WorkflowOrchestrator {
    store: Arc<dyn DocumentStore>,
    activities: ActivityLogger,
    ledger: LedgerPoster,
    locks: KeyedLocks,
    org: OrganizationConfig,
    timeout: Duration,
}

impl WorkflowOrchestrator {
    pub fn new(store: Arc<dyn DocumentStore>, org: OrganizationConfig, store_timeout: Duration) -> Self {
        Self {
            activities: ActivityLogger::new(store.clone(), store_timeout),
            ledger: LedgerPoster::new(store.clone(), store_timeout, &org),
            locks: KeyedLocks::new(),
            store,
            org,
            timeout: store_timeout,
        }
    }

    pub fn activities(&self) -> &ActivityLogger {
        &self.activities
    }

    async fn call<T, F>(&self, operation: &str, fut: F) -> ApiResult<T>
    where
        F: Future<Output = ApiResult<T>>,
    {
        bounded(self.timeout, operation, fut).await
    }

    /// Compensation bound to the store with the same timeout as forward steps.
    fn undo<F, Fut>(&self, operation: &'static str, f: F) -> Option<Compensation>
    where
        F: FnOnce(Arc<dyn DocumentStore>) -> Fut + Send + 'static,
        Fut: Future<Output = ApiResult<()>> + Send + 'static,
    {
        let store = self.store.clone();
        let timeout = self.timeout;
        Some(compensation(move || async move { bounded(timeout, operation, f(store)).await }))
    }

    /// Lead -> (Company, Contact) -> Deal
    pub async fn convert_lead_to_deal(&self, lead_id: Uuid, options: ConvertLeadOptions) -> ApiResult<LeadConversion> {
        if options.estimated_value.is_some_and(|v| v < Decimal::ZERO) {
            return Err(validation_error("estimated_value", "Estimated value cannot be negative"));
        }

        let _lead_guard = self.locks.lock(format!("lead:{}", lead_id)).await;
        let lead = required(self.call("get_lead", self.store.get_lead(lead_id)).await?, "Lead", lead_id)?;

        match lead.status {
            LeadStatus::Lost => return Err(validation_error("status", "Lost leads cannot be converted")),
            LeadStatus::Converted => {
                if let Some(existing) = self.existing_conversion(&lead).await? {
                    info!(lead_id = %lead.id, deal_id = %existing.deal_id, "Lead already converted");
                    return Ok(existing);
                }
            }
            _ => {}
        }

        // Dedup guards are held until the saga commits or has compensated
        let company_name = lead
            .company_name
            .as_deref()
            .map(str::trim)
            .filter(|n| !n.is_empty() && options.create_company)
            .map(str::to_string);
        let contact_email = lead
            .email
            .as_deref()
            .map(str::trim)
            .filter(|e| !e.is_empty() && options.create_contact)
            .map(str::to_string);
        let _company_guard = match &company_name {
            Some(name) => Some(self.locks.lock(format!("company:{}", name)).await),
            None => None,
        };
        let _contact_guard = match &contact_email {
            Some(email) => Some(self.locks.lock(format!("contact:{}", email)).await),
            None => None,
        };

        let mut saga = SagaLog::begin("convert_lead_to_deal");

        let company_id = match company_name.as_deref() {
            Some(name) => Some(self.resolve_company(&mut saga, &lead, name).await?),
            None => None,
        };

        let contact_id = if options.create_contact {
            Some(self.resolve_contact(&mut saga, &lead, contact_email.as_deref(), company_id).await?)
        } else {
            None
        };

        let title = options
            .deal_title
            .filter(|t| !t.trim().is_empty())
            .unwrap_or_else(|| match lead.company_name.as_deref().filter(|c| !c.trim().is_empty()) {
                Some(company) => format!("{} - {}", company, lead.name),
                None => lead.name.clone(),
            });

        let now = Utc::now();
        let deal = Deal {
            id: Uuid::new_v4(),
            title,
            value: options.estimated_value.unwrap_or(Decimal::ZERO),
            currency: self.org.default_currency.clone(),
            probability: DEFAULT_DEAL_PROBABILITY,
            status: DealStatus::Open,
            stage: options.stage.unwrap_or_else(|| DEFAULT_DEAL_STAGE.to_string()),
            contact_id,
            company_id,
            expected_close_date: options.expected_close_date,
            metadata: serde_json::json!({ "source_lead_id": lead.id }),
            created_at: now,
            updated_at: None,
        };
        let deal_id = deal.id;
        saga.step(
            "create_deal",
            self.call("insert_deal", self.store.insert_deal(&deal)),
            self.undo("delete_deal", move |store| async move { store.delete_deal(deal_id).await }),
        )
        .await?;

        let original = lead.clone();
        let mut converted = lead;
        converted.status = LeadStatus::Converted;
        converted.converted_deal_id = Some(deal.id);
        if !converted.metadata.is_object() {
            converted.metadata = serde_json::json!({});
        }
        converted.metadata["converted_deal_id"] = serde_json::json!(deal.id);
        converted.metadata["converted_at"] = serde_json::json!(now);
        converted.updated_at = Some(now);
        saga.step(
            "update_lead",
            self.call("update_lead", self.store.update_lead(&converted)),
            self.undo("restore_lead", move |store| async move { store.update_lead(&original).await }),
        )
        .await?;

        saga.step(
            "log_activity",
            self.activities.log(
                ActivityEntryBuilder::new("deal", deal.id, "created")
                    .description(format!("Deal created from lead {}", converted.name))
                    .meta("lead_id", converted.id)
                    .meta("contact_id", contact_id)
                    .meta("company_id", company_id)
                    .correlation_id(saga.correlation_id()),
            ),
            None,
        )
        .await?;

        saga.finish();
        info!(lead_id = %converted.id, deal_id = %deal.id, "Lead converted to deal");

        Ok(LeadConversion {
            deal_id: deal.id,
            contact_id,
            company_id,
        })
    }

    async fn existing_conversion(&self, lead: &Lead) -> ApiResult<Option<LeadConversion>> {
        let Some(deal_id) = lead.converted_deal_id else {
            return Ok(None);
        };
        let deal = self.call("get_deal", self.store.get_deal(deal_id)).await?;
        Ok(deal.map(|deal| LeadConversion {
            deal_id: deal.id,
            contact_id: deal.contact_id,
            company_id: deal.company_id,
        }))
    }

    /// Reuse a company with the exact same name, else create one. Caller holds the name's lock.
    async fn resolve_company(&self, saga: &mut SagaLog, lead: &Lead, name: &str) -> ApiResult<Uuid> {
        let found = saga
            .read("find_company", self.call("find_company_by_name", self.store.find_company_by_name(name)))
            .await?;
        if let Some(company) = found {
            return Ok(company.id);
        }

        let company = Company {
            id: Uuid::new_v4(),
            name: name.to_string(),
            domain: lead.email_domain(),
            industry: None,
            metadata: serde_json::json!({ "source_lead_id": lead.id }),
            created_at: Utc::now(),
        };
        let company_id = company.id;
        saga.step(
            "create_company",
            self.call("insert_company", self.store.insert_company(&company)),
            self.undo("delete_company", move |store| async move { store.delete_company(company_id).await }),
        )
        .await?;

        Ok(company_id)
    }

    /// Reuse a contact with the exact same email, else create one from the lead's name.
    /// Caller holds the email's lock.
    async fn resolve_contact(
        &self,
        saga: &mut SagaLog,
        lead: &Lead,
        email: Option<&str>,
        company_id: Option<Uuid>,
    ) -> ApiResult<Uuid> {
        if let Some(email) = email {
            let found = saga
                .read("find_contact", self.call("find_contact_by_email", self.store.find_contact_by_email(email)))
                .await?;

            if let Some(existing) = found {
                if existing.company_id.is_none() && company_id.is_some() {
                    let original = existing.clone();
                    let mut updated = existing.clone();
                    updated.company_id = company_id;
                    updated.updated_at = Some(Utc::now());
                    saga.step(
                        "backfill_contact_company",
                        self.call("update_contact", self.store.update_contact(&updated)),
                        self.undo("restore_contact", move |store| async move {
                            store.update_contact(&original).await
                        }),
                    )
                    .await?;
                }
                return Ok(existing.id);
            }
        }

        let (first_name, last_name) = lead.split_name();
        let contact = Contact {
            id: Uuid::new_v4(),
            first_name,
            last_name,
            email: email.map(str::to_string),
            phone: None,
            company_id,
            tags: Vec::new(),
            created_at: Utc::now(),
            updated_at: None,
        };
        let contact_id = contact.id;
        saga.step(
            "create_contact",
            self.call("insert_contact", self.store.insert_contact(&contact)),
            self.undo("delete_contact", move |store| async move { store.delete_contact(contact_id).await }),
        )
        .await?;

        Ok(contact_id)
    }

    /// Quote -> confirmed SalesOrder with cloned line items
    pub async fn confirm_quote_to_sales_order(&self, quote_id: Uuid) -> ApiResult<SalesOrderCreated> {
        let _guard = self.locks.lock(format!("quote:{}", quote_id)).await;
        let quote = required(self.call("get_quote", self.store.get_quote(quote_id)).await?, "Quote", quote_id)?;

        if quote.status == QuoteStatus::Confirmed {
            if let Some(order) = self
                .call("find_sales_order_by_quote", self.store.find_sales_order_by_quote(quote.id))
                .await?
            {
                info!(quote_id = %quote.id, sales_order_id = %order.id, "Quote already confirmed");
                return Ok(SalesOrderCreated {
                    sales_order_id: order.id,
                    number: order.number,
                });
            }
        }
        if quote.status.is_closed() {
            return Err(validation_error(
                "status",
                &format!("Quote is {} and cannot be confirmed", quote.status.as_str()),
            ));
        }

        let items = self
            .call("list_line_items", self.store.list_line_items(DocumentKind::Quote, quote.id))
            .await?;

        let mut saga = SagaLog::begin("confirm_quote_to_sales_order");
        let number = self.next_number(&mut saga, "SO").await?;

        let now = Utc::now();
        let order = SalesOrder {
            id: Uuid::new_v4(),
            number,
            status: SalesOrderStatus::Confirmed,
            quote_id: Some(quote.id),
            currency: quote.currency.clone(),
            subtotal: quote.subtotal,
            tax: quote.tax,
            total: quote.total,
            created_at: now,
            updated_at: None,
        };
        let order_id = order.id;
        saga.step(
            "create_sales_order",
            self.call("insert_sales_order", self.store.insert_sales_order(&order)),
            self.undo("delete_sales_order", move |store| async move {
                store.delete_sales_order(order_id).await
            }),
        )
        .await?;

        let cloned: Vec<_> = items.iter().map(|item| item.clone_onto(order.id)).collect();
        if !cloned.is_empty() {
            saga.step(
                "clone_line_items",
                self.call(
                    "insert_line_items",
                    self.store.insert_line_items(DocumentKind::SalesOrder, &cloned),
                ),
                self.undo("delete_line_items", move |store| async move {
                    store.delete_line_items(DocumentKind::SalesOrder, order_id).await
                }),
            )
            .await?;
        }

        let original = quote.clone();
        let mut confirmed = quote;
        confirmed.status = QuoteStatus::Confirmed;
        confirmed.updated_at = Some(now);
        saga.step(
            "confirm_quote",
            self.call("update_quote", self.store.update_quote(&confirmed)),
            self.undo("restore_quote", move |store| async move { store.update_quote(&original).await }),
        )
        .await?;

        saga.step(
            "log_activity",
            self.activities.log(
                ActivityEntryBuilder::new("sales_order", order.id, "created")
                    .description(format!("Sales order {} created from quote {}", order.number, confirmed.number))
                    .meta("quote_id", confirmed.id)
                    .meta("total", order.total)
                    .meta("line_items", cloned.len())
                    .correlation_id(saga.correlation_id()),
            ),
            None,
        )
        .await?;

        saga.finish();
        info!(quote_id = %confirmed.id, sales_order_id = %order.id, number = %order.number, "Quote confirmed");

        Ok(SalesOrderCreated {
            sales_order_id: order.id,
            number: order.number,
        })
    }

    /// SalesOrder -> posted Invoice; the order is marked fulfilled
    pub async fn create_invoice_from_sales_order(&self, sales_order_id: Uuid) -> ApiResult<InvoiceCreated> {
        let _guard = self.locks.lock(format!("sales_order:{}", sales_order_id)).await;
        let order = required(
            self.call("get_sales_order", self.store.get_sales_order(sales_order_id)).await?,
            "Sales order",
            sales_order_id,
        )?;

        if let Some(invoice) = self
            .call("find_invoice_by_sales_order", self.store.find_invoice_by_sales_order(order.id))
            .await?
        {
            info!(sales_order_id = %order.id, invoice_id = %invoice.id, "Sales order already invoiced");
            return Ok(InvoiceCreated {
                invoice_id: invoice.id,
                number: invoice.number,
            });
        }
        if order.status == SalesOrderStatus::Cancelled {
            return Err(validation_error("status", "Cancelled sales orders cannot be invoiced"));
        }

        let items = self
            .call("list_line_items", self.store.list_line_items(DocumentKind::SalesOrder, order.id))
            .await?;

        let mut saga = SagaLog::begin("create_invoice_from_sales_order");
        let number = self.next_number(&mut saga, "INV").await?;

        let now = Utc::now();
        let issue_date = now.date_naive();
        let invoice = Invoice {
            id: Uuid::new_v4(),
            number,
            status: InvoiceStatus::Posted,
            sales_order_id: Some(order.id),
            currency: self.org.default_currency.clone(),
            subtotal: order.subtotal,
            tax: order.tax,
            total: order.total,
            issue_date,
            due_date: issue_date + ChronoDuration::days(self.org.payment_terms_days),
            created_at: now,
            updated_at: None,
        };
        let invoice_id = invoice.id;
        saga.step(
            "create_invoice",
            self.call("insert_invoice", self.store.insert_invoice(&invoice)),
            self.undo("delete_invoice", move |store| async move { store.delete_invoice(invoice_id).await }),
        )
        .await?;

        let cloned: Vec<_> = items.iter().map(|item| item.clone_onto(invoice.id)).collect();
        if !cloned.is_empty() {
            saga.step(
                "clone_line_items",
                self.call("insert_line_items", self.store.insert_line_items(DocumentKind::Invoice, &cloned)),
                self.undo("delete_line_items", move |store| async move {
                    store.delete_line_items(DocumentKind::Invoice, invoice_id).await
                }),
            )
            .await?;
        }

        let original = order.clone();
        let mut fulfilled = order;
        fulfilled.status = SalesOrderStatus::Fulfilled;
        fulfilled.updated_at = Some(now);
        saga.step(
            "fulfil_sales_order",
            self.call("update_sales_order", self.store.update_sales_order(&fulfilled)),
            self.undo("restore_sales_order", move |store| async move {
                store.update_sales_order(&original).await
            }),
        )
        .await?;

        saga.step(
            "log_activity",
            self.activities.log(
                ActivityEntryBuilder::new("invoice", invoice.id, "created")
                    .description(format!("Invoice {} created from sales order {}", invoice.number, fulfilled.number))
                    .meta("sales_order_id", fulfilled.id)
                    .meta("total", invoice.total)
                    .meta("due_date", invoice.due_date)
                    .correlation_id(saga.correlation_id()),
            ),
            None,
        )
        .await?;

        saga.finish();
        info!(sales_order_id = %fulfilled.id, invoice_id = %invoice.id, number = %invoice.number, "Invoice created");

        Ok(InvoiceCreated {
            invoice_id: invoice.id,
            number: invoice.number,
        })
    }

    /// Record a succeeded payment, settle the invoice when fully paid and post to the ledger.
    pub async fn record_payment(&self, request: PaymentRequest) -> ApiResult<PaymentRecorded> {
        request.validate()?;

        let _guard = self.locks.lock(format!("invoice:{}", request.invoice_id)).await;
        let invoice = required(
            self.call("get_invoice", self.store.get_invoice(request.invoice_id)).await?,
            "Invoice",
            request.invoice_id,
        )?;

        if let Some(reference) = request.provider_ref.as_deref() {
            if let Some(existing) = self
                .call("find_payment_by_provider_ref", self.store.find_payment_by_provider_ref(reference))
                .await?
            {
                if existing.invoice_id != invoice.id {
                    return Err(AppError::Conflict(format!(
                        "Provider reference {} already recorded for another invoice",
                        reference
                    )));
                }
                let posted = !self.ledger.entries_for_payment(existing.id).await?.is_empty();
                info!(payment_id = %existing.id, provider_ref = reference, "Payment already recorded");
                return Ok(PaymentRecorded {
                    payment_id: existing.id,
                    invoice_status: invoice.status,
                    ledger_posted: posted,
                });
            }
        }

        if invoice.status == InvoiceStatus::Cancelled {
            return Err(validation_error("invoice_id", "Cannot record a payment on a cancelled invoice"));
        }

        let mut saga = SagaLog::begin("record_payment");

        let payment = Payment {
            id: Uuid::new_v4(),
            invoice_id: invoice.id,
            amount: request.amount,
            currency: request.currency,
            method: request.method,
            status: PaymentStatus::Succeeded,
            provider_ref: request.provider_ref,
            received_at: Utc::now(),
        };
        let payment_id = payment.id;
        saga.step(
            "create_payment",
            self.call("insert_payment", self.store.insert_payment(&payment)),
            self.undo("delete_payment", move |store| async move { store.delete_payment(payment_id).await }),
        )
        .await?;

        let payments = saga
            .read(
                "total_payments",
                self.call("list_payments_for_invoice", self.store.list_payments_for_invoice(invoice.id)),
            )
            .await?;
        let total_paid: Decimal = payments
            .iter()
            .filter(|p| p.status == PaymentStatus::Succeeded)
            .map(|p| p.amount)
            .sum();

        let mut invoice_status = invoice.status;
        if total_paid >= invoice.total && invoice.status != InvoiceStatus::Paid {
            let original = invoice.clone();
            let mut paid = invoice.clone();
            paid.status = InvoiceStatus::Paid;
            paid.updated_at = Some(Utc::now());
            saga.step(
                "mark_invoice_paid",
                self.call("update_invoice", self.store.update_invoice(&paid)),
                self.undo("restore_invoice", move |store| async move { store.update_invoice(&original).await }),
            )
            .await?;
            invoice_status = InvoiceStatus::Paid;
        }

        let ledger_posted = match self.ledger.post_payment(&payment).await {
            Ok(_) => {
                let ledger = self.ledger.clone();
                saga.record(
                    "post_ledger",
                    Some(compensation(move || async move { ledger.reverse_payment(payment_id).await })),
                );
                true
            }
            Err(AppError::MissingLedgerAccounts { missing }) if self.org.ledger_policy == LedgerPolicy::Warn => {
                warn!(
                    payment_id = %payment.id,
                    missing = ?missing,
                    "Ledger accounts missing, payment not posted"
                );
                saga.step(
                    "log_ledger_skipped",
                    self.activities.log(
                        ActivityEntryBuilder::new("payment", payment.id, "ledger_skipped")
                            .description("Ledger posting skipped: chart of accounts incomplete")
                            .meta("missing_accounts", &missing)
                            .correlation_id(saga.correlation_id()),
                    ),
                    None,
                )
                .await?;
                false
            }
            Err(e) => return Err(saga.abort("post_ledger", e).await),
        };

        saga.step(
            "log_activity",
            self.activities.log(
                ActivityEntryBuilder::new("payment", payment.id, "received")
                    .description(format!("Payment of {} {} received", payment.amount, payment.currency))
                    .meta("invoice_id", invoice.id)
                    .meta("amount", payment.amount)
                    .meta("method", &payment.method)
                    .meta("total_paid", total_paid)
                    .meta("ledger_posted", ledger_posted)
                    .correlation_id(saga.correlation_id()),
            ),
            None,
        )
        .await?;

        saga.finish();
        info!(
            payment_id = %payment.id,
            invoice_id = %invoice.id,
            invoice_status = invoice_status.as_str(),
            ledger_posted,
            "Payment recorded"
        );

        Ok(PaymentRecorded {
            payment_id: payment.id,
            invoice_status,
            ledger_posted,
        })
    }

    /// `{prefix}-{year}-{seq:03}` from the per-organization sequence
    async fn next_number(&self, saga: &mut SagaLog, prefix: &str) -> ApiResult<String> {
        let year = Utc::now().year();
        let seq = saga
            .read("next_sequence", self.call("next_sequence", self.store.next_sequence(prefix, year)))
            .await?;
        Ok(format!("{}-{}-{:03}", prefix, year, seq))
    }
}
