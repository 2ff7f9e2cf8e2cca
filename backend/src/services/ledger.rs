use chrono::Utc;
use rust_decimal::Decimal;
use salesflow_shared::{Account, LedgerEntry, Payment, PaymentStatus};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;
use uuid::Uuid;

use crate::config::OrganizationConfig;
use crate::error::{validation_error, ApiResult, AppError};
use crate::store::{bounded, DocumentStore};

pub const PAYMENT_REF_TYPE: &str = "payment";

/// Double-entry postings for received payments: debit bank, credit receivables.
#[derive(Clone)]
pub struct LedgerPoster {
    store: Arc<dyn DocumentStore>,
    timeout: Duration,
    bank_code: String,
    receivable_code: String,
}

impl LedgerPoster {
    pub fn new(store: Arc<dyn DocumentStore>, timeout: Duration, org: &OrganizationConfig) -> Self {
        Self {
            store,
            timeout,
            bank_code: org.bank_account_code.clone(),
            receivable_code: org.receivable_account_code.clone(),
        }
    }

    /// Post a succeeded payment. Fails with `MissingLedgerAccounts` when either
    /// account is absent from the chart; nothing is written in that case.
    pub async fn post_payment(&self, payment: &Payment) -> ApiResult<Vec<LedgerEntry>> {
        if payment.status != PaymentStatus::Succeeded {
            return Err(validation_error("status", "Only succeeded payments are posted"));
        }

        let bank = self.account(&self.bank_code).await?;
        let receivable = self.account(&self.receivable_code).await?;

        let (bank, receivable) = match (bank, receivable) {
            (Some(bank), Some(receivable)) => (bank, receivable),
            (bank, receivable) => {
                let mut missing = Vec::new();
                if bank.is_none() {
                    missing.push(self.bank_code.clone());
                }
                if receivable.is_none() {
                    missing.push(self.receivable_code.clone());
                }
                return Err(AppError::MissingLedgerAccounts { missing });
            }
        };

        let entries = balanced_pair(payment, &bank, &receivable)?;
        bounded(self.timeout, "insert_ledger_entries", self.store.insert_ledger_entries(&entries)).await?;

        info!(
            payment_id = %payment.id,
            amount = %payment.amount,
            debit_account = %bank.code,
            credit_account = %receivable.code,
            "Payment posted to ledger"
        );
        Ok(entries)
    }

    /// Remove the postings of one payment.
    pub async fn reverse_payment(&self, payment_id: Uuid) -> ApiResult<()> {
        bounded(
            self.timeout,
            "delete_ledger_entries",
            self.store.delete_ledger_entries(PAYMENT_REF_TYPE, payment_id),
        )
        .await
    }

    pub async fn entries_for_payment(&self, payment_id: Uuid) -> ApiResult<Vec<LedgerEntry>> {
        bounded(
            self.timeout,
            "list_ledger_entries",
            self.store.list_ledger_entries(PAYMENT_REF_TYPE, payment_id),
        )
        .await
    }

    async fn account(&self, code: &str) -> ApiResult<Option<Account>> {
        bounded(self.timeout, "find_account_by_code", self.store.find_account_by_code(code)).await
    }
}

/// Bank debit and receivables credit for the full payment amount.
pub fn balanced_pair(payment: &Payment, bank: &Account, receivable: &Account) -> ApiResult<Vec<LedgerEntry>> {
    let created_at = Utc::now();
    let memo = match &payment.provider_ref {
        Some(reference) => format!("Payment via {} ({})", payment.method, reference),
        None => format!("Payment via {}", payment.method),
    };

    let entry = |account: &Account, debit: Decimal, credit: Decimal| LedgerEntry {
        id: Uuid::new_v4(),
        account_id: account.id,
        account_code: account.code.clone(),
        ref_type: PAYMENT_REF_TYPE.to_string(),
        ref_id: payment.id,
        debit,
        credit,
        memo: Some(memo.clone()),
        created_at,
    };

    let entries = vec![
        entry(bank, payment.amount, Decimal::ZERO),
        entry(receivable, Decimal::ZERO, payment.amount),
    ];

    let debits: Decimal = entries.iter().map(|e| e.debit).sum();
    let credits: Decimal = entries.iter().map(|e| e.credit).sum();
    if debits != credits || debits != payment.amount {
        return Err(AppError::InternalError(format!(
            "unbalanced posting for payment {}: debit {} credit {}",
            payment.id, debits, credits
        )));
    }

    Ok(entries)
}
