pub mod audit;
pub mod email;
pub mod ledger;
pub mod notifications;
pub mod orchestrator;
pub mod saga;

pub use audit::{ActivityEntryBuilder, ActivityLogger, ExecutionLogger};
pub use ledger::LedgerPoster;
pub use notifications::{DefaultSink, NotificationSink};
pub use orchestrator::{
    ConvertLeadOptions, InvoiceCreated, LeadConversion, PaymentRecorded, PaymentRequest, SalesOrderCreated,
    WorkflowOrchestrator,
};
