pub mod helpers;
pub mod unit;

// Common test utilities and shared test setup
use axum::Router;
use std::sync::{Arc, Once};
use tracing_subscriber::EnvFilter;

use crate::config::{Config, LedgerPolicy};
use crate::jobs::JobScheduler;
use crate::services::notifications::MockNotificationSink;
use crate::store::InMemoryStore;
use crate::AppState;

static INIT_LOGGING: Once = Once::new();

/// Route tracing output through the test harness once per process.
pub fn init_test_logging() {
    INIT_LOGGING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::new("salesflow_backend=debug"))
            .with_test_writer()
            .try_init();
    });
}

pub fn test_config() -> Config {
    Config::from_lookup(|_| None)
}

pub struct TestContext {
    pub store: Arc<InMemoryStore>,
    pub state: Arc<AppState>,
}

impl TestContext {
    /// In-memory store with the default chart of accounts and a sink that accepts everything.
    pub fn new() -> Self {
        Self::build(InMemoryStore::with_chart_of_accounts(), helpers::permissive_sink(), test_config())
    }

    pub fn without_accounts(policy: LedgerPolicy) -> Self {
        let mut config = test_config();
        config.organization.ledger_policy = policy;
        Self::build(InMemoryStore::new(), helpers::permissive_sink(), config)
    }

    pub fn with_sink(sink: MockNotificationSink) -> Self {
        Self::build(InMemoryStore::with_chart_of_accounts(), sink, test_config())
    }

    /// Context whose state carries a job scheduler that is built but not started.
    pub async fn with_scheduler() -> (Self, Arc<JobScheduler>) {
        init_test_logging();
        let config = test_config();
        let store = Arc::new(InMemoryStore::with_chart_of_accounts());
        let state = AppState::new(store.clone(), Arc::new(helpers::permissive_sink()), &config, None);
        let scheduler = Arc::new(
            JobScheduler::new(
                state.engine.clone(),
                store.clone(),
                config.engine.store_timeout,
                config.scheduler.clone(),
            )
            .await
            .expect("scheduler"),
        );
        let state = Arc::new(state.with_scheduler(scheduler.clone()));
        (Self { store, state }, scheduler)
    }

    fn build(store: InMemoryStore, sink: MockNotificationSink, config: Config) -> Self {
        init_test_logging();
        let store = Arc::new(store);
        let state = Arc::new(AppState::new(store.clone(), Arc::new(sink), &config, None));
        Self { store, state }
    }

    pub fn router(&self) -> Router {
        crate::handlers::router(self.state.clone())
    }
}
