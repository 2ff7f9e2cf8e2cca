use axum::http::Method;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

mod config;
mod database;
mod error;
mod handlers;
mod jobs;
mod pagination;
mod services;
mod store;
mod workflows;

pub use error::{ApiError, ApiResult, AppError};

#[cfg(test)]
mod tests;

use config::Config;
use services::{NotificationSink, WorkflowOrchestrator};
use store::DocumentStore;
use workflows::RuleEngine;

pub struct AppState {
    pub store: Arc<dyn DocumentStore>,
    pub orchestrator: Arc<WorkflowOrchestrator>,
    pub engine: Arc<RuleEngine>,
    /// None when running against the in-memory store
    pub db_pool: Option<sqlx::PgPool>,
    /// Registers scheduled rules created at runtime; None when no scheduler runs
    pub scheduler: Option<Arc<jobs::JobScheduler>>,
}

impl AppState {
    pub fn new(
        store: Arc<dyn DocumentStore>,
        sink: Arc<dyn NotificationSink>,
        config: &Config,
        db_pool: Option<sqlx::PgPool>,
    ) -> Self {
        Self {
            orchestrator: Arc::new(WorkflowOrchestrator::new(
                store.clone(),
                config.organization.clone(),
                config.engine.store_timeout,
            )),
            engine: Arc::new(RuleEngine::new(store.clone(), sink, config.engine.clone())),
            store,
            db_pool,
            scheduler: None,
        }
    }

    pub fn with_scheduler(mut self, scheduler: Arc<jobs::JobScheduler>) -> Self {
        self.scheduler = Some(scheduler);
        self
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenv::dotenv().ok();

    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("salesflow_backend=info,tower_http=info")),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;
    let db_pool = database::create_pool(&config.database_url).await?;

    database::migrate(&db_pool).await?;

    let store: Arc<dyn DocumentStore> = Arc::new(store::PgStore::new(db_pool.clone()));
    let sink: Arc<dyn NotificationSink> = Arc::new(services::DefaultSink::new(
        &config.smtp,
        config.integrations.clone(),
        config.engine.action_timeout,
    )?);
    let app_state = AppState::new(store.clone(), sink, &config, Some(db_pool));

    let scheduler = Arc::new(
        jobs::JobScheduler::new(
            app_state.engine.clone(),
            store,
            config.engine.store_timeout,
            config.scheduler.clone(),
        )
        .await?,
    );
    scheduler.start().await?;
    let app_state = Arc::new(app_state.with_scheduler(scheduler.clone()));

    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::DELETE])
        .allow_headers(Any);

    let app = handlers::router(app_state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors),
    );

    let listener = tokio::net::TcpListener::bind(&config.server_addr).await?;
    tracing::info!("Server running on {}", config.server_addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.shutdown().await?;
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
    }
    tracing::info!("Shutdown signal received");
}
