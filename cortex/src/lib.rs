//! # cortex: request orchestration across LLM providers
//!
//! `cortex` accepts a prompt over HTTP, decides which provider and model should answer it, calls
//! that provider, and records an auditable trail of what happened: the request, every response,
//! and for routed calls each attempt made along the way.
//!
//! ## Request Flow
//!
//! A request arrives at one of the `/v1` endpoints and passes through the same pipeline:
//!
//! 1. **Credentials** ([`auth`]): an optional Bearer API key is reduced to its derived id; an
//!    optional user header names the user the caller acts as.
//! 2. **Normalization** ([`normalizer`]): the raw body becomes a canonical request. Limits are
//!    applied and every rule violation is a 400 before anything is dispatched.
//! 3. **Ownership** ([`audit::OwnershipGuardrail`]): the owner of every row the request will write
//!    is resolved up front. Mismatches are rejected before any provider is called.
//! 4. **Dispatch**: smart requests go through the [`routing`] engine, which picks a starting tier
//!    and escalates sequentially on failure. Explicit requests call one target. Compare requests
//!    fan out to 2-4 targets concurrently under one timeout ([`compare`]).
//! 5. **Audit** ([`audit`]): the request, its responses and the routing decision are written as one
//!    unit. A result is never returned without its audit trail.
//!
//! Provider failures do not fail the HTTP call: they are normalized into the response's `error`
//! field, so a client always gets the same response shape.
//!
//! ## Providers
//!
//! Every upstream speaks through the [`providers::ProviderAdapter`] trait. The shipped adapter
//! targets any OpenAI-compatible chat completions endpoint; [`compat`] retries once with
//! `max_completion_tokens` when a model rejects `max_tokens`.
//!
//! ## Storage
//!
//! The audit store is in-memory by default. Configuring `database.type: postgres` (or setting
//! `DATABASE_URL`) switches to PostgreSQL and runs the bundled migrations on startup.
//!
//! ## Quick Start
//!
//! ```no_run
//! use clap::Parser;
//! use cortex::{Application, Config};
//!
//! #[tokio::main]
//! async fn main() -> anyhow::Result<()> {
//!     let args = cortex::config::Args::parse();
//!     let config = Config::load(&args)?;
//!
//!     cortex::telemetry::init_telemetry(config.enable_otel_export)?;
//!
//!     let app = Application::new(config).await?;
//!     app.serve(async {
//!         let _ = tokio::signal::ctrl_c().await;
//!     })
//!     .await
//! }
//! ```
pub mod api;
pub mod audit;
pub mod auth;
pub mod compare;
pub mod compat;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod limits;
pub mod models;
pub mod normalizer;
mod openapi;
pub mod optimizer;
pub mod orchestrator;
pub mod pricing;
pub mod providers;
pub mod routing;
pub mod telemetry;
pub mod types;

#[cfg(test)]
pub mod test_utils;

use std::sync::Arc;

use anyhow::Context;
use axum::http::HeaderValue;
use axum::{
    Json, Router, http,
    routing::{get, post},
};
use axum_prometheus::PrometheusMetricLayer;
use bon::Builder;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use tokio::net::TcpListener;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{Level, debug, info, instrument};
use utoipa::OpenApi;
use utoipa_scalar::{Scalar, Servable};

use crate::api::handlers::{chat, compare as compare_handlers, health, providers as provider_handlers, requests};
use crate::audit::{AuditStore, InMemoryAuditStore, OwnershipGuardrail, PersistenceRecorder, PostgresAuditStore};
use crate::config::DatabaseConfig;
use crate::limits::BudgetLimiter;
use crate::normalizer::Normalizer;
use crate::openapi::ApiDoc;
use crate::optimizer::{PassthroughOptimizer, PromptOptimizer};
use crate::orchestrator::Orchestrator;
use crate::pricing::PriceTable;
use crate::providers::ProviderRegistry;
use crate::routing::{ComplexityTierSelector, RoutingEngine};

pub use config::Config;
pub use types::{ApiKeyId, GroupId, RequestId, UserId};

/// Application state shared across all request handlers.
///
/// # Example
///
/// ```ignore
/// let state = AppState::builder()
///     .config(config)
///     .orchestrator(Arc::new(orchestrator))
///     .store(store)
///     .build();
/// ```
#[derive(Clone, Builder)]
pub struct AppState {
    pub config: Config,
    pub orchestrator: Arc<Orchestrator>,
    /// Read side of the audit trail; writes go through the orchestrator
    pub store: Arc<dyn AuditStore>,
}

/// Get the cortex database migrator
pub fn migrator() -> sqlx::migrate::Migrator {
    sqlx::migrate!("./migrations")
}

/// Open the configured audit store. For PostgreSQL this connects and runs migrations.
#[instrument(skip_all)]
async fn setup_store(config: &Config) -> anyhow::Result<(Arc<dyn AuditStore>, Option<PgPool>)> {
    match &config.database {
        DatabaseConfig::Memory => {
            info!("Using in-memory audit store; records will be lost on shutdown");
            Ok((Arc::new(InMemoryAuditStore::new()), None))
        }
        DatabaseConfig::Postgres { url, pool } => {
            info!("Using PostgreSQL audit store");
            let pg = PgPoolOptions::new()
                .max_connections(pool.max_connections)
                .min_connections(pool.min_connections)
                .acquire_timeout(pool.acquire_timeout)
                .connect(url)
                .await
                .context("Failed to connect to the audit database")?;
            migrator().run(&pg).await.context("Failed to run audit migrations")?;
            Ok((Arc::new(PostgresAuditStore::new(pg.clone())), Some(pg)))
        }
    }
}

/// Wire the request pipeline from configuration, a provider registry and an audit store.
pub fn build_orchestrator(config: &Config, registry: ProviderRegistry, store: Arc<dyn AuditStore>) -> Orchestrator {
    let registry = Arc::new(registry);
    let pricing = Arc::new(PriceTable::from_providers(&config.providers));

    let engine = RoutingEngine::builder()
        .registry(registry.clone())
        .tiers(config.routing.tiers.clone())
        .selector(Arc::new(ComplexityTierSelector::new(pricing.clone())))
        .budget(Arc::new(BudgetLimiter::new(config.budget.clone())))
        .pricing(pricing.clone())
        .max_tokens_cap(config.limits.max_tokens_cap)
        .build();

    let optimizer = config
        .prompt_optimizer
        .enabled
        .then(|| Arc::new(PassthroughOptimizer) as Arc<dyn PromptOptimizer>);

    Orchestrator::builder()
        .registry(registry)
        .pricing(pricing)
        .normalizer(Normalizer::new(config.limits.clone(), config.compare.clone()))
        .maybe_optimizer(optimizer)
        .guardrail(OwnershipGuardrail::new(store.clone(), config.ownership.clone()))
        .recorder(PersistenceRecorder::new(store))
        .engine(engine)
        .build()
}

/// Create CORS layer from configuration
fn create_cors_layer(config: &Config) -> anyhow::Result<CorsLayer> {
    let origins = &config.cors.allowed_origins;
    let allow_origin = if origins.iter().any(|o| o == "*") {
        AllowOrigin::any()
    } else {
        let values = origins
            .iter()
            .map(|origin| origin.parse::<HeaderValue>())
            .collect::<Result<Vec<_>, _>>()
            .context("Invalid CORS origin")?;
        AllowOrigin::list(values)
    };

    let mut cors = CorsLayer::new()
        .allow_origin(allow_origin)
        .allow_methods([http::Method::GET, http::Method::POST])
        .allow_headers([
            http::header::AUTHORIZATION,
            http::header::CONTENT_TYPE,
            http::HeaderName::try_from(config.ownership.user_header.as_str()).context("Invalid ownership.user_header")?,
        ]);

    if let Some(max_age) = config.cors.max_age {
        cors = cors.max_age(std::time::Duration::from_secs(max_age));
    }

    Ok(cors)
}

/// Build the application router.
///
/// - `/v1/*` API routes
/// - `/health` liveness
/// - `/docs` and `/openapi.json` API documentation
/// - `/internal/metrics` Prometheus exposition, when `enable_metrics` is set
///
/// Metrics use a process-global recorder, so they can only be enabled for one router per process.
#[instrument(skip_all)]
pub fn build_router(state: &AppState) -> anyhow::Result<Router> {
    let api_routes = Router::new()
        .route("/chat", post(chat::chat))
        .route("/chat/stream", post(chat::chat_stream))
        .route("/compare", post(compare_handlers::compare))
        .route("/compare/stream", post(compare_handlers::compare_stream))
        .route("/requests/{request_id}", get(requests::get_request))
        .route("/groups/{group_id}", get(requests::get_group))
        .route("/providers", get(provider_handlers::list_providers));

    let mut router = Router::new()
        .route("/health", get(health::health))
        .nest("/v1", api_routes)
        .with_state(state.clone())
        .route("/openapi.json", get(|| async { Json(ApiDoc::openapi()) }))
        .merge(Scalar::with_url("/docs", ApiDoc::openapi()))
        .layer(create_cors_layer(&state.config)?);

    if state.config.enable_metrics {
        let (prometheus_layer, metric_handle) = PrometheusMetricLayer::pair();
        router = router
            .route("/internal/metrics", get(|| async move { metric_handle.render() }))
            .layer(prometheus_layer);
    }

    let router = router.layer(
        TraceLayer::new_for_http()
            .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
            .on_request(DefaultOnRequest::new().level(Level::INFO))
            .on_response(DefaultOnResponse::new().level(Level::INFO)),
    );

    Ok(router)
}

pub struct Application {
    router: Router,
    config: Config,
    pool: Option<PgPool>,
}

impl Application {
    /// Create a new application instance with all resources initialized
    pub async fn new(config: Config) -> anyhow::Result<Self> {
        debug!("Starting cortex with configuration: {:#?}", config);

        let registry = ProviderRegistry::from_config(&config.providers)?;
        info!(providers = registry.ids().count(), tiers = config.routing.tiers.len(), "Providers registered");

        let (store, pool) = setup_store(&config).await?;
        Self::from_parts(config, registry, store, pool)
    }

    fn from_parts(config: Config, registry: ProviderRegistry, store: Arc<dyn AuditStore>, pool: Option<PgPool>) -> anyhow::Result<Self> {
        let orchestrator = build_orchestrator(&config, registry, store.clone());
        let app_state = AppState::builder()
            .config(config.clone())
            .orchestrator(Arc::new(orchestrator))
            .store(store)
            .build();
        let router = build_router(&app_state)?;

        Ok(Self { router, config, pool })
    }

    /// Build an application around an existing registry and store (for tests)
    #[cfg(test)]
    pub fn with_components(config: Config, registry: ProviderRegistry, store: Arc<dyn AuditStore>) -> anyhow::Result<Self> {
        Self::from_parts(config, registry, store, None)
    }

    /// Convert application into a test server (for tests)
    #[cfg(test)]
    pub fn into_test_server(self) -> axum_test::TestServer {
        axum_test::TestServer::new(self.router.into_make_service()).expect("Failed to create test server")
    }

    /// Start serving the application
    pub async fn serve<F>(self, shutdown: F) -> anyhow::Result<()>
    where
        F: std::future::Future<Output = ()> + Send + 'static,
    {
        let bind_addr = self.config.bind_address();
        let listener = TcpListener::bind(&bind_addr).await?;
        info!("cortex listening on http://{}, available at http://localhost:{}", bind_addr, self.config.port);

        // Run the server with graceful shutdown
        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(shutdown)
            .await?;

        if let Some(pool) = self.pool {
            info!("Closing database connections...");
            pool.close().await;
        }

        info!("Shutting down telemetry...");
        telemetry::shutdown_telemetry();

        Ok(())
    }
}

#[cfg(test)]
mod test;
