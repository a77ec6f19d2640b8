//! Reef API Gateway
//!
//! The single HTTP entry point. Handles:
//! - Authentication (bearer JWTs) and per-client rate limiting
//! - Credit checkout, verification and payment webhooks
//! - Document parsing, Reef search and Pearl synthesis
//! - Observability (structured logs, Prometheus metrics)

mod extract;
mod handlers;
mod middleware;

use axum::{
    extract::{DefaultBodyLimit, FromRef},
    http::HeaderMap,
    middleware::{from_fn, from_fn_with_state},
    routing::{get, post},
    Router,
};
use middleware::rate_limit::{self, EndpointClass, InMemoryRateLimiter, RateLimiter};
use reef_common::{
    auth::{AuthUser, JwtManager},
    billing::{create_payment_provider, PaymentProvider, PaymentReconciler, WebhookVerifier},
    config::{AppConfig, ObservabilityConfig},
    db::DbPool,
    embeddings::create_embedder,
    errors::{AppError, Result},
    llm::create_language_model,
    metrics,
    pearl::PearlService,
    reef::ReefService,
    Embedder, LanguageModel, Repository, Store,
};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::signal;
use tower_http::{
    cors::{Any, CorsLayer},
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};
use tracing::info;
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// Multipart framing allowance on top of the document ceiling
const MULTIPART_OVERHEAD_BYTES: usize = 64 * 1024;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn Store>,
    pub jwt: Arc<JwtManager>,
    pub reef: Arc<ReefService>,
    pub pearl: Arc<PearlService>,
    pub payments: Arc<dyn PaymentProvider>,
    pub reconciler: Arc<PaymentReconciler>,
    pub webhooks: Arc<WebhookVerifier>,
    pub limiter: Arc<dyn RateLimiter>,
}

impl FromRef<AppState> for Arc<JwtManager> {
    fn from_ref(state: &AppState) -> Self {
        state.jwt.clone()
    }
}

impl AppState {
    /// Wire services from already-constructed providers
    pub fn new(
        config: Arc<AppConfig>,
        store: Arc<dyn Store>,
        embedder: Arc<dyn Embedder>,
        llm: Arc<dyn LanguageModel>,
        payments: Arc<dyn PaymentProvider>,
    ) -> Result<Self> {
        let jwt_secret = config
            .auth
            .jwt_secret
            .as_deref()
            .ok_or_else(|| AppError::Configuration {
                message: "auth.jwt_secret (or SUPABASE_JWT_SECRET) is required".to_string(),
            })?;
        let webhook_secret = config
            .payments
            .webhook_secret
            .clone()
            .ok_or_else(|| AppError::Configuration {
                message: "payments.webhook_secret (or STRIPE_WEBHOOK_SECRET) is required"
                    .to_string(),
            })?;

        let credits = &config.credits;
        let reef = Arc::new(ReefService::new(
            store.clone(),
            embedder,
            llm.clone(),
            credits.search_cost,
        ));
        let pearl = Arc::new(PearlService::new(
            store.clone(),
            llm,
            reef.clone(),
            credits.extraction_cost,
            credits.generation_cost,
        ));
        let reconciler = Arc::new(PaymentReconciler::new(
            store.clone(),
            payments.clone(),
            config.payments.processed_cache_size,
        ));

        Ok(Self {
            jwt: Arc::new(JwtManager::new(
                jwt_secret,
                &config.auth.audience,
                config.auth.jwt_expiration_secs,
            )),
            webhooks: Arc::new(WebhookVerifier::new(
                webhook_secret,
                config.payments.webhook_tolerance_secs,
            )),
            limiter: Arc::new(InMemoryRateLimiter::new()),
            config,
            store,
            reef,
            pearl,
            payments,
            reconciler,
        })
    }

    /// Count this request against the caller's window for `class`
    pub async fn rate_limit(
        &self,
        class: EndpointClass,
        user: &AuthUser,
        headers: &HeaderMap,
    ) -> Result<()> {
        let identity = rate_limit::client_identifier(Some(user), headers);
        rate_limit::enforce(
            self.limiter.as_ref(),
            &self.config.rate_limit,
            class,
            &identity,
        )
        .await
    }
}

fn init_tracing(config: &ObservabilityConfig) {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log_level.clone()));

    if config.json_logging {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().json().with_target(true))
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(fmt::layer().with_target(true))
            .init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenvy::dotenv().ok();

    let config = Arc::new(AppConfig::load()?);
    init_tracing(&config.observability);

    info!(
        service = %config.observability.service_name,
        "Starting Reef API Gateway v{}",
        reef_common::VERSION
    );

    // Initialize metrics
    metrics::register_metrics();
    if config.observability.metrics_port != 0 {
        metrics::install_exporter(config.observability.metrics_port)?;
    }

    // Initialize database connection
    info!("Connecting to database...");
    let db = DbPool::new(&config.database).await?;
    let store: Arc<dyn Store> = Arc::new(Repository::new(db));

    let state = AppState::new(
        config.clone(),
        store,
        create_embedder(&config.embedding)?,
        create_language_model(&config.llm)?,
        create_payment_provider(&config.payments)?,
    )?;

    let sweeper = rate_limit::spawn_sweeper(
        state.limiter.clone(),
        Duration::from_secs(config.rate_limit.sweep_interval_secs.max(1)),
    );

    let app = create_router(state);

    let addr: SocketAddr = format!("{}:{}", config.server.host, config.server.port).parse()?;
    info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    sweeper.abort();
    info!("Server shutdown complete");
    Ok(())
}

/// Create the main application router
pub fn create_router(state: AppState) -> Router {
    let config = state.config.clone();

    // CORS configuration
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    // Request ID propagation
    let request_id = SetRequestIdLayer::x_request_id(MakeRequestUuid);
    let propagate_id = PropagateRequestIdLayer::x_request_id();

    let api_routes = Router::new()
        // Billing
        .route("/checkout", post(handlers::checkout::create_checkout))
        .route("/checkout/verify", post(handlers::checkout::verify_checkout))
        .route("/webhooks/payment", post(handlers::webhooks::payment_webhook))
        // Documents
        .route(
            "/parse-document",
            post(handlers::documents::parse_document).layer(DefaultBodyLimit::max(
                reef_ingestion::MAX_DOCUMENT_BYTES + MULTIPART_OVERHEAD_BYTES,
            )),
        )
        // Reef search
        .route("/papers/new", post(handlers::papers::create_search))
        .route("/search/{id}", post(handlers::search::get_search_results))
        .route("/searches", get(handlers::search::list_searches))
        // Account
        .route("/profile", get(handlers::profile::get_profile))
        .layer(TimeoutLayer::new(config.request_timeout()));

    // Pearl chains make many upstream calls and get a longer ceiling
    let pearl_routes = Router::new()
        .route("/pearl/extract-claims", post(handlers::pearl::extract_claims))
        .route("/pearl/gen-angles", post(handlers::pearl::gen_angles))
        .route("/pearl/synthesize", post(handlers::pearl::synthesize))
        .layer(TimeoutLayer::new(config.pipeline_timeout()));

    let mut app = Router::new()
        .route("/health", get(handlers::health::health))
        .route("/ready", get(handlers::health::ready))
        .nest("/api", api_routes.merge(pearl_routes))
        .layer(DefaultBodyLimit::max(config.server.max_body_bytes))
        .layer(from_fn(middleware::track_metrics));

    if config.rate_limit.enabled {
        let global = rate_limit::create_global_limiter(
            config.rate_limit.requests_per_second,
            config.rate_limit.burst,
        );
        app = app.layer(from_fn_with_state(global, rate_limit::global_rate_limit));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(request_id)
        .layer(propagate_id)
        .with_state(state)
}

/// Graceful shutdown signal handler
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received Ctrl+C, starting shutdown..."),
        _ = terminate => info!("Received SIGTERM, starting shutdown..."),
    }
}
