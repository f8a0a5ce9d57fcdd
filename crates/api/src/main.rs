//! Authorization core API server.
//!
//! Wires the authorization engine to its runtime: configuration, database
//! and Redis pools, metrics, circuit breakers, the maintenance scheduler,
//! and the axum router. Identity verification happens at the upstream
//! gateway; this server trusts the principal headers it forwards.

use authz_core::{
    config::CorsConfig, AuditLogger, BreakerRegistry, Config, DatabaseAuditRepository,
    DatabasePool, ErrorMetrics, MetricsExporter, MetricsRegistry, RedisCacheAdapter,
};
use authz_engine::{
    authz_routes, AuthzRepository, AuthzState, BulkOperationService, CheckEngine,
    DelegationService, GrantService, HistoryService, InvalidationFabric, MaintenanceScheduler,
    MonitoringService, PermissionCacheService, PermissionMatrixService, PermissionService,
    PolicyEvaluatorRegistry, PolicyService, RoleService, TemplateService,
    TracingNotificationSink,
};
use axum::{
    http::{HeaderName, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    Json, Router,
};
use std::{net::SocketAddr, sync::Arc};
use tower::ServiceBuilder;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::{DefaultMakeSpan, DefaultOnRequest, DefaultOnResponse, TraceLayer},
};
use tracing::{info, Level};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

mod health;
mod state;

use crate::state::AppState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    info!("Starting authorization core server...");

    let config = Config::load()?;
    info!("Configuration loaded successfully");

    let db = DatabasePool::new(&config.database).await?;
    info!("Database pool initialized");

    let redis = RedisCacheAdapter::connect(&config.redis.url).await?;
    info!("Redis connection established");

    // Metrics
    let registry = MetricsRegistry::new(config.metrics.clone());
    let check_metrics = registry.install_check_metrics()?;
    let metrics_exporter = Arc::new(MetricsExporter::new(registry, check_metrics.clone()));
    let error_metrics = Arc::new(ErrorMetrics::new());

    // Circuit breakers
    let breakers = Arc::new(BreakerRegistry::new(&config.breakers));

    // Repositories and services
    let repository = AuthzRepository::new(db.clone());

    let cache = PermissionCacheService::new(
        redis.clone(),
        check_metrics.clone(),
        config.cache.clone(),
        config.warmup.clone(),
    );

    let matrix = PermissionMatrixService::new(repository.clone(), config.matrix.clone());

    let fabric = InvalidationFabric::new(
        repository.clone(),
        cache.clone(),
        matrix.clone(),
        breakers.cache(),
        check_metrics.clone(),
    );

    let evaluators = Arc::new(PolicyEvaluatorRegistry::with_builtin());

    let engine = Arc::new(CheckEngine::new(
        repository.clone(),
        cache.clone(),
        matrix.clone(),
        Arc::clone(&evaluators),
        Arc::clone(&breakers),
        check_metrics.clone(),
        config.check.clone(),
        config.warmup.clone(),
    ));

    let audit = AuditLogger::new(
        Arc::new(DatabaseAuditRepository::new(db.clone())),
        Arc::clone(&error_metrics),
    );

    let authz = AuthzState {
        engine: Arc::clone(&engine),
        permissions: PermissionService::new(repository.clone(), fabric.clone(), audit.clone()),
        roles: RoleService::new(repository.clone(), fabric.clone(), audit.clone()),
        grants: GrantService::new(repository.clone(), fabric.clone(), audit.clone()),
        delegations: DelegationService::new(repository.clone(), fabric.clone(), audit.clone()),
        policies: PolicyService::new(
            repository.clone(),
            Arc::clone(&evaluators),
            fabric.clone(),
            audit.clone(),
        ),
        bulk: BulkOperationService::new(
            repository.clone(),
            fabric.clone(),
            audit.clone(),
            config.check.transaction_timeout_secs,
        ),
        history: HistoryService::new(
            repository.clone(),
            fabric.clone(),
            audit.clone(),
            config.check.transaction_timeout_secs,
        ),
        templates: TemplateService::new(repository.clone(), fabric.clone(), audit.clone()),
        monitoring: MonitoringService::new(
            Arc::clone(&breakers),
            check_metrics.clone(),
            Arc::clone(&error_metrics),
        ),
    };
    info!("Authorization services initialized");

    // Scheduled maintenance
    let mut scheduler = MaintenanceScheduler::new(
        repository.clone(),
        matrix.clone(),
        fabric.clone(),
        Arc::new(TracingNotificationSink),
    );
    scheduler.start();

    let app_state = AppState {
        config: config.clone(),
        db,
        redis,
        metrics: metrics_exporter,
    };

    let app = create_app(app_state, authz)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    info!("Server listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    scheduler.stop();
    info!("Server shutdown complete");
    Ok(())
}

fn create_app(state: AppState, authz: AuthzState) -> Result<Router, Box<dyn std::error::Error>> {
    let cors = build_cors_layer(&state.config.cors)?;

    // Operational endpoints run against the app state
    let operational = Router::new()
        .route("/health", axum::routing::get(health::health_check))
        .route("/ready", axum::routing::get(health::readiness_check))
        .route(
            "/permissions/monitoring/metrics",
            axum::routing::get(health::metrics),
        )
        .route("/metrics", axum::routing::get(health::metrics))
        .with_state(state);

    let router = Router::new()
        // Authorization API
        .nest("/api/v1", authz_routes(authz))
        .merge(operational)
        // Global middleware
        .layer(
            ServiceBuilder::new()
                .layer(
                    TraceLayer::new_for_http()
                        .make_span_with(DefaultMakeSpan::new().level(Level::INFO))
                        .on_request(DefaultOnRequest::new().level(Level::INFO))
                        .on_response(DefaultOnResponse::new().level(Level::INFO)),
                )
                .layer(cors),
        )
        .fallback(handler_404);

    Ok(router)
}

/// Builds a CORS layer from configuration settings.
fn build_cors_layer(cors_config: &CorsConfig) -> Result<CorsLayer, Box<dyn std::error::Error>> {
    let mut cors = CorsLayer::new();

    if cors_config.allowed_origins.contains(&"*".to_string()) {
        cors = cors.allow_origin(Any);
    } else {
        let origins: Result<Vec<HeaderValue>, _> = cors_config
            .allowed_origins
            .iter()
            .map(|origin| origin.parse())
            .collect();
        cors = cors.allow_origin(origins?);
    }

    if cors_config.allowed_methods.contains(&"*".to_string()) {
        cors = cors.allow_methods(Any);
    } else {
        let methods: Result<Vec<Method>, _> = cors_config
            .allowed_methods
            .iter()
            .map(|method| method.parse())
            .collect();
        cors = cors.allow_methods(methods?);
    }

    if cors_config.allowed_headers.contains(&"*".to_string()) {
        cors = cors.allow_headers(Any);
    } else {
        let headers: Result<Vec<HeaderName>, _> = cors_config
            .allowed_headers
            .iter()
            .map(|header| header.parse())
            .collect();
        cors = cors.allow_headers(headers?);
    }

    cors = cors.allow_credentials(cors_config.allow_credentials);

    Ok(cors)
}

async fn handler_404() -> impl IntoResponse {
    (
        StatusCode::NOT_FOUND,
        Json(serde_json::json!({
            "error": "Resource not found"
        })),
    )
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "authz_api=debug,authz_engine=debug,authz_core=debug,tower_http=info".into()
            }),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    info!("Shutdown signal received");
}
