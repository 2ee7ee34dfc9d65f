use axum::{routing::get, Router};
use iceberg_audit::{
    backend::HttpCompletionBackend,
    catalog::{CachedCatalog, PgCatalog},
    config::Config,
    db::Database,
    handlers::{self, AppState},
    session::Auditor,
};
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceBuilder;
use tower_governor::{
    governor::GovernorConfigBuilder, key_extractor::SmartIpKeyExtractor, GovernorLayer,
};
use tower_http::{cors::CorsLayer, limit::RequestBodyLimitLayer, trace::TraceLayer};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the audit server.
///
/// Initializes logging, configuration, the catalog connection (behind a TTL
/// cache), the completion backend, and the HTTP routes, then serves.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "iceberg_audit=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::from_env()?;

    let db = Database::new(&config.database_url).await?;
    tracing::info!("Catalog connection pool established");

    // Database list cached 5 minutes, table metadata 1 minute
    let catalog = CachedCatalog::new(PgCatalog::new(db));

    let backend = HttpCompletionBackend::new(
        &config.llm_base_url,
        config.llm_api_key.clone(),
        config.llm_timeout(),
    )?;
    tracing::info!(
        "✓ Completion backend initialized: {} (model {})",
        config.llm_base_url,
        config.llm_model
    );

    let auditor = Auditor::new(
        Arc::new(catalog),
        Arc::new(backend),
        config.analysis_settings(),
    );
    let app_state = Arc::new(AppState::new(config.clone(), auditor));

    // Configure rate limiter: 10 requests/second per IP, burst of 20
    let governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(10)
            .burst_size(20)
            .key_extractor(SmartIpKeyExtractor)
            .finish()
            .ok_or_else(|| anyhow::anyhow!("Invalid rate limiter configuration"))?,
    );

    let protected_routes = handlers::api_routes()
        .layer(
            ServiceBuilder::new()
                // Request size limit: 5MB max payload
                .layer(RequestBodyLimitLayer::new(5 * 1024 * 1024))
                .layer(GovernorLayer {
                    config: governor_conf,
                }),
        );

    // Health check bypasses rate limiting
    let app = Router::new()
        .route("/health", get(handlers::health))
        .merge(protected_routes)
        .with_state(app_state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
