use std::sync::Arc;

use anyhow::Context;
use insurance_sales_service::{AppState, ProductCatalogAnswerer, ServiceConfig, build_router, flows};
use quote_flow::{
    FlowEngine, InMemoryCache, InMemoryQuoteRepository, PostgresQuoteRepository, PricingConfig,
    QuoteRepository, StoreConfig,
};
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Initialize structured JSON tracing based on environment variables
fn init_tracing() {
    let log_format = std::env::var("LOG_FORMAT").unwrap_or_else(|_| "json".to_string());
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        "insurance_sales_service=debug,quote_flow=debug,tower_http=debug".into()
    });

    match log_format.as_str() {
        "pretty" => {
            // Human-readable logging for development
            tracing_subscriber::registry()
                .with(env_filter)
                .with(tracing_subscriber::fmt::layer().pretty())
                .init();
        }
        _ => {
            // Structured JSON logging for production
            tracing_subscriber::registry()
                .with(env_filter)
                .with(
                    tracing_subscriber::fmt::layer()
                        .json()
                        .with_target(true)
                        .with_level(true),
                )
                .init();
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = ServiceConfig::from_env()?;

    // Check for DATABASE_URL and use PostgreSQL if available, otherwise use in-memory
    let repository: Arc<dyn QuoteRepository> = if let Some(database_url) = &config.database_url {
        match PostgresQuoteRepository::connect(database_url).await {
            Ok(postgres) => {
                info!("Using PostgreSQL quote repository");
                Arc::new(postgres)
            }
            Err(e) => {
                error!("Failed to connect to PostgreSQL: {e}. Falling back to in-memory storage.");
                Arc::new(InMemoryQuoteRepository::new())
            }
        }
    } else {
        info!("Using in-memory quote repository (set DATABASE_URL to use PostgreSQL)");
        Arc::new(InMemoryQuoteRepository::new())
    };

    let registry = Arc::new(flows::build_registry().context("failed to build flow registry")?);
    for flow in registry.list() {
        info!(flow_id = %flow.flow_id, product = %flow.product_name, "registered flow");
    }

    let store_config = StoreConfig::new(config.session_ttl, config.draft_ttl)
        .context("invalid session/draft TTL configuration")?;
    let engine = Arc::new(FlowEngine::new(
        registry.clone(),
        Arc::new(InMemoryCache::new()),
        repository.clone(),
        store_config,
        PricingConfig::default(),
    ));

    let app_state = AppState {
        engine,
        repository,
        answerer: Arc::new(ProductCatalogAnswerer::new(registry.list())),
    };
    let app = build_router(app_state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr)
        .await
        .with_context(|| format!("failed to bind {}", config.bind_addr))?;

    info!("Server running on http://{}", config.bind_addr);

    axum::serve(listener, app).await?;
    Ok(())
}
