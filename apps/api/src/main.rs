mod config;
mod errors;
mod llm_client;
mod models;
mod pipeline;
mod report;
mod routes;
mod state;
mod store;

use anyhow::{Context, Result};
use std::net::SocketAddr;
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::Config;
use crate::llm_client::LlmClient;
use crate::pipeline::orchestrator::Orchestrator;
use crate::routes::build_router;
use crate::state::AppState;
use crate::store::snapshot::{KeyValueStore, MemoryStore, RedisStore};
use crate::store::ResultStore;

const STORE_PREFIX: &str = "ingredient-intel";

#[tokio::main]
async fn main() -> Result<()> {
    // Load configuration first (fails on missing required env vars)
    let config = Config::from_env()?;

    // Initialize structured logging
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new(format!("{}={}", env!("CARGO_CRATE_NAME"), &config.rust_log))
        }))
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting Ingredient Intel API v{}", env!("CARGO_PKG_VERSION"));

    // Initialize completion client
    let llm = LlmClient::new(config.llm_settings()).context("failed to build completion client")?;
    info!("Completion client initialized (model: {})", llm.model());

    let orchestrator = Orchestrator::new(Arc::new(llm), config.pipeline_settings());

    // Initialize result store
    let backend: Arc<dyn KeyValueStore> = match &config.redis_url {
        Some(url) => {
            let redis = RedisStore::open(url, STORE_PREFIX).context("invalid REDIS_URL")?;
            info!("Result store backed by Redis");
            Arc::new(redis)
        }
        None => {
            warn!("REDIS_URL not set; results are kept in memory only");
            Arc::new(MemoryStore::default())
        }
    };
    let store = ResultStore::load(backend).await;

    let state = AppState {
        orchestrator,
        store,
    };

    // Build router
    let app = build_router(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive());

    let addr: SocketAddr = format!("0.0.0.0:{}", config.port).parse()?;
    info!("Listening on {addr}");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
