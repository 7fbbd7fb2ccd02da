use axum::{
    extract::State,
    response::Json,
    routing::{get, post},
    Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::info;

use research_server::{config::Config, pipeline, AppState, ResearchOptions, ResearchResponse};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let config = Config::from_env();
    info!("starting research server on {}", config.bind_addr);
    info!(
        "primary backend available: {}, LLM available: {}",
        config.brave_api_key.is_some(),
        config.llm_api_key.is_some()
    );

    let bind_addr = config.bind_addr.clone();
    let state = Arc::new(AppState::new(config)?);

    let app = Router::new()
        .route("/", get(health_check))
        .route("/health", get(health_check))
        .route("/search", post(search_handler))
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let listener = tokio::net::TcpListener::bind(&bind_addr).await?;
    info!("research server listening on http://{}", bind_addr);
    axum::serve(listener, app).await?;
    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "service": "research-server",
        "version": env!("CARGO_PKG_VERSION"),
    }))
}

#[derive(Debug, Deserialize)]
struct SearchBody {
    query: String,
    #[serde(flatten)]
    options: ResearchOptions,
}

/// The pipeline itself never fails; a degraded response is still a response.
async fn search_handler(
    State(state): State<Arc<AppState>>,
    Json(body): Json<SearchBody>,
) -> Json<ResearchResponse> {
    let response = pipeline::research(&state, &body.query, body.options).await;
    Json(response)
}
