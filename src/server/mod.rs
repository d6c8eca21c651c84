mod handlers;
mod state;

pub use state::AppState;

use anyhow::{Context, Result};
use axum::http::{header, HeaderValue};
use axum::routing::{get, post};
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::set_header::SetResponseHeaderLayer;
use tracing::info;

pub fn build_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .route("/api/v1/geocode", get(handlers::geocode))
        .route("/api/v1/analysis/address", post(handlers::analyze_address))
        .layer(SetResponseHeaderLayer::overriding(
            header::CACHE_CONTROL,
            HeaderValue::from_static("no-store"),
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

pub async fn start(host: &str, port: u16, state: Arc<AppState>) -> Result<()> {
    let app = build_router(state);
    let addr = format!("{}:{}", host, port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("cannot bind to {}", addr))?;

    info!("listing geocoder listening on http://{}", addr);

    axum::serve(listener, app).await.context("server error")?;
    Ok(())
}
