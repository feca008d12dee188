//! HTTP surface over the watchlist store and the price cache.

pub mod error;
pub mod routes;

use crate::cache::PriceCache;
use crate::core::price::PriceFetcher;
use crate::store::WatchlistStore;
use anyhow::{Context, Result};
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tower_http::trace::TraceLayer;
use tracing::info;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<WatchlistStore>,
    pub prices: Arc<PriceCache>,
    /// Used directly for the one inline fetch a snapshot may need.
    pub fetcher: Arc<dyn PriceFetcher>,
    pub http_cache: bool,
}

impl AppState {
    pub fn new(
        store: Arc<WatchlistStore>,
        fetcher: Arc<dyn PriceFetcher>,
        price_ttl: Duration,
        http_cache: bool,
    ) -> Self {
        let prices = Arc::new(PriceCache::new(Arc::clone(&fetcher), price_ttl));
        Self {
            store,
            prices,
            fetcher,
            http_cache,
        }
    }
}

pub fn router(state: AppState) -> Router {
    routes::api_routes()
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Serves the API until Ctrl-C, then stops the price cache worker.
pub async fn serve(state: AppState, addr: SocketAddr) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {addr}"))?;
    info!("Listening on http://{}", listener.local_addr()?);

    let prices = Arc::clone(&state.prices);
    axum::serve(listener, router(state))
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("HTTP server failed")?;

    prices.stop().await;
    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_ok() {
        info!("Shutdown requested");
    }
}
