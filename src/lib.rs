pub mod cache;
pub mod cli;
pub mod core;
pub mod providers;
pub mod server;
pub mod store;

use crate::core::config::AppConfig;
use crate::core::price::PriceFetcher;
use crate::providers::YahooFinanceProvider;
use crate::store::WatchlistStore;
use crate::store::disk::JsonCodec;
use anyhow::{Context, Result};
use std::sync::Arc;
use tracing::{debug, info};

pub enum AppCommand {
    Serve,
    RebuildIndex,
    Weeks,
    Show { week: Option<String> },
}

/// Loads configuration from `config_path`, or the default location, with
/// environment overrides applied on top.
pub fn load_config(config_path: Option<&str>) -> Result<AppConfig> {
    match config_path {
        Some(path) => {
            let mut config = AppConfig::load_from_path(path)?;
            config.apply_overrides(|name| std::env::var(name).ok());
            Ok(config)
        }
        None => AppConfig::load(),
    }
}

pub fn open_store(config: &AppConfig) -> Result<Arc<WatchlistStore>> {
    let root = config.default_data_path()?;
    let store = WatchlistStore::open(root.clone(), JsonCodec::new(config.fast_json))
        .with_context(|| format!("Failed to open watchlist store at {}", root.display()))?;
    Ok(Arc::new(store))
}

pub async fn run_command(command: AppCommand, config_path: Option<&str>) -> Result<()> {
    info!("Stockwatch starting...");

    let config = load_config(config_path)?;
    debug!("Loaded config: {config:#?}");
    let store = open_store(&config)?;

    match command {
        AppCommand::Serve => {
            let fetcher: Arc<dyn PriceFetcher> =
                Arc::new(YahooFinanceProvider::new(config.yahoo_base_url())?);
            let state = server::AppState::new(store, fetcher, config.price_ttl(), config.http_cache);
            server::serve(state, config.listen_addr()?).await
        }
        AppCommand::RebuildIndex => cli::rebuild(&store),
        AppCommand::Weeks => {
            cli::weeks::run(&store);
            Ok(())
        }
        AppCommand::Show { week } => {
            let fetcher = YahooFinanceProvider::new(config.yahoo_base_url())?;
            cli::watchlist::run(&store, &fetcher, week.as_deref()).await
        }
    }
}
