use crate::app::App;
use crate::persistence::CachedFileStore;
use crate::scraper::BrowserScraper;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{EnvFilter, fmt};
use tracing_unwrap::ResultExt;

mod app;
mod config;
mod data;
mod normalize;
mod persistence;
mod scraper;
mod web;

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    fmt().with_env_filter(EnvFilter::from_default_env()).init();
    info!("Starting the application...");

    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config = config::Config::from_file(std::path::Path::new(&config_path))?;

    let scraper = BrowserScraper::new(&config);
    let store = Arc::new(CachedFileStore::new(
        config.data_file.clone().map(PathBuf::from),
    ));
    store.restore().await;

    let cancellation_token = CancellationToken::new();
    let shutdown_token = cancellation_token.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.unwrap_or_log();
        info!("Shutdown signal received");
        shutdown_token.cancel();
    });

    let mut app = App::new(config, scraper, store);

    app.run(cancellation_token).await?;

    Ok(())
}
