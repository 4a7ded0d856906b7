//! preserve - pull-through HTTP cache
//!
//! Serves stable copies of remote URLs out of local or object storage,
//! fetching from the origin on first request.

use clap::Parser;
use preserve::{
    start_server, Cache, Config, LogFormat, OriginFetcher, Result, ServerState, SharedState,
    StorageProvider,
};
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{prelude::*, EnvFilter};

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::parse();

    if config.storage_provider == StorageProvider::List {
        println!("Available Storage Providers: local, s3");
        return Ok(());
    }

    // RUST_LOG takes precedence over the configured level
    let env_filter = match EnvFilter::try_from_default_env() {
        Ok(filter) => filter,
        Err(_) => EnvFilter::try_new(&config.log_level)?,
    };

    match config.log_format {
        LogFormat::Json => tracing_subscriber::registry()
            .with(env_filter)
            .with(tracing_stackdriver::layer())
            .init(),
        LogFormat::Text => tracing_subscriber::fmt().with_env_filter(env_filter).init(),
    }

    let addr = config.listen_addr()?;
    info!(
        %addr,
        version = env!("CARGO_PKG_VERSION"),
        "preserve starting..."
    );

    let storage = config.build_storage().await?;
    info!(provider = storage.name(), "Storage initialized");

    let fetcher = OriginFetcher::new(config.user_agent());
    let cache = Cache::new(storage, fetcher);

    let state: SharedState = Arc::new(ServerState::new(cache));

    start_server(state, addr).await?;

    info!("preserve stopped");
    Ok(())
}
