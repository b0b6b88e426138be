//! Bartender snapshot API - Main entry point.

use bartender_db::config::Config;
use bartender_db::db::PoolProvider;
use bartender_db::http::HttpServer;
use clap::Parser;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

/// Initialize the tracing subscriber for logging.
fn init_tracing(config: &Config) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    let subscriber = tracing_subscriber::registry().with(filter);

    if config.json_logs {
        subscriber.with(fmt::layer().json()).init();
    } else {
        subscriber
            .with(fmt::layer().with_target(true).with_thread_ids(false))
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = Config::parse();
    init_tracing(&config);

    info!(
        addr = %config.http_bind_addr(),
        ssl_mode = %config.database.ssl_mode,
        "Starting bartender snapshot API v{}",
        env!("CARGO_PKG_VERSION")
    );

    // The pool is created on the first request that needs it.
    let provider = PoolProvider::new(config.database.clone());
    let server = HttpServer::new(provider, &config.http_host, config.http_port);

    if let Err(e) = server.run().await {
        error!(error = %e, "Server error");
        return Err(e.into());
    }

    info!("Server shutdown complete");
    Ok(())
}
