//! # Symphony Server
//!
//! Realtime chat hub server.
//!
//! ## Usage
//!
//! ```bash
//! # Run with default settings
//! symphony
//!
//! # Run with a custom config file
//! SYMPHONY_CONFIG=/path/to/symphony.toml symphony
//!
//! # Run with environment variables
//! SYMPHONY_PORT=8080 SYMPHONY_HOST=0.0.0.0 symphony
//! ```

use anyhow::Result;
use symphony_server::{config, metrics, run_server};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "symphony=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = config::Config::load()?;

    tracing::info!("Starting Symphony server on {}:{}", config.host, config.port);

    // Initialize metrics
    metrics::init_metrics();

    // Start the server
    run_server(config).await?;

    Ok(())
}
