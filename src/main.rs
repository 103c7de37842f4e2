//! NL2SQL gateway entry point.

use clap::Parser;
use nl2sql_gateway::api::{self, AppState};
use nl2sql_gateway::config::Config;
use tokio::net::TcpListener;
use tracing::{error, info};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

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

    if let Err(msg) = config.validate() {
        eprintln!("Error: {}", msg);
        std::process::exit(2);
    }

    let bind_addr = config.bind_addr();
    info!(
        addr = %bind_addr,
        max_attempts = config.max_attempts,
        result_num_limit = config.result_num_limit,
        "Starting NL2SQL gateway v{}",
        env!("CARGO_PKG_VERSION")
    );

    let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
        error!(error = %e, addr = %bind_addr, "Failed to bind");
        format!("Failed to bind to {}: {}", bind_addr, e)
    })?;

    api::serve(listener, AppState::from_config(&config)).await?;

    info!("Server shutdown complete");
    Ok(())
}
