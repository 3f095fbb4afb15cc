mod api;
mod bootstrap;
mod config;
mod error;
mod identity;
mod kintone;
mod ledger;
mod middleware;
mod server;
mod settlement;
mod snowflake;
mod sync;

use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

// Initialize logging and tracing
fn init_tracing() {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG")
                .unwrap_or_else(|_| "info,tower_http=debug,pointsync=debug".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration
    dotenv::dotenv().ok();

    init_tracing();

    info!("🚀 Starting point sync service");

    let config = config::Config::from_env()?;

    let state = bootstrap::initialize_app_state(&config).await?;

    // Create HTTP server
    let app = server::create_app(state);

    // Run the Server
    server::run_server(app, &config.bind_address).await?;

    Ok(())
}
