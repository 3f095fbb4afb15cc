use axum::{
    routing::{get, post},
    Router,
};
use std::time::Duration;
use tower::ServiceBuilder;
use tower_http::{compression::CompressionLayer, timeout::TimeoutLayer, trace::TraceLayer};
use tracing::info;

use crate::api::handler::{health_check, record_webhook, settle_semester, sync_student, trigger_sync, AppState};

/// Foreground syncs and settlement can page through whole remote apps
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

pub fn create_app(state: AppState) -> Router {
    info!("⚙️ Setting up HTTP routes...");

    let app = Router::new()
        // Public health check endpoint
        .route("/health", get(health_check))
        .nest(
            "/api/v1",
            Router::new()
                // Sync triggers
                .route("/sync/all-by-student", post(sync_student))
                .route("/sync/:entity", post(trigger_sync))
                // Settlement
                .route("/settlement/semester", post(settle_semester))
                // Remote record events
                .route("/webhooks/:entity", post(record_webhook)),
        )
        .layer(
            ServiceBuilder::new()
                // Add request tracing
                .layer(TraceLayer::new_for_http())
                .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
                .layer(CompressionLayer::new()),
        )
        .with_state(state);

    info!("✓ HTTP routes configured");
    app
}

pub async fn run_server(app: Router, bind_address: &str) -> Result<(), Box<dyn std::error::Error>> {
    let listener = tokio::net::TcpListener::bind(bind_address).await?;
    info!("🌐 Server listening on: {}", bind_address);

    axum::serve(listener, app).await?;
    Ok(())
}
