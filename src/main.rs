use std::sync::Arc;

use tokio::net::TcpListener;

use pulse::adapters::auth::JwtSessionValidator;
use pulse::adapters::http::app_router;
use pulse::adapters::websocket::{ConnectionSettings, Hub, WebSocketState};
use pulse::config::AppConfig;

fn init_tracing(config: &AppConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.server.log_level));

    if config.is_production() {
        tracing_subscriber::fmt().json().with_env_filter(filter).init();
    } else {
        tracing_subscriber::fmt().pretty().with_env_filter(filter).init();
    }
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!(error = %e, "Failed to listen for shutdown signal");
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load()?;
    init_tracing(&config);
    config.validate()?;

    tracing::info!("Pulse relay v{} starting", env!("CARGO_PKG_VERSION"));

    let hub = Hub::spawn(config.websocket.hub_inbox_capacity);
    let validator = Arc::new(JwtSessionValidator::new(&config.auth.jwt_secret));
    let state = WebSocketState::new(
        hub.clone(),
        validator,
        ConnectionSettings::from(&config.websocket),
    );

    let app = app_router(state, &config.server.cors_origins_list());

    let addr = config.server.socket_addr()?;
    let listener = TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    // Stopping the hub closes every mailbox, which ends each writer loop
    // and lets upgraded sockets wind down while the listener drains.
    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            shutdown_signal().await;
            tracing::info!("Shutdown signal received");
            if let Err(e) = hub.shutdown().await {
                tracing::warn!(error = %e, "Hub already stopped");
            }
        })
        .await?;

    tracing::info!("Pulse relay stopped");
    Ok(())
}
