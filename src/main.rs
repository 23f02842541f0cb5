use anyhow::{Context, Result};
use locale_gateway::{
    config::Config,
    rate_limit::RateLimiter,
    server::{build_router, AppState},
};
use std::net::SocketAddr;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file (ignored in production)
    let _ = dotenvy::dotenv();

    // Initialize logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("locale_gateway=info".parse()?)
                .add_directive("tower_http=info".parse()?),
        )
        .init();

    info!("Starting locale gateway");

    // Load configuration from environment
    let config = Config::from_env()?;
    info!(
        "Default country: {}, geolocation provider: {}",
        config.default_country, config.geolocation.base_url
    );

    let limiter = RateLimiter::connect(config.redis_url.as_deref(), config.rate_limits).await;
    info!("Rate limit store: {}", limiter.backend_name());

    let state = AppState::new(&config, limiter)?;
    let app = build_router(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;
    info!("✓ Listening on http://{}", addr);

    axum::serve(listener, app.into_make_service_with_connect_info::<SocketAddr>())
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    info!("Server stopped");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::warn!("Failed to listen for shutdown signal: {}", e);
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
