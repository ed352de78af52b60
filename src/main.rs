//! cidadao-core service entry point.
//!
//! Loads configuration from the environment, bootstraps the write-buffered
//! cache, sync engine, overlay service, phone-verification service, and
//! audit sink, then serves the thin outer HTTP surface until shutdown.

use cidadao_core::config::Config;
use cidadao_core::AppContext;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .json()
        .init();

    tracing::info!(version = cidadao_core::VERSION, "starting cidadao-core");

    let config = Config::from_env();
    let listen_addr = config.http_listen_addr.clone();
    let ctx = Arc::new(AppContext::bootstrap(config).await?);
    let router = cidadao_core::api::router(Arc::clone(&ctx));

    let listener = tokio::net::TcpListener::bind(&listen_addr).await?;
    tracing::info!(addr = %listen_addr, "listening");

    let server = axum::serve(listener, router).with_graceful_shutdown(shutdown_signal());
    let result = server.await;

    ctx.shutdown().await;
    tracing::info!("shutdown complete");

    result.map_err(Into::into)
}

async fn shutdown_signal() {
    let _ = tokio::signal::ctrl_c().await;
    tracing::info!("shutdown signal received");
}
