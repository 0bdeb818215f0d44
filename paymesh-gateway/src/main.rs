//! # PayMesh Gateway
//!
//! Serves the public HTTP API and forwards every request over RabbitMQ.

use anyhow::Context;
use paymesh::{RpcClient, Settings};
use paymesh_gateway::{create_router, GatewayState};
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "paymesh=debug,paymesh_gateway=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let settings = Settings::new().context("failed to load settings")?;
    info!("🌐 Starting PayMesh gateway");

    let (client, reply_router) = RpcClient::connect(&settings)
        .await
        .context("failed to connect to the broker")?;
    let app = create_router(GatewayState::new(client, settings.call_timeout()));

    let listener = tokio::net::TcpListener::bind(&settings.gateway.bind_address)
        .await
        .with_context(|| format!("failed to bind {}", settings.gateway.bind_address))?;
    info!("✅ Gateway listening on http://{}", settings.gateway.bind_address);

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
            info!("Shutdown signal received");
        })
        .await?;

    reply_router.abort();
    Ok(())
}
