//! Switchboard gateway binary.
//!
//! Wires the pieces together: environment configuration, tracing, the AMQP
//! transport, the correlation engine, and the axum REST surface. Run with:
//!
//! ```bash
//! AMQP_URL=amqp://localhost:5672 cargo run --bin switchboard-gateway
//! ```

mod config;
mod entities;

use anyhow::Context;
use config::AppConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use switchboard_amqp::AmqpTransport;
use switchboard_core::{Gateway, SystemClock};
use switchboard_web::{api_router, correlation_id_layer, AppState};
use tokio::signal;
use tracing::info;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();
    init_tracing();

    let config = AppConfig::from_env().context("configuration")?;
    info!(amqp_url = %config.amqp_url, "connecting to broker");

    let transport = AmqpTransport::connect(&config.amqp_url)
        .await
        .context("broker startup")?;

    let gateway = Gateway::new(
        Arc::new(transport),
        Arc::new(SystemClock),
        config.gateway.clone(),
        entities::resolver_registry(),
    );
    gateway.start().await.context("reply consumer startup")?;
    info!("correlation engine started");

    let app = api_router(entities::entity_specs(), AppState::new(gateway))
        .layer(correlation_id_layer());

    let addr: SocketAddr = format!("{}:{}", config.bind_addr, config.http_port)
        .parse()
        .context("bind address")?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .context("http listener")?;
    info!(%addr, "http surface listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("http server")?;

    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(err) = signal::ctrl_c().await {
        tracing::error!(error = %err, "unable to listen for the shutdown signal");
    } else {
        info!("shutdown signal received");
    }
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "switchboard=info,switchboard_gateway=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();
}
