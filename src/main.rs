//! Market data feed handler
//!
//! Connects to configured exchanges, maintains per-pair order books, and
//! publishes canonical events to the downstream sink.

use std::sync::Arc;
use axum::{routing::get, Json, Router};
use tracing::{info, warn, Level};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

use marketfeed::exchange::{Bitmax, Bybit, ExchangeAdapter};
use marketfeed::{Config, Connection, EventSink, Pair};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(fmt::layer().json())
        .with(EnvFilter::from_default_env().add_directive(Level::INFO.into()))
        .init();

    info!("Starting marketfeed handler");

    let config = Arc::new(Config::load()?);
    info!(exchanges = ?config.exchanges, pairs = ?config.pairs, "Configuration loaded");

    let sink = Arc::new(EventSink::new(&config.sink_socket_path).await?);
    let pairs: Vec<Pair> = config.pairs.iter().map(|p| Pair::new(p.clone())).collect();

    for name in &config.exchanges {
        let adapter: Box<dyn ExchangeAdapter> = match name.as_str() {
            "bybit" => Box::new(Bybit::new(&pairs, config.bybit_ws_endpoint.clone())),
            "bitmax" => Box::new(Bitmax::new(
                &pairs,
                config.bitmax_ws_endpoint.clone(),
                config.bitmax_rest_endpoint.clone(),
                config.snapshot_buffer_capacity,
            )),
            other => {
                warn!(exchange = other, "Unknown exchange, skipping");
                continue;
            }
        };
        let mut connection = Connection::new(adapter, sink.clone(), config.clone());
        tokio::spawn(async move { connection.run().await });
    }

    start_health_server(config).await
}

/// HTTP server for health checks and metrics
async fn start_health_server(config: Arc<Config>) -> anyhow::Result<()> {
    use std::net::SocketAddr;

    let app = Router::new()
        .route("/health", get(health_check))
        .route("/metrics", get(metrics));

    let addr = SocketAddr::from(([0, 0, 0, 0], config.health_port));
    info!(addr = %addr, "Starting health check server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}

async fn health_check() -> Json<serde_json::Value> {
    Json(serde_json::json!({
        "status": "healthy",
        "component": "marketfeed",
        "timestamp": chrono::Utc::now().to_rfc3339()
    }))
}

async fn metrics() -> String {
    use prometheus::{Encoder, TextEncoder};
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    if encoder.encode(&metric_families, &mut buffer).is_err() {
        return String::new();
    }
    String::from_utf8(buffer).unwrap_or_default()
}
