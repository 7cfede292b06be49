//! Configuration for the feed handler

use serde::Deserialize;
use std::env;

use crate::exchange;

/// Application configuration
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Exchanges to connect to (e.g., ["bybit", "bitmax"])
    pub exchanges: Vec<String>,

    /// Canonical pairs to subscribe to (e.g., ["BTC-USD", "ETH-USD"])
    pub pairs: Vec<String>,

    /// WebSocket endpoints
    pub bybit_ws_endpoint: String,
    pub bitmax_ws_endpoint: String,

    /// REST endpoint for Bitmax bootstrap snapshots
    pub bitmax_rest_endpoint: String,

    /// Unix socket path the event sink publishes to
    pub sink_socket_path: String,

    /// Base reconnection delay
    pub reconnect_delay_ms: u64,

    /// Bounded per-pair buffer for incrementals awaiting a bootstrap snapshot
    pub snapshot_buffer_capacity: usize,

    /// Health check server port
    pub health_port: u16,
}

fn env_list(key: &str, default: &str) -> Vec<String> {
    env::var(key)
        .unwrap_or_else(|_| default.to_string())
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

impl Config {
    /// Load configuration from environment variables
    pub fn load() -> anyhow::Result<Self> {
        dotenvy::dotenv().ok();

        Ok(Self {
            exchanges: env_list("EXCHANGES", "bybit,bitmax"),
            pairs: env_list("PAIRS", "BTC-USD")
                .into_iter()
                .map(|s| s.to_uppercase())
                .collect(),
            bybit_ws_endpoint: env::var("BYBIT_WS_ENDPOINT")
                .unwrap_or_else(|_| exchange::bybit::DEFAULT_WS_ENDPOINT.to_string()),
            bitmax_ws_endpoint: env::var("BITMAX_WS_ENDPOINT")
                .unwrap_or_else(|_| exchange::bitmax::DEFAULT_WS_ENDPOINT.to_string()),
            bitmax_rest_endpoint: env::var("BITMAX_REST_ENDPOINT")
                .unwrap_or_else(|_| exchange::bitmax::DEFAULT_REST_ENDPOINT.to_string()),
            sink_socket_path: env::var("SINK_SOCKET_PATH")
                .unwrap_or_else(|_| "/tmp/marketfeed.sock".to_string()),
            reconnect_delay_ms: env::var("RECONNECT_DELAY_MS")
                .unwrap_or_else(|_| "1000".to_string())
                .parse()
                .unwrap_or(1000),
            snapshot_buffer_capacity: env::var("SNAPSHOT_BUFFER_CAPACITY")
                .unwrap_or_else(|_| "512".to_string())
                .parse()
                .unwrap_or(512),
            health_port: env::var("HEALTH_PORT")
                .unwrap_or_else(|_| "9090".to_string())
                .parse()
                .unwrap_or(9090),
        })
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            exchanges: vec!["bybit".to_string(), "bitmax".to_string()],
            pairs: vec!["BTC-USD".to_string()],
            bybit_ws_endpoint: exchange::bybit::DEFAULT_WS_ENDPOINT.to_string(),
            bitmax_ws_endpoint: exchange::bitmax::DEFAULT_WS_ENDPOINT.to_string(),
            bitmax_rest_endpoint: exchange::bitmax::DEFAULT_REST_ENDPOINT.to_string(),
            sink_socket_path: "/tmp/marketfeed.sock".to_string(),
            reconnect_delay_ms: 1000,
            snapshot_buffer_capacity: 512,
            health_port: 9090,
        }
    }
}
