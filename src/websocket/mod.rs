//! WebSocket transport

mod client;

pub use client::WebSocketClient;
