//! Multi-exchange market data feed handler
//!
//! Ingests real-time streams from cryptocurrency exchanges, reconciles
//! per-pair order books under snapshot/incremental semantics with sequence
//! continuity checking, and normalizes heterogeneous trade and metric
//! encodings into one canonical event model.

pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod exchange;
pub mod numeric;
pub mod orderbook;
pub mod sink;
pub mod symbols;
pub mod websocket;

pub use config::Config;
pub use connection::Connection;
pub use error::{FeedError, Result};
pub use events::{
    BookUpdate, CanonicalEvent, Delta, Level, LevelChange, Metric, MetricKind, Pair, Side, Trade,
    TradeSide,
};
pub use exchange::{Bitmax, Bybit, ExchangeAdapter, Routed};
pub use orderbook::{Applied, BookState, OrderBook, OrderBookStore, SeqPolicy};
pub use sink::EventSink;
