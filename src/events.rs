//! Canonical event model
//!
//! Exchange-agnostic representation of book updates, trades, and ancillary
//! metrics. Everything downstream of the per-exchange adapters speaks these
//! types only.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Canonical pair identifier (e.g. "BTC-USD"), stable across exchanges
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Pair(String);

impl Pair {
    pub fn new(s: impl Into<String>) -> Self {
        Pair(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Pair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Pair {
    fn from(s: &str) -> Self {
        Pair(s.to_string())
    }
}

/// Side of the order book
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Side {
    Bid,
    Ask,
}

/// Aggressor side of a trade
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeSide {
    Buy,
    Sell,
}

/// A single stored level in the order book
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Level {
    pub price: Decimal,
    pub size: Decimal,
}

/// One change produced by applying a message to the book.
///
/// Size zero means the level was removed; a stored level never has size zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LevelChange {
    pub side: Side,
    pub price: Decimal,
    pub size: Decimal,
}

/// Change-set produced by one applied book message
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Delta {
    pub changes: Vec<LevelChange>,
}

impl Delta {
    pub fn push(&mut self, side: Side, price: Decimal, size: Decimal) {
        self.changes.push(LevelChange { side, price, size });
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    pub fn len(&self) -> usize {
        self.changes.len()
    }
}

/// Canonical book-update event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BookUpdate {
    pub pair: Pair,
    pub delta: Delta,
    /// True when the delta comes from a full snapshot rather than a merge
    pub forced: bool,
    /// Exchange timestamp, epoch milliseconds
    pub exchange_ts: u64,
    /// Local receipt timestamp captured at the transport boundary
    pub receipt_ts: u64,
}

/// Canonical trade event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Trade {
    pub pair: Pair,
    pub side: TradeSide,
    pub amount: Decimal,
    pub price: Decimal,
    pub id: Option<String>,
    pub exchange_ts: u64,
    pub receipt_ts: u64,
}

/// Kind of ancillary metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    OpenInterest,
    IndexPrice,
    FundingRate,
}

/// Canonical metric event
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metric {
    pub pair: Pair,
    pub kind: MetricKind,
    pub value: Decimal,
    pub exchange_ts: u64,
    pub receipt_ts: u64,
}

/// Event emitted to the downstream sink
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CanonicalEvent {
    Book(BookUpdate),
    Trade(Trade),
    Metric(Metric),
}

impl CanonicalEvent {
    pub fn pair(&self) -> &Pair {
        match self {
            CanonicalEvent::Book(b) => &b.pair,
            CanonicalEvent::Trade(t) => &t.pair,
            CanonicalEvent::Metric(m) => &m.pair,
        }
    }
}
