//! Bybit adapter
//!
//! Routes on the `topic` field: `trade.*`, `orderBookL2_25.*`,
//! `instrument_info.*`. Book deltas carry `delete`/`update`/`insert`
//! sections and a monotonic `cross_seq`; the stream always opens with a
//! full snapshot, so nothing is ever buffered. Metrics arrive as
//! `instrument_info` snapshot/delta records with scaled-integer fields.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, error, warn};

use super::{ExchangeAdapter, Routed};
use crate::error::{FeedError, Result};
use crate::events::{
    BookUpdate, CanonicalEvent, Level, LevelChange, Metric, MetricKind, Pair, Side, Trade,
    TradeSide,
};
use crate::numeric;
use crate::orderbook::{Applied, BookState, OrderBookStore, SeqPolicy};
use crate::symbols::{bybit_symbol, SymbolMap};

pub const DEFAULT_WS_ENDPOINT: &str = "wss://stream.bybit.com/realtime";

const CHANNELS: &[&str] = &["trade", "orderBookL2_25", "instrument_info.100ms"];

pub struct Bybit {
    symbols: SymbolMap,
    store: OrderBookStore,
    ws_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct BookMsg {
    topic: String,
    #[serde(rename = "type")]
    update_type: String,
    cross_seq: u64,
    timestamp_e6: u64,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct BookLevel {
    /// Price arrives as a decimal string
    price: Decimal,
    side: String,
    /// Absent on delete entries
    #[serde(default, with = "rust_decimal::serde::arbitrary_precision_option")]
    size: Option<Decimal>,
}

#[derive(Debug, Deserialize)]
struct BookDelta {
    #[serde(default)]
    delete: Vec<BookLevel>,
    #[serde(default)]
    update: Vec<BookLevel>,
    #[serde(default)]
    insert: Vec<BookLevel>,
}

#[derive(Debug, Deserialize)]
struct TradeMsg {
    data: Vec<TradeRecord>,
}

#[derive(Debug, Deserialize)]
struct TradeRecord {
    symbol: String,
    side: String,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    size: Decimal,
    #[serde(with = "rust_decimal::serde::arbitrary_precision")]
    price: Decimal,
    trade_id: Option<String>,
    /// Preferred millisecond timestamp; older frames carry only `timestamp`
    trade_time_ms: Option<u64>,
    timestamp: Option<String>,
}

#[derive(Debug, Deserialize)]
struct InstrumentMsg {
    #[serde(rename = "type")]
    update_type: String,
    data: Value,
}

#[derive(Debug, Deserialize)]
struct InstrumentDelta {
    #[serde(default)]
    update: Vec<Value>,
}

/// Sparse instrument record: delta updates only carry changed fields
#[derive(Debug, Deserialize)]
struct InstrumentRecord {
    symbol: String,
    open_interest: Option<u64>,
    index_price_e4: Option<i64>,
    funding_rate_e6: Option<i64>,
    updated_at: String,
}

impl Bybit {
    pub fn new(pairs: &[Pair], ws_endpoint: impl Into<String>) -> Self {
        Self {
            symbols: SymbolMap::new(pairs, bybit_symbol),
            // the ws stream opens every book with a snapshot, so the
            // bootstrap buffer is never used
            store: OrderBookStore::new(SeqPolicy::Monotonic, 1),
            ws_endpoint: ws_endpoint.into(),
        }
    }

    fn canonical(&self, exchange_symbol: &str) -> Option<Pair> {
        let pair = self.symbols.to_canonical(exchange_symbol);
        if pair.is_none() {
            warn!(exchange = self.id(), symbol = exchange_symbol, "Unknown symbol");
        }
        pair.cloned()
    }

    fn handle_book(&mut self, value: Value, receipt_ts: u64) -> Result<Vec<CanonicalEvent>> {
        let msg: BookMsg = serde_json::from_value(value)?;
        let symbol = msg
            .topic
            .rsplit('.')
            .next()
            .ok_or_else(|| FeedError::Parse(format!("bad book topic {:?}", msg.topic)))?;
        let Some(pair) = self.canonical(symbol) else {
            return Ok(Vec::new());
        };
        let exchange_ts = numeric::micros_to_millis(msg.timestamp_e6);

        let applied = match msg.update_type.as_str() {
            "snapshot" => {
                let levels: Vec<BookLevel> = serde_json::from_value(msg.data)?;
                let mut bids = Vec::new();
                let mut asks = Vec::new();
                for level in levels {
                    let size = level
                        .size
                        .ok_or_else(|| FeedError::Parse("snapshot level without size".into()))?;
                    let target = if level.side == "Buy" { &mut bids } else { &mut asks };
                    target.push(Level {
                        price: level.price,
                        size,
                    });
                }
                self.store
                    .apply_snapshot(&pair, &bids, &asks, msg.cross_seq, exchange_ts)?
            }
            "delta" => {
                if self.store.state(&pair) != BookState::Active {
                    debug!(pair = %pair, "Delta before snapshot, dropping");
                    return Ok(Vec::new());
                }
                let delta: BookDelta = serde_json::from_value(msg.data)?;
                let mut changes = Vec::new();
                for level in delta.delete {
                    changes.push(LevelChange {
                        side: book_side(&level.side),
                        price: level.price,
                        size: Decimal::ZERO,
                    });
                }
                for level in delta.update.into_iter().chain(delta.insert) {
                    let size = level
                        .size
                        .ok_or_else(|| FeedError::Parse("update level without size".into()))?;
                    changes.push(LevelChange {
                        side: book_side(&level.side),
                        price: level.price,
                        size,
                    });
                }
                match self
                    .store
                    .apply_incremental(&pair, changes, msg.cross_seq, exchange_ts)?
                {
                    Applied::Update(applied) => vec![applied],
                    Applied::Buffered { .. } | Applied::Dropped => Vec::new(),
                }
            }
            other => {
                return Err(FeedError::UnknownMessage(format!("book type {other:?}")));
            }
        };

        Ok(applied
            .into_iter()
            .map(|a| {
                CanonicalEvent::Book(BookUpdate {
                    pair: pair.clone(),
                    delta: a.delta,
                    forced: a.forced,
                    exchange_ts: a.exchange_ts,
                    receipt_ts,
                })
            })
            .collect())
    }

    fn handle_trades(&mut self, value: Value, receipt_ts: u64) -> Result<Vec<CanonicalEvent>> {
        let msg: TradeMsg = serde_json::from_value(value)?;
        let mut events = Vec::new();
        for trade in msg.data {
            let Some(pair) = self.canonical(&trade.symbol) else {
                continue;
            };
            let exchange_ts = match (trade.trade_time_ms, trade.timestamp.as_deref()) {
                (Some(ms), _) => ms,
                (None, Some(iso)) => numeric::iso8601_to_millis(iso)?,
                (None, None) => {
                    return Err(FeedError::Parse("trade without timestamp".into()));
                }
            };
            events.push(CanonicalEvent::Trade(Trade {
                pair,
                side: if trade.side == "Buy" {
                    TradeSide::Buy
                } else {
                    TradeSide::Sell
                },
                amount: trade.size,
                price: trade.price,
                id: trade.trade_id,
                exchange_ts,
                receipt_ts,
            }));
        }
        Ok(events)
    }

    fn handle_instrument_info(
        &mut self,
        value: Value,
        receipt_ts: u64,
    ) -> Result<Vec<CanonicalEvent>> {
        let msg: InstrumentMsg = serde_json::from_value(value)?;
        let records: Vec<Value> = if msg.update_type == "snapshot" {
            vec![msg.data]
        } else {
            let delta: InstrumentDelta = serde_json::from_value(msg.data)?;
            delta.update
        };

        let mut events = Vec::new();
        for record in records {
            let info: InstrumentRecord = serde_json::from_value(record)?;
            let Some(pair) = self.canonical(&info.symbol) else {
                continue;
            };
            let exchange_ts = numeric::iso8601_to_millis(&info.updated_at)?;
            let mut push = |kind, value| {
                events.push(CanonicalEvent::Metric(Metric {
                    pair: pair.clone(),
                    kind,
                    value,
                    exchange_ts,
                    receipt_ts,
                }));
            };
            // delta records are sparse: only emit what is present
            if let Some(oi) = info.open_interest {
                push(MetricKind::OpenInterest, Decimal::from(oi));
            }
            if let Some(index) = info.index_price_e4 {
                push(MetricKind::IndexPrice, numeric::decimal_scaled(index, 4));
            }
            if let Some(rate) = info.funding_rate_e6 {
                push(MetricKind::FundingRate, numeric::decimal_scaled(rate, 6));
            }
        }
        Ok(events)
    }
}

fn book_side(side: &str) -> Side {
    if side == "Buy" {
        Side::Bid
    } else {
        Side::Ask
    }
}

impl ExchangeAdapter for Bybit {
    fn id(&self) -> &'static str {
        "bybit"
    }

    fn ws_endpoint(&self) -> &str {
        &self.ws_endpoint
    }

    fn subscribe_payloads(&self) -> Vec<String> {
        let mut pairs: Vec<&Pair> = self.symbols.pairs().collect();
        pairs.sort_by_key(|p| p.as_str().to_string());
        pairs
            .into_iter()
            .flat_map(|pair| self.pair_subscribe_payloads(pair))
            .collect()
    }

    fn pair_subscribe_payloads(&self, pair: &Pair) -> Vec<String> {
        let Some(symbol) = self.symbols.to_exchange(pair) else {
            return Vec::new();
        };
        CHANNELS
            .iter()
            .map(|chan| {
                serde_json::json!({
                    "op": "subscribe",
                    "args": [format!("{chan}.{symbol}")],
                })
                .to_string()
            })
            .collect()
    }

    fn route(&mut self, raw: &str, receipt_ts: u64) -> Result<Routed> {
        let value: Value = serde_json::from_str(raw)?;

        if let Some(success) = value.get("success") {
            // subscription ack
            if success.as_bool() == Some(true) {
                debug!(exchange = self.id(), "Subscription success");
            } else {
                error!(exchange = self.id(), msg = raw, "Error from exchange");
            }
            return Ok(Routed::default());
        }

        let topic = value
            .get("topic")
            .and_then(Value::as_str)
            .map(str::to_string);
        let events = match topic.as_deref() {
            Some(t) if t.starts_with("trade") => self.handle_trades(value, receipt_ts)?,
            Some(t) if t.starts_with("orderBook") => self.handle_book(value, receipt_ts)?,
            Some(t) if t.starts_with("instrument_info") => {
                self.handle_instrument_info(value, receipt_ts)?
            }
            _ => {
                warn!(exchange = self.id(), msg = raw, "Invalid message type");
                return Err(FeedError::UnknownMessage(raw.to_string()));
            }
        };
        Ok(Routed::events(events))
    }

    fn reset(&mut self) {
        self.store.reset_all();
    }

    fn reset_pair(&mut self, pair: &Pair) {
        self.store.reset(pair);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn adapter() -> Bybit {
        Bybit::new(&[Pair::from("BTC-USD")], DEFAULT_WS_ENDPOINT)
    }

    fn snapshot_frame() -> &'static str {
        r#"{
            "topic": "orderBookL2_25.BTCUSD",
            "type": "snapshot",
            "data": [
                {"price": "8999.00", "symbol": "BTCUSD", "id": 89990000, "side": "Buy", "size": 10},
                {"price": "9000.00", "symbol": "BTCUSD", "id": 90000000, "side": "Sell", "size": 5}
            ],
            "cross_seq": 100,
            "timestamp_e6": 1578853524091081
        }"#
    }

    #[test]
    fn book_snapshot_produces_forced_update() {
        let mut adapter = adapter();
        let routed = adapter.route(snapshot_frame(), 42).unwrap();

        assert_eq!(routed.events.len(), 1);
        let CanonicalEvent::Book(update) = &routed.events[0] else {
            panic!("expected book update");
        };
        assert_eq!(update.pair, Pair::from("BTC-USD"));
        assert!(update.forced);
        assert_eq!(update.delta.len(), 2);
        assert_eq!(update.exchange_ts, 1_578_853_524_091);
        assert_eq!(update.receipt_ts, 42);

        let book = adapter.store.book(&Pair::from("BTC-USD")).unwrap();
        assert_eq!(book.best_bid(), Some(dec!(8999.00)));
        assert_eq!(book.best_ask(), Some(dec!(9000.00)));
        assert_eq!(book.last_seq(), Some(100));
    }

    #[test]
    fn book_delta_merges_delete_update_insert() {
        let mut adapter = adapter();
        adapter.route(snapshot_frame(), 0).unwrap();

        let delta = r#"{
            "topic": "orderBookL2_25.BTCUSD",
            "type": "delta",
            "data": {
                "delete": [{"price": "8999.00", "symbol": "BTCUSD", "side": "Buy"}],
                "update": [{"price": "9000.00", "symbol": "BTCUSD", "side": "Sell", "size": 7}],
                "insert": [{"price": "8998.50", "symbol": "BTCUSD", "side": "Buy", "size": 3}]
            },
            "cross_seq": 101,
            "timestamp_e6": 1578853525000000
        }"#;
        let routed = adapter.route(delta, 0).unwrap();

        let CanonicalEvent::Book(update) = &routed.events[0] else {
            panic!("expected book update");
        };
        assert!(!update.forced);
        assert_eq!(
            update.delta.changes,
            vec![
                LevelChange { side: Side::Bid, price: dec!(8999.00), size: dec!(0) },
                LevelChange { side: Side::Ask, price: dec!(9000.00), size: dec!(7) },
                LevelChange { side: Side::Bid, price: dec!(8998.50), size: dec!(3) },
            ]
        );

        let book = adapter.store.book(&Pair::from("BTC-USD")).unwrap();
        assert_eq!(book.best_bid(), Some(dec!(8998.50)));
        assert_eq!(book.size_at(Side::Ask, dec!(9000.00)), Some(dec!(7)));
    }

    #[test]
    fn reordered_cross_seq_surfaces_a_gap() {
        let mut adapter = adapter();
        adapter.route(snapshot_frame(), 0).unwrap();

        let stale = r#"{
            "topic": "orderBookL2_25.BTCUSD",
            "type": "delta",
            "data": {"delete": [], "update": [], "insert": [{"price": "8990.00", "side": "Buy", "size": 1}]},
            "cross_seq": 99,
            "timestamp_e6": 1578853525000000
        }"#;
        let err = adapter.route(stale, 0).unwrap_err();
        assert!(matches!(
            err,
            FeedError::SequenceGap { expected: 100, got: 99, .. }
        ));
    }

    #[test]
    fn delta_before_snapshot_is_dropped() {
        let mut adapter = adapter();
        let delta = r#"{
            "topic": "orderBookL2_25.BTCUSD",
            "type": "delta",
            "data": {"delete": [], "update": [], "insert": [{"price": "8990.00", "side": "Buy", "size": 1}]},
            "cross_seq": 99,
            "timestamp_e6": 1578853525000000
        }"#;
        let routed = adapter.route(delta, 0).unwrap();
        assert!(routed.is_empty());
    }

    #[test]
    fn trades_normalize_side_and_decimals() {
        let mut adapter = adapter();
        let frame = r#"{
            "topic": "trade.BTCUSD",
            "data": [
                {"timestamp": "2019-01-22T15:04:33.461Z", "trade_time_ms": 1548169473461,
                 "symbol": "BTCUSD", "side": "Buy", "size": 980, "price": 3563.5,
                 "tick_direction": "PlusTick", "trade_id": "9d229f26", "cross_seq": 163261271},
                {"timestamp": "2019-01-22T15:04:33.471Z", "trade_time_ms": 1548169473471,
                 "symbol": "BTCUSD", "side": "Sell", "size": 10, "price": 3563.0,
                 "tick_direction": "MinusTick", "trade_id": "9d229f27", "cross_seq": 163261272}
            ]
        }"#;
        let routed = adapter.route(frame, 7).unwrap();
        assert_eq!(routed.events.len(), 2);

        let CanonicalEvent::Trade(first) = &routed.events[0] else {
            panic!("expected trade");
        };
        assert_eq!(first.side, TradeSide::Buy);
        assert_eq!(first.price, dec!(3563.5));
        assert_eq!(first.amount, dec!(980));
        assert_eq!(first.id.as_deref(), Some("9d229f26"));
        assert_eq!(first.exchange_ts, 1_548_169_473_461);
        assert_eq!(first.receipt_ts, 7);

        let CanonicalEvent::Trade(second) = &routed.events[1] else {
            panic!("expected trade");
        };
        assert_eq!(second.side, TradeSide::Sell);
    }

    #[test]
    fn instrument_snapshot_emits_present_metrics() {
        let mut adapter = adapter();
        let frame = r#"{
            "topic": "instrument_info.100ms.BTCUSD",
            "type": "snapshot",
            "data": {
                "id": 1, "symbol": "BTCUSD",
                "open_interest": 154418471,
                "index_price_e4": 81172800,
                "funding_rate_e6": 100,
                "updated_at": "2020-01-12T18:25:16Z"
            },
            "cross_seq": 1053192634,
            "timestamp_e6": 1578853524091081
        }"#;
        let routed = adapter.route(frame, 0).unwrap();
        assert_eq!(routed.events.len(), 3);

        let kinds: Vec<MetricKind> = routed
            .events
            .iter()
            .map(|e| match e {
                CanonicalEvent::Metric(m) => m.kind,
                _ => panic!("expected metric"),
            })
            .collect();
        assert_eq!(
            kinds,
            vec![MetricKind::OpenInterest, MetricKind::IndexPrice, MetricKind::FundingRate]
        );

        let CanonicalEvent::Metric(index) = &routed.events[1] else {
            panic!()
        };
        assert_eq!(index.value, dec!(8117.2800));
        assert_eq!(index.exchange_ts, 1_578_853_516_000);
    }

    #[test]
    fn sparse_instrument_delta_emits_only_present_fields() {
        let mut adapter = adapter();
        let frame = r#"{
            "topic": "instrument_info.100ms.BTCUSD",
            "type": "delta",
            "data": {
                "delete": [],
                "update": [{"id": 1, "symbol": "BTCUSD", "open_interest": 154418500,
                            "updated_at": "2020-01-12T18:25:25Z"}],
                "insert": []
            },
            "cross_seq": 1053192657,
            "timestamp_e6": 1578853525691123
        }"#;
        let routed = adapter.route(frame, 0).unwrap();
        assert_eq!(routed.events.len(), 1);
        let CanonicalEvent::Metric(metric) = &routed.events[0] else {
            panic!("expected metric");
        };
        assert_eq!(metric.kind, MetricKind::OpenInterest);
        assert_eq!(metric.value, dec!(154418500));
    }

    #[test]
    fn acks_are_silently_dropped() {
        let mut adapter = adapter();
        let routed = adapter
            .route(r#"{"success": true, "request": {"op": "subscribe"}}"#, 0)
            .unwrap();
        assert!(routed.is_empty());
    }

    #[test]
    fn unknown_message_is_an_error_without_events() {
        let mut adapter = adapter();
        let err = adapter.route(r#"{"type": "foo"}"#, 0).unwrap_err();
        assert!(matches!(err, FeedError::UnknownMessage(_)));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let mut adapter = adapter();
        assert!(matches!(
            adapter.route("not json", 0),
            Err(FeedError::Parse(_))
        ));
    }

    #[test]
    fn subscribe_payloads_cover_every_channel() {
        let adapter = adapter();
        let payloads = adapter.subscribe_payloads();
        assert_eq!(payloads.len(), 3);
        assert!(payloads[0].contains("trade.BTCUSD"));
        assert!(payloads[1].contains("orderBookL2_25.BTCUSD"));
        assert!(payloads[2].contains("instrument_info.100ms.BTCUSD"));
    }
}
