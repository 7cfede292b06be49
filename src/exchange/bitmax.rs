//! Bitmax adapter
//!
//! Routes on the `m` field: `depth`, `marketTrades`, and the control
//! messages `pong`/`connected`/`sub`. Depth updates carry a contiguous
//! `seqnum`, so the book bootstraps from a REST snapshot: incrementals seen
//! before the snapshot are buffered by the store and replayed or discarded
//! by sequence comparison once the fetch completes.

use rust_decimal::Decimal;
use serde::Deserialize;
use serde_json::Value;
use tracing::{debug, warn};

use super::{ExchangeAdapter, Routed};
use crate::error::{FeedError, Result};
use crate::events::{
    BookUpdate, CanonicalEvent, Level, LevelChange, Pair, Side, Trade, TradeSide,
};
use crate::orderbook::{Applied, OrderBookStore, SeqPolicy};
use crate::symbols::{bitmax_symbol, SymbolMap};

pub const DEFAULT_WS_ENDPOINT: &str = "wss://bitmax.io/0/api/pro/v1/stream";
pub const DEFAULT_REST_ENDPOINT: &str = "https://bitmax.io/api/pro/v1";

const CHANNELS: &[&str] = &["depth", "trades"];

pub struct Bitmax {
    symbols: SymbolMap,
    store: OrderBookStore,
    ws_endpoint: String,
    rest_endpoint: String,
}

#[derive(Debug, Deserialize)]
struct DepthMsg {
    symbol: String,
    data: DepthData,
}

#[derive(Debug, Deserialize)]
struct DepthData {
    ts: u64,
    seqnum: u64,
    /// `[price, size]` string pairs; size "0" removes the level
    #[serde(default)]
    bids: Vec<(Decimal, Decimal)>,
    #[serde(default)]
    asks: Vec<(Decimal, Decimal)>,
}

#[derive(Debug, Deserialize)]
struct TradesMsg {
    #[serde(rename = "s")]
    symbol: String,
    trades: Vec<TradeRecord>,
}

#[derive(Debug, Deserialize)]
struct TradeRecord {
    #[serde(rename = "p")]
    price: Decimal,
    #[serde(rename = "q")]
    amount: Decimal,
    #[serde(rename = "t")]
    ts: u64,
    /// Maker-is-buyer: true means the aggressing side sold
    bm: bool,
}

#[derive(Debug, Deserialize)]
struct SnapshotEnvelope {
    data: SnapshotOuter,
}

#[derive(Debug, Deserialize)]
struct SnapshotOuter {
    data: DepthData,
}

impl Bitmax {
    pub fn new(
        pairs: &[Pair],
        ws_endpoint: impl Into<String>,
        rest_endpoint: impl Into<String>,
        buffer_capacity: usize,
    ) -> Self {
        Self {
            symbols: SymbolMap::new(pairs, bitmax_symbol),
            store: OrderBookStore::new(SeqPolicy::Contiguous, buffer_capacity),
            ws_endpoint: ws_endpoint.into(),
            rest_endpoint: rest_endpoint.into(),
        }
    }

    fn canonical(&self, exchange_symbol: &str) -> Option<Pair> {
        let pair = self.symbols.to_canonical(exchange_symbol);
        if pair.is_none() {
            warn!(exchange = "bitmax", symbol = exchange_symbol, "Unknown symbol");
        }
        pair.cloned()
    }

    fn handle_depth(&mut self, value: Value, receipt_ts: u64) -> Result<Routed> {
        let msg: DepthMsg = serde_json::from_value(value)?;
        let Some(pair) = self.canonical(&msg.symbol) else {
            return Ok(Routed::default());
        };

        let changes = side_changes(&msg.data);
        let mut routed = Routed::default();
        match self
            .store
            .apply_incremental(&pair, changes, msg.data.seqnum, msg.data.ts)?
        {
            Applied::Update(applied) => {
                routed.events.push(CanonicalEvent::Book(BookUpdate {
                    pair,
                    delta: applied.delta,
                    forced: applied.forced,
                    exchange_ts: applied.exchange_ts,
                    receipt_ts,
                }));
            }
            Applied::Buffered { snapshot_needed } => {
                if snapshot_needed {
                    debug!(pair = %pair, "Book uninitialized, requesting snapshot");
                    routed.snapshot_requests.push(pair);
                }
            }
            Applied::Dropped => {}
        }
        Ok(routed)
    }

    fn handle_trades(&mut self, value: Value, receipt_ts: u64) -> Result<Vec<CanonicalEvent>> {
        let msg: TradesMsg = serde_json::from_value(value)?;
        let Some(pair) = self.canonical(&msg.symbol) else {
            return Ok(Vec::new());
        };
        Ok(msg
            .trades
            .into_iter()
            .map(|trade| {
                CanonicalEvent::Trade(Trade {
                    pair: pair.clone(),
                    side: if trade.bm {
                        TradeSide::Sell
                    } else {
                        TradeSide::Buy
                    },
                    amount: trade.amount,
                    price: trade.price,
                    id: None,
                    exchange_ts: trade.ts,
                    receipt_ts,
                })
            })
            .collect())
    }
}

fn side_changes(data: &DepthData) -> Vec<LevelChange> {
    let tagged = |side: Side, levels: &[(Decimal, Decimal)]| {
        levels
            .iter()
            .map(move |(price, size)| LevelChange {
                side,
                price: *price,
                size: *size,
            })
            .collect::<Vec<_>>()
    };
    let mut changes = tagged(Side::Bid, &data.bids);
    changes.extend(tagged(Side::Ask, &data.asks));
    changes
}

impl ExchangeAdapter for Bitmax {
    fn id(&self) -> &'static str {
        "bitmax"
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
                    "op": "sub",
                    "id": "marketfeed",
                    "ch": format!("{chan}:{symbol}"),
                })
                .to_string()
            })
            .collect()
    }

    fn route(&mut self, raw: &str, receipt_ts: u64) -> Result<Routed> {
        let value: Value = serde_json::from_str(raw)?;
        let kind = value.get("m").and_then(Value::as_str).map(str::to_string);

        match kind.as_deref() {
            Some("depth") => self.handle_depth(value, receipt_ts),
            Some("marketTrades") => Ok(Routed::events(self.handle_trades(value, receipt_ts)?)),
            Some("pong") | Some("connected") | Some("sub") => {
                debug!(exchange = self.id(), "Control message");
                Ok(Routed::default())
            }
            _ => {
                warn!(exchange = self.id(), msg = raw, "Invalid message type");
                Err(FeedError::UnknownMessage(raw.to_string()))
            }
        }
    }

    fn snapshot_url(&self, pair: &Pair) -> Option<String> {
        let symbol = self.symbols.to_exchange(pair)?;
        Some(format!("{}/depth?symbol={}", self.rest_endpoint, symbol))
    }

    fn apply_snapshot_body(
        &mut self,
        pair: &Pair,
        body: &str,
        receipt_ts: u64,
    ) -> Result<Vec<CanonicalEvent>> {
        let envelope: SnapshotEnvelope = serde_json::from_str(body)?;
        let data = envelope.data.data;
        let bids: Vec<Level> = data
            .bids
            .iter()
            .map(|(price, size)| Level {
                price: *price,
                size: *size,
            })
            .collect();
        let asks: Vec<Level> = data
            .asks
            .iter()
            .map(|(price, size)| Level {
                price: *price,
                size: *size,
            })
            .collect();

        let applied = self
            .store
            .apply_snapshot(pair, &bids, &asks, data.seqnum, data.ts)?;
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
    use crate::orderbook::BookState;
    use rust_decimal_macros::dec;

    fn adapter() -> Bitmax {
        Bitmax::new(
            &[Pair::from("BTC-USDT")],
            DEFAULT_WS_ENDPOINT,
            DEFAULT_REST_ENDPOINT,
            64,
        )
    }

    fn depth_frame(seqnum: u64, bids: &str, asks: &str) -> String {
        format!(
            r#"{{"m": "depth", "symbol": "BTC/USDT",
                 "data": {{"ts": 1578853524000, "seqnum": {seqnum}, "bids": {bids}, "asks": {asks}}}}}"#
        )
    }

    fn snapshot_body(seqnum: u64) -> String {
        format!(
            r#"{{"code": 0, "data": {{"m": "depth-snapshot", "symbol": "BTC/USDT",
                 "data": {{"ts": 1578853523000, "seqnum": {seqnum},
                           "bids": [["9000.0", "5"], ["8999.5", "3"]],
                           "asks": [["9000.5", "2"]]}}}}}}"#
        )
    }

    #[test]
    fn depth_before_snapshot_buffers_and_requests_bootstrap() {
        let mut adapter = adapter();
        let routed = adapter
            .route(&depth_frame(11, r#"[["9000.0", "1"]]"#, "[]"), 0)
            .unwrap();

        assert!(routed.events.is_empty());
        assert_eq!(routed.snapshot_requests, vec![Pair::from("BTC-USDT")]);
        assert_eq!(
            adapter.store.state(&Pair::from("BTC-USDT")),
            BookState::PendingSnapshot
        );

        // second buffered update does not re-request
        let routed = adapter
            .route(&depth_frame(12, r#"[["8999.5", "0"]]"#, "[]"), 0)
            .unwrap();
        assert!(routed.snapshot_requests.is_empty());
    }

    #[test]
    fn snapshot_applies_and_replays_buffered_updates() {
        let mut adapter = adapter();
        let pair = Pair::from("BTC-USDT");
        // buffered: seq 10 (stale vs snapshot), 11 removes a bid
        adapter
            .route(&depth_frame(10, r#"[["1.0", "1"]]"#, "[]"), 0)
            .unwrap();
        adapter
            .route(&depth_frame(11, r#"[["8999.5", "0"]]"#, "[]"), 0)
            .unwrap();

        let events = adapter
            .apply_snapshot_body(&pair, &snapshot_body(10), 5)
            .unwrap();

        assert_eq!(events.len(), 2);
        let CanonicalEvent::Book(snapshot) = &events[0] else {
            panic!("expected book update");
        };
        assert!(snapshot.forced);
        assert_eq!(snapshot.delta.len(), 3);
        let CanonicalEvent::Book(replayed) = &events[1] else {
            panic!("expected book update");
        };
        assert!(!replayed.forced);

        let book = adapter.store.book(&pair).unwrap();
        assert_eq!(book.last_seq(), Some(11));
        assert_eq!(book.size_at(Side::Bid, dec!(8999.5)), None);
        assert_eq!(book.size_at(Side::Bid, dec!(9000.0)), Some(dec!(5)));
        // the stale seq-10 update was discarded, not applied
        assert_eq!(book.size_at(Side::Bid, dec!(1.0)), None);
    }

    #[test]
    fn contiguous_gap_surfaces_and_leaves_book_unchanged() {
        let mut adapter = adapter();
        let pair = Pair::from("BTC-USDT");
        adapter.apply_snapshot_body(&pair, &snapshot_body(10), 0).unwrap();

        let before = adapter.store.book(&pair).unwrap().clone();
        let err = adapter
            .route(&depth_frame(12, r#"[["9000.0", "4"]]"#, "[]"), 0)
            .unwrap_err();
        assert!(matches!(
            err,
            FeedError::SequenceGap { expected: 11, got: 12, .. }
        ));
        assert_eq!(adapter.store.state(&pair), BookState::Desynced);
        // gap check ran before any mutation; nothing was left half-applied
        assert!(adapter.store.book(&pair).is_none());
        assert_eq!(before.size_at(Side::Bid, dec!(9000.0)), Some(dec!(5)));
    }

    #[test]
    fn contiguous_updates_apply_in_order() {
        let mut adapter = adapter();
        let pair = Pair::from("BTC-USDT");
        adapter.apply_snapshot_body(&pair, &snapshot_body(10), 0).unwrap();

        let routed = adapter
            .route(&depth_frame(11, r#"[["9000.0", "0"], ["8998.0", "4"]]"#, r#"[["9000.5", "1"]]"#), 3)
            .unwrap();
        let CanonicalEvent::Book(update) = &routed.events[0] else {
            panic!("expected book update");
        };
        assert_eq!(
            update.delta.changes,
            vec![
                LevelChange { side: Side::Bid, price: dec!(9000.0), size: dec!(0) },
                LevelChange { side: Side::Bid, price: dec!(8998.0), size: dec!(4) },
                LevelChange { side: Side::Ask, price: dec!(9000.5), size: dec!(1) },
            ]
        );

        let book = adapter.store.book(&pair).unwrap();
        assert_eq!(book.best_bid(), Some(dec!(8999.5)));
        assert_eq!(book.size_at(Side::Ask, dec!(9000.5)), Some(dec!(1)));
    }

    #[test]
    fn trades_derive_side_from_maker_flag() {
        let mut adapter = adapter();
        let frame = r#"{"m": "marketTrades", "s": "BTC/USDT",
            "trades": [
                {"p": "0.1", "q": "100", "t": 1578853524000, "bm": true},
                {"p": "0.2", "q": "50", "t": 1578853524001, "bm": false}
            ]}"#;
        let routed = adapter.route(frame, 9).unwrap();
        assert_eq!(routed.events.len(), 2);

        let CanonicalEvent::Trade(sell) = &routed.events[0] else {
            panic!("expected trade");
        };
        // maker was the buyer, so the aggressor sold
        assert_eq!(sell.side, TradeSide::Sell);
        assert_eq!(sell.price, dec!(0.1));
        assert_eq!(sell.amount, dec!(100));
        assert_eq!(sell.receipt_ts, 9);

        let CanonicalEvent::Trade(buy) = &routed.events[1] else {
            panic!("expected trade");
        };
        assert_eq!(buy.side, TradeSide::Buy);
    }

    #[test]
    fn trade_price_decoding_is_exact() {
        let mut adapter = adapter();
        let frame = r#"{"m": "marketTrades", "s": "BTC/USDT",
            "trades": [{"p": "0.1", "q": "1", "t": 0, "bm": false}]}"#;
        let routed = adapter.route(frame, 0).unwrap();
        let CanonicalEvent::Trade(trade) = &routed.events[0] else {
            panic!("expected trade");
        };
        let reference = crate::numeric::parse_decimal("0.1").unwrap();
        assert_eq!(trade.price, reference);
        assert_eq!(trade.price.serialize(), reference.serialize());
    }

    #[test]
    fn control_messages_are_silently_dropped() {
        let mut adapter = adapter();
        for raw in [
            r#"{"m": "pong"}"#,
            r#"{"m": "connected", "type": "unauth"}"#,
            r#"{"m": "sub", "ch": "depth:BTC/USDT"}"#,
        ] {
            let routed = adapter.route(raw, 0).unwrap();
            assert!(routed.is_empty());
        }
    }

    #[test]
    fn unknown_discriminator_is_an_error_without_events() {
        let mut adapter = adapter();
        for raw in [r#"{"m": "foo"}"#, r#"{"type": "foo"}"#] {
            let err = adapter.route(raw, 0).unwrap_err();
            assert!(matches!(err, FeedError::UnknownMessage(_)));
        }
    }

    #[test]
    fn snapshot_url_uses_exchange_symbol() {
        let adapter = adapter();
        assert_eq!(
            adapter.snapshot_url(&Pair::from("BTC-USDT")).unwrap(),
            "https://bitmax.io/api/pro/v1/depth?symbol=BTC/USDT"
        );
        assert_eq!(adapter.snapshot_url(&Pair::from("XRP-USD")), None);
    }

    #[test]
    fn subscribe_payloads_cover_depth_and_trades() {
        let adapter = adapter();
        let payloads = adapter.subscribe_payloads();
        assert_eq!(payloads.len(), 2);
        assert!(payloads[0].contains("depth:BTC/USDT"));
        assert!(payloads[1].contains("trades:BTC/USDT"));
    }
}
