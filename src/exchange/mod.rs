//! Per-exchange adapters
//!
//! Each exchange implements `ExchangeAdapter`: it classifies raw frames and
//! dispatches them to its book reconciler, trade normalizer, or metric
//! normalizer, emitting canonical events. The connection runner is generic
//! over this trait.

pub mod bitmax;
pub mod bybit;

pub use bitmax::Bitmax;
pub use bybit::Bybit;

use crate::error::Result;
use crate::events::{CanonicalEvent, Pair};

/// Output of routing one raw frame
#[derive(Debug, Default)]
pub struct Routed {
    pub events: Vec<CanonicalEvent>,
    /// Pairs that transitioned to PendingSnapshot and need a bootstrap fetch
    pub snapshot_requests: Vec<Pair>,
}

impl Routed {
    pub fn events(events: Vec<CanonicalEvent>) -> Self {
        Self {
            events,
            snapshot_requests: Vec::new(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty() && self.snapshot_requests.is_empty()
    }
}

/// One exchange connection's message router and normalizers.
///
/// Control frames (acks, pongs) are recognized and silently dropped.
/// Unclassifiable frames fail with `UnknownMessage`; malformed fields fail
/// with `Parse` — both are logged and skipped by the caller. `SequenceGap`
/// is the one error the caller must act on (reset + resubscribe the pair).
pub trait ExchangeAdapter: Send {
    fn id(&self) -> &'static str;

    fn ws_endpoint(&self) -> &str;

    /// Subscription payloads for every configured pair
    fn subscribe_payloads(&self) -> Vec<String>;

    /// Subscription payloads for a single pair (gap recovery)
    fn pair_subscribe_payloads(&self, pair: &Pair) -> Vec<String>;

    /// Classify and process one raw frame
    fn route(&mut self, raw: &str, receipt_ts: u64) -> Result<Routed>;

    /// REST URL for a bootstrap snapshot, if this exchange needs one
    fn snapshot_url(&self, pair: &Pair) -> Option<String> {
        let _ = pair;
        None
    }

    /// Apply a fetched bootstrap snapshot body and replay buffered updates
    fn apply_snapshot_body(
        &mut self,
        pair: &Pair,
        body: &str,
        receipt_ts: u64,
    ) -> Result<Vec<CanonicalEvent>> {
        let _ = (pair, body, receipt_ts);
        Ok(Vec::new())
    }

    /// Drop all book state (disconnect)
    fn reset(&mut self);

    /// Drop one pair's book state (resubscribe after a gap)
    fn reset_pair(&mut self, pair: &Pair);
}
