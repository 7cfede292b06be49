//! Core order book implementation
//!
//! Uses BTreeMap for sorted price level management. The sequence check runs
//! before any mutation so a rejected message never leaves a half-applied
//! book.

use rust_decimal::Decimal;
use std::cmp::Reverse;
use std::collections::BTreeMap;

use crate::events::{Delta, Level, LevelChange, Side};

/// How an exchange defines the accepted successor of `last_seq`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SeqPolicy {
    /// Exact `last_seq + 1` (Bitmax `seqnum`)
    Contiguous,
    /// Any `seq >= last_seq` (Bybit `cross_seq`)
    Monotonic,
}

/// Rejected incremental: `got` is not an accepted successor of the book's
/// sequence
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SeqGap {
    pub expected: u64,
    pub got: u64,
}

/// Order book for a single pair
#[derive(Debug, Clone, PartialEq)]
pub struct OrderBook {
    /// Bids sorted by price descending (highest first)
    bids: BTreeMap<Reverse<Decimal>, Decimal>,
    /// Asks sorted by price ascending (lowest first)
    asks: BTreeMap<Decimal, Decimal>,
    /// Last applied sequence number, unset before the first snapshot
    last_seq: Option<u64>,
}

impl OrderBook {
    pub fn new() -> Self {
        Self {
            bids: BTreeMap::new(),
            asks: BTreeMap::new(),
            last_seq: None,
        }
    }

    /// Replace the entire book with snapshot levels.
    ///
    /// Idempotent: repeating with the same input yields the same book and
    /// the same delta. Zero-size levels are never stored. The returned delta
    /// covers every stored level.
    pub fn apply_snapshot(&mut self, bids: &[Level], asks: &[Level], seq: u64) -> Delta {
        self.bids.clear();
        self.asks.clear();

        let mut delta = Delta::default();
        for level in bids {
            if level.size > Decimal::ZERO {
                self.bids.insert(Reverse(level.price), level.size);
                delta.push(Side::Bid, level.price, level.size);
            }
        }
        for level in asks {
            if level.size > Decimal::ZERO {
                self.asks.insert(level.price, level.size);
                delta.push(Side::Ask, level.price, level.size);
            }
        }

        self.last_seq = Some(seq);
        delta
    }

    /// Apply one incremental message atomically.
    ///
    /// The sequence check happens first; on a gap the book is left
    /// byte-for-byte unchanged. Size zero removes the level (a no-op if the
    /// price is absent, but still recorded in the delta and still advancing
    /// `last_seq`).
    pub fn apply_incremental(
        &mut self,
        changes: &[LevelChange],
        seq: u64,
        policy: SeqPolicy,
    ) -> Result<Delta, SeqGap> {
        if let Some(last) = self.last_seq {
            let accepted = match policy {
                SeqPolicy::Contiguous => seq == last + 1,
                SeqPolicy::Monotonic => seq >= last,
            };
            if !accepted {
                return Err(SeqGap {
                    expected: match policy {
                        SeqPolicy::Contiguous => last + 1,
                        SeqPolicy::Monotonic => last,
                    },
                    got: seq,
                });
            }
        }

        let mut delta = Delta::default();
        for change in changes {
            self.update_level(change.side, change.price, change.size);
            delta.push(change.side, change.price, change.size);
        }

        self.last_seq = Some(seq);
        Ok(delta)
    }

    fn update_level(&mut self, side: Side, price: Decimal, size: Decimal) {
        match side {
            Side::Bid => {
                if size.is_zero() {
                    self.bids.remove(&Reverse(price));
                } else {
                    self.bids.insert(Reverse(price), size);
                }
            }
            Side::Ask => {
                if size.is_zero() {
                    self.asks.remove(&price);
                } else {
                    self.asks.insert(price, size);
                }
            }
        }
    }

    /// Best (highest) bid price
    pub fn best_bid(&self) -> Option<Decimal> {
        self.bids.first_key_value().map(|(Reverse(p), _)| *p)
    }

    /// Best (lowest) ask price
    pub fn best_ask(&self) -> Option<Decimal> {
        self.asks.first_key_value().map(|(p, _)| *p)
    }

    pub fn last_seq(&self) -> Option<u64> {
        self.last_seq
    }

    /// Bid levels in descending price order
    pub fn bid_levels(&self) -> Vec<Level> {
        self.bids
            .iter()
            .map(|(Reverse(p), s)| Level { price: *p, size: *s })
            .collect()
    }

    /// Ask levels in ascending price order
    pub fn ask_levels(&self) -> Vec<Level> {
        self.asks
            .iter()
            .map(|(p, s)| Level { price: *p, size: *s })
            .collect()
    }

    pub fn size_at(&self, side: Side, price: Decimal) -> Option<Decimal> {
        match side {
            Side::Bid => self.bids.get(&Reverse(price)).copied(),
            Side::Ask => self.asks.get(&price).copied(),
        }
    }
}

impl Default for OrderBook {
    fn default() -> Self {
        Self::new()
    }
}
