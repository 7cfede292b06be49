//! Per-pair book store and reconciler
//!
//! Owns every book for one exchange connection and drives the per-pair state
//! machine: Uninitialized -> PendingSnapshot -> Active -> Desynced.
//! Incrementals that arrive before a snapshot are buffered (bounded, drop
//! oldest) and replayed or discarded by sequence comparison once the
//! snapshot lands.

use std::collections::{HashMap, VecDeque};
use tracing::debug;

use super::{OrderBook, SeqPolicy};
use crate::error::{FeedError, Result};
use crate::events::{Delta, Level, LevelChange, Pair};

/// Lifecycle state of one pair's book
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BookState {
    Uninitialized,
    PendingSnapshot,
    Active,
    /// Terminal until an external reset
    Desynced,
}

/// An incremental buffered while the pair awaits its bootstrap snapshot
#[derive(Debug, Clone)]
pub struct PendingUpdate {
    pub changes: Vec<LevelChange>,
    pub seq: u64,
    pub exchange_ts: u64,
}

/// Delta plus the metadata needed to emit a canonical book update
#[derive(Debug, Clone)]
pub struct AppliedDelta {
    pub delta: Delta,
    pub forced: bool,
    pub exchange_ts: u64,
}

/// Outcome of feeding one incremental into the store
#[derive(Debug)]
pub enum Applied {
    /// Applied to an active book
    Update(AppliedDelta),
    /// Buffered while awaiting a snapshot; `snapshot_needed` is true only on
    /// the Uninitialized -> PendingSnapshot transition
    Buffered { snapshot_needed: bool },
    /// Pair is desynced, update dropped
    Dropped,
}

enum Slot {
    Pending(VecDeque<PendingUpdate>),
    Active(OrderBook),
    Desynced,
}

/// Book store for one exchange connection.
///
/// Never shared: each connection's reconciler owns its store exclusively and
/// applies messages one at a time.
pub struct OrderBookStore {
    books: HashMap<Pair, Slot>,
    policy: SeqPolicy,
    buffer_capacity: usize,
}

impl OrderBookStore {
    pub fn new(policy: SeqPolicy, buffer_capacity: usize) -> Self {
        Self {
            books: HashMap::new(),
            policy,
            buffer_capacity,
        }
    }

    pub fn state(&self, pair: &Pair) -> BookState {
        match self.books.get(pair) {
            None => BookState::Uninitialized,
            Some(Slot::Pending(_)) => BookState::PendingSnapshot,
            Some(Slot::Active(_)) => BookState::Active,
            Some(Slot::Desynced) => BookState::Desynced,
        }
    }

    /// Active book for a pair, if any
    pub fn book(&self, pair: &Pair) -> Option<&OrderBook> {
        match self.books.get(pair) {
            Some(Slot::Active(book)) => Some(book),
            _ => None,
        }
    }

    /// Replace the pair's book with a snapshot and replay anything buffered
    /// during bootstrap.
    ///
    /// The first returned delta is the forced snapshot delta; the rest come
    /// from buffered incrementals newer than the snapshot, in order. Buffered
    /// updates at or below the snapshot's sequence are discarded. A gap while
    /// replaying desyncs the pair and surfaces as `SequenceGap`.
    pub fn apply_snapshot(
        &mut self,
        pair: &Pair,
        bids: &[Level],
        asks: &[Level],
        seq: u64,
        exchange_ts: u64,
    ) -> Result<Vec<AppliedDelta>> {
        let buffered = match self.books.remove(pair) {
            Some(Slot::Pending(buffer)) => buffer,
            _ => VecDeque::new(),
        };

        let mut book = OrderBook::new();
        let snapshot_delta = book.apply_snapshot(bids, asks, seq);
        let mut applied = vec![AppliedDelta {
            delta: snapshot_delta,
            forced: true,
            exchange_ts,
        }];

        for update in buffered {
            if update.seq <= seq {
                debug!(pair = %pair, seq = update.seq, "Discarding stale buffered update");
                continue;
            }
            match book.apply_incremental(&update.changes, update.seq, self.policy) {
                Ok(delta) => applied.push(AppliedDelta {
                    delta,
                    forced: false,
                    exchange_ts: update.exchange_ts,
                }),
                Err(gap) => {
                    self.books.insert(pair.clone(), Slot::Desynced);
                    return Err(FeedError::SequenceGap {
                        pair: pair.clone(),
                        expected: gap.expected,
                        got: gap.got,
                    });
                }
            }
        }

        self.books.insert(pair.clone(), Slot::Active(book));
        Ok(applied)
    }

    /// Feed one incremental through the state machine.
    pub fn apply_incremental(
        &mut self,
        pair: &Pair,
        changes: Vec<LevelChange>,
        seq: u64,
        exchange_ts: u64,
    ) -> Result<Applied> {
        match self.books.get_mut(pair) {
            None => {
                let mut buffer = VecDeque::new();
                buffer.push_back(PendingUpdate {
                    changes,
                    seq,
                    exchange_ts,
                });
                self.books.insert(pair.clone(), Slot::Pending(buffer));
                Ok(Applied::Buffered {
                    snapshot_needed: true,
                })
            }
            Some(Slot::Pending(buffer)) => {
                buffer.push_back(PendingUpdate {
                    changes,
                    seq,
                    exchange_ts,
                });
                if buffer.len() > self.buffer_capacity {
                    buffer.pop_front();
                    debug!(pair = %pair, "Bootstrap buffer full, dropped oldest update");
                }
                Ok(Applied::Buffered {
                    snapshot_needed: false,
                })
            }
            Some(Slot::Active(book)) => {
                match book.apply_incremental(&changes, seq, self.policy) {
                    Ok(delta) => Ok(Applied::Update(AppliedDelta {
                        delta,
                        forced: false,
                        exchange_ts,
                    })),
                    Err(gap) => {
                        self.books.insert(pair.clone(), Slot::Desynced);
                        Err(FeedError::SequenceGap {
                            pair: pair.clone(),
                            expected: gap.expected,
                            got: gap.got,
                        })
                    }
                }
            }
            Some(Slot::Desynced) => {
                debug!(pair = %pair, seq, "Dropping update for desynced pair");
                Ok(Applied::Dropped)
            }
        }
    }

    /// Drop all state for one pair (reconnect or resubscribe)
    pub fn reset(&mut self, pair: &Pair) {
        self.books.remove(pair);
    }

    /// Drop all state (disconnect)
    pub fn reset_all(&mut self) {
        self.books.clear();
    }
}
