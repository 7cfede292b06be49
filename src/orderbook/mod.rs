//! Order book reconciliation
//!
//! Per-pair book state with snapshot/incremental semantics and sequence
//! continuity checking.

mod book;
mod store;

pub use book::{OrderBook, SeqGap, SeqPolicy};
pub use store::{Applied, AppliedDelta, BookState, OrderBookStore, PendingUpdate};
