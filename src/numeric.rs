//! Numeric codec
//!
//! Converts exchange wire values (decimal strings, scaled integers) into
//! `rust_decimal::Decimal` without ever routing through binary floating
//! point. The same input always yields a bit-identical value.
//!
//! JSON numbers are kept exact by `serde_json`'s `arbitrary_precision`
//! feature; fields that arrive as numbers annotate
//! `rust_decimal::serde::arbitrary_precision` so the raw digits are parsed
//! directly.

use chrono::DateTime;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::{FeedError, Result};

/// Parse a decimal string ("0.1", "8999.00") exactly
pub fn parse_decimal(s: &str) -> Result<Decimal> {
    Decimal::from_str(s).map_err(|e| FeedError::Parse(format!("bad decimal {s:?}: {e}")))
}

/// Decode a scaled integer, e.g. `price_e4` meaning price × 10⁴
pub fn decimal_scaled(raw: i64, scale: u32) -> Decimal {
    Decimal::new(raw, scale)
}

/// Microsecond timestamps (Bybit `timestamp_e6`) to epoch milliseconds
pub fn micros_to_millis(micros: u64) -> u64 {
    micros / 1_000
}

/// RFC 3339 / ISO-8601 timestamp string to epoch milliseconds
pub fn iso8601_to_millis(s: &str) -> Result<u64> {
    let dt = DateTime::parse_from_rfc3339(s)
        .map_err(|e| FeedError::Parse(format!("bad timestamp {s:?}: {e}")))?;
    Ok(dt.timestamp_millis() as u64)
}
