//! Symbol normalization
//!
//! Pure bidirectional lookup between exchange-native symbols and canonical
//! pair identifiers, built once from the configured pair list.

use std::collections::HashMap;

use crate::events::Pair;

/// Bidirectional symbol table for one exchange connection
#[derive(Debug, Default)]
pub struct SymbolMap {
    to_canonical: HashMap<String, Pair>,
    to_exchange: HashMap<Pair, String>,
}

impl SymbolMap {
    /// Build from canonical pairs and an exchange-specific rewrite rule
    pub fn new<F>(pairs: &[Pair], to_exchange: F) -> Self
    where
        F: Fn(&Pair) -> String,
    {
        let mut map = SymbolMap::default();
        for pair in pairs {
            let symbol = to_exchange(pair);
            map.to_canonical.insert(symbol.clone(), pair.clone());
            map.to_exchange.insert(pair.clone(), symbol);
        }
        map
    }

    pub fn to_canonical(&self, exchange_symbol: &str) -> Option<&Pair> {
        self.to_canonical.get(exchange_symbol)
    }

    pub fn to_exchange(&self, pair: &Pair) -> Option<&str> {
        self.to_exchange.get(pair).map(String::as_str)
    }

    pub fn pairs(&self) -> impl Iterator<Item = &Pair> {
        self.to_exchange.keys()
    }
}

/// Bybit symbols drop the separator: "BTC-USD" -> "BTCUSD"
pub fn bybit_symbol(pair: &Pair) -> String {
    pair.as_str().replace('-', "")
}

/// Bitmax symbols use a slash: "BTC-USD" -> "BTC/USD"
pub fn bitmax_symbol(pair: &Pair) -> String {
    pair.as_str().replace('-', "/")
}
