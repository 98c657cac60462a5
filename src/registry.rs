//! Symbol Registry: the fixed set of tradable pairs, loaded once at start.

use std::collections::HashMap;

use crate::error::EngineError;

#[derive(Debug, Clone, Copy)]
pub struct SymbolSpec {
    pub base_price: f64,
    pub typical_spread: f64,
    pub decimals: u8,
}

#[derive(Debug, Clone)]
pub struct SymbolRegistry {
    table: HashMap<String, SymbolSpec>,
}

impl SymbolRegistry {
    pub fn new(entries: Vec<(&str, SymbolSpec)>) -> Self {
        let table = entries.into_iter().map(|(s, spec)| (s.to_string(), spec)).collect();
        Self { table }
    }

    /// The registry's default fixed set: three majors and a yen cross, with
    /// realistic base prices and decimal precisions.
    pub fn default_fx() -> Self {
        Self::new(vec![
            ("EURUSD", SymbolSpec { base_price: 1.0800, typical_spread: 0.0002, decimals: 5 }),
            ("GBPUSD", SymbolSpec { base_price: 1.2700, typical_spread: 0.0002, decimals: 5 }),
            ("USDJPY", SymbolSpec { base_price: 149.50, typical_spread: 0.02, decimals: 3 }),
            ("AUDUSD", SymbolSpec { base_price: 0.6600, typical_spread: 0.0002, decimals: 5 }),
        ])
    }

    /// Build a registry restricted to the given symbols, falling back to the
    /// default fixed set's specs for any name it recognizes.
    pub fn from_symbols(symbols: &[String]) -> Result<Self, EngineError> {
        let defaults = Self::default_fx();
        let mut table = HashMap::new();
        for sym in symbols {
            let spec = defaults.lookup(sym)?;
            table.insert(sym.clone(), *spec);
        }
        Ok(Self { table })
    }

    pub fn lookup(&self, symbol: &str) -> Result<&SymbolSpec, EngineError> {
        self.table.get(symbol).ok_or_else(|| EngineError::UnknownSymbol(symbol.to_string()))
    }

    pub fn symbols(&self) -> impl Iterator<Item = &String> {
        self.table.keys()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.table.contains_key(symbol)
    }
}
