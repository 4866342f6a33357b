use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

/// Symbol metadata reported by `GET /api/v1/symbols`.
///
/// Cached under `mt4_symbols:<user_id>` with a 1-hour TTL.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SymbolInfo {
    pub symbol: String,
    pub description: String,
    pub digits: u32,
    pub point: Decimal,
    pub spread: Decimal,
    pub bid: Decimal,
    pub ask: Decimal,
}

/// Asset class the symbol mapper classifies a universal symbol into.
/// Consumed by out-of-scope strategy code; the core only passes it through.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum AssetClass {
    Forex,
    Commodities,
    Crypto,
}

/// Live bid/ask/spread snapshot from `GET /api/v1/price/<symbol>`.
/// Never cached -- scalping is latency-sensitive to stale prices.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct PriceQuote {
    pub bid: Decimal,
    pub ask: Decimal,
    pub spread: Decimal,
}
