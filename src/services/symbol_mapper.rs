use async_trait::async_trait;

use crate::models::AssetClass;

/// Universal-symbol ↔ broker-symbol lookup. The concrete
/// implementation -- typically backed by a per-broker configuration table --
/// lives outside this core; this core only depends on the trait.
#[async_trait]
pub trait SymbolMapper: Send + Sync {
    /// Resolve `universal_symbol` (e.g. `"BTCUSDT"`) to its broker symbol, or
    /// `None` if this broker account does not offer it.
    async fn to_broker_symbol(&self, universal_symbol: &str) -> Option<String>;

    /// Classify `universal_symbol` into an asset class.
    async fn asset_class(&self, universal_symbol: &str) -> Option<AssetClass>;
}

/// Identity mapper used in tests and as a development fallback: every
/// universal symbol passes through unchanged and is classified as `Crypto`.
pub struct IdentitySymbolMapper;

#[async_trait]
impl SymbolMapper for IdentitySymbolMapper {
    async fn to_broker_symbol(&self, universal_symbol: &str) -> Option<String> {
        Some(universal_symbol.to_string())
    }

    async fn asset_class(&self, _universal_symbol: &str) -> Option<AssetClass> {
        Some(AssetClass::Crypto)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn identity_mapper_passes_through() {
        let mapper = IdentitySymbolMapper;
        assert_eq!(mapper.to_broker_symbol("BTCUSDT").await, Some("BTCUSDT".to_string()));
        assert_eq!(mapper.asset_class("BTCUSDT").await, Some(AssetClass::Crypto));
    }
}
