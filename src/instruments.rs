// =============================================================================
// Instrument Registry
// =============================================================================
//
// Static mapping from a user-facing instrument key to its asset class and the
// symbol the serving provider expects. Immutable; safe to read from anywhere.
// =============================================================================

use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::types::AssetClass;

/// A resolved instrument.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Instrument {
    pub key: String,
    pub asset_class: AssetClass,
    pub provider_symbol: String,
    pub display_name: String,
}

struct Entry {
    key: &'static str,
    asset_class: AssetClass,
    provider_symbol: &'static str,
    display_name: &'static str,
}

const INSTRUMENTS: &[Entry] = &[
    Entry { key: "BTC", asset_class: AssetClass::Crypto, provider_symbol: "BTCUSDT", display_name: "BTC/USDT" },
    Entry { key: "ETH", asset_class: AssetClass::Crypto, provider_symbol: "ETHUSDT", display_name: "ETH/USDT" },
    Entry { key: "SOL", asset_class: AssetClass::Crypto, provider_symbol: "SOLUSDT", display_name: "SOL/USDT" },
    Entry { key: "GOLD", asset_class: AssetClass::Traditional, provider_symbol: "GC=F", display_name: "Gold Futures" },
    Entry { key: "US30", asset_class: AssetClass::Traditional, provider_symbol: "^DJI", display_name: "Dow Jones 30" },
    Entry { key: "SP500", asset_class: AssetClass::Traditional, provider_symbol: "^GSPC", display_name: "S&P 500" },
    Entry { key: "NAS100", asset_class: AssetClass::Traditional, provider_symbol: "^NDX", display_name: "Nasdaq 100" },
    Entry { key: "EURUSD", asset_class: AssetClass::Traditional, provider_symbol: "EURUSD=X", display_name: "EUR/USD" },
    Entry { key: "GBPUSD", asset_class: AssetClass::Traditional, provider_symbol: "GBPUSD=X", display_name: "GBP/USD" },
    Entry { key: "USDJPY", asset_class: AssetClass::Traditional, provider_symbol: "JPY=X", display_name: "USD/JPY" },
];

impl Entry {
    fn to_instrument(&self) -> Instrument {
        Instrument {
            key: self.key.to_string(),
            asset_class: self.asset_class,
            provider_symbol: self.provider_symbol.to_string(),
            display_name: self.display_name.to_string(),
        }
    }
}

/// Resolve an instrument key (case-insensitive).
pub fn resolve(key: &str) -> Result<Instrument, EngineError> {
    let wanted = key.trim().to_uppercase();
    INSTRUMENTS
        .iter()
        .find(|e| e.key == wanted)
        .map(Entry::to_instrument)
        .ok_or_else(|| EngineError::UnknownInstrument(key.to_string()))
}

/// Every registered instrument, in table order.
pub fn all() -> Vec<Instrument> {
    INSTRUMENTS.iter().map(Entry::to_instrument).collect()
}
