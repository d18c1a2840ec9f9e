// =============================================================================
// Market data providers
// =============================================================================
//
// A provider serves one asset class: it backfills history and starts a live
// feed. Crypto goes to the Binance push provider, everything else to the
// Yahoo poll provider.
// =============================================================================

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::feed::{FeedEnvelope, LiveFeed};
use crate::instruments::Instrument;
use crate::market_data::Candle;
use crate::timeframe::Timeframe;
use crate::types::{AssetClass, FeedKind};

/// Parameters for starting a live feed.
#[derive(Debug, Clone)]
pub struct FeedRequest {
    pub instrument: Instrument,
    pub timeframe: Timeframe,
    pub generation: u64,
    /// Only used by polling providers.
    pub poll_interval: Duration,
}

#[async_trait]
pub trait MarketProvider: Send + Sync {
    fn name(&self) -> &'static str;

    fn kind(&self) -> FeedKind;

    /// Closed bars, oldest first, at most `limit`.
    async fn fetch_history(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError>;

    /// Build and start a live feed that sends onto `tx`.
    fn start_live_feed(
        &self,
        request: FeedRequest,
        tx: mpsc::Sender<FeedEnvelope>,
    ) -> Result<LiveFeed, EngineError>;
}

/// Provider lookup by asset class.
#[derive(Clone)]
pub struct ProviderSet {
    crypto: Arc<dyn MarketProvider>,
    traditional: Arc<dyn MarketProvider>,
}

impl ProviderSet {
    pub fn new(crypto: Arc<dyn MarketProvider>, traditional: Arc<dyn MarketProvider>) -> Self {
        Self { crypto, traditional }
    }

    pub fn for_asset(&self, asset_class: AssetClass) -> Arc<dyn MarketProvider> {
        match asset_class {
            AssetClass::Crypto => self.crypto.clone(),
            AssetClass::Traditional => self.traditional.clone(),
        }
    }
}

// =============================================================================
// Test double
// =============================================================================


#[cfg(test)]
mod tests {
    use super::mock::MockProvider;
    use super::*;

    #[test]
    fn asset_class_picks_provider() {
        let set = ProviderSet::new(
            Arc::new(MockProvider::new(FeedKind::Push)),
            Arc::new(MockProvider::new(FeedKind::Poll)),
        );
        assert_eq!(set.for_asset(AssetClass::Crypto).kind(), FeedKind::Push);
        assert_eq!(set.for_asset(AssetClass::Traditional).kind(), FeedKind::Poll);
    }
}
