pub mod client;
pub mod stream;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::feed::{FeedEnvelope, LiveFeed};
use crate::instruments::Instrument;
use crate::market_data::Candle;
use crate::providers::{FeedRequest, MarketProvider};
use crate::timeframe::Timeframe;
use crate::types::{AssetClass, FeedKind};

pub use client::BinanceClient;

/// Push provider for crypto pairs.
pub struct BinanceProvider {
    client: BinanceClient,
}

impl BinanceProvider {
    pub fn new(client: BinanceClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketProvider for BinanceProvider {
    fn name(&self) -> &'static str {
        "binance"
    }

    fn kind(&self) -> FeedKind {
        FeedKind::Push
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let interval = timeframe.provider_interval(AssetClass::Crypto)?;
        self.client
            .fetch_klines(&instrument.provider_symbol, interval, limit)
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("{e:#}")))
    }

    fn start_live_feed(
        &self,
        request: FeedRequest,
        tx: mpsc::Sender<FeedEnvelope>,
    ) -> Result<LiveFeed, EngineError> {
        let interval = request.timeframe.provider_interval(AssetClass::Crypto)?;
        let feed = LiveFeed::new(FeedKind::Push, request.generation, tx);
        let symbol = request.instrument.provider_symbol.clone();
        feed.start(move |ctx| stream::run_kline_feed(ctx, symbol, interval.to_string()))?;
        Ok(feed)
    }
}
