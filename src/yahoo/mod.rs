pub mod client;
pub mod poller;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::EngineError;
use crate::feed::{FeedEnvelope, LiveFeed};
use crate::instruments::Instrument;
use crate::market_data::Candle;
use crate::providers::{FeedRequest, MarketProvider};
use crate::timeframe::Timeframe;
use crate::types::{AssetClass, FeedKind};

pub use client::YahooClient;

/// Poll provider for commodities, indices and FX.
pub struct YahooProvider {
    client: YahooClient,
}

impl YahooProvider {
    pub fn new(client: YahooClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl MarketProvider for YahooProvider {
    fn name(&self) -> &'static str {
        "yahoo"
    }

    fn kind(&self) -> FeedKind {
        FeedKind::Poll
    }

    async fn fetch_history(
        &self,
        instrument: &Instrument,
        timeframe: Timeframe,
        limit: usize,
    ) -> Result<Vec<Candle>, EngineError> {
        let interval = timeframe.provider_interval(AssetClass::Traditional)?;
        let bars = self
            .client
            .fetch_chart(&instrument.provider_symbol, interval, client::history_range(timeframe))
            .await
            .map_err(|e| EngineError::DataUnavailable(format!("{e:#}")))?;

        let now = chrono::Utc::now().timestamp();
        let mut closed = client::closed_only(bars, timeframe.seconds(), now);
        if closed.is_empty() {
            return Err(EngineError::DataUnavailable(format!(
                "no closed {} bars for {}",
                timeframe, instrument.key
            )));
        }
        let excess = closed.len().saturating_sub(limit);
        closed.drain(..excess);
        Ok(closed)
    }

    fn start_live_feed(
        &self,
        request: FeedRequest,
        tx: mpsc::Sender<FeedEnvelope>,
    ) -> Result<LiveFeed, EngineError> {
        let interval = request.timeframe.provider_interval(AssetClass::Traditional)?;
        let feed = LiveFeed::new(FeedKind::Poll, request.generation, tx);
        let client = self.client.clone();
        let symbol = request.instrument.provider_symbol.clone();
        feed.start(move |ctx| {
            poller::run_poll_feed(ctx, client, symbol, request.timeframe, interval, request.poll_interval)
        })?;
        Ok(feed)
    }
}
