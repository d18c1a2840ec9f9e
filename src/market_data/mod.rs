pub mod candle;
pub mod candle_store;

pub use candle::Candle;
pub use candle_store::CandleStore;
