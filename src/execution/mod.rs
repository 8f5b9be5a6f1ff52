// Order execution, position ledger and market data collection module
pub mod candle_buffer;
pub mod executor;
pub mod position_manager;
pub mod price_feed;

pub use candle_buffer::CandleBuffer;
pub use executor::{Fill, OrderRequest, PaperExecutor, TradeExecutor};
pub use position_manager::{
    settlement_outcome, LedgerSettings, LedgerStats, Position, PositionLedger, PositionStatus,
};
pub use price_feed::{Backoff, FeedEvent, FeedSettings, PriceFeed, StreamKind};
