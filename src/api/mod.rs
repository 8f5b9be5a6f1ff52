// Exchange API module
pub mod binance;

pub use binance::{parse_stream_message, BinanceRestClient};
