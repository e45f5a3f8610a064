mod binance;
mod common;
mod websocket;

pub use binance::{BinanceRecord, BinanceSubscription, BINANCE};
pub use common::{ExchangeConfig, KlineInterval};
pub use websocket::{ExchangeReceiver, ExchangeReceiverConfig, ExchangeSpecificConfig};
