use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use yata::core::{ValueType, OHLCV};

/// One closed OHLCV bar of a trading symbol.
///
/// Candles are immutable once built; the engine only ever replaces whole
/// windows of them. Field access goes through [`OHLCV`].
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Candle {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub open_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub close_time: DateTime<Utc>,
    open: f64,
    high: f64,
    low: f64,
    close: f64,
    volume: f64,
}

impl Candle {
    pub fn new(
        open_time: DateTime<Utc>,
        close_time: DateTime<Utc>,
        open: f64,
        high: f64,
        low: f64,
        close: f64,
        volume: f64,
    ) -> Self {
        Self {
            open_time,
            close_time,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Candle {
    #[inline]
    fn open(&self) -> ValueType {
        self.open
    }

    #[inline]
    fn high(&self) -> ValueType {
        self.high
    }

    #[inline]
    fn low(&self) -> ValueType {
        self.low
    }

    #[inline]
    fn close(&self) -> ValueType {
        self.close
    }

    #[inline]
    fn volume(&self) -> ValueType {
        self.volume
    }
}
