use super::common::{ExchangeConfig, KlineInterval};
use crate::{
    error::Error,
    record::{KlineRecord, Record},
    tracker::Candle,
    utils::serde::f64_from_string,
};
use async_trait::async_trait;
use chrono::{TimeZone, Utc};
use serde::{Deserialize, Serialize};

pub const BINANCE: &str = "binance";

#[derive(Clone, Serialize, Deserialize, Debug)]
pub struct BinanceSubscription {
    pub method: Option<String>,
    pub params: Vec<String>,
    pub id: usize,
}

#[derive(Clone, Debug, Deserialize)]
pub struct BinanceConfig {
    #[serde(alias = "subscription")]
    pub _subscription: BinanceSubscription,
    #[serde(alias = "uri")]
    pub _uri: url::Url,
}

#[async_trait]
impl ExchangeConfig for BinanceConfig {
    fn build_parsing(&self) -> Box<dyn Fn(&str) -> Result<Record, Error> + Send + Sync> {
        let parser = |msg: &str| -> Result<Record, Error> {
            serde_json::from_str::<BinanceRecord>(msg)?.build_record()
        };
        Box::new(parser)
    }

    async fn uri(&self) -> Result<String, Error> {
        Ok(self._uri.to_string())
    }

    fn subscription(&self) -> Result<String, Error> {
        let result = serde_json::to_string(&self._subscription).map_err(Error::from);
        log::info!("{:?}", result);
        result
    }
}

/// Represents a message from a binance kline stream.
// <https://github.com/binance/binance-spot-api-docs/blob/master/web-socket-streams.md#klinecandlestick-streams>
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct Kline {
    #[serde(alias = "s")]
    symbol: String,
    #[serde(alias = "k")]
    kline: KlinePayload,
}

#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct KlinePayload {
    #[serde(alias = "t")]
    start_time: i64,
    #[serde(alias = "T")]
    end_time: i64,
    #[serde(alias = "i")]
    interval: KlineInterval,
    #[serde(alias = "o", deserialize_with = "f64_from_string")]
    open: f64,
    #[serde(alias = "c", deserialize_with = "f64_from_string")]
    close: f64,
    #[serde(alias = "h", deserialize_with = "f64_from_string")]
    high: f64,
    #[serde(alias = "l", deserialize_with = "f64_from_string")]
    low: f64,
    #[serde(alias = "v", deserialize_with = "f64_from_string")]
    volume: f64,
    /// Whether the bucket is final; only closed klines become records
    #[serde(alias = "x")]
    closed: bool,
}

impl TryFrom<Kline> for KlineRecord {
    type Error = Error;

    fn try_from(event: Kline) -> Result<Self, Self::Error> {
        let open_time = Utc
            .timestamp_millis_opt(event.kline.start_time)
            .single()
            .ok_or(Error::Timestamp(event.kline.start_time))?;
        let close_time = Utc
            .timestamp_millis_opt(event.kline.end_time)
            .single()
            .ok_or(Error::Timestamp(event.kline.end_time))?;

        Ok(KlineRecord {
            symbol: event.symbol.to_lowercase(),
            source: BINANCE.to_string(),
            interval: event.kline.interval,
            candle: Candle::new(
                open_time,
                close_time,
                event.kline.open,
                event.kline.high,
                event.kline.low,
                event.kline.close,
                event.kline.volume,
            ),
        })
    }
}

#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
#[serde(tag = "e")]
pub enum BinanceRecord {
    #[serde(rename = "kline")]
    Kline(Kline),
}

impl BinanceRecord {
    pub fn build_record(self) -> Result<Record, Error> {
        match self {
            Self::Kline(event) if event.kline.closed => Ok(Record::Kline(event.try_into()?)),
            Self::Kline(event) => Err(Error::UnprocessableEvent(format!(
                "kline still open for {}",
                event.symbol
            ))),
        }
    }
}
