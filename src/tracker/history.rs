use chrono::{DateTime, TimeZone, Utc};
use itertools::Itertools;
use serde::Deserialize;
use url::Url;

use super::Candle;
use crate::{error::Error, exchange::KlineInterval};

const DEFAULT_HISTORY_LIMIT: usize = 500;

fn default_history_limit() -> usize {
    DEFAULT_HISTORY_LIMIT
}

#[derive(Clone, Debug, Deserialize)]
pub struct HistoryConfig {
    pub endpoint: Url,
    #[serde(default = "default_history_limit")]
    pub limit: usize,
}

/// One bootstrap window: ordered closed candles plus the fetch reference time
#[derive(Clone, Debug)]
pub struct KlineHistory {
    pub candles: Vec<Candle>,
    pub fetched_at: DateTime<Utc>,
}

/// Raw kline row as returned by the exchange REST api
// <https://github.com/binance/binance-spot-api-docs/blob/master/rest-api.md#klinecandlestick-data>
type KlineRow = (
    i64,    // open time
    String, // open
    String, // high
    String, // low
    String, // close
    String, // volume
    i64,    // close time
    String, // quote asset volume
    u64,    // number of trades
    String, // taker buy base volume
    String, // taker buy quote volume
    String, // unused
);

impl TryFrom<KlineRow> for Candle {
    type Error = Error;

    fn try_from(row: KlineRow) -> Result<Self, Self::Error> {
        let open_time = Utc
            .timestamp_millis_opt(row.0)
            .single()
            .ok_or(Error::Timestamp(row.0))?;
        let close_time = Utc
            .timestamp_millis_opt(row.6)
            .single()
            .ok_or(Error::Timestamp(row.6))?;

        Ok(Candle::new(
            open_time,
            close_time,
            row.1.parse()?,
            row.2.parse()?,
            row.3.parse()?,
            row.4.parse()?,
            row.5.parse()?,
        ))
    }
}

pub struct KlineHistoryClient {
    client: reqwest::Client,
    endpoint: Url,
    limit: usize,
}

impl KlineHistoryClient {
    pub fn new(config: &HistoryConfig) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: config.endpoint.clone(),
            limit: config.limit,
        }
    }

    /// Fetch at least `minimum` most recent closed candles for one symbol.
    pub async fn fetch(
        &self,
        symbol: &str,
        interval: KlineInterval,
        minimum: usize,
    ) -> Result<KlineHistory, Error> {
        let limit = self.limit.max(minimum);
        let mut url = self.endpoint.join("/api/v3/klines")?;
        url.query_pairs_mut()
            .append_pair("symbol", symbol.to_uppercase().as_str())
            .append_pair("interval", interval.to_string().as_str())
            .append_pair("limit", limit.to_string().as_str());

        log::debug!("Fetch kline history: {}", url);
        let response = self.client.get(url).send().await?;
        if !response.status().is_success() {
            return Err(Error::Http(format!("Status: {:?}", response.status())));
        }

        let rows = response.json::<Vec<KlineRow>>().await?;
        let mut candles = rows
            .into_iter()
            .map(Candle::try_from)
            .collect::<Result<Vec<Candle>, Error>>()?;

        // the newest row is usually the still open bucket
        let now = Utc::now();
        if candles.last().map_or(false, |last| last.close_time > now) {
            candles.pop();
        }

        validate(&candles, interval)?;
        log::info!(
            "Fetched {} candles of {} history for {}.",
            candles.len(),
            interval,
            symbol
        );

        Ok(KlineHistory {
            candles,
            fetched_at: Utc::now(),
        })
    }
}

/// The bootstrap contract: strictly ordered, gap free buckets.
fn validate(candles: &[Candle], interval: KlineInterval) -> Result<(), Error> {
    let contiguous = candles
        .iter()
        .tuple_windows()
        .all(|(previous, next)| next.open_time - previous.open_time == interval.duration());

    if contiguous {
        Ok(())
    } else {
        Err(Error::History(String::from(
            "history is unordered or has gaps",
        )))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;
    use yata::core::OHLCV;

    fn row(open_time: i64, close: &str, volume: &str) -> KlineRow {
        (
            open_time,
            "100.0".to_string(),
            "110.0".to_string(),
            "90.0".to_string(),
            close.to_string(),
            volume.to_string(),
            open_time + 59_999,
            "1000.0".to_string(),
            42,
            "500.0".to_string(),
            "499.9".to_string(),
            "0".to_string(),
        )
    }

    #[rstest]
    fn test_row_parsing() {
        let data = r#"
        [
            [
                1672515780000,
                "16500.10",
                "16550.00",
                "16480.00",
                "16520.50",
                "120.5",
                1672515839999,
                "1990000.0",
                1200,
                "60.0",
                "991000.0",
                "0"
            ]
        ]
        "#;

        let rows = serde_json::from_str::<Vec<KlineRow>>(data).unwrap();
        let candle = Candle::try_from(rows.into_iter().next().unwrap()).unwrap();

        assert_eq!(candle.open(), 16500.10);
        assert_eq!(candle.close(), 16520.50);
        assert_eq!(candle.volume(), 120.5);
        assert_eq!(candle.open_time.timestamp_millis(), 1672515780000);
        assert_eq!(candle.close_time.timestamp_millis(), 1672515839999);
    }

    #[rstest]
    fn test_row_with_invalid_number() {
        assert!(Candle::try_from(row(1672515780000, "not a number", "1.0")).is_err());
    }

    #[rstest]
    fn test_validate_contiguous() {
        let candles: Vec<Candle> = (0..5)
            .map(|index| Candle::try_from(row(1672515780000 + index * 60_000, "1.0", "1.0")))
            .collect::<Result<Vec<Candle>, Error>>()
            .unwrap();

        assert!(validate(&candles, KlineInterval::OneMinute).is_ok());
    }

    #[rstest]
    #[case::gap(vec![0, 60_000, 180_000])]
    #[case::unordered(vec![60_000, 0, 120_000])]
    #[case::duplicate(vec![0, 0, 60_000])]
    fn test_validate_rejects_bad_sequences(#[case] open_times: Vec<i64>) {
        let candles: Vec<Candle> = open_times
            .into_iter()
            .map(|open_time| Candle::try_from(row(open_time, "1.0", "1.0")))
            .collect::<Result<Vec<Candle>, Error>>()
            .unwrap();

        assert!(validate(&candles, KlineInterval::OneMinute).is_err());
    }
}
