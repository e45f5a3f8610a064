use crate::{error::Error, record::Record};
use async_trait::async_trait;
use chrono::Duration;
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use strum_macros::{Display, EnumString};

/// Candle bucket widths supported by the kline feeds
#[derive(Clone, Copy, Debug, Display, Deserialize, EnumString, Eq, Hash, PartialEq, Serialize)]
pub enum KlineInterval {
    #[serde(rename = "1m")]
    #[strum(to_string = "1m")]
    OneMinute,
    #[serde(rename = "3m")]
    #[strum(to_string = "3m")]
    ThreeMinutes,
    #[serde(rename = "5m")]
    #[strum(to_string = "5m")]
    FiveMinutes,
    #[serde(rename = "15m")]
    #[strum(to_string = "15m")]
    FifteenMinutes,
    #[serde(rename = "30m")]
    #[strum(to_string = "30m")]
    ThirtyMinutes,
    #[serde(rename = "1h")]
    #[strum(to_string = "1h")]
    OneHour,
    #[serde(rename = "4h")]
    #[strum(to_string = "4h")]
    FourHours,
    #[serde(rename = "1d")]
    #[strum(to_string = "1d")]
    OneDay,
}

impl KlineInterval {
    /// Width of one candle bucket
    pub fn duration(&self) -> Duration {
        match self {
            Self::OneMinute => Duration::minutes(1),
            Self::ThreeMinutes => Duration::minutes(3),
            Self::FiveMinutes => Duration::minutes(5),
            Self::FifteenMinutes => Duration::minutes(15),
            Self::ThirtyMinutes => Duration::minutes(30),
            Self::OneHour => Duration::hours(1),
            Self::FourHours => Duration::hours(4),
            Self::OneDay => Duration::days(1),
        }
    }
}

pub type ParsingFunction = Box<dyn Fn(&str) -> Result<Record, Error> + Send + Sync>;

#[async_trait]
#[enum_dispatch]
pub trait ExchangeConfig {
    fn build_parsing(&self) -> ParsingFunction;
    fn subscription(&self) -> Result<String, Error>;
    async fn uri(&self) -> Result<String, Error>;
}

#[cfg(test)]
mod tests {
    use super::KlineInterval;
    use chrono::Duration;
    use rstest::*;
    use std::str::FromStr;

    #[rstest]
    #[case::minute("1m", KlineInterval::OneMinute, Duration::minutes(1))]
    #[case::hour("1h", KlineInterval::OneHour, Duration::hours(1))]
    #[case::day("1d", KlineInterval::OneDay, Duration::days(1))]
    fn test_interval(
        #[case] text: &'static str,
        #[case] expected: KlineInterval,
        #[case] duration: Duration,
    ) {
        let interval = KlineInterval::from_str(text).unwrap();
        assert_eq!(interval, expected);
        assert_eq!(interval.to_string(), text);
        assert_eq!(interval.duration(), duration);
        assert_eq!(
            serde_json::from_str::<KlineInterval>(&format!("\"{}\"", text)).unwrap(),
            expected
        );
    }
}
