use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use uuid::Uuid;

use super::TrackerSeries;
use crate::{channel::Post, error::Error, exchange::KlineInterval};

/// Identity of one tracked (symbol, interval) ensemble
#[derive(Clone, Debug, Deserialize, PartialEq, Eq, Serialize)]
pub struct TrackerProduct {
    pub source: String,
    pub symbol: String,
    pub interval: KlineInterval,
    pub lookback: usize,
}

/// Latest value per indicator key, emitted after every applied candle
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct TrackerEvent {
    pub id: Uuid,
    pub product: TrackerProduct,
    pub values: BTreeMap<String, f64>,
    pub datetime: DateTime<Utc>,
}

/// Full historical series per indicator key, emitted on flush
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct SeriesSnapshot {
    pub id: Uuid,
    pub product: TrackerProduct,
    pub series: BTreeMap<String, TrackerSeries>,
    pub datetime: DateTime<Utc>,
}

fn attributes(product: &TrackerProduct) -> HashMap<String, String> {
    HashMap::from([
        ("source".to_string(), product.source.to_string()),
        ("symbol".to_string(), product.symbol.to_string()),
        ("interval".to_string(), product.interval.to_string()),
    ])
}

impl TryInto<Post> for TrackerEvent {
    type Error = Error;

    fn try_into(self) -> Result<Post, Self::Error> {
        let tag = format!("tracker_{}_{}", self.product.source, self.product.symbol);
        let body_attributes = attributes(&self.product);

        Ok(Post::new(serde_json::to_value(self)?, body_attributes, tag))
    }
}

impl TryInto<Post> for SeriesSnapshot {
    type Error = Error;

    fn try_into(self) -> Result<Post, Self::Error> {
        let tag = format!("snapshot_{}_{}", self.product.source, self.product.symbol);
        let body_attributes = attributes(&self.product);

        Ok(Post::new(serde_json::to_value(self)?, body_attributes, tag))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[fixture]
    fn product() -> TrackerProduct {
        TrackerProduct {
            source: "binance".to_string(),
            symbol: "btcusdt".to_string(),
            interval: KlineInterval::OneMinute,
            lookback: 30,
        }
    }

    #[rstest]
    fn test_tracker_event_post(product: TrackerProduct) {
        let event = TrackerEvent {
            id: Uuid::new_v4(),
            product,
            values: [("ema".to_string(), 4.0), ("volume_median".to_string(), 7.0)]
                .into_iter()
                .collect(),
            datetime: Utc::now(),
        };

        let post: Post = event.clone().try_into().unwrap();
        assert_eq!(post.tag, "tracker_binance_btcusdt");
        assert_eq!(
            post.body_attributes.get("interval"),
            Some(&"1m".to_string())
        );

        let decoded = serde_json::from_value::<TrackerEvent>(post.body).unwrap();
        assert_eq!(decoded.values, event.values);
        assert_eq!(decoded.product, event.product);
    }

    #[rstest]
    fn test_snapshot_post_keeps_series_shapes(product: TrackerProduct) {
        let snapshot = SeriesSnapshot {
            id: Uuid::new_v4(),
            product,
            series: [
                (
                    "ema".to_string(),
                    TrackerSeries::PerPeriod([(9, vec![1.0, 2.0])].into_iter().collect()),
                ),
                (
                    "volume_median".to_string(),
                    TrackerSeries::Flat(vec![3.0, 5.0]),
                ),
            ]
            .into_iter()
            .collect(),
            datetime: Utc::now(),
        };

        let post: Post = snapshot.clone().try_into().unwrap();
        assert_eq!(post.tag, "snapshot_binance_btcusdt");

        let decoded = serde_json::from_value::<SeriesSnapshot>(post.body).unwrap();
        assert_eq!(decoded.series, snapshot.series);
    }
}
