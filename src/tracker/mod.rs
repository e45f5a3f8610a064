//! Rolling indicator trackers and their per symbol orchestration

mod candle;
mod ema;
mod event;
mod history;
mod median;
mod processor;
mod symbol;

pub use candle::Candle;
pub use ema::{EmaTracker, DEFAULT_EMA_PERIODS};
pub use event::{SeriesSnapshot, TrackerEvent, TrackerProduct};
pub use history::{HistoryConfig, KlineHistory, KlineHistoryClient};
pub use median::MedianTracker;
pub use processor::{TrackerProcessor, TrackerProcessorConfig};
pub use symbol::{SymbolTracker, UpdateOutcome};

use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

use crate::error::Error;

pub const EMA_KEY: &str = "ema";
pub const MEDIAN_KEY: &str = "volume_median";

/// Selects which recorded value a tracker should return.
///
/// The default query addresses the latest value. `index` addresses a
/// position in the recorded series, `period` addresses one smoothing period
/// of a multi period tracker.
#[derive(Clone, Copy, Debug, Default)]
pub struct ValueQuery {
    pub index: Option<usize>,
    pub period: Option<usize>,
}

impl ValueQuery {
    pub fn latest() -> Self {
        Self::default()
    }

    pub fn at_index(index: usize) -> Self {
        Self {
            index: Some(index),
            period: None,
        }
    }

    pub fn for_period(period: usize) -> Self {
        Self {
            index: None,
            period: Some(period),
        }
    }
}

/// Recorded history of a tracker.
///
/// Single statistic trackers expose a flat series, multi period trackers a
/// series per period. Consumers dispatch on the indicator key, not on the
/// shape.
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(untagged)]
pub enum TrackerSeries {
    Flat(Vec<f64>),
    PerPeriod(BTreeMap<usize, Vec<f64>>),
}

impl TrackerSeries {
    /// Number of recorded entries; for per period series, the longest one
    pub fn len(&self) -> usize {
        match self {
            Self::Flat(series) => series.len(),
            Self::PerPeriod(series) => series.values().map(Vec::len).max().unwrap_or(0),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Uniform capability implemented by every tracker.
///
/// `update` incorporates the candle entering the window and evicts the one
/// leaving it; it does bounded work per call. Queries never fail: out of
/// range or unseeded lookups log and return the 0.0 sentinel.
#[enum_dispatch]
pub trait IndicatorTracker {
    fn update(&mut self, new_candle: &Candle, first_candle: &Candle, last_candle: &Candle);
    fn get_value(&self, query: ValueQuery) -> f64;
    fn get_all(&self) -> TrackerSeries;
}

#[enum_dispatch(IndicatorTracker)]
#[derive(Clone, Debug)]
pub enum Tracker {
    Ema(EmaTracker),
    Median(MedianTracker),
}

pub type TrackerBuilder = fn(&[Candle], usize) -> Result<Tracker, Error>;

pub struct IndicatorMeta {
    pub key: &'static str,
    pub build: TrackerBuilder,
}

lazy_static! {
    /// Every indicator the engine maintains, in construction order.
    /// Wiring a new indicator means adding one entry here.
    pub static ref INDICATOR_REGISTRY: Vec<IndicatorMeta> = vec![
        IndicatorMeta {
            key: EMA_KEY,
            build: |history, lookback| Ok(Tracker::Ema(EmaTracker::try_new(history, lookback)?)),
        },
        IndicatorMeta {
            key: MEDIAN_KEY,
            build: |history, lookback| {
                Ok(Tracker::Median(MedianTracker::try_new(history, lookback)?))
            },
        },
    ];
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::*;

    fn candle_at(index: i64, close: f64, volume: f64) -> Candle {
        let minute = 60_000;
        let open_time = Utc.timestamp_millis_opt(index * minute).unwrap();
        let close_time = Utc.timestamp_millis_opt((index + 1) * minute - 1).unwrap();
        Candle::new(open_time, close_time, close, close, close, close, volume)
    }

    #[rstest]
    fn test_registry_keys() {
        let keys: Vec<&'static str> = INDICATOR_REGISTRY.iter().map(|meta| meta.key).collect();
        assert_eq!(keys, vec![EMA_KEY, MEDIAN_KEY]);
    }

    #[rstest]
    fn test_registry_builds_every_tracker() {
        let history: Vec<Candle> = (0..60)
            .map(|index| candle_at(index, 100.0 + index as f64, 10.0 + index as f64))
            .collect();

        for meta in INDICATOR_REGISTRY.iter() {
            let tracker = (meta.build)(&history, 5).unwrap();
            match (meta.key, tracker.get_all()) {
                (MEDIAN_KEY, TrackerSeries::Flat(series)) => assert!(!series.is_empty()),
                (EMA_KEY, TrackerSeries::PerPeriod(series)) => {
                    assert_eq!(
                        series.keys().copied().collect::<Vec<usize>>(),
                        DEFAULT_EMA_PERIODS.to_vec()
                    )
                }
                (key, series) => panic!("unexpected series {:?} for {}", series, key),
            }
        }
    }

    #[rstest]
    fn test_registry_rejects_bad_construction() {
        let history: Vec<Candle> = (0..10).map(|index| candle_at(index, 1.0, 1.0)).collect();

        for meta in INDICATOR_REGISTRY.iter() {
            assert!((meta.build)(&history, 0).is_err());
            assert!((meta.build)(&[], 5).is_err());
        }
    }

    #[rstest]
    #[case::flat(TrackerSeries::Flat(vec![1.0, 2.0]), 2)]
    #[case::empty(TrackerSeries::Flat(vec![]), 0)]
    #[case::per_period(
        TrackerSeries::PerPeriod(
            [(9, vec![1.0, 2.0, 3.0]), (21, vec![1.0])].into_iter().collect()
        ),
        3
    )]
    fn test_series_len(#[case] series: TrackerSeries, #[case] expected: usize) {
        assert_eq!(series.len(), expected);
        assert_eq!(series.is_empty(), expected == 0);
    }
}
