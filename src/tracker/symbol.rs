use chrono::{DateTime, Utc};
use opentelemetry::{
    metrics::{Meter, ObservableGauge},
    KeyValue,
};
use std::{
    collections::{BTreeMap, VecDeque},
    sync::Arc,
};
use yata::core::OHLCV;

use super::{
    Candle, IndicatorTracker, Tracker, TrackerProduct, TrackerSeries, ValueQuery,
    INDICATOR_REGISTRY,
};
use crate::{
    error::Error,
    exchange::KlineInterval,
    metrics::{instrument, metadata},
};

struct TrackerMetrics {
    value: ObservableGauge<f64>,
    series_length: ObservableGauge<u64>,
    close: ObservableGauge<f64>,
    volume: ObservableGauge<f64>,
    metadata: [KeyValue; 3],
}

impl TrackerMetrics {
    fn new(meter: Arc<Meter>, source: &str, symbol: &str, interval: KlineInterval) -> Self {
        Self {
            value: meter.f64_observable_gauge(instrument::TRACKER_VALUE).init(),
            series_length: meter
                .u64_observable_gauge(instrument::TRACKER_SERIES_LENGTH)
                .init(),
            close: meter.f64_observable_gauge(instrument::CANDLE_CLOSE).init(),
            volume: meter
                .f64_observable_gauge(instrument::CANDLE_VOLUME)
                .init(),
            metadata: [
                KeyValue::new(metadata::SOURCE, source.to_lowercase()),
                KeyValue::new(metadata::SYMBOL, symbol.to_lowercase()),
                KeyValue::new(metadata::INTERVAL, interval.to_string()),
            ],
        }
    }

    fn record_candle(&self, candle: &Candle) {
        self.close.observe(candle.close(), &self.metadata);
        self.volume.observe(candle.volume(), &self.metadata);
    }

    fn record_tracker(&self, key: &str, value: f64) {
        let mut attributes = self.metadata.clone().to_vec();
        attributes.push(KeyValue::new(metadata::INDICATOR, key.to_string()));
        self.value.observe(value, &attributes[..]);
    }

    fn record_series_length(&self, key: &str, length: usize) {
        let mut attributes = self.metadata.clone().to_vec();
        attributes.push(KeyValue::new(metadata::INDICATOR, key.to_string()));
        self.series_length.observe(length as u64, &attributes[..]);
    }
}

/// Outcome of offering one candle close event to an ensemble
#[derive(Clone, Debug)]
pub enum UpdateOutcome {
    /// Candle accepted; latest value per indicator key
    Applied(BTreeMap<String, f64>),
    /// Duplicate or out of order event, dropped without touching state
    Stale,
    /// One or more buckets are missing; the ensemble must be resynchronized
    Gap { expected: DateTime<Utc> },
}

/// One symbol's tracker ensemble plus the candle window feeding it.
///
/// The window always holds exactly `lookback` candles, so the candle
/// leaving the window and the previous newest candle are available for
/// every dispatch. All mutations go through [`SymbolTracker::apply`], which
/// guards bucket ordering before any tracker is touched.
pub struct SymbolTracker {
    symbol: String,
    source: String,
    interval: KlineInterval,
    lookback: usize,
    window: VecDeque<Candle>,
    trackers: Vec<(&'static str, Tracker)>,
    metrics: TrackerMetrics,
}

impl SymbolTracker {
    pub fn try_new(
        source: &str,
        symbol: &str,
        interval: KlineInterval,
        history: &[Candle],
        lookback: usize,
        meter: Arc<Meter>,
    ) -> Result<Self, Error> {
        if lookback == 0 {
            return Err(Error::Lookback(lookback));
        }
        if history.is_empty() {
            return Err(Error::History(String::from("empty bootstrap history")));
        }
        if history.len() < lookback {
            return Err(Error::History(format!(
                "need at least {} candles for {}, got {}",
                lookback,
                symbol,
                history.len()
            )));
        }

        let mut trackers: Vec<(&'static str, Tracker)> = Vec::new();
        for meta in INDICATOR_REGISTRY.iter() {
            trackers.push((meta.key, (meta.build)(history, lookback)?));
        }

        let window: VecDeque<Candle> = history[history.len() - lookback..]
            .iter()
            .cloned()
            .collect();

        Ok(Self {
            symbol: symbol.to_string(),
            source: source.to_string(),
            interval,
            lookback,
            window,
            trackers,
            metrics: TrackerMetrics::new(meter, source, symbol, interval),
        })
    }

    pub fn matches(&self, symbol: &str, interval: KlineInterval) -> bool {
        self.symbol == symbol && self.interval == interval
    }

    pub fn product(&self) -> TrackerProduct {
        TrackerProduct {
            source: self.source.to_string(),
            symbol: self.symbol.to_string(),
            interval: self.interval,
            lookback: self.lookback,
        }
    }

    /// Latest value per indicator key
    pub fn values(&self) -> BTreeMap<String, f64> {
        self.trackers
            .iter()
            .map(|(key, tracker)| (key.to_string(), tracker.get_value(ValueQuery::latest())))
            .collect()
    }

    /// Full recorded history per indicator key
    pub fn series(&self) -> BTreeMap<String, TrackerSeries> {
        self.trackers
            .iter()
            .map(|(key, tracker)| {
                let series = tracker.get_all();
                self.metrics.record_series_length(key, series.len());
                (key.to_string(), series)
            })
            .collect()
    }

    /// Offer one candle close event to the ensemble.
    ///
    /// The event must be the bucket immediately following the window tail;
    /// anything older is dropped, anything newer flags a gap so the caller
    /// can resynchronize instead of letting the window drift.
    pub fn apply(&mut self, candle: Candle) -> UpdateOutcome {
        let tail_open = match self.window.back() {
            Some(tail) => tail.open_time,
            None => {
                log::warn!("Window for {} is empty, dropping candle.", self.symbol);
                return UpdateOutcome::Stale;
            }
        };

        if candle.open_time <= tail_open {
            log::warn!(
                "Duplicate or out of order candle for {}: got {}, window tail {}.",
                self.symbol,
                candle.open_time,
                tail_open
            );
            return UpdateOutcome::Stale;
        }

        let expected = tail_open + self.interval.duration();
        if candle.open_time != expected {
            log::warn!(
                "Bucket mismatch for {}: expected {}, got {}.",
                self.symbol,
                expected,
                candle.open_time
            );
            return UpdateOutcome::Gap { expected };
        }

        let first = match self.window.pop_front() {
            Some(first) => first,
            None => return UpdateOutcome::Stale,
        };
        let last = self.window.back().cloned().unwrap_or_else(|| first.clone());

        for (_, tracker) in self.trackers.iter_mut() {
            tracker.update(&candle, &first, &last);
        }

        self.metrics.record_candle(&candle);
        self.window.push_back(candle);

        let values = self.values();
        for (key, value) in values.iter() {
            self.metrics.record_tracker(key, *value);
        }

        UpdateOutcome::Applied(values)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tracker::{EMA_KEY, MEDIAN_KEY};
    use chrono::TimeZone;
    use opentelemetry::global;
    use rstest::*;

    fn candle_at(index: i64, close: f64, volume: f64) -> Candle {
        let minute = 60_000;
        let open_time = Utc.timestamp_millis_opt(index * minute).unwrap();
        let close_time = Utc.timestamp_millis_opt((index + 1) * minute - 1).unwrap();
        Candle::new(open_time, close_time, close, close, close, close, volume)
    }

    fn history(length: i64) -> Vec<Candle> {
        (0..length)
            .map(|index| candle_at(index, index as f64 + 1.0, ((index * 3) % 11) as f64))
            .collect()
    }

    fn tracker(length: i64, lookback: usize) -> SymbolTracker {
        SymbolTracker::try_new(
            "binance",
            "btcusdt",
            KlineInterval::OneMinute,
            &history(length),
            lookback,
            Arc::new(global::meter("test")),
        )
        .unwrap()
    }

    #[rstest]
    fn test_ensemble_has_every_registry_key() {
        let tracker = tracker(60, 5);
        let values = tracker.values();
        assert!(values.contains_key(EMA_KEY));
        assert!(values.contains_key(MEDIAN_KEY));
        assert_eq!(values.len(), 2);
    }

    #[rstest]
    fn test_apply_next_bucket() {
        let mut tracker = tracker(10, 5);
        match tracker.apply(candle_at(10, 11.0, 6.0)) {
            UpdateOutcome::Applied(values) => {
                assert_eq!(values.len(), 2);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
    }

    #[rstest]
    #[case::duplicate(9)]
    #[case::out_of_order(4)]
    fn test_stale_candles_are_dropped(#[case] index: i64) {
        let mut tracker = tracker(10, 5);
        let before = tracker.series();

        assert!(matches!(
            tracker.apply(candle_at(index, 1.0, 1.0)),
            UpdateOutcome::Stale
        ));
        assert_eq!(tracker.series(), before);
    }

    #[rstest]
    fn test_gap_is_flagged_not_applied() {
        let mut tracker = tracker(10, 5);
        let before = tracker.series();

        match tracker.apply(candle_at(12, 1.0, 1.0)) {
            UpdateOutcome::Gap { expected } => {
                assert_eq!(expected.timestamp_millis(), 10 * 60_000);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(tracker.series(), before);
    }

    #[rstest]
    fn test_interleaved_symbols_match_isolated_processing() {
        let meter = Arc::new(global::meter("test"));
        let bootstrap = history(10);

        let mut first = SymbolTracker::try_new(
            "binance",
            "btcusdt",
            KlineInterval::OneMinute,
            &bootstrap,
            5,
            meter.clone(),
        )
        .unwrap();
        let mut second = SymbolTracker::try_new(
            "binance",
            "ethusdt",
            KlineInterval::OneMinute,
            &bootstrap,
            5,
            meter.clone(),
        )
        .unwrap();
        let mut isolated = SymbolTracker::try_new(
            "binance",
            "btcusdt",
            KlineInterval::OneMinute,
            &bootstrap,
            5,
            meter,
        )
        .unwrap();

        for index in 10..30 {
            let candle = candle_at(index, index as f64, ((index * 5) % 13) as f64);
            // interleave the two symbols on every bucket
            first.apply(candle.clone());
            second.apply(candle.clone());
            isolated.apply(candle);
        }

        assert_eq!(first.series(), isolated.series());
        assert_eq!(first.series(), second.series());
    }

    #[rstest]
    fn test_construction_rejects_short_history() {
        let result = SymbolTracker::try_new(
            "binance",
            "btcusdt",
            KlineInterval::OneMinute,
            &history(3),
            5,
            Arc::new(global::meter("test")),
        );
        assert!(matches!(result, Err(Error::History(..))));
    }
}
