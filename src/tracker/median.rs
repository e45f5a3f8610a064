use ordered_float::OrderedFloat;
use std::cmp::Reverse;
use std::collections::BinaryHeap;
use yata::core::OHLCV;

use super::{Candle, IndicatorTracker, TrackerSeries, ValueQuery};
use crate::error::Error;

/// Running median of candle volume over the last `lookback` closed candles.
///
/// The window lives in two heaps: `lower` keeps the smaller half ordered
/// max first, `upper` keeps the larger half ordered min first. After every
/// mutation the halves differ in size by at most one and `lower` is never
/// the smaller one, so the median is read off the heap fronts.
///
/// A median is recorded once per candle from the moment the window has
/// first filled; before that, candles only populate the heaps.
#[derive(Clone, Debug)]
pub struct MedianTracker {
    lookback: usize,
    lower: BinaryHeap<OrderedFloat<f64>>,
    upper: BinaryHeap<Reverse<OrderedFloat<f64>>>,
    medians: Vec<f64>,
}

impl MedianTracker {
    pub fn try_new(history: &[Candle], lookback: usize) -> Result<Self, Error> {
        if lookback == 0 {
            return Err(Error::Lookback(lookback));
        }
        if history.is_empty() {
            return Err(Error::History(String::from("empty bootstrap history")));
        }
        if history.len() < lookback {
            return Err(Error::History(format!(
                "need at least {} candles, got {}",
                lookback,
                history.len()
            )));
        }

        let mut tracker = Self {
            lookback,
            lower: BinaryHeap::new(),
            upper: BinaryHeap::new(),
            medians: Vec::new(),
        };

        let volumes: Vec<f64> = history.iter().map(|candle| candle.volume()).collect();
        for (index, volume) in volumes.iter().enumerate() {
            if index >= lookback {
                tracker.remove(volumes[index - lookback]);
            }
            tracker.add(*volume);
            if index + 1 >= lookback {
                tracker.medians.push(tracker.median());
            }
        }

        Ok(tracker)
    }

    fn add(&mut self, volume: f64) {
        let volume = OrderedFloat(volume);
        match self.lower.peek() {
            Some(front) if volume >= *front => self.upper.push(Reverse(volume)),
            _ => self.lower.push(volume),
        }
        self.rebalance();
    }

    fn rebalance(&mut self) {
        while self.lower.len() > self.upper.len() + 1 {
            if let Some(value) = self.lower.pop() {
                self.upper.push(Reverse(value));
            }
        }
        while self.upper.len() > self.lower.len() {
            if let Some(Reverse(value)) = self.upper.pop() {
                self.lower.push(value);
            }
        }
    }

    /// Drop one occurrence of `volume` from whichever half holds it.
    ///
    /// Rebuilding a half is linear in the window, acceptable at the window
    /// sizes this engine targets. A missing value means the window drifted
    /// (stream gap or duplicate delivery); the heaps stay untouched.
    fn remove(&mut self, volume: f64) -> bool {
        let target = OrderedFloat(volume);
        if self.lower.iter().any(|value| *value == target) {
            let mut values = std::mem::take(&mut self.lower).into_vec();
            if let Some(position) = values.iter().position(|value| *value == target) {
                values.swap_remove(position);
            }
            self.lower = BinaryHeap::from(values);
        } else if self.upper.iter().any(|Reverse(value)| *value == target) {
            let mut values = std::mem::take(&mut self.upper).into_vec();
            if let Some(position) = values.iter().position(|Reverse(value)| *value == target) {
                values.swap_remove(position);
            }
            self.upper = BinaryHeap::from(values);
        } else {
            log::warn!("Volume {} not found in either half of the window.", volume);
            return false;
        }

        self.rebalance();
        true
    }

    pub fn median(&self) -> f64 {
        match (self.lower.peek(), self.upper.peek()) {
            (Some(low), Some(Reverse(high))) if self.lower.len() == self.upper.len() => {
                (low.0 + high.0) / 2.0
            }
            (Some(low), _) => low.0,
            _ => {
                log::warn!("Cannot calculate median: window is empty.");
                0.0
            }
        }
    }
}

impl IndicatorTracker for MedianTracker {
    fn update(&mut self, new_candle: &Candle, first_candle: &Candle, _last_candle: &Candle) {
        self.remove(first_candle.volume());
        self.add(new_candle.volume());
        self.medians.push(self.median());
    }

    fn get_value(&self, query: ValueQuery) -> f64 {
        match query.index {
            Some(index) => self.medians.get(index).copied().unwrap_or_else(|| {
                log::warn!(
                    "Median index {} outside recorded history of {}.",
                    index,
                    self.medians.len()
                );
                0.0
            }),
            None => self.median(),
        }
    }

    fn get_all(&self) -> TrackerSeries {
        TrackerSeries::Flat(self.medians.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use rstest::*;

    fn candle(index: i64, volume: f64) -> Candle {
        let minute = 60_000;
        let open_time = Utc.timestamp_millis_opt(index * minute).unwrap();
        let close_time = Utc.timestamp_millis_opt((index + 1) * minute - 1).unwrap();
        Candle::new(open_time, close_time, 1.0, 1.0, 1.0, 1.0, volume)
    }

    fn candles(volumes: &[f64]) -> Vec<Candle> {
        volumes
            .iter()
            .enumerate()
            .map(|(index, volume)| candle(index as i64, *volume))
            .collect()
    }

    fn tracker(volumes: &[f64], lookback: usize) -> MedianTracker {
        MedianTracker::try_new(&candles(volumes), lookback).unwrap()
    }

    fn halves(tracker: &MedianTracker) -> (Vec<f64>, Vec<f64>) {
        let lower: Vec<f64> = tracker.lower.iter().map(|value| value.0).collect();
        let upper: Vec<f64> = tracker
            .upper
            .iter()
            .map(|Reverse(value)| value.0)
            .collect();
        (lower, upper)
    }

    fn assert_invariants(tracker: &MedianTracker) {
        let (lower, upper) = halves(tracker);
        assert!(lower.len() >= upper.len());
        assert!(lower.len() <= upper.len() + 1);
        if let (Some(max_lower), Some(min_upper)) = (
            lower.iter().copied().reduce(f64::max),
            upper.iter().copied().reduce(f64::min),
        ) {
            assert!(max_lower <= min_upper);
        }
    }

    #[rstest]
    #[case::odd_windows(vec![1.0, 3.0, 5.0, 7.0, 9.0], 3, vec![3.0, 5.0, 7.0])]
    #[case::even_window(vec![4.0, 2.0, 8.0, 6.0], 2, vec![3.0, 5.0, 7.0])]
    #[case::exact_fill(vec![9.0, 1.0, 5.0], 3, vec![5.0])]
    #[case::duplicates(vec![2.0, 2.0, 2.0, 7.0], 2, vec![2.0, 2.0, 4.5])]
    fn test_bootstrap_series(
        #[case] volumes: Vec<f64>,
        #[case] lookback: usize,
        #[case] expected: Vec<f64>,
    ) {
        let tracker = tracker(&volumes, lookback);
        assert_eq!(tracker.get_all(), TrackerSeries::Flat(expected));
        assert_invariants(&tracker);
    }

    #[rstest]
    fn test_live_updates_extend_the_series() {
        let mut tracker = tracker(&[1.0, 3.0, 5.0], 3);
        assert_eq!(tracker.get_all(), TrackerSeries::Flat(vec![3.0]));

        let window = candles(&[1.0, 3.0, 5.0, 7.0, 9.0]);
        tracker.update(&window[3], &window[0], &window[2]);
        tracker.update(&window[4], &window[1], &window[3]);

        assert_eq!(
            tracker.get_all(),
            TrackerSeries::Flat(vec![3.0, 5.0, 7.0])
        );
        assert_invariants(&tracker);
    }

    #[rstest]
    #[case::small(vec![5.0, 1.0, 9.0, 7.0, 3.0, 8.0, 2.0], 3)]
    #[case::larger(vec![10.0, 20.0, 30.0, 10.0, 50.0, 20.0, 40.0, 10.0, 60.0, 30.0], 4)]
    fn test_window_content_matches_last_lookback(
        #[case] volumes: Vec<f64>,
        #[case] lookback: usize,
    ) {
        let tracker = tracker(&volumes, lookback);
        assert_invariants(&tracker);

        let (lower, upper) = halves(&tracker);
        let mut window: Vec<f64> = lower.into_iter().chain(upper).collect();
        window.sort_by(f64::total_cmp);

        let mut expected = volumes[volumes.len() - lookback..].to_vec();
        expected.sort_by(f64::total_cmp);

        assert_eq!(window, expected);
    }

    #[rstest]
    fn test_remove_absent_volume_is_a_no_op() {
        let mut tracker = tracker(&[1.0, 3.0, 5.0, 7.0], 4);
        let before = {
            let (mut lower, mut upper) = halves(&tracker);
            lower.sort_by(f64::total_cmp);
            upper.sort_by(f64::total_cmp);
            (lower, upper)
        };

        assert!(!tracker.remove(42.0));

        let after = {
            let (mut lower, mut upper) = halves(&tracker);
            lower.sort_by(f64::total_cmp);
            upper.sort_by(f64::total_cmp);
            (lower, upper)
        };
        assert_eq!(before, after);
    }

    #[rstest]
    fn test_remove_drops_a_single_occurrence() {
        let mut tracker = tracker(&[2.0, 2.0, 5.0], 3);

        assert!(tracker.remove(2.0));

        let (lower, upper) = halves(&tracker);
        let mut window: Vec<f64> = lower.into_iter().chain(upper).collect();
        window.sort_by(f64::total_cmp);
        assert_eq!(window, vec![2.0, 5.0]);
    }

    #[rstest]
    #[case::latest(None, 7.0)]
    #[case::first(Some(0), 3.0)]
    #[case::last(Some(2), 7.0)]
    #[case::out_of_range(Some(3), 0.0)]
    fn test_get_value(#[case] index: Option<usize>, #[case] expected: f64) {
        let tracker = tracker(&[1.0, 3.0, 5.0, 7.0, 9.0], 3);
        let query = ValueQuery {
            index,
            period: None,
        };
        assert_eq!(tracker.get_value(query), expected);
    }

    #[rstest]
    fn test_series_length_tracks_processed_candles() {
        let volumes: Vec<f64> = (0..20).map(|index| (index * 13 % 7) as f64).collect();
        let lookback = 5;
        let tracker = tracker(&volumes, lookback);
        if let TrackerSeries::Flat(series) = tracker.get_all() {
            assert_eq!(series.len(), volumes.len() - lookback + 1);
        } else {
            panic!("expected a flat series");
        }
    }

    #[rstest]
    fn test_replay_is_deterministic() {
        let volumes: Vec<f64> = (0..50).map(|index| ((index * 31) % 17) as f64).collect();
        let first = tracker(&volumes, 7);
        let second = tracker(&volumes, 7);
        assert_eq!(first.get_all(), second.get_all());
    }

    #[rstest]
    #[case::zero_lookback(vec![1.0], 0)]
    #[case::empty_history(vec![], 3)]
    #[case::short_history(vec![1.0, 2.0], 3)]
    fn test_invalid_construction(#[case] volumes: Vec<f64>, #[case] lookback: usize) {
        assert!(MedianTracker::try_new(&candles(&volumes), lookback).is_err());
    }
}
