use yata::core::OHLCV;

use super::{Candle, IndicatorTracker, TrackerSeries, ValueQuery};
use crate::error::Error;

/// Smoothing periods maintained when none are configured explicitly
pub const DEFAULT_EMA_PERIODS: [usize; 3] = [9, 21, 55];

#[derive(Clone, Debug)]
struct PeriodState {
    period: usize,
    alpha: f64,
    seed_sum: f64,
    seed_count: usize,
    current: Option<f64>,
    series: Vec<f64>,
}

impl PeriodState {
    fn new(period: usize) -> Self {
        Self {
            period,
            alpha: 2.0 / (period as f64 + 1.0),
            seed_sum: 0.0,
            seed_count: 0,
            current: None,
            series: Vec::new(),
        }
    }

    /// Advance this period by one close.
    ///
    /// The first `period` closes accumulate into the simple average seed;
    /// from then on the usual recurrence applies and every step records.
    fn step(&mut self, close: f64) {
        let next = match self.current {
            Some(previous) => self.alpha * close + (1.0 - self.alpha) * previous,
            None => {
                self.seed_sum += close;
                self.seed_count += 1;
                if self.seed_count < self.period {
                    return;
                }
                self.seed_sum / self.period as f64
            }
        };

        self.current = Some(next);
        self.series.push(next);
    }
}

/// Exponential moving averages of the close, one per configured period.
///
/// Every period advances in constant time per candle and owns an
/// independent historical series. Queries without a period address the
/// smallest configured one.
#[derive(Clone, Debug)]
pub struct EmaTracker {
    states: Vec<PeriodState>,
}

impl EmaTracker {
    pub fn try_new(history: &[Candle], lookback: usize) -> Result<Self, Error> {
        Self::with_periods(history, lookback, &DEFAULT_EMA_PERIODS)
    }

    pub fn with_periods(
        history: &[Candle],
        lookback: usize,
        periods: &[usize],
    ) -> Result<Self, Error> {
        if lookback == 0 {
            return Err(Error::Lookback(lookback));
        }
        if history.is_empty() {
            return Err(Error::History(String::from("empty bootstrap history")));
        }
        if periods.is_empty() || periods.contains(&0) {
            return Err(Error::Config(String::from(
                "ema periods must be positive and non empty",
            )));
        }

        let mut sorted = periods.to_vec();
        sorted.sort_unstable();
        sorted.dedup();

        let mut tracker = Self {
            states: sorted.into_iter().map(PeriodState::new).collect(),
        };

        for candle in history {
            tracker.step(candle.close());
        }

        Ok(tracker)
    }

    pub fn periods(&self) -> Vec<usize> {
        self.states.iter().map(|state| state.period).collect()
    }

    fn step(&mut self, close: f64) {
        for state in self.states.iter_mut() {
            state.step(close);
        }
    }

    fn state(&self, period: Option<usize>) -> Option<&PeriodState> {
        match period {
            Some(period) => self.states.iter().find(|state| state.period == period),
            None => self.states.first(),
        }
    }
}

impl IndicatorTracker for EmaTracker {
    fn update(&mut self, new_candle: &Candle, _first_candle: &Candle, _last_candle: &Candle) {
        self.step(new_candle.close());
    }

    fn get_value(&self, query: ValueQuery) -> f64 {
        let state = match self.state(query.period) {
            Some(state) => state,
            None => {
                log::warn!("No ema state for period {:?}.", query.period);
                return 0.0;
            }
        };

        match query.index {
            Some(index) => state.series.get(index).copied().unwrap_or_else(|| {
                log::warn!(
                    "Ema index {} outside recorded history of {} for period {}.",
                    index,
                    state.series.len(),
                    state.period
                );
                0.0
            }),
            None => state.current.unwrap_or_else(|| {
                log::warn!("Ema for period {} is still seeding.", state.period);
                0.0
            }),
        }
    }

    fn get_all(&self) -> TrackerSeries {
        TrackerSeries::PerPeriod(
            self.states
                .iter()
                .map(|state| (state.period, state.series.clone()))
                .collect(),
        )
    }
}
