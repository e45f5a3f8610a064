//! Processor that owns every symbol ensemble and drives their updates

use async_trait::async_trait;
use chrono::Utc;
use futures::lock::Mutex;
use opentelemetry::metrics::Meter;
use serde::Deserialize;
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::broadcast,
    task::{self, JoinHandle},
    time::Duration,
};
use uuid::Uuid;

use super::{
    HistoryConfig, KlineHistoryClient, SeriesSnapshot, SymbolTracker, TrackerEvent, UpdateOutcome,
};
use crate::{
    actor::Actor,
    channel::{launch_timer, Order, Post, PostChannel, PostFilter, Timer},
    error::Error,
    exchange::KlineInterval,
    processor::{launch_processor, Processor, ProcessorConfig, ProcessorMetrics},
    record::{CandleClose, Record},
};

const DEFAULT_CONCURRENCY: usize = 1;
const DEFAULT_SNAPSHOT_PERIOD: u64 = 60;

/// Maintains one tracker ensemble per configured symbol.
///
/// Ensembles are bootstrapped from REST history before the processor starts
/// serving posts; a symbol whose bootstrap fails is skipped and the others
/// keep running. Updates for one symbol are strictly serialized behind the
/// symbol table lock.
pub struct TrackerProcessor {
    _config: TrackerProcessorConfig,
    symbols: Mutex<Vec<SymbolTracker>>,
    history: KlineHistoryClient,
    meter: Arc<Meter>,
    uuid: Uuid,
    metrics: ProcessorMetrics,
}

impl TrackerProcessor {
    fn new(
        config: TrackerProcessorConfig,
        symbols: Vec<SymbolTracker>,
        meter: Arc<Meter>,
        uuid: Uuid,
    ) -> Self {
        let metrics = ProcessorMetrics::new(config.name.clone(), meter.clone());
        let history = KlineHistoryClient::new(&config.history);

        Self {
            _config: config,
            symbols: Mutex::new(symbols),
            history,
            meter,
            uuid,
            metrics,
        }
    }

    async fn bootstrap(
        config: &TrackerProcessorConfig,
        client: &KlineHistoryClient,
        meter: Arc<Meter>,
    ) -> Vec<SymbolTracker> {
        let mut symbols: Vec<SymbolTracker> = Vec::new();

        for symbol in config.symbols.iter() {
            match Self::onboard(config, client, symbol, meter.clone()).await {
                Ok(tracker) => symbols.push(tracker),
                Err(error) => {
                    log::error!("Skipping symbol {}: {:?}", symbol, error);
                }
            }
        }

        symbols
    }

    async fn onboard(
        config: &TrackerProcessorConfig,
        client: &KlineHistoryClient,
        symbol: &str,
        meter: Arc<Meter>,
    ) -> Result<SymbolTracker, Error> {
        let history = client
            .fetch(symbol, config.interval, config.lookback + 1)
            .await?;
        log::debug!(
            "History for {} fetched at {}.",
            symbol,
            history.fetched_at
        );

        SymbolTracker::try_new(
            config.source.as_str(),
            symbol,
            config.interval,
            &history.candles,
            config.lookback,
            meter,
        )
    }

    /// Rebuild one ensemble from fresh history after a stream gap.
    async fn resync(&self, tracker: &mut SymbolTracker) -> Result<Post, Error> {
        let product = tracker.product();
        log::warn!("Resynchronizing {} from history.", product.symbol);

        *tracker = Self::onboard(
            &self._config,
            &self.history,
            product.symbol.as_str(),
            self.meter.clone(),
        )
        .await?;

        ready_post(&product.symbol)
    }
}

/// Post announcing that a symbol's ensemble accepts live updates
fn ready_post(symbol: &str) -> Result<Post, Error> {
    Ok(Post::new(
        serde_json::json!({ "symbol": symbol }),
        HashMap::from([("symbol".to_string(), symbol.to_string())]),
        format!("ensemble_ready_{}", symbol),
    ))
}

impl Actor for TrackerProcessor {
    fn name(&self) -> String {
        self._config.name.to_string()
    }

    fn uuid(&self) -> Uuid {
        self.uuid
    }
}

#[async_trait]
impl Processor for TrackerProcessor {
    /// Publish every symbol's full historical series
    async fn flush(&self, _: &Post) -> Result<Vec<Post>, Error> {
        let symbols_guard = self.symbols.lock().await;

        symbols_guard
            .iter()
            .map(|tracker| -> Result<Post, Error> {
                SeriesSnapshot {
                    id: Uuid::new_v4(),
                    product: tracker.product(),
                    series: tracker.series(),
                    datetime: Utc::now(),
                }
                .try_into()
            })
            .collect()
    }

    /// Rebuild every ensemble from fresh history
    async fn reset(&self) -> Result<Vec<Post>, Error> {
        let mut symbols_guard = self.symbols.lock().await;
        let mut posts: Vec<Post> = vec![];

        for tracker in symbols_guard.iter_mut() {
            match self.resync(tracker).await {
                Ok(post) => posts.push(post),
                Err(error) => {
                    log::error!(
                        "Reset failed for {}, keeping previous state: {:?}",
                        tracker.product().symbol,
                        error
                    );
                }
            }
        }

        Ok(posts)
    }

    /// Dispatch a candle close event to its symbol's ensemble
    async fn write(&self, post: &Post) -> Result<Vec<Post>, Error> {
        log::debug!("Received candle message: {:?}", post.body);

        let record = Record::try_from(post.clone())?;
        let mut symbols_guard = self.symbols.lock().await;

        let tracker = match symbols_guard
            .iter_mut()
            .find(|tracker| tracker.matches(record.symbol().as_str(), record.interval()))
        {
            Some(tracker) => tracker,
            None => {
                log::warn!(
                    "No ensemble for {} {}, dropping candle.",
                    record.symbol(),
                    record.interval()
                );
                return Ok(vec![]);
            }
        };

        match tracker.apply(record.candle()) {
            UpdateOutcome::Applied(values) => {
                let event = TrackerEvent {
                    id: Uuid::new_v4(),
                    product: tracker.product(),
                    values,
                    datetime: Utc::now(),
                };
                Ok(vec![event.try_into()?])
            }
            UpdateOutcome::Stale => Ok(vec![]),
            UpdateOutcome::Gap { expected } => {
                log::warn!(
                    "Stream gap for {} (expected bucket {}), resynchronizing.",
                    record.symbol(),
                    expected
                );
                match self.resync(tracker).await {
                    Ok(post) => Ok(vec![post]),
                    Err(error) => {
                        log::error!(
                            "Resync failed for {}, keeping previous state: {:?}",
                            record.symbol(),
                            error
                        );
                        Ok(vec![])
                    }
                }
            }
        }
    }

    fn metrics(&self) -> ProcessorMetrics {
        self.metrics.clone()
    }

    fn config(&self) -> Box<dyn ProcessorConfig + Send + Sync> {
        Box::new(self._config.clone())
    }
}

fn default_concurrency() -> usize {
    DEFAULT_CONCURRENCY
}

fn default_snapshot_period() -> Duration {
    Duration::from_secs(DEFAULT_SNAPSHOT_PERIOD)
}

fn default_input() -> PostChannel {
    PostChannel::Data
}

fn default_output() -> PostChannel {
    PostChannel::Signal
}

#[derive(Clone, Debug, Deserialize)]
pub struct TrackerProcessorConfig {
    /// Keep at 1 so updates stay strictly ordered per symbol
    #[serde(rename = "concurrency", default = "default_concurrency")]
    pub _concurrency: usize,
    #[serde(rename = "input", default = "default_input")]
    pub _input: PostChannel,
    #[serde(rename = "output", default = "default_output")]
    pub _output: PostChannel,
    pub name: String,
    pub source: String,
    pub symbols: Vec<String>,
    pub interval: KlineInterval,
    pub lookback: usize,
    pub history: HistoryConfig,
    #[serde(default = "default_snapshot_period")]
    pub snapshot_period: Duration,
    pub filter: PostFilter,
}

#[async_trait]
impl ProcessorConfig for TrackerProcessorConfig {
    async fn build(
        &self,
        meter: Arc<Meter>,
        order: broadcast::Sender<Post>,
        input: broadcast::Sender<Post>,
        output: broadcast::Sender<Post>,
    ) -> Result<
        (
            Arc<Box<dyn Processor + Send + Sync>>,
            JoinHandle<Result<(), Error>>,
        ),
        Error,
    > {
        log::info!("Creating processor: {:?}", self.name);
        let uuid = Uuid::new_v4();

        let client = KlineHistoryClient::new(&self.history);
        let symbols = TrackerProcessor::bootstrap(self, &client, meter.clone()).await;

        // announce each bootstrapped ensemble before live updates start
        for tracker in symbols.iter() {
            let symbol = tracker.product().symbol;
            log::info!("Ensemble ready for {}.", symbol);
            output.send(ready_post(symbol.as_str())?)?;
        }

        // snapshot timer drives periodic full series publication
        let timer = Timer::new(
            order.clone(),
            Order::Flush { uuid, reason: None },
            vec![self.snapshot_period],
            format!("{}_timer", self.name),
            meter.clone(),
        );
        task::spawn(launch_timer(timer));

        let processor: Arc<Box<dyn Processor + Sync + Send>> = Arc::new(Box::new(
            TrackerProcessor::new(self.clone(), symbols, meter, uuid),
        ));

        log::info!("Launching processor: {:?}", self.name);

        let expected_match = Box::new(self.filter.clone());

        let filter = move |post: &Post| -> bool {
            let r#match = *expected_match.to_owned();
            r#match.is_match(post)
        };

        let task = task::spawn(launch_processor(
            processor.clone(),
            Box::new(filter),
            self._concurrency,
            order,
            input,
            output,
        ));

        log::info!("Processor launched: {:?}", self.name);

        Ok((processor, task))
    }

    fn concurrency(&self) -> usize {
        self._concurrency
    }

    fn input(&self) -> PostChannel {
        self._input
    }

    fn output(&self) -> PostChannel {
        self._output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::*;

    #[fixture]
    fn configuration_data() -> &'static str {
        r#"
        {
            "name": "klines_1m",
            "source": "binance",
            "symbols": ["btcusdt", "ethusdt"],
            "interval": "1m",
            "lookback": 30,
            "history": {
                "endpoint": "https://api.binance.com",
                "limit": 200
            },
            "filter": {
                "tag_pattern": "kline_binance_.*"
            }
        }
        "#
    }

    #[rstest]
    fn test_configuration_defaults(configuration_data: &str) {
        let config = serde_json::from_str::<TrackerProcessorConfig>(configuration_data).unwrap();

        assert_eq!(config.name, "klines_1m");
        assert_eq!(config.symbols, vec!["btcusdt", "ethusdt"]);
        assert_eq!(config.interval, KlineInterval::OneMinute);
        assert_eq!(config.lookback, 30);
        assert_eq!(config._concurrency, DEFAULT_CONCURRENCY);
        assert_eq!(config._input, PostChannel::Data);
        assert_eq!(config._output, PostChannel::Signal);
        assert_eq!(
            config.snapshot_period,
            Duration::from_secs(DEFAULT_SNAPSHOT_PERIOD)
        );
        assert_eq!(config.history.limit, 200);
    }

    #[rstest]
    fn test_ready_post_tag() {
        let post = ready_post("btcusdt").unwrap();
        assert_eq!(post.tag, "ensemble_ready_btcusdt");
        assert_eq!(
            post.body_attributes.get("symbol"),
            Some(&"btcusdt".to_string())
        );
    }
}
