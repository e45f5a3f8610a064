use enum_dispatch::enum_dispatch;
use futures::future::{join_all, JoinAll};
use opentelemetry::metrics::Meter;
use serde::Deserialize;
use std::{collections::HashMap, fs::File, io::BufReader, path::PathBuf, pin::Pin, sync::Arc};
use tokio::{sync::broadcast, task::JoinHandle};
use tokio_tungstenite::tungstenite::Message as TMessage;

use crate::{
    channel::{Post, PostChannel},
    error::Error,
    exchange::ExchangeReceiverConfig,
    metrics::MetricsConfig,
    processor::{Processor, ProcessorConfig},
    tracker::TrackerProcessorConfig,
    websocket::{WebsocketClient, WebsocketReceiverConfig, WebsocketStream},
};

const DEFAULT_CHANNEL_CAPACITY: usize = 100;

pub struct Channel<T> {
    #[allow(dead_code)]
    receiver: broadcast::Receiver<T>,
    sender: broadcast::Sender<T>,
}

impl<T: Clone> Channel<T> {
    fn new(capacity: usize) -> Self {
        let (sender, receiver) = broadcast::channel::<T>(capacity);

        Self { receiver, sender }
    }
}

#[allow(dead_code)]
pub struct Pipeline {
    config: PipelineConfig,

    receivers: Vec<Arc<Box<dyn WebsocketClient + Send + Sync>>>,
    processors: Vec<Arc<Box<dyn Processor + Send + Sync>>>,
    channels: HashMap<PostChannel, Channel<Post>>,
}

/// Represents a live feed to receive candle events from
#[enum_dispatch(WebsocketReceiverConfig)]
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineReceiverConfig {
    #[serde(rename = "exchange")]
    Exchange(ExchangeReceiverConfig),
}

#[enum_dispatch(ProcessorConfig)]
#[derive(Clone, Debug, Deserialize)]
#[serde(tag = "type")]
pub enum PipelineProcessorConfig {
    #[serde(rename = "tracker")]
    Tracker(TrackerProcessorConfig),
}

#[derive(Clone, Debug, Deserialize)]
pub struct ChannelConfig {
    pub signal_capacity: usize,
    pub data_capacity: usize,
    pub order_capacity: usize,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            signal_capacity: DEFAULT_CHANNEL_CAPACITY,
            data_capacity: 5 * DEFAULT_CHANNEL_CAPACITY,
            order_capacity: DEFAULT_CHANNEL_CAPACITY,
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ServiceConfig {
    #[serde(default)]
    pub metrics: MetricsConfig,
    #[serde(default)]
    pub channels: ChannelConfig,
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct PipelineConfig {
    #[serde(default)]
    pub service: ServiceConfig,
    #[serde(default)]
    pub processors: Vec<PipelineProcessorConfig>,
    #[serde(default)]
    pub receivers: Vec<PipelineReceiverConfig>,
}

impl PipelineConfig {
    pub fn try_from(path: PathBuf) -> Result<Self, Error> {
        log::info!("Use path {}", path.to_str().unwrap_or(""));

        let file = File::open(path.clone())?;
        let reader = BufReader::new(file);

        let config: PipelineConfig = match path.extension() {
            None => Err(Error::Config(
                path.to_str().unwrap_or("Invalid path.").to_string(),
            )),
            Some(os_str) => match os_str.to_str() {
                Some("json") => serde_json::from_reader(reader).map_err(Error::from),
                Some("yaml") | Some("yml") => serde_yaml::from_reader(reader).map_err(Error::from),
                _ => Err(Error::Config("Invalid extension.".to_string())),
            },
        }?;

        Ok(config)
    }

    /// Wire channels, then processors, then receivers.
    ///
    /// Processors bootstrap their ensembles inside `build`, so every
    /// ensemble is ready before the first websocket frame arrives.
    pub async fn init(
        self,
        meter: Arc<Meter>,
    ) -> Result<(Pipeline, JoinAll<JoinHandle<Result<(), Error>>>), Error> {
        let mut channels: HashMap<PostChannel, Channel<Post>> = HashMap::new();

        channels.insert(
            PostChannel::Data,
            Channel::<Post>::new(self.service.channels.data_capacity),
        );
        channels.insert(
            PostChannel::Signal,
            Channel::<Post>::new(self.service.channels.signal_capacity),
        );
        channels.insert(
            PostChannel::Order,
            Channel::<Post>::new(self.service.channels.order_capacity),
        );

        let mut handles: Vec<JoinHandle<Result<(), Error>>> = vec![];
        let mut receivers: Vec<Arc<Box<dyn WebsocketClient + Send + Sync>>> = vec![];
        let mut processors: Vec<Arc<Box<dyn Processor + Send + Sync>>> = vec![];

        for config in self.processors.iter() {
            let (processor, handle) = config
                .build(
                    meter.clone(),
                    channels
                        .get(&PostChannel::Order)
                        .ok_or(Error::Setup)?
                        .sender
                        .clone(),
                    channels
                        .get(&config.input())
                        .ok_or(Error::Setup)?
                        .sender
                        .clone(),
                    channels
                        .get(&config.output())
                        .ok_or(Error::Setup)?
                        .sender
                        .clone(),
                )
                .await?;

            processors.push(processor);
            handles.push(handle);
        }

        log::info!("Processors created");

        for config in self.receivers.iter() {
            let (receiver, handle) = config
                .build(
                    meter.clone(),
                    channels
                        .get(&PostChannel::Order)
                        .ok_or(Error::Setup)?
                        .sender
                        .clone(),
                    channels
                        .get(&config.output())
                        .ok_or(Error::Setup)?
                        .sender
                        .clone(),
                )
                .await?;

            receivers.push(receiver);
            handles.push(handle);
        }

        log::info!("Receivers created");

        let config = self;
        let pipeline = Pipeline {
            config,
            receivers,
            processors,
            channels,
        };

        log::info!("Pipeline created");

        Ok((pipeline, join_all(handles)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::exchange::ExchangeSpecificConfig;
    use rstest::*;
    use std::io::Write;

    #[fixture]
    fn configuration_data() -> &'static str {
        r#"
        {
            "service": {
                "metrics": {
                    "type": "otlp",
                    "period": {
                        "secs": 15,
                        "nanos": 0
                    }
                },
                "channels": {
                    "signal_capacity": 100,
                    "data_capacity": 500,
                    "order_capacity": 100
                }
            },
            "receivers": [
                {
                    "name": "binance_klines",
                    "type": "exchange",
                    "exchange": {
                        "source": "binance",
                        "uri": "wss://stream.binance.com:9443/ws",
                        "subscription": {
                            "method": "SUBSCRIBE",
                            "params": ["btcusdt@kline_1m", "ethusdt@kline_1m"],
                            "id": 1
                        }
                    },
                    "concurrency": 3,
                    "output": "data"
                }
            ],
            "processors": [
                {
                    "name": "klines_1m",
                    "type": "tracker",
                    "source": "binance",
                    "symbols": ["btcusdt", "ethusdt"],
                    "interval": "1m",
                    "lookback": 30,
                    "history": {
                        "endpoint": "https://api.binance.com"
                    },
                    "snapshot_period": {
                        "secs": 60,
                        "nanos": 0
                    },
                    "filter": {
                        "tag_pattern": "kline_binance_.*"
                    },
                    "concurrency": 1,
                    "input": "data",
                    "output": "signal"
                }
            ]
        }
        "#
    }

    #[rstest]
    fn test_configuration(configuration_data: &str) {
        let configuration = serde_json::from_str::<PipelineConfig>(configuration_data).unwrap();

        for config in configuration.receivers {
            match &config {
                PipelineReceiverConfig::Exchange(config) => {
                    matches!(config.exchange, ExchangeSpecificConfig::Binance { .. });
                }
            }
        }

        for config in configuration.processors {
            match &config {
                PipelineProcessorConfig::Tracker(config) => {
                    assert_eq!(config.lookback, 30);
                }
            }
        }
    }

    #[rstest]
    fn test_configuration_from_file(configuration_data: &str) {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("pipeline.json");
        let mut file = File::create(path.clone()).unwrap();
        file.write_all(configuration_data.as_bytes()).unwrap();

        let configuration = PipelineConfig::try_from(path).unwrap();
        assert_eq!(configuration.receivers.len(), 1);
        assert_eq!(configuration.processors.len(), 1);
        assert_eq!(configuration.service.channels.data_capacity, 500);
    }

    #[rstest]
    fn test_configuration_rejects_unknown_extension(configuration_data: &str) {
        let directory = tempfile::tempdir().unwrap();
        let path = directory.path().join("pipeline.toml");
        let mut file = File::create(path.clone()).unwrap();
        file.write_all(configuration_data.as_bytes()).unwrap();

        assert!(matches!(
            PipelineConfig::try_from(path),
            Err(Error::Config(..))
        ));
    }
}
