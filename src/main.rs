//! Signal engine binary.
//!
//! Maintains rolling window indicators over live exchange kline streams:
//! * bootstrap each symbol from REST history
//! * keep every tracker exact as candle close events arrive
//! * publish values and series snapshots to downstream consumers
//!
//! The runtime is a hierarchy of actors exchanging posts over broadcast
//! channels: websocket receivers normalize exchange frames into candle
//! close events, the tracker processor drives one ensemble per symbol.

#[macro_use]
extern crate lazy_static;
extern crate log;
extern crate strum;
extern crate strum_macros;

mod actor;
mod channel;
mod error;
mod record;
mod utils;

mod metrics;
mod processor;
mod websocket;

mod exchange;
mod tracker;

mod pipeline;

use async_trait::async_trait;
use chrono::Local;
use enum_dispatch::enum_dispatch;
use env_logger::Builder;
use error::Error;
use log::LevelFilter;
use metrics::MetricsExporterBuilder;
use opentelemetry::metrics::MeterProvider;
use pipeline::PipelineConfig;
use std::{borrow::Cow, io::Write, path::PathBuf, sync::Arc};
use structopt::StructOpt;

const LOG_LEVEL: &str = "LOG_LEVEL";
const PKG_VERSION: &str = env!("CARGO_PKG_VERSION");
const PKG_NAME: &str = env!("CARGO_PKG_NAME");

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "signal-engine", about = "Market indicator engine cli.")]
struct MainCommand {
    #[structopt(
        long = "log-level",
        help = "Log level of the engine.",
        env = LOG_LEVEL,
        default_value = "info"
    )]
    pub log_level: LevelFilter,
    #[structopt(subcommand)]
    command: Command,
}

#[async_trait]
#[enum_dispatch]
trait Execute {
    async fn execute(&self) -> Result<(), Error>;
}

#[derive(Clone, Debug, StructOpt)]
#[enum_dispatch(Execute)]
enum Command {
    Run(RunCommand),
    Validate(ValidateCommand),
}

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "validate", about = "Validate a pipeline config.")]
struct ValidateCommand {
    #[structopt(
        long = "config",
        short = "c",
        help = "Path to the configuration to validate."
    )]
    pub configuration_path: PathBuf,
    #[structopt(long = "show", help = "Print the parsed configuration.")]
    pub show: bool,
}

#[async_trait]
impl Execute for ValidateCommand {
    async fn execute(&self) -> Result<(), Error> {
        let config = PipelineConfig::try_from(self.configuration_path.clone())?;
        if self.show {
            log::info!("{:#?}", config);
        };
        Ok(())
    }
}

#[derive(Clone, Debug, StructOpt)]
#[structopt(name = "run", about = "Run the engine with a config.")]
struct RunCommand {
    #[structopt(
        short = "c",
        long = "config",
        help = "Configuration path for the market indicators."
    )]
    pub configuration_path: PathBuf,
}

#[async_trait]
impl Execute for RunCommand {
    async fn execute(&self) -> Result<(), Error> {
        log::info!("Start {}!", PKG_NAME);

        // Read configuration from file
        let pipeline_configuration = PipelineConfig::try_from(self.configuration_path.clone())?;

        // Initialize opentelemetry meter
        let otel_controller = pipeline_configuration.service.metrics.build()?;
        let otel_meter = Arc::new(otel_controller.versioned_meter(
            PKG_NAME,
            Some(PKG_VERSION),
            None::<Cow<'static, str>>,
            None,
        ));

        // Initialize pipeline
        let (_pipeline, handles) = pipeline_configuration.init(otel_meter.clone()).await?;

        tokio::select! {
            result = handles => {
            log::info!("Actors have stopped: {:?}", result)
            },
        }
        Ok(())
    }
}

#[tokio::main]
async fn run_app() -> Result<(), Error> {
    let opt = MainCommand::from_args();
    Builder::new()
        .format(|buf, record| {
            writeln!(
                buf,
                "{} - {} - {} - {}",
                Local::now().format("%Y-%m-%dT%H:%M:%S"),
                record.target(),
                record.level(),
                record.args()
            )
        })
        .filter(None, opt.log_level)
        .init();
    opt.command.execute().await
}

fn main() {
    std::process::exit(match run_app() {
        Ok(_) => 0,
        Err(err) => {
            log::error!("error: {:?}", err);
            1
        }
    });
}
