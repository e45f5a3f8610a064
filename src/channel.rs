use crate::{
    error::Error,
    metrics::{instrument, metadata, unit},
    utils::serde::regex_opt_from_string,
};
use futures::{stream::FuturesUnordered, StreamExt};
use opentelemetry::{
    metrics::{Counter, Meter, Unit},
    KeyValue,
};
use rand::Rng;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, sync::Arc};
use tokio::{
    sync::broadcast,
    time::{self, Duration},
};
use uuid::Uuid;

/// Consecutive failures after which the retry delay stops growing
const MAX_BACKOFF_EXPONENT: u32 = 5;

#[derive(Clone, Debug, Serialize)]
pub struct Post {
    pub body: serde_json::Value,
    pub body_attributes: HashMap<String, String>,
    pub tag: String,
}

impl Post {
    pub fn new(
        body: serde_json::Value,
        body_attributes: HashMap<String, String>,
        tag: String,
    ) -> Self {
        Self {
            body,
            body_attributes,
            tag,
        }
    }
}

#[derive(Clone, Default, Debug, Deserialize)]
pub struct PostFilter {
    #[serde(default)]
    pub body_attributes: HashMap<String, Vec<String>>,
    #[serde(default, deserialize_with = "regex_opt_from_string")]
    pub tag_pattern: Option<Regex>,
}

impl PostFilter {
    pub fn is_match(&self, post: &Post) -> bool {
        let mut superset = true;
        for (k, possible) in self.body_attributes.iter() {
            superset = post
                .body_attributes
                .get(k)
                .map(|v| possible.contains(v))
                .unwrap_or(false);

            if !superset {
                break;
            }
        }
        self.tag_pattern
            .as_ref()
            .map_or(true, |p| p.is_match(&post.tag))
            && superset
    }
}

#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum OrderReason {
    Period(Duration),
    Text(String),
}

/// Actors can receive these orders
#[derive(Clone, Debug, Deserialize, Serialize)]
pub enum Order {
    Exit {
        uuid: Uuid,
        reason: Option<OrderReason>,
    },
    Flush {
        uuid: Uuid,
        reason: Option<OrderReason>,
    },
    Reset {
        uuid: Uuid,
        reason: Option<OrderReason>,
    },
}

impl Order {
    fn with_reason(self, reason: OrderReason) -> Self {
        match self {
            Self::Exit { uuid, .. } => Self::Exit {
                uuid,
                reason: Some(reason),
            },
            Self::Flush { uuid, .. } => Self::Flush {
                uuid,
                reason: Some(reason),
            },
            Self::Reset { uuid, .. } => Self::Reset {
                uuid,
                reason: Some(reason),
            },
        }
    }
}

impl TryInto<Post> for Order {
    type Error = Error;

    fn try_into(self) -> Result<Post, Self::Error> {
        let post = Post::new(
            serde_json::to_value(self)?,
            HashMap::new(),
            String::from("order"),
        );

        Ok(post)
    }
}

impl TryFrom<Post> for Order {
    type Error = Error;

    fn try_from(value: Post) -> Result<Self, Self::Error> {
        let order = serde_json::from_value::<Self>(value.body)?;
        Ok(order)
    }
}

#[derive(Clone)]
pub struct TimerMetrics {
    metadata: [KeyValue; 1],
    /// Count success order sends
    send_success: Counter<u64>,
    /// Count failed order sends
    send_failed: Counter<u64>,
}

impl TimerMetrics {
    pub fn new(name: String, meter: Arc<Meter>) -> Self {
        Self {
            metadata: [KeyValue::new(metadata::ACTOR_NAME, name)],
            send_success: meter
                .u64_counter(instrument::SEND_SUCCESS)
                .with_unit(Unit::new(unit::MESSAGE))
                .init(),
            send_failed: meter
                .u64_counter(instrument::SEND_FAILED)
                .with_unit(Unit::new(unit::MESSAGE))
                .init(),
        }
    }

    fn increment_send_success(&self) {
        self.send_success.add(1, &self.metadata);
    }

    fn increment_send_failed(&self) {
        self.send_failed.add(1, &self.metadata);
    }
}

pub struct Timer {
    order_sender: broadcast::Sender<Post>,
    order: Order,
    periods: Vec<Duration>,
    name: String,
    metrics: TimerMetrics,
}

impl Timer {
    pub fn new(
        order_sender: broadcast::Sender<Post>,
        order: Order,
        periods: Vec<Duration>,
        name: String,
        meter: Arc<Meter>,
    ) -> Self {
        Self {
            order_sender,
            order,
            periods,
            metrics: TimerMetrics::new(name.clone(), meter),
            name,
        }
    }

    fn send(&self, period: Duration) -> Result<(), Error> {
        log::debug!("Send order {:?}", self.order);
        self.order_sender.send(
            self.order
                .clone()
                .with_reason(OrderReason::Period(period))
                .try_into()?,
        )?;
        Ok(())
    }
}

/// Delay before the next attempt after `failures` consecutive send failures.
/// Doubles per failure up to a cap, with up to one extra period of jitter.
fn backoff(period: Duration, failures: u32) -> Duration {
    let exponent = failures.min(MAX_BACKOFF_EXPONENT);
    let jitter: f64 = rand::thread_rng().gen_range(0.0..1.0);
    period.mul_f64(f64::from(1 << exponent) + jitter)
}

pub async fn launch_timer(timer: Timer) -> Result<(), Error> {
    let mut intervals = FuturesUnordered::new();
    let timer = Arc::new(timer);

    for period in timer.periods.clone().into_iter() {
        let cloned = Arc::clone(&timer);
        intervals.push(tokio::spawn(async move {
            let mut interval = time::interval(period);
            interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

            // dont send order when launching timer
            interval.tick().await;

            let mut failures: u32 = 0;
            loop {
                interval.tick().await;
                match cloned.send(interval.period()) {
                    Ok(_) => {
                        failures = 0;
                        cloned.metrics.increment_send_success()
                    }
                    Err(error) => {
                        failures += 1;
                        cloned.metrics.increment_send_failed();
                        let delay = backoff(period, failures);
                        log::warn!(
                            "Timer {} send failed {} time(s), next attempt in {:?}: {:?}",
                            cloned.name,
                            failures,
                            delay,
                            error
                        );
                        time::sleep(delay).await;
                    }
                }
            }
        }))
    }

    loop {
        tokio::select! {
            Some(Ok(_)) = intervals.next() => {},
            else => break,
        }
    }

    Ok(())
}

#[derive(Copy, Clone, Debug, Deserialize, Eq, Hash, PartialEq)]
pub enum PostChannel {
    #[serde(rename = "data")]
    Data,
    #[serde(rename = "signal")]
    Signal,
    #[serde(rename = "order")]
    Order,
}
