use crate::{channel::Post, error::Error, exchange::KlineInterval, tracker::Candle};
use enum_dispatch::enum_dispatch;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

const INTERVAL: &str = "interval";
const SOURCE: &str = "source";
const SYMBOL: &str = "symbol";

/// Represent the behaviour of a candle close event
#[enum_dispatch]
pub trait CandleClose {
    fn candle(&self) -> Candle;
    fn symbol(&self) -> String;
    fn source(&self) -> String;
    fn interval(&self) -> KlineInterval;
}

/// One finalized candle bucket received from a live feed
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
pub struct KlineRecord {
    pub symbol: String,
    pub source: String,
    pub interval: KlineInterval,
    pub candle: Candle,
}

impl CandleClose for KlineRecord {
    fn candle(&self) -> Candle {
        self.candle.clone()
    }

    fn symbol(&self) -> String {
        self.symbol.to_string()
    }

    fn source(&self) -> String {
        self.source.to_string()
    }

    fn interval(&self) -> KlineInterval {
        self.interval
    }
}

#[enum_dispatch(CandleClose)]
#[derive(Clone, Debug, Deserialize, PartialEq, Serialize)]
#[serde(tag = "type")]
pub enum Record {
    #[serde(rename = "kline")]
    Kline(KlineRecord),
}

impl TryInto<Post> for Record {
    type Error = Error;

    fn try_into(self) -> Result<Post, Self::Error> {
        let tag = format!("kline_{}_{}", self.source(), self.symbol());

        let body_attributes: HashMap<String, String> = HashMap::from([
            (SOURCE.to_string(), self.source()),
            (SYMBOL.to_string(), self.symbol()),
            (INTERVAL.to_string(), self.interval().to_string()),
        ]);
        log::debug!("Emit post with tag: {:?}", tag);

        Ok(Post::new(serde_json::to_value(self)?, body_attributes, tag))
    }
}

impl TryFrom<Post> for Record {
    type Error = Error;

    fn try_from(post: Post) -> Result<Self, Self::Error> {
        if !post.body.is_object() {
            return Err(Error::PostNotValidMap);
        }

        let record = serde_json::from_value::<Record>(post.body)?;
        Ok(record)
    }
}
