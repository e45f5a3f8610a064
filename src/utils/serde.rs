//! Serde utils

use regex::Regex;
use serde::de::{self, Visitor};
use serde::{Deserialize, Deserializer};
use std::fmt;
use std::str::FromStr;

struct F64InQuotes;

impl<'de> Visitor<'de> for F64InQuotes {
    type Value = f64;

    fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str("f64 as a number or string")
    }

    fn visit_f64<E>(self, id: f64) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        Ok(id)
    }

    fn visit_str<E>(self, s: &str) -> Result<Self::Value, E>
    where
        E: de::Error,
    {
        s.parse().map_err(de::Error::custom)
    }
}

pub fn f64_from_string<'de, D>(d: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    d.deserialize_any(F64InQuotes)
}

pub fn regex_opt_from_string<'de, D>(d: D) -> Result<Option<Regex>, D::Error>
where
    D: Deserializer<'de>,
{
    let s = String::deserialize(d)?;
    if s.is_empty() {
        Ok(None)
    } else {
        Regex::from_str(&s).map_err(de::Error::custom).map(Some)
    }
}

#[cfg(test)]
mod tests {
    use super::f64_from_string;
    use rstest::*;
    use serde::Deserialize;

    #[derive(Debug, Deserialize)]
    struct Quoted {
        #[serde(deserialize_with = "f64_from_string")]
        value: f64,
    }

    #[rstest]
    #[case::quoted(r#"{"value": "42.5"}"#, 42.5)]
    #[case::bare(r#"{"value": 42.5}"#, 42.5)]
    fn test_f64_in_quotes(#[case] data: &'static str, #[case] expected: f64) {
        let parsed = serde_json::from_str::<Quoted>(data).unwrap();
        assert_eq!(parsed.value, expected);
    }
}
