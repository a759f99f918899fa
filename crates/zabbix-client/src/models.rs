//! Records returned by the `*.get` methods.
//!
//! Zabbix encodes nearly every number as a JSON string, so numeric fields go
//! through [`string_or_number`].

use std::fmt::Display;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize};

fn string_or_number<'de, D, T>(deserializer: D) -> Result<T, D::Error>
where
    D: Deserializer<'de>,
    T: FromStr,
    T::Err: Display,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Raw {
        Text(String),
        Number(serde_json::Number),
    }

    match Raw::deserialize(deserializer)? {
        Raw::Text(text) => text.trim().parse().map_err(de::Error::custom),
        Raw::Number(number) => number.to_string().parse().map_err(de::Error::custom),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupRecord {
    pub groupid: String,
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HostRecord {
    pub hostid: String,
    pub host: String,
    #[serde(default)]
    pub name: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemRecord {
    pub itemid: String,
    #[serde(rename = "key_")]
    pub key: String,
    #[serde(default)]
    pub name: String,
    #[serde(deserialize_with = "string_or_number")]
    pub value_type: u8,
    #[serde(default)]
    pub units: String,
    /// Raw history storage period, e.g. `"7d"`; `"0"` disables history.
    #[serde(default)]
    pub history: String,
    /// Trend storage period, e.g. `"365d"`; `"0"` disables trends.
    #[serde(default)]
    pub trends: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrendRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub clock: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub num: u64,
    #[serde(deserialize_with = "string_or_number")]
    pub value_min: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub value_avg: f64,
    #[serde(deserialize_with = "string_or_number")]
    pub value_max: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoryRecord {
    #[serde(deserialize_with = "string_or_number")]
    pub clock: i64,
    #[serde(default, deserialize_with = "string_or_number")]
    pub ns: i64,
    #[serde(deserialize_with = "string_or_number")]
    pub value: f64,
}
