use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use zabbix_client::{HostRecord, ItemRecord};

use crate::catalog::MetricKey;
use crate::stats::Stats;

/// Inclusive time range `[start, end]` reduced by one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Window {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl Window {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Self {
        Self { start, end }
    }

    /// The `days` days leading up to `now`.
    pub fn last_days(now: DateTime<Utc>, days: u32) -> Self {
        Self {
            start: now - Duration::days(i64::from(days)),
            end: now,
        }
    }

    pub fn start_ts(&self) -> i64 {
        self.start.timestamp()
    }

    pub fn end_ts(&self) -> i64 {
        self.end.timestamp()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Host {
    pub id: String,
    /// Technical host name, used to key output artifacts.
    pub name: String,
    pub visible_name: String,
    /// Host groups the host was discovered through.
    #[serde(default)]
    pub groups: Vec<String>,
}

impl Host {
    pub fn from_record(record: HostRecord, group: &str) -> Self {
        let visible_name = if record.name.is_empty() {
            record.host.clone()
        } else {
            record.name
        };
        Self {
            id: record.hostid,
            name: record.host,
            visible_name,
            groups: vec![group.to_string()],
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueKind {
    Float,
    Unsigned,
    /// Character, log and text items carry no statistics.
    NonNumeric(u8),
}

impl ValueKind {
    pub fn from_value_type(value_type: u8) -> Self {
        match value_type {
            0 => Self::Float,
            3 => Self::Unsigned,
            other => Self::NonNumeric(other),
        }
    }

    /// The `history` parameter `history.get` expects for this kind.
    pub fn value_type(self) -> u8 {
        match self {
            Self::Float => 0,
            Self::Unsigned => 3,
            Self::NonNumeric(other) => other,
        }
    }

    pub fn is_numeric(self) -> bool {
        !matches!(self, Self::NonNumeric(_))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RetentionClass {
    RawOnly,
    TrendOnly,
    Both,
    Neither,
}

fn storage_enabled(period: &str) -> bool {
    let period = period.trim();
    let number = period
        .strip_suffix(|c: char| matches!(c, 's' | 'm' | 'h' | 'd' | 'w'))
        .unwrap_or(period);
    !matches!(number.parse::<u64>(), Ok(0))
}

impl RetentionClass {
    /// Derive the class from an item's `history`/`trends` storage periods.
    ///
    /// A period of zero disables the store; macros and empty values are
    /// assumed to keep data. Trends only exist for numeric items.
    pub fn from_periods(history: &str, trends: &str, kind: ValueKind) -> Self {
        let raw = storage_enabled(history);
        let trend = kind.is_numeric() && storage_enabled(trends);
        match (raw, trend) {
            (true, true) => Self::Both,
            (true, false) => Self::RawOnly,
            (false, true) => Self::TrendOnly,
            (false, false) => Self::Neither,
        }
    }

    pub fn keeps_raw(self) -> bool {
        matches!(self, Self::RawOnly | Self::Both)
    }

    pub fn keeps_trend(self) -> bool {
        matches!(self, Self::TrendOnly | Self::Both)
    }
}

/// A catalog metric resolved to one item of one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ItemBinding {
    pub metric: MetricKey,
    pub item_id: String,
    pub item_name: String,
    pub units: String,
    pub value_kind: ValueKind,
    pub retention: RetentionClass,
}

impl ItemBinding {
    pub fn from_record(metric: MetricKey, record: ItemRecord) -> Self {
        let value_kind = ValueKind::from_value_type(record.value_type);
        let retention = RetentionClass::from_periods(&record.history, &record.trends, value_kind);
        Self {
            metric,
            item_id: record.itemid,
            item_name: record.name,
            units: record.units,
            value_kind,
            retention,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DataPoint {
    Raw {
        clock: i64,
        value: f64,
    },
    /// One pre-aggregated interval, normally an hour.
    Trend {
        clock: i64,
        min: f64,
        max: f64,
        avg: f64,
        count: u64,
    },
}

impl DataPoint {
    pub fn clock(&self) -> i64 {
        match self {
            Self::Raw { clock, .. } | Self::Trend { clock, .. } => *clock,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DataSource {
    Trend,
    Raw,
    Merged,
}

/// Statistics for one metric of one host over the window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Summary {
    pub metric: MetricKey,
    pub units: String,
    /// Absent when no samples were consumed.
    pub stats: Option<Stats>,
    pub sample_count: u64,
    pub source: DataSource,
}

impl Summary {
    pub fn min(&self) -> Option<f64> {
        self.stats.map(|s| s.min)
    }

    pub fn max(&self) -> Option<f64> {
        self.stats.map(|s| s.max)
    }

    pub fn avg(&self) -> Option<f64> {
        self.stats.map(|s| s.avg)
    }
}
