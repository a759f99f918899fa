use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// A Zabbix item key together with the name shown in reports.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct MetricKey {
    pub key: String,
    #[serde(rename = "name")]
    pub display_name: String,
}

impl MetricKey {
    pub fn new(key: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            key: key.into(),
            display_name: display_name.into(),
        }
    }
}

const STANDARD_METRICS: [(&str, &str); 12] = [
    ("system.cpu.util", "CPU utilization"),
    ("system.cpu.util[,idle]", "CPU idle time"),
    ("system.cpu.util[,iowait]", "CPU iowait time"),
    ("system.cpu.util[,system]", "CPU system time"),
    ("system.cpu.util[,user]", "CPU user time"),
    ("system.cpu.util[,steal]", "CPU steal time"),
    ("system.cpu.num", "Number of CPUs"),
    ("vm.memory.utilization", "Memory utilization"),
    ("vm.memory.size[available]", "Available memory"),
    ("vm.memory.size[pavailable]", "Available memory in %"),
    ("vm.memory.size[used]", "Used memory"),
    ("vm.memory.size[total]", "Total memory"),
];

/// The fixed set of metrics exported for every host, in report order.
///
/// Built once at start-up and shared read-only for the whole run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MetricCatalog {
    metrics: Vec<MetricKey>,
}

impl Default for MetricCatalog {
    fn default() -> Self {
        Self::standard()
    }
}

impl MetricCatalog {
    /// CPU and memory keys of the stock Linux/Windows agent templates.
    pub fn standard() -> Self {
        Self::new(
            STANDARD_METRICS
                .iter()
                .map(|(key, name)| MetricKey::new(*key, *name)),
        )
    }

    /// Build a catalog, keeping the first occurrence of a duplicated key.
    pub fn new(metrics: impl IntoIterator<Item = MetricKey>) -> Self {
        let mut seen = HashSet::new();
        let metrics = metrics
            .into_iter()
            .filter(|m| seen.insert(m.key.clone()))
            .collect();
        Self { metrics }
    }

    pub fn iter(&self) -> impl Iterator<Item = &MetricKey> {
        self.metrics.iter()
    }

    pub fn keys(&self) -> Vec<&str> {
        self.metrics.iter().map(|m| m.key.as_str()).collect()
    }

    pub fn get(&self, key: &str) -> Option<&MetricKey> {
        self.metrics.iter().find(|m| m.key == key)
    }

    pub fn len(&self) -> usize {
        self.metrics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.metrics.is_empty()
    }
}
