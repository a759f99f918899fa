use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{Host, Summary};

#[derive(Error, Debug)]
pub enum SinkError {
    #[error("failed to write {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to encode group index: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryRow {
    pub metric: String,
    pub min: Option<f64>,
    pub max: Option<f64>,
    pub avg: Option<f64>,
    pub unit: String,
    pub samples: u64,
}

impl From<&Summary> for SummaryRow {
    fn from(summary: &Summary) -> Self {
        Self {
            metric: summary.metric.display_name.clone(),
            min: summary.min(),
            max: summary.max(),
            avg: summary.avg(),
            unit: summary.units.clone(),
            samples: summary.sample_count,
        }
    }
}

/// Everything published for one host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SummaryTable {
    pub host: Host,
    pub rows: Vec<SummaryRow>,
}

impl SummaryTable {
    /// Rows follow the order of `summaries`, which is catalog order.
    pub fn new(host: Host, summaries: &[Summary]) -> Self {
        Self {
            host,
            rows: summaries.iter().map(SummaryRow::from).collect(),
        }
    }

    /// `Metric,Min,Max,Avg,Unit,Samples` with two-decimal statistics.
    pub fn to_csv(&self) -> String {
        let mut out = String::from("Metric,Min,Max,Avg,Unit,Samples\n");
        for row in &self.rows {
            let _ = writeln!(
                out,
                "{},{},{},{},{},{}",
                csv_field(&row.metric),
                format_stat(row.min),
                format_stat(row.max),
                format_stat(row.avg),
                csv_field(&row.unit),
                row.samples
            );
        }
        out
    }
}

fn format_stat(value: Option<f64>) -> String {
    value.map(|v| format!("{:.2}", v)).unwrap_or_default()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Host group membership of one tenant, as seen during discovery.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GroupIndex {
    pub host_to_groups: BTreeMap<String, BTreeSet<String>>,
    pub groups: BTreeMap<String, BTreeSet<String>>,
}

impl GroupIndex {
    pub fn record(&mut self, group: &str, host: &str) {
        self.host_to_groups
            .entry(host.to_string())
            .or_default()
            .insert(group.to_string());
        self.groups
            .entry(group.to_string())
            .or_default()
            .insert(host.to_string());
    }

    pub fn is_empty(&self) -> bool {
        self.host_to_groups.is_empty()
    }
}

/// Destination for finished host tables.
#[async_trait]
pub trait ResultSink: Send + Sync {
    async fn publish(&self, tenant_id: &str, table: &SummaryTable) -> Result<(), SinkError>;

    async fn publish_group_index(&self, tenant_id: &str, index: &GroupIndex) -> Result<(), SinkError>;
}

/// Writes `<root>/<tenant>/<host>.csv` plus `_hostgroups_info.json`.
#[derive(Debug, Clone)]
pub struct CsvDirectorySink {
    root: PathBuf,
}

pub const GROUP_INDEX_FILE: &str = "_hostgroups_info.json";

impl CsvDirectorySink {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn tenant_dir(&self, tenant_id: &str) -> PathBuf {
        self.root.join(sanitize_file_name(tenant_id))
    }

    pub fn table_path(&self, tenant_id: &str, host_name: &str) -> PathBuf {
        self.tenant_dir(tenant_id)
            .join(format!("{}.csv", sanitize_file_name(host_name)))
    }

    async fn write_file(&self, path: &Path, contents: &[u8]) -> Result<(), SinkError> {
        let io_err = |source| SinkError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await.map_err(io_err)?;
        }
        // Readers never see a half-written file.
        let partial = path.with_extension("partial");
        tokio::fs::write(&partial, contents).await.map_err(io_err)?;
        tokio::fs::rename(&partial, path).await.map_err(io_err)?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for CsvDirectorySink {
    async fn publish(&self, tenant_id: &str, table: &SummaryTable) -> Result<(), SinkError> {
        let path = self.table_path(tenant_id, &table.host.name);
        self.write_file(&path, table.to_csv().as_bytes()).await?;
        debug!("Wrote {} rows to {}", table.rows.len(), path.display());
        Ok(())
    }

    async fn publish_group_index(&self, tenant_id: &str, index: &GroupIndex) -> Result<(), SinkError> {
        let path = self.tenant_dir(tenant_id).join(GROUP_INDEX_FILE);
        let json = serde_json::to_vec_pretty(index)?;
        self.write_file(&path, &json).await?;
        info!(
            "Tenant {}: group index with {} hosts written to {}",
            tenant_id,
            index.host_to_groups.len(),
            path.display()
        );
        Ok(())
    }
}

/// Turn a name into a single safe path component.
///
/// Anything other than alphanumerics, `-`, `_` and `.` is percent-encoded
/// byte by byte, `%` included, so distinct names never share a file. A name
/// made only of dots is encoded whole.
pub fn sanitize_file_name(name: &str) -> String {
    if name.is_empty() {
        return "%".to_string();
    }
    let all_dots = name.chars().all(|c| c == '.');
    let mut out = String::with_capacity(name.len());
    for c in name.chars() {
        if !all_dots && (c.is_alphanumeric() || matches!(c, '-' | '_' | '.')) {
            out.push(c);
        } else {
            let mut buf = [0u8; 4];
            for byte in c.encode_utf8(&mut buf).bytes() {
                let _ = write!(out, "%{:02X}", byte);
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::MetricKey;
    use crate::stats::Stats;
    use crate::types::DataSource;

    fn host(name: &str) -> Host {
        Host {
            id: "10084".to_string(),
            name: name.to_string(),
            visible_name: name.to_string(),
            groups: vec!["Linux servers".to_string()],
        }
    }

    fn summary(name: &str, units: &str, stats: Stats, count: u64) -> Summary {
        Summary {
            metric: MetricKey::new("key", name),
            units: units.to_string(),
            stats: Some(stats),
            sample_count: count,
            source: DataSource::Raw,
        }
    }

    #[test]
    fn csv_uses_two_decimals_and_quotes_fields() {
        let table = SummaryTable::new(
            host("web01"),
            &[
                summary(
                    "CPU utilization",
                    "%",
                    Stats {
                        min: 5.0,
                        max: 89.0,
                        avg: 42.0,
                    },
                    1440,
                ),
                summary(
                    "Load, 1 min \"avg\"",
                    "",
                    Stats {
                        min: 0.2,
                        max: 3.0,
                        avg: 1.0 / 3.0,
                    },
                    10,
                ),
            ],
        );
        assert_eq!(
            table.to_csv(),
            "Metric,Min,Max,Avg,Unit,Samples\n\
             CPU utilization,5.00,89.00,42.00,%,1440\n\
             \"Load, 1 min \"\"avg\"\"\",0.20,3.00,0.33,,10\n"
        );
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("web01.example.com"), "web01.example.com");
        assert_eq!(sanitize_file_name("web_01"), "web_01");
        assert_eq!(sanitize_file_name("db/primary:5432"), "db%2Fprimary%3A5432");
        assert_eq!(sanitize_file_name(".."), "%2E%2E");
        assert_eq!(sanitize_file_name(""), "%");
    }

    #[test]
    fn distinct_host_names_never_share_a_file() {
        let names = ["web 01", "web_01", "web%2001", "web%01", "web/01", " web01", "web01", "%", "_", ".", "%2E"];
        let files: BTreeSet<String> = names.iter().map(|n| sanitize_file_name(n)).collect();
        assert_eq!(files.len(), names.len());
    }

    #[tokio::test]
    async fn hosts_differing_only_in_punctuation_get_separate_tables() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvDirectorySink::new(dir.path());
        let stats = Stats {
            min: 1.0,
            max: 1.0,
            avg: 1.0,
        };
        for (name, count) in [("web 01", 1), ("web_01", 2)] {
            let table = SummaryTable::new(host(name), &[summary("CPU utilization", "%", stats, count)]);
            sink.publish("acme", &table).await.unwrap();
        }

        let spaced = std::fs::read_to_string(sink.table_path("acme", "web 01")).unwrap();
        let underscored = std::fs::read_to_string(dir.path().join("acme/web_01.csv")).unwrap();
        assert!(spaced.ends_with(",1\n"));
        assert!(underscored.ends_with(",2\n"));
    }

    #[test]
    fn group_index_tracks_both_directions() {
        let mut index = GroupIndex::default();
        index.record("Linux servers", "web01");
        index.record("Web", "web01");
        index.record("Linux servers", "db01");
        assert_eq!(index.host_to_groups["web01"].len(), 2);
        assert_eq!(index.groups["Linux servers"].len(), 2);
    }

    #[tokio::test]
    async fn csv_sink_writes_per_tenant_directories() {
        let dir = tempfile::tempdir().unwrap();
        let sink = CsvDirectorySink::new(dir.path());
        let table = SummaryTable::new(
            host("web01"),
            &[summary(
                "CPU utilization",
                "%",
                Stats {
                    min: 1.0,
                    max: 2.0,
                    avg: 1.5,
                },
                2,
            )],
        );
        sink.publish("acme", &table).await.unwrap();

        let mut index = GroupIndex::default();
        index.record("Linux servers", "web01");
        sink.publish_group_index("acme", &index).await.unwrap();

        let csv = std::fs::read_to_string(dir.path().join("acme/web01.csv")).unwrap();
        assert!(csv.starts_with("Metric,Min,Max,Avg,Unit,Samples\n"));
        let json = std::fs::read_to_string(dir.path().join("acme").join(GROUP_INDEX_FILE)).unwrap();
        let decoded: GroupIndex = serde_json::from_str(&json).unwrap();
        assert_eq!(decoded, index);
        assert!(!dir.path().join("acme/web01.partial").exists());
    }
}
