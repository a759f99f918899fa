//! What happened during a run, per tenant, host and metric.

use chrono::{DateTime, Utc};
use log::{error, info, warn};
use serde::Serialize;

use crate::engine::{MetricOutcome, SkipReason};
use crate::types::{DataSource, ItemBinding, Window};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricStatus {
    Ok,
    NoData,
    NonNumeric,
    NoRetention,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MetricReport {
    pub key: String,
    pub name: String,
    pub item_id: String,
    pub status: MetricStatus,
    pub samples: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<DataSource>,
}

impl MetricReport {
    pub fn new(binding: &ItemBinding, outcome: &MetricOutcome) -> Self {
        let (status, samples, source) = match outcome {
            MetricOutcome::Summarized(summary) => {
                (MetricStatus::Ok, summary.sample_count, Some(summary.source))
            }
            MetricOutcome::Skipped(SkipReason::NoData) => (MetricStatus::NoData, 0, None),
            MetricOutcome::Skipped(SkipReason::NonNumeric) => (MetricStatus::NonNumeric, 0, None),
            MetricOutcome::Skipped(SkipReason::NoRetention) => (MetricStatus::NoRetention, 0, None),
            MetricOutcome::Failed { reason } => (MetricStatus::Failed(reason.clone()), 0, None),
        };
        Self {
            key: binding.metric.key.clone(),
            name: binding.metric.display_name.clone(),
            item_id: binding.item_id.clone(),
            status,
            samples,
            source,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum HostStatus {
    /// Every bound metric was summarized.
    Success,
    /// Published, but some bound metrics were skipped or failed.
    Partial,
    /// Nothing to publish: no catalog items, or none of them summarized.
    Empty,
    Failed(String),
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HostReport {
    pub host_id: String,
    pub host: String,
    pub status: HostStatus,
    pub metrics: Vec<MetricReport>,
    pub published: bool,
}

impl HostReport {
    pub fn summarized(&self) -> usize {
        self.count(|s| *s == MetricStatus::Ok)
    }

    pub fn failed(&self) -> usize {
        self.count(|s| matches!(s, MetricStatus::Failed(_)))
    }

    fn count(&self, pred: impl Fn(&MetricStatus) -> bool) -> usize {
        self.metrics.iter().filter(|m| pred(&m.status)).count()
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TenantStatus {
    Completed,
    AuthFailed(String),
    /// Host enumeration broke off; hosts finished before that are kept.
    DiscoveryFailed(String),
    /// The session expired for good; remaining hosts were abandoned.
    Aborted(String),
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct TenantReport {
    pub tenant: String,
    pub status: TenantStatus,
    pub hosts: Vec<HostReport>,
}

impl TenantReport {
    pub fn new(tenant: impl Into<String>, status: TenantStatus) -> Self {
        Self {
            tenant: tenant.into(),
            status,
            hosts: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct RunTotals {
    pub tenants: usize,
    pub tenants_completed: usize,
    pub hosts: usize,
    pub hosts_published: usize,
    pub metrics_summarized: usize,
    pub metrics_skipped: usize,
    pub metrics_failed: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RunReport {
    pub window: Window,
    pub generated_at: DateTime<Utc>,
    pub tenants: Vec<TenantReport>,
}

impl RunReport {
    pub fn tenant(&self, id: &str) -> Option<&TenantReport> {
        self.tenants.iter().find(|t| t.tenant == id)
    }

    pub fn totals(&self) -> RunTotals {
        let mut totals = RunTotals {
            tenants: self.tenants.len(),
            ..RunTotals::default()
        };
        for tenant in &self.tenants {
            if tenant.status == TenantStatus::Completed {
                totals.tenants_completed += 1;
            }
            for host in &tenant.hosts {
                totals.hosts += 1;
                if host.published {
                    totals.hosts_published += 1;
                }
                let summarized = host.summarized();
                let failed = host.failed();
                totals.metrics_summarized += summarized;
                totals.metrics_failed += failed;
                totals.metrics_skipped += host.metrics.len() - summarized - failed;
            }
        }
        totals
    }

    pub fn any_completed(&self) -> bool {
        self.tenants
            .iter()
            .any(|t| t.status == TenantStatus::Completed)
    }

    pub fn log_summary(&self) {
        for tenant in &self.tenants {
            match &tenant.status {
                TenantStatus::Completed => info!(
                    "Tenant {}: completed, {} hosts",
                    tenant.tenant,
                    tenant.hosts.len()
                ),
                TenantStatus::Cancelled => warn!(
                    "Tenant {}: cancelled after {} hosts",
                    tenant.tenant,
                    tenant.hosts.len()
                ),
                TenantStatus::AuthFailed(reason) => {
                    error!("Tenant {}: authentication failed: {}", tenant.tenant, reason)
                }
                TenantStatus::DiscoveryFailed(reason) => error!(
                    "Tenant {}: host discovery failed after {} hosts: {}",
                    tenant.tenant,
                    tenant.hosts.len(),
                    reason
                ),
                TenantStatus::Aborted(reason) => error!(
                    "Tenant {}: aborted after {} hosts: {}",
                    tenant.tenant,
                    tenant.hosts.len(),
                    reason
                ),
            }
            for host in &tenant.hosts {
                if let HostStatus::Failed(reason) = &host.status {
                    warn!("Tenant {}: host {} failed: {}", tenant.tenant, host.host, reason);
                }
            }
        }

        let totals = self.totals();
        info!(
            "Run finished: {}/{} tenants completed, {} hosts ({} published), metrics {} ok / {} skipped / {} failed",
            totals.tenants_completed,
            totals.tenants,
            totals.hosts,
            totals.hosts_published,
            totals.metrics_summarized,
            totals.metrics_skipped,
            totals.metrics_failed
        );
    }
}
