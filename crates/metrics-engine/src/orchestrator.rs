use std::pin::pin;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::{stream, StreamExt};
use log::{debug, error, info, warn};
use tokio_util::sync::CancellationToken;
use zabbix_client::{ApiError, Session, SessionManager, Tenant};

use crate::catalog::MetricCatalog;
use crate::engine::{summarize, AggregationPolicy, MetricOutcome};
use crate::report::{HostReport, HostStatus, MetricReport, RunReport, TenantReport, TenantStatus};
use crate::resolver::{discover_hosts, resolve_items, HostScope};
use crate::sink::{GroupIndex, ResultSink, SummaryTable};
use crate::types::{Host, Window};

#[derive(Debug, Clone)]
pub struct RunSettings {
    /// Hosts processed at once within one tenant.
    pub host_concurrency: usize,
    pub tenant_concurrency: usize,
    pub policy: AggregationPolicy,
    pub host_scope: HostScope,
    /// Catalog keys per `item.get` request.
    pub item_page_size: usize,
}

impl Default for RunSettings {
    fn default() -> Self {
        Self {
            host_concurrency: 4,
            tenant_concurrency: 1,
            policy: AggregationPolicy::default(),
            host_scope: HostScope::default(),
            item_page_size: 50,
        }
    }
}

enum HostEvent {
    Done(HostReport),
    Discovery(ApiError),
    Expired(ApiError),
}

/// Drives one collection run over every configured tenant.
pub struct Orchestrator {
    sessions: SessionManager,
    catalog: Arc<MetricCatalog>,
    sink: Arc<dyn ResultSink>,
    settings: RunSettings,
    cancel: CancellationToken,
}

impl Orchestrator {
    pub fn new(
        sessions: SessionManager,
        catalog: Arc<MetricCatalog>,
        sink: Arc<dyn ResultSink>,
        settings: RunSettings,
    ) -> Self {
        Self {
            sessions,
            catalog,
            sink,
            settings,
            cancel: CancellationToken::new(),
        }
    }

    /// Stop the run when `cancel` fires; finished hosts stay published.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// Process every tenant over `window`. Never fails: each tenant's
    /// outcome, good or bad, lands in the returned report.
    pub async fn run(&self, tenants: &[Tenant], window: Window, now: DateTime<Utc>) -> RunReport {
        info!(
            "Starting run over {} tenants, window {} .. {}",
            tenants.len(),
            window.start,
            window.end
        );
        let reports: Vec<TenantReport> = stream::iter(tenants)
            .map(|tenant| self.run_tenant(tenant, window, now))
            .buffered(self.settings.tenant_concurrency.max(1))
            .collect()
            .await;

        RunReport {
            window,
            generated_at: now,
            tenants: reports,
        }
    }

    async fn run_tenant(&self, tenant: &Tenant, window: Window, now: DateTime<Utc>) -> TenantReport {
        if self.cancel.is_cancelled() {
            return TenantReport::new(&tenant.id, TenantStatus::Cancelled);
        }

        let session = tokio::select! {
            _ = self.cancel.cancelled() => {
                return TenantReport::new(&tenant.id, TenantStatus::Cancelled);
            }
            result = self.sessions.authenticate(tenant) => match result {
                Ok(session) => session,
                Err(e) => {
                    error!("Tenant {}: authentication failed: {}", tenant.id, e);
                    return TenantReport::new(&tenant.id, TenantStatus::AuthFailed(e.to_string()));
                }
            },
        };

        let mut report = TenantReport::new(&tenant.id, TenantStatus::Completed);
        let mut index = GroupIndex::default();
        report.status = self
            .process_hosts(&session, window, now, &mut index, &mut report.hosts)
            .await;
        session.release().await;

        if !index.is_empty() {
            if let Err(e) = self.sink.publish_group_index(&tenant.id, &index).await {
                error!("Tenant {}: failed to publish group index: {}", tenant.id, e);
            }
        }
        info!(
            "Tenant {}: {:?}, {} hosts processed",
            tenant.id,
            report.status,
            report.hosts.len()
        );
        report
    }

    async fn process_hosts(
        &self,
        session: &Session,
        window: Window,
        now: DateTime<Utc>,
        index: &mut GroupIndex,
        hosts: &mut Vec<HostReport>,
    ) -> TenantStatus {
        let tenant_id = &session.tenant().id;
        let events = discover_hosts(session, &self.settings.host_scope, index)
            .map(move |discovered| async move {
                match discovered {
                    Ok(host) => match self.process_host(session, host, window, now).await {
                        Ok(report) => HostEvent::Done(report),
                        Err(e) => HostEvent::Expired(e),
                    },
                    Err(e) if e.is_session_expired() => HostEvent::Expired(e),
                    Err(e) => HostEvent::Discovery(e),
                }
            })
            .buffer_unordered(self.settings.host_concurrency.max(1));
        let mut events = pin!(events);

        let mut status = TenantStatus::Completed;
        loop {
            let event = tokio::select! {
                _ = self.cancel.cancelled() => {
                    warn!("Tenant {}: run cancelled, abandoning in-flight hosts", tenant_id);
                    return TenantStatus::Cancelled;
                }
                event = events.next() => event,
            };
            match event {
                None => return status,
                Some(HostEvent::Done(report)) => hosts.push(report),
                Some(HostEvent::Expired(e)) => {
                    error!("Tenant {}: session lost, aborting: {}", tenant_id, e);
                    return TenantStatus::Aborted(e.to_string());
                }
                // The stream ends after this; hosts already in flight still finish.
                Some(HostEvent::Discovery(e)) => {
                    error!("Tenant {}: host discovery failed: {}", tenant_id, e);
                    status = TenantStatus::DiscoveryFailed(e.to_string());
                }
            }
        }
    }

    /// `Err` only when the session expired for good.
    async fn process_host(
        &self,
        session: &Session,
        host: Host,
        window: Window,
        now: DateTime<Utc>,
    ) -> Result<HostReport, ApiError> {
        let tenant_id = &session.tenant().id;
        let mut report = HostReport {
            host_id: host.id.clone(),
            host: host.name.clone(),
            status: HostStatus::Empty,
            metrics: Vec::new(),
            published: false,
        };

        let bindings = match resolve_items(session, &host, &self.catalog, self.settings.item_page_size).await {
            Ok(bindings) => bindings,
            Err(e) if e.is_session_expired() => return Err(e),
            Err(e) => {
                warn!("Tenant {}: host {}: item lookup failed: {}", tenant_id, host.name, e);
                report.status = HostStatus::Failed(e.to_string());
                return Ok(report);
            }
        };
        if bindings.is_empty() {
            info!("Tenant {}: host {} has none of the catalog items", tenant_id, host.name);
            return Ok(report);
        }

        let mut summaries = Vec::new();
        for binding in bindings.iter() {
            let outcome = summarize(session, binding, window, now, &self.settings.policy).await?;
            let metric = MetricReport::new(binding, &outcome);
            match outcome {
                MetricOutcome::Summarized(summary) => summaries.push(summary),
                MetricOutcome::Skipped(reason) => debug!(
                    "Tenant {}: host {}: {} skipped ({:?})",
                    tenant_id, host.name, binding.metric.key, reason
                ),
                MetricOutcome::Failed { .. } => {}
            }
            report.metrics.push(metric);
        }

        report.status = if summaries.is_empty() {
            HostStatus::Empty
        } else if summaries.len() < report.metrics.len() {
            HostStatus::Partial
        } else {
            HostStatus::Success
        };

        if summaries.is_empty() {
            info!("Tenant {}: host {}: no data in window, nothing published", tenant_id, host.name);
            return Ok(report);
        }

        let table = SummaryTable::new(host, &summaries);
        match self.sink.publish(tenant_id, &table).await {
            Ok(()) => {
                report.published = true;
                info!(
                    "Tenant {}: host {}: {}/{} metrics published",
                    tenant_id,
                    report.host,
                    summaries.len(),
                    report.metrics.len()
                );
            }
            Err(e) => {
                error!("Tenant {}: host {}: publish failed: {}", tenant_id, report.host, e);
                report.status = HostStatus::Failed(format!("publish failed: {}", e));
            }
        }
        Ok(report)
    }
}
