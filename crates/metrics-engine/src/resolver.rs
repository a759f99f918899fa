//! Host and item discovery for one tenant.

use std::collections::hash_map::Entry;
use std::collections::{HashMap, HashSet};

use async_stream::try_stream;
use futures::Stream;
use log::debug;
use zabbix_client::{ApiError, ItemRecord, Session};

use crate::catalog::MetricCatalog;
use crate::sink::GroupIndex;
use crate::types::{Host, ItemBinding};

/// Which host groups to enumerate; empty means all of them.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HostScope {
    pub groups: Vec<String>,
}

/// Lazily enumerate the tenant's hosts, one host group at a time.
///
/// A host that belongs to several groups shows up once per group; it is
/// yielded only the first time, while `index` records every membership.
/// Calling this again restarts the enumeration from scratch.
pub fn discover_hosts<'a>(
    session: &'a Session,
    scope: &'a HostScope,
    index: &'a mut GroupIndex,
) -> impl Stream<Item = Result<Host, ApiError>> + 'a {
    try_stream! {
        let groups = session.host_groups(&scope.groups).await?;
        debug!("Tenant {}: {} host groups to enumerate", session.tenant().id, groups.len());

        let mut seen = HashSet::new();
        for group in groups {
            let records = session.hosts_in_group(&group.groupid).await?;
            debug!("Tenant {}: group {} lists {} hosts", session.tenant().id, group.name, records.len());
            for record in records {
                index.record(&group.name, &record.host);
                if seen.insert(record.hostid.clone()) {
                    yield Host::from_record(record, &group.name);
                }
            }
        }
    }
}

/// Catalog metrics resolved for one host, in catalog order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BindingSet {
    bindings: Vec<ItemBinding>,
}

impl BindingSet {
    pub fn new(bindings: Vec<ItemBinding>) -> Self {
        Self { bindings }
    }

    pub fn iter(&self) -> impl Iterator<Item = &ItemBinding> {
        self.bindings.iter()
    }

    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }
}

// Zabbix ids are decimal strings without leading zeros, so (length, text)
// orders them numerically.
fn id_order(id: &str) -> (usize, &str) {
    (id.len(), id)
}

/// Resolve which catalog metrics exist on `host`.
///
/// Keys are requested in pages of `page_size`; missing keys are simply
/// absent from the result. If a key maps to several items the lowest item
/// id wins so repeated runs bind the same item.
pub async fn resolve_items(
    session: &Session,
    host: &Host,
    catalog: &MetricCatalog,
    page_size: usize,
) -> Result<BindingSet, ApiError> {
    let keys = catalog.keys();
    let mut seen_items = HashSet::new();
    let mut by_key: HashMap<String, ItemRecord> = HashMap::new();

    for page in keys.chunks(page_size.max(1)) {
        let records = session.items_for_host(&host.id, page).await?;
        for record in records {
            if catalog.get(&record.key).is_none() || !seen_items.insert(record.itemid.clone()) {
                continue;
            }
            match by_key.entry(record.key.clone()) {
                Entry::Occupied(mut existing) => {
                    if id_order(&record.itemid) < id_order(&existing.get().itemid) {
                        existing.insert(record);
                    }
                }
                Entry::Vacant(slot) => {
                    slot.insert(record);
                }
            }
        }
    }

    let bindings: Vec<ItemBinding> = catalog
        .iter()
        .filter_map(|metric| {
            by_key
                .remove(&metric.key)
                .map(|record| ItemBinding::from_record(metric.clone(), record))
        })
        .collect();
    debug!(
        "Host {}: {}/{} catalog metrics bound",
        host.name,
        bindings.len(),
        catalog.len()
    );
    Ok(BindingSet::new(bindings))
}
