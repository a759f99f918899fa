pub mod catalog;
pub mod engine;
pub mod orchestrator;
pub mod report;
pub mod resolver;
pub mod sink;
pub mod stats;
pub mod types;

pub use catalog::{MetricCatalog, MetricKey};
pub use engine::{plan_sources, summarize, AggregationPolicy, MetricOutcome, SkipReason, SourcePlan};
pub use orchestrator::{Orchestrator, RunSettings};
pub use report::{HostReport, HostStatus, MetricReport, MetricStatus, RunReport, RunTotals, TenantReport, TenantStatus};
pub use resolver::{discover_hosts, resolve_items, BindingSet, HostScope};
pub use sink::{CsvDirectorySink, GroupIndex, ResultSink, SinkError, SummaryRow, SummaryTable};
pub use stats::{Reduction, Stats};
pub use types::{DataPoint, DataSource, Host, ItemBinding, RetentionClass, Summary, ValueKind, Window};

pub use zabbix_client::{Credentials, Tenant};
