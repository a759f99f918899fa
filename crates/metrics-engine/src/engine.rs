//! Turns one item binding into a [`Summary`] for the reporting window.
//!
//! Recent data comes from raw history, older data from hourly trends. A
//! window that starts before the raw-retention horizon but ends after it is
//! split at an hour boundary and the two segments are merged by weight.

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use zabbix_client::{ApiError, Session};

use crate::stats::Reduction;
use crate::types::{DataPoint, DataSource, ItemBinding, RetentionClass, Summary, Window};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AggregationPolicy {
    /// How far back raw history is assumed to reach.
    pub raw_retention: Duration,
    pub history_page_size: usize,
    /// Width of one `trend.get` request.
    pub trend_slice: Duration,
}

impl Default for AggregationPolicy {
    fn default() -> Self {
        Self {
            raw_retention: Duration::days(7),
            history_page_size: 10_000,
            trend_slice: Duration::days(7),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourcePlan {
    Trend(Window),
    Raw(Window),
    /// Trend up to the horizon boundary, raw from it onwards.
    Merge { trend: Window, raw: Window },
}

impl SourcePlan {
    pub fn source(&self) -> DataSource {
        match self {
            Self::Trend(_) => DataSource::Trend,
            Self::Raw(_) => DataSource::Raw,
            Self::Merge { .. } => DataSource::Merged,
        }
    }

    /// The single-source plan to try when this one produced nothing.
    fn fallback(&self, retention: RetentionClass, window: Window) -> Option<SourcePlan> {
        match self {
            Self::Trend(_) if retention.keeps_raw() => Some(Self::Raw(window)),
            Self::Raw(_) if retention.keeps_trend() => Some(Self::Trend(window)),
            _ => None,
        }
    }
}

fn ceil_to_hour(t: DateTime<Utc>) -> DateTime<Utc> {
    let into_hour = t.timestamp().rem_euclid(3600);
    let nanos = i64::from(t.timestamp_subsec_nanos());
    if into_hour == 0 && nanos == 0 {
        return t;
    }
    t - Duration::seconds(into_hour) - Duration::nanoseconds(nanos) + Duration::hours(1)
}

/// Decide which store(s) answer `window` for an item with `retention`.
///
/// `None` means the item keeps neither raw history nor trends.
pub fn plan_sources(
    retention: RetentionClass,
    window: Window,
    now: DateTime<Utc>,
    horizon: Duration,
) -> Option<SourcePlan> {
    match retention {
        RetentionClass::Neither => None,
        RetentionClass::RawOnly => Some(SourcePlan::Raw(window)),
        RetentionClass::TrendOnly => Some(SourcePlan::Trend(window)),
        RetentionClass::Both => {
            let cutoff = now - horizon;
            if window.start >= cutoff {
                return Some(SourcePlan::Raw(window));
            }
            let boundary = ceil_to_hour(cutoff);
            if window.end < boundary {
                return Some(SourcePlan::Trend(window));
            }
            // start < cutoff <= boundary, so both segments are non-empty.
            Some(SourcePlan::Merge {
                trend: Window::new(window.start, boundary - Duration::seconds(1)),
                raw: Window::new(boundary, window.end),
            })
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SkipReason {
    /// The item exists but stored nothing inside the window.
    NoData,
    NonNumeric,
    NoRetention,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MetricOutcome {
    Summarized(Summary),
    Skipped(SkipReason),
    /// Fetching failed after the retry budget; sibling metrics carry on.
    Failed { reason: String },
}

/// Summarize one bound item over `window`.
///
/// Only an expired session surfaces as `Err`, since it invalidates every
/// other call for the tenant too. Other API failures become
/// [`MetricOutcome::Failed`].
pub async fn summarize(
    session: &Session,
    binding: &ItemBinding,
    window: Window,
    now: DateTime<Utc>,
    policy: &AggregationPolicy,
) -> Result<MetricOutcome, ApiError> {
    if !binding.value_kind.is_numeric() {
        debug!(
            "Item {} ({}) is not numeric, skipping",
            binding.item_id, binding.metric.key
        );
        return Ok(MetricOutcome::Skipped(SkipReason::NonNumeric));
    }
    let Some(plan) = plan_sources(binding.retention, window, now, policy.raw_retention) else {
        return Ok(MetricOutcome::Skipped(SkipReason::NoRetention));
    };

    let reduced = async {
        let mut reduction = reduce_plan(session, binding, &plan, policy).await?;
        let mut source = plan.source();
        if reduction.is_empty() {
            if let Some(fallback) = plan.fallback(binding.retention, window) {
                debug!(
                    "Item {} ({}): no {:?} data, falling back to {:?}",
                    binding.item_id,
                    binding.metric.key,
                    source,
                    fallback.source()
                );
                reduction = reduce_plan(session, binding, &fallback, policy).await?;
                source = fallback.source();
            }
        }
        Ok::<_, ApiError>((reduction, source))
    }
    .await;

    match reduced {
        Ok((reduction, source)) => match reduction.finish() {
            (Some(stats), sample_count) => Ok(MetricOutcome::Summarized(Summary {
                metric: binding.metric.clone(),
                units: binding.units.clone(),
                stats: Some(stats),
                sample_count,
                source,
            })),
            (None, _) => Ok(MetricOutcome::Skipped(SkipReason::NoData)),
        },
        Err(e) if e.is_session_expired() => Err(e),
        Err(e) => {
            warn!(
                "Item {} ({}) failed: {}",
                binding.item_id, binding.metric.key, e
            );
            Ok(MetricOutcome::Failed {
                reason: e.to_string(),
            })
        }
    }
}

async fn reduce_plan(
    session: &Session,
    binding: &ItemBinding,
    plan: &SourcePlan,
    policy: &AggregationPolicy,
) -> Result<Reduction, ApiError> {
    let mut reduction = Reduction::new();
    match *plan {
        SourcePlan::Trend(window) => {
            reduction.extend(fetch_trends(session, binding, window, policy.trend_slice).await?.iter());
        }
        SourcePlan::Raw(window) => {
            reduction.extend(fetch_history(session, binding, window, policy.history_page_size).await?.iter());
        }
        SourcePlan::Merge { trend, raw } => {
            let trend_points = fetch_trends(session, binding, trend, policy.trend_slice).await?;
            let raw_points = fetch_history(session, binding, raw, policy.history_page_size).await?;
            let mut raw_reduction = Reduction::new();
            reduction.extend(trend_points.iter());
            raw_reduction.extend(raw_points.iter());
            debug!(
                "Item {}: merging {} trend and {} raw samples",
                binding.item_id,
                reduction.count(),
                raw_reduction.count()
            );
            reduction.merge(&raw_reduction);
        }
    }
    Ok(reduction)
}

/// Trend rows for `window`, fetched one slice at a time, in clock order.
async fn fetch_trends(
    session: &Session,
    binding: &ItemBinding,
    window: Window,
    slice: Duration,
) -> Result<Vec<DataPoint>, ApiError> {
    let slice = slice.num_seconds().max(3600);
    let till = window.end_ts();
    let mut from = window.start_ts();
    // Slices share their inclusive edge; the map drops the repeated row.
    let mut rows = BTreeMap::new();

    while from <= till {
        let to = from.saturating_add(slice).min(till);
        let page = session.trends(&binding.item_id, from, to).await?;
        debug!(
            "Item {}: {} trend rows in [{}, {}]",
            binding.item_id,
            page.len(),
            from,
            to
        );
        for row in page {
            rows.insert(row.clock, row);
        }
        if to == till {
            break;
        }
        from = to;
    }

    Ok(rows
        .into_values()
        .map(|row| DataPoint::Trend {
            clock: row.clock,
            min: row.value_min,
            max: row.value_max,
            avg: row.value_avg,
            count: row.num,
        })
        .collect())
}

/// Raw samples for `window` in clock order.
///
/// `history.get` has no offset, so each page restarts at the last clock
/// seen. Rows on that second come back twice and are keyed by `(clock, ns)`.
async fn fetch_history(
    session: &Session,
    binding: &ItemBinding,
    window: Window,
    page_size: usize,
) -> Result<Vec<DataPoint>, ApiError> {
    let page_size = page_size.max(1);
    let value_type = binding.value_kind.value_type();
    let till = window.end_ts();
    let mut from = window.start_ts();
    let mut rows = BTreeMap::new();

    while from <= till {
        let page = session
            .history(&binding.item_id, value_type, from, till, page_size)
            .await?;
        let full = page.len() >= page_size;
        let last_clock = page.iter().map(|row| row.clock).max();
        for row in page {
            rows.insert((row.clock, row.ns), row.value);
        }
        let Some(last_clock) = last_clock.filter(|_| full) else {
            break;
        };
        if last_clock <= from {
            warn!(
                "Item {}: more than {} samples at clock {}, some are skipped",
                binding.item_id, page_size, from
            );
            from += 1;
        } else {
            from = last_clock;
        }
    }

    debug!("Item {}: {} raw samples", binding.item_id, rows.len());
    Ok(rows
        .into_iter()
        .map(|((clock, _), value)| DataPoint::Raw { clock, value })
        .collect())
}
