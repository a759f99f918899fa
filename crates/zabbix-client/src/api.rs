//! Typed wrappers over the read methods the exporter needs.

use serde::de::DeserializeOwned;
use serde_json::{json, Value};

use crate::error::ApiError;
use crate::models::{GroupRecord, HistoryRecord, HostRecord, ItemRecord, TrendRecord};
use crate::session::Session;

impl Session {
    /// Call a `*.get` method and decode its array result.
    pub async fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        params: Value,
    ) -> Result<Vec<T>, ApiError> {
        let value = self.call(method, params).await?;
        serde_json::from_value(value)
            .map_err(|e| ApiError::Malformed(format!("{}: unexpected result shape: {}", method, e)))
    }

    /// Host groups, optionally restricted to the given names.
    pub async fn host_groups(&self, names: &[String]) -> Result<Vec<GroupRecord>, ApiError> {
        let mut params = json!({
            "output": ["groupid", "name"],
            "sortfield": "name",
        });
        if !names.is_empty() {
            params["filter"] = json!({ "name": names });
        }
        self.query("hostgroup.get", params).await
    }

    pub async fn hosts_in_group(&self, groupid: &str) -> Result<Vec<HostRecord>, ApiError> {
        self.query(
            "host.get",
            json!({
                "output": ["hostid", "host", "name"],
                "groupids": groupid,
                "sortfield": "hostid",
            }),
        )
        .await
    }

    pub async fn items_for_host(
        &self,
        hostid: &str,
        keys: &[&str],
    ) -> Result<Vec<ItemRecord>, ApiError> {
        self.query(
            "item.get",
            json!({
                "output": ["itemid", "key_", "name", "value_type", "units", "history", "trends"],
                "hostids": hostid,
                "filter": { "key_": keys },
                "sortfield": "itemid",
            }),
        )
        .await
    }

    /// Hourly trend rows with `time_from <= clock <= time_till`.
    pub async fn trends(
        &self,
        itemid: &str,
        time_from: i64,
        time_till: i64,
    ) -> Result<Vec<TrendRecord>, ApiError> {
        self.query(
            "trend.get",
            json!({
                "output": ["itemid", "clock", "num", "value_min", "value_avg", "value_max"],
                "itemids": itemid,
                "time_from": time_from,
                "time_till": time_till,
            }),
        )
        .await
    }

    /// Raw samples in ascending clock order, at most `limit` rows.
    pub async fn history(
        &self,
        itemid: &str,
        value_type: u8,
        time_from: i64,
        time_till: i64,
        limit: usize,
    ) -> Result<Vec<HistoryRecord>, ApiError> {
        self.query(
            "history.get",
            json!({
                "output": "extend",
                "history": value_type,
                "itemids": itemid,
                "time_from": time_from,
                "time_till": time_till,
                "sortfield": "clock",
                "sortorder": "ASC",
                "limit": limit,
            }),
        )
        .await
    }
}
