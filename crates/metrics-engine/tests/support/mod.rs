//! An in-process stand-in for a Zabbix frontend, served through wiremock.

#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};
use zabbix_client::{Credentials, RetryPolicy, SessionConfig, SessionManager, Tenant};

pub const API_PATH: &str = "/api_jsonrpc.php";
pub const PASSWORD: &str = "secret";

#[derive(Debug, Clone)]
pub struct FakeItem {
    pub itemid: String,
    pub hostid: String,
    pub key: String,
    pub name: String,
    pub value_type: u8,
    pub units: String,
    pub history: String,
    pub trends: String,
}

impl FakeItem {
    pub fn numeric(itemid: &str, hostid: &str, key: &str, units: &str) -> Self {
        Self {
            itemid: itemid.to_string(),
            hostid: hostid.to_string(),
            key: key.to_string(),
            name: key.to_string(),
            value_type: 0,
            units: units.to_string(),
            history: "7d".to_string(),
            trends: "365d".to_string(),
        }
    }

    pub fn raw_only(mut self) -> Self {
        self.trends = "0".to_string();
        self
    }
}

#[derive(Debug, Clone, Copy)]
pub struct TrendRow {
    pub clock: i64,
    pub num: u64,
    pub min: f64,
    pub avg: f64,
    pub max: f64,
}

#[derive(Default)]
struct State {
    groups: Vec<(String, String, Vec<String>)>,
    hosts: BTreeMap<String, String>,
    items: Vec<FakeItem>,
    history: HashMap<String, Vec<(i64, i64, f64)>>,
    trends: HashMap<String, Vec<TrendRow>>,
    failing_items: HashSet<String>,
    failing_hosts: HashSet<String>,
    failing_methods: HashSet<String>,
    expired: bool,
    tokens_issued: usize,
    calls: Vec<String>,
}

/// Answers the read-only API subset the exporter uses.
///
/// Clones share state, so a test keeps one handle for set-up and
/// assertions while wiremock owns another.
#[derive(Clone, Default)]
pub struct FakeZabbix {
    state: Arc<Mutex<State>>,
}

fn ok(result: Value) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({"jsonrpc": "2.0", "result": result, "id": 1}))
}

fn err(code: i64, message: &str, data: &str) -> ResponseTemplate {
    ResponseTemplate::new(200).set_body_json(json!({
        "jsonrpc": "2.0",
        "error": {"code": code, "message": message, "data": data},
        "id": 1
    }))
}

fn as_i64(value: &Value) -> Option<i64> {
    value
        .as_i64()
        .or_else(|| value.as_str().and_then(|s| s.parse().ok()))
}

fn string_list(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Value::String(s) => vec![s.clone()],
        _ => Vec::new(),
    }
}

impl FakeZabbix {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn group(&self, groupid: &str, name: &str, hostids: &[&str]) -> &Self {
        self.lock().groups.push((
            groupid.to_string(),
            name.to_string(),
            hostids.iter().map(|h| h.to_string()).collect(),
        ));
        self
    }

    pub fn host(&self, hostid: &str, name: &str) -> &Self {
        self.lock().hosts.insert(hostid.to_string(), name.to_string());
        self
    }

    pub fn item(&self, item: FakeItem) -> &Self {
        self.lock().items.push(item);
        self
    }

    pub fn history(&self, itemid: &str, samples: impl IntoIterator<Item = (i64, f64)>) -> &Self {
        self.lock()
            .history
            .entry(itemid.to_string())
            .or_default()
            .extend(samples.into_iter().map(|(clock, value)| (clock, 0, value)));
        self
    }

    pub fn trends(&self, itemid: &str, rows: impl IntoIterator<Item = TrendRow>) -> &Self {
        self.lock()
            .trends
            .entry(itemid.to_string())
            .or_default()
            .extend(rows);
        self
    }

    /// `trend.get`/`history.get` for this item answer with an internal error.
    pub fn fail_item(&self, itemid: &str) -> &Self {
        self.lock().failing_items.insert(itemid.to_string());
        self
    }

    /// `item.get` for this host is refused.
    pub fn fail_host_items(&self, hostid: &str) -> &Self {
        self.lock().failing_hosts.insert(hostid.to_string());
        self
    }

    pub fn fail_method(&self, rpc_method: &str) -> &Self {
        self.lock().failing_methods.insert(rpc_method.to_string());
        self
    }

    /// Every authenticated call reports a terminated session from now on.
    pub fn expire_sessions(&self) -> &Self {
        self.lock().expired = true;
        self
    }

    pub fn calls(&self, rpc_method: &str) -> usize {
        self.lock().calls.iter().filter(|m| *m == rpc_method).count()
    }

    pub async fn mount(&self, server: &MockServer) {
        Mock::given(method("POST"))
            .and(path(API_PATH))
            .respond_with(self.clone())
            .mount(server)
            .await;
    }

    pub async fn start(&self) -> MockServer {
        let server = MockServer::start().await;
        self.mount(&server).await;
        server
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }

    fn dispatch(state: &mut State, rpc_method: &str, params: &Value) -> ResponseTemplate {
        match rpc_method {
            "apiinfo.version" => return ok(json!("6.0.20")),
            "user.login" => {
                return if params["password"] == PASSWORD {
                    state.tokens_issued += 1;
                    ok(json!(format!("token-{}", state.tokens_issued)))
                } else {
                    err(-32500, "Application error.", "Incorrect user name or password or account is temporarily blocked.")
                };
            }
            _ => {}
        }

        if state.expired {
            return err(-32602, "Invalid params.", "Session terminated, re-login, please.");
        }
        if state.failing_methods.contains(rpc_method) {
            return err(-32500, "Application error.", "No permissions to referred object or it does not exist!");
        }

        match rpc_method {
            "user.logout" => ok(json!(true)),
            "hostgroup.get" => {
                let wanted = string_list(&params["filter"]["name"]);
                let mut groups: Vec<Value> = state
                    .groups
                    .iter()
                    .filter(|(_, name, _)| wanted.is_empty() || wanted.contains(name))
                    .map(|(groupid, name, _)| json!({"groupid": groupid, "name": name}))
                    .collect();
                groups.sort_by(|a, b| a["name"].as_str().cmp(&b["name"].as_str()));
                ok(Value::Array(groups))
            }
            "host.get" => {
                let groupids = string_list(&params["groupids"]);
                let mut hostids: Vec<&String> = state
                    .groups
                    .iter()
                    .filter(|(groupid, _, _)| groupids.contains(groupid))
                    .flat_map(|(_, _, hosts)| hosts.iter())
                    .collect();
                hostids.sort();
                hostids.dedup();
                let hosts: Vec<Value> = hostids
                    .into_iter()
                    .filter_map(|id| {
                        state
                            .hosts
                            .get(id)
                            .map(|name| json!({"hostid": id, "host": name, "name": name.to_uppercase()}))
                    })
                    .collect();
                ok(Value::Array(hosts))
            }
            "item.get" => {
                let hostids = string_list(&params["hostids"]);
                if hostids.iter().any(|id| state.failing_hosts.contains(id)) {
                    return err(-32500, "Application error.", "No permissions to referred object or it does not exist!");
                }
                let keys = string_list(&params["filter"]["key_"]);
                let items: Vec<Value> = state
                    .items
                    .iter()
                    .filter(|i| hostids.contains(&i.hostid) && keys.contains(&i.key))
                    .map(|i| {
                        json!({
                            "itemid": i.itemid,
                            "key_": i.key,
                            "name": i.name,
                            "value_type": i.value_type.to_string(),
                            "units": i.units,
                            "history": i.history,
                            "trends": i.trends,
                        })
                    })
                    .collect();
                ok(Value::Array(items))
            }
            "trend.get" | "history.get" => {
                let itemids = string_list(&params["itemids"]);
                if itemids.iter().any(|id| state.failing_items.contains(id)) {
                    return err(-32603, "Internal error.", "Database error.");
                }
                let from = as_i64(&params["time_from"]).unwrap_or(i64::MIN);
                let till = as_i64(&params["time_till"]).unwrap_or(i64::MAX);
                if rpc_method == "trend.get" {
                    Self::trend_rows(state, &itemids, from, till)
                } else {
                    let value_type = as_i64(&params["history"]).unwrap_or(3);
                    let limit = params["limit"].as_u64().map(|l| l as usize).unwrap_or(usize::MAX);
                    Self::history_rows(state, &itemids, value_type, from, till, limit)
                }
            }
            other => err(-32601, "Method not found.", &format!("Incorrect method \"{}\".", other)),
        }
    }

    fn trend_rows(state: &State, itemids: &[String], from: i64, till: i64) -> ResponseTemplate {
        let rows: Vec<Value> = itemids
            .iter()
            .flat_map(|id| state.trends.get(id).into_iter().flatten().map(move |row| (id, row)))
            .filter(|(_, row)| row.clock >= from && row.clock <= till)
            .map(|(id, row)| {
                json!({
                    "itemid": id,
                    "clock": row.clock.to_string(),
                    "num": row.num.to_string(),
                    "value_min": row.min.to_string(),
                    "value_avg": row.avg.to_string(),
                    "value_max": row.max.to_string(),
                })
            })
            .collect();
        ok(Value::Array(rows))
    }

    fn history_rows(
        state: &State,
        itemids: &[String],
        value_type: i64,
        from: i64,
        till: i64,
        limit: usize,
    ) -> ResponseTemplate {
        let mut rows: Vec<(&String, &(i64, i64, f64))> = itemids
            .iter()
            .filter(|id| {
                state
                    .items
                    .iter()
                    .any(|i| &i.itemid == *id && i64::from(i.value_type) == value_type)
            })
            .flat_map(|id| state.history.get(id).into_iter().flatten().map(move |row| (id, row)))
            .filter(|(_, (clock, _, _))| *clock >= from && *clock <= till)
            .collect();
        rows.sort_by_key(|(_, (clock, ns, _))| (*clock, *ns));
        let rows: Vec<Value> = rows
            .into_iter()
            .take(limit)
            .map(|(id, (clock, ns, value))| {
                json!({
                    "itemid": id,
                    "clock": clock.to_string(),
                    "ns": ns.to_string(),
                    "value": value.to_string(),
                })
            })
            .collect();
        ok(Value::Array(rows))
    }
}

impl Respond for FakeZabbix {
    fn respond(&self, request: &Request) -> ResponseTemplate {
        let body: Value = match serde_json::from_slice(&request.body) {
            Ok(body) => body,
            Err(_) => return err(-32700, "Parse error.", "Invalid JSON."),
        };
        let rpc_method = body["method"].as_str().unwrap_or_default().to_string();
        let mut state = self.lock();
        state.calls.push(rpc_method.clone());
        Self::dispatch(&mut state, &rpc_method, &body["params"])
    }
}

pub fn tenant(id: &str, server: &MockServer, password: &str) -> Tenant {
    Tenant {
        id: id.to_string(),
        url: format!("{}{}", server.uri(), API_PATH),
        credentials: Credentials {
            username: "reporter".to_string(),
            password: password.to_string(),
        },
    }
}

pub fn fast_sessions() -> SessionManager {
    SessionManager::new(SessionConfig {
        retry: RetryPolicy {
            max_attempts: 3,
            base_delay: Duration::from_millis(1),
            max_delay: Duration::from_millis(5),
        },
        request_timeout: Duration::from_secs(5),
    })
}
