use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{bail, Context, Result};
use metrics_engine::{AggregationPolicy, HostScope, MetricCatalog, MetricKey, RunSettings};
use serde::Deserialize;
use zabbix_client::{Credentials, RetryPolicy, SessionConfig, Tenant};

const CONFIG_FILE_PATH: &str = "config.toml";
const DEFAULT_TENANT_ID: &str = "default";
/// Upper bound for day counts; keeps window arithmetic inside chrono's range.
const MAX_DAYS: u32 = 36_500;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct TenantEntry {
    pub id: String,
    pub url: String,
    pub username: String,
    #[serde(default)]
    pub password: Option<String>,
    /// Name of an environment variable holding the password.
    #[serde(default)]
    pub password_env: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Config {
    pub lookback_days: u32,
    pub raw_retention_days: u32,
    pub host_concurrency: usize,
    pub tenant_concurrency: usize,
    pub output_dir: PathBuf,
    pub run_timeout_secs: u64,
    pub request_timeout_secs: u64,
    pub max_attempts: u32,
    pub backoff_base_ms: u64,
    pub backoff_max_ms: u64,
    pub history_page_size: usize,
    pub trend_slice_days: u32,
    pub item_page_size: usize,
    pub host_groups: Vec<String>,
    pub tenants: Vec<TenantEntry>,
    /// Replaces the built-in catalog when non-empty.
    pub metrics: Vec<MetricKey>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            lookback_days: 30,
            raw_retention_days: 7,
            host_concurrency: 4,
            tenant_concurrency: 1,
            output_dir: PathBuf::from("out"),
            run_timeout_secs: 3300,
            request_timeout_secs: 30,
            max_attempts: 3,
            backoff_base_ms: 500,
            backoff_max_ms: 8000,
            history_page_size: 10_000,
            trend_slice_days: 7,
            item_page_size: 50,
            host_groups: Vec::new(),
            tenants: Vec::new(),
            metrics: Vec::new(),
        }
    }
}

fn parse_env<T: std::str::FromStr>(name: &str, value: &str) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    value
        .trim()
        .parse()
        .map_err(|e| anyhow::anyhow!("invalid {}={:?}: {}", name, value, e))
}

impl Config {
    /// Read the file (an explicit path must exist, the default one may not),
    /// then layer environment overrides on top.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut config = match path {
            Some(path) => Self::from_file(path)?,
            None if Path::new(CONFIG_FILE_PATH).exists() => {
                Self::from_file(Path::new(CONFIG_FILE_PATH))?
            }
            None => Self::default(),
        };
        config.apply_env(|name| std::env::var(name).ok())?;
        Ok(config)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml(&content).with_context(|| format!("failed to parse {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        Ok(toml::from_str(content)?)
    }

    pub fn apply_env(&mut self, lookup: impl Fn(&str) -> Option<String>) -> Result<()> {
        if let Some(value) = lookup("LOOKBACK_DAYS") {
            self.lookback_days = parse_env("LOOKBACK_DAYS", &value)?;
        }
        if let Some(value) = lookup("RAW_RETENTION_DAYS") {
            self.raw_retention_days = parse_env("RAW_RETENTION_DAYS", &value)?;
        }
        if let Some(value) = lookup("HOST_CONCURRENCY") {
            self.host_concurrency = parse_env("HOST_CONCURRENCY", &value)?;
        }
        if let Some(value) = lookup("OUTPUT_DIR") {
            self.output_dir = PathBuf::from(value);
        }

        if let Some(url) = lookup("ZABBIX_URL") {
            let (Some(username), Some(password)) = (lookup("ZABBIX_USER"), lookup("ZABBIX_PASSWORD")) else {
                bail!("ZABBIX_URL is set but ZABBIX_USER or ZABBIX_PASSWORD is missing");
            };
            self.tenants.retain(|t| t.id != DEFAULT_TENANT_ID);
            self.tenants.push(TenantEntry {
                id: DEFAULT_TENANT_ID.to_string(),
                url,
                username,
                password: Some(password),
                password_env: None,
            });
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.tenants.is_empty() {
            bail!("no tenants configured; add [[tenants]] to the config file or set ZABBIX_URL");
        }
        let mut ids = HashSet::new();
        for tenant in &self.tenants {
            if tenant.id.trim().is_empty() {
                bail!("tenant with url {} has an empty id", tenant.url);
            }
            if !ids.insert(tenant.id.as_str()) {
                bail!("duplicate tenant id {:?}", tenant.id);
            }
            let url = url::Url::parse(&tenant.url)
                .with_context(|| format!("tenant {}: invalid url {:?}", tenant.id, tenant.url))?;
            if !matches!(url.scheme(), "http" | "https") {
                bail!("tenant {}: url must be http(s), got {}", tenant.id, url.scheme());
            }
        }
        for (name, value) in [
            ("lookback_days", self.lookback_days as usize),
            ("host_concurrency", self.host_concurrency),
            ("tenant_concurrency", self.tenant_concurrency),
            ("history_page_size", self.history_page_size),
            ("item_page_size", self.item_page_size),
            ("trend_slice_days", self.trend_slice_days as usize),
            ("max_attempts", self.max_attempts as usize),
        ] {
            if value == 0 {
                bail!("{} must be greater than zero", name);
            }
        }
        for (name, days) in [
            ("lookback_days", self.lookback_days),
            ("raw_retention_days", self.raw_retention_days),
            ("trend_slice_days", self.trend_slice_days),
        ] {
            if days > MAX_DAYS {
                bail!("{} must be at most {}, got {}", name, MAX_DAYS, days);
            }
        }
        Ok(())
    }

    /// Resolve every tenant's password once, up front.
    pub fn tenants(&self, lookup: impl Fn(&str) -> Option<String>) -> Result<Vec<Tenant>> {
        self.tenants
            .iter()
            .map(|entry| {
                let password = match (&entry.password, &entry.password_env) {
                    (Some(password), _) => password.clone(),
                    (None, Some(var)) => lookup(var).with_context(|| {
                        format!("tenant {}: environment variable {} is not set", entry.id, var)
                    })?,
                    (None, None) => bail!("tenant {}: neither password nor password_env given", entry.id),
                };
                Ok(Tenant {
                    id: entry.id.clone(),
                    url: entry.url.clone(),
                    credentials: Credentials {
                        username: entry.username.clone(),
                        password,
                    },
                })
            })
            .collect()
    }

    pub fn catalog(&self) -> MetricCatalog {
        if self.metrics.is_empty() {
            MetricCatalog::standard()
        } else {
            MetricCatalog::new(self.metrics.iter().cloned())
        }
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            retry: RetryPolicy {
                max_attempts: self.max_attempts,
                base_delay: Duration::from_millis(self.backoff_base_ms),
                max_delay: Duration::from_millis(self.backoff_max_ms),
            },
            request_timeout: Duration::from_secs(self.request_timeout_secs),
        }
    }

    pub fn run_settings(&self) -> RunSettings {
        RunSettings {
            host_concurrency: self.host_concurrency,
            tenant_concurrency: self.tenant_concurrency,
            policy: AggregationPolicy {
                raw_retention: chrono::Duration::days(i64::from(self.raw_retention_days)),
                history_page_size: self.history_page_size,
                trend_slice: chrono::Duration::days(i64::from(self.trend_slice_days)),
            },
            host_scope: HostScope {
                groups: self.host_groups.clone(),
            },
            item_page_size: self.item_page_size,
        }
    }

    pub fn run_timeout(&self) -> Duration {
        Duration::from_secs(self.run_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
lookback_days = 60
host_groups = ["Linux servers"]

[[tenants]]
id = "acme"
url = "https://zabbix.acme.example/api_jsonrpc.php"
username = "reporter"
password_env = "ACME_ZABBIX_PASSWORD"

[[tenants]]
id = "globex"
url = "http://10.0.0.5/zabbix/api_jsonrpc.php"
username = "Admin"
password = "zabbix"

[[metrics]]
key = "system.cpu.util"
name = "CPU utilization"
"#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn file_values_override_defaults() {
        let config = Config::from_toml(SAMPLE).unwrap();
        assert_eq!(config.lookback_days, 60);
        assert_eq!(config.raw_retention_days, 7);
        assert_eq!(config.host_concurrency, 4);
        assert_eq!(config.tenants.len(), 2);
        assert_eq!(config.catalog().len(), 1);
        assert_eq!(config.run_settings().host_scope.groups, vec!["Linux servers"]);
        config.validate().unwrap();
    }

    #[test]
    fn empty_file_uses_standard_catalog() {
        let config = Config::from_toml("").unwrap();
        assert_eq!(config.catalog(), MetricCatalog::standard());
        assert_eq!(config.output_dir, PathBuf::from("out"));
        assert!(config.validate().is_err());
    }

    #[test]
    fn passwords_resolve_from_environment() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let tenants = config
            .tenants(env(&[("ACME_ZABBIX_PASSWORD", "s3cret")]))
            .unwrap();
        assert_eq!(tenants[0].credentials.password, "s3cret");
        assert_eq!(tenants[1].credentials.password, "zabbix");

        let missing = config.tenants(env(&[])).unwrap_err();
        assert!(missing.to_string().contains("ACME_ZABBIX_PASSWORD"));
    }

    #[test]
    fn environment_overrides_and_default_tenant() {
        let mut config = Config::default();
        config
            .apply_env(env(&[
                ("LOOKBACK_DAYS", "14"),
                ("OUTPUT_DIR", "/tmp/reports"),
                ("ZABBIX_URL", "https://zabbix.example/api_jsonrpc.php"),
                ("ZABBIX_USER", "reporter"),
                ("ZABBIX_PASSWORD", "pw"),
            ]))
            .unwrap();
        assert_eq!(config.lookback_days, 14);
        assert_eq!(config.output_dir, PathBuf::from("/tmp/reports"));
        assert_eq!(config.tenants[0].id, "default");
        config.validate().unwrap();

        let bad = Config::default().apply_env(env(&[("HOST_CONCURRENCY", "many")]));
        assert!(bad.is_err());
    }

    #[test]
    fn validation_rejects_bad_tenants() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.tenants[1].id = "acme".to_string();
        assert!(config.validate().unwrap_err().to_string().contains("duplicate"));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.tenants[0].url = "ftp://zabbix.example".to_string();
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.host_concurrency = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn oversized_day_counts_are_rejected() {
        let mut config = Config::from_toml(SAMPLE).unwrap();
        config
            .apply_env(env(&[("LOOKBACK_DAYS", "200000000")]))
            .unwrap();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("lookback_days"));

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.raw_retention_days = MAX_DAYS + 1;
        assert!(config.validate().is_err());

        let mut config = Config::from_toml(SAMPLE).unwrap();
        config.lookback_days = MAX_DAYS;
        config.validate().unwrap();
    }

    #[test]
    fn load_reads_an_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("exporter.toml");
        std::fs::write(&path, SAMPLE).unwrap();
        let config = Config::from_file(&path).unwrap();
        assert_eq!(config.tenants[0].id, "acme");
        assert!(Config::from_file(&dir.path().join("missing.toml")).is_err());
    }
}
