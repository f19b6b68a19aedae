use figment::providers::{Env, Format, Yaml};
use serde::{Deserialize, Serialize};

use crate::provision::READ_WORKERS_PER_QPS;
use crate::series::DEFAULT_METRIC_NAME;
use crate::Error;

pub const DEFAULT_CONFIG_PATH: &str = "./tsdb_load_config.yaml";
pub const ENV_PREFIX: &str = "TSDB_LOAD_";

/// Values that have no sensible default, with a hint of what to set them to.
const REQUIRED: &[(&str, &str)] = &[
    (
        "write_hostname",
        "the ingress hostname for write requests (eg. distributor.example.com)",
    ),
    (
        "read_hostname",
        "the ingress hostname for read requests (eg. query-frontend.example.com)",
    ),
];

/// Configuration of one load test run.  Every key can be set in YAML or through the environment
/// as `TSDB_LOAD_<KEY>`; the environment wins.
#[derive(Clone, Debug, Deserialize, Serialize)]
pub struct LoadConfig {
    pub write_hostname: String,
    pub read_hostname: String,
    #[serde(default = "default_scheme")]
    pub scheme: String,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub write_token: String,
    #[serde(default)]
    pub read_token: String,
    /// Remote-write requests per second, before HA fan-out.
    #[serde(default = "default_one")]
    pub write_request_rate: u64,
    #[serde(default = "default_series_per_request")]
    pub write_series_per_request: u64,
    /// Upper bound on the number of hosts a query may select.
    #[serde(default = "default_series_per_request")]
    pub read_series_per_request: u64,
    /// Queries per second.
    #[serde(default = "default_one")]
    pub read_request_rate: u64,
    #[serde(default = "default_duration_min")]
    pub duration_min: u64,
    #[serde(default)]
    pub ramp_up_min: u64,
    #[serde(default)]
    pub ramp_down_min: u64,
    #[serde(default = "default_scrape_interval_seconds")]
    pub scrape_interval_seconds: u64,
    #[serde(default = "default_one")]
    pub ha_replicas: u64,
    #[serde(default)]
    pub tenant_id: Option<String>,
    #[serde(default = "default_metric_names")]
    pub metric_names: Vec<String>,
    #[serde(default = "default_service_name")]
    pub service_name: String,
    #[serde(default)]
    pub otel_endpoint: Option<String>,
    #[serde(default)]
    pub status_port: Option<u16>,
}

fn default_scheme() -> String {
    "http".to_string()
}

fn default_one() -> u64 {
    1
}

fn default_series_per_request() -> u64 {
    1000
}

fn default_duration_min() -> u64 {
    12 * 60
}

fn default_scrape_interval_seconds() -> u64 {
    20
}

fn default_metric_names() -> Vec<String> {
    vec![DEFAULT_METRIC_NAME.to_string()]
}

fn default_service_name() -> String {
    "tsdb-load".to_string()
}

impl LoadConfig {
    pub fn load() -> Result<Self, Error> {
        Self::load_from_path(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from_path(path: &str) -> Result<Self, Error> {
        let mut f = figment::Figment::from(Env::prefixed(ENV_PREFIX));
        if std::path::Path::new(path).exists() {
            f = figment::Figment::from(Yaml::file(path)).merge(f);
        }
        for (key, hint) in REQUIRED {
            if !f.contains(key) {
                return Err(Error::Config(format!(
                    "{}{} environment variable missing: set it to {}",
                    ENV_PREFIX,
                    key.to_uppercase(),
                    hint
                )));
            }
        }
        let config: LoadConfig = f
            .extract()
            .map_err(|err| Error::Config(err.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Reject configurations the load shape cannot honor.
    pub fn validate(&self) -> Result<(), Error> {
        let invalid = |msg: String| -> Result<(), Error> { Err(Error::Config(msg)) };
        if self.write_hostname.trim().is_empty() {
            return invalid("write_hostname must not be empty".to_string());
        }
        if self.read_hostname.trim().is_empty() {
            return invalid("read_hostname must not be empty".to_string());
        }
        if self.scheme != "http" && self.scheme != "https" {
            return invalid(format!(
                "scheme must be http or https, not {:?}",
                self.scheme
            ));
        }
        for (name, value) in [
            ("write_request_rate", self.write_request_rate),
            ("write_series_per_request", self.write_series_per_request),
            ("read_series_per_request", self.read_series_per_request),
            ("read_request_rate", self.read_request_rate),
            ("duration_min", self.duration_min),
            ("scrape_interval_seconds", self.scrape_interval_seconds),
            ("ha_replicas", self.ha_replicas),
        ] {
            if value == 0 {
                return invalid(format!("{name} must be at least 1"));
            }
        }
        if self.metric_names.is_empty() {
            return invalid("metric_names must name at least one metric".to_string());
        }
        if self.metric_names.iter().any(|name| name.trim().is_empty()) {
            return invalid(format!(
                "metric_names must not contain blank names: {:?}",
                self.metric_names
            ));
        }
        for (product, lhs, rhs) in [
            (
                "write_request_rate * write_series_per_request",
                self.write_request_rate,
                self.write_series_per_request,
            ),
            (
                "write_request_rate * ha_replicas",
                self.write_request_rate,
                self.ha_replicas,
            ),
            (
                "read_request_rate * read workers per query",
                self.read_request_rate,
                READ_WORKERS_PER_QPS,
            ),
            ("duration_min in seconds", self.duration_min, 60),
        ] {
            if lhs.checked_mul(rhs).is_none() {
                return invalid(format!("{product} overflows ({lhs} * {rhs})"));
            }
        }
        match self.ramp_up_min.checked_add(self.ramp_down_min) {
            Some(ramps) if ramps <= self.duration_min => {}
            _ => {
                return invalid(format!(
                    "ramp up ({}min) and ramp down ({}min) exceed the duration ({}min)",
                    self.ramp_up_min, self.ramp_down_min, self.duration_min
                ));
            }
        }
        Ok(())
    }

    /// Minutes spent at the target rate between ramping up and ramping down.
    pub fn hold_min(&self) -> u64 {
        self.duration_min
            .saturating_sub(self.ramp_up_min.saturating_add(self.ramp_down_min))
    }

    /// Base path of the PromQL HTTP API.
    pub fn read_base_url(&self) -> String {
        format!(
            "{}://{}/prometheus/api/v1",
            self.scheme, self.read_hostname
        )
    }

    /// Remote-write push endpoint.
    pub fn write_url(&self) -> String {
        format!("{}://{}/api/v1/push", self.scheme, self.write_hostname)
    }

    pub fn tenant_id(&self) -> Option<&str> {
        self.tenant_id.as_deref().filter(|t| !t.is_empty())
    }
}
