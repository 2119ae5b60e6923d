//! Conductor configuration (`baygrid.toml`).
//!
//! Loaded once at process start and passed by reference into the
//! conductor and reconciler. Every section has defaults, so an empty
//! file is a valid configuration.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::duration::parse_duration;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ConductorConfig {
    pub api: ApiConfig,
    pub conductor: ReconcileConfig,
    pub bay: BayDefaults,
    pub heat: HeatConfig,
    pub database: DatabaseConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ApiConfig {
    /// Upper bound on the number of records returned by one list call.
    pub max_limit: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconcileConfig {
    /// Interval between reconciliation passes (e.g. "60s").
    pub periodic_interval: String,
    /// How long a create with an unknown submission outcome may stay
    /// unresolved before it is marked `CREATE_FAILED`.
    pub submission_grace: String,
    /// Maximum stored length of a status reason.
    pub status_reason_max_len: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BayDefaults {
    /// Stack creation timeout handed to the backend, in minutes.
    pub create_timeout_mins: u32,
    /// Base URL for generated etcd discovery URLs.
    pub discovery_endpoint: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HeatConfig {
    /// Base URL of the stack service (e.g. "http://127.0.0.1:8004/v1/tenant").
    pub endpoint: String,
    pub auth_token: Option<String>,
    /// Bound on every stack-service request (e.g. "30s").
    pub request_timeout: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self { max_limit: 1000 }
    }
}

impl Default for ReconcileConfig {
    fn default() -> Self {
        Self {
            periodic_interval: "60s".to_string(),
            submission_grace: "5m".to_string(),
            status_reason_max_len: 255,
        }
    }
}

impl Default for BayDefaults {
    fn default() -> Self {
        Self {
            create_timeout_mins: 60,
            discovery_endpoint: "https://discovery.etcd.io".to_string(),
        }
    }
}

impl Default for HeatConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8004/v1".to_string(),
            auth_token: None,
            request_timeout: "30s".to_string(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: PathBuf::from("/var/lib/baygrid/baygrid.redb"),
        }
    }
}

impl ConductorConfig {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> anyhow::Result<Self> {
        let config: ConductorConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml_string(&self) -> anyhow::Result<String> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Reject values the conductor cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.api.max_limit == 0 {
            anyhow::bail!("api.max_limit must be greater than zero");
        }
        if self.conductor.status_reason_max_len == 0 {
            anyhow::bail!("conductor.status_reason_max_len must be greater than zero");
        }
        if self.bay.create_timeout_mins == 0 {
            anyhow::bail!("bay.create_timeout_mins must be greater than zero");
        }
        for (field, value) in [
            ("conductor.periodic_interval", &self.conductor.periodic_interval),
            ("conductor.submission_grace", &self.conductor.submission_grace),
            ("heat.request_timeout", &self.heat.request_timeout),
        ] {
            match parse_duration(value) {
                Some(d) if !d.is_zero() => {}
                Some(_) => anyhow::bail!("{field} must be greater than zero"),
                None => anyhow::bail!("{field}: invalid duration {value:?}"),
            }
        }
        if !self.heat.endpoint.starts_with("http://") {
            anyhow::bail!(
                "heat.endpoint must be an http:// URL, got {:?}",
                self.heat.endpoint
            );
        }
        Ok(())
    }

    pub fn periodic_interval(&self) -> Duration {
        parse_duration(&self.conductor.periodic_interval).unwrap_or(Duration::from_secs(60))
    }

    pub fn submission_grace(&self) -> Duration {
        parse_duration(&self.conductor.submission_grace).unwrap_or(Duration::from_secs(300))
    }

    pub fn request_timeout(&self) -> Duration {
        parse_duration(&self.heat.request_timeout).unwrap_or(Duration::from_secs(30))
    }

    /// Clamp a caller-supplied page size to `api.max_limit`.
    pub fn page_limit(&self, requested: Option<usize>) -> usize {
        match requested {
            Some(0) | None => self.api.max_limit,
            Some(n) => n.min(self.api.max_limit),
        }
    }
}
