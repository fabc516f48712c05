use std::path::Path;
use std::time::Duration;

use figment::providers::{Env, Format, Toml};
use figment::Figment;
use serde::Deserialize;

use crate::error::ControllerError;

fn default_context() -> String {
    "default".to_string()
}

fn default_gc_duration_minutes() -> u64 {
    30
}

fn default_max_engines_in_collection() -> u32 {
    100
}

fn default_jmeter_container() -> String {
    "setagaya/jmeter-engine:latest".to_string()
}

fn default_lifespan_minutes() -> u64 {
    60
}

fn default_gc_interval_seconds() -> u64 {
    300
}

/// `ExecutorConfig.Cluster.GCDuration` — grace period before an idle
/// deployment is stale, consumed by the deployment auto-purger.
#[derive(Debug, Clone, Deserialize)]
pub struct ClusterConfig {
    #[serde(default = "default_gc_duration_minutes")]
    pub gc_duration_minutes: u64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self { gc_duration_minutes: default_gc_duration_minutes() }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ExecutorConfig {
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default = "default_max_engines_in_collection")]
    pub max_engines_in_collection: u32,
    #[serde(default = "default_jmeter_container")]
    pub jmeter_container: String,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            cluster: ClusterConfig::default(),
            max_engines_in_collection: default_max_engines_in_collection(),
            jmeter_container: default_jmeter_container(),
        }
    }
}

/// `IngressConfig.Lifespan`/`GCInterval` — grace period and poll
/// period for the ingress auto-purger.
#[derive(Debug, Clone, Deserialize)]
pub struct IngressConfig {
    #[serde(default = "default_lifespan_minutes")]
    pub lifespan_minutes: u64,
    #[serde(default = "default_gc_interval_seconds")]
    pub gc_interval_seconds: u64,
}

impl Default for IngressConfig {
    fn default() -> Self {
        Self {
            lifespan_minutes: default_lifespan_minutes(),
            gc_interval_seconds: default_gc_interval_seconds(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ObjectStoreConfig {
    pub endpoint: Option<String>,
    pub access_key: Option<String>,
    pub secret_key: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LdapConfig {
    pub url: Option<String>,
    pub bind_dn: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct HttpConfig {
    pub proxy: Option<String>,
}

/// Process-wide configuration, loaded once at startup and passed by
/// value into the facade constructor — never a global singleton.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_context")]
    pub context: String,
    #[serde(default)]
    pub distributed_mode: bool,
    #[serde(default)]
    pub executor: ExecutorConfig,
    #[serde(default)]
    pub ingress: IngressConfig,
    pub db_endpoint: Option<String>,
    #[serde(default)]
    pub object_store: ObjectStoreConfig,
    #[serde(default)]
    pub ldap: LdapConfig,
    #[serde(default)]
    pub http: HttpConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            context: default_context(),
            distributed_mode: false,
            executor: ExecutorConfig::default(),
            ingress: IngressConfig::default(),
            db_endpoint: None,
            object_store: ObjectStoreConfig::default(),
            ldap: LdapConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Config {
    /// Layers a TOML file under environment overrides (`SETAGAYA_` prefix,
    /// `__` as the nesting separator), matching the figment pattern used
    /// by other async Rust services.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ControllerError> {
        Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed("SETAGAYA_").split("__"))
            .extract()
            .map_err(|e| ControllerError::Internal(e.to_string()))
    }

    /// Environment-only load, useful for the daemon's containerized
    /// deployment where a config file may not be mounted.
    pub fn load_from_env() -> Result<Self, ControllerError> {
        Figment::new()
            .merge(Env::prefixed("SETAGAYA_").split("__"))
            .extract()
            .map_err(|e| ControllerError::Internal(e.to_string()))
    }

    pub fn gc_duration(&self) -> Duration {
        Duration::from_secs(self.executor.cluster.gc_duration_minutes * 60)
    }

    pub fn ingress_lifespan(&self) -> Duration {
        Duration::from_secs(self.ingress.lifespan_minutes * 60)
    }

    pub fn ingress_gc_interval(&self) -> Duration {
        Duration::from_secs(self.ingress.gc_interval_seconds)
    }
}
