//! Configuration for coordnode components

use crate::common::utils::parse_duration;
use crate::common::Result;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Time to wait for an embedded node to report readiness.
pub const DEFAULT_STARTUP_TIMEOUT: Duration = Duration::from_secs(60);

/// Default per-call timeout of a coordination client.
pub const DEFAULT_CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Key prefix every client operation is namespaced under.
pub const DEFAULT_KEY_PREFIX: &str = "/coord-operate";

/// Environment variables override file values, e.g. `COORDNODE__COORDINATOR__NAME`.
pub const ENV_PREFIX: &str = "COORDNODE";

/// Global configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Embedded node settings
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Startup deadline and client defaults
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// Logging level
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Config {
    /// Load configuration from an optional TOML file, layered under
    /// `COORDNODE__*` environment variables.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::from(path.to_path_buf()).required(true));
        }
        let config = builder
            .add_source(config::Environment::with_prefix(ENV_PREFIX).separator("__"))
            .build()?
            .try_deserialize()?;
        Ok(config)
    }
}

/// State a member starts its cluster in.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ClusterState {
    #[default]
    New,
    Existing,
}

impl std::fmt::Display for ClusterState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ClusterState::New => write!(f, "new"),
            ClusterState::Existing => write!(f, "existing"),
        }
    }
}

/// Host-side configuration of the embedded coordination node.
///
/// Addresses are kept as strings here; turning them into listen addresses is
/// the job of `NodeConfig::derive`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CoordinatorConfig {
    /// Member name, unique in the cluster
    #[serde(default = "default_name")]
    pub name: String,

    /// Data directory; `default.<name>` when empty
    #[serde(default)]
    pub data_dir: PathBuf,

    /// Listen address for clients (gRPC and HTTP)
    #[serde(default = "default_client_addr")]
    pub client_addr: String,

    /// Listen address for peers
    #[serde(default = "default_peer_addr")]
    pub peer_addr: String,

    /// Client address advertised to the cluster
    #[serde(default)]
    pub advertise_client_addr: Option<String>,

    /// Peer address advertised to the cluster
    #[serde(default)]
    pub advertise_peer_addr: Option<String>,

    /// Initial members, `name=host:port` pairs separated by commas
    #[serde(default)]
    pub initial_cluster: String,

    #[serde(default)]
    pub initial_cluster_state: ClusterState,

    #[serde(default = "default_cluster_token")]
    pub initial_cluster_token: String,
}

fn default_name() -> String {
    "coord-node".to_string()
}
fn default_client_addr() -> String {
    "127.0.0.1:2379".to_string()
}
fn default_peer_addr() -> String {
    "127.0.0.1:2380".to_string()
}
fn default_cluster_token() -> String {
    "coord-cluster".to_string()
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            name: default_name(),
            data_dir: PathBuf::new(),
            client_addr: default_client_addr(),
            peer_addr: default_peer_addr(),
            advertise_client_addr: None,
            advertise_peer_addr: None,
            initial_cluster: String::new(),
            initial_cluster_state: ClusterState::New,
            initial_cluster_token: default_cluster_token(),
        }
    }
}

/// Timeouts and client namespace
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Readiness deadline of the embedded node, e.g. "60s"
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout: String,

    /// Default per-call client timeout, e.g. "10s"
    #[serde(default = "default_client_timeout")]
    pub client_timeout: String,

    #[serde(default = "default_key_prefix")]
    pub key_prefix: String,
}

fn default_startup_timeout() -> String {
    "60s".to_string()
}
fn default_client_timeout() -> String {
    "10s".to_string()
}
fn default_key_prefix() -> String {
    DEFAULT_KEY_PREFIX.to_string()
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            startup_timeout: default_startup_timeout(),
            client_timeout: default_client_timeout(),
            key_prefix: default_key_prefix(),
        }
    }
}

impl TimeoutConfig {
    pub fn startup_timeout(&self) -> Result<Duration> {
        parse_duration(&self.startup_timeout)
    }

    pub fn client_timeout(&self) -> Result<Duration> {
        parse_duration(&self.client_timeout)
    }
}
