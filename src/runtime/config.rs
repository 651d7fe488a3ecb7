use crate::rpc::normalize_address;
use crate::runtime::telemetry;
use crate::tracker::gas::GAS_STATION_URL;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::fmt;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_DB_PATH: &str = "oracled_db";
const DEFAULT_TRACKER_CYCLE_SECS: u64 = 10;
const DEFAULT_TRACKERS: [&str; 3] = ["gas", "balance", "current_variables"];
const DEFAULT_DATA_SERVER_ADDR: &str = "127.0.0.1:5000";
const DEFAULT_MINING_INTERVAL_SECS: u64 = 2;
const DEFAULT_SHUTDOWN_PATIENCE_SECS: u64 = 30;
const DEFAULT_REMOTE_OPEN_TIMEOUT_SECS: u64 = 5;

/// How the miner reaches the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProxyMode {
    /// The store is opened in this process.
    #[default]
    Local,
    /// The data server exposes the store over JSON-RPC at `data_server_addr`.
    Remote,
}

/// A configuration value that failed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConfigError {
    pub field: &'static str,
    pub reason: String,
}

impl ConfigError {
    fn new(field: &'static str, reason: impl Into<String>) -> Self {
        Self {
            field,
            reason: reason.into(),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.field, self.reason)
    }
}

impl std::error::Error for ConfigError {}

/// Runtime configuration for an oracle node.
///
/// All instances must be constructed via [`NodeConfig::builder`],
/// [`NodeConfig::new`] or [`NodeConfig::from_json_file`] so invariants are
/// validated before any consumer observes the values.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeConfig {
    node_url: String,
    db_path: PathBuf,
    tracker_cycle: Duration,
    trackers: Vec<String>,
    proxy_mode: ProxyMode,
    data_server_addr: SocketAddr,
    enable_data_server: bool,
    enable_miner: bool,
    public_address: Option<String>,
    mining_interval: Duration,
    metrics_interval: Duration,
    shutdown_patience: Duration,
    remote_open_timeout: Duration,
    gas_feed_url: String,
}

pub struct NodeConfigParams {
    pub node_url: String,
    pub db_path: PathBuf,
    pub tracker_cycle: Duration,
    pub trackers: Vec<String>,
    pub proxy_mode: ProxyMode,
    pub data_server_addr: SocketAddr,
    pub enable_data_server: bool,
    pub enable_miner: bool,
    pub public_address: Option<String>,
    pub mining_interval: Duration,
    pub metrics_interval: Duration,
    pub shutdown_patience: Duration,
    pub remote_open_timeout: Duration,
    pub gas_feed_url: String,
}

impl NodeConfig {
    pub fn builder() -> NodeConfigBuilder {
        NodeConfigBuilder::default()
    }

    /// Constructs a configuration directly from the provided values and validates it.
    pub fn new(params: NodeConfigParams) -> Result<Self> {
        let NodeConfigParams {
            node_url,
            db_path,
            tracker_cycle,
            trackers,
            proxy_mode,
            data_server_addr,
            enable_data_server,
            enable_miner,
            public_address,
            mining_interval,
            metrics_interval,
            shutdown_patience,
            remote_open_timeout,
            gas_feed_url,
        } = params;

        let public_address = match public_address.map(trimmed_string) {
            Some(raw) if raw.is_empty() => None,
            Some(raw) => Some(
                normalize_address(&raw)
                    .map_err(|err| ConfigError::new("public_address", format!("{err:#}")))?,
            ),
            None => None,
        };

        let config = Self {
            node_url: trimmed_string(node_url),
            db_path,
            tracker_cycle,
            trackers: trackers.into_iter().map(trimmed_string).collect(),
            proxy_mode,
            data_server_addr,
            enable_data_server,
            enable_miner,
            public_address,
            mining_interval,
            metrics_interval,
            shutdown_patience,
            remote_open_timeout,
            gas_feed_url: trimmed_string(gas_feed_url),
        };

        config.validate()?;
        Ok(config)
    }

    /// Loads a JSON document (see [`NodeConfigFile`]) and validates it.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_json_str(&raw)
            .with_context(|| format!("invalid config file {}", path.display()))
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        let file: NodeConfigFile =
            serde_json::from_str(raw).context("failed to parse config JSON")?;
        file.into_builder()?.build()
    }

    /// JSON-RPC endpoint of the chain node.
    pub fn node_url(&self) -> &str {
        &self.node_url
    }

    /// Directory of the embedded store.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Interval between tracker cycles.
    pub fn tracker_cycle(&self) -> Duration {
        self.tracker_cycle
    }

    /// Tracker names in execution order.
    pub fn trackers(&self) -> &[String] {
        &self.trackers
    }

    pub fn proxy_mode(&self) -> ProxyMode {
        self.proxy_mode
    }

    /// Address the remote store server binds and remote miners connect to.
    pub fn data_server_addr(&self) -> SocketAddr {
        self.data_server_addr
    }

    pub fn data_server_url(&self) -> String {
        format!("http://{}", self.data_server_addr)
    }

    pub fn enable_data_server(&self) -> bool {
        self.enable_data_server
    }

    pub fn enable_miner(&self) -> bool {
        self.enable_miner
    }

    /// Normalized account address watched by the balance tracker.
    pub fn public_address(&self) -> Option<&str> {
        self.public_address.as_deref()
    }

    pub fn mining_interval(&self) -> Duration {
        self.mining_interval
    }

    /// Interval used by the telemetry reporter.
    pub fn metrics_interval(&self) -> Duration {
        self.metrics_interval
    }

    /// Period between warnings while shutdown waits on a subsystem.
    pub fn shutdown_patience(&self) -> Duration {
        self.shutdown_patience
    }

    /// Upper bound on opening a remote proxy.
    pub fn remote_open_timeout(&self) -> Duration {
        self.remote_open_timeout
    }

    pub fn gas_feed_url(&self) -> &str {
        &self.gas_feed_url
    }

    pub fn validate(&self) -> Result<()> {
        validate_url(&self.node_url, "node_url")?;

        if self.db_path.as_os_str().is_empty() {
            return Err(ConfigError::new("db_path", "cannot be empty").into());
        }

        ensure_positive(self.tracker_cycle, "tracker_cycle")?;
        ensure_positive(self.mining_interval, "mining_interval")?;
        ensure_positive(self.metrics_interval, "metrics_interval")?;
        ensure_positive(self.shutdown_patience, "shutdown_patience")?;
        ensure_positive(self.remote_open_timeout, "remote_open_timeout")?;

        if !self.enable_data_server && !self.enable_miner {
            return Err(ConfigError::new(
                "enable_data_server",
                "and enable_miner cannot both be false",
            )
            .into());
        }

        if self.trackers.iter().any(|name| name.is_empty()) {
            return Err(ConfigError::new("trackers", "cannot contain empty names").into());
        }

        if self.enable_data_server {
            if self.has_tracker("balance") && self.public_address.is_none() {
                return Err(ConfigError::new(
                    "public_address",
                    "is required when the balance tracker is enabled",
                )
                .into());
            }
            if self.has_tracker("gas") {
                validate_url(&self.gas_feed_url, "gas_feed_url")?;
            }
        }

        Ok(())
    }

    fn has_tracker(&self, name: &str) -> bool {
        self.trackers.iter().any(|tracker| tracker == name)
    }
}

#[derive(Debug, Default, Clone)]
pub struct NodeConfigBuilder {
    node_url: Option<String>,
    db_path: Option<PathBuf>,
    tracker_cycle: Option<Duration>,
    trackers: Option<Vec<String>>,
    proxy_mode: Option<ProxyMode>,
    data_server_addr: Option<SocketAddr>,
    enable_data_server: Option<bool>,
    enable_miner: Option<bool>,
    public_address: Option<String>,
    mining_interval: Option<Duration>,
    metrics_interval: Option<Duration>,
    shutdown_patience: Option<Duration>,
    remote_open_timeout: Option<Duration>,
    gas_feed_url: Option<String>,
}

impl NodeConfigBuilder {
    pub fn node_url(mut self, url: impl Into<String>) -> Self {
        self.node_url = Some(url.into());
        self
    }

    pub fn db_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.db_path = Some(path.into());
        self
    }

    pub fn tracker_cycle(mut self, cycle: Duration) -> Self {
        self.tracker_cycle = Some(cycle);
        self
    }

    pub fn trackers<I, S>(mut self, names: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.trackers = Some(names.into_iter().map(Into::into).collect());
        self
    }

    pub fn proxy_mode(mut self, mode: ProxyMode) -> Self {
        self.proxy_mode = Some(mode);
        self
    }

    pub fn data_server_addr(mut self, addr: SocketAddr) -> Self {
        self.data_server_addr = Some(addr);
        self
    }

    pub fn enable_data_server(mut self, enabled: bool) -> Self {
        self.enable_data_server = Some(enabled);
        self
    }

    pub fn enable_miner(mut self, enabled: bool) -> Self {
        self.enable_miner = Some(enabled);
        self
    }

    pub fn public_address(mut self, address: impl Into<String>) -> Self {
        self.public_address = Some(address.into());
        self
    }

    pub fn mining_interval(mut self, interval: Duration) -> Self {
        self.mining_interval = Some(interval);
        self
    }

    pub fn metrics_interval(mut self, interval: Duration) -> Self {
        self.metrics_interval = Some(interval);
        self
    }

    pub fn shutdown_patience(mut self, patience: Duration) -> Self {
        self.shutdown_patience = Some(patience);
        self
    }

    pub fn remote_open_timeout(mut self, timeout: Duration) -> Self {
        self.remote_open_timeout = Some(timeout);
        self
    }

    pub fn gas_feed_url(mut self, url: impl Into<String>) -> Self {
        self.gas_feed_url = Some(url.into());
        self
    }

    pub fn build(self) -> Result<NodeConfig> {
        let data_server_addr = match self.data_server_addr {
            Some(addr) => addr,
            None => DEFAULT_DATA_SERVER_ADDR
                .parse()
                .context("default data server address must parse")?,
        };

        let params = NodeConfigParams {
            node_url: self.node_url.context("node_url is required")?,
            db_path: self
                .db_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_DB_PATH)),
            tracker_cycle: self
                .tracker_cycle
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_TRACKER_CYCLE_SECS)),
            trackers: self
                .trackers
                .unwrap_or_else(|| DEFAULT_TRACKERS.iter().map(|s| s.to_string()).collect()),
            proxy_mode: self.proxy_mode.unwrap_or_default(),
            data_server_addr,
            enable_data_server: self.enable_data_server.unwrap_or(true),
            enable_miner: self.enable_miner.unwrap_or(true),
            public_address: self.public_address,
            mining_interval: self
                .mining_interval
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_MINING_INTERVAL_SECS)),
            metrics_interval: self
                .metrics_interval
                .unwrap_or(telemetry::DEFAULT_METRICS_INTERVAL),
            shutdown_patience: self
                .shutdown_patience
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_SHUTDOWN_PATIENCE_SECS)),
            remote_open_timeout: self
                .remote_open_timeout
                .unwrap_or_else(|| Duration::from_secs(DEFAULT_REMOTE_OPEN_TIMEOUT_SECS)),
            gas_feed_url: self
                .gas_feed_url
                .unwrap_or_else(|| GAS_STATION_URL.to_owned()),
        };

        NodeConfig::new(params)
    }
}

/// On-disk form of [`NodeConfig`]. Durations are whole milliseconds; omitted
/// fields take the builder defaults.
#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NodeConfigFile {
    pub node_url: Option<String>,
    pub db_path: Option<PathBuf>,
    pub tracker_cycle_ms: Option<u64>,
    pub trackers: Option<Vec<String>>,
    pub proxy_mode: Option<ProxyMode>,
    pub data_server_addr: Option<String>,
    pub enable_data_server: Option<bool>,
    pub enable_miner: Option<bool>,
    pub public_address: Option<String>,
    pub mining_interval_ms: Option<u64>,
    pub metrics_interval_ms: Option<u64>,
    pub shutdown_patience_ms: Option<u64>,
    pub remote_open_timeout_ms: Option<u64>,
    pub gas_feed_url: Option<String>,
}

impl NodeConfigFile {
    fn into_builder(self) -> Result<NodeConfigBuilder> {
        let mut builder = NodeConfig::builder();

        if let Some(url) = self.node_url {
            builder = builder.node_url(url);
        }
        if let Some(path) = self.db_path {
            builder = builder.db_path(path);
        }
        if let Some(ms) = self.tracker_cycle_ms {
            builder = builder.tracker_cycle(Duration::from_millis(ms));
        }
        if let Some(trackers) = self.trackers {
            builder = builder.trackers(trackers);
        }
        if let Some(mode) = self.proxy_mode {
            builder = builder.proxy_mode(mode);
        }
        if let Some(raw) = self.data_server_addr {
            let addr = raw
                .trim()
                .parse::<SocketAddr>()
                .map_err(|err| ConfigError::new("data_server_addr", err.to_string()))?;
            builder = builder.data_server_addr(addr);
        }
        if let Some(enabled) = self.enable_data_server {
            builder = builder.enable_data_server(enabled);
        }
        if let Some(enabled) = self.enable_miner {
            builder = builder.enable_miner(enabled);
        }
        if let Some(address) = self.public_address {
            builder = builder.public_address(address);
        }
        if let Some(ms) = self.mining_interval_ms {
            builder = builder.mining_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.metrics_interval_ms {
            builder = builder.metrics_interval(Duration::from_millis(ms));
        }
        if let Some(ms) = self.shutdown_patience_ms {
            builder = builder.shutdown_patience(Duration::from_millis(ms));
        }
        if let Some(ms) = self.remote_open_timeout_ms {
            builder = builder.remote_open_timeout(Duration::from_millis(ms));
        }
        if let Some(url) = self.gas_feed_url {
            builder = builder.gas_feed_url(url);
        }

        Ok(builder)
    }
}

fn trimmed_string(value: String) -> String {
    value.trim().to_owned()
}

fn ensure_positive(value: Duration, field: &'static str) -> Result<()> {
    if value.is_zero() {
        return Err(ConfigError::new(field, "must be greater than 0").into());
    }
    Ok(())
}

fn validate_url(url: &str, field: &'static str) -> Result<()> {
    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(ConfigError::new(field, "must start with http:// or https://").into());
    }
    Ok(())
}
