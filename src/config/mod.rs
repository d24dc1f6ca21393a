//! Configuration management
//!
//! Defaults, YAML/JSON config files loaded in order, and CLI overrides
//! on top. `--print-config` dumps the effective configuration.

use std::path::{Path, PathBuf};
use std::str::FromStr;

use clap::Parser;
use serde::{Deserialize, Serialize};

use crate::error::{ConfigError, Error, Result};
use crate::stratum::{MiningConfig, StratumConfig, VardiffConfig};

/// Operating mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MiningMode {
    /// Work from a local full node, submit blocks to it
    #[default]
    Solo,
    /// Re-serve an upstream pool's work, forward qualifying shares
    Proxy,
}

impl FromStr for MiningMode {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "solo" => Ok(Self::Solo),
            "proxy" => Ok(Self::Proxy),
            other => Err(Error::config_invalid_value("mode", other, "solo|proxy")),
        }
    }
}

/// Local node RPC settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct NodeConfig {
    /// RPC host
    pub host: String,
    /// RPC port
    pub port: u16,
    /// Basic auth username
    pub username: String,
    /// Basic auth password
    pub password: String,
    /// Connect over HTTPS (self-signed accepted)
    pub use_ssl: bool,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8332,
            username: "bitcoin".to_string(),
            password: String::new(),
            use_ssl: false,
        }
    }
}

/// Upstream pool settings (proxy mode).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ProxyConfig {
    /// Pool endpoint, `host:port`
    pub url: String,
    /// Pool worker/account name
    pub worker_name: String,
    /// Pool password ("x" when empty)
    pub password: String,
}

/// Logging settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct LoggingConfig {
    /// tracing filter, e.g. "info" or "minevault=debug"
    pub level: String,
    /// "plain" or "json"
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "plain".to_string(),
        }
    }
}

/// Complete server configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct Config {
    /// Operating mode
    pub mode: MiningMode,
    /// Local node RPC (solo)
    pub node: NodeConfig,
    /// Miner-facing listener
    pub stratum: StratumConfig,
    /// Coin / payout / coinbase tag
    pub mining: MiningConfig,
    /// Per-session difficulty controller tuning
    pub vardiff: VardiffConfig,
    /// Upstream pool (proxy)
    pub proxy: ProxyConfig,
    /// Log level and format
    pub logging: LoggingConfig,
}

/// Command-line arguments.
#[derive(Parser, Debug, Default)]
#[clap(
    name = "minevault",
    about = "Solo/proxy Stratum V1 mining server for Bitcoin-family chains",
    version
)]
pub struct Args {
    /// Configuration file in YAML or JSON format. May be given multiple
    /// times; files are loaded in order, later files winning.
    #[clap(long = "config-file", value_name = "FILE")]
    pub config_file: Vec<PathBuf>,

    /// Operating mode: solo or proxy
    #[clap(short = 'm', long = "mode", value_name = "solo|proxy")]
    pub mode: Option<String>,

    /// Port the stratum server listens on
    #[clap(long = "stratum-port")]
    pub stratum_port: Option<u16>,

    /// Maximum concurrent miner connections
    #[clap(long = "max-connections")]
    pub max_connections: Option<usize>,

    /// Coin to mine (btc, bch, dgb, xec)
    #[clap(short = 'c', long = "coin")]
    pub coin: Option<String>,

    /// Payout destination (scriptPubKey hex with the built-in codec)
    #[clap(short = 'a', long = "payout-address")]
    pub payout_address: Option<String>,

    /// Tag embedded in the coinbase scriptSig
    #[clap(long = "coinbase-tag")]
    pub coinbase_tag: Option<String>,

    /// Node RPC host
    #[clap(long = "node-host")]
    pub node_host: Option<String>,

    /// Node RPC port
    #[clap(long = "node-port")]
    pub node_port: Option<u16>,

    /// Node RPC username
    #[clap(long = "node-user")]
    pub node_user: Option<String>,

    /// Node RPC password
    #[clap(long = "node-password")]
    pub node_password: Option<String>,

    /// Connect to the node over HTTPS
    #[clap(long = "node-ssl")]
    pub node_ssl: bool,

    /// Upstream pool endpoint (proxy mode), host:port
    #[clap(long = "proxy-url")]
    pub proxy_url: Option<String>,

    /// Upstream pool worker name (proxy mode)
    #[clap(long = "proxy-worker")]
    pub proxy_worker: Option<String>,

    /// Upstream pool password (proxy mode)
    #[clap(long = "proxy-password")]
    pub proxy_password: Option<String>,

    /// Log level filter
    #[clap(short = 'l', long = "log-level", value_name = "error|warn|info|debug")]
    pub log_level: Option<String>,

    /// Log format
    #[clap(long = "log-format", value_name = "plain|json")]
    pub log_format: Option<String>,

    /// Print the effective configuration and exit
    #[clap(long = "print-config")]
    pub print_config: bool,
}

impl Config {
    /// Load one config file (JSON by extension, YAML otherwise).
    pub fn load_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).map_err(|_| {
            Error::Config(ConfigError::FileNotFound {
                path: path.display().to_string(),
            })
        })?;

        let parsed = if path.extension().is_some_and(|e| e == "json") {
            serde_json::from_str(&raw).map_err(|e| {
                Error::Config(ConfigError::ParseError {
                    file: path.display().to_string(),
                    message: e.to_string(),
                })
            })?
        } else {
            serde_yaml::from_str(&raw).map_err(|e| {
                Error::Config(ConfigError::ParseError {
                    file: path.display().to_string(),
                    message: e.to_string(),
                })
            })?
        };
        Ok(parsed)
    }

    /// Resolve the effective configuration: defaults, then config
    /// files in order, then CLI overrides. Validated before returning.
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut config = Config::default();
        for path in &args.config_file {
            config = Self::load_file(path)?;
        }

        if let Some(mode) = &args.mode {
            config.mode = mode.parse()?;
        }
        if let Some(port) = args.stratum_port {
            config.stratum.port = port;
        }
        if let Some(max) = args.max_connections {
            config.stratum.max_connections = max;
        }
        if let Some(coin) = &args.coin {
            config.mining.coin = coin.clone();
        }
        if let Some(address) = &args.payout_address {
            config.mining.payout_address = address.clone();
        }
        if let Some(tag) = &args.coinbase_tag {
            config.mining.coinbase_tag = tag.clone();
        }
        if let Some(host) = &args.node_host {
            config.node.host = host.clone();
        }
        if let Some(port) = args.node_port {
            config.node.port = port;
        }
        if let Some(user) = &args.node_user {
            config.node.username = user.clone();
        }
        if let Some(password) = &args.node_password {
            config.node.password = password.clone();
        }
        if args.node_ssl {
            config.node.use_ssl = true;
        }
        if let Some(url) = &args.proxy_url {
            config.proxy.url = url.clone();
        }
        if let Some(worker) = &args.proxy_worker {
            config.proxy.worker_name = worker.clone();
        }
        if let Some(password) = &args.proxy_password {
            config.proxy.password = password.clone();
        }
        if let Some(level) = &args.log_level {
            config.logging.level = level.clone();
        }
        if let Some(format) = &args.log_format {
            config.logging.format = format.clone();
        }

        config.validate()?;
        Ok(config)
    }

    /// Check cross-field requirements.
    pub fn validate(&self) -> Result<()> {
        match self.mode {
            MiningMode::Solo => {
                if self.mining.payout_address.is_empty() {
                    return Err(Error::config_missing_field("mining.payoutAddress"));
                }
            }
            MiningMode::Proxy => {
                if self.proxy.url.is_empty() {
                    return Err(Error::config_missing_field("proxy.url"));
                }
                if self.proxy.worker_name.is_empty() {
                    return Err(Error::config_missing_field("proxy.workerName"));
                }
            }
        }

        if self.vardiff.min_diff <= 0.0 {
            return Err(Error::config_invalid_value(
                "vardiff.minDiff",
                self.vardiff.min_diff.to_string(),
                "positive number",
            ));
        }
        if self.vardiff.target_time_secs == 0 || self.vardiff.retarget_time_secs == 0 {
            return Err(Error::config("vardiff timing values must be non-zero"));
        }
        if self.vardiff.max_diff > 0.0 && self.vardiff.max_diff < self.vardiff.min_diff {
            return Err(Error::config_invalid_value(
                "vardiff.maxDiff",
                self.vardiff.max_diff.to_string(),
                "0 (unbounded) or >= minDiff",
            ));
        }
        Ok(())
    }
}
