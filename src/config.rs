//! Bot configuration
//!
//! Settings for one bot session: which account it controls, where the OPQ
//! backend lives, and how the outbound HTTP client reaches it. Usually read
//! from `~/.opqbot/config.json`, or built in code with [`BotConfig::new`].
//!
//! Note: loopback connections always bypass the proxy, since the backend is
//! typically co-located with the bot.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Default spacing between two outbound sends (milliseconds)
pub const DEFAULT_SEND_INTERVAL_MS: u64 = 1000;
/// Default capacity of the outbound dispatch queue
pub const DEFAULT_QUEUE_CAPACITY: usize = 1024;
/// Default HTTP request timeout (seconds)
pub const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;

/// Default proxy protocol (when not specified in config)
const DEFAULT_PROXY_PROTOCOL: &str = "http";
/// Default proxy host (when not specified in config)
const DEFAULT_PROXY_HOST: &str = "127.0.0.1";
/// Default proxy port (when not specified in config)
const DEFAULT_PROXY_PORT: u16 = 7890;

const NO_PROXY_LOOPBACK: &str = "localhost,localhost.localdomain,127.0.0.1,127.0.0.0/8,::1,[::1]";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("invalid JSON in {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("{0}")]
    InvalidProxy(String),
    #[error("failed to build HTTP client: {0}")]
    Client(#[from] reqwest::Error),
}

/// Proxy settings for outbound HTTP
///
/// # Example JSON
/// ```json
/// {
///   "enabled": true,
///   "protocol": "socks5",
///   "host": "127.0.0.1",
///   "port": 1080
/// }
/// ```
#[derive(Debug, Serialize, Deserialize, Default, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProxySettings {
    /// Whether proxy is enabled
    pub enabled: bool,
    /// Proxy protocol: "http", "https", or "socks5"
    pub protocol: Option<String>,
    /// Proxy host (IP or domain)
    pub host: Option<String>,
    /// Proxy port (1-65535)
    pub port: Option<u16>,
}

/// Session configuration
///
/// # Example JSON
/// ```json
/// {
///   "qq": 123456789,
///   "opqUrl": "http://127.0.0.1:8888",
///   "sendIntervalMs": 1000
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct BotConfig {
    /// Controlled account
    pub qq: i64,
    /// Backend base address, e.g. `http://127.0.0.1:8888`
    pub opq_url: String,
    #[serde(default = "default_send_interval_ms")]
    pub send_interval_ms: u64,
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default)]
    pub proxy_settings: Option<ProxySettings>,
}

fn default_send_interval_ms() -> u64 {
    DEFAULT_SEND_INTERVAL_MS
}

fn default_queue_capacity() -> usize {
    DEFAULT_QUEUE_CAPACITY
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

impl BotConfig {
    pub fn new(qq: i64, opq_url: impl Into<String>) -> Self {
        Self {
            qq,
            opq_url: opq_url.into(),
            send_interval_ms: DEFAULT_SEND_INTERVAL_MS,
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            request_timeout_secs: DEFAULT_REQUEST_TIMEOUT_SECS,
            proxy_settings: None,
        }
    }

    pub fn send_interval(&self) -> Duration {
        Duration::from_millis(self.send_interval_ms)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    /// Proxy settings, only when enabled
    pub fn active_proxy(&self) -> Option<&ProxySettings> {
        self.proxy_settings.as_ref().filter(|p| p.enabled)
    }
}

/// `~/.opqbot/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::home_dir().map(|home| home.join(".opqbot").join("config.json"))
}

/// Read a [`BotConfig`] from a JSON file
pub fn load_config(path: &Path) -> Result<BotConfig, ConfigError> {
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;

    let config: BotConfig = serde_json::from_str(&content).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;

    if config.queue_capacity == 0 {
        log::warn!(
            "[config] queueCapacity is 0 in {:?}, using {}",
            path,
            DEFAULT_QUEUE_CAPACITY
        );
        return Ok(BotConfig {
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            ..config
        });
    }

    Ok(config)
}

/// Get proxy URL string from settings with validation
pub fn get_proxy_url(settings: &ProxySettings) -> Result<String, ConfigError> {
    let protocol = settings.protocol.as_deref().unwrap_or(DEFAULT_PROXY_PROTOCOL);
    if !["http", "https", "socks5"].contains(&protocol) {
        return Err(ConfigError::InvalidProxy(format!(
            "Invalid proxy protocol '{}'. Supported: http, https, socks5",
            protocol
        )));
    }

    let port = settings.port.unwrap_or(DEFAULT_PROXY_PORT);
    if port == 0 {
        return Err(ConfigError::InvalidProxy(format!(
            "Invalid proxy port: {}. Port must be between 1 and 65535",
            port
        )));
    }

    let host = settings.host.as_deref().unwrap_or(DEFAULT_PROXY_HOST);

    Ok(format!("{}://{}:{}", protocol, host, port))
}

/// Build a reqwest client for backend calls
/// - If a proxy is given, use it but exclude loopback addresses
/// - Otherwise disable all proxies (including the system proxy)
pub fn build_client(
    builder: reqwest::ClientBuilder,
    proxy: Option<&ProxySettings>,
) -> Result<reqwest::Client, ConfigError> {
    let builder = match proxy.filter(|p| p.enabled) {
        Some(settings) => {
            let proxy_url = get_proxy_url(settings)?;
            log::info!("[config] Using proxy for backend requests: {}", proxy_url);
            let proxy = reqwest::Proxy::all(&proxy_url)?
                .no_proxy(reqwest::NoProxy::from_string(NO_PROXY_LOOPBACK));
            builder.proxy(proxy)
        }
        None => builder.no_proxy(),
    };

    Ok(builder.build()?)
}
