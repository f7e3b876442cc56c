//! Configuration schema and loader for the broker and agent binaries.
//!
//! Configuration is TOML. Every key is optional; defaults match the
//! documented operational defaults (HTTP on 3000, tunnel socket on 3001,
//! 30 s request deadline, 5 s reconnect delay, 16 MiB frame cap).

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

mod validate;

pub use validate::ConfigError;

/// Default cap on a single frame payload (16 MiB).
const DEFAULT_MAX_FRAME_BYTES: usize = 16 * 1024 * 1024;

/// Root configuration shared by both binaries.
///
/// The broker reads `[server]` and `[limits]`; the agent reads `[client]`,
/// `[reconnection]` and `[limits]`. A single file may configure both.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub server: ServerConfig,
    pub client: ClientConfig,
    pub reconnection: ReconnectionConfig,
    pub limits: LimitsConfig,
}

/// Broker listener configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Public HTTP(S) listener.
    pub http: HttpListenerConfig,
    /// Framed tunnel listener agents dial into.
    pub socket: SocketListenerConfig,
}

/// The public HTTP(S) listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpListenerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: ServerTlsConfig,
}

impl Default for HttpListenerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: 3000,
            ssl: ServerTlsConfig::default(),
        }
    }
}

impl HttpListenerConfig {
    /// `host:port` form for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// The framed tunnel listener.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SocketListenerConfig {
    pub host: String,
    pub port: u16,
    pub ssl: ServerTlsConfig,
}

impl Default for SocketListenerConfig {
    fn default() -> Self {
        Self {
            host: default_bind_host(),
            port: 3001,
            ssl: ServerTlsConfig::default(),
        }
    }
}

impl SocketListenerConfig {
    /// `host:port` form for binding.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Server-side TLS material.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerTlsConfig {
    pub enabled: bool,
    /// PEM private key path. Required when `enabled`.
    pub key: Option<PathBuf>,
    /// PEM certificate chain path. Required when `enabled`.
    pub cert: Option<PathBuf>,
}

/// Agent-side configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    /// Broker tunnel endpoint to dial.
    pub server: DialConfig,
    /// Upstream proxying behavior.
    pub proxy: ProxyConfig,
}

/// Where the agent dials the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DialConfig {
    pub host: String,
    pub port: u16,
    pub ssl: ClientTlsConfig,
}

impl Default for DialConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 3001,
            ssl: ClientTlsConfig::default(),
        }
    }
}

impl DialConfig {
    /// `host:port` form for connecting.
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Client-side TLS toward the broker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientTlsConfig {
    pub enabled: bool,
    /// PEM CA bundle used to verify the broker. When absent, the
    /// platform trust anchors apply.
    pub ca: Option<PathBuf>,
    /// Verify the broker certificate. Disabling accepts any certificate.
    pub reject_unauthorized: bool,
}

impl Default for ClientTlsConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            ca: None,
            reject_unauthorized: true,
        }
    }
}

/// Upstream call behavior on the agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProxyConfig {
    /// Base URL relative request URLs resolve against.
    pub default_target: String,
    /// Ordered rewrite rules; the first matching pattern wins.
    pub rewrite_rules: Vec<RewriteRule>,
    pub ssl: UpstreamTlsConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            default_target: "http://example.com".to_string(),
            rewrite_rules: Vec::new(),
            ssl: UpstreamTlsConfig::default(),
        }
    }
}

/// One URL rewrite rule.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RewriteRule {
    /// Regular expression matched against the request URL.
    pub pattern: String,
    /// Replacement; capture-group references (`$1`) are honored.
    pub replacement: String,
}

/// TLS verification toward upstream origins.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct UpstreamTlsConfig {
    pub reject_unauthorized: bool,
}

impl Default for UpstreamTlsConfig {
    fn default() -> Self {
        Self {
            reject_unauthorized: true,
        }
    }
}

/// Agent redial behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ReconnectionConfig {
    pub delay_ms: u64,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self { delay_ms: 5000 }
    }
}

/// Protocol and dispatch limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LimitsConfig {
    /// Broker-side per-request deadline.
    pub request_timeout_ms: u64,
    /// Cap on a single frame payload.
    pub max_frame_bytes: usize,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: 30_000,
            max_frame_bytes: DEFAULT_MAX_FRAME_BYTES,
        }
    }
}

fn default_bind_host() -> String {
    "0.0.0.0".to_string()
}

impl Config {
    /// Load and validate configuration from a TOML file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        let config = Self::from_toml(&raw)?;
        debug!(path = %path.display(), "configuration loaded");
        Ok(config)
    }

    /// Parse and validate configuration from a TOML string.
    pub fn from_toml(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_millis(self.limits.request_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnection.delay_ms)
    }
}
