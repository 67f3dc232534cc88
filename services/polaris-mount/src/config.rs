//! Configuration types for the Polaris mount driver

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Main configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    pub connection: ConnectionConfig,
    pub site: SiteConfig,
    #[serde(default)]
    pub refresh: RefreshConfig,
}

/// TCP connection settings for the head
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_connection_timeout")]
    pub connection_timeout_seconds: u64,
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
}

impl ConnectionConfig {
    /// Address in `host:port` form
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Observer site; forwarded to the coordinate transform
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct SiteConfig {
    #[serde(default)]
    pub latitude: f64,
    #[serde(default)]
    pub longitude: f64,
    #[serde(default)]
    pub elevation: f64,
}

/// Freshness thresholds driving the periodic refresh tick.
///
/// The orientation and mode policies are deliberately separate: they watch
/// different responses, use different ages and trigger different requests.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefreshConfig {
    /// Orientation data older than this is a tracking risk worth a warning
    #[serde(with = "humantime_serde", default = "default_position_max_age")]
    pub position_max_age: Duration,
    /// Orientation data older than this triggers a position request
    #[serde(with = "humantime_serde", default = "default_position_refresh_age")]
    pub position_refresh_age: Duration,
    /// Mode data older than this triggers a mode request
    #[serde(with = "humantime_serde", default = "default_mode_refresh_age")]
    pub mode_refresh_age: Duration,
    /// Interval of the keepalive tick
    #[serde(with = "humantime_serde", default = "default_tick_interval")]
    pub tick_interval: Duration,
}

fn default_host() -> String {
    "192.168.0.1".to_string()
}

fn default_port() -> u16 {
    9090
}

fn default_connection_timeout() -> u64 {
    5
}

fn default_handshake_timeout() -> u64 {
    3
}

fn default_position_max_age() -> Duration {
    Duration::from_secs(5)
}

fn default_position_refresh_age() -> Duration {
    Duration::from_secs(2)
}

fn default_mode_refresh_age() -> Duration {
    Duration::from_secs(15)
}

fn default_tick_interval() -> Duration {
    Duration::from_millis(500)
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            connection_timeout_seconds: default_connection_timeout(),
            handshake_timeout_seconds: default_handshake_timeout(),
        }
    }
}

impl Default for RefreshConfig {
    fn default() -> Self {
        Self {
            position_max_age: default_position_max_age(),
            position_refresh_age: default_position_refresh_age(),
            mode_refresh_age: default_mode_refresh_age(),
            tick_interval: default_tick_interval(),
        }
    }
}

/// Load configuration from a JSON file
pub fn load_config(path: &PathBuf) -> std::result::Result<Config, Box<dyn std::error::Error>> {
    let content = std::fs::read_to_string(path)?;
    let config: Config = serde_json::from_str(&content)?;
    Ok(config)
}
