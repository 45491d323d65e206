use anyhow::{Context, Result};
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::{net::SocketAddr, path::Path, time::Duration};
use validator::Validate;

use crate::domain::MeterResolution;

pub const DEFAULT_CONFIG_PATH: &str = "config/default.toml";
pub const ENV_PREFIX: &str = "NETZNOE__";

#[derive(Debug, Clone, Deserialize, Validate)]
pub struct Config {
    #[validate(nested)]
    pub portal: PortalConfig,
    #[serde(default)]
    #[validate(nested)]
    pub sync: SyncConfig,
    /// Explicit meter selection; empty means every active meter on the account.
    #[serde(default)]
    pub meters: Vec<MeterConfig>,
    #[serde(default)]
    pub db: DbConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Clone, Deserialize, Validate)]
pub struct PortalConfig {
    #[serde(default = "default_base_url")]
    pub base_url: String,
    #[serde(default = "default_auth_url")]
    pub auth_url: String,
    #[validate(length(min = 1, message = "portal username must be set"))]
    pub username: String,
    #[validate(length(min = 1, message = "portal password must be set"))]
    pub password: String,
    #[serde(default = "default_http_timeout")]
    #[validate(range(min = 1))]
    pub http_timeout_seconds: u64,
}

impl std::fmt::Debug for PortalConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PortalConfig")
            .field("base_url", &self.base_url)
            .field("auth_url", &self.auth_url)
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .field("http_timeout_seconds", &self.http_timeout_seconds)
            .finish()
    }
}

fn default_base_url() -> String {
    crate::portal::constants::BASE_URL.to_string()
}
fn default_auth_url() -> String {
    crate::portal::constants::AUTH_URL.to_string()
}
fn default_http_timeout() -> u64 {
    60
}

#[derive(Debug, Clone, Deserialize, Validate)]
#[serde(default)]
pub struct SyncConfig {
    #[validate(range(min = 1))]
    pub scan_interval_minutes: u64,
    pub min_wait_hours: u64,
    #[validate(range(min = 1))]
    pub initial_history_days: u64,
    pub unit_of_measurement: String,
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            scan_interval_minutes: 60,
            min_wait_hours: 24,
            initial_history_days: 365 * 3,
            unit_of_measurement: "kWh".to_string(),
        }
    }
}

impl SyncConfig {
    pub fn scan_interval(&self) -> Duration {
        Duration::from_secs(self.scan_interval_minutes.max(1) * 60)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct MeterConfig {
    pub id: String,
    #[serde(default)]
    pub resolution: Option<MeterResolution>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DbConfig {
    pub url: String,
    pub max_connections: u32,
}

impl Default for DbConfig {
    fn default() -> Self {
        Self { url: "sqlite://netznoe.db".to_string(), max_connections: 5 }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout_secs: u64,
    pub enable_cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8080,
            request_timeout_secs: 30,
            enable_cors: false,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct AuthConfig {
    /// Bearer token for the HTTP API. Empty disables authentication.
    #[serde(default)]
    pub token: String,
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::load_from(DEFAULT_CONFIG_PATH)
    }

    pub fn load_from(path: impl AsRef<Path>) -> Result<Self> {
        let figment = Figment::new()
            .merge(Toml::file(path.as_ref()))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        let cfg: Config = figment.extract().context("invalid configuration")?;
        cfg.validate().context("configuration validation failed")?;
        Ok(cfg)
    }
}
