use anyhow::Result;
use figment::{providers::{Env, Format, Toml}, Figment};
use serde::Deserialize;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::hardware::HardwareMode;

/// Service-level settings. The site control configuration lives in its own
/// YAML file, see [`crate::domain::VoltVarConfig`].
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    pub server: ServerConfig,
    pub controller: ControllerConfig,
    pub hardware: HardwareConfig,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout() -> u64 {
    10
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr> {
        Ok(format!("{}:{}", self.host, self.port).parse()?)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ControllerConfig {
    pub tick_ms: u64,
    pub shutdown_grace_ms: u64,
    pub site_config_path: PathBuf,
}

impl ControllerConfig {
    pub fn tick(&self) -> Duration {
        Duration::from_millis(self.tick_ms.max(1))
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_millis(self.shutdown_grace_ms)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct HardwareConfig {
    pub mode: HardwareMode,
    pub measurement_poll_ms: u64,
    /// Snapshots older than this are served with grid_tied = false
    pub measurement_max_age_ms: u64,
    pub pcs_retry_attempts: u32,
    pub pcs_retry_backoff_ms: u64,
    #[serde(default = "default_sim_sigma")]
    pub sim_voltage_sigma_pu: f64,
}

fn default_sim_sigma() -> f64 {
    0.005
}

impl Config {
    pub fn load() -> Result<Self> {
        Self::from_figment(
            Figment::new()
                .merge(Toml::file("config/default.toml"))
                .merge(Env::prefixed("VOLTVAR__").split("__")),
        )
    }

    pub fn from_figment(figment: Figment) -> Result<Self> {
        Ok(figment.extract()?)
    }
}
