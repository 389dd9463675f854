use serde::Deserialize;
use serde::Serialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

#[derive(Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u32,
    /// Page the coin table lives on.
    pub target_url: String,
    /// WebSocket endpoint of the remote browser (CDP).
    pub browser_ws: String,
    /// Where to mirror the latest snapshot on disk. No mirror when unset.
    #[serde(default)]
    pub data_file: Option<String>,
    /// Where to dump a diagnostic screenshot when an extraction fails.
    #[serde(default)]
    pub screenshot_file: Option<String>,
    #[serde(default = "default_refresh_interval_sec")]
    pub refresh_interval_sec: u64,
    #[serde(default = "default_error_cooldown_sec")]
    pub error_cooldown_sec: u64,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_retry_delay_sec")]
    pub retry_delay_sec: u64,
    #[serde(default = "default_connect_timeout_sec")]
    pub connect_timeout_sec: u64,
    #[serde(default = "default_navigation_timeout_sec")]
    pub navigation_timeout_sec: u64,
    #[serde(default = "default_selector_timeout_sec")]
    pub selector_timeout_sec: u64,
}

fn default_refresh_interval_sec() -> u64 {
    180
}

fn default_error_cooldown_sec() -> u64 {
    60
}

fn default_max_retries() -> u32 {
    3
}

fn default_retry_delay_sec() -> u64 {
    10
}

fn default_connect_timeout_sec() -> u64 {
    30
}

fn default_navigation_timeout_sec() -> u64 {
    120
}

fn default_selector_timeout_sec() -> u64 {
    60
}

impl Config {
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let toml_str = fs::read_to_string(path)?;
        let config = toml::from_str(&toml_str)?;

        Ok(config)
    }

    pub fn refresh_interval(&self) -> Duration {
        Duration::from_secs(self.refresh_interval_sec)
    }

    pub fn error_cooldown(&self) -> Duration {
        Duration::from_secs(self.error_cooldown_sec)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_secs(self.retry_delay_sec)
    }
}
