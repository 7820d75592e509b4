use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::Result;
use crate::paths::Paths;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HubConfig {
    #[serde(default = "default_hub_host")]
    pub host: String,
    #[serde(default = "default_hub_port")]
    pub port: u16,
    /// Bearer token required on the HTTP surface and the control channel.
    /// Empty disables auth (loopback development only).
    #[serde(default)]
    pub api_token: String,
    #[serde(default = "default_dispatch_timeout_secs")]
    pub dispatch_timeout_secs: u64,
}

fn default_hub_host() -> String {
    "127.0.0.1".to_string()
}

fn default_hub_port() -> u16 {
    8799
}

fn default_dispatch_timeout_secs() -> u64 {
    15
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            host: default_hub_host(),
            port: default_hub_port(),
            api_token: String::new(),
            dispatch_timeout_secs: default_dispatch_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfig {
    #[serde(default = "default_channel_url")]
    pub url: String,
    /// Bearer token presented on the channel upgrade when the hub has
    /// auth enabled.
    #[serde(default)]
    pub token: String,
    #[serde(default = "default_client_id")]
    pub client_id: String,
    #[serde(default = "default_ping_interval_secs")]
    pub ping_interval_secs: u64,
    /// A missing pong for this many ping intervals force-closes the
    /// connection (half-open connections are treated as failed).
    #[serde(default = "default_pong_timeout_intervals")]
    pub pong_timeout_intervals: u32,
    #[serde(default = "default_reconnect_cap_secs")]
    pub reconnect_cap_secs: u64,
    #[serde(default = "default_hello_timeout_secs")]
    pub hello_timeout_secs: u64,
}

fn default_channel_url() -> String {
    "ws://127.0.0.1:8799/channel".to_string()
}

fn default_client_id() -> String {
    "desktop-default".to_string()
}

fn default_ping_interval_secs() -> u64 {
    15
}

fn default_pong_timeout_intervals() -> u32 {
    2
}

fn default_reconnect_cap_secs() -> u64 {
    30
}

fn default_hello_timeout_secs() -> u64 {
    10
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            url: default_channel_url(),
            token: String::new(),
            client_id: default_client_id(),
            ping_interval_secs: default_ping_interval_secs(),
            pong_timeout_intervals: default_pong_timeout_intervals(),
            reconnect_cap_secs: default_reconnect_cap_secs(),
            hello_timeout_secs: default_hello_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Remote-debugging endpoint of the embedded engine inside the desktop
    /// host. Advertised to the hub in the handshake capabilities.
    #[serde(default = "default_debug_host")]
    pub debug_host: String,
    #[serde(default = "default_debug_port")]
    pub debug_port: u16,
}

fn default_debug_host() -> String {
    "127.0.0.1".to_string()
}

fn default_debug_port() -> u16 {
    9222
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            debug_host: default_debug_host(),
            debug_port: default_debug_port(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AutomationConfig {
    #[serde(default = "default_command_timeout_secs")]
    pub command_timeout_secs: u64,
    /// Bounded window for finding the page matching a debug target id.
    #[serde(default = "default_page_pick_timeout_ms")]
    pub page_pick_timeout_ms: u64,
    #[serde(default = "default_page_pick_poll_ms")]
    pub page_pick_poll_ms: u64,
    #[serde(default = "default_network_capacity")]
    pub network_capacity: usize,
    #[serde(default = "default_console_capacity")]
    pub console_capacity: usize,
    /// Character budget for free-form text returned to the agent.
    #[serde(default = "default_text_budget")]
    pub text_budget: usize,
    #[serde(default = "default_snapshot_budget")]
    pub snapshot_budget: usize,
    #[serde(default = "default_status_debounce_ms")]
    pub status_debounce_ms: u64,
}

fn default_command_timeout_secs() -> u64 {
    30
}

fn default_page_pick_timeout_ms() -> u64 {
    5000
}

fn default_page_pick_poll_ms() -> u64 {
    250
}

fn default_network_capacity() -> usize {
    512
}

fn default_console_capacity() -> usize {
    256
}

fn default_text_budget() -> usize {
    8000
}

fn default_snapshot_budget() -> usize {
    40000
}

fn default_status_debounce_ms() -> u64 {
    250
}

impl Default for AutomationConfig {
    fn default() -> Self {
        Self {
            command_timeout_secs: default_command_timeout_secs(),
            page_pick_timeout_ms: default_page_pick_timeout_ms(),
            page_pick_poll_ms: default_page_pick_poll_ms(),
            network_capacity: default_network_capacity(),
            console_capacity: default_console_capacity(),
            text_budget: default_text_budget(),
            snapshot_budget: default_snapshot_budget(),
            status_debounce_ms: default_status_debounce_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub engine: EngineConfig,
    #[serde(default)]
    pub automation: AutomationConfig,
}

impl Config {
    /// Load the config file if present, otherwise defaults.
    pub fn load(paths: &Paths) -> Result<Self> {
        Self::load_from(&paths.config_file())
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path)?;
        let config: Config = serde_yaml::from_str(&text)?;
        Ok(config)
    }

    pub fn save(&self, paths: &Paths) -> Result<()> {
        paths.ensure_dirs()?;
        let text = serde_yaml::to_string(self)?;
        std::fs::write(paths.config_file(), text)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = Config::default();
        assert_eq!(config.hub.port, 8799);
        assert!(config.automation.network_capacity > 0);
        assert!(config.channel.pong_timeout_intervals >= 1);
    }

    #[test]
    fn partial_yaml_fills_defaults() {
        let config: Config = serde_yaml::from_str("hub:\n  port: 9000\n").unwrap();
        assert_eq!(config.hub.port, 9000);
        assert_eq!(config.hub.host, "127.0.0.1");
        assert_eq!(config.channel.ping_interval_secs, 15);
    }
}
