use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

/// Runtime tuning for the coordinator, read from `~/.config/deckpilot/config.json`.
///
/// Show data (recorders, takes, link settings) lives in the state document, not here.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Explicit state document location. `DECKPILOT_STATE` wins over this.
    #[serde(default)]
    pub state_path: Option<PathBuf>,

    #[serde(default = "default_device_port")]
    pub device_port: u16,

    #[serde(default = "default_status_interval")]
    pub status_interval_secs: u64,

    #[serde(default = "default_announce_interval")]
    pub announce_interval_secs: u64,

    #[serde(default = "default_announce_delay")]
    pub announce_delay_ms: u64,

    #[serde(default = "default_control_timeout")]
    pub control_timeout_ms: u64,

    #[serde(default = "default_list_timeout")]
    pub list_timeout_ms: u64,
}

fn default_device_port() -> u16 {
    9993
}

fn default_status_interval() -> u64 {
    5
}

fn default_announce_interval() -> u64 {
    10
}

fn default_announce_delay() -> u64 {
    2000
}

fn default_control_timeout() -> u64 {
    3000
}

fn default_list_timeout() -> u64 {
    5000
}

impl Default for Config {
    fn default() -> Self {
        Self {
            state_path: None,
            device_port: default_device_port(),
            status_interval_secs: default_status_interval(),
            announce_interval_secs: default_announce_interval(),
            announce_delay_ms: default_announce_delay(),
            control_timeout_ms: default_control_timeout(),
            list_timeout_ms: default_list_timeout(),
        }
    }
}

impl Config {
    /// Load configuration from the default location (~/.config/deckpilot/config.json)
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path()?;

        if !config_path.exists() {
            tracing::info!(
                "Config file not found at {:?}, creating default config",
                config_path
            );
            let config = Self::default();
            config.save()?;
            return Ok(config);
        }

        let contents = std::fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {:?}", config_path))?;

        let config: Self = serde_json::from_str(&contents)
            .with_context(|| format!("Failed to parse config file: {:?}", config_path))?;

        tracing::info!("Loaded config from {:?}", config_path);
        Ok(config)
    }

    /// Save configuration to the default location
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path()?;

        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create config directory: {:?}", parent))?;
        }

        let contents = serde_json::to_string_pretty(self).context("Failed to serialize config")?;

        std::fs::write(&config_path, contents)
            .with_context(|| format!("Failed to write config file: {:?}", config_path))?;

        tracing::info!("Saved config to {:?}", config_path);
        Ok(())
    }

    fn config_dir() -> Result<PathBuf> {
        let base = if let Ok(dir) = std::env::var("XDG_CONFIG_HOME") {
            PathBuf::from(dir)
        } else {
            let home = std::env::var("HOME").context("HOME environment variable not set")?;
            PathBuf::from(home).join(".config")
        };

        Ok(base.join("deckpilot"))
    }

    fn config_path() -> Result<PathBuf> {
        Ok(Self::config_dir()?.join("config.json"))
    }

    /// Resolve where the show state document is read from and written to
    pub fn state_path(&self) -> Result<PathBuf> {
        if let Some(path) = std::env::var_os("DECKPILOT_STATE") {
            return Ok(PathBuf::from(path));
        }
        if let Some(path) = &self.state_path {
            return Ok(path.clone());
        }
        Ok(Self::config_dir()?.join("state.json"))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs)
    }

    pub fn announce_interval(&self) -> Duration {
        Duration::from_secs(self.announce_interval_secs)
    }

    pub fn announce_delay(&self) -> Duration {
        Duration::from_millis(self.announce_delay_ms)
    }

    pub fn control_timeout(&self) -> Duration {
        Duration::from_millis(self.control_timeout_ms)
    }

    pub fn list_timeout(&self) -> Duration {
        Duration::from_millis(self.list_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.device_port == 0 {
            return Err(anyhow::anyhow!("device_port cannot be 0"));
        }

        if self.status_interval_secs == 0 {
            return Err(anyhow::anyhow!("status_interval_secs must be at least 1"));
        }

        if self.announce_interval_secs == 0 {
            return Err(anyhow::anyhow!("announce_interval_secs must be at least 1"));
        }

        if self.control_timeout_ms == 0 || self.list_timeout_ms == 0 {
            return Err(anyhow::anyhow!("device timeouts must be non-zero"));
        }

        Ok(())
    }
}

/// Show-control link settings. Persisted inside the state document as `oscSettings`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySettings {
    /// Outbound broadcasts are suppressed while false.
    #[serde(default = "default_true")]
    pub enabled: bool,

    #[serde(default = "default_send_host")]
    pub send_host: String,

    #[serde(default = "default_send_port", rename = "companionPort")]
    pub send_port: u16,

    #[serde(default = "default_listener_host")]
    pub listener_host: String,

    #[serde(default = "default_listener_port")]
    pub listener_port: u16,

    #[serde(default = "default_true")]
    pub listener_enabled: bool,

    #[serde(default = "default_address_prefix")]
    pub address_prefix: String,
}

fn default_true() -> bool {
    true
}

fn default_send_host() -> String {
    "127.0.0.1".to_string()
}

fn default_send_port() -> u16 {
    8014
}

fn default_listener_host() -> String {
    "0.0.0.0".to_string()
}

fn default_listener_port() -> u16 {
    8012
}

fn default_address_prefix() -> String {
    "/deckpilot/".to_string()
}

impl Default for GatewaySettings {
    fn default() -> Self {
        Self {
            enabled: true,
            send_host: default_send_host(),
            send_port: default_send_port(),
            listener_host: default_listener_host(),
            listener_port: default_listener_port(),
            listener_enabled: true,
            address_prefix: default_address_prefix(),
        }
    }
}

impl GatewaySettings {
    pub fn validate(&self) -> Result<(), String> {
        if !self.address_prefix.starts_with('/') || !self.address_prefix.ends_with('/') {
            return Err(format!(
                "address prefix must start and end with '/': {}",
                self.address_prefix
            ));
        }
        if self.send_host.is_empty() {
            return Err("send host cannot be empty".to_string());
        }
        if self.send_port == 0 {
            return Err("send port cannot be 0".to_string());
        }
        if self.listener_enabled && self.listener_host.is_empty() {
            return Err("listener host cannot be empty".to_string());
        }
        Ok(())
    }
}

/// Remote monitoring hub settings. Persisted inside the state document as `cmndSettings`.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct HubSettings {
    #[serde(default)]
    pub enabled: bool,

    #[serde(default = "default_hub_url")]
    pub hub_url: String,

    /// Generated once and kept for the lifetime of the state document.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub node_id: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub show_id: Option<String>,

    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

fn default_hub_url() -> String {
    "ws://localhost:5000/ws".to_string()
}

impl Default for HubSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            hub_url: default_hub_url(),
            node_id: None,
            show_id: None,
            metadata: serde_json::Map::new(),
        }
    }
}

impl HubSettings {
    pub fn validate(&self) -> Result<(), String> {
        if !(self.hub_url.starts_with("ws://") || self.hub_url.starts_with("wss://")) {
            return Err(format!("hub url must be a ws:// or wss:// url: {}", self.hub_url));
        }
        Ok(())
    }

    /// Assign a node id if none was persisted yet. Returns true when one was generated.
    pub fn ensure_node_id(&mut self) -> bool {
        if self.node_id.as_deref().is_some_and(|id| !id.is_empty()) {
            return false;
        }
        self.node_id = Some(uuid::Uuid::new_v4().to_string());
        true
    }
}
