use std::path::Path;

use serde::{Deserialize, Serialize};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub bridge: BridgeConfig,
    pub discord: DiscordConfig,
    pub roomy: RoomyConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub limits: LimitsConfig,
    #[serde(default)]
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BridgeConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    #[serde(default = "default_roomy_profile_lru_size")]
    pub roomy_profile_lru_size: usize,
    #[serde(default = "default_queue_depth_warning")]
    pub queue_depth_warning: usize,
    #[serde(default = "default_call_timeout_secs")]
    pub call_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DiscordConfig {
    pub token: String,
    #[serde(default)]
    pub use_privileged_intents: bool,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RoomyConfig {
    pub bridge_did: String,
    pub app_password: String,
    #[serde(default = "default_leaf_url")]
    pub leaf_url: String,
    #[serde(default = "default_stream_nsid")]
    pub stream_nsid: String,
    #[serde(default = "default_stream_handle_nsid")]
    pub stream_handle_nsid: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LimitsConfig {
    #[serde(default = "default_discord_send_delay")]
    pub discord_send_delay_ms: u64,
}

impl Default for LimitsConfig {
    fn default() -> Self {
        Self {
            discord_send_delay_ms: default_discord_send_delay(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, Default)]
pub struct MetricsConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_metrics_port")]
    pub port: u16,
}

impl Config {
    pub fn load() -> Result<Self, ConfigError> {
        let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.yaml".to_string());
        Self::load_from_file(&config_path)
    }

    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let mut config: Config = serde_yaml::from_str(&content)?;
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(value) = std::env::var("DISCORD_TOKEN") {
            self.discord.token = value;
        }
        if let Ok(value) = std::env::var("PORT") {
            if let Ok(port) = value.parse() {
                self.bridge.port = port;
            }
        }
        if let Ok(value) = std::env::var("ATPROTO_BRIDGE_DID") {
            self.roomy.bridge_did = value;
        }
        if let Ok(value) = std::env::var("ATPROTO_BRIDGE_APP_PASSWORD") {
            self.roomy.app_password = value;
        }
        if let Ok(value) = std::env::var("LEAF_URL") {
            self.roomy.leaf_url = value;
        }
        if let Ok(value) = std::env::var("STREAM_NSID") {
            self.roomy.stream_nsid = value;
        }
        if let Ok(value) = std::env::var("STREAM_HANDLE_NSID") {
            self.roomy.stream_handle_nsid = value;
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.discord.token.is_empty() {
            return Err(ConfigError::Invalid("discord.token cannot be empty".to_string()));
        }
        if self.roomy.bridge_did.is_empty() {
            return Err(ConfigError::Invalid("roomy.bridge_did cannot be empty".to_string()));
        }
        if self.roomy.app_password.is_empty() {
            return Err(ConfigError::Invalid(
                "roomy.app_password cannot be empty".to_string(),
            ));
        }
        if self.bridge.port == 0 {
            return Err(ConfigError::Invalid(
                "bridge.port must be between 1 and 65535".to_string(),
            ));
        }
        if self.bridge.batch_size == 0 {
            return Err(ConfigError::Invalid(
                "bridge.batch_size must be at least 1".to_string(),
            ));
        }
        Ok(())
    }
}

fn default_port() -> u16 {
    3301
}

fn default_bind_address() -> String {
    "0.0.0.0".to_string()
}

fn default_data_dir() -> String {
    "./data".to_string()
}

fn default_batch_size() -> usize {
    100
}

fn default_roomy_profile_lru_size() -> usize {
    50
}

fn default_queue_depth_warning() -> usize {
    10_000
}

fn default_call_timeout_secs() -> u64 {
    30
}

fn default_leaf_url() -> String {
    "https://leaf.dev.roomy.chat".to_string()
}

fn default_stream_nsid() -> String {
    "space.roomy.stream".to_string()
}

fn default_stream_handle_nsid() -> String {
    "space.roomy.stream.handle".to_string()
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "pretty".to_string()
}

fn default_discord_send_delay() -> u64 {
    250
}

fn default_metrics_port() -> u16 {
    9001
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_yaml() -> &'static str {
        r#"
bridge:
  port: 3301
discord:
  token: "abc123"
roomy:
  bridge_did: "did:plc:bridge"
  app_password: "secret"
"#
    }

    #[test]
    fn load_from_file_applies_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");
        std::fs::write(&path, sample_yaml()).unwrap();

        let config = Config::load_from_file(&path).unwrap();
        assert_eq!(config.bridge.batch_size, 100);
        assert_eq!(config.bridge.roomy_profile_lru_size, 50);
        assert_eq!(config.roomy.leaf_url, default_leaf_url());
    }

    #[test]
    fn validate_rejects_empty_token() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.discord.token = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn validate_rejects_zero_port() {
        let mut config: Config = serde_yaml::from_str(sample_yaml()).unwrap();
        config.bridge.port = 0;
        assert!(config.validate().is_err());
    }
}
