pub use self::parser::{
    BridgeConfig, Config, DiscordConfig, LimitsConfig, LoggingConfig, MetricsConfig, RoomyConfig,
};

mod parser;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),
    #[error("failed to parse config file: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}
