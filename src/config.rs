use crate::error::ConfigError;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;

pub const DEFAULT_CONFIG_PATH: &str = "httpbridge.toml";
pub const CONFIG_PATH_ENV: &str = "HTTPBRIDGE_CONFIG";

fn default_listen_addr() -> SocketAddr {
    SocketAddr::from(([127, 0, 0, 1], 4433))
}

fn default_log_level() -> String {
    "info".to_string()
}

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: SocketAddr,

    /// How long an unconsumed message stays queued. 0 keeps messages forever.
    #[serde(default)]
    pub message_retention_seconds: u64,

    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            listen_addr: default_listen_addr(),
            message_retention_seconds: 0,
            log_level: default_log_level(),
        }
    }
}

impl Config {
    pub fn from_toml_str(s: &str) -> Result<Config, ConfigError> {
        let config: Config = toml::from_str(s)?;
        config.log_filter()?;
        Ok(config)
    }

    pub fn log_filter(&self) -> Result<log::LevelFilter, ConfigError> {
        self.log_level
            .parse()
            .map_err(|_| ConfigError::Invalid(format!("log_level = {:?}", self.log_level)))
    }
}

pub fn get_config(path: &str) -> Result<Config, ConfigError> {
    let config_toml = fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_string(),
        source,
    })?;

    Config::from_toml_str(&config_toml)
}
