use serde::Deserialize;
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::ConfigError;

#[derive(Clone, Debug, Deserialize)]
pub struct Config {
    pub default_network: String,
    pub networks: HashMap<String, NetworkConfig>,
}

impl Config {
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config_str = fs::read_to_string(path)?;
        Ok(toml::from_str::<Self>(&config_str)?)
    }

    pub fn network(&self, name: &str) -> Result<&NetworkConfig, ConfigError> {
        self.networks
            .get(name)
            .ok_or_else(|| ConfigError::UnknownNetwork(name.to_string()))
    }
}

fn default_retry_limit() -> u32 {
    3
}

fn default_retry_delay_ms() -> u64 {
    5000
}

#[derive(Clone, Debug, Deserialize)]
pub struct NetworkConfig {
    pub endpoint: String,
    #[serde(default = "default_retry_limit")]
    pub retry_limit: u32,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64, // in milliseconds
}
