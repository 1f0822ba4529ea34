use anyhow::{anyhow, Context, Result};
use std::path::Path;
use tracing::info;

use super::EngineConfig;

/// Broker login material, resolved from the environment. Only the live
/// engine needs these; the backtest runs without them.
#[derive(Debug, Clone)]
pub struct BrokerCredentials {
    pub login: String,
    pub password: String,
    pub server: String,
}

impl BrokerCredentials {
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();

        let login = std::env::var("BROKER_LOGIN")
            .map_err(|_| anyhow!("BROKER_LOGIN not set (check .env)"))?;
        let password = std::env::var("BROKER_PASSWORD")
            .map_err(|_| anyhow!("BROKER_PASSWORD not set (check .env)"))?;
        let server = std::env::var("BROKER_SERVER")
            .map_err(|_| anyhow!("BROKER_SERVER not set (check .env)"))?;

        Ok(Self {
            login,
            password,
            server,
        })
    }
}

/// Load the engine configuration from a TOML file. A missing file falls back
/// to defaults; a present but invalid file is fatal.
pub fn load_config(path: &str) -> Result<EngineConfig> {
    let config = if Path::new(path).exists() {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path))?;
        let config: EngineConfig =
            toml::from_str(&raw).with_context(|| format!("failed to parse {}", path))?;
        info!("Loaded configuration from {}", path);
        config
    } else {
        info!("Config file {} not found, using defaults", path);
        EngineConfig::default()
    };

    config
        .validate()
        .map_err(|errors| anyhow!("invalid configuration: {}", errors.join("; ")))?;

    Ok(config)
}
