use serde::Deserialize;
use config::{Config, ConfigError, Environment, File};

use crate::domain::StreamType;

#[derive(Debug, Deserialize, Clone)]
pub struct Settings {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub backend: BackendConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

/// Local SQLite file holding per-device notification read-state.
#[derive(Debug, Deserialize, Clone)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

#[derive(Debug, Deserialize, Clone)]
pub struct BackendConfig {
    pub base_url: String,
    pub timeout_secs: u64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct NotificationConfig {
    #[serde(default = "default_streams")]
    pub streams: Vec<StreamType>,
}

fn default_streams() -> Vec<StreamType> {
    StreamType::ALL.to_vec()
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            streams: default_streams(),
        }
    }
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        let config = Config::builder()
            .set_default("server.host", "127.0.0.1")?
            .set_default("server.port", 8080)?
            .set_default("database.url", "sqlite://practicum.db?mode=rwc")?
            .set_default("database.max_connections", 5)?
            .set_default("backend.base_url", "http://localhost:3000/api")?
            .set_default("backend.timeout_secs", 15)?

            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))

            // PRACTICUM__BACKEND__BASE_URL etc.
            .add_source(Environment::with_prefix("PRACTICUM").separator("__"))

            .build()?;

        config.try_deserialize()
    }
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
            database: DatabaseConfig {
                url: "sqlite://practicum.db?mode=rwc".to_string(),
                max_connections: 5,
            },
            backend: BackendConfig {
                base_url: "http://localhost:3000/api".to_string(),
                timeout_secs: 15,
            },
            notifications: NotificationConfig::default(),
        }
    }
}
