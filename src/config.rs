use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;

fn default_db_max_connections() -> u32 {
    10
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_event_buffer() -> usize {
    100
}

/// Application configuration, layered from `config/default.toml`, an
/// environment-specific file, and `APP_*` environment variables.
#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    #[serde(default = "default_db_max_connections")]
    pub db_max_connections: u32,
    pub host: String,
    pub port: u16,
    pub environment: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
    /// Bound of the in-process event channel.
    #[serde(default = "default_event_buffer")]
    pub event_buffer: usize,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        let run_env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        Config::builder()
            .set_default("environment", run_env.clone())?
            .set_default("host", "127.0.0.1")?
            .set_default("port", 8080)?
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_env)).required(false))
            .add_source(Environment::with_prefix("APP").separator("__"))
            .build()?
            .try_deserialize()
    }

    /// Direct constructor, mainly for tests.
    pub fn new(database_url: String, host: String, port: u16, environment: String) -> Self {
        Self {
            database_url,
            db_max_connections: default_db_max_connections(),
            host,
            port,
            environment,
            log_level: default_log_level(),
            event_buffer: default_event_buffer(),
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}
