use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// Origins always accepted during local development
const DEV_ORIGINS: [&str; 4] = [
    "http://localhost:5173",
    "http://localhost:5174",
    "http://127.0.0.1:5173",
    "ws://localhost:5173",
];

/// Application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    /// Server host address
    #[serde(default = "default_host")]
    pub host: String,

    /// Server port
    #[serde(default = "default_port")]
    pub port: u16,

    /// Environment (dev, staging, prod)
    #[serde(default = "default_environment")]
    pub environment: String,

    /// Extra CORS allowed origins, comma separated
    pub allowed_origins: Option<String>,

    /// Log level
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// HS256 secret used to validate bearer tokens
    pub auth_jwt_secret: Option<String>,

    /// Database URL
    pub db_url: Option<String>,

    /// Capacity of each connection's outbound queue
    #[serde(default = "default_outbound_queue_capacity")]
    pub outbound_queue_capacity: usize,

    /// Seconds without activity before a session is reaped
    #[serde(default = "default_session_stale_secs")]
    pub session_stale_secs: u64,

    /// Seconds between two stale-session sweeps
    #[serde(default = "default_session_sweep_interval_secs")]
    pub session_sweep_interval_secs: u64,
}

impl Config {
    /// Load configuration from environment variables or app.env file.
    /// Runs before tracing is installed, so the caller reports the outcome.
    pub fn load() -> Result<Self, ConfigError> {
        // Try to load from app.env file first
        if std::path::Path::new("app.env").exists() {
            dotenvy::from_filename("app.env").ok();
        } else {
            // Fallback to .env file
            dotenvy::dotenv().ok();
        }

        Self::from_vars(std::env::vars())
    }

    /// Build the configuration from `(NAME, value)` pairs using envy
    pub fn from_vars<I>(vars: I) -> Result<Self, ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        Ok(envy::from_iter(vars)?)
    }

    /// Get the full server address
    pub fn server_address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Check if running in development mode
    pub fn is_development(&self) -> bool {
        self.environment.to_lowercase() == "dev" || self.environment.to_lowercase() == "development"
    }

    /// Origins accepted by the CORS layer. Every http(s) origin also gets its
    /// ws(s) counterpart.
    pub fn cors_origins(&self) -> Vec<String> {
        let mut origins: Vec<String> = DEV_ORIGINS.iter().map(|o| o.to_string()).collect();
        let Some(extra) = &self.allowed_origins else {
            return origins;
        };
        for origin in extra.split(',').map(str::trim).filter(|o| !o.is_empty()) {
            origins.push(origin.to_string());
            if let Some(rest) = origin.strip_prefix("http://") {
                origins.push(format!("ws://{}", rest));
            } else if let Some(rest) = origin.strip_prefix("https://") {
                origins.push(format!("wss://{}", rest));
            }
        }
        origins.dedup();
        origins
    }

    pub fn session_stale_after(&self) -> Duration {
        Duration::from_secs(self.session_stale_secs)
    }

    pub fn session_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.session_sweep_interval_secs.max(1))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            environment: default_environment(),
            log_level: default_log_level(),
            allowed_origins: None,
            auth_jwt_secret: None,
            db_url: None,
            outbound_queue_capacity: default_outbound_queue_capacity(),
            session_stale_secs: default_session_stale_secs(),
            session_sweep_interval_secs: default_session_sweep_interval_secs(),
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Environment variable error: {0}")]
    EnvError(#[from] envy::Error),
}

// Default value functions
fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_environment() -> String {
    "development".to_string()
}

fn default_outbound_queue_capacity() -> usize {
    256
}

fn default_session_stale_secs() -> u64 {
    90
}

fn default_session_sweep_interval_secs() -> u64 {
    30
}
