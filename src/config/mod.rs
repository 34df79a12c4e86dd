//! Configuration module - environment variable parsing and game rules

mod game;

pub use game::{EnemyBehavior, EnemyTypeDescriptor, GameConfig, PlayBounds};

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,
    /// Allowed client origins for CORS (comma-separated, `*` for any)
    pub client_origin: String,

    /// HMAC secret for connection tokens. Anonymous connections when unset.
    pub session_secret: Option<String>,

    /// Base URL of the external highscore REST backend
    pub highscore_url: Option<String>,
    /// API key sent to the highscore backend
    pub highscore_api_key: Option<String>,

    /// Optional JSON file overriding the default game rules
    pub game_config_path: Option<PathBuf>,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = if let Ok(port) = env::var("PORT") {
            format!("0.0.0.0:{}", port)
        } else {
            env::var("SERVER_ADDR").unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        };

        let highscore_url = optional_var("HIGHSCORE_URL");
        let highscore_api_key = optional_var("HIGHSCORE_API_KEY");
        if highscore_url.is_some() && highscore_api_key.is_none() {
            return Err(ConfigError::Missing("HIGHSCORE_API_KEY"));
        }

        Ok(Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            client_origin: env::var("CLIENT_ORIGIN").unwrap_or_else(|_| "*".to_string()),

            session_secret: optional_var("SESSION_SECRET"),

            highscore_url,
            highscore_api_key,

            game_config_path: optional_var("GAME_CONFIG_PATH").map(PathBuf::from),
        })
    }

    /// Load the game rules, from file if configured, and validate them
    pub fn load_game_config(&self) -> Result<GameConfig, ConfigError> {
        let rules = match &self.game_config_path {
            Some(path) => GameConfig::from_file(path)?,
            None => GameConfig::default(),
        };
        rules.validate()?;
        Ok(rules)
    }
}

fn optional_var(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,

    #[error("Failed to read game config {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse game config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Enemy type table is empty")]
    NoEnemyTypes,

    #[error("Enemy type '{0}' has a zero spawn weight")]
    ZeroSpawnWeight(String),

    #[error("No enemy spawn points configured")]
    NoSpawnPoints,

    #[error("Invalid value for {field}: {reason}")]
    Invalid {
        field: &'static str,
        reason: &'static str,
    },
}
