//! Application configuration loading from config.toml
//!
//! The file is optional: every field has a default, and the `DATABASE_URL`
//! and `BIND_ADDRESS` environment variables (usually set through `.env`)
//! override whatever the file says.

use crate::config::database::DEFAULT_DATABASE_URL;
use crate::errors::{Error, Result};
use serde::Deserialize;
use std::path::Path;

/// Environment variable naming an alternative config file.
pub const CONFIG_PATH_VAR: &str = "SCHOOL_OFFICE_CONFIG";

/// Configuration structure representing the entire config.toml file
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AppConfig {
    /// HTTP listener settings
    #[serde(default)]
    pub server: ServerConfig,
    /// Storage settings
    #[serde(default)]
    pub database: DatabaseConfig,
}

/// `[server]` table
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Socket address the API listens on
    #[serde(default = "default_bind_address")]
    pub bind_address: String,
}

/// `[database]` table
#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    /// `SeaORM` connection URL
    #[serde(default = "default_database_url")]
    pub url: String,
}

fn default_bind_address() -> String {
    "127.0.0.1:8080".to_string()
}

fn default_database_url() -> String {
    DEFAULT_DATABASE_URL.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: default_bind_address(),
        }
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: default_database_url(),
        }
    }
}

impl AppConfig {
    /// Replaces file values with any environment-provided ones.
    #[must_use]
    pub fn with_overrides(mut self, database_url: Option<String>, bind_address: Option<String>) -> Self {
        if let Some(url) = database_url.filter(|u| !u.trim().is_empty()) {
            self.database.url = url;
        }
        if let Some(addr) = bind_address.filter(|a| !a.trim().is_empty()) {
            self.server.bind_address = addr;
        }
        self
    }
}

/// Loads configuration from a TOML file
///
/// # Errors
/// Returns an error if:
/// - The file cannot be read
/// - The TOML syntax is invalid
pub fn load_config<P: AsRef<Path>>(path: P) -> Result<AppConfig> {
    let contents = std::fs::read_to_string(path.as_ref()).map_err(|e| Error::Config {
        message: format!("Failed to read config file {}: {e}", path.as_ref().display()),
    })?;

    toml::from_str(&contents).map_err(|e| Error::Config {
        message: format!("Failed to parse config.toml: {e}"),
    })
}

/// Loads the application configuration the way the binary does.
///
/// Reads `$SCHOOL_OFFICE_CONFIG` (default `./config.toml`), falls back to the
/// built-in defaults when that file does not exist, then applies the
/// `DATABASE_URL` / `BIND_ADDRESS` overrides.
pub fn load_app_configuration() -> Result<AppConfig> {
    let path = std::env::var(CONFIG_PATH_VAR).unwrap_or_else(|_| "config.toml".to_string());

    let config = if Path::new(&path).exists() {
        tracing::debug!("Loading configuration from: {}", path);
        load_config(&path)?
    } else {
        tracing::info!("No config file at {}, using defaults", path);
        AppConfig::default()
    };

    Ok(config.with_overrides(
        std::env::var("DATABASE_URL").ok(),
        std::env::var("BIND_ADDRESS").ok(),
    ))
}
