/// Database connection and table creation
pub mod database;

/// Application settings loaded from config.toml and the environment
pub mod app;

pub use app::{AppConfig, load_app_configuration};
