//! Typed configuration from environment variables.
//!
//! Loads once at startup, fails fast if a variable is present but
//! malformed. In local dev, call `dotenvy::dotenv().ok()` before this.

use std::path::PathBuf;

use crate::engine::EngineConfig;
use crate::error::{Error, Result};

#[derive(Debug)]
pub struct Config {
    pub history_limit: usize,
    pub persist: bool,
    pub history_path: PathBuf,
    pub otel_endpoint: Option<String>,
    pub log_level: String,
}

impl Config {
    /// Load configuration from environment variables. Every variable has
    /// a default; a set-but-unparsable value is an error.
    pub fn from_env() -> Result<Self> {
        Ok(Self {
            history_limit: parsed_var("RELAYQ_HISTORY_LIMIT", 100)?,
            persist: parsed_var("RELAYQ_PERSIST", true)?,
            history_path: std::env::var("RELAYQ_HISTORY_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("relayq-history.json")),
            otel_endpoint: std::env::var("OTEL_ENDPOINT").ok(),
            log_level: std::env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
        })
    }

    /// Engine configuration derived from this environment config.
    pub fn engine_config(&self) -> EngineConfig {
        EngineConfig {
            history_limit: self.history_limit,
            persist: self.persist,
            persist_path: self.history_path.clone(),
            ..EngineConfig::default()
        }
    }
}

fn parsed_var<T>(name: &str, default: T) -> Result<T>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(name) {
        Ok(raw) => raw
            .parse()
            .map_err(|e| Error::Config(format!("invalid {name}={raw}: {e}"))),
        Err(_) => Ok(default),
    }
}
