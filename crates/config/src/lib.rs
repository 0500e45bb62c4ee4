//! Configuration for the call pipeline
//!
//! Supports loading configuration from:
//! - TOML/YAML files (optional, `config/default` then `config/{env}`)
//! - Environment variables (CALLPIPE_ prefix, `__` separator)
//!
//! Defaults are tuned for narrowband telephony audio and live without
//! any config file at all.

pub mod constants;
pub mod settings;

pub use settings::{
    load_settings, PipelineSettings, RuntimeEnvironment, SessionSettings, Settings, VadSettings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
