//! Configuration management for the specflow server
//!
//! Supports loading configuration from:
//! - YAML/TOML files (`config/default`, `config/{env}`)
//! - Environment variables (`SPECFLOW__` prefix, `__` separator)
//! - A standalone phrase tables file for the conversation heuristics

pub mod constants;
pub mod conversation;
pub mod settings;

pub use conversation::{ConversationConfig, PhraseTables};
pub use settings::{
    load_settings, AgentConfig, AudioConfig, GenerationConfig, ObservabilityConfig,
    RuntimeEnvironment, ServerConfig, Settings,
};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Configuration file not found: {0}")]
    FileNotFound(String),

    #[error("Failed to parse configuration: {0}")]
    ParseError(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {message}")]
    InvalidValue { field: String, message: String },
}

impl From<config::ConfigError> for ConfigError {
    fn from(err: config::ConfigError) -> Self {
        ConfigError::ParseError(err.to_string())
    }
}
