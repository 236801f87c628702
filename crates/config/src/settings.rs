//! Main settings module

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};

use crate::constants::{audio, endpoints, generation, models};
use crate::{ConfigError, ConversationConfig, PhraseTables};

/// Runtime environment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeEnvironment {
    #[default]
    Development,
    Staging,
    Production,
}

impl RuntimeEnvironment {
    pub fn is_production(&self) -> bool {
        matches!(self, Self::Production)
    }
}

/// Main application settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub environment: RuntimeEnvironment,

    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Upstream conversational agent
    #[serde(default)]
    pub agent: AgentConfig,

    /// Stream buffer, extraction and approval tables
    #[serde(default)]
    pub conversation: ConversationConfig,

    /// Generation sessions and backend
    #[serde(default)]
    pub generation: GenerationConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,
}

impl Settings {
    /// Validate settings
    ///
    /// A missing agent API key is a startup failure; everything else is a
    /// range check on tunables.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.validate_server()?;
        self.agent.validate()?;
        self.conversation.validate()?;
        self.generation.validate()?;
        Ok(())
    }

    fn validate_server(&self) -> Result<(), ConfigError> {
        if self.server.port == 0 {
            return Err(ConfigError::InvalidValue {
                field: "server.port".to_string(),
                message: "Port must be non-zero".to_string(),
            });
        }
        if self.environment.is_production() && !self.server.cors_enabled {
            tracing::warn!("CORS disabled in production environment");
        }
        Ok(())
    }

    /// Apply the standalone phrases file, if one is configured
    pub fn load_phrase_tables(&mut self) -> Result<(), ConfigError> {
        if let Some(path) = self.conversation.phrases_path.clone() {
            let tables = PhraseTables::load(&path)?;
            self.conversation.apply_phrases(tables);
            tracing::info!(path = %path, "Loaded conversation phrase tables");
        }
        Ok(())
    }
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub cors_enabled: bool,

    #[serde(default)]
    pub cors_origins: Vec<String>,
}

fn default_host() -> String {
    "0.0.0.0".to_string()
}

fn default_port() -> u16 {
    8080
}

fn default_true() -> bool {
    true
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_enabled: true,
            cors_origins: Vec::new(),
        }
    }
}

/// Upstream conversational agent configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// WebSocket endpoint
    #[serde(default = "default_agent_url")]
    pub url: String,

    /// API key (set via SPECFLOW__AGENT__API_KEY)
    #[serde(default)]
    pub api_key: Option<String>,

    #[serde(default)]
    pub audio: AudioConfig,

    #[serde(default = "default_listen_provider")]
    pub listen_provider: String,

    #[serde(default = "default_listen_model")]
    pub listen_model: String,

    #[serde(default = "default_think_provider")]
    pub think_provider: String,

    #[serde(default = "default_think_model")]
    pub think_model: String,

    #[serde(default = "default_speak_provider")]
    pub speak_provider: String,

    #[serde(default = "default_speak_model")]
    pub speak_model: String,

    /// System instruction sent in the handshake
    #[serde(default = "default_instructions")]
    pub instructions: String,

    /// First thing the agent says
    #[serde(default = "default_greeting")]
    pub greeting: String,

    /// KeepAlive cadence while the conversation is silent
    #[serde(default = "default_keep_alive_secs")]
    pub keep_alive_secs: u64,

    /// Upper bound on connect + handshake
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

fn default_agent_url() -> String {
    endpoints::AGENT_DEFAULT.to_string()
}

fn default_listen_provider() -> String {
    models::LISTEN_PROVIDER.to_string()
}

fn default_listen_model() -> String {
    models::LISTEN_MODEL.to_string()
}

fn default_think_provider() -> String {
    models::THINK_PROVIDER.to_string()
}

fn default_think_model() -> String {
    models::THINK_MODEL.to_string()
}

fn default_speak_provider() -> String {
    models::SPEAK_PROVIDER.to_string()
}

fn default_speak_model() -> String {
    models::SPEAK_MODEL.to_string()
}

fn default_instructions() -> String {
    crate::constants::DEFAULT_INSTRUCTIONS.to_string()
}

fn default_greeting() -> String {
    crate::constants::DEFAULT_GREETING.to_string()
}

fn default_keep_alive_secs() -> u64 {
    5
}

fn default_connect_timeout_secs() -> u64 {
    10
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            url: default_agent_url(),
            api_key: None,
            audio: AudioConfig::default(),
            listen_provider: default_listen_provider(),
            listen_model: default_listen_model(),
            think_provider: default_think_provider(),
            think_model: default_think_model(),
            speak_provider: default_speak_provider(),
            speak_model: default_speak_model(),
            instructions: default_instructions(),
            greeting: default_greeting(),
            keep_alive_secs: default_keep_alive_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl AgentConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        match self.api_key.as_deref() {
            Some(key) if !key.trim().is_empty() => {},
            _ => return Err(ConfigError::MissingField("agent.api_key".to_string())),
        }
        if !(self.url.starts_with("ws://") || self.url.starts_with("wss://")) {
            return Err(ConfigError::InvalidValue {
                field: "agent.url".to_string(),
                message: format!("Expected a ws:// or wss:// URL, got {}", self.url),
            });
        }
        if self.keep_alive_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "agent.keep_alive_secs".to_string(),
                message: "Must be at least 1".to_string(),
            });
        }
        Ok(())
    }
}

/// Audio codec parameters for the handshake
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AudioConfig {
    #[serde(default = "default_input_encoding")]
    pub input_encoding: String,
    #[serde(default = "default_input_sample_rate")]
    pub input_sample_rate: u32,
    #[serde(default = "default_output_encoding")]
    pub output_encoding: String,
    #[serde(default = "default_output_sample_rate")]
    pub output_sample_rate: u32,
}

fn default_input_encoding() -> String {
    audio::INPUT_ENCODING.to_string()
}

fn default_input_sample_rate() -> u32 {
    audio::INPUT_SAMPLE_RATE
}

fn default_output_encoding() -> String {
    audio::OUTPUT_ENCODING.to_string()
}

fn default_output_sample_rate() -> u32 {
    audio::OUTPUT_SAMPLE_RATE
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            input_encoding: default_input_encoding(),
            input_sample_rate: default_input_sample_rate(),
            output_encoding: default_output_encoding(),
            output_sample_rate: default_output_sample_rate(),
        }
    }
}

/// Generation session configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationConfig {
    /// Generation backend base URL
    #[serde(default = "default_backend_url")]
    pub backend_url: String,

    /// Root directory; each session owns `<workspace_root>/<session_id>`
    #[serde(default = "default_workspace_root")]
    pub workspace_root: String,

    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    #[serde(default = "default_stale_after_secs")]
    pub stale_after_secs: u64,

    #[serde(default = "default_sweep_interval_secs")]
    pub sweep_interval_secs: u64,
}

fn default_backend_url() -> String {
    endpoints::GENERATION_BACKEND_DEFAULT.to_string()
}

fn default_workspace_root() -> String {
    "generated".to_string()
}

fn default_timeout_secs() -> u64 {
    generation::TIMEOUT_SECS
}

fn default_stale_after_secs() -> u64 {
    generation::STALE_AFTER_SECS
}

fn default_sweep_interval_secs() -> u64 {
    generation::SWEEP_INTERVAL_SECS
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            backend_url: default_backend_url(),
            workspace_root: default_workspace_root(),
            timeout_secs: default_timeout_secs(),
            stale_after_secs: default_stale_after_secs(),
            sweep_interval_secs: default_sweep_interval_secs(),
        }
    }
}

impl GenerationConfig {
    fn validate(&self) -> Result<(), ConfigError> {
        for (field, value) in [
            ("generation.timeout_secs", self.timeout_secs),
            ("generation.stale_after_secs", self.stale_after_secs),
            ("generation.sweep_interval_secs", self.sweep_interval_secs),
        ] {
            if value == 0 {
                return Err(ConfigError::InvalidValue {
                    field: field.to_string(),
                    message: "Must be at least 1 second".to_string(),
                });
            }
        }
        if self.workspace_root.trim().is_empty() {
            return Err(ConfigError::MissingField("generation.workspace_root".to_string()));
        }
        Ok(())
    }
}

/// Observability configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default = "default_log_level")]
    pub log_level: String,

    #[serde(default)]
    pub log_json: bool,

    #[serde(default = "default_true")]
    pub metrics_enabled: bool,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_json: false,
            metrics_enabled: true,
        }
    }
}

/// Load settings from files and environment
///
/// Priority: env vars > config/{env} > config/default > defaults
pub fn load_settings(env: Option<&str>) -> Result<Settings, ConfigError> {
    let mut builder = Config::builder();

    builder = builder.add_source(File::with_name("config/default").required(false));

    if let Some(env_name) = env {
        builder =
            builder.add_source(File::with_name(&format!("config/{}", env_name)).required(false));
    }

    builder = builder.add_source(
        Environment::with_prefix("SPECFLOW")
            .separator("__")
            .try_parsing(true),
    );

    let config = builder.build()?;
    let mut settings: Settings = config.try_deserialize()?;

    settings.load_phrase_tables()?;
    settings.validate()?;

    Ok(settings)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid() -> Settings {
        let mut settings = Settings::default();
        settings.agent.api_key = Some("test-key".to_string());
        settings
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.server.port, 8080);
        assert_eq!(settings.agent.audio.input_sample_rate, 16_000);
        assert_eq!(settings.generation.stale_after_secs, 1800);
    }

    #[test]
    fn test_missing_api_key_is_fatal() {
        let settings = Settings::default();
        let err = settings.validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(ref f) if f == "agent.api_key"));

        let mut settings = valid();
        settings.agent.api_key = Some("   ".to_string());
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_valid_settings_pass() {
        assert!(valid().validate().is_ok());
    }

    #[test]
    fn test_agent_url_scheme() {
        let mut settings = valid();
        settings.agent.url = "https://agent.example.com".to_string();
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_generation_timings_non_zero() {
        let mut settings = valid();
        settings.generation.sweep_interval_secs = 0;
        assert!(settings.validate().is_err());
    }

    #[test]
    fn test_settings_deserialize_partial_yaml() {
        let yaml = "server:\n  port: 9000\nagent:\n  api_key: abc\n";
        let settings: Settings = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(settings.server.port, 9000);
        assert_eq!(settings.agent.api_key.as_deref(), Some("abc"));
        assert_eq!(settings.conversation.required_keys.len(), 7);
        assert!(settings.validate().is_ok());
    }
}
