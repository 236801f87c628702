//! Conversation tables
//!
//! Phrase lists and block markers that drive the stream buffer, extraction
//! engine and approval detector. They are data, not code: the defaults come
//! from [`crate::constants`], the settings file may override them, and a
//! standalone phrases file can be loaded with [`PhraseTables::load`].

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::constants;
use crate::ConfigError;

/// Conversation pipeline configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationConfig {
    /// Keys that make a specification complete
    #[serde(default = "default_required_keys")]
    pub required_keys: Vec<String>,

    /// Fence prefixes that open a specification block (case-insensitive)
    #[serde(default = "default_open_markers")]
    pub open_markers: Vec<String>,

    /// Fence that closes a specification block
    #[serde(default = "default_close_marker")]
    pub close_marker: String,

    /// Inserted between fragments while a block accumulates
    #[serde(default)]
    pub fragment_separator: String,

    /// Accumulations longer than this are abandoned
    #[serde(default = "default_max_block_chars")]
    pub max_block_chars: usize,

    /// Phrases classifying a user utterance as approval
    #[serde(default = "default_approval_phrases")]
    pub approval_phrases: Vec<String>,

    /// Phrases that force completion of an open accumulation
    #[serde(default = "default_topic_shift_phrases")]
    pub topic_shift_phrases: Vec<String>,

    /// Message voiced when approval arrives with no specification
    #[serde(default = "default_specification_required_message")]
    pub specification_required_message: String,

    /// Optional YAML file overriding the phrase tables
    #[serde(default)]
    pub phrases_path: Option<String>,
}

fn default_required_keys() -> Vec<String> {
    to_owned(constants::REQUIRED_KEYS)
}

fn default_open_markers() -> Vec<String> {
    to_owned(constants::BLOCK_OPEN_MARKERS)
}

fn default_close_marker() -> String {
    constants::BLOCK_CLOSE_MARKER.to_string()
}

fn default_max_block_chars() -> usize {
    16 * 1024
}

fn default_approval_phrases() -> Vec<String> {
    to_owned(constants::APPROVAL_PHRASES)
}

fn default_topic_shift_phrases() -> Vec<String> {
    to_owned(constants::TOPIC_SHIFT_PHRASES)
}

fn default_specification_required_message() -> String {
    constants::SPECIFICATION_REQUIRED_MESSAGE.to_string()
}

fn to_owned(items: &[&str]) -> Vec<String> {
    items.iter().map(|s| s.to_string()).collect()
}

impl Default for ConversationConfig {
    fn default() -> Self {
        Self {
            required_keys: default_required_keys(),
            open_markers: default_open_markers(),
            close_marker: default_close_marker(),
            fragment_separator: String::new(),
            max_block_chars: default_max_block_chars(),
            approval_phrases: default_approval_phrases(),
            topic_shift_phrases: default_topic_shift_phrases(),
            specification_required_message: default_specification_required_message(),
            phrases_path: None,
        }
    }
}

impl ConversationConfig {
    /// Replace phrase lists with those from a phrases file
    ///
    /// Lists absent from the file keep their current values.
    pub fn apply_phrases(&mut self, tables: PhraseTables) {
        if let Some(approval) = tables.approval {
            self.approval_phrases = approval;
        }
        if let Some(topic_shift) = tables.topic_shift {
            self.topic_shift_phrases = topic_shift;
        }
    }

    /// Validate the tables
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.required_keys.is_empty() {
            return Err(ConfigError::MissingField("conversation.required_keys".to_string()));
        }
        if self.open_markers.iter().all(|m| m.trim().is_empty()) {
            return Err(ConfigError::MissingField("conversation.open_markers".to_string()));
        }
        if self.close_marker.trim().is_empty() {
            return Err(ConfigError::MissingField("conversation.close_marker".to_string()));
        }
        if self.approval_phrases.is_empty() {
            return Err(ConfigError::MissingField("conversation.approval_phrases".to_string()));
        }
        if self.topic_shift_phrases.is_empty() {
            return Err(ConfigError::MissingField(
                "conversation.topic_shift_phrases".to_string(),
            ));
        }
        if self.max_block_chars < 64 {
            return Err(ConfigError::InvalidValue {
                field: "conversation.max_block_chars".to_string(),
                message: format!("Must be at least 64, got {}", self.max_block_chars),
            });
        }
        Ok(())
    }
}

/// Standalone phrase tables file
///
/// ```yaml
/// approval:
///   - "looks good"
///   - "let's build"
/// topic_shift:
///   - "what do you think"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PhraseTables {
    #[serde(default)]
    pub approval: Option<Vec<String>>,
    #[serde(default)]
    pub topic_shift: Option<Vec<String>>,
}

impl PhraseTables {
    /// Load from a YAML file
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| ConfigError::FileNotFound(format!("{}: {}", path.display(), e)))?;

        serde_yaml::from_str(&content).map_err(|e| ConfigError::ParseError(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_are_valid() {
        let config = ConversationConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.required_keys.len(), 7);
        assert!(config.fragment_separator.is_empty());
    }

    #[test]
    fn test_empty_tables_rejected() {
        let mut config = ConversationConfig::default();
        config.approval_phrases.clear();
        assert!(config.validate().is_err());

        let mut config = ConversationConfig::default();
        config.open_markers = vec!["  ".to_string()];
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_phrase_tables() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "approval:\n  - \"ship it\"\n").unwrap();

        let tables = PhraseTables::load(file.path()).unwrap();
        let mut config = ConversationConfig::default();
        let topic_shift_before = config.topic_shift_phrases.clone();
        config.apply_phrases(tables);

        assert_eq!(config.approval_phrases, vec!["ship it".to_string()]);
        assert_eq!(config.topic_shift_phrases, topic_shift_before);
    }

    #[test]
    fn test_load_missing_file() {
        let err = PhraseTables::load("/nonexistent/phrases.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
