//! Configuration for the orchestration core.
//!
//! Values load from a TOML file (see [`OrchestratorConfig::from_toml_str`])
//! with environment-variable overrides applied on top. Everything has a
//! working default so tests can use `OrchestratorConfig::default()`.

use std::time::Duration;

use serde::Deserialize;

use crate::error::ConfigError;

/// Where resolved `@`-reference content is injected.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ReferenceInjection {
    /// Prepend resolved content to the per-turn-dynamic system block.
    SystemPrompt,
    /// Inline resolved content as a prefix on the user message.
    UserMessage,
}

/// Main configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Default model id when the caller does not specify one.
    pub default_model: String,
    /// Sampling temperature passed to the provider.
    pub temperature: f32,
    /// Tool results longer than this stream back as fixed-size chunks.
    pub tool_result_chunk_size: usize,
    /// A tool execution exceeding this emits a still-running progress event.
    pub tool_heartbeat_threshold: Duration,
    /// Fixed delay between announcing `preparing` and `running` so clients
    /// always observe a `preparing` render frame first.
    pub preparing_delay: Duration,
    /// Fixed backoff before the single retry of a transient tool failure.
    pub transient_retry_backoff: Duration,
    /// How resolved `@`-references are injected into the prompt.
    pub reference_injection: ReferenceInjection,
    /// Whether web-search tools are offered to the model.
    pub web_search_enabled: bool,
    /// Root directory for the file tool; paths outside it are rejected.
    pub file_root: std::path::PathBuf,
    /// Timeout for terminal tool commands.
    pub terminal_timeout: Duration,
    /// Default TTL for resource locks.
    pub lock_ttl: Duration,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            default_model: "quill-default".to_string(),
            temperature: 0.7,
            tool_result_chunk_size: 4096,
            tool_heartbeat_threshold: Duration::from_secs(10),
            preparing_delay: Duration::from_millis(50),
            transient_retry_backoff: Duration::from_millis(500),
            reference_injection: ReferenceInjection::SystemPrompt,
            web_search_enabled: false,
            file_root: std::path::PathBuf::from("."),
            terminal_timeout: Duration::from_secs(60),
            lock_ttl: Duration::from_secs(120),
        }
    }
}

/// TOML-facing shape; every field optional so partial files work.
#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    model: Option<String>,
    temperature: Option<f32>,
    tool_result_chunk_size: Option<usize>,
    tool_heartbeat_threshold_ms: Option<u64>,
    preparing_delay_ms: Option<u64>,
    transient_retry_backoff_ms: Option<u64>,
    reference_injection: Option<ReferenceInjection>,
    web_search_enabled: Option<bool>,
    file_root: Option<String>,
    terminal_timeout_secs: Option<u64>,
    lock_ttl_secs: Option<u64>,
}

impl OrchestratorConfig {
    /// Load configuration from the environment only.
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file if present (ignore errors if not found)
        let _ = dotenvy::dotenv();
        let mut config = Self::default();
        config.apply_env()?;
        Ok(config)
    }

    /// Parse a TOML config string, then apply environment overrides.
    pub fn from_toml_str(raw: &str) -> Result<Self, ConfigError> {
        let parsed: RawConfig =
            toml::from_str(raw).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        let mut config = Self::default();
        if let Some(model) = parsed.model {
            config.default_model = model;
        }
        if let Some(t) = parsed.temperature {
            config.temperature = t;
        }
        if let Some(n) = parsed.tool_result_chunk_size {
            config.tool_result_chunk_size = n;
        }
        if let Some(ms) = parsed.tool_heartbeat_threshold_ms {
            config.tool_heartbeat_threshold = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed.preparing_delay_ms {
            config.preparing_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = parsed.transient_retry_backoff_ms {
            config.transient_retry_backoff = Duration::from_millis(ms);
        }
        if let Some(mode) = parsed.reference_injection {
            config.reference_injection = mode;
        }
        if let Some(enabled) = parsed.web_search_enabled {
            config.web_search_enabled = enabled;
        }
        if let Some(root) = parsed.file_root {
            config.file_root = std::path::PathBuf::from(root);
        }
        if let Some(secs) = parsed.terminal_timeout_secs {
            config.terminal_timeout = Duration::from_secs(secs);
        }
        if let Some(secs) = parsed.lock_ttl_secs {
            config.lock_ttl = Duration::from_secs(secs);
        }

        config.apply_env()?;
        config.validate()?;
        Ok(config)
    }

    fn apply_env(&mut self) -> Result<(), ConfigError> {
        if let Some(model) = optional_env("QUILL_MODEL")? {
            self.default_model = model;
        }
        if let Some(raw) = optional_env("QUILL_TEMPERATURE")? {
            self.temperature = raw.parse().map_err(|_| ConfigError::InvalidValue {
                key: "QUILL_TEMPERATURE".to_string(),
                message: format!("'{raw}' is not a valid float"),
            })?;
        }
        if let Some(raw) = optional_env("QUILL_CHUNK_SIZE")? {
            self.tool_result_chunk_size =
                raw.parse().map_err(|_| ConfigError::InvalidValue {
                    key: "QUILL_CHUNK_SIZE".to_string(),
                    message: format!("'{raw}' is not a valid size"),
                })?;
        }
        if let Some(raw) = optional_env("QUILL_WEB_SEARCH")? {
            self.web_search_enabled = matches!(raw.as_str(), "1" | "true" | "yes");
        }
        if let Some(root) = optional_env("QUILL_FILE_ROOT")? {
            self.file_root = std::path::PathBuf::from(root);
        }
        Ok(())
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=2.0).contains(&self.temperature) {
            return Err(ConfigError::InvalidValue {
                key: "temperature".to_string(),
                message: "must be between 0 and 2".to_string(),
            });
        }
        if self.tool_result_chunk_size == 0 {
            return Err(ConfigError::InvalidValue {
                key: "tool_result_chunk_size".to_string(),
                message: "must be non-zero".to_string(),
            });
        }
        Ok(())
    }
}

/// Read an optional environment variable, treating empty strings as unset.
fn optional_env(name: &str) -> Result<Option<String>, ConfigError> {
    match std::env::var(name) {
        Ok(value) if value.is_empty() => Ok(None),
        Ok(value) => Ok(Some(value)),
        Err(std::env::VarError::NotPresent) => Ok(None),
        Err(std::env::VarError::NotUnicode(_)) => Err(ConfigError::InvalidValue {
            key: name.to_string(),
            message: "value is not valid unicode".to_string(),
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = OrchestratorConfig::default();
        assert_eq!(config.tool_result_chunk_size, 4096);
        assert_eq!(config.reference_injection, ReferenceInjection::SystemPrompt);
        assert!(!config.web_search_enabled);
    }

    #[test]
    fn toml_overrides_defaults() {
        let config = OrchestratorConfig::from_toml_str(
            r#"
            model = "quill-large"
            temperature = 0.2
            tool_result_chunk_size = 1024
            preparing_delay_ms = 10
            reference_injection = "user_message"
            web_search_enabled = true
            "#,
        )
        .unwrap();
        assert_eq!(config.default_model, "quill-large");
        assert_eq!(config.temperature, 0.2);
        assert_eq!(config.tool_result_chunk_size, 1024);
        assert_eq!(config.preparing_delay, Duration::from_millis(10));
        assert_eq!(config.reference_injection, ReferenceInjection::UserMessage);
        assert!(config.web_search_enabled);
    }

    #[test]
    fn partial_toml_keeps_defaults() {
        let config = OrchestratorConfig::from_toml_str(r#"model = "m""#).unwrap();
        assert_eq!(config.default_model, "m");
        assert_eq!(config.tool_result_chunk_size, 4096);
    }

    #[test]
    fn invalid_temperature_rejected() {
        let err = OrchestratorConfig::from_toml_str("temperature = 9.0").unwrap_err();
        assert!(err.to_string().contains("temperature"), "got: {err}");
    }

    #[test]
    fn bad_toml_is_a_parse_error() {
        let err = OrchestratorConfig::from_toml_str("model = [").unwrap_err();
        assert!(matches!(err, ConfigError::ParseError(_)));
    }
}
