//! Application Configuration Module
//!
//! Loads the assistant's settings from the environment (and a `.env` file when present)
//! into one struct the binary hands to each component.

use std::path::PathBuf;
use std::str::FromStr;

use assistant_core::{AssistantConfig, UiMode, VoiceReconnect};
use gemini_live::types::audio::Voice;
use secrecy::SecretString;
use tracing::Level;

/// Where audit log entries are written.
#[derive(Debug, Clone)]
pub struct LogTarget {
    pub url: String,
    pub api_key: SecretString,
}

/// Holds all configuration loaded from the environment.
#[derive(Debug, Clone)]
pub struct Config {
    pub api_key: SecretString,
    pub model: String,
    pub base_url: Option<String>,
    pub voice: Voice,
    pub instructions: Option<String>,
    pub tools_enabled: bool,
    pub mode: UiMode,
    pub voice_reconnect: VoiceReconnect,
    pub interaction_log: Option<LogTarget>,
    pub interaction_log_fallback: Option<String>,
    pub reports_path: Option<PathBuf>,
    pub user_id: Option<String>,
    pub log_level: Level,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVar(String),
    #[error("Invalid value {value:?} for {name}")]
    InvalidValue { name: String, value: String },
    #[error("Invalid log level provided for RUST_LOG: {0}")]
    InvalidLogLevel(String),
}

fn parse<T: FromStr>(name: &str, value: Option<String>, default: T) -> Result<T, ConfigError> {
    match value {
        None => Ok(default),
        Some(value) => value.parse().map_err(|_| ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

fn parse_bool(name: &str, value: Option<String>, default: bool) -> Result<bool, ConfigError> {
    let Some(value) = value else {
        return Ok(default);
    };
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            name: name.to_string(),
            value,
        }),
    }
}

impl Config {
    /// Loads configuration from environment variables.
    ///
    // *   `GEMINI_API_KEY`: Required.
    // *   `GEMINI_MODEL`, `GEMINI_BASE_URL`: (Optional) Override the model and endpoint.
    // *   `ASSISTANT_VOICE`: (Optional) Prebuilt voice name. Defaults to "Aoede".
    // *   `ASSISTANT_INSTRUCTIONS`: (Optional) System instructions, at most 4000 characters.
    // *   `ASSISTANT_TOOLS`: (Optional) "true" or "false". Defaults to "true".
    // *   `ASSISTANT_MODE`: (Optional) "voice" or "text". Defaults to "voice".
    // *   `VOICE_RECONNECT`: (Optional) "lazy" or "eager". Defaults to "lazy".
    // *   `INTERACTION_LOG_URL` + `INTERACTION_LOG_KEY`: (Optional) Audit log database.
    // *   `INTERACTION_LOG_FALLBACK_URL`: (Optional) Audit log HTTP fallback.
    // *   `REPORTS_PATH`: (Optional) JSON file for saved reports. In memory when unset.
    // *   `ASSISTANT_USER_ID`: (Optional) Attached to audit log entries.
    // *   `RUST_LOG`: (Optional) The logging level. Defaults to "INFO".
    pub fn from_env() -> Result<Self, ConfigError> {
        // Load .env file. This is useful for local development and is ignored if not present.
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup(var: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Blank values count as unset.
        let get = |name: &str| var(name).filter(|v| !v.trim().is_empty());

        let api_key = get("GEMINI_API_KEY")
            .ok_or_else(|| ConfigError::MissingVar("GEMINI_API_KEY".to_string()))?;

        let log_level_str = get("RUST_LOG").unwrap_or_else(|| "INFO".to_string());
        let log_level = log_level_str
            .parse::<Level>()
            .map_err(|_| ConfigError::InvalidLogLevel(log_level_str))?;

        let interaction_log = match (get("INTERACTION_LOG_URL"), get("INTERACTION_LOG_KEY")) {
            (Some(url), Some(key)) => Some(LogTarget {
                url,
                api_key: SecretString::from(key),
            }),
            (Some(_), None) => return Err(ConfigError::MissingVar("INTERACTION_LOG_KEY".to_string())),
            _ => None,
        };

        let voice = get("ASSISTANT_VOICE")
            .map(|name| Voice::from_str(name.trim()).unwrap_or_else(|never| match never {}))
            .unwrap_or_default();

        Ok(Self {
            api_key: SecretString::from(api_key),
            model: get("GEMINI_MODEL").unwrap_or_else(|| gemini_live::DEFAULT_MODEL.to_string()),
            base_url: get("GEMINI_BASE_URL"),
            voice,
            instructions: get("ASSISTANT_INSTRUCTIONS"),
            tools_enabled: parse_bool("ASSISTANT_TOOLS", get("ASSISTANT_TOOLS"), true)?,
            mode: parse("ASSISTANT_MODE", get("ASSISTANT_MODE"), UiMode::default())?,
            voice_reconnect: parse(
                "VOICE_RECONNECT",
                get("VOICE_RECONNECT"),
                VoiceReconnect::default(),
            )?,
            interaction_log,
            interaction_log_fallback: get("INTERACTION_LOG_FALLBACK_URL"),
            reports_path: get("REPORTS_PATH").map(PathBuf::from),
            user_id: get("ASSISTANT_USER_ID"),
            log_level,
        })
    }

    /// The staged session settings these variables describe.
    pub fn assistant_config(&self) -> Result<AssistantConfig, assistant_core::ConfigError> {
        let mut config = AssistantConfig::default();
        config.set_voice(self.voice.clone());
        config.set_tools_enabled(self.tools_enabled);
        if let Some(instructions) = &self.instructions {
            config.set_instructions(instructions)?;
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secrecy::ExposeSecret;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> + use<> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| vars.get(name).cloned()
    }

    #[test]
    fn test_defaults() {
        let config = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "secret")])).unwrap();

        assert_eq!(config.api_key.expose_secret(), "secret");
        assert_eq!(config.model, gemini_live::DEFAULT_MODEL);
        assert_eq!(config.voice, Voice::Aoede);
        assert_eq!(config.mode, UiMode::Voice);
        assert_eq!(config.voice_reconnect, VoiceReconnect::Lazy);
        assert!(config.tools_enabled);
        assert!(config.interaction_log.is_none());
        assert_eq!(config.log_level, Level::INFO);
    }

    #[test]
    fn test_missing_api_key() {
        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "  ")])).unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("GEMINI_API_KEY".to_string()));
    }

    #[test]
    fn test_overrides() {
        let config = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("ASSISTANT_VOICE", "puck"),
            ("ASSISTANT_MODE", "text"),
            ("ASSISTANT_TOOLS", "off"),
            ("VOICE_RECONNECT", "eager"),
            ("INTERACTION_LOG_URL", "https://db.example.com"),
            ("INTERACTION_LOG_KEY", "anon"),
            ("REPORTS_PATH", "data/reports.json"),
            ("RUST_LOG", "debug"),
        ]))
        .unwrap();

        assert_eq!(config.voice, Voice::Puck);
        assert_eq!(config.mode, UiMode::Text);
        assert!(!config.tools_enabled);
        assert_eq!(config.voice_reconnect, VoiceReconnect::Eager);
        assert_eq!(config.interaction_log.unwrap().url, "https://db.example.com");
        assert_eq!(config.reports_path, Some(PathBuf::from("data/reports.json")));
        assert_eq!(config.log_level, Level::DEBUG);
    }

    #[test]
    fn test_invalid_values() {
        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "k"), ("ASSISTANT_MODE", "video")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref name, .. } if name == "ASSISTANT_MODE"));

        let err = Config::from_lookup(lookup(&[("GEMINI_API_KEY", "k"), ("RUST_LOG", "loud")]))
            .unwrap_err();
        assert_eq!(err, ConfigError::InvalidLogLevel("loud".to_string()));

        let err = Config::from_lookup(lookup(&[
            ("GEMINI_API_KEY", "k"),
            ("INTERACTION_LOG_URL", "https://db.example.com"),
        ]))
        .unwrap_err();
        assert_eq!(err, ConfigError::MissingVar("INTERACTION_LOG_KEY".to_string()));
    }

    #[test]
    fn test_assistant_config_rejects_long_instructions() {
        let long = "x".repeat(4001);
        let config =
            Config::from_lookup(lookup(&[("GEMINI_API_KEY", "k"), ("ASSISTANT_INSTRUCTIONS", &long)]))
                .unwrap();

        assert!(config.assistant_config().is_err());
    }
}
