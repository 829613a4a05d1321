//! Startup configuration loaded from `config.json`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

/// Path used when `FEDAI_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

/// Environment variable that overrides [`DEFAULT_CONFIG_PATH`].
pub const CONFIG_PATH_ENV: &str = "FEDAI_CONFIG";

const DEFAULT_REQUEST_TIMEOUT_SECS: u64 = 30;
const DEFAULT_STATUS_INTERVAL_SECS: u64 = 60;

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Credentials and settings for one bot process. Immutable once loaded.
#[derive(Clone, PartialEq, Eq, Deserialize)]
pub struct Config {
    /// Gateway / REST bot token.
    pub discord_token: String,
    /// Bearer token for the completion API.
    pub openai_api_key: String,
    /// Model identifier sent with every completion request.
    pub openai_model: String,
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
    #[serde(default = "default_status_interval_secs")]
    pub status_interval_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    DEFAULT_REQUEST_TIMEOUT_SECS
}

fn default_status_interval_secs() -> u64 {
    DEFAULT_STATUS_INTERVAL_SECS
}

impl Config {
    /// Read and parse the config file at `path`.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw)
    }

    pub fn from_json(raw: &str) -> Result<Self, ConfigError> {
        serde_json::from_str(raw).map_err(ConfigError::Parse)
    }

    /// Where to look for the config file: `$FEDAI_CONFIG` or `config.json`.
    pub fn resolve_path() -> PathBuf {
        std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs.max(1))
    }

    pub fn status_interval(&self) -> Duration {
        Duration::from_secs(self.status_interval_secs.max(1))
    }
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("discord_token", &"<redacted>")
            .field("openai_api_key", &"<redacted>")
            .field("openai_model", &self.openai_model)
            .field("request_timeout_secs", &self.request_timeout_secs)
            .field("status_interval_secs", &self.status_interval_secs)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

#[derive(Debug)]
pub enum ConfigError {
    /// The file could not be read.
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    /// The file is not a valid config document.
    Parse(serde_json::Error),
}

impl std::fmt::Display for ConfigError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfigError::Read { path, source } => {
                write!(f, "failed to read config file {}: {}", path.display(), source)
            }
            ConfigError::Parse(e) => write!(f, "failed to parse config file: {}", e),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::Read { source, .. } => Some(source),
            ConfigError::Parse(e) => Some(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_required_fields() {
        let cfg = Config::from_json(
            r#"{"discord_token":"T","openai_api_key":"K","openai_model":"gpt-4"}"#,
        )
        .unwrap();
        assert_eq!(cfg.discord_token, "T");
        assert_eq!(cfg.openai_api_key, "K");
        assert_eq!(cfg.openai_model, "gpt-4");
    }

    #[test]
    fn optional_fields_take_defaults() {
        let cfg = Config::from_json(
            r#"{"discord_token":"T","openai_api_key":"K","openai_model":"gpt-4"}"#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(30));
        assert_eq!(cfg.status_interval(), Duration::from_secs(60));
    }

    #[test]
    fn optional_fields_can_be_overridden() {
        let cfg = Config::from_json(
            r#"{"discord_token":"T","openai_api_key":"K","openai_model":"m",
                "request_timeout_secs":5,"status_interval_secs":0}"#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(5));
        // Zero would make the updater spin.
        assert_eq!(cfg.status_interval(), Duration::from_secs(1));
    }

    #[test]
    fn zero_request_timeout_is_clamped() {
        let cfg = Config::from_json(
            r#"{"discord_token":"T","openai_api_key":"K","openai_model":"m",
                "request_timeout_secs":0}"#,
        )
        .unwrap();
        assert_eq!(cfg.request_timeout(), Duration::from_secs(1));
    }

    #[test]
    fn missing_field_is_a_parse_error() {
        let err = Config::from_json(r#"{"discord_token":"T","openai_api_key":"K"}"#).unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
        assert!(err.to_string().contains("openai_model"));
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let err = Config::from_json("{not json").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn missing_file_is_a_read_error() {
        let path = std::env::temp_dir().join("fedai-bot-does-not-exist/config.json");
        let err = Config::load(&path).unwrap_err();
        match err {
            ConfigError::Read { path: p, .. } => assert_eq!(p, path),
            other => panic!("expected Read error, got {:?}", other),
        }
    }

    #[test]
    fn load_reads_file_from_disk() {
        let path = std::env::temp_dir().join(format!("fedai-bot-config-{}.json", std::process::id()));
        std::fs::write(
            &path,
            r#"{"discord_token":"T","openai_api_key":"K","openai_model":"gpt-4"}"#,
        )
        .unwrap();
        let cfg = Config::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(cfg.openai_model, "gpt-4");
    }

    #[test]
    fn debug_redacts_secrets() {
        let cfg = Config::from_json(
            r#"{"discord_token":"secret-token","openai_api_key":"secret-key","openai_model":"gpt-4"}"#,
        )
        .unwrap();
        let dbg = format!("{:?}", cfg);
        assert!(!dbg.contains("secret-token"));
        assert!(!dbg.contains("secret-key"));
        assert!(dbg.contains("gpt-4"));
    }
}
