//! Configuration loader and validator for the capture scheduler.
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

use crate::media::ContentClass;
use crate::retry::FallbackTable;

pub const API_KEY_ENV: &str = "CAPTURE_SCHEDULER_API_KEY";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("YAML parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    #[error("Invalid configuration: {0}")]
    Invalid(&'static str),
    #[error("Missing credential: {0} is not configured")]
    MissingCredential(&'static str),
    #[error("No channels selected: at least one channel id is required")]
    EmptyChannels,
}

/// Root configuration struct mirroring the YAML schema.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Config {
    pub posting: Posting,
    #[serde(default)]
    pub generative: Option<Generative>,
}

/// Posting service settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Posting {
    pub api_key: String,
    #[serde(default = "default_posting_base_url")]
    pub base_url: String,
    #[serde(default)]
    pub default_channels: Vec<String>,
    #[serde(default = "default_delay_minutes")]
    pub default_delay_minutes: u32,
    #[serde(default = "default_upload_timeout")]
    pub upload_timeout_seconds: u64,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    #[serde(default = "default_item_delay")]
    pub item_delay_ms: u64,
    #[serde(default = "default_album_delay")]
    pub album_upload_delay_ms: u64,
    /// Channel id -> platform tag (e.g. `youtube`, `facebook`).
    #[serde(default)]
    pub channel_platforms: BTreeMap<String, String>,
}

/// Generative text service settings.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Generative {
    pub api_keys: Vec<String>,
    #[serde(default = "default_generative_base_url")]
    pub base_url: String,
    #[serde(default = "default_model")]
    pub model: String,
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: usize,
    #[serde(default = "default_rate_limit_delay")]
    pub rate_limit_delay_ms: u64,
    #[serde(default = "default_generative_timeout")]
    pub request_timeout_seconds: u64,
    #[serde(default = "default_heavy_timeout")]
    pub heavy_request_timeout_seconds: u64,
    #[serde(default)]
    pub fallback_models: FallbackModels,
}

/// Ordered fallback model identifiers per content class.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct FallbackModels {
    #[serde(default)]
    pub standard: Vec<String>,
    #[serde(default)]
    pub heavy: Vec<String>,
}

fn default_posting_base_url() -> String {
    "https://public-api.robopost.app/v1/".into()
}
fn default_generative_base_url() -> String {
    "https://generativelanguage.googleapis.com/v1beta/".into()
}
fn default_model() -> String {
    "gemini-2.5-flash-lite-preview-06-17".into()
}
fn default_delay_minutes() -> u32 {
    10
}
fn default_upload_timeout() -> u64 {
    60
}
fn default_request_timeout() -> u64 {
    30
}
fn default_generative_timeout() -> u64 {
    45
}
fn default_heavy_timeout() -> u64 {
    60
}
fn default_min_interval() -> u64 {
    1000
}
fn default_item_delay() -> u64 {
    1000
}
fn default_album_delay() -> u64 {
    500
}
fn default_max_attempts() -> usize {
    3
}
fn default_rate_limit_delay() -> u64 {
    2000
}

fn redact(secret: &str) -> String {
    if secret.is_empty() {
        return "<unset>".into();
    }
    let prefix: String = secret.chars().take(8).collect();
    format!("{}...", prefix)
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("posting", &self.posting)
            .field("generative", &self.generative)
            .finish()
    }
}

impl std::fmt::Debug for Posting {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Posting")
            .field("api_key", &redact(&self.api_key))
            .field("base_url", &self.base_url)
            .field("default_channels", &self.default_channels)
            .finish_non_exhaustive()
    }
}

impl std::fmt::Debug for Generative {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Generative")
            .field("api_keys", &self.api_keys.iter().map(|k| redact(k)).collect::<Vec<_>>())
            .field("base_url", &self.base_url)
            .field("model", &self.model)
            .finish_non_exhaustive()
    }
}

impl Posting {
    pub fn upload_timeout(&self) -> Duration {
        Duration::from_secs(self.upload_timeout_seconds)
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_seconds)
    }

    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn item_delay(&self) -> Duration {
        Duration::from_millis(self.item_delay_ms)
    }

    pub fn album_upload_delay(&self) -> Duration {
        Duration::from_millis(self.album_upload_delay_ms)
    }

    /// Platform tag configured for a channel, if any.
    pub fn platform_of(&self, channel_id: &str) -> Option<&str> {
        self.channel_platforms.get(channel_id).map(String::as_str)
    }
}

impl Generative {
    pub fn min_interval(&self) -> Duration {
        Duration::from_millis(self.min_interval_ms)
    }

    pub fn rate_limit_delay(&self) -> Duration {
        Duration::from_millis(self.rate_limit_delay_ms)
    }

    pub fn timeout_for(&self, class: ContentClass) -> Duration {
        match class {
            ContentClass::Standard => Duration::from_secs(self.request_timeout_seconds),
            ContentClass::Heavy => Duration::from_secs(self.heavy_request_timeout_seconds),
        }
    }

    /// Build the attempt-indexed fallback table. The configured model always
    /// leads a class whose list is empty.
    pub fn fallback_table(&self) -> FallbackTable {
        let mut table = FallbackTable::default();
        let standard = if self.fallback_models.standard.is_empty() {
            vec![self.model.clone()]
        } else {
            self.fallback_models.standard.clone()
        };
        let heavy = if self.fallback_models.heavy.is_empty() {
            standard.clone()
        } else {
            self.fallback_models.heavy.clone()
        };
        table.insert(ContentClass::Standard, standard);
        table.insert(ContentClass::Heavy, heavy);
        table
    }
}

impl Config {
    /// Apply environment overrides (currently only the posting API key).
    pub fn apply_env(&mut self) {
        if let Ok(key) = std::env::var(API_KEY_ENV) {
            if !key.trim().is_empty() {
                self.posting.api_key = key;
            }
        }
    }
}

/// Load configuration from a YAML file and validate it.
/// - If `path` is None, uses `config.yaml` in the current working directory.
pub fn load(path: Option<&Path>) -> Result<Config, ConfigError> {
    let path = path.unwrap_or_else(|| Path::new("config.yaml"));
    let content = fs::read_to_string(path)?;
    let mut cfg: Config = serde_yaml::from_str(&content)?;
    cfg.apply_env();
    validate(&cfg)?;
    Ok(cfg)
}

/// Validate a configuration instance.
pub fn validate(cfg: &Config) -> Result<(), ConfigError> {
    let p = &cfg.posting;
    if p.api_key.trim().is_empty() {
        return Err(ConfigError::MissingCredential("posting.api_key"));
    }
    if reqwest::Url::parse(&p.base_url).is_err() {
        return Err(ConfigError::Invalid("posting.base_url must be an absolute URL"));
    }
    if p.default_delay_minutes == 0 {
        return Err(ConfigError::Invalid("posting.default_delay_minutes must be > 0"));
    }
    if p.upload_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("posting.upload_timeout_seconds must be > 0"));
    }
    if p.request_timeout_seconds == 0 {
        return Err(ConfigError::Invalid("posting.request_timeout_seconds must be > 0"));
    }
    if p.default_channels.iter().any(|c| c.trim().is_empty()) {
        return Err(ConfigError::Invalid("posting.default_channels must not contain blank ids"));
    }

    if let Some(g) = &cfg.generative {
        if g.api_keys.iter().all(|k| k.trim().is_empty()) {
            return Err(ConfigError::MissingCredential("generative.api_keys"));
        }
        if reqwest::Url::parse(&g.base_url).is_err() {
            return Err(ConfigError::Invalid("generative.base_url must be an absolute URL"));
        }
        if g.model.trim().is_empty() {
            return Err(ConfigError::Invalid("generative.model must be non-empty"));
        }
        if g.max_attempts == 0 {
            return Err(ConfigError::Invalid("generative.max_attempts must be > 0"));
        }
        if g.request_timeout_seconds == 0 || g.heavy_request_timeout_seconds == 0 {
            return Err(ConfigError::Invalid("generative timeouts must be > 0"));
        }
    }

    Ok(())
}

/// Returns the example YAML content.
pub fn example() -> &'static str {
    r#"posting:
  api_key: "YOUR_POSTING_API_KEY"
  base_url: "https://public-api.robopost.app/v1/"
  default_channels:
    - "channel-1"
  default_delay_minutes: 10
  upload_timeout_seconds: 60
  request_timeout_seconds: 30
  min_interval_ms: 1000
  item_delay_ms: 1000
  album_upload_delay_ms: 500
  channel_platforms:
    channel-1: "facebook"

generative:
  api_keys:
    - "YOUR_GENERATIVE_KEY_1"
    - "YOUR_GENERATIVE_KEY_2"
  base_url: "https://generativelanguage.googleapis.com/v1beta/"
  model: "gemini-2.5-flash-lite-preview-06-17"
  min_interval_ms: 1000
  max_attempts: 3
  rate_limit_delay_ms: 2000
  request_timeout_seconds: 45
  heavy_request_timeout_seconds: 60
  fallback_models:
    standard:
      - "gemini-2.5-flash-lite-preview-06-17"
      - "gemini-2.0-flash"
    heavy:
      - "gemini-2.5-flash"
      - "gemini-2.0-flash"
      - "gemini-2.5-flash-lite-preview-06-17"
"#
}
