// src/config/mod.rs
//! Settings: secrets from the environment, everything else from one file.
//!
//! Lookup order for the file:
//! 1) $WATCH_CONFIG_PATH
//! 2) config/watch.toml
//! 3) config/watch.json

pub mod keywords;

pub use keywords::{KeywordEntry, KeywordSpec};

use chrono::NaiveTime;
use serde::Deserialize;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::aggregate::{MIN_MESSAGE_CHARS, TELEGRAM_MAX_CHARS};
use crate::classify::PriceChangePolicy;
use crate::dispatch::DispatchPolicy;

pub const ENV_CONFIG_PATH: &str = "WATCH_CONFIG_PATH";
pub const ENV_BOT_TOKEN: &str = "BOT_TOKEN";
pub const ENV_CHAT_ID: &str = "CHAT_ID";

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("reading settings from {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("no settings file found ($WATCH_CONFIG_PATH, config/watch.toml, config/watch.json)")]
    NotFound,
    #[error("{env} points to non-existent path {path}")]
    BadEnvPath { env: &'static str, path: PathBuf },
    #[error("parsing settings: {0}")]
    Parse(String),
    #[error("missing {0} in environment (key.env / .env)")]
    MissingEnv(&'static str),
    #[error("invalid daily summary time '{0}', expected HH:MM")]
    InvalidTime(String),
    #[error("invalid metrics address '{0}'")]
    InvalidAddr(String),
    #[error("keyword '{keyword}': {reason}")]
    InvalidKeyword { keyword: String, reason: String },
    #[error("duplicate keyword display name '{0}'")]
    DuplicateKeyword(String),
    #[error("no keywords configured")]
    NoKeywords,
    #[error("max_message_chars {0} is outside 512..=4096")]
    MessageLimit(usize),
}

fn default_store_path() -> PathBuf {
    PathBuf::from("seen_items.json")
}
fn default_max_seen_items() -> usize {
    6_000
}
fn default_summary_time() -> String {
    "12:30".to_string()
}
fn default_keyword_delay() -> u64 {
    10
}
fn default_cycle_delay() -> u64 {
    60
}
fn default_cycles_before_restart() -> u32 {
    10
}
fn default_min_interval_ms() -> u64 {
    1_100
}
fn default_min_retry_delay_ms() -> u64 {
    1_000
}
fn default_max_retry_delay_secs() -> u64 {
    300
}
fn default_max_attempts() -> u32 {
    5
}
fn default_backoff_factor() -> f64 {
    2.0
}
fn default_max_message_chars() -> usize {
    TELEGRAM_MAX_CHARS
}
fn default_page_size() -> usize {
    30
}
fn default_source_timeout() -> u64 {
    20
}
fn default_user_agent() -> String {
    format!("mercari-watch/{}", env!("CARGO_PKG_VERSION"))
}
fn default_fx_endpoint() -> String {
    "https://open.er-api.com/v6/latest/USD".to_string()
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StoreSection {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_max_seen_items")]
    pub max_seen_items: usize,
}

impl Default for StoreSection {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            max_seen_items: default_max_seen_items(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ScheduleSection {
    #[serde(default = "default_summary_time")]
    pub daily_summary_time: String,
}

impl Default for ScheduleSection {
    fn default() -> Self {
        Self {
            daily_summary_time: default_summary_time(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DelaySection {
    #[serde(default = "default_keyword_delay")]
    pub keyword_delay_secs: u64,
    #[serde(default = "default_cycle_delay")]
    pub cycle_delay_secs: u64,
    /// Recycle the listing-source session every N cycles (0 disables).
    #[serde(default = "default_cycles_before_restart")]
    pub cycles_before_restart: u32,
}

impl Default for DelaySection {
    fn default() -> Self {
        Self {
            keyword_delay_secs: default_keyword_delay(),
            cycle_delay_secs: default_cycle_delay(),
            cycles_before_restart: default_cycles_before_restart(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct DispatcherSection {
    #[serde(default = "default_min_interval_ms")]
    pub min_interval_ms: u64,
    #[serde(default = "default_min_retry_delay_ms")]
    pub min_retry_delay_ms: u64,
    #[serde(default = "default_max_retry_delay_secs")]
    pub max_retry_delay_secs: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_backoff_factor")]
    pub backoff_factor: f64,
    #[serde(default = "default_max_message_chars")]
    pub max_message_chars: usize,
}

impl Default for DispatcherSection {
    fn default() -> Self {
        Self {
            min_interval_ms: default_min_interval_ms(),
            min_retry_delay_ms: default_min_retry_delay_ms(),
            max_retry_delay_secs: default_max_retry_delay_secs(),
            max_attempts: default_max_attempts(),
            backoff_factor: default_backoff_factor(),
            max_message_chars: default_max_message_chars(),
        }
    }
}

impl DispatcherSection {
    pub fn policy(&self) -> DispatchPolicy {
        DispatchPolicy {
            min_interval: Duration::from_millis(self.min_interval_ms),
            min_retry_delay: Duration::from_millis(self.min_retry_delay_ms),
            max_retry_delay: Duration::from_secs(self.max_retry_delay_secs),
            max_attempts: self.max_attempts,
            backoff_factor: self.backoff_factor,
        }
        .sanitized()
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum SourceSection {
    Http {
        endpoint: String,
        #[serde(default = "default_page_size")]
        page_size: usize,
        #[serde(default = "default_source_timeout")]
        timeout_secs: u64,
        #[serde(default = "default_user_agent")]
        user_agent: String,
    },
    Fixture {
        path: PathBuf,
    },
}

#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct PricingSection {
    /// Fixed rate; skips the live lookup when set.
    #[serde(default)]
    pub usd_to_jpy: Option<f64>,
    #[serde(default = "default_fx_endpoint")]
    pub fx_endpoint: String,
    #[serde(default)]
    pub price_change: PriceChangePolicy,
}

impl Default for PricingSection {
    fn default() -> Self {
        Self {
            usd_to_jpy: None,
            fx_endpoint: default_fx_endpoint(),
            price_change: PriceChangePolicy::default(),
        }
    }
}

/// Settings file as written on disk.
#[derive(Debug, Clone, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FileConfig {
    #[serde(default)]
    pub dry_run: bool,
    #[serde(default)]
    pub metrics_addr: Option<String>,
    #[serde(default)]
    pub store: StoreSection,
    #[serde(default)]
    pub schedule: ScheduleSection,
    #[serde(default)]
    pub delays: DelaySection,
    #[serde(default)]
    pub dispatcher: DispatcherSection,
    pub source: SourceSection,
    #[serde(default)]
    pub pricing: PricingSection,
    #[serde(default)]
    pub keywords: Vec<KeywordEntry>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TelegramCredentials {
    pub bot_token: String,
    pub chat_id: String,
}

/// Validated runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// `None` only in dry-run mode.
    pub telegram: Option<TelegramCredentials>,
    pub dry_run: bool,
    pub metrics_addr: Option<SocketAddr>,
    pub store_path: PathBuf,
    pub max_seen_items: usize,
    pub daily_summary_time: NaiveTime,
    pub keyword_delay: Duration,
    pub cycle_delay: Duration,
    pub cycles_before_restart: u32,
    pub dispatch: DispatchPolicy,
    pub max_message_chars: usize,
    pub source: SourceSection,
    pub pricing: PricingSection,
    pub keywords: Vec<KeywordSpec>,
}

impl Settings {
    pub fn keyword_names(&self) -> Vec<String> {
        self.keywords.iter().map(|k| k.display_name.clone()).collect()
    }
}

impl FileConfig {
    /// Validate and merge with secrets looked up through `env`.
    pub fn resolve(self, env: impl Fn(&str) -> Option<String>) -> Result<Settings, ConfigError> {
        let non_empty = |key: &'static str| env(key).map(|v| v.trim().to_string()).filter(|v| !v.is_empty());
        let telegram = match (non_empty(ENV_BOT_TOKEN), non_empty(ENV_CHAT_ID)) {
            (Some(bot_token), Some(chat_id)) => Some(TelegramCredentials { bot_token, chat_id }),
            _ if self.dry_run => None,
            (None, _) => return Err(ConfigError::MissingEnv(ENV_BOT_TOKEN)),
            (_, None) => return Err(ConfigError::MissingEnv(ENV_CHAT_ID)),
        };

        let raw_time = self.schedule.daily_summary_time.trim();
        let daily_summary_time = NaiveTime::parse_from_str(raw_time, "%H:%M")
            .map_err(|_| ConfigError::InvalidTime(raw_time.to_string()))?;

        let metrics_addr = match self.metrics_addr.as_deref().map(str::trim) {
            None | Some("") => None,
            Some(a) => Some(
                a.parse::<SocketAddr>()
                    .map_err(|_| ConfigError::InvalidAddr(a.to_string()))?,
            ),
        };

        let keywords = keywords::normalize_keywords(self.keywords)?;

        let max_message_chars = self.dispatcher.max_message_chars;
        if !(MIN_MESSAGE_CHARS..=TELEGRAM_MAX_CHARS).contains(&max_message_chars) {
            return Err(ConfigError::MessageLimit(max_message_chars));
        }

        // Sanitize numeric knobs rather than failing on them.
        let mut pricing = self.pricing;
        if let Some(rate) = pricing.usd_to_jpy {
            if !rate.is_finite() || rate <= 0.0 {
                tracing::warn!(rate, "ignoring non-positive usd_to_jpy override");
                pricing.usd_to_jpy = None;
            }
        }

        Ok(Settings {
            telegram,
            dry_run: self.dry_run,
            metrics_addr,
            store_path: self.store.path,
            max_seen_items: self.store.max_seen_items.max(1),
            daily_summary_time,
            keyword_delay: Duration::from_secs(self.delays.keyword_delay_secs),
            cycle_delay: Duration::from_secs(self.delays.cycle_delay_secs),
            cycles_before_restart: self.delays.cycles_before_restart,
            dispatch: self.dispatcher.policy(),
            max_message_chars,
            source: self.source,
            pricing,
            keywords,
        })
    }
}

/// Parse TOML or JSON, chosen by extension hint (TOML when unknown).
pub fn parse_file_config(content: &str, hint_ext: &str) -> Result<FileConfig, ConfigError> {
    match hint_ext {
        "json" => serde_json::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
        _ => toml::from_str(content).map_err(|e| ConfigError::Parse(e.to_string())),
    }
}

/// Load settings from an explicit path, secrets from the process environment.
pub fn load_from(path: &Path) -> Result<Settings, ConfigError> {
    let content = fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    let ext = path
        .extension()
        .and_then(|s| s.to_str())
        .unwrap_or_default()
        .to_ascii_lowercase();
    let file = parse_file_config(&content, &ext)?;
    file.resolve(|k| std::env::var(k).ok())
}

/// Resolve the settings path via env var + fallbacks.
pub fn default_path() -> Result<PathBuf, ConfigError> {
    if let Ok(p) = std::env::var(ENV_CONFIG_PATH) {
        let pb = PathBuf::from(p);
        if pb.exists() {
            return Ok(pb);
        }
        return Err(ConfigError::BadEnvPath {
            env: ENV_CONFIG_PATH,
            path: pb,
        });
    }
    ["config/watch.toml", "config/watch.json"]
        .iter()
        .map(PathBuf::from)
        .find(|p| p.exists())
        .ok_or(ConfigError::NotFound)
}

pub fn load_default() -> Result<Settings, ConfigError> {
    load_from(&default_path()?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;

    fn creds(k: &str) -> Option<String> {
        match k {
            ENV_BOT_TOKEN => Some("123:abc".into()),
            ENV_CHAT_ID => Some("42".into()),
            _ => None,
        }
    }

    #[test]
    fn defaults_fill_everything_but_source() {
        let src = r#"
            keywords = ["ps3"]
            [source]
            kind = "fixture"
            path = "fixtures/listings.json"
        "#;
        let s = parse_file_config(src, "toml").unwrap().resolve(creds).unwrap();
        assert_eq!(s.max_seen_items, 6_000);
        assert_eq!(s.daily_summary_time, NaiveTime::from_hms_opt(12, 30, 0).unwrap());
        assert_eq!(s.keyword_delay, Duration::from_secs(10));
        assert_eq!(s.cycles_before_restart, 10);
        assert_eq!(s.dispatch.max_attempts, 5);
        assert_eq!(s.max_message_chars, 4096);
        assert_eq!(s.telegram.unwrap().chat_id, "42");
    }

    #[test]
    fn missing_credentials_fail_unless_dry_run() {
        let src = r#"
            keywords = ["ps3"]
            [source]
            kind = "fixture"
            path = "x.json"
        "#;
        let err = parse_file_config(src, "toml").unwrap().resolve(|_| None).unwrap_err();
        assert!(matches!(err, ConfigError::MissingEnv(ENV_BOT_TOKEN)));

        let dry = format!("dry_run = true\n{src}");
        let s = parse_file_config(&dry, "toml").unwrap().resolve(|_| None).unwrap();
        assert!(s.telegram.is_none());
    }

    #[test]
    fn json_and_bad_time() {
        let src = r#"{
            "schedule": {"daily_summary_time": "25:99"},
            "source": {"kind": "http", "endpoint": "http://localhost:8787/search"},
            "keywords": ["ps3"]
        }"#;
        let err = parse_file_config(src, "json").unwrap().resolve(creds).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidTime(_)));
    }

    #[serial_test::serial]
    #[test]
    fn default_path_uses_env_then_fallbacks() {
        let old = env::current_dir().unwrap();
        let tmp = tempfile::tempdir().unwrap();
        env::set_current_dir(tmp.path()).unwrap();
        env::remove_var(ENV_CONFIG_PATH);

        assert!(matches!(default_path(), Err(ConfigError::NotFound)));

        fs::create_dir_all("config").unwrap();
        fs::write("config/watch.json", "{}").unwrap();
        assert_eq!(default_path().unwrap(), PathBuf::from("config/watch.json"));

        let p = tmp.path().join("elsewhere.toml");
        fs::write(&p, "").unwrap();
        env::set_var(ENV_CONFIG_PATH, p.display().to_string());
        assert_eq!(default_path().unwrap(), p);

        env::set_var(ENV_CONFIG_PATH, tmp.path().join("missing.toml").display().to_string());
        assert!(matches!(default_path(), Err(ConfigError::BadEnvPath { .. })));
        env::remove_var(ENV_CONFIG_PATH);

        env::set_current_dir(&old).unwrap();
    }
}
