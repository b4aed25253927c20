use anyhow::{Context, Result};
use chrono::Duration as ChronoDuration;
use gatekeeper_core::{ChatId, Templates};
use std::env;
use std::path::PathBuf;
use std::time::Duration;

/// Admission settings rejected at startup.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("{name} is required")]
    Missing { name: &'static str },
    #[error("{name} must be {expected}, got {value:?}")]
    Invalid {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

impl ConfigError {
    fn invalid(name: &'static str, expected: &'static str, value: impl Into<String>) -> Self {
        Self::Invalid {
            name,
            expected,
            value: value.into(),
        }
    }
}

/// Settings read by the admission core.
#[derive(Debug, Clone)]
pub struct AdmissionConfig {
    pub challenge_timeout: ChronoDuration,
    /// Total wrong answers allowed; the last one bans.
    pub max_retries: u32,
    pub sweep_interval: Duration,
    pub expected_answer: String,
    pub ban_duration: ChronoDuration,
    /// How long in-flight side effects may keep running after shutdown starts.
    pub shutdown_grace: Duration,
    pub templates: Templates,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            challenge_timeout: ChronoDuration::seconds(60),
            max_retries: 3,
            sweep_interval: Duration::from_secs(10),
            expected_answer: String::new(),
            ban_duration: ChronoDuration::seconds(600),
            shutdown_grace: Duration::from_secs(5),
            templates: Templates::default(),
        }
    }
}

impl AdmissionConfig {
    /// Build admission settings from a variable lookup (the environment in production).
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();

        let expected_answer = lookup("EXPECTED_ANSWER").ok_or(ConfigError::Missing {
            name: "EXPECTED_ANSWER",
        })?;

        let challenge_timeout = match lookup("CHALLENGE_TIMEOUT_SECS") {
            Some(raw) => ChronoDuration::seconds(parse_secs("CHALLENGE_TIMEOUT_SECS", &raw)?),
            None => defaults.challenge_timeout,
        };

        let max_retries = match lookup("MAX_RETRIES") {
            Some(raw) => raw
                .trim()
                .parse::<u32>()
                .map_err(|_| ConfigError::invalid("MAX_RETRIES", "a whole number", raw))?,
            None => defaults.max_retries,
        };

        let sweep_interval = match lookup("SWEEP_INTERVAL_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("SWEEP_INTERVAL_SECS", &raw)? as u64),
            None => defaults.sweep_interval,
        };

        let ban_duration = match lookup("BAN_DURATION_SECS") {
            Some(raw) => ChronoDuration::seconds(parse_secs("BAN_DURATION_SECS", &raw)?),
            None => defaults.ban_duration,
        };

        let shutdown_grace = match lookup("SHUTDOWN_GRACE_SECS") {
            Some(raw) => Duration::from_secs(parse_secs("SHUTDOWN_GRACE_SECS", &raw)? as u64),
            None => defaults.shutdown_grace,
        };

        let mut templates = defaults.templates;
        if let Some(prompt) = lookup("PROMPT_TEMPLATE") {
            templates.prompt = prompt;
        }
        if let Some(retry) = lookup("RETRY_TEMPLATE") {
            templates.retry = retry;
        }
        if let Some(welcome) = lookup("WELCOME_TEMPLATE") {
            templates.welcome = welcome;
        }
        // A blank ban template turns the announcement off
        if let Some(ban) = lookup("BAN_TEMPLATE") {
            templates.ban = Some(ban).filter(|s| !s.trim().is_empty());
        }

        let config = Self {
            challenge_timeout,
            max_retries,
            sweep_interval,
            expected_answer,
            ban_duration,
            shutdown_grace,
            templates,
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.expected_answer.trim().is_empty() {
            return Err(ConfigError::invalid(
                "EXPECTED_ANSWER",
                "non-blank",
                self.expected_answer.clone(),
            ));
        }
        if self.challenge_timeout <= ChronoDuration::zero() {
            return Err(ConfigError::invalid(
                "CHALLENGE_TIMEOUT_SECS",
                "positive",
                self.challenge_timeout.num_seconds().to_string(),
            ));
        }
        if self.max_retries < 1 {
            return Err(ConfigError::invalid(
                "MAX_RETRIES",
                "at least 1",
                self.max_retries.to_string(),
            ));
        }
        if self.sweep_interval.is_zero() {
            return Err(ConfigError::invalid("SWEEP_INTERVAL_SECS", "positive", "0"));
        }
        Ok(())
    }
}

fn parse_secs(name: &'static str, raw: &str) -> Result<i64, ConfigError> {
    match raw.trim().parse::<i64>() {
        Ok(secs) if secs >= 0 => Ok(secs),
        _ => Err(ConfigError::invalid(name, "a non-negative number of seconds", raw)),
    }
}

/// Parse a comma-separated list of chat ids. Blank entries are skipped.
pub fn parse_chat_ids(raw: &str) -> Result<Vec<ChatId>, ConfigError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            s.parse::<i64>()
                .map(ChatId)
                .map_err(|_| ConfigError::invalid("GUARDED_CHAT_IDS", "a list of chat ids", s))
        })
        .collect()
}

#[derive(Clone)]
pub struct Config {
    pub telegram_bot_token: String,
    pub telegram_webhook_secret: String,
    pub telegram_api_url: String,
    pub guarded_chats: Vec<ChatId>,
    pub port: u16,
    /// Directory for persistent state (SQLite database).
    /// Defaults to current working directory.
    pub state_dir: PathBuf,
    /// Optional bearer token for /status endpoint authentication.
    /// If not set, /status endpoint is disabled (returns 403 Forbidden).
    pub status_auth_token: Option<String>,
    pub admission: AdmissionConfig,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let telegram_bot_token = env::var("TELEGRAM_BOT_TOKEN")
            .context("TELEGRAM_BOT_TOKEN environment variable is required")?;

        let telegram_webhook_secret = env::var("TELEGRAM_WEBHOOK_SECRET")
            .context("TELEGRAM_WEBHOOK_SECRET environment variable is required")?;

        let telegram_api_url = env::var("TELEGRAM_API_URL")
            .unwrap_or_else(|_| "https://api.telegram.org".to_string());

        let guarded_chats = parse_chat_ids(
            &env::var("GUARDED_CHAT_IDS")
                .context("GUARDED_CHAT_IDS environment variable is required")?,
        )?;
        if guarded_chats.is_empty() {
            anyhow::bail!("GUARDED_CHAT_IDS must name at least one chat");
        }

        let port = env::var("PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .context("PORT must be a valid number")?;

        let state_dir = env::var("STATE_DIR")
            .map(PathBuf::from)
            .unwrap_or_else(|_| PathBuf::from("."));

        let status_auth_token = parse_status_auth_token(env::var("STATUS_AUTH_TOKEN").ok());

        let admission = AdmissionConfig::from_lookup(|name| env::var(name).ok())
            .context("Invalid admission configuration")?;

        Ok(Config {
            telegram_bot_token,
            telegram_webhook_secret,
            telegram_api_url,
            guarded_chats,
            port,
            state_dir,
            status_auth_token,
            admission,
        })
    }
}

/// Parse STATUS_AUTH_TOKEN from an optional string value.
///
/// Returns None if the value is missing, empty, or contains only whitespace.
/// An empty token would otherwise allow unauthenticated access.
pub fn parse_status_auth_token(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
