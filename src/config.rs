use std::env;
use std::time::Duration;

use tracing::{debug, info};

use crate::error::ConfigError;

pub const DEFAULT_REQUEST_TIMEOUT: Duration = Duration::from_secs(10);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(3000);
pub const DEFAULT_QUESTION_DURATION: Duration = Duration::from_millis(15000);

/// A single setting that can be read from the environment (or a `.env` file).
pub trait EnvSetting {
    /// The environment variable name for this setting
    const KEY_NAME: &'static str;

    type Value;

    /// Parse the raw (already trimmed) variable contents.
    fn parse(raw: &str) -> Result<Self::Value, String>;

    /// Look the setting up through `lookup`, returning `None` when it is unset or blank.
    fn read_with<F>(lookup: &F) -> Result<Option<Self::Value>, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let Some(raw) = lookup(Self::KEY_NAME) else {
            return Ok(None);
        };
        let raw = raw.trim();
        if raw.is_empty() {
            return Ok(None);
        }
        Self::parse(raw).map(Some).map_err(|message| ConfigError::Invalid {
            key: Self::KEY_NAME.to_string(),
            message,
        })
    }
}

pub struct ApiUrl;
pub struct RequestTimeoutMs;
pub struct PollIntervalMs;
pub struct QuestionDurationMs;
pub struct AdvanceOnAnswer;
pub struct MaxPollErrors;

impl EnvSetting for ApiUrl {
    const KEY_NAME: &'static str = "QUIZ_API_URL";
    type Value = String;

    fn parse(raw: &str) -> Result<String, String> {
        normalize_base_url(raw)
    }
}

impl EnvSetting for RequestTimeoutMs {
    const KEY_NAME: &'static str = "QUIZ_REQUEST_TIMEOUT_MS";
    type Value = Duration;

    fn parse(raw: &str) -> Result<Duration, String> {
        parse_millis(raw)
    }
}

impl EnvSetting for PollIntervalMs {
    const KEY_NAME: &'static str = "QUIZ_POLL_INTERVAL_MS";
    type Value = Duration;

    fn parse(raw: &str) -> Result<Duration, String> {
        parse_millis(raw)
    }
}

impl EnvSetting for QuestionDurationMs {
    const KEY_NAME: &'static str = "QUIZ_QUESTION_DURATION_MS";
    type Value = Duration;

    fn parse(raw: &str) -> Result<Duration, String> {
        parse_millis(raw)
    }
}

impl EnvSetting for AdvanceOnAnswer {
    const KEY_NAME: &'static str = "QUIZ_ADVANCE_ON_ANSWER";
    type Value = bool;

    fn parse(raw: &str) -> Result<bool, String> {
        match raw.to_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(true),
            "0" | "false" | "no" | "off" => Ok(false),
            other => Err(format!("expected a boolean, got '{}'", other)),
        }
    }
}

impl EnvSetting for MaxPollErrors {
    const KEY_NAME: &'static str = "QUIZ_MAX_POLL_ERRORS";
    type Value = u32;

    fn parse(raw: &str) -> Result<u32, String> {
        raw.parse::<u32>().map_err(|e| e.to_string())
    }
}

fn parse_millis(raw: &str) -> Result<Duration, String> {
    let ms = raw.parse::<u64>().map_err(|e| e.to_string())?;
    if ms == 0 {
        return Err("must be greater than zero".to_string());
    }
    Ok(Duration::from_millis(ms))
}

/// Validate a base URL and strip any trailing slash so paths can be appended.
pub fn normalize_base_url(raw: &str) -> Result<String, String> {
    let url = reqwest::Url::parse(raw.trim()).map_err(|e| e.to_string())?;
    match url.scheme() {
        "http" | "https" => {}
        other => return Err(format!("unsupported scheme '{}'", other)),
    }
    Ok(url.as_str().trim_end_matches('/').to_string())
}

/// Bounded retry for idempotent gateway calls.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryConfig {
    pub max_retries: usize,
    pub backoff: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(250),
        }
    }
}

impl RetryConfig {
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            backoff: Duration::ZERO,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct PollConfig {
    pub interval: Duration,
    pub auto_refresh: bool,
    /// Give up after this many consecutive failed checks. `None` polls forever.
    pub max_consecutive_errors: Option<u32>,
}

impl Default for PollConfig {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            auto_refresh: true,
            max_consecutive_errors: None,
        }
    }
}

/// Everything a participant flow needs to talk to one quiz server.
#[derive(Debug, Clone, PartialEq)]
pub struct ClientConfig {
    pub base_url: String,
    pub request_timeout: Duration,
    pub poll: PollConfig,
    pub question_duration: Duration,
    pub advance_on_answer: bool,
    pub retry: RetryConfig,
}

impl ClientConfig {
    /// Build a config with defaults for everything except the server address.
    pub fn new(base_url: &str) -> Result<Self, ConfigError> {
        let base_url = normalize_base_url(base_url).map_err(|message| ConfigError::Invalid {
            key: ApiUrl::KEY_NAME.to_string(),
            message,
        })?;
        Ok(Self {
            base_url,
            request_timeout: DEFAULT_REQUEST_TIMEOUT,
            poll: PollConfig::default(),
            question_duration: DEFAULT_QUESTION_DURATION,
            advance_on_answer: false,
            retry: RetryConfig::default(),
        })
    }

    /// Load from the process environment, reading `.env` first if present.
    pub fn from_env() -> Result<Self, ConfigError> {
        // First try to load .env file (silently fail if not found)
        let _ = dotenvy::dotenv();
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Load using an arbitrary key lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let base_url = ApiUrl::read_with(&lookup)?
            .ok_or_else(|| ConfigError::Missing(ApiUrl::KEY_NAME.to_string()))?;

        let mut config = Self::new(&base_url)?;
        if let Some(timeout) = RequestTimeoutMs::read_with(&lookup)? {
            config.request_timeout = timeout;
        }
        if let Some(interval) = PollIntervalMs::read_with(&lookup)? {
            config.poll.interval = interval;
        }
        if let Some(duration) = QuestionDurationMs::read_with(&lookup)? {
            config.question_duration = duration;
        }
        if let Some(advance) = AdvanceOnAnswer::read_with(&lookup)? {
            config.advance_on_answer = advance;
        }
        config.poll.max_consecutive_errors = MaxPollErrors::read_with(&lookup)?;

        info!(base_url = %config.base_url, "Loaded quiz client configuration");
        debug!(?config, "Full configuration");
        Ok(config)
    }

    pub fn with_base_url(mut self, base_url: &str) -> Result<Self, ConfigError> {
        self.base_url = normalize_base_url(base_url).map_err(|message| ConfigError::Invalid {
            key: ApiUrl::KEY_NAME.to_string(),
            message,
        })?;
        Ok(self)
    }

    #[must_use]
    pub const fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, interval: Duration) -> Self {
        self.poll.interval = interval;
        self
    }

    #[must_use]
    pub const fn with_auto_refresh(mut self, auto_refresh: bool) -> Self {
        self.poll.auto_refresh = auto_refresh;
        self
    }

    #[must_use]
    pub const fn with_max_poll_errors(mut self, max: Option<u32>) -> Self {
        self.poll.max_consecutive_errors = max;
        self
    }

    #[must_use]
    pub const fn with_question_duration(mut self, duration: Duration) -> Self {
        self.question_duration = duration;
        self
    }

    #[must_use]
    pub const fn with_advance_on_answer(mut self, advance: bool) -> Self {
        self.advance_on_answer = advance;
        self
    }

    #[must_use]
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }
}
