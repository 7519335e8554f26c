//! Configuration types.
//!
//! Everything is read once in `main` and passed into components at
//! construction time; nothing below reads the environment on its own.

use std::path::PathBuf;
use std::time::Duration;

use secrecy::SecretString;

use crate::error::ConfigError;
use crate::retry::RetryPolicy;

/// Upstream labeling service connection settings.
#[derive(Debug, Clone)]
pub struct LabelingConfig {
    /// API root, e.g. `https://labels.example.com/api`.
    pub base_url: String,
    /// Static API token sent as `Authorization: Token <token>`.
    pub token: SecretString,
    /// Hard timeout for the assignee push.
    pub push_timeout: Duration,
    /// Timeout for view and task-list requests.
    pub request_timeout: Duration,
    /// Page size used to fetch the whole pool in one request.
    pub page_size: u32,
    /// Retry policy for the view-filter overwrite.
    pub filter_retry: RetryPolicy,
    /// Internal-error responses tolerated before the filter step aborts.
    pub filter_internal_error_limit: u32,
}

impl LabelingConfig {
    /// Defaults for everything except the endpoint and token.
    pub fn new(base_url: impl Into<String>, token: SecretString) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token,
            push_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            page_size: 100_000,
            filter_retry: RetryPolicy::default(),
            filter_internal_error_limit: 5,
        }
    }
}

/// Service configuration.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub labeling: LabelingConfig,
    /// libSQL database file.
    pub db_path: PathBuf,
    /// HTTP listen port.
    pub port: u16,
}

impl AppConfig {
    /// Build config from environment variables.
    ///
    /// `LABELING_BASE_URL` and `LABELING_API_TOKEN` are required.
    pub fn from_env() -> Result<Self, ConfigError> {
        let base_url = required("LABELING_BASE_URL")?;
        let token = SecretString::from(required("LABELING_API_TOKEN")?);

        let mut labeling = LabelingConfig::new(base_url, token);
        if let Some(secs) = parsed::<u64>("LABELING_PUSH_TIMEOUT_SECS")? {
            labeling.push_timeout = Duration::from_secs(secs);
        }
        if let Some(size) = parsed::<u32>("LABELING_PAGE_SIZE")? {
            labeling.page_size = size;
        }
        if let Some(attempts) = parsed::<u32>("LABELING_FILTER_MAX_ATTEMPTS")? {
            labeling.filter_retry.max_attempts = attempts;
        }
        if let Some(ms) = parsed::<u64>("LABELING_FILTER_BASE_DELAY_MS")? {
            labeling.filter_retry.base_delay = Duration::from_millis(ms);
        }
        if let Some(secs) = parsed::<u64>("LABELING_FILTER_MAX_ELAPSED_SECS")? {
            labeling.filter_retry.max_elapsed = Duration::from_secs(secs);
        }

        let db_path: PathBuf = std::env::var("ALLOCATOR_DB_PATH")
            .unwrap_or_else(|_| "./data/allocator.db".to_string())
            .into();
        let port = parsed::<u16>("ALLOCATOR_PORT")?.unwrap_or(8080);

        Ok(Self {
            labeling,
            db_path,
            port,
        })
    }
}

fn required(key: &str) -> Result<String, ConfigError> {
    std::env::var(key)
        .ok()
        .filter(|v| !v.trim().is_empty())
        .ok_or_else(|| ConfigError::MissingEnvVar(key.to_string()))
}

fn parsed<T>(key: &str) -> Result<Option<T>, ConfigError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match std::env::var(key) {
        Ok(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e: T::Err| ConfigError::InvalidValue {
                key: key.to_string(),
                message: e.to_string(),
            }),
        Err(_) => Ok(None),
    }
}
