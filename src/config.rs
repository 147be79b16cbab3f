//! Environment-driven settings
//!
//! Everything is read once at startup. A `.env` file in the working directory
//! is loaded first so local runs behave like the deployed service.

use chrono::NaiveDate;
use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::clockify::ClockifyConfig;
use crate::oura::OuraConfig;
use crate::sync::{DateRange, SyncOptions};

/// ---------------------------------------------------------------------------
/// Defaults
/// ---------------------------------------------------------------------------

const DEFAULT_START_DATE: &str = "2015-01-01";
const DEFAULT_SCHEDULE: &str = "0 * * * *";
const DEFAULT_TOKEN_FILE: &str = ".oura-tokens.json";
const DEFAULT_API_DELAY_MS: u64 = 50;
const MAX_API_DELAY_MS: u64 = 10_000;
const DEFAULT_RATE_LIMIT_BACKOFF_MS: u64 = 200;
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;
const DEFAULT_SERVER_HOST: &str = "127.0.0.1";
const DEFAULT_SERVER_PORT: u16 = 5555;

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
  #[error("Missing configuration: {0}")]
  Missing(String),

  #[error("Invalid value for {key}: {value:?} ({reason})")]
  Invalid {
    key: String,
    value: String,
    reason: String,
  },
}

/// ---------------------------------------------------------------------------
/// Environment Helpers
/// ---------------------------------------------------------------------------

pub(crate) fn required(key: &str) -> Result<String, ConfigError> {
  match optional(key) {
    Some(value) => Ok(value),
    None => Err(ConfigError::Missing(key.to_string())),
  }
}

/// Unset and empty variables are treated the same.
pub(crate) fn optional(key: &str) -> Option<String> {
  env::var(key).ok().filter(|v| !v.trim().is_empty())
}

pub(crate) fn parsed_or<T>(key: &str, default: T) -> Result<T, ConfigError>
where
  T: FromStr,
  T::Err: std::fmt::Display,
{
  match optional(key) {
    Some(raw) => raw.trim().parse::<T>().map_err(|e| ConfigError::Invalid {
      key: key.to_string(),
      value: raw.clone(),
      reason: e.to_string(),
    }),
    None => Ok(default),
  }
}

fn invalid(key: &str, value: impl ToString, reason: &str) -> ConfigError {
  ConfigError::Invalid {
    key: key.to_string(),
    value: value.to_string(),
    reason: reason.to_string(),
  }
}

/// Delay between Clockify writes, bounded to 0..=10s.
pub(crate) fn api_delay_from_env() -> Result<Duration, ConfigError> {
  let ms: u64 = parsed_or("CLOCKIFY_API_DELAY", DEFAULT_API_DELAY_MS)?;
  if ms > MAX_API_DELAY_MS {
    return Err(invalid("CLOCKIFY_API_DELAY", ms, "must be between 0 and 10000 ms"));
  }
  Ok(Duration::from_millis(ms))
}

pub(crate) fn http_timeout_from_env() -> Result<Duration, ConfigError> {
  let secs: u64 = parsed_or("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?;
  if secs == 0 {
    return Err(invalid("HTTP_TIMEOUT_SECS", secs, "must be at least 1"));
  }
  Ok(Duration::from_secs(secs))
}

/// ---------------------------------------------------------------------------
/// Settings
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum TokenStorage {
  File(PathBuf),
  /// Database primary, file used when the database is unreachable.
  Database { url: String, fallback_file: PathBuf },
  /// Tokens only live in memory, seeded from `OURA_ACCESS_TOKEN`.
  None,
}

impl TokenStorage {
  fn from_env() -> Result<Self, ConfigError> {
    let file = PathBuf::from(optional("TOKEN_FILE").unwrap_or_else(|| DEFAULT_TOKEN_FILE.into()));
    let database_url = optional("DATABASE_URL");

    let mode = optional("TOKEN_STORAGE").map(|m| m.to_lowercase());
    match (mode.as_deref(), database_url) {
      (Some("file"), _) => Ok(TokenStorage::File(file)),
      (Some("none"), _) => Ok(TokenStorage::None),
      (Some("database"), Some(url)) | (None, Some(url)) => Ok(TokenStorage::Database {
        url,
        fallback_file: file,
      }),
      (Some("database"), None) => Err(ConfigError::Missing("DATABASE_URL".into())),
      (None, None) => Ok(TokenStorage::File(file)),
      (Some(other), _) => Err(invalid("TOKEN_STORAGE", other, "expected file, database or none")),
    }
  }
}

#[derive(Debug, Clone)]
pub struct SyncConfig {
  pub start_date: NaiveDate,
  pub sync_days: Option<u32>,
  pub schedule: String,
  pub api_delay: Duration,
  pub rate_limit_backoff: Duration,
}

impl SyncConfig {
  fn from_env() -> Result<Self, ConfigError> {
    let raw_start = optional("SYNC_START_DATE").unwrap_or_else(|| DEFAULT_START_DATE.into());
    let start_date = NaiveDate::parse_from_str(&raw_start, "%Y-%m-%d")
      .map_err(|e| invalid("SYNC_START_DATE", &raw_start, &e.to_string()))?;

    let sync_days = match optional("SYNC_DAYS") {
      Some(_) => {
        let days: u32 = parsed_or("SYNC_DAYS", 1)?;
        if !(1..=365).contains(&days) {
          return Err(invalid("SYNC_DAYS", days, "must be between 1 and 365"));
        }
        Some(days)
      }
      None => None,
    };

    Ok(Self {
      start_date,
      sync_days,
      schedule: optional("SYNC_SCHEDULE").unwrap_or_else(|| DEFAULT_SCHEDULE.into()),
      api_delay: api_delay_from_env()?,
      rate_limit_backoff: Duration::from_millis(parsed_or(
        "RATE_LIMIT_BACKOFF_MS",
        DEFAULT_RATE_LIMIT_BACKOFF_MS,
      )?),
    })
  }

  pub fn options(&self) -> SyncOptions {
    SyncOptions {
      api_delay: self.api_delay,
      rate_limit_backoff: self.rate_limit_backoff,
    }
  }

  /// Range used by scheduled and manual runs: the last `SYNC_DAYS` days if
  /// set, otherwise everything from the historical floor to `today`.
  pub fn default_range(&self, today: NaiveDate) -> DateRange {
    match self.sync_days {
      Some(days) => DateRange::last_days(days, today),
      None => DateRange::new(self.start_date, today),
    }
  }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BasicAuthCredentials {
  pub username: String,
  pub password: String,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
  pub host: String,
  pub port: u16,
  /// Guards every route except the OAuth callback. `None` leaves the shell open.
  pub basic_auth: Option<BasicAuthCredentials>,
}

impl ServerConfig {
  fn from_env() -> Result<Self, ConfigError> {
    let basic_auth = match (optional("BASIC_AUTH_USERNAME"), optional("BASIC_AUTH_PASSWORD")) {
      (Some(username), Some(password)) => Some(BasicAuthCredentials { username, password }),
      (None, None) => None,
      (Some(_), None) => return Err(ConfigError::Missing("BASIC_AUTH_PASSWORD".into())),
      (None, Some(_)) => return Err(ConfigError::Missing("BASIC_AUTH_USERNAME".into())),
    };

    Ok(Self {
      host: optional("SERVER_HOST").unwrap_or_else(|| DEFAULT_SERVER_HOST.into()),
      port: parsed_or("SERVER_PORT", DEFAULT_SERVER_PORT)?,
      basic_auth,
    })
  }

  pub fn address(&self) -> String {
    format!("{}:{}", self.host, self.port)
  }
}

#[derive(Debug, Clone)]
pub struct Settings {
  pub oura: OuraConfig,
  pub clockify: ClockifyConfig,
  pub sync: SyncConfig,
  pub storage: TokenStorage,
  pub server: ServerConfig,
  pub log_level: String,
}

impl Settings {
  /// Load `.env` (if present) and read the process environment.
  pub fn load() -> Result<Self, ConfigError> {
    dotenvy::dotenv().ok();
    Self::from_env()
  }

  pub fn from_env() -> Result<Self, ConfigError> {
    Ok(Self {
      oura: OuraConfig::from_env()?,
      clockify: ClockifyConfig::from_env()?,
      sync: SyncConfig::from_env()?,
      storage: TokenStorage::from_env()?,
      server: ServerConfig::from_env()?,
      log_level: optional("LOG_LEVEL").unwrap_or_else(|| "info".into()),
    })
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
