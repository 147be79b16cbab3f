//! Oura Ring integration for sleep sessions
//!
//! This module handles the Oura OAuth flows (authorization code and refresh
//! token) and the date-ranged read of sleep periods. Token state lives on the
//! client instance and every new token is written through to the token store.

use chrono::{NaiveDate, Utc};
use reqwest::{Client, Response, StatusCode};
use std::sync::Arc;
use std::time::Duration;

use crate::config::{self, ConfigError};
use crate::models::token::expires_within_buffer;
use crate::models::{SleepSession, SleepSessionsResponse, TokenRecord, TokenResponse};
use crate::token_store::{StoreError, TokenStore};

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

const DEFAULT_AUTH_BASE: &str = "https://cloud.ouraring.com";
const DEFAULT_API_BASE: &str = "https://api.ouraring.com";
const DEFAULT_REDIRECT_URI: &str = "http://localhost:5555/callback";
const DEFAULT_SCOPES: &str = "daily";
const SLEEP_PATH: &str = "/v2/usercollection/sleep";

/// ---------------------------------------------------------------------------
/// OAuth Data Structures
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct OuraConfig {
  pub client_id: String,
  pub client_secret: String,
  pub redirect_uri: String,
  pub scopes: String,
  pub auth_base: String,
  pub api_base: String,
  pub access_token: Option<String>,
  pub refresh_token: Option<String>,
  pub http_timeout: Duration,
}

impl OuraConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Ok(Self {
      client_id: config::required("OURA_CLIENT_ID")?,
      client_secret: config::required("OURA_CLIENT_SECRET")?,
      redirect_uri: config::optional("REDIRECT_URI").unwrap_or_else(|| DEFAULT_REDIRECT_URI.into()),
      scopes: config::optional("OAUTH_SCOPES").unwrap_or_else(|| DEFAULT_SCOPES.into()),
      auth_base: trim_base(config::optional("OURA_AUTH_BASE").unwrap_or_else(|| DEFAULT_AUTH_BASE.into())),
      api_base: trim_base(config::optional("OURA_API_BASE").unwrap_or_else(|| DEFAULT_API_BASE.into())),
      access_token: config::optional("OURA_ACCESS_TOKEN"),
      refresh_token: config::optional("OURA_REFRESH_TOKEN"),
      http_timeout: config::http_timeout_from_env()?,
    })
  }

  fn token_url(&self) -> String {
    format!("{}/oauth/token", self.api_base)
  }
}

fn trim_base(base: String) -> String {
  base.trim_end_matches('/').to_string()
}

/// Random opaque value for the OAuth `state` parameter.
pub fn generate_state() -> String {
  uuid::Uuid::new_v4().simple().to_string()
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum OuraError {
  /// Re-authentication is required: no usable token, or the token was rejected.
  #[error("Oura authentication required: {0}")]
  Auth(String),

  /// The token endpoint refused an exchange or refresh.
  #[error("Oura token request rejected ({status}): {body}")]
  TokenRejected { status: u16, body: String },

  #[error("Oura API error {status}: {body}")]
  Api { status: u16, body: String },

  #[error("HTTP request failed: {0}")]
  Request(String),

  #[error("Invalid Oura URL: {0}")]
  InvalidUrl(String),

  #[error(transparent)]
  Storage(#[from] StoreError),
}

impl OuraError {
  pub fn is_auth(&self) -> bool {
    matches!(self, OuraError::Auth(_) | OuraError::TokenRejected { .. })
  }

  pub fn status(&self) -> Option<u16> {
    match self {
      OuraError::TokenRejected { status, .. } | OuraError::Api { status, .. } => Some(*status),
      _ => None,
    }
  }
}

impl From<reqwest::Error> for OuraError {
  fn from(e: reqwest::Error) -> Self {
    OuraError::Request(e.to_string())
  }
}

async fn error_parts(response: Response) -> (u16, String) {
  let status = response.status().as_u16();
  let body = response.text().await.unwrap_or_default();
  (status, body)
}

/// ---------------------------------------------------------------------------
/// Client
/// ---------------------------------------------------------------------------

/// One instance per sync run or request; tokens are owned here, not global.
pub struct OuraClient {
  http: Client,
  config: OuraConfig,
  store: Arc<dyn TokenStore>,
  access_token: Option<String>,
  refresh_token: Option<String>,
  expires_at: Option<i64>,
}

impl OuraClient {
  /// Client seeded only from configuration.
  pub fn new(config: OuraConfig, store: Arc<dyn TokenStore>) -> Result<Self, OuraError> {
    let http = Client::builder().timeout(config.http_timeout).build()?;
    let access_token = config.access_token.clone();
    let refresh_token = config.refresh_token.clone();

    Ok(Self {
      http,
      config,
      store,
      access_token,
      refresh_token,
      expires_at: None,
    })
  }

  /// Client seeded from configuration, then overridden by the stored record.
  pub async fn from_store(config: OuraConfig, store: Arc<dyn TokenStore>) -> Result<Self, OuraError> {
    let mut client = Self::new(config, store)?;
    if let Some(record) = client.store.load().await? {
      tracing::debug!("Loaded Oura tokens from {}", client.store.describe());
      client.apply(&record);
    }
    Ok(client)
  }

  pub fn has_access_token(&self) -> bool {
    self.access_token.is_some()
  }

  pub fn has_refresh_token(&self) -> bool {
    self.refresh_token.is_some()
  }

  pub fn expires_at(&self) -> Option<i64> {
    self.expires_at
  }

  fn apply(&mut self, record: &TokenRecord) {
    self.access_token = Some(record.access_token.clone());
    if record.has_refresh_token() {
      self.refresh_token = Some(record.refresh_token.clone());
    }
    self.expires_at = Some(record.expires_at);
  }

  /// ---------------------------------------------------------------------------
  /// OAuth URL Generation
  /// ---------------------------------------------------------------------------

  /// The caller keeps `state` and must compare it with the value echoed back
  /// on the callback.
  pub fn authorization_url(&self, state: &str) -> Result<String, OuraError> {
    let mut url = url::Url::parse(&format!("{}/oauth/authorize", self.config.auth_base))
      .map_err(|e| OuraError::InvalidUrl(e.to_string()))?;

    url
      .query_pairs_mut()
      .append_pair("response_type", "code")
      .append_pair("client_id", &self.config.client_id)
      .append_pair("redirect_uri", &self.config.redirect_uri)
      .append_pair("scope", &self.config.scopes)
      .append_pair("state", state);

    Ok(url.to_string())
  }

  /// ---------------------------------------------------------------------------
  /// Token Exchange (Authorization Code -> Tokens)
  /// ---------------------------------------------------------------------------

  pub async fn exchange_code_for_token(&mut self, code: &str) -> Result<TokenRecord, OuraError> {
    let response = self
      .http
      .post(self.config.token_url())
      .form(&[
        ("grant_type", "authorization_code"),
        ("code", code),
        ("client_id", self.config.client_id.as_str()),
        ("client_secret", self.config.client_secret.as_str()),
        ("redirect_uri", self.config.redirect_uri.as_str()),
      ])
      .send()
      .await?;

    if !response.status().is_success() {
      let (status, body) = error_parts(response).await;
      tracing::error!("Oura code exchange failed with {}: {}", status, body);
      return Err(OuraError::TokenRejected { status, body });
    }

    let token_response: TokenResponse = response.json().await?;
    let record = TokenRecord::from_response(token_response, None, Utc::now());
    self.persist(&record).await?;

    tracing::info!("Oura authorization completed; token expires at {:?}", record.expires_at_utc());
    Ok(record)
  }

  /// ---------------------------------------------------------------------------
  /// Token Refresh
  /// ---------------------------------------------------------------------------

  /// A rejected refresh token is terminal for this token: the user has to go
  /// through the authorization flow again.
  pub async fn refresh_access_token(&mut self) -> Result<TokenRecord, OuraError> {
    let refresh_token = self
      .refresh_token
      .clone()
      .ok_or_else(|| OuraError::Auth("No refresh token available. Please re-authenticate.".into()))?;

    let response = self
      .http
      .post(self.config.token_url())
      .form(&[
        ("grant_type", "refresh_token"),
        ("refresh_token", refresh_token.as_str()),
        ("client_id", self.config.client_id.as_str()),
        ("client_secret", self.config.client_secret.as_str()),
      ])
      .send()
      .await?;

    if !response.status().is_success() {
      let (status, body) = error_parts(response).await;
      tracing::error!("Oura token refresh rejected with {}: {}", status, body);
      return Err(OuraError::TokenRejected { status, body });
    }

    let token_response: TokenResponse = response.json().await?;
    let record = TokenRecord::from_response(token_response, Some(&refresh_token), Utc::now());
    self.persist(&record).await?;

    tracing::info!("Refreshed Oura access token");
    Ok(record)
  }

  /// Refresh ahead of time when the known expiry is close. Returns whether a
  /// refresh happened. Tokens with unknown expiry are left to the 401 path.
  pub async fn ensure_fresh_token(&mut self) -> Result<bool, OuraError> {
    let Some(expires_at) = self.expires_at else {
      return Ok(false);
    };
    if !self.has_refresh_token() {
      return Ok(false);
    }

    if !expires_within_buffer(expires_at, Utc::now()) {
      return Ok(false);
    }

    tracing::info!("Oura access token expired or about to expire, refreshing");
    self.refresh_access_token().await?;
    Ok(true)
  }

  async fn persist(&mut self, record: &TokenRecord) -> Result<(), OuraError> {
    self.apply(record);
    self.store.save(record).await.map_err(|e| {
      tracing::error!("Could not persist Oura tokens to {}: {}", self.store.describe(), e);
      OuraError::Storage(e)
    })
  }

  /// ---------------------------------------------------------------------------
  /// Sleep Data Fetching
  /// ---------------------------------------------------------------------------

  /// Fetch sleep sessions for `[start_date, end_date]`, following
  /// `next_token` pages. A 401 triggers at most one refresh and one retry;
  /// a second 401 is an auth error.
  pub async fn get_sleep_sessions(
    &mut self,
    start_date: NaiveDate,
    end_date: NaiveDate,
    token: Option<&str>,
  ) -> Result<Vec<SleepSession>, OuraError> {
    let mut access_token = token
      .map(str::to_string)
      .or_else(|| self.access_token.clone())
      .ok_or_else(|| OuraError::Auth("No access token available. Please authenticate first.".into()))?;

    let mut refreshed = false;
    let mut next_token: Option<String> = None;
    let mut sessions = Vec::new();

    loop {
      let mut response = self
        .fetch_sleep_page(&access_token, start_date, end_date, next_token.as_deref())
        .await?;

      if response.status() == StatusCode::UNAUTHORIZED {
        if refreshed {
          return Err(OuraError::Auth(
            "Refreshed access token was rejected. Please re-authenticate.".into(),
          ));
        }
        if !self.has_refresh_token() {
          return Err(OuraError::Auth(
            "Access token was rejected and no refresh token is available.".into(),
          ));
        }

        tracing::info!("Oura access token rejected, refreshing");
        access_token = self.refresh_access_token().await?.access_token;
        refreshed = true;

        response = self
          .fetch_sleep_page(&access_token, start_date, end_date, next_token.as_deref())
          .await?;
        if response.status() == StatusCode::UNAUTHORIZED {
          return Err(OuraError::Auth(
            "Refreshed access token was rejected. Please re-authenticate.".into(),
          ));
        }
      }

      if !response.status().is_success() {
        let (status, body) = error_parts(response).await;
        return Err(OuraError::Api { status, body });
      }

      let page: SleepSessionsResponse = response.json().await?;
      sessions.extend(page.data);

      match page.next_token {
        Some(token) if !token.is_empty() => next_token = Some(token),
        _ => break,
      }
    }

    tracing::debug!("Fetched {} Oura sleep sessions", sessions.len());
    Ok(sessions)
  }

  async fn fetch_sleep_page(
    &self,
    access_token: &str,
    start_date: NaiveDate,
    end_date: NaiveDate,
    next_token: Option<&str>,
  ) -> Result<Response, OuraError> {
    let mut url = url::Url::parse(&format!("{}{}", self.config.api_base, SLEEP_PATH))
      .map_err(|e| OuraError::InvalidUrl(e.to_string()))?;

    {
      let mut query = url.query_pairs_mut();
      query
        .append_pair("start_date", &start_date.format("%Y-%m-%d").to_string())
        .append_pair("end_date", &end_date.format("%Y-%m-%d").to_string());
      if let Some(token) = next_token {
        query.append_pair("next_token", token);
      }
    }

    Ok(self.http.get(url).bearer_auth(access_token).send().await?)
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
