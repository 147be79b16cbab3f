use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

const TOKEN_REFRESH_BUFFER_MINUTES: i64 = 5;

/// Response from the Oura token endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct TokenResponse {
  pub access_token: String,
  #[serde(default = "default_token_type")]
  pub token_type: String,
  pub expires_in: i64, // seconds
  #[serde(default)]
  pub refresh_token: Option<String>,
  #[serde(default)]
  pub scope: Option<String>,
}

fn default_token_type() -> String {
  "Bearer".to_string()
}

/// Persisted token state. `expires_at` is absolute epoch milliseconds, which
/// keeps the on-disk JSON compatible with records written by older tooling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenRecord {
  pub access_token: String,
  pub refresh_token: String,
  pub expires_at: i64,
  pub token_type: String,
  #[serde(default)]
  pub scope: Option<String>,
}

impl TokenRecord {
  /// Build a record from a token response. Oura may omit the refresh token on
  /// refresh; the previous one is kept in that case.
  pub fn from_response(resp: TokenResponse, previous_refresh: Option<&str>, now: DateTime<Utc>) -> Self {
    let expires_at = (now + Duration::seconds(resp.expires_in)).timestamp_millis();
    let refresh_token = resp
      .refresh_token
      .filter(|t| !t.is_empty())
      .or_else(|| previous_refresh.map(str::to_string))
      .unwrap_or_default();

    Self {
      access_token: resp.access_token,
      refresh_token,
      expires_at,
      token_type: resp.token_type,
      scope: resp.scope,
    }
  }

  pub fn expires_at_utc(&self) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp_millis(self.expires_at)
  }

  pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
    now.timestamp_millis() >= self.expires_at
  }

  pub fn needs_refresh_at(&self, now: DateTime<Utc>) -> bool {
    expires_within_buffer(self.expires_at, now)
  }

  pub fn needs_refresh(&self) -> bool {
    self.needs_refresh_at(Utc::now())
  }

  pub fn has_refresh_token(&self) -> bool {
    !self.refresh_token.is_empty()
  }
}

/// True when `expires_at` (epoch ms) falls inside the refresh buffer.
pub fn expires_within_buffer(expires_at: i64, now: DateTime<Utc>) -> bool {
  let buffer = Duration::minutes(TOKEN_REFRESH_BUFFER_MINUTES);
  (now + buffer).timestamp_millis() >= expires_at
}

/// First characters of a secret, for log lines.
pub fn token_preview(token: &str) -> String {
  let prefix: String = token.chars().take(8).collect();
  format!("{}…", prefix)
}

#[cfg(test)]
mod tests {
  use super::*;

  fn fixed_now() -> DateTime<Utc> {
    "2024-03-01T12:00:00Z".parse().unwrap()
  }

  fn response(refresh: Option<&str>) -> TokenResponse {
    TokenResponse {
      access_token: "access-new".into(),
      token_type: "Bearer".into(),
      expires_in: 86400,
      refresh_token: refresh.map(str::to_string),
      scope: Some("daily".into()),
    }
  }

  #[test]
  fn test_from_response_computes_absolute_expiry() {
    let record = TokenRecord::from_response(response(Some("refresh-new")), None, fixed_now());
    assert_eq!(record.expires_at, fixed_now().timestamp_millis() + 86_400_000);
    assert_eq!(record.refresh_token, "refresh-new");
    assert_eq!(record.expires_at_utc(), Some(fixed_now() + Duration::days(1)));
  }

  #[test]
  fn test_from_response_keeps_previous_refresh_token() {
    let record = TokenRecord::from_response(response(None), Some("refresh-old"), fixed_now());
    assert_eq!(record.refresh_token, "refresh-old");

    let record = TokenRecord::from_response(response(Some("")), Some("refresh-old"), fixed_now());
    assert_eq!(record.refresh_token, "refresh-old");
  }

  #[test]
  fn test_needs_refresh_inside_buffer() {
    let mut record = TokenRecord::from_response(response(Some("r")), None, fixed_now());
    assert!(!record.needs_refresh_at(fixed_now()));
    assert!(!record.is_expired_at(fixed_now()));

    record.expires_at = (fixed_now() + Duration::minutes(3)).timestamp_millis();
    assert!(record.needs_refresh_at(fixed_now()));
    assert!(!record.is_expired_at(fixed_now()));
  }

  #[test]
  fn test_record_json_shape() {
    let record = TokenRecord::from_response(response(Some("r")), None, fixed_now());
    let value = serde_json::to_value(&record).unwrap();
    for key in ["access_token", "refresh_token", "expires_at", "token_type", "scope"] {
      assert!(value.get(key).is_some(), "missing {}", key);
    }
    assert!(value["expires_at"].is_i64());
  }

  #[test]
  fn test_token_preview_truncates() {
    assert_eq!(token_preview("abcdefghijkl"), "abcdefgh…");
    assert_eq!(token_preview("abc"), "abc…");
  }
}
