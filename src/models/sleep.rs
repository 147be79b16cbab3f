use chrono::{DateTime, FixedOffset, NaiveDate};
use serde::{Deserialize, Serialize};

/// One sleep period as returned by Oura's `/v2/usercollection/sleep`.
/// Durations are in seconds.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SleepSession {
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub id: Option<String>,
  pub day: NaiveDate,
  pub bedtime_start: DateTime<FixedOffset>,
  pub bedtime_end: DateTime<FixedOffset>,
  pub total_sleep_duration: i64,
  pub efficiency: u8,
  #[serde(default, rename = "type", skip_serializing_if = "Option::is_none")]
  pub period_type: Option<String>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub score: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub rem_sleep_duration: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub deep_sleep_duration: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub light_sleep_duration: Option<i64>,
  #[serde(default, skip_serializing_if = "Option::is_none")]
  pub awake_time: Option<i64>,
}

#[derive(Debug, Deserialize)]
pub struct SleepSessionsResponse {
  pub data: Vec<SleepSession>,
  #[serde(default)]
  pub next_token: Option<String>,
}
