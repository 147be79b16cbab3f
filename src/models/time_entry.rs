use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Deserialize)]
pub struct ClockifyUser {
  pub id: String,
  #[serde(default)]
  pub email: String,
  #[serde(default)]
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ClockifyWorkspace {
  pub id: String,
  pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockifyProject {
  pub id: String,
  pub name: String,
  #[serde(default)]
  pub workspace_id: Option<String>,
  #[serde(default)]
  pub archived: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct CreateProjectRequest {
  pub name: String,
  pub color: String,
  pub note: String,
  pub billable: bool,
  pub public: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TimeInterval {
  #[serde(default)]
  pub start: Option<DateTime<Utc>>,
  #[serde(default)]
  pub end: Option<DateTime<Utc>>,
  #[serde(default)]
  pub duration: Option<String>,
}

/// A Clockify time entry. Descriptions can come back as `null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TimeEntry {
  pub id: String,
  #[serde(default, deserialize_with = "null_as_empty")]
  pub description: String,
  #[serde(default)]
  pub time_interval: TimeInterval,
  #[serde(default)]
  pub billable: bool,
  #[serde(default)]
  pub project_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateTimeEntryRequest {
  pub start: DateTime<Utc>,
  pub end: DateTime<Utc>,
  pub billable: bool,
  pub description: String,
  #[serde(skip_serializing_if = "Option::is_none")]
  pub project_id: Option<String>,
}

fn null_as_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
  D: serde::Deserializer<'de>,
{
  Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}
