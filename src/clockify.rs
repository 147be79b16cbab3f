//! Clockify integration for sleep time entries
//!
//! The client resolves the user, workspace and sleep project once via
//! `initialize()`. Every other operation needs that context and fails with
//! `ClockifyError::NotInitialized` without it.

use chrono::NaiveDate;
use reqwest::{Client, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use std::time::Duration;

use crate::config::{self, ConfigError};
use crate::models::{
  ClockifyProject, ClockifyUser, ClockifyWorkspace, CreateProjectRequest, CreateTimeEntryRequest,
  TimeEntry,
};

/// ---------------------------------------------------------------------------
/// Configuration Constants
/// ---------------------------------------------------------------------------

const DEFAULT_API_BASE: &str = "https://api.clockify.me/api";
const DEFAULT_PROJECT_NAME: &str = "Sleep";
const PROJECT_COLOR: &str = "#4A90E2";
const PROJECT_NOTE: &str = "Sleep tracking data from Oura";
const PAGE_SIZE: usize = 1000;
const PAGE_DELAY: Duration = Duration::from_millis(20);

#[derive(Debug, Clone)]
pub struct ClockifyConfig {
  pub api_token: String,
  pub api_base: String,
  pub project_name: String,
  /// Pause between the setup calls in `initialize`.
  pub api_delay: Duration,
  pub http_timeout: Duration,
}

impl ClockifyConfig {
  pub fn from_env() -> Result<Self, ConfigError> {
    Ok(Self {
      api_token: config::required("CLOCKIFY_API_TOKEN")?,
      api_base: config::optional("CLOCKIFY_API_BASE")
        .unwrap_or_else(|| DEFAULT_API_BASE.into())
        .trim_end_matches('/')
        .to_string(),
      project_name: config::optional("SLEEP_PROJECT_NAME").unwrap_or_else(|| DEFAULT_PROJECT_NAME.into()),
      api_delay: config::api_delay_from_env()?,
      http_timeout: config::http_timeout_from_env()?,
    })
  }
}

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ClockifyError {
  #[error("Clockify API error {status}: {body}")]
  Api { status: u16, body: String },

  #[error("Clockify client not initialized")]
  NotInitialized,

  #[error("No Clockify workspaces found")]
  NoWorkspace,

  #[error("HTTP request failed: {0}")]
  Request(String),
}

impl ClockifyError {
  pub fn status(&self) -> Option<u16> {
    match self {
      ClockifyError::Api { status, .. } => Some(*status),
      _ => None,
    }
  }

  pub fn is_rate_limited(&self) -> bool {
    self.status() == Some(429)
  }
}

impl From<reqwest::Error> for ClockifyError {
  fn from(e: reqwest::Error) -> Self {
    ClockifyError::Request(e.to_string())
  }
}

/// ---------------------------------------------------------------------------
/// Client
/// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub struct ClockifyContext {
  pub user_id: String,
  pub workspace_id: String,
  pub workspace_name: String,
  pub project_id: Option<String>,
}

pub struct ClockifyClient {
  http: Client,
  config: ClockifyConfig,
  context: Option<ClockifyContext>,
}

impl ClockifyClient {
  pub fn new(config: ClockifyConfig) -> Result<Self, ClockifyError> {
    let http = Client::builder().timeout(config.http_timeout).build()?;
    Ok(Self {
      http,
      config,
      context: None,
    })
  }

  pub fn context(&self) -> Option<&ClockifyContext> {
    self.context.as_ref()
  }

  fn require_context(&self) -> Result<&ClockifyContext, ClockifyError> {
    self.context.as_ref().ok_or(ClockifyError::NotInitialized)
  }

  fn url(&self, path: &str) -> String {
    format!("{}{}", self.config.api_base, path)
  }

  fn with_key(&self, request: RequestBuilder) -> RequestBuilder {
    request.header("X-Api-Key", &self.config.api_token)
  }

  async fn check(response: Response) -> Result<Response, ClockifyError> {
    if response.status().is_success() {
      return Ok(response);
    }
    let status = response.status().as_u16();
    let body = response.text().await.unwrap_or_default();
    Err(ClockifyError::Api { status, body })
  }

  async fn get_json<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClockifyError> {
    let response = self.with_key(self.http.get(self.url(path))).send().await?;
    Ok(Self::check(response).await?.json().await?)
  }

  async fn pause(&self) {
    if !self.config.api_delay.is_zero() {
      tokio::time::sleep(self.config.api_delay).await;
    }
  }

  /// ---------------------------------------------------------------------------
  /// Setup
  /// ---------------------------------------------------------------------------

  /// Resolve user, first workspace and the sleep project (created if absent).
  pub async fn initialize(&mut self) -> Result<&ClockifyContext, ClockifyError> {
    let user: ClockifyUser = self.get_json("/v1/user").await?;
    tracing::info!("📋 Clockify user: {} ({})", user.name, user.email);
    self.pause().await;

    let workspaces: Vec<ClockifyWorkspace> = self.get_json("/v1/workspaces").await?;
    let workspace = workspaces.into_iter().next().ok_or(ClockifyError::NoWorkspace)?;
    tracing::info!("📁 Using Clockify workspace: {}", workspace.name);
    self.pause().await;

    let project_id = self.find_or_create_project(&workspace.id).await?;

    self.context = Some(ClockifyContext {
      user_id: user.id,
      workspace_id: workspace.id,
      workspace_name: workspace.name,
      project_id: Some(project_id),
    });
    self.require_context()
  }

  async fn find_or_create_project(&self, workspace_id: &str) -> Result<String, ClockifyError> {
    let projects: Vec<ClockifyProject> = self
      .get_json(&format!("/v1/workspaces/{}/projects?archived=false", workspace_id))
      .await?;

    let wanted = self.config.project_name.to_lowercase();
    if let Some(project) = projects.into_iter().find(|p| p.name.to_lowercase() == wanted) {
      tracing::info!("📂 Using existing project: {}", project.name);
      return Ok(project.id);
    }

    self.pause().await;
    let request = CreateProjectRequest {
      name: self.config.project_name.clone(),
      color: PROJECT_COLOR.into(),
      note: PROJECT_NOTE.into(),
      billable: false,
      public: false,
    };
    let response = self
      .with_key(self.http.post(self.url(&format!("/v1/workspaces/{}/projects", workspace_id))))
      .json(&request)
      .send()
      .await?;
    let project: ClockifyProject = Self::check(response).await?.json().await?;

    tracing::info!("📂 Created new project: {}", project.name);
    Ok(project.id)
  }

  /// ---------------------------------------------------------------------------
  /// Time Entries
  /// ---------------------------------------------------------------------------

  /// All of the user's entries from `start_date` 00:00:00Z to `end_date`
  /// 23:59:59Z, fetched page by page until a short page.
  pub async fn list_time_entries(
    &self,
    start_date: NaiveDate,
    end_date: NaiveDate,
  ) -> Result<Vec<TimeEntry>, ClockifyError> {
    let context = self.require_context()?;
    let path = format!(
      "/v1/workspaces/{}/user/{}/time-entries",
      context.workspace_id, context.user_id
    );
    let start = format!("{}T00:00:00Z", start_date.format("%Y-%m-%d"));
    let end = format!("{}T23:59:59Z", end_date.format("%Y-%m-%d"));

    let mut entries = Vec::new();
    let mut page = 1u32;
    loop {
      let page_param = page.to_string();
      let page_size = PAGE_SIZE.to_string();
      let response = self
        .with_key(self.http.get(self.url(&path)))
        .query(&[
          ("start", start.as_str()),
          ("end", end.as_str()),
          ("page-size", page_size.as_str()),
          ("page", page_param.as_str()),
        ])
        .send()
        .await?;
      let batch: Vec<TimeEntry> = Self::check(response).await?.json().await?;
      let fetched = batch.len();
      entries.extend(batch);

      if fetched < PAGE_SIZE {
        break;
      }
      page += 1;
      tokio::time::sleep(PAGE_DELAY).await;
    }

    tracing::debug!("Fetched {} Clockify time entries", entries.len());
    Ok(entries)
  }

  pub async fn create_time_entry(
    &self,
    mut request: CreateTimeEntryRequest,
  ) -> Result<TimeEntry, ClockifyError> {
    let context = self.require_context()?;
    if let Some(project_id) = &context.project_id {
      request.project_id = Some(project_id.clone());
    }

    let response = self
      .with_key(
        self
          .http
          .post(self.url(&format!("/v1/workspaces/{}/time-entries", context.workspace_id))),
      )
      .json(&request)
      .send()
      .await?;
    Ok(Self::check(response).await?.json().await?)
  }

  pub async fn delete_time_entry(&self, entry_id: &str) -> Result<(), ClockifyError> {
    let context = self.require_context()?;
    let response = self
      .with_key(self.http.delete(self.url(&format!(
        "/v1/workspaces/{}/time-entries/{}",
        context.workspace_id, entry_id
      ))))
      .send()
      .await?;
    Self::check(response).await?;
    Ok(())
  }
}

/// True iff some entry's description carries `[Oura:<session_id>]`.
pub fn is_session_synced(session_id: &str, existing: &[TimeEntry]) -> bool {
  let marker = crate::sync::session_marker(session_id);
  existing.iter().any(|entry| entry.description.contains(&marker))
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
