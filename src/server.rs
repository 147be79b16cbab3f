//! HTTP shell
//!
//! Thin routes over the runner and the job queue: health, OAuth redirect and
//! callback, manual trigger, last-run status. Everything but `/callback` sits
//! behind [`BasicAuth`] so the browser redirect from Oura is never challenged.

use actix_web::dev::Server;
use actix_web::{http::header, web, App, HttpResponse, HttpServer};
use serde::Deserialize;
use std::collections::HashSet;
use std::net::TcpListener;
use std::sync::Mutex;
use tracing_actix_web::TracingLogger;

use crate::middleware::BasicAuth;
use crate::oura::generate_state;
use crate::queue::{SyncQueue, Trigger};
use crate::runner::SyncRunner;
use crate::scheduler::describe_schedule;

pub struct AppState {
  pub runner: SyncRunner,
  pub queue: SyncQueue,
  /// OAuth `state` values issued by `/auth` and not yet used.
  issued_states: Mutex<HashSet<String>>,
}

impl AppState {
  pub fn new(runner: SyncRunner, queue: SyncQueue) -> Self {
    Self {
      runner,
      queue,
      issued_states: Mutex::new(HashSet::new()),
    }
  }

  fn issue_state(&self) -> String {
    let state = generate_state();
    if let Ok(mut issued) = self.issued_states.lock() {
      issued.insert(state.clone());
    }
    state
  }

  /// Single use: a matching state is consumed.
  fn take_state(&self, state: &str) -> bool {
    self
      .issued_states
      .lock()
      .map(|mut issued| issued.remove(state))
      .unwrap_or(false)
  }
}

pub fn run(listener: TcpListener, state: web::Data<AppState>) -> Result<Server, std::io::Error> {
  let server = HttpServer::new(move || {
    App::new()
      .wrap(TracingLogger::default())
      .app_data(state.clone())
      .configure(routes)
  })
  .listen(listener)?
  .run();

  Ok(server)
}

pub fn routes(cfg: &mut web::ServiceConfig) {
  cfg
    .route("/callback", web::get().to(callback))
    .service(web::resource("/").wrap(BasicAuth).route(web::get().to(health)))
    .service(web::resource("/auth").wrap(BasicAuth).route(web::get().to(auth)))
    .service(web::resource("/sync").wrap(BasicAuth).route(web::post().to(trigger_sync)))
    .service(web::resource("/status").wrap(BasicAuth).route(web::get().to(status)));
}

/// ---------------------------------------------------------------------------
/// Handlers
/// ---------------------------------------------------------------------------

async fn health(state: web::Data<AppState>) -> HttpResponse {
  let has_oura_token = match state.runner.has_oura_token().await {
    Ok(has) => has,
    Err(e) => {
      tracing::error!("Token store unavailable: {}", e);
      false
    }
  };
  let settings = state.runner.settings();
  let has_clockify_token = !settings.clockify.api_token.is_empty();
  let oura_status = if has_oura_token { "configured" } else { "needs_authentication" };
  let clockify_status = if has_clockify_token { "configured" } else { "needs_token" };

  HttpResponse::Ok().json(serde_json::json!({
    "name": "Oura Clockify Sync",
    "status": "healthy",
    "version": env!("CARGO_PKG_VERSION"),
    "authentication": {
      "oura": {
        "configured": has_oura_token,
        "status": oura_status,
      },
      "clockify": {
        "configured": has_clockify_token,
        "status": clockify_status,
      },
    },
    "schedule": {
      "expression": settings.sync.schedule,
      "description": describe_schedule(&settings.sync.schedule),
    },
    "syncDays": settings.sync.sync_days,
    "endpoints": {
      "health": "/",
      "auth": "/auth",
      "oauth-callback": "/callback",
      "sync": "/sync",
      "status": "/status",
    },
  }))
}

async fn auth(state: web::Data<AppState>) -> HttpResponse {
  let oura = match state.runner.oura_client().await {
    Ok(client) => client,
    Err(e) => return server_error("Failed to generate authentication URL", &e.to_string()),
  };

  match oura.authorization_url(&state.issue_state()) {
    Ok(url) => HttpResponse::Found()
      .insert_header((header::LOCATION, url))
      .finish(),
    Err(e) => server_error("Failed to generate authentication URL", &e.to_string()),
  }
}

#[derive(Debug, Deserialize)]
pub struct CallbackQuery {
  code: Option<String>,
  state: Option<String>,
  error: Option<String>,
}

async fn callback(state: web::Data<AppState>, query: web::Query<CallbackQuery>) -> HttpResponse {
  if let Some(error) = &query.error {
    tracing::warn!("Oura authorization denied: {}", error);
    return auth_failed(&format!("Error: {}", error));
  }

  let Some(code) = &query.code else {
    return auth_failed("No authorization code received");
  };

  match &query.state {
    Some(returned) if state.take_state(returned) => {}
    _ => {
      tracing::warn!("OAuth callback with unknown or missing state");
      return auth_failed("Invalid state parameter");
    }
  }

  let mut oura = match state.runner.oura_client().await {
    Ok(client) => client,
    Err(e) => return server_error("Failed to complete authentication", &e.to_string()),
  };
  if let Err(e) = oura.exchange_code_for_token(code).await {
    tracing::error!("❌ Token exchange failed: {}", e);
    return server_error("Failed to complete authentication", &e.to_string());
  }

  tracing::info!("✅ OAuth2 authentication successful");
  if let Err(e) = state.queue.enqueue(Trigger::Manual).await {
    tracing::error!("Could not queue sync after authentication: {}", e);
  }

  HttpResponse::Ok().content_type("text/html; charset=utf-8").body(
    "<h1>Authentication Successful!</h1>\
     <p>Your Oura account has been connected.</p>\
     <p>Sync job added to queue. Check the server logs for progress.</p>",
  )
}

async fn trigger_sync(state: web::Data<AppState>) -> HttpResponse {
  match state.runner.has_oura_token().await {
    Ok(true) => {}
    Ok(false) => {
      return HttpResponse::BadRequest().json(serde_json::json!({
        "error": "Oura access token not configured",
        "message": "Please authenticate with Oura first",
      }))
    }
    Err(e) => return server_error("Failed to add sync job", &e.to_string()),
  }

  match state.queue.enqueue(Trigger::Manual).await {
    Ok(job_id) => HttpResponse::Ok().json(serde_json::json!({
      "message": "Sync job added to queue",
      "status": "queued",
      "jobId": job_id,
    })),
    Err(e) => server_error("Failed to add sync job", &e.to_string()),
  }
}

async fn status(state: web::Data<AppState>) -> HttpResponse {
  HttpResponse::Ok().json(state.queue.status().await)
}

/// ---------------------------------------------------------------------------
/// Responses
/// ---------------------------------------------------------------------------

fn server_error(error: &str, message: &str) -> HttpResponse {
  HttpResponse::InternalServerError().json(serde_json::json!({
    "error": error,
    "message": message,
  }))
}

fn auth_failed(detail: &str) -> HttpResponse {
  HttpResponse::BadRequest()
    .content_type("text/html; charset=utf-8")
    .body(format!(
      "<h1>Authentication Failed</h1><p>{}</p>",
      escape_html(detail)
    ))
}

pub(crate) fn escape_html(raw: &str) -> String {
  raw
    .replace('&', "&amp;")
    .replace('<', "&lt;")
    .replace('>', "&gt;")
    .replace('"', "&quot;")
    .replace('\'', "&#39;")
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{BasicAuthCredentials, Settings};
  use crate::queue::{JobHandler, SyncJob};
  use crate::sync::{SyncError, SyncResult};
  use crate::test_utils::*;
  use crate::token_store::{MemoryTokenStore, TokenStore};
  use actix_web::{http::StatusCode, test};
  use async_trait::async_trait;
  use base64::{engine::general_purpose::STANDARD, Engine as _};
  use std::sync::Arc;

  struct Noop;

  #[async_trait]
  impl JobHandler for Noop {
    async fn handle(&self, _job: &SyncJob) -> Result<SyncResult, SyncError> {
      Ok(SyncResult::default())
    }
  }

  fn app_state(base: &str, store: Arc<dyn TokenStore>) -> web::Data<AppState> {
    state_with_settings(mock_settings(base), store)
  }

  fn state_with_settings(settings: Settings, store: Arc<dyn TokenStore>) -> web::Data<AppState> {
    let runner = SyncRunner::new(Arc::new(settings), store);
    let (queue, _worker) = SyncQueue::start(Arc::new(Noop));
    web::Data::new(AppState::new(runner, queue))
  }

  fn guarded_state() -> web::Data<AppState> {
    let mut settings = mock_settings("http://127.0.0.1:1");
    settings.server.basic_auth = Some(BasicAuthCredentials {
      username: "admin".into(),
      password: "hunter2".into(),
    });
    state_with_settings(settings, Arc::new(MemoryTokenStore::default()))
  }

  fn basic(username: &str, password: &str) -> (header::HeaderName, String) {
    let encoded = STANDARD.encode(format!("{}:{}", username, password));
    (header::AUTHORIZATION, format!("Basic {}", encoded))
  }

  async fn wait_for_jobs(state: &web::Data<AppState>, count: usize) {
    for _ in 0..200 {
      if state.queue.status().await.jobs_processed >= count {
        return;
      }
      tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    }
    panic!("queued job was not processed");
  }

  #[actix_web::test]
  async fn test_health_reports_auth_status() {
    let state = app_state("http://127.0.0.1:1", Arc::new(MemoryTokenStore::default()));
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get().uri("/").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["authentication"]["oura"]["configured"], false);
    assert_eq!(body["authentication"]["clockify"]["configured"], true);
    assert_eq!(body["schedule"]["description"], "Every hour");
  }

  #[actix_web::test]
  async fn test_manual_sync_requires_token() {
    let state = app_state("http://127.0.0.1:1", Arc::new(MemoryTokenStore::default()));
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::post().uri("/sync").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[actix_web::test]
  async fn test_manual_sync_is_queued() {
    let store = Arc::new(MemoryTokenStore::with_record(mock_token_record("a", "r")));
    let state = app_state("http://127.0.0.1:1", store);
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::post().uri("/sync").to_request();
    let body: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(body["status"], "queued");
    assert!(uuid::Uuid::parse_str(body["jobId"].as_str().unwrap()).is_ok());

    wait_for_jobs(&state, 1).await;
    let req = test::TestRequest::get().uri("/status").to_request();
    let status: serde_json::Value = test::call_and_read_body_json(&app, req).await;
    assert_eq!(status["lastRun"]["state"], "completed");
    assert_eq!(status["lastRun"]["triggeredBy"], "manual");
    assert_eq!(status["lastRun"]["jobId"], body["jobId"]);
  }

  #[actix_web::test]
  async fn test_auth_redirects_with_state() {
    let state = app_state("https://auth.example", Arc::new(MemoryTokenStore::default()));
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get().uri("/auth").to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::FOUND);

    let location = resp.headers().get(header::LOCATION).unwrap().to_str().unwrap();
    let url = url::Url::parse(location).unwrap();
    let issued = url
      .query_pairs()
      .find(|(k, _)| k == "state")
      .map(|(_, v)| v.into_owned())
      .unwrap();
    assert!(state.take_state(&issued));
  }

  #[actix_web::test]
  async fn test_callback_rejects_error_missing_code_and_bad_state() {
    let state = app_state("http://127.0.0.1:1", Arc::new(MemoryTokenStore::default()));
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    for uri in [
      "/callback?error=access_denied",
      "/callback?state=abc",
      "/callback?code=xyz&state=never-issued",
      "/callback?code=xyz",
    ] {
      let req = test::TestRequest::get().uri(uri).to_request();
      let resp = test::call_service(&app, req).await;
      assert_eq!(resp.status(), StatusCode::BAD_REQUEST, "{}", uri);
    }
  }

  #[actix_web::test]
  async fn test_callback_escapes_error_text() {
    let state = app_state("http://127.0.0.1:1", Arc::new(MemoryTokenStore::default()));
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get()
      .uri("/callback?error=%3Cscript%3E")
      .to_request();
    let body = test::call_and_read_body(&app, req).await;
    let body = String::from_utf8(body.to_vec()).unwrap();
    assert!(body.contains("&lt;script&gt;"));
  }

  #[actix_web::test]
  async fn test_callback_exchanges_code_and_queues_sync() {
    let mut server = mockito::Server::new_async().await;
    let exchange = server
      .mock("POST", "/oauth/token")
      .with_status(200)
      .with_body(r#"{"access_token":"fresh","token_type":"Bearer","expires_in":86400,"refresh_token":"r"}"#)
      .expect(1)
      .create_async()
      .await;

    let store = Arc::new(MemoryTokenStore::default());
    let state = app_state(&server.url(), store.clone());
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let issued = state.issue_state();
    let req = test::TestRequest::get()
      .uri(&format!("/callback?code=the-code&state={}", issued))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
    assert_eq!(store.load().await.unwrap().unwrap().access_token, "fresh");
    exchange.assert_async().await;

    wait_for_jobs(&state, 1).await;

    // State values are single use.
    let req = test::TestRequest::get()
      .uri(&format!("/callback?code=the-code&state={}", issued))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }

  #[actix_web::test]
  async fn test_routes_require_basic_auth_when_configured() {
    let state = guarded_state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    for (method, uri) in [("GET", "/"), ("GET", "/auth"), ("POST", "/sync"), ("GET", "/status")] {
      let req = match method {
        "POST" => test::TestRequest::post(),
        _ => test::TestRequest::get(),
      }
      .uri(uri)
      .to_request();
      let resp = test::call_service(&app, req).await;
      assert_eq!(resp.status(), StatusCode::UNAUTHORIZED, "{} {}", method, uri);
      assert!(resp.headers().contains_key(header::WWW_AUTHENTICATE));
    }

    let req = test::TestRequest::get()
      .uri("/status")
      .insert_header(basic("admin", "wrong"))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
  }

  #[actix_web::test]
  async fn test_valid_credentials_are_let_through() {
    let state = guarded_state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    let req = test::TestRequest::get()
      .uri("/")
      .insert_header(basic("admin", "hunter2"))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);

    let req = test::TestRequest::get()
      .uri("/status")
      .insert_header(basic("admin", "hunter2"))
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::OK);
  }

  #[actix_web::test]
  async fn test_callback_is_not_behind_basic_auth() {
    let state = guarded_state();
    let app = test::init_service(App::new().app_data(state.clone()).configure(routes)).await;

    // No credentials: the handler itself answers (400 for a bad state), not the guard.
    let req = test::TestRequest::get()
      .uri("/callback?code=xyz&state=never-issued")
      .to_request();
    let resp = test::call_service(&app, req).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
  }
}
