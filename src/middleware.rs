//! HTTP Basic Auth for the server shell.
//!
//! Credentials come from [`ServerConfig::basic_auth`] via the shared
//! [`AppState`]; when none are configured requests pass straight through.
//!
//! [`ServerConfig::basic_auth`]: crate::config::ServerConfig

use actix_web::body::EitherBody;
use actix_web::dev::{forward_ready, Service, ServiceRequest, ServiceResponse, Transform};
use actix_web::{http::header, web, Error, HttpResponse};
use base64::{engine::general_purpose::STANDARD, Engine as _};
use futures_util::future::LocalBoxFuture;
use std::future::{ready, Ready};

use crate::config::BasicAuthCredentials;
use crate::server::AppState;

const REALM: &str = r#"Basic realm="oura-clockify-sync""#;

/// Decode an `Authorization: Basic ...` header value into `(username, password)`.
pub fn parse_basic_auth(value: &str) -> Option<(String, String)> {
  let encoded = value.strip_prefix("Basic ")?.trim();
  let decoded = STANDARD.decode(encoded).ok()?;
  let decoded = String::from_utf8(decoded).ok()?;
  let (username, password) = decoded.split_once(':')?;
  Some((username.to_string(), password.to_string()))
}

fn is_authorized(req: &ServiceRequest, expected: &BasicAuthCredentials) -> bool {
  req
    .headers()
    .get(header::AUTHORIZATION)
    .and_then(|value| value.to_str().ok())
    .and_then(parse_basic_auth)
    .map(|(username, password)| username == expected.username && password == expected.password)
    .unwrap_or(false)
}

fn expected_credentials(req: &ServiceRequest) -> Option<BasicAuthCredentials> {
  req
    .app_data::<web::Data<AppState>>()
    .and_then(|state| state.runner.settings().server.basic_auth.clone())
}

// Middleware factory
pub struct BasicAuth;

impl<S, B> Transform<S, ServiceRequest> for BasicAuth
where
  S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
  S::Future: 'static,
  B: 'static,
{
  type Response = ServiceResponse<EitherBody<B>>;
  type Error = Error;
  type Transform = BasicAuthService<S>;
  type InitError = ();
  type Future = Ready<Result<Self::Transform, Self::InitError>>;

  fn new_transform(&self, service: S) -> Self::Future {
    ready(Ok(BasicAuthService { service }))
  }
}

pub struct BasicAuthService<S> {
  service: S,
}

impl<S, B> Service<ServiceRequest> for BasicAuthService<S>
where
  S: Service<ServiceRequest, Response = ServiceResponse<B>, Error = Error>,
  S::Future: 'static,
  B: 'static,
{
  type Response = ServiceResponse<EitherBody<B>>;
  type Error = Error;
  type Future = LocalBoxFuture<'static, Result<Self::Response, Self::Error>>;

  forward_ready!(service);

  fn call(&self, req: ServiceRequest) -> Self::Future {
    if let Some(expected) = expected_credentials(&req) {
      if !is_authorized(&req, &expected) {
        tracing::warn!("Rejected unauthenticated request to {}", req.path());
        let response = HttpResponse::Unauthorized()
          .insert_header((header::WWW_AUTHENTICATE, REALM))
          .json(serde_json::json!({ "error": "Unauthorized" }));
        let res = req.into_response(response).map_into_right_body();
        return Box::pin(async move { Ok(res) });
      }
    }

    let fut = self.service.call(req);
    Box::pin(async move {
      let res = fut.await?;
      Ok(res.map_into_left_body())
    })
  }
}
