use std::io::{Read, Write};
use std::net::TcpListener;
use std::time::{Duration as StdDuration, Instant};

use super::CommandError;
use crate::models::token::token_preview;
use crate::oura::generate_state;
use crate::runner::SyncRunner;
use crate::server::escape_html;

/// ---------------------------------------------------------------------------
/// OAuth Callback Server
/// ---------------------------------------------------------------------------

#[derive(Debug, PartialEq)]
pub struct CallbackParams {
  pub code: String,
  pub state: Option<String>,
}

/// Bind address for the one-shot callback listener, taken from the redirect URI.
pub fn callback_address(redirect_uri: &str) -> Result<String, CommandError> {
  let url = url::Url::parse(redirect_uri)
    .map_err(|e| CommandError::Callback(format!("Invalid REDIRECT_URI {}: {}", redirect_uri, e)))?;
  let host = url.host_str().unwrap_or("127.0.0.1");
  let host = if host == "localhost" { "127.0.0.1" } else { host };
  let port = url
    .port_or_known_default()
    .ok_or_else(|| CommandError::Callback("REDIRECT_URI has no port".into()))?;
  Ok(format!("{}:{}", host, port))
}

/// Accept connections until one carries `code` or `error`, or the timeout passes.
pub fn wait_for_callback(listener: TcpListener, timeout: StdDuration) -> Result<CallbackParams, CommandError> {
  listener.set_nonblocking(true)?;
  let start = Instant::now();

  loop {
    if start.elapsed() > timeout {
      return Err(CommandError::Callback("Callback timeout - no response received".into()));
    }

    match listener.accept() {
      Ok((mut stream, _)) => {
        stream.set_nonblocking(false)?;
        if let Some(outcome) = handle_connection(&mut stream) {
          return outcome;
        }
      }
      Err(ref e) if e.kind() == std::io::ErrorKind::WouldBlock => {
        std::thread::sleep(StdDuration::from_millis(100));
      }
      Err(e) => return Err(e.into()),
    }
  }
}

/// Answer one connection. `None` means it was not the callback and the
/// listener should keep waiting.
fn handle_connection<S: Read + Write>(stream: &mut S) -> Option<Result<CallbackParams, CommandError>> {
  let mut buffer = [0; 4096];
  let read = match stream.read(&mut buffer) {
    Ok(read) => read,
    Err(e) => {
      tracing::warn!("Could not read callback request: {}", e);
      write_not_found(stream);
      return None;
    }
  };
  let request = String::from_utf8_lossy(&buffer[..read]);

  match parse_callback_request(&request) {
    Some(CallbackQuery { error: Some(error), .. }) => {
      write_page(stream, "Authentication Failed", &format!("Error: {}", error));
      Some(Err(CommandError::Callback(error)))
    }
    Some(CallbackQuery {
      code: Some(code),
      state,
      ..
    }) => {
      write_page(
        stream,
        "Oura Connected!",
        "You can close this window and return to the terminal.",
      );
      Some(Ok(CallbackParams { code, state }))
    }
    // Favicon requests and other noise.
    _ => {
      write_not_found(stream);
      None
    }
  }
}

#[derive(Debug, Default)]
struct CallbackQuery {
  code: Option<String>,
  state: Option<String>,
  error: Option<String>,
}

/// Parse the request line of `GET /callback?... HTTP/1.1`.
fn parse_callback_request(request: &str) -> Option<CallbackQuery> {
  let target = request.lines().next()?.split_whitespace().nth(1)?;
  let url = url::Url::parse(&format!("http://localhost{}", target)).ok()?;
  if url.path() != "/callback" {
    return None;
  }

  let mut query = CallbackQuery::default();
  for (key, value) in url.query_pairs() {
    match key.as_ref() {
      "code" => query.code = Some(value.into_owned()),
      "state" => query.state = Some(value.into_owned()),
      "error" => query.error = Some(value.into_owned()),
      _ => {}
    }
  }
  Some(query)
}

fn write_not_found(stream: &mut impl Write) {
  let _ = stream.write_all(b"HTTP/1.1 404 Not Found\r\nContent-Length: 0\r\n\r\n");
}

fn write_page(stream: &mut impl Write, title: &str, message: &str) {
  let body = format!(
    "<html><body><h1>{}</h1><p>{}</p></body></html>",
    escape_html(title),
    escape_html(message)
  );
  let response = format!(
    "HTTP/1.1 200 OK\r\nContent-Type: text/html; charset=utf-8\r\nContent-Length: {}\r\n\r\n{}",
    body.len(),
    body
  );
  let _ = stream.write_all(response.as_bytes());
  let _ = stream.flush();
}

/// ---------------------------------------------------------------------------
/// Command
/// ---------------------------------------------------------------------------

/// Interactive authorization: print the URL, wait for the browser redirect,
/// check `state`, exchange the code and persist the tokens.
pub async fn run(runner: SyncRunner, timeout: StdDuration) -> Result<(), CommandError> {
  let mut oura = runner.oura_client().await?;
  let state = generate_state();
  let url = oura.authorization_url(&state)?;

  let address = callback_address(&runner.settings().oura.redirect_uri)?;
  let listener = TcpListener::bind(&address)?;

  println!("Open this URL in your browser to authorize Oura:\n\n  {}\n", url);
  tracing::info!("Listening for OAuth callback on {}", address);

  let params = tokio::task::spawn_blocking(move || wait_for_callback(listener, timeout))
    .await
    .map_err(|e| CommandError::Callback(e.to_string()))??;

  if params.state.as_deref() != Some(state.as_str()) {
    return Err(CommandError::Callback("State mismatch; possible CSRF, aborting".into()));
  }

  let record = oura.exchange_code_for_token(&params.code).await?;
  println!(
    "✅ Oura connected. Access token {} stored in {}",
    token_preview(&record.access_token),
    runner.store().describe()
  );
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::io::BufRead;
  use std::net::TcpStream;

  /// In-memory connection; `request: None` makes every read fail.
  struct MemoryStream {
    request: Option<Vec<u8>>,
    written: Vec<u8>,
  }

  impl MemoryStream {
    fn new(request: &str) -> Self {
      Self {
        request: Some(request.as_bytes().to_vec()),
        written: Vec::new(),
      }
    }

    fn broken() -> Self {
      Self {
        request: None,
        written: Vec::new(),
      }
    }

    fn response(&self) -> String {
      String::from_utf8_lossy(&self.written).into_owned()
    }
  }

  impl Read for MemoryStream {
    fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
      match &self.request {
        Some(request) => {
          let n = request.len().min(buf.len());
          buf[..n].copy_from_slice(&request[..n]);
          Ok(n)
        }
        None => Err(std::io::Error::new(std::io::ErrorKind::ConnectionReset, "reset by peer")),
      }
    }
  }

  impl Write for MemoryStream {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.written.extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  fn send(address: std::net::SocketAddr, target: &str) -> String {
    let mut stream = TcpStream::connect(address).unwrap();
    write!(stream, "GET {} HTTP/1.1\r\nHost: localhost\r\n\r\n", target).unwrap();
    let mut status = String::new();
    std::io::BufReader::new(stream).read_line(&mut status).unwrap();
    status
  }

  #[test]
  fn test_callback_address_from_redirect_uri() {
    assert_eq!(callback_address("http://localhost:5555/callback").unwrap(), "127.0.0.1:5555");
    assert_eq!(callback_address("http://0.0.0.0:8080/callback").unwrap(), "0.0.0.0:8080");
    assert!(callback_address("not a url").is_err());
  }

  #[test]
  fn test_parse_callback_request() {
    let query = parse_callback_request("GET /callback?code=abc%20d&state=s1 HTTP/1.1\r\n").unwrap();
    assert_eq!(query.code.as_deref(), Some("abc d"));
    assert_eq!(query.state.as_deref(), Some("s1"));
    assert!(parse_callback_request("GET /favicon.ico HTTP/1.1\r\n").is_none());
    assert!(parse_callback_request("").is_none());
  }

  #[test]
  fn test_wait_for_callback_skips_noise_and_returns_code() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();

    let client = std::thread::spawn(move || {
      let noise = send(address, "/favicon.ico");
      let done = send(address, "/callback?code=the-code&state=xyz");
      (noise, done)
    });

    let params = wait_for_callback(listener, StdDuration::from_secs(5)).unwrap();
    assert_eq!(
      params,
      CallbackParams {
        code: "the-code".into(),
        state: Some("xyz".into())
      }
    );

    let (noise, done) = client.join().unwrap();
    assert!(noise.contains("404"));
    assert!(done.contains("200"));
  }

  #[test]
  fn test_wait_for_callback_reports_denied_access() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    let address = listener.local_addr().unwrap();
    let client = std::thread::spawn(move || send(address, "/callback?error=access_denied"));

    match wait_for_callback(listener, StdDuration::from_secs(5)) {
      Err(CommandError::Callback(error)) => assert_eq!(error, "access_denied"),
      other => panic!("expected callback error, got {:?}", other),
    }
    client.join().unwrap();
  }

  #[test]
  fn test_wait_for_callback_times_out() {
    let listener = TcpListener::bind("127.0.0.1:0").unwrap();
    assert!(matches!(
      wait_for_callback(listener, StdDuration::from_millis(150)),
      Err(CommandError::Callback(_))
    ));
  }

  #[test]
  fn test_unreadable_connection_is_answered_and_skipped() {
    let mut stream = MemoryStream::broken();
    assert!(handle_connection(&mut stream).is_none());
    assert!(stream.response().starts_with("HTTP/1.1 404"));
  }

  #[test]
  fn test_error_page_escapes_upstream_text() {
    let mut stream = MemoryStream::new("GET /callback?error=%3Cscript%3Ealert(1)%3C%2Fscript%3E HTTP/1.1\r\n\r\n");

    match handle_connection(&mut stream) {
      Some(Err(CommandError::Callback(error))) => assert_eq!(error, "<script>alert(1)</script>"),
      other => panic!("expected callback error, got {:?}", other.map(|r| r.is_ok())),
    }
    let page = stream.response();
    assert!(page.contains("&lt;script&gt;alert(1)&lt;/script&gt;"));
    assert!(!page.contains("<script>"));
  }
}
