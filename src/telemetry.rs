use tracing::subscriber::SetGlobalDefaultError;
use tracing::Subscriber;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::{fmt, EnvFilter, Registry};

/// `RUST_LOG` wins when set; otherwise `default_level` (from `LOG_LEVEL`),
/// and `info` if that is not a valid filter.
pub fn get_subscriber<Sink>(default_level: &str, sink: Sink) -> impl Subscriber + Send + Sync
where
  Sink: for<'a> MakeWriter<'a> + Send + Sync + 'static,
{
  let env_filter = EnvFilter::try_from_default_env()
    .or_else(|_| EnvFilter::try_new(default_level))
    .unwrap_or_else(|_| EnvFilter::new("info"));

  Registry::default()
    .with(env_filter)
    .with(fmt::layer().with_target(false).with_writer(sink))
}

pub fn init_subscriber(subscriber: impl Subscriber + Send + Sync) -> Result<(), SetGlobalDefaultError> {
  tracing::subscriber::set_global_default(subscriber)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::{Arc, Mutex};

  #[derive(Clone, Default)]
  struct Captured(Arc<Mutex<Vec<u8>>>);

  impl std::io::Write for Captured {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
      self.0.lock().unwrap().extend_from_slice(buf);
      Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
      Ok(())
    }
  }

  #[test]
  #[serial_test::serial]
  fn test_level_filter_applies() {
    temp_env::with_var_unset("RUST_LOG", || {
      let captured = Captured::default();
      let sink = captured.clone();
      let subscriber = get_subscriber("warn", move || sink.clone());

      tracing::subscriber::with_default(subscriber, || {
        tracing::info!("hidden line");
        tracing::warn!("visible line");
      });

      let output = String::from_utf8(captured.0.lock().unwrap().clone()).unwrap();
      assert!(output.contains("visible line"));
      assert!(!output.contains("hidden line"));
    });
  }
}
