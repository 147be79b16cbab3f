//! OAuth token persistence
//!
//! One record per provider. Backends are picked once at startup from
//! [`TokenStorage`]; callers only see the [`TokenStore`] trait.

use async_trait::async_trait;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::RwLock;

use crate::config::TokenStorage;
use crate::db::{self, DbPool};
use crate::models::TokenRecord;

pub const OURA_PROVIDER: &str = "oura";

/// ---------------------------------------------------------------------------
/// Error Handling
/// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
  #[error("Token file error: {0}")]
  Io(#[from] std::io::Error),

  #[error("Token file is not valid JSON: {0}")]
  Json(#[from] serde_json::Error),

  #[error("Token database error: {0}")]
  Database(#[from] sqlx::Error),
}

/// ---------------------------------------------------------------------------
/// Store Contract
/// ---------------------------------------------------------------------------

/// `load` returns `Ok(None)` when nothing is stored; errors are reserved for
/// storage failures. `save` overwrites, `clear` is a no-op when empty.
#[async_trait]
pub trait TokenStore: Send + Sync {
  async fn load(&self) -> Result<Option<TokenRecord>, StoreError>;
  async fn save(&self, record: &TokenRecord) -> Result<(), StoreError>;
  async fn clear(&self) -> Result<(), StoreError>;

  fn describe(&self) -> String;
}

/// Build the configured backend.
pub async fn open_store(storage: &TokenStorage) -> Result<Arc<dyn TokenStore>, StoreError> {
  match storage {
    TokenStorage::File(path) => Ok(Arc::new(FileTokenStore::new(path))),
    TokenStorage::None => Ok(Arc::new(MemoryTokenStore::default())),
    TokenStorage::Database { url, fallback_file } => {
      let file = FileTokenStore::new(fallback_file);
      match db::initialize_db(url).await {
        Ok(pool) => Ok(Arc::new(FallbackTokenStore::new(
          SqliteTokenStore::new(pool, OURA_PROVIDER),
          file,
        ))),
        Err(e) => {
          tracing::error!(
            "Token database unavailable ({}); using token file {} instead",
            e,
            fallback_file.display()
          );
          Ok(Arc::new(file))
        }
      }
    }
  }
}

/// ---------------------------------------------------------------------------
/// File Backend
/// ---------------------------------------------------------------------------

pub struct FileTokenStore {
  path: PathBuf,
}

impl FileTokenStore {
  pub fn new(path: impl AsRef<Path>) -> Self {
    Self {
      path: path.as_ref().to_path_buf(),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }
}

#[async_trait]
impl TokenStore for FileTokenStore {
  async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
    let raw = match tokio::fs::read_to_string(&self.path).await {
      Ok(raw) => raw,
      Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
      Err(e) => return Err(e.into()),
    };

    let record: TokenRecord = serde_json::from_str(&raw)?;
    Ok(Some(record))
  }

  async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
    let json = serde_json::to_string_pretty(record)?;

    // Replace atomically: write a sibling temp file, then rename over the target.
    let tmp = self.path.with_extension("json.tmp");
    tokio::fs::write(&tmp, json).await?;
    tokio::fs::rename(&tmp, &self.path).await?;

    tracing::info!("Tokens saved to {}", self.path.display());
    Ok(())
  }

  async fn clear(&self) -> Result<(), StoreError> {
    match tokio::fs::remove_file(&self.path).await {
      Ok(()) => {
        tracing::info!("Token file {} removed", self.path.display());
        Ok(())
      }
      Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
      Err(e) => Err(e.into()),
    }
  }

  fn describe(&self) -> String {
    format!("file {}", self.path.display())
  }
}

/// ---------------------------------------------------------------------------
/// Database Backend
/// ---------------------------------------------------------------------------

pub struct SqliteTokenStore {
  pool: DbPool,
  provider: String,
}

impl SqliteTokenStore {
  pub fn new(pool: DbPool, provider: &str) -> Self {
    Self {
      pool,
      provider: provider.to_string(),
    }
  }
}

#[async_trait]
impl TokenStore for SqliteTokenStore {
  async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
    let row: Option<(String, String, i64, String, Option<String>)> = sqlx::query_as(
      "SELECT access_token, refresh_token, expires_at, token_type, scope FROM tokens WHERE provider = ?1",
    )
    .bind(&self.provider)
    .fetch_optional(&self.pool)
    .await?;

    Ok(row.map(|(access_token, refresh_token, expires_at, token_type, scope)| TokenRecord {
      access_token,
      refresh_token,
      expires_at,
      token_type,
      scope,
    }))
  }

  async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
    sqlx::query(
      r#"
      INSERT INTO tokens (provider, access_token, refresh_token, expires_at, token_type, scope)
      VALUES (?1, ?2, ?3, ?4, ?5, ?6)
      ON CONFLICT(provider) DO UPDATE SET
        access_token = excluded.access_token,
        refresh_token = excluded.refresh_token,
        expires_at = excluded.expires_at,
        token_type = excluded.token_type,
        scope = excluded.scope,
        updated_at = CURRENT_TIMESTAMP
      "#,
    )
    .bind(&self.provider)
    .bind(&record.access_token)
    .bind(&record.refresh_token)
    .bind(record.expires_at)
    .bind(&record.token_type)
    .bind(&record.scope)
    .execute(&self.pool)
    .await?;

    tracing::info!("Tokens saved to database for provider {}", self.provider);
    Ok(())
  }

  async fn clear(&self) -> Result<(), StoreError> {
    sqlx::query("DELETE FROM tokens WHERE provider = ?1")
      .bind(&self.provider)
      .execute(&self.pool)
      .await?;
    Ok(())
  }

  fn describe(&self) -> String {
    format!("database (provider {})", self.provider)
  }
}

/// ---------------------------------------------------------------------------
/// In-Memory Backend
/// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MemoryTokenStore {
  record: RwLock<Option<TokenRecord>>,
}

impl MemoryTokenStore {
  pub fn with_record(record: TokenRecord) -> Self {
    Self {
      record: RwLock::new(Some(record)),
    }
  }
}

#[async_trait]
impl TokenStore for MemoryTokenStore {
  async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
    Ok(self.record.read().await.clone())
  }

  async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
    *self.record.write().await = Some(record.clone());
    Ok(())
  }

  async fn clear(&self) -> Result<(), StoreError> {
    *self.record.write().await = None;
    Ok(())
  }

  fn describe(&self) -> String {
    "memory".to_string()
  }
}

/// ---------------------------------------------------------------------------
/// Fallback Composition
/// ---------------------------------------------------------------------------

/// Writes go to `primary`; when it fails the write lands in `fallback` and
/// the failure is logged. If both fail, the primary error is returned.
///
/// Reads consult both backends. A save that fell back leaves the newer record
/// in `fallback` only, so the record with the later `expires_at` wins and is
/// copied over the stale one.
pub struct FallbackTokenStore<P, F> {
  primary: P,
  fallback: F,
}

impl<P: TokenStore, F: TokenStore> FallbackTokenStore<P, F> {
  pub fn new(primary: P, fallback: F) -> Self {
    Self { primary, fallback }
  }
}

async fn overwrite_stale(store: &impl TokenStore, record: &TokenRecord) {
  match store.save(record).await {
    Ok(()) => tracing::info!("Refreshed stale tokens in {}", store.describe()),
    Err(e) => tracing::warn!("Could not refresh stale tokens in {}: {}", store.describe(), e),
  }
}

#[async_trait]
impl<P: TokenStore, F: TokenStore> TokenStore for FallbackTokenStore<P, F> {
  async fn load(&self) -> Result<Option<TokenRecord>, StoreError> {
    let primary = match self.primary.load().await {
      Ok(record) => record,
      Err(e) => {
        tracing::warn!(
          "Loading tokens from {} failed ({}); reading {} instead",
          self.primary.describe(),
          e,
          self.fallback.describe()
        );
        return self.fallback.load().await.map_err(|_| e);
      }
    };

    let fallback = match self.fallback.load().await {
      Ok(record) => record,
      Err(e) => {
        tracing::warn!("Ignoring unreadable {}: {}", self.fallback.describe(), e);
        return Ok(primary);
      }
    };

    match (primary, fallback) {
      (primary, None) => Ok(primary),
      (None, Some(fallback)) => {
        tracing::warn!(
          "{} has no tokens; using the record from {}",
          self.primary.describe(),
          self.fallback.describe()
        );
        overwrite_stale(&self.primary, &fallback).await;
        Ok(Some(fallback))
      }
      (Some(primary), Some(fallback)) if primary == fallback => Ok(Some(primary)),
      (Some(primary), Some(fallback)) => {
        if fallback.expires_at > primary.expires_at {
          tracing::warn!(
            "{} holds newer tokens than {}; using them",
            self.fallback.describe(),
            self.primary.describe()
          );
          overwrite_stale(&self.primary, &fallback).await;
          Ok(Some(fallback))
        } else {
          tracing::warn!(
            "{} holds older tokens than {}; replacing them",
            self.fallback.describe(),
            self.primary.describe()
          );
          overwrite_stale(&self.fallback, &primary).await;
          Ok(Some(primary))
        }
      }
    }
  }

  async fn save(&self, record: &TokenRecord) -> Result<(), StoreError> {
    match self.primary.save(record).await {
      Ok(()) => Ok(()),
      Err(e) => {
        tracing::error!(
          "Saving tokens to {} failed ({}); writing {} instead",
          self.primary.describe(),
          e,
          self.fallback.describe()
        );
        self.fallback.save(record).await.map_err(|_| e)
      }
    }
  }

  async fn clear(&self) -> Result<(), StoreError> {
    let primary = self.primary.clear().await;
    let fallback = self.fallback.clear().await;
    if let Err(e) = &fallback {
      tracing::warn!("Clearing {} failed: {}", self.fallback.describe(), e);
    }
    primary
  }

  fn describe(&self) -> String {
    format!("{} (fallback: {})", self.primary.describe(), self.fallback.describe())
  }
}

/// ---------------------------------------------------------------------------
/// Tests
/// ---------------------------------------------------------------------------
