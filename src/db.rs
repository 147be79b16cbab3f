use sqlx::sqlite::{SqlitePool, SqlitePoolOptions};

pub type DbPool = SqlitePool;

/// Open the connection pool for `database_url` and run migrations.
/// Use `?mode=rwc` in the URL to create the file on first start.
pub async fn initialize_db(database_url: &str) -> Result<DbPool, sqlx::Error> {
  tracing::info!("Initializing token database at: {}", database_url);

  let pool = SqlitePoolOptions::new()
    .max_connections(5)
    .connect(database_url)
    .await?;

  sqlx::migrate!("./migrations").run(&pool).await?;

  tracing::info!("Token database initialized successfully");

  Ok(pool)
}
