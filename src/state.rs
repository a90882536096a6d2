use crate::config::AppConfig;
use anyhow::Context;
use sqlx::{sqlite::SqlitePoolOptions, SqlitePool};
use std::sync::Arc;

#[derive(Clone)]
pub struct AppState {
    pub db: SqlitePool,
    pub config: Arc<AppConfig>,
}

impl AppState {
    pub async fn init() -> anyhow::Result<Self> {
        let config = Arc::new(AppConfig::from_env()?);

        let db = SqlitePoolOptions::new()
            .max_connections(10)
            .connect(&config.database_url)
            .await
            .context("connect to database")?;

        Ok(Self { db, config })
    }

    /// Apply the bundled migrations; every statement is `IF NOT EXISTS`.
    pub async fn migrate(&self) -> anyhow::Result<()> {
        sqlx::migrate!("./migrations")
            .run(&self.db)
            .await
            .context("run migrations")?;
        Ok(())
    }

    /// Fresh in-memory database with the schema applied.
    #[cfg(test)]
    pub async fn in_memory() -> Self {
        use crate::config::SessionConfig;

        // A single connection that never idles out, otherwise the in-memory
        // database vanishes with it.
        let db = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect("sqlite::memory:")
            .await
            .expect("in-memory sqlite");

        let config = Arc::new(AppConfig {
            database_url: "sqlite::memory:".into(),
            session: SessionConfig {
                secret: "test-secret".into(),
                issuer: "test-issuer".into(),
                ttl_minutes: 5,
                cookie_secure: false,
            },
        });

        let state = Self { db, config };
        state.migrate().await.expect("migrations apply");
        state
    }
}
