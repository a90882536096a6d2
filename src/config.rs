use anyhow::Context;
use serde::Deserialize;

const DEV_SECRET: &str = "dev-only-session-secret-change-me";
/// One year.
pub const MAX_SESSION_TTL_MINUTES: i64 = 60 * 24 * 365;

#[derive(Debug, Clone, Deserialize)]
pub struct SessionConfig {
    pub secret: String,
    pub issuer: String,
    pub ttl_minutes: i64,
    pub cookie_secure: bool,
}

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub session: SessionConfig,
}

impl AppConfig {
    pub fn from_env() -> anyhow::Result<Self> {
        let database_url = std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "sqlite://calories.db?mode=rwc".into());
        let development = std::env::var("APP_ENV")
            .map(|v| v.eq_ignore_ascii_case("development"))
            .unwrap_or(false);

        let secret = match std::env::var("SESSION_SECRET") {
            Ok(s) if !s.trim().is_empty() => s,
            _ if development => {
                tracing::warn!("SESSION_SECRET not set; using insecure development secret");
                DEV_SECRET.into()
            }
            _ => anyhow::bail!("SESSION_SECRET must be set outside APP_ENV=development"),
        };

        let session = SessionConfig {
            secret,
            issuer: std::env::var("SESSION_ISSUER").unwrap_or_else(|_| "calorietrack".into()),
            ttl_minutes: match std::env::var("SESSION_TTL_MINUTES") {
                Ok(v) => v.parse::<i64>().context("SESSION_TTL_MINUTES must be an integer")?,
                Err(_) => 60 * 24 * 14,
            },
            cookie_secure: std::env::var("COOKIE_SECURE")
                .map(|v| v == "true" || v == "1")
                .unwrap_or(false),
        };
        anyhow::ensure!(
            (1..=MAX_SESSION_TTL_MINUTES).contains(&session.ttl_minutes),
            "SESSION_TTL_MINUTES must be between 1 and {MAX_SESSION_TTL_MINUTES}"
        );

        Ok(Self {
            database_url,
            session,
        })
    }
}
