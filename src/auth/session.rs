use anyhow::Context;
use axum::{
    extract::FromRef,
    http::{HeaderMap, HeaderValue},
};
use jsonwebtoken::{decode, encode, DecodingKey, EncodingKey, Header, Validation};
use sqlx::SqlitePool;
use time::{Duration as TimeDuration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::claims::SessionClaims;
use crate::{config::SessionConfig, cookies, state::AppState};

pub const SESSION_COOKIE: &str = "session";

/// Signing material for session cookies.
#[derive(Clone)]
pub struct SessionKeys {
    encoding: EncodingKey,
    decoding: DecodingKey,
    issuer: String,
    ttl: TimeDuration,
    cookie_secure: bool,
}

impl FromRef<AppState> for SessionKeys {
    fn from_ref(state: &AppState) -> Self {
        let SessionConfig {
            secret,
            issuer,
            ttl_minutes,
            cookie_secure,
        } = state.config.session.clone();
        Self {
            encoding: EncodingKey::from_secret(secret.as_bytes()),
            decoding: DecodingKey::from_secret(secret.as_bytes()),
            issuer,
            ttl: TimeDuration::minutes(ttl_minutes),
            cookie_secure,
        }
    }
}

impl SessionKeys {
    fn sign(&self, claims: &SessionClaims) -> anyhow::Result<String> {
        let token = encode(&Header::default(), claims, &self.encoding)?;
        debug!(user_id = claims.sub, "session token signed");
        Ok(token)
    }

    fn validation(&self, check_exp: bool) -> Validation {
        let mut validation = Validation::default();
        validation.set_issuer(std::slice::from_ref(&self.issuer));
        validation.validate_exp = check_exp;
        if !check_exp {
            validation.required_spec_claims.clear();
        }
        validation
    }

    fn verify(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation(true))?;
        Ok(data.claims)
    }

    /// Signature and issuer only; used to find the row of a stale cookie.
    fn verify_ignoring_expiry(&self, token: &str) -> anyhow::Result<SessionClaims> {
        let data = decode::<SessionClaims>(token, &self.decoding, &self.validation(false))?;
        Ok(data.claims)
    }

    pub fn cookie(&self, token: &str) -> HeaderValue {
        cookies::set(SESSION_COOKIE, token, self.ttl.whole_seconds(), self.cookie_secure)
    }

    pub fn clear_cookie(&self) -> HeaderValue {
        cookies::clear(SESSION_COOKIE, self.cookie_secure)
    }
}

/// Session token presented by the client, if any.
pub fn token_from_headers(headers: &HeaderMap) -> Option<String> {
    cookies::read(headers, SESSION_COOKIE)
}

/// Anonymous → Authenticated: create the server-side row and return its signed token.
pub async fn login(db: &SqlitePool, keys: &SessionKeys, user_id: i64) -> anyhow::Result<String> {
    let now = OffsetDateTime::now_utc();
    let expires = now
        .checked_add(keys.ttl)
        .context("session expiry out of range")?;

    sqlx::query("DELETE FROM sessions WHERE expires_at <= ?")
        .bind(now.unix_timestamp())
        .execute(db)
        .await
        .context("purge expired sessions")?;

    let sid = Uuid::new_v4();
    sqlx::query(
        r#"
        INSERT INTO sessions (id, user_id, created_at, expires_at)
        VALUES (?, ?, ?, ?)
        "#,
    )
    .bind(sid.to_string())
    .bind(user_id)
    .bind(now.unix_timestamp())
    .bind(expires.unix_timestamp())
    .execute(db)
    .await
    .context("insert session")?;

    keys.sign(&SessionClaims {
        sub: user_id,
        sid,
        iat: now.unix_timestamp() as usize,
        exp: expires.unix_timestamp() as usize,
        iss: keys.issuer.clone(),
    })
}

/// Resolve a token to its user. Forged, expired or revoked tokens are anonymous.
pub async fn current_user(
    db: &SqlitePool,
    keys: &SessionKeys,
    token: &str,
) -> anyhow::Result<Option<i64>> {
    let Ok(claims) = keys.verify(token) else {
        debug!("session token rejected");
        return Ok(None);
    };

    let row: Option<(i64,)> =
        sqlx::query_as("SELECT user_id FROM sessions WHERE id = ? AND expires_at > ?")
            .bind(claims.sid.to_string())
            .bind(OffsetDateTime::now_utc().unix_timestamp())
            .fetch_optional(db)
            .await
            .context("lookup session")?;

    Ok(row.map(|(user_id,)| user_id).filter(|id| *id == claims.sub))
}

/// Authenticated → Anonymous. Unknown or malformed tokens are a no-op.
pub async fn logout(db: &SqlitePool, keys: &SessionKeys, token: &str) -> anyhow::Result<()> {
    let Ok(claims) = keys.verify_ignoring_expiry(token) else {
        return Ok(());
    };
    sqlx::query("DELETE FROM sessions WHERE id = ?")
        .bind(claims.sid.to_string())
        .execute(db)
        .await
        .context("delete session")?;
    debug!(user_id = claims.sub, "session revoked");
    Ok(())
}
