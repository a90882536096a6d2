//! Signed double-submit tokens for form posts.
//!
//! Each client holds a random nonce in the `csrf` cookie. Views carry
//! `HMAC-SHA256(secret, nonce)` as `csrf_token`, and every form post must echo
//! it back. Another origin can neither read the cookie nor forge the MAC.

use axum::{
    async_trait,
    extract::{FromRef, FromRequest, Request},
    http::HeaderValue,
    Form,
};
use hmac::{Hmac, Mac};
use rand::{rngs::OsRng, RngCore};
use serde::{de::DeserializeOwned, Deserialize};
use sha2::Sha256;
use tracing::warn;

use crate::{
    cookies,
    error::{AppError, FieldErrors},
    state::AppState,
};

type HmacSha256 = Hmac<Sha256>;

pub const CSRF_COOKIE: &str = "csrf";
const NONCE_LEN: usize = 32;

#[derive(Clone)]
pub struct CsrfKeys {
    secret: Vec<u8>,
    max_age_secs: i64,
    cookie_secure: bool,
}

impl FromRef<AppState> for CsrfKeys {
    fn from_ref(state: &AppState) -> Self {
        let session = &state.config.session;
        Self {
            secret: session.secret.as_bytes().to_vec(),
            max_age_secs: session.ttl_minutes * 60,
            cookie_secure: session.cookie_secure,
        }
    }
}

pub fn new_nonce() -> String {
    let mut bytes = [0u8; NONCE_LEN];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

impl CsrfKeys {
    fn mac(&self, nonce: &str) -> anyhow::Result<HmacSha256> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|e| anyhow::anyhow!("csrf key: {e}"))?;
        // Domain-separated from the session JWTs signed with the same secret.
        mac.update(b"csrf:");
        mac.update(nonce.as_bytes());
        Ok(mac)
    }

    /// Token for forms rendered to the client holding `nonce`.
    pub fn token(&self, nonce: &str) -> anyhow::Result<String> {
        Ok(hex::encode(self.mac(nonce)?.finalize().into_bytes()))
    }

    /// Constant-time comparison of a submitted token with the expected MAC.
    pub fn verify(&self, nonce: &str, token: &str) -> bool {
        let Ok(provided) = hex::decode(token) else {
            return false;
        };
        self.mac(nonce)
            .is_ok_and(|mac| mac.verify_slice(&provided).is_ok())
    }

    pub fn cookie(&self, nonce: &str) -> HeaderValue {
        cookies::set(CSRF_COOKIE, nonce, self.max_age_secs, self.cookie_secure)
    }
}

#[derive(Deserialize)]
struct Signed<T> {
    csrf_token: Option<String>,
    #[serde(flatten)]
    form: T,
}

/// URL-encoded form body whose `csrf_token` matches the client's `csrf` cookie.
///
/// Unreadable bodies become a `form` field error (422); a missing or wrong
/// token is [`AppError::Csrf`] (403). Either way the handler never runs.
pub struct CsrfForm<T>(pub T);

#[async_trait]
impl<T> FromRequest<AppState> for CsrfForm<T>
where
    T: DeserializeOwned + Send,
{
    type Rejection = AppError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let nonce = cookies::read(req.headers(), CSRF_COOKIE);

        let Form(Signed { csrf_token, form }) = Form::<Signed<T>>::from_request(req, state)
            .await
            .map_err(|rejection| {
                warn!(error = %rejection, "form body rejected");
                let mut errors = FieldErrors::new();
                errors.insert("form", "Form data could not be read.".into());
                AppError::Validation(errors)
            })?;

        let keys = CsrfKeys::from_ref(state);
        match (nonce, csrf_token) {
            (Some(nonce), Some(token)) if keys.verify(&nonce, &token) => Ok(CsrfForm(form)),
            _ => {
                warn!("csrf token missing or invalid");
                Err(AppError::Csrf)
            }
        }
    }
}
