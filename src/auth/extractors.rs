use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts},
    http::{header::SET_COOKIE, request::Parts, HeaderMap, HeaderValue, StatusCode},
    response::{IntoResponse, Redirect, Response},
    Json,
};
use serde::Serialize;
use sqlx::SqlitePool;

use super::session::{self, SessionKeys};
use crate::{
    cookies,
    csrf::{self, CsrfKeys, CSRF_COOKIE},
    error::AppError,
    notice::{Notice, NOTICE_COOKIE},
    state::AppState,
};

/// Everything a handler needs about the current request: the store handle,
/// the resolved identity and any notice carried over from a redirect.
pub struct RequestContext {
    pub db: SqlitePool,
    pub keys: SessionKeys,
    pub token: Option<String>,
    pub user_id: Option<i64>,
    pub notice: Option<Notice>,
    /// Form token for views that post back.
    pub csrf_token: String,
    /// Set when the client had no `csrf` cookie yet.
    issued_csrf: Option<HeaderValue>,
    secure: bool,
}

#[async_trait]
impl FromRequestParts<AppState> for RequestContext {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let keys = SessionKeys::from_ref(state);
        let token = session::token_from_headers(&parts.headers);
        let user_id = match &token {
            Some(t) => session::current_user(&state.db, &keys, t).await?,
            None => None,
        };
        let notice = cookies::read(&parts.headers, NOTICE_COOKIE).and_then(|c| c.parse().ok());

        let csrf_keys = CsrfKeys::from_ref(state);
        let (nonce, issued) = match cookies::read(&parts.headers, CSRF_COOKIE) {
            Some(nonce) => (nonce, false),
            None => (csrf::new_nonce(), true),
        };
        let csrf_token = csrf_keys.token(&nonce)?;
        let issued_csrf = issued.then(|| csrf_keys.cookie(&nonce));

        Ok(Self {
            db: state.db.clone(),
            keys,
            token,
            user_id,
            notice,
            csrf_token,
            issued_csrf,
            secure: state.config.session.cookie_secure,
        })
    }
}

impl RequestContext {
    /// JSON view-model response. A carried-over notice is consumed here.
    pub fn render<T: Serialize>(&self, status: StatusCode, view: T) -> Response {
        let mut headers = self.base_headers();
        if self.notice.is_some() {
            headers.append(SET_COOKIE, Notice::clear_cookie(self.secure));
        }
        (status, headers, Json(view)).into_response()
    }

    /// 303 to `to`, leaving `notice` for the next view.
    pub fn redirect(&self, to: &str, notice: Option<Notice>, cookies: &[HeaderValue]) -> Response {
        let mut headers = self.base_headers();
        for cookie in cookies {
            headers.append(SET_COOKIE, cookie.clone());
        }
        if let Some(n) = notice {
            headers.append(SET_COOKIE, n.cookie(self.secure));
        } else if self.notice.is_some() {
            headers.append(SET_COOKIE, Notice::clear_cookie(self.secure));
        }
        (headers, Redirect::to(to)).into_response()
    }

    fn base_headers(&self) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(cookie) = &self.issued_csrf {
            headers.append(SET_COOKIE, cookie.clone());
        }
        headers
    }
}

/// A request with an authenticated session; anonymous clients are sent to `/login`.
pub struct AuthUser {
    pub user_id: i64,
    pub ctx: RequestContext,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = Response;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let ctx = RequestContext::from_request_parts(parts, state)
            .await
            .map_err(IntoResponse::into_response)?;
        match ctx.user_id {
            Some(user_id) => Ok(AuthUser { user_id, ctx }),
            None => {
                // A presented but dead session cookie is dropped on the way out.
                let mut headers = HeaderMap::new();
                if ctx.token.is_some() {
                    headers.append(SET_COOKIE, ctx.keys.clear_cookie());
                }
                Err((headers, Redirect::to("/login")).into_response())
            }
        }
    }
}
