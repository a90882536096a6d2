use std::net::SocketAddr;

use axum::{routing::get, Router};
use tower_http::trace::TraceLayer;

use crate::state::AppState;
use crate::{auth, profiles};

pub fn build_app(state: AppState) -> Router {
    Router::new()
        .merge(auth::router())
        .merge(profiles::router())
        .route("/health", get(|| async { "ok" }))
        .with_state(state)
        .layer(
            TraceLayer::new_for_http()
                .make_span_with(|req: &axum::http::Request<_>| {
                    let method = req.method().clone();
                    let uri = req.uri().clone();
                    tracing::info_span!(
                        "http_request",
                        %method,
                        uri = %uri,
                        status = tracing::field::Empty
                    )
                })
                .on_response(
                    |res: &axum::http::Response<_>,
                     latency: std::time::Duration,
                     span: &tracing::Span| {
                        let status = res.status();
                        span.record("status", tracing::field::display(status));
                        let latency_ms = latency.as_millis() as u64;
                        if status.is_server_error() {
                            tracing::error!(%status, latency_ms, "response");
                        } else {
                            tracing::info!(%status, latency_ms, "response");
                        }
                    },
                ),
        )
}

pub async fn serve(app: Router) -> anyhow::Result<()> {
    let addr: SocketAddr = format!(
        "{}:{}",
        std::env::var("APP_HOST").unwrap_or_else(|_| "0.0.0.0".into()),
        std::env::var("APP_PORT").unwrap_or_else(|_| "8080".into())
    )
    .parse()?;

    tracing::info!("listening on {}", addr);
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{
        body::Body,
        http::{header, Request, StatusCode},
        response::Response,
    };
    use axum::extract::FromRef;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::csrf::CsrfKeys;

    const NONCE: &str = "0123456789abcdef";

    struct TestApp {
        state: AppState,
        csrf_token: String,
    }

    impl TestApp {
        async fn new() -> Self {
            let state = AppState::in_memory().await;
            let csrf_token = CsrfKeys::from_ref(&state).token(NONCE).unwrap();
            Self { state, csrf_token }
        }

        async fn send(&self, req: Request<Body>) -> Response {
            build_app(self.state.clone())
                .oneshot(req)
                .await
                .expect("router is infallible")
        }

        async fn get(&self, uri: &str, cookie: Option<&str>) -> Response {
            let mut req = Request::get(uri);
            if let Some(c) = cookie {
                req = req.header(header::COOKIE, c);
            }
            self.send(req.body(Body::empty()).unwrap()).await
        }

        /// Form post carrying the `csrf` cookie and a matching `csrf_token`.
        async fn post(&self, uri: &str, form: &str, cookie: Option<&str>) -> Response {
            let form = format!("{form}&csrf_token={}", self.csrf_token);
            let cookie = match cookie {
                Some(c) => format!("{c}; csrf={NONCE}"),
                None => format!("csrf={NONCE}"),
            };
            self.post_raw(uri, &form, Some(&cookie)).await
        }

        async fn post_raw(&self, uri: &str, form: &str, cookie: Option<&str>) -> Response {
            let mut req = Request::post(uri)
                .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded");
            if let Some(c) = cookie {
                req = req.header(header::COOKIE, c);
            }
            self.send(req.body(Body::from(form.to_string())).unwrap()).await
        }

        async fn count(&self, table: &str) -> i64 {
            let (n,): (i64,) = sqlx::query_as(&format!("SELECT COUNT(*) FROM {table}"))
                .fetch_one(&self.state.db)
                .await
                .unwrap();
            n
        }

        /// Register + login; returns the `session=...` cookie pair.
        async fn signed_in(&self, username: &str) -> String {
            let resp = self
                .post("/register", &format!("username={username}&password=secret1"), None)
                .await;
            assert_eq!(resp.status(), StatusCode::SEE_OTHER);
            let resp = self
                .post("/login", &format!("username={username}&password=secret1"), None)
                .await;
            assert_eq!(resp.status(), StatusCode::SEE_OTHER);
            set_cookie(&resp, "session").expect("session cookie")
        }

        async fn profile_count(&self) -> i64 {
            self.count("profiles").await
        }
    }

    /// `name=value` of the first Set-Cookie for `name`.
    fn set_cookie(resp: &Response, name: &str) -> Option<String> {
        resp.headers()
            .get_all(header::SET_COOKIE)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .find(|v| v.starts_with(&format!("{name}=")))
            .and_then(|v| v.split(';').next())
            .map(str::to_string)
    }

    fn location(resp: &Response) -> &str {
        resp.headers()
            .get(header::LOCATION)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
    }

    async fn json(resp: Response) -> Value {
        let bytes = axum::body::to_bytes(resp.into_body(), usize::MAX)
            .await
            .expect("body");
        serde_json::from_slice(&bytes).expect("json body")
    }

    const FORM: &str =
        "age=25&gender=male&height=180&weight=80&activity=sedentary&goal=maintain";

    #[tokio::test]
    async fn health() {
        let app = TestApp::new().await;
        assert_eq!(app.get("/health", None).await.status(), StatusCode::OK);
    }

    #[tokio::test]
    async fn landing_for_anonymous_and_redirect_when_signed_in() {
        let app = TestApp::new().await;
        let resp = app.get("/", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(json(resp).await["login"], "/login");

        let cookie = app.signed_in("kim").await;
        let resp = app.get("/", Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/dashboard");
    }

    #[tokio::test]
    async fn register_redirects_with_notice() {
        let app = TestApp::new().await;
        let resp = app.post("/register", "username=liam&password=secret1", None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
        let notice = set_cookie(&resp, "notice").expect("notice cookie");
        assert_eq!(notice, "notice=registered");

        let resp = app.get("/login", Some(&notice)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(set_cookie(&resp, "notice").as_deref(), Some("notice="));
        let body = json(resp).await;
        assert_eq!(body["notice"]["message"], "Registration successful! Please log in.");
    }

    #[tokio::test]
    async fn register_twice_is_conflict() {
        let app = TestApp::new().await;
        app.post("/register", "username=mona&password=secret1", None).await;
        let resp = app.post("/register", "username=mona&password=other12", None).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let body = json(resp).await;
        assert_eq!(body["notice"]["message"], "Username already taken!");
        assert!(body.get("username").is_none());
        assert_eq!(app.count("users").await, 1);
    }

    #[tokio::test]
    async fn register_validation_errors() {
        let app = TestApp::new().await;
        let resp = app.post("/register", "username=ab&password=123", None).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(resp).await;
        assert!(body["errors"]["username"].is_string());
        assert!(body["errors"]["password"].is_string());
    }

    #[tokio::test]
    async fn login_failures_are_indistinguishable() {
        let app = TestApp::new().await;
        app.post("/register", "username=nina&password=secret1", None).await;

        let wrong_pw = app.post("/login", "username=nina&password=nope123", None).await;
        let no_user = app.post("/login", "username=ghost&password=nope123", None).await;

        assert_eq!(wrong_pw.status(), StatusCode::UNAUTHORIZED);
        assert_eq!(no_user.status(), StatusCode::UNAUTHORIZED);
        assert!(set_cookie(&wrong_pw, "session").is_none());
        assert!(set_cookie(&no_user, "session").is_none());
        assert_eq!(json(wrong_pw).await, json(no_user).await);
        assert_eq!(app.count("sessions").await, 0);
    }

    #[tokio::test]
    async fn login_requires_fields() {
        let app = TestApp::new().await;
        let resp = app.post("/login", "username=&password=", None).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn dashboard_requires_session() {
        let app = TestApp::new().await;
        for resp in [
            app.get("/dashboard", None).await,
            app.post("/dashboard", FORM, None).await,
            app.get("/dashboard", Some("session=forged.token.value")).await,
        ] {
            assert_eq!(resp.status(), StatusCode::SEE_OTHER);
            assert_eq!(location(&resp), "/login");
            assert!(set_cookie(&resp, "notice").is_none());
        }
        assert_eq!(app.profile_count().await, 0);
    }

    #[tokio::test]
    async fn dead_session_cookie_is_cleared_on_redirect() {
        let app = TestApp::new().await;
        let resp = app.get("/dashboard", Some("session=forged.token.value")).await;
        assert_eq!(location(&resp), "/login");
        assert_eq!(set_cookie(&resp, "session").as_deref(), Some("session="));

        let resp = app.get("/dashboard", None).await;
        assert!(set_cookie(&resp, "session").is_none());
    }

    #[tokio::test]
    async fn pages_issue_a_usable_form_token() {
        let app = TestApp::new().await;
        let resp = app.get("/register", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let csrf = set_cookie(&resp, "csrf").expect("csrf cookie");
        let token = json(resp).await["csrf_token"]
            .as_str()
            .expect("token in view")
            .to_string();

        let form = format!("username=uma&password=secret1&csrf_token={token}");
        let resp = app.post_raw("/register", &form, Some(&csrf)).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        // The client already holds a nonce, so it is not reissued.
        assert!(set_cookie(&resp, "csrf").is_none());
        assert_eq!(app.count("users").await, 1);
    }

    #[tokio::test]
    async fn posts_without_a_valid_form_token_are_forbidden() {
        let app = TestApp::new().await;
        let csrf = format!("csrf={NONCE}");
        let creds = "username=vera&password=secret1";

        let cases = [
            (creds.to_string(), None),
            (creds.to_string(), Some(csrf.clone())),
            (format!("{creds}&csrf_token={}", app.csrf_token), None),
            (format!("{creds}&csrf_token=deadbeef"), Some(csrf.clone())),
            (
                format!("{creds}&csrf_token={}", app.csrf_token),
                Some("csrf=another-nonce".to_string()),
            ),
        ];
        for (form, cookie) in &cases {
            let resp = app.post_raw("/register", form, cookie.as_deref()).await;
            assert_eq!(resp.status(), StatusCode::FORBIDDEN, "{form} {cookie:?}");
        }
        assert_eq!(app.count("users").await, 0);

        app.post("/register", creds, None).await;
        let resp = app.post_raw("/login", creds, Some(&csrf)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert!(set_cookie(&resp, "session").is_none());
        assert_eq!(app.count("sessions").await, 0);

        let session = app.signed_in("walt").await;
        let cookie = format!("{session}; {csrf}");
        let resp = app.post_raw("/dashboard", FORM, Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
        assert_eq!(app.profile_count().await, 0);
    }

    #[tokio::test]
    async fn unreadable_form_body_is_a_field_error() {
        let app = TestApp::new().await;
        let session = app.signed_in("xena").await;
        let req = Request::post("/dashboard")
            .header(header::CONTENT_TYPE, "text/plain")
            .header(header::COOKIE, format!("{session}; csrf={NONCE}"))
            .body(Body::from(format!("{FORM}&csrf_token={}", app.csrf_token)))
            .unwrap();
        let resp = app.send(req).await;
        assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
        let body = json(resp).await;
        assert!(body["errors"]["form"].is_string());
        assert_eq!(app.profile_count().await, 0);
    }

    #[tokio::test]
    async fn submit_estimates_and_appends() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("olga").await;

        let resp = app.get("/dashboard", Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["username"], "olga");
        assert_eq!(body["history"].as_array().unwrap().len(), 0);
        assert!(body["calories"].is_null());

        let resp = app.post("/dashboard", FORM, Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let body = json(resp).await;
        assert_eq!(body["calories"], 2166);
        assert_eq!(body["notice"]["message"], "Calculation saved!");

        let lose = "age=25&gender=female&height=165&weight=60&activity=moderate&goal=lose";
        let body = json(app.post("/dashboard", lose, Some(&cookie)).await).await;
        assert_eq!(body["calories"], 1585);

        let history = body["history"].as_array().unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0]["gender"], "female");
        assert_eq!(history[0]["calories"], 1585);
        assert_eq!(history[1]["calories"], 2166);
    }

    #[tokio::test]
    async fn invalid_submission_writes_nothing() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("pete").await;

        let zero_age = "age=0&gender=male&height=180&weight=80&activity=sedentary&goal=maintain";
        let no_activity = "age=25&gender=male&height=180&weight=80&goal=maintain";
        for form in [zero_age, no_activity] {
            let resp = app.post("/dashboard", form, Some(&cookie)).await;
            assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
            let body = json(resp).await;
            assert!(body["calories"].is_null());
            assert!(body["errors"].as_object().is_some_and(|e| !e.is_empty()));
        }
        assert_eq!(app.profile_count().await, 0);
    }

    #[tokio::test]
    async fn history_is_per_user() {
        let app = TestApp::new().await;
        let quinn = app.signed_in("quinn").await;
        let rosa = app.signed_in("rosa").await;
        app.post("/dashboard", FORM, Some(&quinn)).await;

        let body = json(app.get("/dashboard", Some(&rosa)).await).await;
        assert_eq!(body["history"].as_array().unwrap().len(), 0);
    }

    #[tokio::test]
    async fn logout_revokes_session() {
        let app = TestApp::new().await;
        let cookie = app.signed_in("sam").await;

        let resp = app.get("/logout", Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
        assert_eq!(set_cookie(&resp, "session").as_deref(), Some("session="));
        assert_eq!(set_cookie(&resp, "notice").as_deref(), Some("notice=logged_out"));

        // The old cookie value no longer authenticates even if replayed.
        let resp = app.get("/dashboard", Some(&cookie)).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
    }

    #[tokio::test]
    async fn logout_when_anonymous_is_harmless() {
        let app = TestApp::new().await;
        let resp = app.get("/logout", None).await;
        assert_eq!(resp.status(), StatusCode::SEE_OTHER);
        assert_eq!(location(&resp), "/login");
    }
}
