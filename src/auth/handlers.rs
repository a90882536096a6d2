use axum::{
    http::StatusCode,
    response::Response,
    routing::get,
    Router,
};
use sqlx::SqlitePool;
use tracing::{error, info, instrument, warn};

use crate::{
    auth::{
        dto::{AuthFormView, Credentials, LandingView, LoginForm, RegisterForm},
        extractors::RequestContext,
        password::{hash_password, verify_dummy, verify_password},
        repo_types::User,
        session,
    },
    csrf::CsrfForm,
    error::{AppError, FieldErrors},
    notice::Notice,
    state::AppState,
};

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/", get(index))
        .route("/register", get(register_page).post(register))
        .route("/login", get(login_page).post(login))
        .route("/logout", get(logout))
}

#[instrument(skip_all)]
pub async fn index(ctx: RequestContext) -> Response {
    if ctx.user_id.is_some() {
        return ctx.redirect("/dashboard", None, &[]);
    }
    ctx.render(
        StatusCode::OK,
        LandingView {
            register: "/register",
            login: "/login",
            notice: ctx.notice,
        },
    )
}

pub async fn register_page(ctx: RequestContext) -> Response {
    let view = AuthFormView {
        notice: ctx.notice,
        csrf_token: ctx.csrf_token.clone(),
        ..Default::default()
    };
    ctx.render(StatusCode::OK, view)
}

#[instrument(skip_all)]
pub async fn register(
    ctx: RequestContext,
    CsrfForm(form): CsrfForm<RegisterForm>,
) -> Result<Response, AppError> {
    let creds = match form.validate() {
        Ok(c) => c,
        Err(AppError::Validation(errors)) => {
            let fields: Vec<_> = errors.keys().collect();
            warn!(?fields, "register form invalid");
            let view = AuthFormView {
                errors,
                notice: None,
                csrf_token: ctx.csrf_token.clone(),
            };
            return Ok(ctx.render(StatusCode::UNPROCESSABLE_ENTITY, view));
        }
        Err(e) => return Err(e),
    };

    let hash = hash_password(&creds.password)?;

    match User::create(&ctx.db, &creds.username, &hash).await {
        Ok(user) => {
            info!(user_id = user.id, username = %user.username, "user registered");
            Ok(ctx.redirect("/login", Some(Notice::Registered), &[]))
        }
        Err(AppError::DuplicateUsername) => {
            warn!(username = %creds.username, "username already taken");
            let view = AuthFormView {
                errors: FieldErrors::new(),
                notice: Some(Notice::UsernameTaken),
                csrf_token: ctx.csrf_token.clone(),
            };
            Ok(ctx.render(StatusCode::CONFLICT, view))
        }
        Err(e) => Err(e),
    }
}

pub async fn login_page(ctx: RequestContext) -> Response {
    let view = AuthFormView {
        notice: ctx.notice,
        csrf_token: ctx.csrf_token.clone(),
        ..Default::default()
    };
    ctx.render(StatusCode::OK, view)
}

/// Resolve credentials to a user. Unknown usernames and wrong passwords are
/// the same `Authentication` error and cost the same hashing work.
async fn authenticate(db: &SqlitePool, creds: &Credentials) -> Result<User, AppError> {
    let Some(user) = User::find_by_username(db, &creds.username).await? else {
        verify_dummy(&creds.password);
        warn!(username = %creds.username, "login unknown username");
        return Err(AppError::Authentication);
    };

    match verify_password(&creds.password, &user.password_hash) {
        Ok(true) => Ok(user),
        Ok(false) => {
            warn!(user_id = user.id, "login invalid password");
            Err(AppError::Authentication)
        }
        Err(e) => {
            error!(error = %e, user_id = user.id, "stored password hash unreadable");
            Err(AppError::Authentication)
        }
    }
}

#[instrument(skip_all)]
pub async fn login(
    ctx: RequestContext,
    CsrfForm(form): CsrfForm<LoginForm>,
) -> Result<Response, AppError> {
    let creds = match form.validate() {
        Ok(c) => c,
        Err(AppError::Validation(errors)) => {
            let view = AuthFormView {
                errors,
                notice: None,
                csrf_token: ctx.csrf_token.clone(),
            };
            return Ok(ctx.render(StatusCode::UNPROCESSABLE_ENTITY, view));
        }
        Err(e) => return Err(e),
    };

    let user = match authenticate(&ctx.db, &creds).await {
        Ok(user) => user,
        Err(AppError::Authentication) => {
            let view = AuthFormView {
                errors: FieldErrors::new(),
                notice: Some(Notice::InvalidCredentials),
                csrf_token: ctx.csrf_token.clone(),
            };
            return Ok(ctx.render(StatusCode::UNAUTHORIZED, view));
        }
        Err(e) => return Err(e),
    };

    // A fresh login replaces whatever session the client presented.
    if let Some(old) = &ctx.token {
        session::logout(&ctx.db, &ctx.keys, old).await?;
    }
    let token = session::login(&ctx.db, &ctx.keys, user.id).await?;

    info!(user_id = user.id, "user logged in");
    Ok(ctx.redirect(
        "/dashboard",
        Some(Notice::LoggedIn),
        &[ctx.keys.cookie(&token)],
    ))
}

#[instrument(skip_all)]
pub async fn logout(ctx: RequestContext) -> Result<Response, AppError> {
    if let Some(token) = &ctx.token {
        session::logout(&ctx.db, &ctx.keys, token).await?;
    }
    if let Some(user_id) = ctx.user_id {
        info!(user_id, "user logged out");
    }
    Ok(ctx.redirect(
        "/login",
        Some(Notice::LoggedOut),
        &[ctx.keys.clear_cookie()],
    ))
}
