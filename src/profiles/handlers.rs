use axum::{http::StatusCode, response::Response, routing::get, Router};
use tracing::{info, instrument, warn};

use super::{
    dto::{CalorieForm, DashboardView, HistoryItem},
    estimator::estimate,
    repo_types::ProfileEntry,
};
use crate::{
    auth::{
        extractors::{AuthUser, RequestContext},
        repo_types::User,
    },
    csrf::CsrfForm,
    error::{AppError, FieldErrors},
    notice::Notice,
    state::AppState,
};

pub fn dashboard_routes() -> Router<AppState> {
    Router::new().route("/dashboard", get(dashboard).post(submit))
}

async fn load_view(
    ctx: &RequestContext,
    user_id: i64,
    calories: Option<i64>,
    errors: FieldErrors,
    notice: Option<Notice>,
) -> Result<DashboardView, AppError> {
    let user = User::find_by_id(&ctx.db, user_id)
        .await?
        .ok_or_else(|| anyhow::anyhow!("session user {user_id} has no account"))?;
    let history = ProfileEntry::list_by_user(&ctx.db, user_id)
        .await?
        .into_iter()
        .map(HistoryItem::from)
        .collect();

    Ok(DashboardView {
        username: user.username,
        calories,
        history,
        errors,
        notice,
        csrf_token: ctx.csrf_token.clone(),
    })
}

#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn dashboard(auth: AuthUser) -> Result<Response, AppError> {
    let AuthUser { user_id, ctx } = auth;
    let view = load_view(&ctx, user_id, None, FieldErrors::new(), ctx.notice).await?;
    Ok(ctx.render(StatusCode::OK, view))
}

#[instrument(skip_all, fields(user_id = auth.user_id))]
pub async fn submit(
    auth: AuthUser,
    CsrfForm(form): CsrfForm<CalorieForm>,
) -> Result<Response, AppError> {
    let AuthUser { user_id, ctx } = auth;

    let metrics = match form.validate() {
        Ok(m) => m,
        Err(AppError::Validation(errors)) => {
            let fields: Vec<_> = errors.keys().collect();
            warn!(?fields, "calorie form invalid");
            let view = load_view(&ctx, user_id, None, errors, None).await?;
            return Ok(ctx.render(StatusCode::UNPROCESSABLE_ENTITY, view));
        }
        Err(e) => return Err(e),
    };

    let calories = estimate(&metrics);
    let entry = ProfileEntry::append(&ctx.db, user_id, &metrics).await?;
    info!(profile_id = entry.id, calories, "calculation saved");

    let view = load_view(
        &ctx,
        user_id,
        Some(calories),
        FieldErrors::new(),
        Some(Notice::CalculationSaved),
    )
    .await?;
    Ok(ctx.render(StatusCode::OK, view))
}
