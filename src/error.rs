use std::collections::BTreeMap;

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Field name → message, ordered so responses are stable.
pub type FieldErrors = BTreeMap<&'static str, String>;

#[derive(Error, Debug)]
pub enum AppError {
    #[error("invalid input")]
    Validation(FieldErrors),

    #[error("username already taken")]
    DuplicateUsername,

    #[error("invalid username or password")]
    Authentication,

    #[error("missing or invalid form token")]
    Csrf,

    #[error("stored credential is not a valid password hash")]
    CredentialFormat,

    #[error("profile owner {0} does not exist")]
    ForeignKey(i64),

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl AppError {
    #[cfg(test)]
    pub fn into_field_errors(self) -> FieldErrors {
        match self {
            AppError::Validation(fields) => fields,
            other => panic!("expected validation error, got {other:?}"),
        }
    }
}

#[derive(Serialize)]
struct ErrorBody<'a> {
    error: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    errors: Option<&'a FieldErrors>,
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, message) = match &self {
            AppError::Validation(_) => (StatusCode::UNPROCESSABLE_ENTITY, "invalid input"),
            AppError::DuplicateUsername => (StatusCode::CONFLICT, "username already taken"),
            AppError::Authentication => (StatusCode::UNAUTHORIZED, "invalid username or password"),
            AppError::Csrf => (StatusCode::FORBIDDEN, "missing or invalid form token"),
            AppError::CredentialFormat | AppError::ForeignKey(_) | AppError::Internal(_) => {
                error!(error = %self, "internal error");
                (StatusCode::INTERNAL_SERVER_ERROR, "internal error")
            }
        };

        let errors = match &self {
            AppError::Validation(fields) => Some(fields),
            _ => None,
        };
        (status, Json(ErrorBody { error: message, errors })).into_response()
    }
}
