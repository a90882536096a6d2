use serde::{Deserialize, Serialize};

use crate::error::{AppError, FieldErrors};
use crate::notice::Notice;

pub(crate) const REQUIRED: &str = "This field is required.";

/// Trimmed, non-empty value of an optional form field.
pub(crate) fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Form body for registration. Fields are optional so that a missing field
/// becomes a field error rather than a rejected request.
#[derive(Debug, Default, Deserialize)]
pub struct RegisterForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Form body for login.
#[derive(Debug, Default, Deserialize)]
pub struct LoginForm {
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Validated username/password pair.
#[derive(Debug)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl RegisterForm {
    pub fn validate(self) -> Result<Credentials, AppError> {
        let mut errors = FieldErrors::new();

        let username = present(&self.username).map(str::to_owned);
        match &username {
            None => {
                errors.insert("username", REQUIRED.into());
            }
            Some(u) if !(3..=20).contains(&u.chars().count()) => {
                errors.insert(
                    "username",
                    "Field must be between 3 and 20 characters long.".into(),
                );
            }
            Some(_) => {}
        }

        // Whitespace-only is missing, but a real password is kept verbatim.
        let password = self.password.filter(|p| !p.trim().is_empty());
        match &password {
            None => {
                errors.insert("password", REQUIRED.into());
            }
            Some(p) if p.chars().count() < 6 => {
                errors.insert("password", "Field must be at least 6 characters long.".into());
            }
            Some(_) => {}
        }

        match (username, password) {
            (Some(username), Some(password)) if errors.is_empty() => {
                Ok(Credentials { username, password })
            }
            _ => Err(AppError::Validation(errors)),
        }
    }
}

impl LoginForm {
    pub fn validate(self) -> Result<Credentials, AppError> {
        let mut errors = FieldErrors::new();
        let username = present(&self.username).map(str::to_owned);
        if username.is_none() {
            errors.insert("username", REQUIRED.into());
        }
        let password = self.password.filter(|p| !p.trim().is_empty());
        if password.is_none() {
            errors.insert("password", REQUIRED.into());
        }
        match (username, password) {
            (Some(username), Some(password)) => Ok(Credentials { username, password }),
            _ => Err(AppError::Validation(errors)),
        }
    }
}

/// View-model for the register and login forms. Submitted values are never
/// echoed back.
#[derive(Debug, Default, Serialize)]
pub struct AuthFormView {
    pub errors: FieldErrors,
    pub notice: Option<Notice>,
    pub csrf_token: String,
}

/// View-model for the anonymous landing page.
#[derive(Debug, Serialize)]
pub struct LandingView {
    pub register: &'static str,
    pub login: &'static str,
    pub notice: Option<Notice>,
}
