use std::str::FromStr;

use axum::http::HeaderValue;
use serde::{Serialize, Serializer};

use crate::cookies;

pub const NOTICE_COOKIE: &str = "notice";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum NoticeKind {
    Success,
    Error,
}

/// User-facing message attached to a view, possibly across one redirect.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Registered,
    LoggedIn,
    LoggedOut,
    CalculationSaved,
    UsernameTaken,
    InvalidCredentials,
}

impl Notice {
    pub fn kind(self) -> NoticeKind {
        match self {
            Notice::UsernameTaken | Notice::InvalidCredentials => NoticeKind::Error,
            _ => NoticeKind::Success,
        }
    }

    pub fn message(self) -> &'static str {
        match self {
            Notice::Registered => "Registration successful! Please log in.",
            Notice::LoggedIn => "Logged in successfully!",
            Notice::LoggedOut => "Logged out successfully!",
            Notice::CalculationSaved => "Calculation saved!",
            Notice::UsernameTaken => "Username already taken!",
            Notice::InvalidCredentials => "Invalid username or password!",
        }
    }

    fn code(self) -> &'static str {
        match self {
            Notice::Registered => "registered",
            Notice::LoggedIn => "logged_in",
            Notice::LoggedOut => "logged_out",
            Notice::CalculationSaved => "calculation_saved",
            Notice::UsernameTaken => "username_taken",
            Notice::InvalidCredentials => "invalid_credentials",
        }
    }

    /// Short-lived cookie that carries this notice to the next rendered view.
    pub fn cookie(self, secure: bool) -> HeaderValue {
        cookies::set(NOTICE_COOKIE, self.code(), 60, secure)
    }

    pub fn clear_cookie(secure: bool) -> HeaderValue {
        cookies::clear(NOTICE_COOKIE, secure)
    }
}

impl FromStr for Notice {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "registered" => Notice::Registered,
            "logged_in" => Notice::LoggedIn,
            "logged_out" => Notice::LoggedOut,
            "calculation_saved" => Notice::CalculationSaved,
            "username_taken" => Notice::UsernameTaken,
            "invalid_credentials" => Notice::InvalidCredentials,
            _ => return Err(()),
        })
    }
}

impl Serialize for Notice {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        #[derive(Serialize)]
        struct Wire {
            kind: NoticeKind,
            message: &'static str,
        }
        Wire {
            kind: self.kind(),
            message: self.message(),
        }
        .serialize(serializer)
    }
}
