//! Minimal `Cookie` / `Set-Cookie` handling for the session, notice and csrf cookies.

use axum::http::{header::COOKIE, HeaderMap, HeaderValue};

/// Value of cookie `name` from the request, if present and non-empty.
pub fn read(headers: &HeaderMap, name: &str) -> Option<String> {
    for header in headers.get_all(COOKIE) {
        let Ok(value) = header.to_str() else { continue };
        for pair in value.split(';') {
            let mut parts = pair.trim().splitn(2, '=');
            let key = parts.next().unwrap_or_default().trim();
            let val = parts.next().unwrap_or_default().trim();
            if key == name && !val.is_empty() {
                return Some(val.to_string());
            }
        }
    }
    None
}

/// `HttpOnly; SameSite=Lax` cookie scoped to the whole site.
pub fn set(name: &str, value: &str, max_age_secs: i64, secure: bool) -> HeaderValue {
    let mut cookie =
        format!("{name}={value}; Path=/; HttpOnly; SameSite=Lax; Max-Age={max_age_secs}");
    if secure {
        cookie.push_str("; Secure");
    }
    // Names and values are hex / JWT / fixed codes; all header-safe.
    HeaderValue::from_str(&cookie).unwrap_or_else(|_| HeaderValue::from_static(""))
}

pub fn clear(name: &str, secure: bool) -> HeaderValue {
    set(name, "", 0, secure)
}
