//! Header helpers shared by the auth handlers.

use axum::http::{
    header::{InvalidHeaderValue, AUTHORIZATION, COOKIE, USER_AGENT},
    HeaderMap, HeaderValue,
};

use crate::auth::RequestProvenance;

pub const DEVICE_ID_HEADER: &str = "x-device-id";
pub const STATE_COOKIE_NAME: &str = "oauth_state";
const STATE_COOKIE_PATH: &str = "/v1/auth/google";
const STATE_COOKIE_MAX_AGE: u32 = 600;

fn header_str<'a>(headers: &'a HeaderMap, name: impl axum::http::header::AsHeaderName) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
}

/// Extract a client IP from common proxy headers.
pub fn extract_client_ip(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if forwarded.is_some() {
        return forwarded.map(str::to_string);
    }
    header_str(headers, "x-real-ip").map(str::to_string)
}

/// Request provenance recorded on sessions and audit entries.
pub fn provenance(headers: &HeaderMap) -> RequestProvenance {
    RequestProvenance {
        ip_address: extract_client_ip(headers),
        user_agent: header_str(headers, USER_AGENT).map(str::to_string),
        device_id: header_str(headers, DEVICE_ID_HEADER).map(str::to_string),
    }
}

/// Token from an `Authorization: Bearer <token>` header.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = header_str(headers, AUTHORIZATION)?;
    let (scheme, token) = value.split_once(' ')?;
    if !scheme.eq_ignore_ascii_case("bearer") {
        return None;
    }
    let token = token.trim();
    (!token.is_empty()).then_some(token)
}

/// Value of a named cookie from the `Cookie` header(s).
pub fn extract_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(COOKIE)
        .iter()
        .filter_map(|value| value.to_str().ok())
        .flat_map(|value| value.split(';'))
        .filter_map(|pair| pair.trim().split_once('='))
        .find(|(key, _)| *key == name)
        .map(|(_, value)| value.to_string())
}

/// Short-lived `HttpOnly` cookie carrying the OAuth CSRF state.
pub fn state_cookie(state: &str, secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie = format!(
        "{STATE_COOKIE_NAME}={state}; Path={STATE_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age={STATE_COOKIE_MAX_AGE}"
    );
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}

pub fn clear_state_cookie(secure: bool) -> Result<HeaderValue, InvalidHeaderValue> {
    let mut cookie =
        format!("{STATE_COOKIE_NAME}=; Path={STATE_COOKIE_PATH}; HttpOnly; SameSite=Lax; Max-Age=0");
    if secure {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie)
}
