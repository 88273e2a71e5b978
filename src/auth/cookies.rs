use std::convert::Infallible;

use axum::{
    http::{header, HeaderMap, HeaderValue},
    response::{IntoResponseParts, ResponseParts},
};
use cookie::{time::Duration, Cookie, SameSite};
use tracing::warn;

pub const OAUTH_STATE_COOKIE: &str = "state";
pub const OAUTH_VERIFIER_COOKIE: &str = "codeVerifier";

/// Lifetime of the OAuth handshake cookies.
const OAUTH_COOKIE_MAX_AGE: Duration = Duration::minutes(10);

/// Base attributes shared by every cookie we issue.
fn base_cookie(name: &str, value: String, secure: bool) -> Cookie<'static> {
    Cookie::build((name.to_string(), value))
        .http_only(true)
        .secure(secure)
        .same_site(SameSite::Lax)
        .path("/")
        .build()
}

/// Browser-session cookie: no `Max-Age`, the server-side expiry is authoritative.
pub fn session_cookie(name: &str, value: &str, secure: bool) -> Cookie<'static> {
    base_cookie(name, value.to_string(), secure)
}

/// Empty cookie that immediately overwrites the client copy.
pub fn removal_cookie(name: &str, secure: bool) -> Cookie<'static> {
    let mut c = base_cookie(name, String::new(), secure);
    c.set_max_age(Duration::ZERO);
    c
}

pub fn oauth_cookie(name: &str, value: &str, secure: bool) -> Cookie<'static> {
    let mut c = base_cookie(name, value.to_string(), secure);
    c.set_max_age(OAUTH_COOKIE_MAX_AGE);
    c
}

/// Value of the named request cookie; empty values count as absent.
pub fn read_cookie(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get_all(header::COOKIE)
        .iter()
        .filter_map(|h| h.to_str().ok())
        .flat_map(|h| h.split(';'))
        .filter_map(|pair| Cookie::parse(pair.trim()).ok())
        .find(|c| c.name() == name)
        .map(|c| c.value().to_string())
        .filter(|v| !v.is_empty())
}

/// `Set-Cookie` headers to attach to a response.
#[derive(Debug, Default, Clone)]
pub struct SetCookies(Vec<Cookie<'static>>);

impl SetCookies {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, cookie: Cookie<'static>) -> Self {
        self.0.push(cookie);
        self
    }

    pub fn push(&mut self, cookie: Cookie<'static>) {
        self.0.push(cookie);
    }
}

impl From<Option<Cookie<'static>>> for SetCookies {
    fn from(cookie: Option<Cookie<'static>>) -> Self {
        Self(cookie.into_iter().collect())
    }
}

impl IntoResponseParts for SetCookies {
    type Error = Infallible;

    fn into_response_parts(self, mut res: ResponseParts) -> Result<ResponseParts, Self::Error> {
        for c in self.0 {
            match HeaderValue::from_str(&c.to_string()) {
                Ok(v) => {
                    res.headers_mut().append(header::SET_COOKIE, v);
                }
                Err(e) => warn!(error = %e, cookie = c.name(), "unencodable cookie dropped"),
            }
        }
        Ok(res)
    }
}
