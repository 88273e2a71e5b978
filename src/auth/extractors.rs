use std::convert::Infallible;

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};

use super::cookies::SetCookies;
use super::dto::UserProfile;
use super::flow::resolve_current_user;
use crate::state::AppState;

/// The signed-in user, if any. `cookies` holds the session cookie refresh or
/// removal and must be included in the handler's response.
pub struct CurrentUser {
    pub user: Option<UserProfile>,
    pub cookies: SetCookies,
}

#[async_trait]
impl FromRequestParts<AppState> for CurrentUser {
    type Rejection = Infallible;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let session_id = state.sessions.read_session_cookie(&parts.headers);
        let resolution = resolve_current_user(state, session_id.as_deref()).await;
        Ok(CurrentUser {
            user: resolution.user,
            cookies: resolution.cookie.into(),
        })
    }
}
