use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::HeaderMap,
    response::{IntoResponse, Redirect, Response},
    routing::{get, post},
    Json, Router,
};
use tracing::{instrument, warn};

use super::cookies::{self, read_cookie, SetCookies, OAUTH_STATE_COOKIE, OAUTH_VERIFIER_COOKIE};
use super::dto::{ActionResponse, CallbackParams, SignInRequest, SignUpRequest};
use super::flow::{self, StoredOAuthState};
use crate::error::{AuthError, INVALID_REQUEST};
use crate::state::AppState;

pub const LANDING_PAGE: &str = "/dashboard";
pub const ENTRY_PAGE: &str = "/authenticate";

pub fn auth_routes() -> Router<AppState> {
    Router::new()
        .route("/api/auth/signup", post(sign_up))
        .route("/api/auth/signin", post(sign_in))
        .route("/api/auth/logout", post(log_out))
        .route("/api/auth/google", get(google_consent_url))
        .route("/api/auth/google/callback", get(google_callback))
}

/// Form actions answer 200 with the `{success, error}` envelope either way.
fn action_result(result: Result<cookie::Cookie<'static>, AuthError>) -> Response {
    match result {
        Ok(cookie) => (SetCookies::new().with(cookie), Json(ActionResponse::ok())).into_response(),
        Err(e) => {
            e.log();
            Json(ActionResponse::failure(&e)).into_response()
        }
    }
}

/// Unreadable bodies become a validation failure inside the envelope.
fn action_body<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AuthError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!(reason = %rejection.body_text(), "unreadable action body");
        AuthError::Validation(INVALID_REQUEST.into())
    })
}

#[instrument(skip(state, payload))]
pub async fn sign_up(
    State(state): State<AppState>,
    payload: Result<Json<SignUpRequest>, JsonRejection>,
) -> Response {
    let result = match action_body(payload) {
        Ok(req) => flow::sign_up(&state, req).await,
        Err(e) => Err(e),
    };
    action_result(result)
}

#[instrument(skip(state, payload))]
pub async fn sign_in(
    State(state): State<AppState>,
    payload: Result<Json<SignInRequest>, JsonRejection>,
) -> Response {
    let result = match action_body(payload) {
        Ok(req) => flow::sign_in(&state, req).await,
        Err(e) => Err(e),
    };
    action_result(result)
}

#[instrument(skip_all)]
pub async fn log_out(State(state): State<AppState>, headers: HeaderMap) -> impl IntoResponse {
    let session_id = state.sessions.read_session_cookie(&headers);
    let blank = flow::log_out(&state, session_id.as_deref()).await;
    (SetCookies::new().with(blank), Redirect::to(ENTRY_PAGE))
}

#[instrument(skip_all)]
pub async fn google_consent_url(State(state): State<AppState>) -> impl IntoResponse {
    let login = flow::begin_google_login(&state);
    (
        SetCookies::new()
            .with(login.state_cookie)
            .with(login.verifier_cookie),
        Json(ActionResponse::redirect_to(login.url)),
    )
}

#[instrument(skip_all)]
pub async fn google_callback(
    State(state): State<AppState>,
    Query(params): Query<CallbackParams>,
    headers: HeaderMap,
) -> Response {
    let stored = StoredOAuthState {
        state: read_cookie(&headers, OAUTH_STATE_COOKIE),
        code_verifier: read_cookie(&headers, OAUTH_VERIFIER_COOKIE),
    };

    // Handshake values are single-use whatever the outcome.
    let secure = state.secure_cookies();
    let mut set = SetCookies::new()
        .with(cookies::removal_cookie(OAUTH_STATE_COOKIE, secure))
        .with(cookies::removal_cookie(OAUTH_VERIFIER_COOKIE, secure));

    match flow::complete_google_login(&state, params, stored).await {
        Ok(session_cookie) => {
            set.push(session_cookie);
            (set, Redirect::to(LANDING_PAGE)).into_response()
        }
        Err(e) => (set, e).into_response(),
    }
}
