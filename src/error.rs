use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use tracing::error;

use crate::store::StoreError;

pub const GENERIC_FAILURE: &str = "Something went wrong";
pub const INVALID_CREDENTIALS: &str = "Invalid Credentials!";
pub const USER_EXISTS: &str = "User already exists";
pub const INVALID_REQUEST: &str = "Invalid Request";

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Missing or malformed input.
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("oauth state mismatch")]
    CsrfMismatch,
    #[error("user already exists")]
    AlreadyExists,
    /// Unknown email, OAuth-only account or wrong password; deliberately one variant.
    #[error("invalid credentials")]
    InvalidCredentials,
    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::UniqueViolation => AuthError::AlreadyExists,
            StoreError::Backend(e) => AuthError::Internal(e),
        }
    }
}

impl AuthError {
    /// Text safe to show the client. Internal causes never leak.
    pub fn user_message(&self) -> String {
        match self {
            AuthError::Validation(msg) => msg.clone(),
            AuthError::CsrfMismatch => INVALID_REQUEST.to_string(),
            AuthError::AlreadyExists => USER_EXISTS.to_string(),
            AuthError::InvalidCredentials => INVALID_CREDENTIALS.to_string(),
            AuthError::Internal(_) => GENERIC_FAILURE.to_string(),
        }
    }

    /// Server-side record of the cause.
    pub fn log(&self) {
        if let AuthError::Internal(e) = self {
            error!(error = ?e, "auth flow failed");
        }
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        self.log();
        match self {
            AuthError::Validation(_) | AuthError::CsrfMismatch => {
                (StatusCode::BAD_REQUEST, INVALID_REQUEST).into_response()
            }
            AuthError::AlreadyExists => (StatusCode::CONFLICT, USER_EXISTS).into_response(),
            AuthError::InvalidCredentials => {
                (StatusCode::UNAUTHORIZED, INVALID_CREDENTIALS).into_response()
            }
            AuthError::Internal(_) => {
                (StatusCode::INTERNAL_SERVER_ERROR, GENERIC_FAILURE).into_response()
            }
        }
    }
}
