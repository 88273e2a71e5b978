use serde::{Deserialize, Serialize};

use crate::error::AuthError;
use crate::store::User;

/// Request body for email/password sign-up.
#[derive(Debug, Deserialize)]
pub struct SignUpRequest {
    pub email: String,
    pub name: String,
    pub password: String,
}

/// Request body for email/password sign-in.
#[derive(Debug, Deserialize)]
pub struct SignInRequest {
    pub email: String,
    pub password: String,
}

/// Query string of the provider redirect.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
}

/// The fields a protected page may show.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UserProfile {
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

impl From<User> for UserProfile {
    fn from(u: User) -> Self {
        Self {
            name: u.name,
            email: u.email,
            picture: u.picture,
        }
    }
}

/// `{success, error?, url?}` envelope returned by the form actions.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct ActionResponse {
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub url: Option<String>,
}

impl ActionResponse {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            url: None,
        }
    }

    pub fn redirect_to(url: String) -> Self {
        Self {
            url: Some(url),
            ..Self::ok()
        }
    }

    pub fn failure(err: &AuthError) -> Self {
        Self {
            success: false,
            error: Some(err.user_message()),
            url: None,
        }
    }
}
