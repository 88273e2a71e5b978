//! Sign-up, sign-in, log-out, Google login and per-request user resolution.
//!
//! Every operation that establishes a session hands back the cookie to set;
//! the HTTP layer decides how to attach it.

use cookie::Cookie;
use lazy_static::lazy_static;
use regex::Regex;
use tracing::{debug, error, info, instrument, warn};

use super::cookies::{self, OAUTH_STATE_COOKIE, OAUTH_VERIFIER_COOKIE};
use super::dto::{CallbackParams, SignInRequest, SignUpRequest, UserProfile};
use super::oauth::{self, GOOGLE_SCOPES};
use super::password::{hash_password, verify_password};
use crate::error::AuthError;
use crate::state::AppState;
use crate::store::{NewUser, StoreError};

const MIN_PASSWORD_LEN: usize = 8;

/// What the browser stored before being sent to the provider.
#[derive(Debug, Default)]
pub struct StoredOAuthState {
    pub state: Option<String>,
    pub code_verifier: Option<String>,
}

/// Current user plus the cookie rewrite the caller must send back, if any.
#[derive(Debug, Default)]
pub struct Resolution {
    pub user: Option<UserProfile>,
    pub cookie: Option<Cookie<'static>>,
}

/// Consent URL and the two handshake cookies.
#[derive(Debug)]
pub struct GoogleLogin {
    pub url: String,
    pub state_cookie: Cookie<'static>,
    pub verifier_cookie: Cookie<'static>,
}

pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

pub(crate) fn is_valid_email(email: &str) -> bool {
    lazy_static! {
        static ref EMAIL_RE: Regex = Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").unwrap();
    }
    EMAIL_RE.is_match(email)
}

/// Byte comparison whose running time does not depend on where inputs differ.
fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

async fn issue_session(state: &AppState, user_id: uuid::Uuid) -> Result<Cookie<'static>, AuthError> {
    let session = state.sessions.create_session(user_id).await?;
    Ok(state.sessions.create_session_cookie(&session.id))
}

#[instrument(skip(state, req))]
pub async fn sign_up(state: &AppState, req: SignUpRequest) -> Result<Cookie<'static>, AuthError> {
    let email = normalize_email(&req.email);
    let name = req.name.trim().to_string();

    if !is_valid_email(&email) {
        warn!("sign-up with invalid email");
        return Err(AuthError::Validation("Invalid email".into()));
    }
    if name.is_empty() {
        return Err(AuthError::Validation("Name is required".into()));
    }
    if req.password.len() < MIN_PASSWORD_LEN {
        return Err(AuthError::Validation("Password too short".into()));
    }

    // Best-effort pre-check; the unique index decides races.
    if state.store.find_user_by_email(&email).await?.is_some() {
        warn!(email = %email, "email already registered");
        return Err(AuthError::AlreadyExists);
    }

    let hashed_password = hash_password(&req.password)?;
    let user = state
        .store
        .create_user(NewUser {
            email,
            name,
            picture: None,
            hashed_password: Some(hashed_password),
        })
        .await?;

    let cookie = issue_session(state, user.id).await?;
    info!(user_id = %user.id, "user registered");
    Ok(cookie)
}

#[instrument(skip(state, req))]
pub async fn sign_in(state: &AppState, req: SignInRequest) -> Result<Cookie<'static>, AuthError> {
    let email = normalize_email(&req.email);

    let Some(user) = state.store.find_user_by_email(&email).await? else {
        warn!("sign-in for unknown email");
        return Err(AuthError::InvalidCredentials);
    };
    let Some(hash) = user.hashed_password.as_deref() else {
        warn!(user_id = %user.id, "password sign-in on oauth-only account");
        return Err(AuthError::InvalidCredentials);
    };
    if !verify_password(&req.password, hash) {
        warn!(user_id = %user.id, "sign-in with wrong password");
        return Err(AuthError::InvalidCredentials);
    }

    let cookie = issue_session(state, user.id).await?;
    info!(user_id = %user.id, "user signed in");
    Ok(cookie)
}

/// Always yields the blank cookie; a failing delete is only logged.
#[instrument(skip_all)]
pub async fn log_out(state: &AppState, session_id: Option<&str>) -> Cookie<'static> {
    if let Some(id) = session_id {
        if let Err(e) = state.sessions.invalidate_session(id).await {
            error!(error = %e, "session delete on logout failed");
        }
    }
    state.sessions.create_blank_session_cookie()
}

pub fn begin_google_login(state: &AppState) -> GoogleLogin {
    let oauth_state = oauth::generate_state();
    let code_verifier = oauth::generate_code_verifier();
    let secure = state.secure_cookies();

    let url = state
        .google
        .authorization_url(&oauth_state, &code_verifier, GOOGLE_SCOPES);
    debug!("google consent url issued");

    GoogleLogin {
        url,
        state_cookie: cookies::oauth_cookie(OAUTH_STATE_COOKIE, &oauth_state, secure),
        verifier_cookie: cookies::oauth_cookie(OAUTH_VERIFIER_COOKIE, &code_verifier, secure),
    }
}

#[instrument(skip_all)]
pub async fn complete_google_login(
    state: &AppState,
    params: CallbackParams,
    stored: StoredOAuthState,
) -> Result<Cookie<'static>, AuthError> {
    let (Some(code), Some(returned_state)) = (params.code, params.state) else {
        warn!("callback without code or state");
        return Err(AuthError::Validation("missing code or state".into()));
    };
    let (Some(code_verifier), Some(saved_state)) = (stored.code_verifier, stored.state) else {
        warn!("callback without stored verifier or state");
        return Err(AuthError::Validation("missing oauth cookies".into()));
    };
    if !constant_time_eq(returned_state.as_bytes(), saved_state.as_bytes()) {
        warn!("oauth state mismatch");
        return Err(AuthError::CsrfMismatch);
    }

    let access_token = state.google.exchange_code(&code, &code_verifier).await?;
    let profile = state.google.fetch_user(&access_token).await?;
    let email = normalize_email(&profile.email);
    if !is_valid_email(&email) {
        return Err(AuthError::Internal(anyhow::anyhow!(
            "provider returned unusable email"
        )));
    }
    if profile.verified_email == Some(false) {
        // Linking is by email alone; an unverified address can claim an existing account.
        warn!(email = %email, "provider reports unverified email");
    }

    let user = match state.store.find_user_by_email(&email).await? {
        Some(existing) => {
            info!(user_id = %existing.id, "google login linked to existing account");
            existing
        }
        None => {
            let new_user = NewUser {
                email: email.clone(),
                name: profile.name,
                picture: profile.picture,
                hashed_password: None,
            };
            match state.store.create_user(new_user).await {
                Ok(u) => {
                    info!(user_id = %u.id, "user created from google profile");
                    u
                }
                // A concurrent callback created it first.
                Err(StoreError::UniqueViolation) => state
                    .store
                    .find_user_by_email(&email)
                    .await?
                    .ok_or_else(|| anyhow::anyhow!("user vanished after unique violation"))?,
                Err(e) => return Err(e.into()),
            }
        }
    };

    issue_session(state, user.id).await
}

/// Runs on every protected page. Without a cookie the store is not touched.
#[instrument(skip_all)]
pub async fn resolve_current_user(state: &AppState, session_id: Option<&str>) -> Resolution {
    let Some(id) = session_id else {
        return Resolution::default();
    };

    let validation = match state.sessions.validate_session(id).await {
        Ok(v) => v,
        Err(e) => {
            error!(error = %e, "session validation failed");
            return Resolution::default();
        }
    };

    match (validation.session, validation.user) {
        (Some(session), Some(user)) => Resolution {
            cookie: session
                .fresh
                .then(|| state.sessions.create_session_cookie(&session.id)),
            user: Some(user.into()),
        },
        _ => Resolution {
            user: None,
            cookie: Some(state.sessions.create_blank_session_cookie()),
        },
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::error::{GENERIC_FAILURE, INVALID_CREDENTIALS};
    use crate::state::fake::{harness, harness_with, FakeProvider, Harness};
    use crate::store::{CredentialStore, SessionRecord};
    use time::{Duration, OffsetDateTime};

    fn signup(email: &str) -> SignUpRequest {
        SignUpRequest {
            email: email.into(),
            name: "Ada Lovelace".into(),
            password: "correct-horse".into(),
        }
    }

    fn signin(email: &str, password: &str) -> SignInRequest {
        SignInRequest {
            email: email.into(),
            password: password.into(),
        }
    }

    fn callback(code: &str, state: &str) -> CallbackParams {
        CallbackParams {
            code: Some(code.into()),
            state: Some(state.into()),
        }
    }

    fn stored(state: &str, verifier: &str) -> StoredOAuthState {
        StoredOAuthState {
            state: Some(state.into()),
            code_verifier: Some(verifier.into()),
        }
    }

    #[tokio::test]
    async fn sign_up_creates_one_user_and_a_valid_session() {
        let Harness { state, store, .. } = harness();

        let cookie = sign_up(&state, signup("A@X.com ")).await.expect("sign up");
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.session_count(), 1);
        assert_eq!(cookie.name(), "test_session");

        let v = state.sessions.validate_session(cookie.value()).await.unwrap();
        let user = v.user.expect("user");
        assert_eq!(user.email, "a@x.com");
        assert!(user.hashed_password.is_some());
    }

    #[tokio::test]
    async fn sign_up_with_taken_email_creates_nothing() {
        let Harness { state, store, .. } = harness();
        sign_up(&state, signup("a@x.com")).await.unwrap();

        let err = sign_up(&state, signup("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));
        let err = sign_up(&state, signup("  A@x.COM")).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn sign_up_validates_input() {
        let Harness { state, store, .. } = harness();
        let mut req = signup("not-an-email");
        assert!(matches!(
            sign_up(&state, req).await,
            Err(AuthError::Validation(_))
        ));
        req = signup("a@x.com");
        req.password = "short".into();
        assert!(matches!(
            sign_up(&state, req).await,
            Err(AuthError::Validation(_))
        ));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn sign_up_store_failure_is_generic() {
        let Harness { state, store, .. } = harness();
        store.fail_writes();
        let err = sign_up(&state, signup("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(err.user_message(), GENERIC_FAILURE);
    }

    #[tokio::test]
    async fn sign_up_losing_insert_race_reports_existing_user() {
        let Harness { state, store, .. } = harness();
        sign_up(&state, signup("a@x.com")).await.unwrap();

        store.miss_next_email_lookup();
        let err = sign_up(&state, signup("a@x.com")).await.unwrap_err();
        assert!(matches!(err, AuthError::AlreadyExists));
        assert_eq!(store.user_count(), 1);
        assert_eq!(store.session_count(), 1);
    }

    #[tokio::test]
    async fn sign_in_with_correct_password_succeeds() {
        let Harness { state, store, .. } = harness();
        sign_up(&state, signup("a@x.com")).await.unwrap();

        let cookie = sign_in(&state, signin("a@x.com", "correct-horse"))
            .await
            .expect("sign in");
        assert_eq!(store.session_count(), 2);
        let v = state.sessions.validate_session(cookie.value()).await.unwrap();
        assert_eq!(v.user.unwrap().email, "a@x.com");
    }

    #[tokio::test]
    async fn sign_in_failures_are_indistinguishable() {
        let Harness { state, .. } = harness();
        sign_up(&state, signup("a@x.com")).await.unwrap();
        state
            .store
            .create_user(NewUser {
                email: "oauth@x.com".into(),
                name: "OAuth Only".into(),
                picture: None,
                hashed_password: None,
            })
            .await
            .unwrap();

        let wrong_password = sign_in(&state, signin("a@x.com", "nope-nope")).await.unwrap_err();
        let unknown = sign_in(&state, signin("ghost@x.com", "correct-horse"))
            .await
            .unwrap_err();
        let oauth_only = sign_in(&state, signin("oauth@x.com", "correct-horse"))
            .await
            .unwrap_err();

        for err in [wrong_password, unknown, oauth_only] {
            assert!(matches!(err, AuthError::InvalidCredentials));
            assert_eq!(err.user_message(), INVALID_CREDENTIALS);
        }
    }

    #[tokio::test]
    async fn begin_google_login_sets_fresh_handshake_cookies() {
        let Harness { state, .. } = harness();
        let a = begin_google_login(&state);
        let b = begin_google_login(&state);

        assert_eq!(a.state_cookie.name(), OAUTH_STATE_COOKIE);
        assert_eq!(a.verifier_cookie.name(), OAUTH_VERIFIER_COOKIE);
        assert_eq!(a.state_cookie.http_only(), Some(true));
        assert!(a.url.contains(&format!("state={}", a.state_cookie.value())));
        assert!(a.url.contains("scope=email+profile"));
        assert_ne!(a.state_cookie.value(), b.state_cookie.value());
        assert_ne!(a.verifier_cookie.value(), b.verifier_cookie.value());
    }

    #[tokio::test]
    async fn state_mismatch_is_rejected_before_any_provider_call() {
        let Harness { state, provider, .. } = harness();
        let err = complete_google_login(&state, callback("c", "evil"), stored("good", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
        assert_eq!(provider.network_calls(), 0);

        // Comparison is case-sensitive.
        let err = complete_google_login(&state, callback("c", "GOOD"), stored("good", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::CsrfMismatch));
        assert_eq!(provider.network_calls(), 0);
    }

    #[tokio::test]
    async fn missing_verifier_cookie_never_exchanges() {
        let Harness { state, provider, .. } = harness();
        let only_state = StoredOAuthState {
            state: Some("s".into()),
            code_verifier: None,
        };
        let err = complete_google_login(&state, callback("c", "s"), only_state)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn missing_query_params_are_rejected() {
        let Harness { state, provider, .. } = harness();
        let no_code = CallbackParams {
            code: None,
            state: Some("s".into()),
        };
        let err = complete_google_login(&state, no_code, stored("s", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        let err = complete_google_login(&state, CallbackParams::default(), stored("s", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Validation(_)));
        assert_eq!(provider.network_calls(), 0);
    }

    #[tokio::test]
    async fn new_google_user_is_created_without_password() {
        let Harness {
            state,
            store,
            provider,
        } = harness();

        let cookie = complete_google_login(&state, callback("code-1", "s"), stored("s", "v"))
            .await
            .expect("callback");
        assert_eq!(provider.exchanges.load(Ordering::SeqCst), 1);
        assert_eq!(provider.fetches.load(Ordering::SeqCst), 1);

        let user = state
            .store
            .find_user_by_email("a@x.com")
            .await
            .unwrap()
            .expect("created");
        assert!(user.hashed_password.is_none());
        assert_eq!(user.name, "Ada Lovelace");
        assert_eq!(user.picture.as_deref(), Some("https://example.com/p.png"));
        assert_eq!(store.sessions_for(user.id).len(), 1);

        let v = state.sessions.validate_session(cookie.value()).await.unwrap();
        assert_eq!(v.user.unwrap().id, user.id);
    }

    #[tokio::test]
    async fn google_login_links_existing_password_account() {
        let Harness { state, store, .. } = harness();
        sign_up(&state, signup("a@x.com")).await.unwrap();
        let existing = state.store.find_user_by_email("a@x.com").await.unwrap().unwrap();

        complete_google_login(&state, callback("c", "s"), stored("s", "v"))
            .await
            .unwrap();

        assert_eq!(store.user_count(), 1);
        assert_eq!(store.sessions_for(existing.id).len(), 2);
        // The password still works after linking.
        sign_in(&state, signin("a@x.com", "correct-horse")).await.unwrap();
    }

    #[tokio::test]
    async fn google_login_losing_insert_race_uses_winning_row() {
        let Harness { state, store, .. } = harness();
        let winner = state
            .store
            .create_user(NewUser {
                email: "a@x.com".into(),
                name: "Ada".into(),
                picture: None,
                hashed_password: None,
            })
            .await
            .unwrap();

        store.miss_next_email_lookup();
        let cookie = complete_google_login(&state, callback("c", "s"), stored("s", "v"))
            .await
            .expect("callback");

        assert_eq!(store.user_count(), 1);
        assert_eq!(store.sessions_for(winner.id).len(), 1);
        let v = state.sessions.validate_session(cookie.value()).await.unwrap();
        assert_eq!(v.user.unwrap().id, winner.id);
    }

    #[tokio::test]
    async fn provider_email_case_does_not_duplicate_accounts() {
        let Harness { state, store, .. } =
            harness_with(FakeProvider::returning("A@X.COM", "Ada"));
        sign_up(&state, signup("a@x.com")).await.unwrap();
        complete_google_login(&state, callback("c", "s"), stored("s", "v"))
            .await
            .unwrap();
        assert_eq!(store.user_count(), 1);
    }

    #[tokio::test]
    async fn provider_failure_is_internal() {
        let mut provider = FakeProvider::returning("a@x.com", "Ada");
        provider.fail_exchange = true;
        let Harness { state, store, .. } = harness_with(provider);

        let err = complete_google_login(&state, callback("c", "s"), stored("s", "v"))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::Internal(_)));
        assert_eq!(store.user_count(), 0);
    }

    #[tokio::test]
    async fn resolve_without_cookie_never_touches_store() {
        let Harness { state, store, .. } = harness();
        let r = resolve_current_user(&state, None).await;
        assert!(r.user.is_none());
        assert!(r.cookie.is_none());
        assert_eq!(store.lookups(), 0);
    }

    #[tokio::test]
    async fn resolve_returns_profile_for_valid_session() {
        let Harness { state, .. } = harness();
        let cookie = sign_up(&state, signup("a@x.com")).await.unwrap();

        let r = resolve_current_user(&state, Some(cookie.value())).await;
        assert_eq!(
            r.user,
            Some(UserProfile {
                name: "Ada Lovelace".into(),
                email: "a@x.com".into(),
                picture: None,
            })
        );
        assert!(r.cookie.is_none());
    }

    #[tokio::test]
    async fn resolve_clears_cookie_for_unknown_session() {
        let Harness { state, .. } = harness();
        let r = resolve_current_user(&state, Some("forged")).await;
        assert!(r.user.is_none());
        let cookie = r.cookie.expect("blank cookie");
        assert_eq!(cookie.name(), "test_session");
        assert_eq!(cookie.value(), "");
    }

    #[tokio::test]
    async fn resolve_reissues_cookie_for_fresh_session() {
        let Harness { state, store, .. } = harness();
        let cookie = sign_up(&state, signup("a@x.com")).await.unwrap();
        let record = store.find_session(cookie.value()).await.unwrap().unwrap();
        let now = OffsetDateTime::now_utc();
        store.put_session(SessionRecord {
            expires_at: now + Duration::days(2),
            ..record
        });

        let r = resolve_current_user(&state, Some(cookie.value())).await;
        assert!(r.user.is_some());
        let refreshed = r.cookie.expect("refreshed cookie");
        assert_eq!(refreshed.value(), cookie.value());
        assert!(refreshed.max_age().is_none());
    }

    #[tokio::test]
    async fn log_out_then_resolve_yields_no_user() {
        let Harness { state, store, .. } = harness();
        let cookie = sign_up(&state, signup("a@x.com")).await.unwrap();

        let blank = log_out(&state, Some(cookie.value())).await;
        assert_eq!(blank.value(), "");
        assert_eq!(store.session_count(), 0);

        // Browser now sends the blank cookie, which reads as absent.
        let r = resolve_current_user(&state, None).await;
        assert!(r.user.is_none());
        // A replayed old token is dead too.
        let r = resolve_current_user(&state, Some(cookie.value())).await;
        assert!(r.user.is_none());
    }

    #[tokio::test]
    async fn log_out_without_session_is_idempotent() {
        let Harness { state, .. } = harness();
        let blank = log_out(&state, None).await;
        assert_eq!(blank.value(), "");
        let again = log_out(&state, Some("unknown")).await;
        assert_eq!(again.value(), "");
    }

    #[test]
    fn constant_time_eq_matches_only_identical_input() {
        assert!(constant_time_eq(b"abc", b"abc"));
        assert!(!constant_time_eq(b"abc", b"abd"));
        assert!(!constant_time_eq(b"abc", b"abcd"));
        assert!(!constant_time_eq(b"abc", b"ABC"));
    }
}
