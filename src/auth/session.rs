//! Opaque server-side sessions carried by a browser-session cookie.
//!
//! Sessions slide: once less than half of the lifetime remains, validation
//! pushes `expires_at` forward and marks the session `fresh`, which tells the
//! caller to reissue the cookie.

use std::sync::Arc;

use axum::http::HeaderMap;
use cookie::Cookie;
use rand::{distributions::Alphanumeric, rngs::OsRng, Rng};
use time::{Duration, OffsetDateTime};
use tracing::debug;
use uuid::Uuid;

use super::cookies;
use crate::store::{CredentialStore, SessionRecord, StoreResult, User};

const SESSION_ID_LEN: usize = 40;

#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub cookie_name: String,
    pub expires_in: Duration,
    pub secure: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Session {
    pub id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
    /// Cookie must be reissued.
    pub fresh: bool,
}

impl Session {
    fn from_record(r: SessionRecord, fresh: bool) -> Self {
        Self {
            id: r.id,
            user_id: r.user_id,
            created_at: r.created_at,
            expires_at: r.expires_at,
            fresh,
        }
    }
}

/// Outcome of [`SessionManager::validate_session`]. Both fields are `None`
/// when the token is unknown or expired.
#[derive(Debug, Clone, Default)]
pub struct SessionValidation {
    pub session: Option<Session>,
    pub user: Option<User>,
}

fn generate_session_id() -> String {
    OsRng
        .sample_iter(&Alphanumeric)
        .take(SESSION_ID_LEN)
        .map(char::from)
        .collect()
}

#[derive(Clone)]
pub struct SessionManager {
    store: Arc<dyn CredentialStore>,
    config: SessionConfig,
}

impl SessionManager {
    pub fn new(store: Arc<dyn CredentialStore>, config: SessionConfig) -> Self {
        Self { store, config }
    }

    pub async fn create_session(&self, user_id: Uuid) -> StoreResult<Session> {
        let now = OffsetDateTime::now_utc();
        let record = SessionRecord {
            id: generate_session_id(),
            user_id,
            created_at: now,
            expires_at: now + self.config.expires_in,
        };
        self.store.create_session(&record).await?;
        debug!(user_id = %user_id, "session created");
        Ok(Session::from_record(record, true))
    }

    pub async fn validate_session(&self, session_id: &str) -> StoreResult<SessionValidation> {
        let Some(mut record) = self.store.find_session(session_id).await? else {
            return Ok(SessionValidation::default());
        };

        let now = OffsetDateTime::now_utc();
        if now >= record.expires_at {
            debug!(user_id = %record.user_id, "session expired");
            self.store.delete_session(&record.id).await?;
            return Ok(SessionValidation::default());
        }

        let Some(user) = self.store.find_user_by_id(record.user_id).await? else {
            self.store.delete_session(&record.id).await?;
            return Ok(SessionValidation::default());
        };

        let mut fresh = false;
        if now >= record.expires_at - self.config.expires_in / 2 {
            record.expires_at = now + self.config.expires_in;
            self.store
                .update_session_expiration(&record.id, record.expires_at)
                .await?;
            fresh = true;
            debug!(user_id = %record.user_id, "session extended");
        }

        Ok(SessionValidation {
            session: Some(Session::from_record(record, fresh)),
            user: Some(user),
        })
    }

    pub async fn invalidate_session(&self, session_id: &str) -> StoreResult<()> {
        self.store.delete_session(session_id).await
    }

    pub fn create_session_cookie(&self, session_id: &str) -> Cookie<'static> {
        cookies::session_cookie(&self.config.cookie_name, session_id, self.config.secure)
    }

    pub fn create_blank_session_cookie(&self) -> Cookie<'static> {
        cookies::removal_cookie(&self.config.cookie_name, self.config.secure)
    }

    pub fn read_session_cookie(&self, headers: &HeaderMap) -> Option<String> {
        cookies::read_cookie(headers, &self.config.cookie_name)
    }
}
