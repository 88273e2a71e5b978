//! In-memory store used by tests. Counts every lookup so tests can assert
//! that a code path never touched persistence.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use super::{CredentialStore, NewUser, SessionRecord, StoreError, StoreResult, User};

#[derive(Default)]
pub struct MemoryStore {
    users: Mutex<HashMap<Uuid, User>>,
    sessions: Mutex<HashMap<String, SessionRecord>>,
    lookups: AtomicUsize,
    read_only: AtomicBool,
    stale_email_lookup: AtomicBool,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }

    pub fn user_count(&self) -> usize {
        self.users.lock().unwrap().len()
    }

    pub fn session_count(&self) -> usize {
        self.sessions.lock().unwrap().len()
    }

    pub fn sessions_for(&self, user_id: Uuid) -> Vec<SessionRecord> {
        self.sessions
            .lock()
            .unwrap()
            .values()
            .filter(|s| s.user_id == user_id)
            .cloned()
            .collect()
    }

    /// Overwrite a stored session, e.g. to age it.
    pub fn put_session(&self, session: SessionRecord) {
        self.sessions
            .lock()
            .unwrap()
            .insert(session.id.clone(), session);
    }

    /// Make every subsequent write fail with a backend error.
    pub fn fail_writes(&self) {
        self.read_only.store(true, Ordering::SeqCst);
    }

    /// The next `find_user_by_email` misses, as if another writer inserted
    /// the row right after the read.
    pub fn miss_next_email_lookup(&self) {
        self.stale_email_lookup.store(true, Ordering::SeqCst);
    }

    fn check_writable(&self) -> StoreResult<()> {
        if self.read_only.load(Ordering::SeqCst) {
            return Err(StoreError::Backend(anyhow::anyhow!("store is read-only")));
        }
        Ok(())
    }

    fn touch(&self) {
        self.lookups.fetch_add(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>> {
        self.touch();
        if self.stale_email_lookup.swap(false, Ordering::SeqCst) {
            return Ok(None);
        }
        let users = self.users.lock().unwrap();
        Ok(users.values().find(|u| u.email == email).cloned())
    }

    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>> {
        self.touch();
        Ok(self.users.lock().unwrap().get(&id).cloned())
    }

    async fn create_user(&self, user: NewUser) -> StoreResult<User> {
        self.check_writable()?;
        let mut users = self.users.lock().unwrap();
        if users.values().any(|u| u.email == user.email) {
            return Err(StoreError::UniqueViolation);
        }
        let row = User {
            id: Uuid::new_v4(),
            email: user.email,
            name: user.name,
            picture: user.picture,
            hashed_password: user.hashed_password,
            created_at: OffsetDateTime::now_utc(),
        };
        users.insert(row.id, row.clone());
        Ok(row)
    }

    async fn create_session(&self, session: &SessionRecord) -> StoreResult<()> {
        self.check_writable()?;
        self.put_session(session.clone());
        Ok(())
    }

    async fn find_session(&self, id: &str) -> StoreResult<Option<SessionRecord>> {
        self.touch();
        Ok(self.sessions.lock().unwrap().get(id).cloned())
    }

    async fn update_session_expiration(
        &self,
        id: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()> {
        self.check_writable()?;
        if let Some(s) = self.sessions.lock().unwrap().get_mut(id) {
            s.expires_at = expires_at;
        }
        Ok(())
    }

    async fn delete_session(&self, id: &str) -> StoreResult<()> {
        self.check_writable()?;
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }

    async fn delete_expired_sessions(&self) -> StoreResult<u64> {
        self.check_writable()?;
        let now = OffsetDateTime::now_utc();
        let mut sessions = self.sessions.lock().unwrap();
        let before = sessions.len();
        sessions.retain(|_, s| s.expires_at > now);
        Ok((before - sessions.len()) as u64)
    }
}
