use async_trait::async_trait;
use sqlx::FromRow;
use time::OffsetDateTime;
use uuid::Uuid;

#[cfg(test)]
pub mod memory;
mod postgres;

pub use postgres::PgStore;

/// User record in the database.
#[derive(Debug, Clone, FromRow)]
pub struct User {
    pub id: Uuid,
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub hashed_password: Option<String>, // absent for OAuth-only accounts
    pub created_at: OffsetDateTime,
}

/// Fields needed to insert a user; the store assigns id and timestamp.
#[derive(Debug, Clone)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub picture: Option<String>,
    pub hashed_password: Option<String>,
}

/// Session row as persisted.
#[derive(Debug, Clone, PartialEq, Eq, FromRow)]
pub struct SessionRecord {
    pub id: String,
    pub user_id: Uuid,
    pub created_at: OffsetDateTime,
    pub expires_at: OffsetDateTime,
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("unique constraint violated")]
    UniqueViolation,
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl From<sqlx::Error> for StoreError {
    fn from(e: sqlx::Error) -> Self {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => StoreError::UniqueViolation,
            _ => StoreError::Backend(e.into()),
        }
    }
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Persistence for users and sessions.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn find_user_by_email(&self, email: &str) -> StoreResult<Option<User>>;
    async fn find_user_by_id(&self, id: Uuid) -> StoreResult<Option<User>>;
    /// Fails with [`StoreError::UniqueViolation`] when the email is taken.
    async fn create_user(&self, user: NewUser) -> StoreResult<User>;

    async fn create_session(&self, session: &SessionRecord) -> StoreResult<()>;
    async fn find_session(&self, id: &str) -> StoreResult<Option<SessionRecord>>;
    async fn update_session_expiration(
        &self,
        id: &str,
        expires_at: OffsetDateTime,
    ) -> StoreResult<()>;
    async fn delete_session(&self, id: &str) -> StoreResult<()>;
    /// Returns the number of rows removed.
    async fn delete_expired_sessions(&self) -> StoreResult<u64>;
}
