use std::sync::Arc;

use crate::auth::oauth::{GoogleOAuth, OAuthProvider};
use crate::auth::session::{SessionConfig, SessionManager};
use crate::config::AppConfig;
use crate::store::{CredentialStore, PgStore};

#[derive(Clone)]
pub struct AppState {
    pub config: Arc<AppConfig>,
    pub store: Arc<dyn CredentialStore>,
    pub sessions: SessionManager,
    pub google: Arc<dyn OAuthProvider>,
}

impl AppState {
    /// Connects the pool once; the returned store handle is shared by every request.
    pub async fn init() -> anyhow::Result<(Self, PgStore)> {
        let config = Arc::new(AppConfig::from_env()?);
        let pg = PgStore::connect(&config.database_url, config.max_connections).await?;
        let google = Arc::new(GoogleOAuth::new(&config.google)?) as Arc<dyn OAuthProvider>;
        let store = Arc::new(pg.clone()) as Arc<dyn CredentialStore>;
        Ok((Self::from_parts(config, store, google), pg))
    }

    pub fn from_parts(
        config: Arc<AppConfig>,
        store: Arc<dyn CredentialStore>,
        google: Arc<dyn OAuthProvider>,
    ) -> Self {
        let sessions = SessionManager::new(
            store.clone(),
            SessionConfig {
                cookie_name: config.session.cookie_name.clone(),
                expires_in: time::Duration::days(config.session.ttl_days),
                secure: config.production,
            },
        );
        Self {
            config,
            store,
            sessions,
            google,
        }
    }

    /// Whether cookies get the `Secure` attribute.
    pub fn secure_cookies(&self) -> bool {
        self.config.production
    }
}
