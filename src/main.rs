use std::sync::Arc;
use std::time::Duration;

mod app;
mod auth;
mod config;
mod error;
mod pages;
mod state;
mod store;

use crate::store::CredentialStore;

/// Periodically drops expired session rows.
fn spawn_session_sweeper(store: Arc<dyn CredentialStore>, every: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(every);
        tracing::info!("session sweeper started (interval: {:?})", every);
        loop {
            ticker.tick().await;
            match store.delete_expired_sessions().await {
                Ok(0) => {}
                Ok(n) => tracing::info!(removed = n, "expired sessions swept"),
                Err(e) => tracing::warn!(error = %e, "session sweep failed"),
            }
        }
    });
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let env_filter = std::env::var("RUST_LOG")
        .unwrap_or_else(|_| "gatekeeper=debug,axum=info,tower_http=info".to_string());
    let json_logs = std::env::var("LOG_FORMAT")
        .map(|v| v == "json")
        .unwrap_or(false);

    if json_logs {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .json()
            .init();
    } else {
        tracing_subscriber::fmt().with_env_filter(env_filter).init();
    }

    let (app_state, pg) = state::AppState::init().await?;

    if let Err(e) = sqlx::migrate!("./migrations").run(pg.pool()).await {
        tracing::warn!(error = %e, "migration failed; continuing");
    }

    let sweep_every = app_state.config.session.sweep_interval_secs;
    if sweep_every > 0 {
        spawn_session_sweeper(app_state.store.clone(), Duration::from_secs(sweep_every));
    }

    app::serve(app::build_app(app_state)).await
}
