//! Google sign-in through the authorization-code flow with PKCE.
//!
//! The flow controller generates `state` and the code verifier, keeps them in
//! cookies, and asks the provider for the consent URL. On callback the code
//! and verifier are exchanged for an access token, which is then used against
//! the user-info endpoint.

use anyhow::Context;
use async_trait::async_trait;
use oauth2::basic::BasicClient;
use oauth2::{
    AuthUrl, AuthorizationCode, ClientId, ClientSecret, CsrfToken, EndpointNotSet, EndpointSet,
    PkceCodeChallenge, PkceCodeVerifier, RedirectUrl, Scope, TokenResponse, TokenUrl,
};
use serde::Deserialize;
use tracing::debug;

use crate::config::GoogleConfig;

pub const GOOGLE_SCOPES: &[&str] = &["email", "profile"];

const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/v2/auth";
const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";

/// Profile returned by the provider's user-info endpoint.
#[derive(Debug, Clone, Deserialize)]
pub struct ProviderUser {
    pub id: String,
    pub email: String,
    #[serde(default)]
    pub name: String,
    pub picture: Option<String>,
    pub verified_email: Option<bool>,
}

#[async_trait]
pub trait OAuthProvider: Send + Sync {
    /// Consent URL carrying `state` and the S256 challenge of `code_verifier`.
    fn authorization_url(&self, state: &str, code_verifier: &str, scopes: &[&str]) -> String;
    /// Returns the access token.
    async fn exchange_code(&self, code: &str, code_verifier: &str) -> anyhow::Result<String>;
    async fn fetch_user(&self, access_token: &str) -> anyhow::Result<ProviderUser>;
}

pub fn generate_state() -> String {
    CsrfToken::new_random().secret().to_string()
}

pub fn generate_code_verifier() -> String {
    let (_, verifier) = PkceCodeChallenge::new_random_sha256();
    verifier.secret().to_string()
}

/// OAuth client type with auth URL and token URL set.
type ConfiguredClient = oauth2::Client<
    oauth2::basic::BasicErrorResponse,
    oauth2::basic::BasicTokenResponse,
    oauth2::basic::BasicTokenIntrospectionResponse,
    oauth2::StandardRevocableToken,
    oauth2::basic::BasicRevocationErrorResponse,
    EndpointSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointNotSet,
    EndpointSet,
>;

pub struct GoogleOAuth {
    client: ConfiguredClient,
    http: reqwest::Client,
    userinfo_url: String,
}

impl GoogleOAuth {
    pub fn new(config: &GoogleConfig) -> anyhow::Result<Self> {
        let client = BasicClient::new(ClientId::new(config.client_id.clone()))
            .set_client_secret(ClientSecret::new(config.client_secret.clone()))
            .set_auth_uri(AuthUrl::new(GOOGLE_AUTH_URL.to_string())?)
            .set_token_uri(TokenUrl::new(GOOGLE_TOKEN_URL.to_string())?)
            .set_redirect_uri(
                RedirectUrl::new(config.redirect_uri.clone()).context("invalid redirect uri")?,
            );

        // Token endpoints must not be followed through redirects.
        let http = reqwest::ClientBuilder::new()
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .context("build http client")?;

        Ok(Self {
            client,
            http,
            userinfo_url: config.userinfo_url.clone(),
        })
    }
}

#[async_trait]
impl OAuthProvider for GoogleOAuth {
    fn authorization_url(&self, state: &str, code_verifier: &str, scopes: &[&str]) -> String {
        let verifier = PkceCodeVerifier::new(code_verifier.to_string());
        let challenge = PkceCodeChallenge::from_code_verifier_sha256(&verifier);
        let state = state.to_string();

        let (url, _) = self
            .client
            .authorize_url(move || CsrfToken::new(state))
            .add_scopes(scopes.iter().map(|s| Scope::new(s.to_string())))
            .set_pkce_challenge(challenge)
            .url();
        url.to_string()
    }

    async fn exchange_code(&self, code: &str, code_verifier: &str) -> anyhow::Result<String> {
        let token = self
            .client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier.to_string()))
            .request_async(&self.http)
            .await
            .map_err(|e| anyhow::anyhow!("token exchange failed: {e}"))?;
        debug!("authorization code exchanged");
        Ok(token.access_token().secret().to_string())
    }

    async fn fetch_user(&self, access_token: &str) -> anyhow::Result<ProviderUser> {
        let user = self
            .http
            .get(&self.userinfo_url)
            .bearer_auth(access_token)
            .send()
            .await
            .context("user-info request")?
            .error_for_status()
            .context("user-info status")?
            .json::<ProviderUser>()
            .await
            .context("user-info body")?;
        Ok(user)
    }
}
