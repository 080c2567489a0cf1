use std::sync::Arc;
use std::time::Duration;

use anyhow::{anyhow, bail, Result};
use async_trait::async_trait;
use oauth2::{
    basic::BasicClient, AuthorizationCode, ClientId, ClientSecret, EndpointNotSet, EndpointSet,
    RedirectUrl, RequestTokenError, TokenResponse, TokenUrl,
};
use reqwest::redirect::Policy;
use reqwest::Client;
use tokio::sync::Mutex;
use tracing::info;

use crate::flow::{acquire_code, WebAuthFlow, DEFAULT_AUTH_TIMEOUT};
use crate::OAuthConfig;

/// The platform identity capability owned by the privileged context.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    /// Obtain an opaque bearer token. Errors carry the provider's own message.
    async fn get_auth_token(&self, interactive: bool) -> Result<String>;
}

/// Interactive token grant: consent through a [`WebAuthFlow`], then redeem the
/// code at the provider's token endpoint.
pub struct OAuthIdentity {
    config: OAuthConfig,
    web_auth: Arc<dyn WebAuthFlow>,
    http_client: Client,
    consent_gate: Mutex<()>,
    auth_timeout: Duration,
}

type ExchangeClient =
    BasicClient<EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointSet>;

impl OAuthIdentity {
    pub fn new(config: OAuthConfig, web_auth: Arc<dyn WebAuthFlow>) -> Self {
        let http_client = Client::builder()
            .redirect(Policy::none())
            .build()
            .unwrap_or_else(|_| Client::new());
        Self {
            config,
            web_auth,
            http_client,
            consent_gate: Mutex::new(()),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    async fn exchange_code(&self, code: &str, redirect_uri: &str) -> Result<String> {
        let client = build_exchange_client(&self.config, redirect_uri)?;
        let token = client
            .exchange_code(AuthorizationCode::new(code.to_string()))
            .request_async(&self.http_client)
            .await
            .map_err(|err| match err {
                RequestTokenError::ServerResponse(response) => anyhow!("{}", response),
                other => anyhow!("token exchange failed: {}", other),
            })?;

        info!(
            "exchanged authorization code for {} token",
            token.token_type().as_ref()
        );
        Ok(token.access_token().secret().to_string())
    }
}

#[async_trait]
impl IdentityProvider for OAuthIdentity {
    async fn get_auth_token(&self, interactive: bool) -> Result<String> {
        if !interactive {
            bail!("no cached grant; an interactive sign-in is required");
        }
        let redirect_uri = self.web_auth.redirect_uri();
        let code = {
            let _gate = self.consent_gate.lock().await;
            acquire_code(&self.config, self.web_auth.as_ref(), self.auth_timeout).await?
        };
        self.exchange_code(&code, &redirect_uri).await
    }
}

fn build_exchange_client(config: &OAuthConfig, redirect_uri: &str) -> Result<ExchangeClient> {
    let token_url = TokenUrl::new(config.token_url.clone())
        .map_err(|_| anyhow!("invalid token_url"))?;
    let mut client = BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_token_uri(token_url)
        .set_redirect_uri(RedirectUrl::new(redirect_uri.to_string())?);
    if let Some(secret) = &config.client_secret {
        client = client.set_client_secret(ClientSecret::new(secret.clone()));
    }
    Ok(client)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flow::WebAuthError;
    use url::Url;

    struct NeverCalled;

    #[async_trait]
    impl WebAuthFlow for NeverCalled {
        fn redirect_uri(&self) -> String {
            "http://127.0.0.1:8847/callback".to_string()
        }

        async fn launch(&self, _auth_url: Url) -> Result<Url, WebAuthError> {
            panic!("consent surface should not open");
        }
    }

    struct Cancelling;

    #[async_trait]
    impl WebAuthFlow for Cancelling {
        fn redirect_uri(&self) -> String {
            "http://127.0.0.1:8847/callback".to_string()
        }

        async fn launch(&self, _auth_url: Url) -> Result<Url, WebAuthError> {
            Err(WebAuthError::Cancelled)
        }
    }

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-123".to_string(),
            client_secret: Some("shh".to_string()),
            ..OAuthConfig::default()
        }
    }

    #[tokio::test]
    async fn test_non_interactive_grant_is_refused() {
        let identity = OAuthIdentity::new(config(), Arc::new(NeverCalled));
        let err = identity.get_auth_token(false).await.unwrap_err();
        assert!(err.to_string().contains("interactive"));
    }

    #[tokio::test]
    async fn test_cancelled_consent_is_reported() {
        let identity = OAuthIdentity::new(config(), Arc::new(Cancelling));
        let err = identity.get_auth_token(true).await.unwrap_err();
        assert_eq!(err.to_string(), "authorization was cancelled");
    }

    #[test]
    fn test_exchange_client_rejects_bad_token_url() {
        let cfg = OAuthConfig {
            token_url: "not a url".to_string(),
            ..config()
        };
        assert!(build_exchange_client(&cfg, "http://127.0.0.1:8847/callback").is_err());
    }
}
