//! Authorization plumbing for Drive Copilot.
//!
//! Two pieces live here:
//! - the authorization-code flow (`AuthFlowCoordinator`), which opens a consent
//!   surface through a [`WebAuthFlow`], pulls the `code` out of the redirect and
//!   hands it to the backend through a [`CodeExchange`];
//! - the token bridge (`token_bridge`), a request/reply channel that lets an
//!   unprivileged caller ask the context owning the identity capability for an
//!   access token.

use std::time::Duration;

use oauth2::{
    basic::BasicClient, AuthUrl, ClientId, CsrfToken, EndpointNotSet, EndpointSet, RedirectUrl,
    Scope,
};
use serde::Deserialize;
use url::Url;

pub mod flow;
pub mod identity;
pub mod loopback;
pub mod token_bridge;

pub use flow::{extract_code, AuthFlowCoordinator, Authorization, CodeExchange, WebAuthError, WebAuthFlow};
pub use identity::{IdentityProvider, OAuthIdentity};
pub use loopback::LoopbackWebAuth;
pub use token_bridge::{
    BridgeError, BridgeReply, BridgeRequest, TokenBridge, TokenBridgeClient, WireReply,
    WireRequest,
};

pub const GOOGLE_AUTH_URL: &str = "https://accounts.google.com/o/oauth2/auth";
pub const GOOGLE_TOKEN_URL: &str = "https://oauth2.googleapis.com/token";
pub const DRIVE_READONLY_SCOPE: &str = "https://www.googleapis.com/auth/drive.readonly";
pub const DEFAULT_CALLBACK_PORT: u16 = 8847;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct OAuthConfig {
    pub client_id: String,
    /// Only needed where the code is redeemed locally (the bridge daemon).
    pub client_secret: Option<String>,
    pub auth_url: String,
    pub token_url: String,
    /// Space separated, as sent on the wire.
    pub scope: String,
    pub callback_port: u16,
}

impl Default for OAuthConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: None,
            auth_url: GOOGLE_AUTH_URL.to_string(),
            token_url: GOOGLE_TOKEN_URL.to_string(),
            scope: DRIVE_READONLY_SCOPE.to_string(),
            callback_port: DEFAULT_CALLBACK_PORT,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    #[error("authorization was cancelled")]
    Cancelled,
    #[error("identity provider error: {0}")]
    Provider(String),
    /// The redirect came back without a single non-empty `code` parameter.
    #[error("redirect URL did not carry a usable authorization code")]
    MissingCode,
    #[error("redirect state does not match the authorization request")]
    StateMismatch,
    #[error("no authorization result within {0:?}")]
    TimedOut(Duration),
    #[error("invalid OAuth configuration: {0}")]
    Config(String),
    #[error("backend code exchange failed: {0}")]
    Exchange(String),
}

/// One authorization attempt: the consent URL plus the state it must come back with.
///
/// Built fresh for every flow and dropped once the redirect has been checked.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: Url,
    pub redirect_uri: String,
    pub state: CsrfToken,
}

type AuthorizeClient =
    BasicClient<EndpointSet, EndpointNotSet, EndpointNotSet, EndpointNotSet, EndpointNotSet>;

impl AuthorizationRequest {
    pub fn new(config: &OAuthConfig, redirect_uri: &str) -> Result<Self, AuthError> {
        Self::with_state(config, redirect_uri, CsrfToken::new_random())
    }

    pub fn with_state(
        config: &OAuthConfig,
        redirect_uri: &str,
        state: CsrfToken,
    ) -> Result<Self, AuthError> {
        let client = build_authorize_client(config, redirect_uri)?;
        let mut req = client.authorize_url(|| state);
        for scope in config.scope.split_whitespace() {
            req = req.add_scope(Scope::new(scope.to_string()));
        }
        let (url, state) = req
            .add_extra_param("access_type", "offline")
            .add_extra_param("prompt", "consent")
            .url();
        Ok(Self {
            url,
            redirect_uri: redirect_uri.to_string(),
            state,
        })
    }
}

fn build_authorize_client(config: &OAuthConfig, redirect_uri: &str) -> Result<AuthorizeClient, AuthError> {
    if config.client_id.trim().is_empty() {
        return Err(AuthError::Config("client_id is not set".to_string()));
    }
    let auth_url = AuthUrl::new(config.auth_url.clone())
        .map_err(|_| AuthError::Config(format!("invalid auth_url: {}", config.auth_url)))?;
    let redirect_url = RedirectUrl::new(redirect_uri.to_string())
        .map_err(|_| AuthError::Config(format!("invalid redirect uri: {}", redirect_uri)))?;
    Ok(BasicClient::new(ClientId::new(config.client_id.clone()))
        .set_auth_uri(auth_url)
        .set_redirect_uri(redirect_url))
}
