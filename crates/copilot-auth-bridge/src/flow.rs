use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use oauth2::CsrfToken;
use tokio::sync::Mutex;
use tokio::time::timeout;
use tracing::{info, warn};
use url::Url;

use crate::{AuthError, AuthorizationRequest, OAuthConfig};

pub const DEFAULT_AUTH_TIMEOUT: Duration = Duration::from_secs(300);

#[derive(Debug, thiserror::Error)]
pub enum WebAuthError {
    #[error("the user closed the consent window")]
    Cancelled,
    #[error("no redirect arrived within {0:?}")]
    TimedOut(Duration),
    #[error("{0}")]
    Platform(String),
}

/// A transient browser surface that walks the user through consent.
///
/// `launch` resolves with the URL the identity provider redirected to.
#[async_trait]
pub trait WebAuthFlow: Send + Sync {
    /// The callback origin registered for this caller.
    fn redirect_uri(&self) -> String;

    async fn launch(&self, auth_url: Url) -> Result<Url, WebAuthError>;
}

/// Redeems an authorization code server-side (`POST /auth` on the backend).
#[async_trait]
pub trait CodeExchange: Send + Sync {
    async fn exchange_code(&self, code: &str) -> anyhow::Result<serde_json::Value>;
}

#[derive(Debug, Clone)]
pub struct Authorization {
    /// Acknowledgement returned by the backend, passed through untouched.
    pub exchange_response: serde_json::Value,
}

pub struct AuthFlowCoordinator {
    config: OAuthConfig,
    web_auth: Arc<dyn WebAuthFlow>,
    exchange: Arc<dyn CodeExchange>,
    consent_gate: Mutex<()>,
    auth_timeout: Duration,
}

impl AuthFlowCoordinator {
    pub fn new(
        config: OAuthConfig,
        web_auth: Arc<dyn WebAuthFlow>,
        exchange: Arc<dyn CodeExchange>,
    ) -> Self {
        Self {
            config,
            web_auth,
            exchange,
            consent_gate: Mutex::new(()),
            auth_timeout: DEFAULT_AUTH_TIMEOUT,
        }
    }

    pub fn with_auth_timeout(mut self, auth_timeout: Duration) -> Self {
        self.auth_timeout = auth_timeout;
        self
    }

    /// Run one complete authorization: consent, code extraction, backend exchange.
    ///
    /// The exchange is only attempted once a code has been extracted. Calls made
    /// while another flow is showing its consent surface wait their turn.
    pub async fn begin_authorization(&self) -> Result<Authorization, AuthError> {
        let code = {
            let _gate = self.consent_gate.lock().await;
            acquire_code(&self.config, self.web_auth.as_ref(), self.auth_timeout).await?
        };

        let exchange_response = self
            .exchange
            .exchange_code(&code)
            .await
            .map_err(|err| AuthError::Exchange(format!("{:#}", err)))?;

        info!("backend acknowledged authorization code: {}", exchange_response);
        Ok(Authorization { exchange_response })
    }
}

/// Open the consent surface for a fresh request and return the extracted code.
pub async fn acquire_code(
    config: &OAuthConfig,
    web_auth: &dyn WebAuthFlow,
    auth_timeout: Duration,
) -> Result<String, AuthError> {
    let request = AuthorizationRequest::new(config, &web_auth.redirect_uri())?;
    info!("starting authorization flow (redirect: {})", request.redirect_uri);

    let redirect = match timeout(auth_timeout, web_auth.launch(request.url.clone())).await {
        Err(_) => {
            warn!("authorization flow timed out after {:?}", auth_timeout);
            return Err(AuthError::TimedOut(auth_timeout));
        }
        Ok(Err(WebAuthError::Cancelled)) => return Err(AuthError::Cancelled),
        Ok(Err(WebAuthError::TimedOut(waited))) => {
            warn!("consent surface gave up after {:?}", waited);
            return Err(AuthError::TimedOut(auth_timeout));
        }
        Ok(Err(WebAuthError::Platform(message))) => return Err(AuthError::Provider(message)),
        Ok(Ok(url)) => url,
    };

    let code = extract_code(&redirect, &request.state)?;
    info!("received authorization code (length: {})", code.len());
    Ok(code)
}

/// Pull the authorization code out of a redirect URL.
///
/// Checks in order: provider `error`, exactly one non-empty `code`, matching `state`.
pub fn extract_code(redirect: &Url, expected_state: &CsrfToken) -> Result<String, AuthError> {
    let mut codes = Vec::new();
    let mut state = None;
    let mut error = None;
    let mut error_description = None;

    for (key, value) in redirect.query_pairs() {
        match key.as_ref() {
            "code" => codes.push(value.into_owned()),
            "state" => state = Some(value.into_owned()),
            "error" => error = Some(value.into_owned()),
            "error_description" => error_description = Some(value.into_owned()),
            _ => {}
        }
    }

    if let Some(error) = error {
        if error == "access_denied" {
            return Err(AuthError::Cancelled);
        }
        return Err(AuthError::Provider(match error_description {
            Some(description) => format!("{}: {}", error, description),
            None => error,
        }));
    }

    let code = match codes.as_slice() {
        [code] if !code.is_empty() => code.clone(),
        _ => return Err(AuthError::MissingCode),
    };

    if state.as_deref() != Some(expected_state.secret().as_str()) {
        return Err(AuthError::StateMismatch);
    }

    Ok(code)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const REDIRECT: &str = "http://127.0.0.1:8847/callback";

    fn config() -> OAuthConfig {
        OAuthConfig {
            client_id: "client-123".to_string(),
            ..OAuthConfig::default()
        }
    }

    fn state_of(url: &Url) -> String {
        let params: HashMap<String, String> = url.query_pairs().into_owned().collect();
        params["state"].clone()
    }

    /// What the fake consent surface does with the request it is given.
    #[derive(Clone)]
    enum Consent {
        Grant(&'static str),
        Redirect(&'static str),
        Cancel,
        Fail(&'static str),
        Hang,
    }

    struct FakeWebAuth {
        consent: Consent,
        launches: AtomicUsize,
    }

    impl FakeWebAuth {
        fn new(consent: Consent) -> Arc<Self> {
            Arc::new(Self {
                consent,
                launches: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl WebAuthFlow for FakeWebAuth {
        fn redirect_uri(&self) -> String {
            REDIRECT.to_string()
        }

        async fn launch(&self, auth_url: Url) -> Result<Url, WebAuthError> {
            self.launches.fetch_add(1, Ordering::SeqCst);
            match self.consent.clone() {
                Consent::Grant(code) => Ok(Url::parse(&format!(
                    "{}?code={}&state={}",
                    REDIRECT,
                    code,
                    state_of(&auth_url)
                ))
                .unwrap()),
                Consent::Redirect(query) => {
                    Ok(Url::parse(&format!("{}?{}", REDIRECT, query)).unwrap())
                }
                Consent::Cancel => Err(WebAuthError::Cancelled),
                Consent::Fail(message) => Err(WebAuthError::Platform(message.to_string())),
                Consent::Hang => std::future::pending().await,
            }
        }
    }

    #[derive(Default)]
    struct RecordingExchange {
        codes: std::sync::Mutex<Vec<String>>,
        fail: bool,
    }

    #[async_trait]
    impl CodeExchange for RecordingExchange {
        async fn exchange_code(&self, code: &str) -> anyhow::Result<serde_json::Value> {
            self.codes.lock().unwrap().push(code.to_string());
            if self.fail {
                anyhow::bail!("backend returned HTTP 500");
            }
            Ok(serde_json::json!({"status": "ok"}))
        }
    }

    fn coordinator(web_auth: Arc<FakeWebAuth>, exchange: Arc<RecordingExchange>) -> AuthFlowCoordinator {
        AuthFlowCoordinator::new(config(), web_auth, exchange)
    }

    #[tokio::test]
    async fn test_successful_flow_forwards_code_to_backend() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(FakeWebAuth::new(Consent::Grant("4/abc")), exchange.clone());

        let result = flow.begin_authorization().await.unwrap();

        assert_eq!(result.exchange_response["status"], "ok");
        assert_eq!(*exchange.codes.lock().unwrap(), vec!["4/abc".to_string()]);
    }

    #[tokio::test]
    async fn test_missing_code_is_an_explicit_error_and_skips_exchange() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(FakeWebAuth::new(Consent::Redirect("scope=drive")), exchange.clone());

        let err = flow.begin_authorization().await.unwrap_err();

        assert!(matches!(err, AuthError::MissingCode));
        assert!(exchange.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_code_is_not_exchanged() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(FakeWebAuth::new(Consent::Redirect("code=")), exchange.clone());

        assert!(matches!(
            flow.begin_authorization().await.unwrap_err(),
            AuthError::MissingCode
        ));
        assert!(exchange.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_cancelled_consent_skips_exchange() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(FakeWebAuth::new(Consent::Cancel), exchange.clone());

        assert!(matches!(
            flow.begin_authorization().await.unwrap_err(),
            AuthError::Cancelled
        ));
        assert!(exchange.codes.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_platform_error_is_reported_verbatim() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(
            FakeWebAuth::new(Consent::Fail("Authorization page could not be loaded.")),
            exchange,
        );

        match flow.begin_authorization().await.unwrap_err() {
            AuthError::Provider(message) => {
                assert_eq!(message, "Authorization page could not be loaded.")
            }
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_backend_failure_surfaces_as_exchange_error() {
        let exchange = Arc::new(RecordingExchange {
            fail: true,
            ..RecordingExchange::default()
        });
        let flow = coordinator(FakeWebAuth::new(Consent::Grant("4/abc")), exchange);

        match flow.begin_authorization().await.unwrap_err() {
            AuthError::Exchange(message) => assert!(message.contains("HTTP 500")),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_hanging_consent_times_out() {
        let exchange = Arc::new(RecordingExchange::default());
        let flow = coordinator(FakeWebAuth::new(Consent::Hang), exchange)
            .with_auth_timeout(Duration::from_millis(20));

        assert!(matches!(
            flow.begin_authorization().await.unwrap_err(),
            AuthError::TimedOut(_)
        ));
    }

    #[tokio::test]
    async fn test_concurrent_flows_use_independent_requests() {
        let web_auth = FakeWebAuth::new(Consent::Grant("4/abc"));
        let exchange = Arc::new(RecordingExchange::default());
        let flow = Arc::new(coordinator(web_auth.clone(), exchange.clone()));

        let (a, b) = tokio::join!(flow.begin_authorization(), flow.begin_authorization());

        assert!(a.is_ok());
        assert!(b.is_ok());
        assert_eq!(web_auth.launches.load(Ordering::SeqCst), 2);
        assert_eq!(exchange.codes.lock().unwrap().len(), 2);
    }

    #[test]
    fn test_extract_code_checks_state() {
        let state = CsrfToken::new("expected".to_string());
        let redirect = Url::parse(&format!("{}?code=4/abc&state=other", REDIRECT)).unwrap();
        assert!(matches!(
            extract_code(&redirect, &state),
            Err(AuthError::StateMismatch)
        ));

        let redirect = Url::parse(&format!("{}?code=4/abc", REDIRECT)).unwrap();
        assert!(matches!(
            extract_code(&redirect, &state),
            Err(AuthError::StateMismatch)
        ));
    }

    #[test]
    fn test_extract_code_decodes_query() {
        let state = CsrfToken::new("s1".to_string());
        let redirect =
            Url::parse(&format!("{}?state=s1&code=4%2F0AX-y&scope=drive", REDIRECT)).unwrap();
        assert_eq!(extract_code(&redirect, &state).unwrap(), "4/0AX-y");
    }

    #[test]
    fn test_extract_code_rejects_duplicate_codes() {
        let state = CsrfToken::new("s1".to_string());
        let redirect = Url::parse(&format!("{}?code=a&code=b&state=s1", REDIRECT)).unwrap();
        assert!(matches!(
            extract_code(&redirect, &state),
            Err(AuthError::MissingCode)
        ));
    }

    #[test]
    fn test_extract_code_maps_provider_errors() {
        let state = CsrfToken::new("s1".to_string());

        let denied = Url::parse(&format!("{}?error=access_denied&state=s1", REDIRECT)).unwrap();
        assert!(matches!(extract_code(&denied, &state), Err(AuthError::Cancelled)));

        let other = Url::parse(&format!(
            "{}?error=invalid_scope&error_description=bad+scope",
            REDIRECT
        ))
        .unwrap();
        match extract_code(&other, &state) {
            Err(AuthError::Provider(message)) => assert_eq!(message, "invalid_scope: bad scope"),
            other => panic!("unexpected result: {:?}", other),
        }
    }
}
