//! Consent in the system browser with a one-shot callback server on 127.0.0.1.

use std::fmt;
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use tiny_http::{Header, Response, Server};
use tracing::{info, warn};
use url::Url;

use crate::flow::{WebAuthError, WebAuthFlow};

pub const CALLBACK_PATH: &str = "/callback";

const CALLBACK_PAGE: &str =
    "<html><body><h1>Success!</h1><p>You can close this window and return to Drive Copilot.</p></body></html>";

type UrlNotice = Arc<dyn Fn(&Url) + Send + Sync>;

#[derive(Clone)]
pub struct LoopbackWebAuth {
    port: u16,
    wait: Duration,
    open_browser: bool,
    url_notice: Option<UrlNotice>,
}

impl fmt::Debug for LoopbackWebAuth {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LoopbackWebAuth")
            .field("port", &self.port)
            .field("wait", &self.wait)
            .field("open_browser", &self.open_browser)
            .finish()
    }
}

impl LoopbackWebAuth {
    pub fn new(port: u16) -> Self {
        Self {
            port,
            wait: Duration::from_secs(300),
            open_browser: true,
            url_notice: None,
        }
    }

    /// How long the callback server stays up.
    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }

    /// Skip launching a browser; the caller opens the URL some other way.
    pub fn without_browser(mut self) -> Self {
        self.open_browser = false;
        self
    }

    /// Called with the consent URL whenever no browser was opened for it.
    pub fn with_url_notice(mut self, notice: impl Fn(&Url) + Send + Sync + 'static) -> Self {
        self.url_notice = Some(Arc::new(notice));
        self
    }

    fn announce(&self, auth_url: &Url) {
        match &self.url_notice {
            Some(notice) => notice(auth_url),
            None => info!("waiting for consent at {}", auth_url),
        }
    }
}

#[async_trait]
impl WebAuthFlow for LoopbackWebAuth {
    fn redirect_uri(&self) -> String {
        format!("http://127.0.0.1:{}{}", self.port, CALLBACK_PATH)
    }

    async fn launch(&self, auth_url: Url) -> Result<Url, WebAuthError> {
        let server = Server::http(("127.0.0.1", self.port))
            .map_err(|e| WebAuthError::Platform(format!("failed to start callback server: {}", e)))?;

        if self.open_browser {
            if let Err(e) = open::that(auth_url.as_str()) {
                warn!("could not open a browser: {}", e);
                self.announce(&auth_url);
            }
        } else {
            self.announce(&auth_url);
        }

        let port = self.port;
        let wait = self.wait;
        tokio::task::spawn_blocking(move || wait_for_callback(&server, port, wait))
            .await
            .map_err(|e| WebAuthError::Platform(format!("callback listener failed: {}", e)))?
    }
}

fn wait_for_callback(server: &Server, port: u16, wait: Duration) -> Result<Url, WebAuthError> {
    let deadline = Instant::now() + wait;
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            return Err(WebAuthError::TimedOut(wait));
        }

        let request = match server.recv_timeout(remaining) {
            Ok(Some(request)) => request,
            Ok(None) => continue,
            Err(e) => return Err(WebAuthError::Platform(format!("callback server error: {}", e))),
        };

        // Browsers also ask for /favicon.ico and the like
        let target = request.url().to_string();
        if !target.starts_with(CALLBACK_PATH) {
            let _ = request.respond(Response::from_string("not found").with_status_code(404));
            continue;
        }

        let redirect = Url::parse(&format!("http://127.0.0.1:{}{}", port, target))
            .map_err(|e| WebAuthError::Platform(format!("unreadable callback URL: {}", e)))?;

        let mut response = Response::from_string(CALLBACK_PAGE);
        if let Ok(header) = Header::from_bytes(&b"Content-Type"[..], &b"text/html"[..]) {
            response = response.with_header(header);
        }
        let _ = request.respond(response);

        return Ok(redirect);
    }
}
