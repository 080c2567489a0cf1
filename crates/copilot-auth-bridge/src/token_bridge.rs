//! Request/reply channel between an unprivileged requester and the context
//! that owns the identity capability.
//!
//! Every request gets an id and its own reply handle, parked in a pending map
//! until the handler answers. The handler serves each request in a separate
//! task and always answers exactly once, on success and on failure.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::{mpsc, oneshot, Mutex};
use tracing::{debug, info, warn};

use crate::identity::IdentityProvider;

pub type RequestId = u64;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum BridgeRequest {
    #[serde(rename = "getAuthToken")]
    GetAuthToken,
}

impl BridgeRequest {
    pub fn kind(&self) -> &'static str {
        match self {
            BridgeRequest::GetAuthToken => "getAuthToken",
        }
    }

    pub fn from_kind(kind: &str) -> Option<Self> {
        match kind {
            "getAuthToken" => Some(BridgeRequest::GetAuthToken),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum BridgeReply {
    Token { token: String },
    Error { error: String },
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BridgeError {
    /// The identity provider answered with an error; the message is passed on as-is.
    #[error("{0}")]
    Provider(String),
    #[error("no reply from the token bridge within {0:?}")]
    TimedOut(Duration),
    #[error("token bridge is not running")]
    Closed,
}

/// Line-delimited JSON form of a request: `{"id":"7","type":"getAuthToken"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(rename = "type")]
    pub kind: String,
}

impl WireRequest {
    pub fn new(id: impl Into<String>, request: &BridgeRequest) -> Self {
        Self {
            id: Some(id.into()),
            kind: request.kind().to_string(),
        }
    }
}

/// Line-delimited JSON form of a reply: `{"id":"7","token":"..."}` or `{"id":"7","error":"..."}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WireReply {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    #[serde(flatten)]
    pub reply: BridgeReply,
}

struct Envelope {
    id: RequestId,
    request: BridgeRequest,
}

type PendingReplies = Arc<Mutex<HashMap<RequestId, oneshot::Sender<BridgeReply>>>>;

/// The privileged side.
pub struct TokenBridge;

impl TokenBridge {
    /// Start serving requests against `identity`. Must be called inside a Tokio runtime.
    pub fn spawn(identity: Arc<dyn IdentityProvider>) -> TokenBridgeClient {
        let (request_tx, request_rx) = mpsc::channel::<Envelope>(64);
        let (reply_tx, reply_rx) = mpsc::channel::<(RequestId, BridgeReply)>(64);
        let pending: PendingReplies = Arc::new(Mutex::new(HashMap::new()));

        tokio::spawn(serve(identity, request_rx, reply_tx));
        tokio::spawn(route_replies(reply_rx, pending.clone()));

        TokenBridgeClient {
            next_id: Arc::new(AtomicU64::new(1)),
            request_tx,
            pending,
            reply_timeout: None,
        }
    }
}

async fn serve(
    identity: Arc<dyn IdentityProvider>,
    mut request_rx: mpsc::Receiver<Envelope>,
    reply_tx: mpsc::Sender<(RequestId, BridgeReply)>,
) {
    info!("token bridge started");
    while let Some(envelope) = request_rx.recv().await {
        let identity = identity.clone();
        let reply_tx = reply_tx.clone();
        tokio::spawn(async move {
            debug!("serving {} request {}", envelope.request.kind(), envelope.id);
            let reply = answer(identity, envelope.request).await;
            if reply_tx.send((envelope.id, reply)).await.is_err() {
                warn!("reply router gone; dropping reply for request {}", envelope.id);
            }
        });
    }
    info!("token bridge stopped");
}

async fn answer(identity: Arc<dyn IdentityProvider>, request: BridgeRequest) -> BridgeReply {
    match request {
        BridgeRequest::GetAuthToken => {
            // Run the grant in its own task so a panic still produces a reply.
            let grant = tokio::spawn(async move { identity.get_auth_token(true).await });
            match grant.await {
                Ok(Ok(token)) => BridgeReply::Token { token },
                Ok(Err(err)) => BridgeReply::Error {
                    error: format!("{:#}", err),
                },
                Err(err) => BridgeReply::Error {
                    error: format!("identity provider failed: {}", err),
                },
            }
        }
    }
}

async fn route_replies(mut reply_rx: mpsc::Receiver<(RequestId, BridgeReply)>, pending: PendingReplies) {
    while let Some((id, reply)) = reply_rx.recv().await {
        match pending.lock().await.remove(&id) {
            Some(reply_handle) => {
                let _ = reply_handle.send(reply);
            }
            None => debug!("request {} no longer waiting; reply discarded", id),
        }
    }
}

/// The requesting side. Cheap to clone; clones share the pending map.
#[derive(Clone)]
pub struct TokenBridgeClient {
    next_id: Arc<AtomicU64>,
    request_tx: mpsc::Sender<Envelope>,
    pending: PendingReplies,
    reply_timeout: Option<Duration>,
}

impl TokenBridgeClient {
    /// Bound the wait for each reply. Without it a request waits until answered.
    pub fn with_reply_timeout(mut self, reply_timeout: Duration) -> Self {
        self.reply_timeout = Some(reply_timeout);
        self
    }

    /// Send one request and wait for its reply.
    pub async fn request(&self, request: BridgeRequest) -> Result<BridgeReply, BridgeError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (reply_handle, reply) = oneshot::channel();
        self.pending.lock().await.insert(id, reply_handle);

        if self.request_tx.send(Envelope { id, request }).await.is_err() {
            self.pending.lock().await.remove(&id);
            return Err(BridgeError::Closed);
        }

        let outcome = match self.reply_timeout {
            Some(limit) => match tokio::time::timeout(limit, reply).await {
                Ok(outcome) => outcome,
                Err(_) => {
                    self.pending.lock().await.remove(&id);
                    return Err(BridgeError::TimedOut(limit));
                }
            },
            None => reply.await,
        };
        outcome.map_err(|_| BridgeError::Closed)
    }

    pub async fn get_auth_token(&self) -> Result<String, BridgeError> {
        match self.request(BridgeRequest::GetAuthToken).await? {
            BridgeReply::Token { token } => Ok(token),
            BridgeReply::Error { error } => Err(BridgeError::Provider(error)),
        }
    }

    /// Number of requests still waiting for a reply.
    pub async fn pending(&self) -> usize {
        self.pending.lock().await.len()
    }
}
