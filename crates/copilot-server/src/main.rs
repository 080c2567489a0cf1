use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{UnixListener, UnixStream};
use tokio::sync::mpsc;
use tracing::{error, info, warn};

use copilot_auth_bridge::{
    BridgeReply, BridgeRequest, LoopbackWebAuth, OAuthIdentity, TokenBridge, TokenBridgeClient,
    WireReply, WireRequest,
};
use copilot_core::{CopilotConfig, CopilotPaths};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let paths = CopilotPaths::from_env();
    paths.ensure_dirs()?;
    let config = CopilotConfig::load_with_env(&paths.config_path)?;

    if config.oauth.client_id.is_empty() {
        warn!("no OAuth client_id configured; token requests will fail until one is set");
    }

    // Clean up a socket left behind by a previous run
    if Path::new(&paths.bridge_socket_path).exists() {
        std::fs::remove_file(&paths.bridge_socket_path)?;
    }

    let web_auth = LoopbackWebAuth::new(config.oauth.callback_port).with_wait(config.auth_timeout());
    let identity = OAuthIdentity::new(config.oauth.clone(), Arc::new(web_auth))
        .with_auth_timeout(config.auth_timeout());
    let bridge = TokenBridge::spawn(Arc::new(identity));

    let listener = UnixListener::bind(&paths.bridge_socket_path).with_context(|| {
        format!("Failed to bind {}", paths.bridge_socket_path.display())
    })?;
    info!("Token bridge listening on {}", paths.bridge_socket_path.display());

    loop {
        match listener.accept().await {
            Ok((stream, _)) => {
                let bridge = bridge.clone();
                tokio::spawn(async move {
                    if let Err(err) = handle_bridge_client(stream, bridge).await {
                        error!("Bridge client error: {}", err);
                    }
                });
            }
            Err(err) => {
                error!("Bridge accept error: {}", err);
            }
        }
    }
}

/// Serve one connection. Requests are answered concurrently, each exactly once,
/// and replies carry the request's id so the caller can match them up.
async fn handle_bridge_client(stream: UnixStream, bridge: TokenBridgeClient) -> Result<()> {
    let (reader, mut writer) = stream.into_split();
    let mut lines = BufReader::new(reader).lines();

    let (tx, mut rx) = mpsc::unbounded_channel::<WireReply>();

    let write_task = tokio::spawn(async move {
        while let Some(reply) = rx.recv().await {
            let payload = match serde_json::to_string(&reply) {
                Ok(p) => p,
                Err(err) => {
                    error!("Failed to serialize bridge reply: {}", err);
                    continue;
                }
            };
            if let Err(err) = writer.write_all(payload.as_bytes()).await {
                error!("Failed to write bridge reply: {}", err);
                break;
            }
            if let Err(err) = writer.write_all(b"\n").await {
                error!("Failed to write newline: {}", err);
                break;
            }
        }
    });

    while let Some(line) = lines.next_line().await? {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }

        let wire = match serde_json::from_str::<WireRequest>(trimmed) {
            Ok(wire) => wire,
            Err(err) => {
                info!("[BRIDGE] Failed to parse request: {}", err);
                let _ = tx.send(WireReply {
                    id: None,
                    reply: BridgeReply::Error {
                        error: format!("invalid request: {}", err),
                    },
                });
                continue;
            }
        };

        let Some(request) = BridgeRequest::from_kind(&wire.kind) else {
            let _ = tx.send(WireReply {
                id: wire.id,
                reply: BridgeReply::Error {
                    error: format!("unsupported message type: {}", wire.kind),
                },
            });
            continue;
        };

        info!("[BRIDGE] Request: id={:?}, type={}", wire.id, wire.kind);
        let bridge = bridge.clone();
        let tx = tx.clone();
        tokio::spawn(async move {
            let reply = match bridge.request(request).await {
                Ok(reply) => reply,
                Err(err) => BridgeReply::Error {
                    error: err.to_string(),
                },
            };
            let _ = tx.send(WireReply { id: wire.id, reply });
        });
    }

    // Close the channel so the writer drains and exits
    drop(tx);
    let _ = write_task.await;

    Ok(())
}
