use anyhow::{anyhow, Result};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;

use copilot_auth_bridge::{BridgeError, BridgeReply, BridgeRequest, WireReply, WireRequest};

/// Requesting side of the token bridge, talking to the daemon's socket.
pub struct BridgeSocketClient {
    socket_path: PathBuf,
}

impl BridgeSocketClient {
    pub fn new(socket_path: &Path) -> Self {
        Self {
            socket_path: socket_path.to_path_buf(),
        }
    }

    pub fn is_daemon_running(&self) -> bool {
        self.socket_path.exists()
    }

    /// Ask for a token and wait at most `reply_timeout` for the answer.
    pub async fn get_auth_token(&self, reply_timeout: Duration) -> Result<String> {
        let id = format!("cli-{}", std::process::id());
        let reply = tokio::time::timeout(reply_timeout, self.send(&id, &BridgeRequest::GetAuthToken))
            .await
            .map_err(|_| BridgeError::TimedOut(reply_timeout))??;

        match reply {
            BridgeReply::Token { token } => Ok(token),
            BridgeReply::Error { error } => Err(BridgeError::Provider(error).into()),
        }
    }

    async fn send(&self, id: &str, request: &BridgeRequest) -> Result<BridgeReply> {
        let mut stream = UnixStream::connect(&self.socket_path).await.map_err(|e| {
            anyhow!(
                "Cannot connect to bridge at {}: {}",
                self.socket_path.display(),
                e
            )
        })?;

        let payload = serde_json::to_string(&WireRequest::new(id, request))?;
        stream.write_all(payload.as_bytes()).await?;
        stream.write_all(b"\n").await?;

        let mut reader = BufReader::new(stream);
        loop {
            let mut line = String::new();
            if reader.read_line(&mut line).await? == 0 {
                return Err(BridgeError::Closed.into());
            }

            let reply: WireReply = serde_json::from_str(&line)?;
            // Unmatched ids are parse failures the daemon could not attribute
            match reply.id.as_deref() {
                Some(reply_id) if reply_id == id => return Ok(reply.reply),
                None => return Ok(reply.reply),
                Some(_) => continue,
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UnixListener;

    async fn one_shot_daemon(reply: &'static str) -> (tempfile::TempDir, PathBuf) {
        let dir = tempfile::tempdir().unwrap();
        let socket_path = dir.path().join("bridge.sock");
        let listener = UnixListener::bind(&socket_path).unwrap();
        tokio::spawn(async move {
            let (stream, _) = listener.accept().await.unwrap();
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            let request = lines.next_line().await.unwrap().unwrap();
            let request: WireRequest = serde_json::from_str(&request).unwrap();
            assert_eq!(request.kind, "getAuthToken");
            let reply = reply.replace("{id}", request.id.as_deref().unwrap_or_default());
            writer.write_all(reply.as_bytes()).await.unwrap();
            writer.write_all(b"\n").await.unwrap();
            // Hold the connection open so a missing reply shows up as a timeout
            std::future::pending::<()>().await;
        });
        (dir, socket_path)
    }

    #[tokio::test]
    async fn test_token_reply() {
        let (_dir, socket_path) = one_shot_daemon(r#"{"id":"{id}","token":"ya29.abc"}"#).await;
        let client = BridgeSocketClient::new(&socket_path);
        let token = client.get_auth_token(Duration::from_secs(5)).await.unwrap();
        assert_eq!(token, "ya29.abc");
    }

    #[tokio::test]
    async fn test_error_reply_is_a_provider_error() {
        let (_dir, socket_path) =
            one_shot_daemon(r#"{"id":"{id}","error":"The user did not approve access."}"#).await;
        let client = BridgeSocketClient::new(&socket_path);
        let err = client.get_auth_token(Duration::from_secs(5)).await.unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>(),
            Some(&BridgeError::Provider("The user did not approve access.".to_string()))
        );
    }

    #[tokio::test]
    async fn test_foreign_reply_is_skipped_until_timeout() {
        let (_dir, socket_path) = one_shot_daemon(r#"{"id":"someone-else","token":"nope"}"#).await;
        let client = BridgeSocketClient::new(&socket_path);
        let err = client
            .get_auth_token(Duration::from_millis(100))
            .await
            .unwrap_err();
        assert_eq!(
            err.downcast_ref::<BridgeError>(),
            Some(&BridgeError::TimedOut(Duration::from_millis(100)))
        );
    }

    #[tokio::test]
    async fn test_missing_daemon() {
        let dir = tempfile::tempdir().unwrap();
        let client = BridgeSocketClient::new(&dir.path().join("bridge.sock"));
        assert!(!client.is_daemon_running());
        let err = client.get_auth_token(Duration::from_secs(1)).await.unwrap_err();
        assert!(err.to_string().contains("Cannot connect to bridge"));
    }
}
