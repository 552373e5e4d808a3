//! HTTP client for the external group directory.
//!
//! Contract: `GET {base_url}/users/{email}/groups` answers
//! `{"groups": ["<group id>", ...]}`. Anything else is a `DirectoryError`,
//! which the principal resolver turns into "no memberships".

use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, Url};
use serde::Deserialize;
use tracing::instrument;

use keel_auth::{DirectoryError, GroupDirectory, GroupId};

#[derive(Debug, Deserialize)]
struct GroupsResponse {
    groups: Vec<String>,
}

#[derive(Debug, Clone)]
pub struct HttpGroupDirectory {
    client: Client,
    base_url: Url,
    timeout: Duration,
}

impl HttpGroupDirectory {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, DirectoryError> {
        let base_url = Url::parse(base_url)
            .map_err(|e| DirectoryError::Unavailable(format!("invalid directory url '{base_url}': {e}")))?;
        if base_url.cannot_be_a_base() {
            return Err(DirectoryError::Unavailable(format!(
                "directory url '{base_url}' cannot be a base"
            )));
        }

        Ok(Self {
            client: Client::new(),
            base_url,
            timeout,
        })
    }

    /// `{base}/users/{email}/groups`, with the email percent-encoded as a
    /// single path segment.
    fn groups_url(&self, email: &str) -> Result<Url, DirectoryError> {
        let mut url = self.base_url.clone();
        url.path_segments_mut()
            .map_err(|_| DirectoryError::Unavailable("directory url cannot be a base".to_string()))?
            .pop_if_empty()
            .extend(["users", email, "groups"]);
        Ok(url)
    }
}

fn map_reqwest_error(err: reqwest::Error) -> DirectoryError {
    if err.is_timeout() {
        DirectoryError::Timeout
    } else if err.is_decode() {
        DirectoryError::Malformed(err.to_string())
    } else {
        DirectoryError::Unavailable(err.to_string())
    }
}

#[async_trait]
impl GroupDirectory for HttpGroupDirectory {
    #[instrument(skip(self), err)]
    async fn groups_for(&self, email: &str) -> Result<Vec<GroupId>, DirectoryError> {
        let url = self.groups_url(email)?;

        let response = self
            .client
            .get(url)
            .timeout(self.timeout)
            .send()
            .await
            .map_err(map_reqwest_error)?;

        let status = response.status();
        if !status.is_success() {
            return Err(DirectoryError::Status(status.as_u16()));
        }

        let body: GroupsResponse = response.json().await.map_err(map_reqwest_error)?;
        Ok(body
            .groups
            .into_iter()
            .filter(|g| !g.trim().is_empty())
            .map(GroupId::new)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    use super::*;

    /// Serve a single canned HTTP response and hand back the request line.
    async fn serve_once(status: &'static str, body: &'static str) -> (String, tokio::task::JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let handle = tokio::spawn(async move {
            let (mut socket, _) = listener.accept().await.unwrap();
            let mut buf = vec![0u8; 4096];
            let n = socket.read(&mut buf).await.unwrap();
            let request = String::from_utf8_lossy(&buf[..n]).to_string();

            let response = format!(
                "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                body.len()
            );
            socket.write_all(response.as_bytes()).await.unwrap();
            socket.shutdown().await.ok();

            request.lines().next().unwrap_or_default().to_string()
        });

        (format!("http://{addr}/directory/"), handle)
    }

    #[test]
    fn email_is_a_single_encoded_segment() {
        let dir = HttpGroupDirectory::new("https://dir.example/api/", Duration::from_secs(1)).unwrap();
        let url = dir.groups_url("a/b@example.com").unwrap();
        assert_eq!(url.as_str(), "https://dir.example/api/users/a%2Fb@example.com/groups");
    }

    #[test]
    fn invalid_base_url_is_rejected() {
        assert!(HttpGroupDirectory::new("not a url", Duration::from_secs(1)).is_err());
        assert!(HttpGroupDirectory::new("mailto:ops@example.com", Duration::from_secs(1)).is_err());
    }

    #[tokio::test]
    async fn groups_are_read_from_payload() {
        let (base, server) = serve_once("200 OK", r#"{"groups":["eng","", "ops"]}"#).await;
        let dir = HttpGroupDirectory::new(&base, Duration::from_secs(2)).unwrap();

        let groups = dir.groups_for("dev@example.com").await.unwrap();
        assert_eq!(groups, vec![GroupId::new("eng"), GroupId::new("ops")]);

        let request_line = server.await.unwrap();
        assert!(request_line.starts_with("GET /directory/users/dev@example.com/groups"));
    }

    #[tokio::test]
    async fn error_status_is_reported() {
        let (base, _server) = serve_once("503 Service Unavailable", "{}").await;
        let dir = HttpGroupDirectory::new(&base, Duration::from_secs(2)).unwrap();

        let err = dir.groups_for("dev@example.com").await.unwrap_err();
        assert_eq!(err, DirectoryError::Status(503));
    }

    #[tokio::test]
    async fn malformed_payload_is_reported() {
        let (base, _server) = serve_once("200 OK", r#"{"members":[]}"#).await;
        let dir = HttpGroupDirectory::new(&base, Duration::from_secs(2)).unwrap();

        let err = dir.groups_for("dev@example.com").await.unwrap_err();
        assert!(matches!(err, DirectoryError::Malformed(_)));
    }

    #[tokio::test]
    async fn slow_directory_times_out() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let _server = tokio::spawn(async move {
            let (_socket, _) = listener.accept().await.unwrap();
            tokio::time::sleep(Duration::from_secs(5)).await;
        });

        let dir = HttpGroupDirectory::new(&format!("http://{addr}"), Duration::from_millis(100)).unwrap();
        let err = dir.groups_for("dev@example.com").await.unwrap_err();
        assert_eq!(err, DirectoryError::Timeout);
    }
}
