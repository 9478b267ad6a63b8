use camino::{Utf8Path, Utf8PathBuf};
use futures::StreamExt;
use reqwest::header::HeaderMap;
use reqwest::Client;
use std::time::Duration;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::debug;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);
const READ_TIMEOUT: Duration = Duration::from_secs(30);
const RETRY_PAUSE: Duration = Duration::from_millis(500);

#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("connection to {uri} failed: {reason}")]
    Connect { uri: String, reason: String },
    #[error("unexpected status {status} for {uri}")]
    Status { uri: String, status: u16 },
    #[error("read from {uri} failed: {reason}")]
    Read { uri: String, reason: String },
    #[error("write to {path} failed: {source}")]
    Io {
        path: Utf8PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A full in-memory response: status, headers (for Link-header discovery),
/// decoded body.
#[derive(Debug)]
pub struct TextResponse {
    pub status: u16,
    pub headers: HeaderMap,
    pub body: String,
}

/// HTTP access for sitemaps and resources. One shared client, bounded
/// timeouts, and exactly one retry on connection-level failures.
#[derive(Debug, Clone)]
pub struct Fetcher {
    client: Client,
}

impl Fetcher {
    pub fn new() -> Self {
        let client = Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .read_timeout(READ_TIMEOUT)
            .build()
            .unwrap_or_default();
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }

    /// GET `uri` and decode the body as text. Non-2xx statuses are errors.
    pub async fn get_text(&self, uri: &str) -> Result<TextResponse, FetchError> {
        let response = self.send(uri).await?;
        let status = response.status().as_u16();
        let headers = response.headers().clone();
        if !response.status().is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status,
            });
        }
        let body = response.text().await.map_err(|e| FetchError::Read {
            uri: uri.to_string(),
            reason: e.to_string(),
        })?;
        debug!(uri, status, bytes = body.len(), "fetched text");
        Ok(TextResponse {
            status,
            headers,
            body,
        })
    }

    /// Stream the body of `uri` to `target`. The bytes land in a `.part`
    /// sibling first and are renamed onto `target` only after a complete,
    /// synced write; a failed transfer leaves no partial target behind.
    pub async fn download(&self, uri: &str, target: &Utf8Path) -> Result<u64, FetchError> {
        let response = self.send(uri).await?;
        if !response.status().is_success() {
            return Err(FetchError::Status {
                uri: uri.to_string(),
                status: response.status().as_u16(),
            });
        }

        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| FetchError::Io {
                    path: parent.to_owned(),
                    source: e,
                })?;
        }

        let part = Utf8PathBuf::from(format!("{target}.part"));
        let written = match self.stream_to(response, uri, &part).await {
            Ok(n) => n,
            Err(e) => {
                let _ = tokio::fs::remove_file(&part).await;
                return Err(e);
            }
        };

        if let Err(e) = tokio::fs::rename(&part, target).await {
            let _ = tokio::fs::remove_file(&part).await;
            return Err(FetchError::Io {
                path: target.to_owned(),
                source: e,
            });
        }
        debug!(uri, %target, bytes = written, "downloaded");
        Ok(written)
    }

    async fn stream_to(
        &self,
        response: reqwest::Response,
        uri: &str,
        part: &Utf8Path,
    ) -> Result<u64, FetchError> {
        let io_err = |e| FetchError::Io {
            path: part.to_owned(),
            source: e,
        };
        let mut file = File::create(part).await.map_err(io_err)?;
        let mut stream = response.bytes_stream();
        let mut written = 0u64;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| FetchError::Read {
                uri: uri.to_string(),
                reason: e.to_string(),
            })?;
            file.write_all(&chunk).await.map_err(io_err)?;
            written += chunk.len() as u64;
        }
        file.sync_all().await.map_err(io_err)?;
        Ok(written)
    }

    /// Issue the GET, retrying once after a short pause when the failure is
    /// at the connection level (DNS, refused, timeout).
    async fn send(&self, uri: &str) -> Result<reqwest::Response, FetchError> {
        match self.client.get(uri).send().await {
            Ok(response) => Ok(response),
            Err(first) if first.is_connect() || first.is_timeout() => {
                debug!(uri, error = %first, "transient fetch failure, retrying once");
                tokio::time::sleep(RETRY_PAUSE).await;
                self.client
                    .get(uri)
                    .send()
                    .await
                    .map_err(|e| FetchError::Connect {
                        uri: uri.to_string(),
                        reason: e.to_string(),
                    })
            }
            Err(e) => Err(FetchError::Connect {
                uri: uri.to_string(),
                reason: e.to_string(),
            }),
        }
    }
}

impl Default for Fetcher {
    fn default() -> Self {
        Self::new()
    }
}
