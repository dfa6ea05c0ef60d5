//! REST directory client.
//!
//! | Operation | Request | Success | Not found |
//! |-----------|---------|---------|-----------|
//! | fetch | `GET {base}/keys/{peerId}` | `200 {"publicKey": "<base64>"}` | `404` |
//! | publish | `PUT {base}/keys/{ownerId}` with `{"publicKey": "<base64>"}` | any 2xx | n/a |
//!
//! Every other status, and every connection failure, is a `TransportError`.

use std::time::Duration;

use async_trait::async_trait;
use base64::{engine::general_purpose::STANDARD as BASE64, Engine as _};
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize};

use super::PeerKeyDirectory;
use crate::error::{Error, Result};

/// Configuration for [`HttpDirectory`]
#[derive(Debug, Clone)]
pub struct HttpDirectoryConfig {
    /// Base URL; `/keys/{id}` is appended
    pub base_url: String,
    /// Per-request timeout
    pub timeout: Duration,
}

impl Default for HttpDirectoryConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080/api".to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct KeyBody {
    public_key: String,
}

/// Directory reached over HTTP
#[derive(Debug, Clone)]
pub struct HttpDirectory {
    client: reqwest::Client,
    base: Url,
}

impl HttpDirectory {
    /// Build a client for the directory at `config.base_url`
    pub fn new(config: HttpDirectoryConfig) -> Result<Self> {
        let base = Url::parse(&config.base_url)
            .map_err(|e| Error::TransportError(format!("invalid directory URL: {}", e)))?;
        if base.cannot_be_a_base() {
            return Err(Error::TransportError(
                "directory URL cannot carry a path".into(),
            ));
        }

        let client = reqwest::Client::builder().timeout(config.timeout).build()?;

        Ok(Self { client, base })
    }

    fn key_url(&self, participant_id: &str) -> Result<Url> {
        let mut url = self.base.clone();
        {
            let mut segments = url.path_segments_mut().map_err(|_| {
                Error::TransportError("directory URL cannot carry a path".into())
            })?;
            segments.pop_if_empty().push("keys").push(participant_id);
        }
        Ok(url)
    }
}

#[async_trait]
impl PeerKeyDirectory for HttpDirectory {
    async fn fetch_public_key(&self, peer_id: &str) -> Result<Option<Vec<u8>>> {
        let response = self.client.get(self.key_url(peer_id)?).send().await?;

        match response.status() {
            StatusCode::NOT_FOUND => Ok(None),
            status if status.is_success() => {
                let body: KeyBody = response.json().await?;
                let bytes = BASE64.decode(body.public_key.as_bytes()).map_err(|_| {
                    Error::KeyImportError("directory returned a key that is not base64".into())
                })?;
                Ok(Some(bytes))
            }
            status => Err(Error::TransportError(format!(
                "directory answered {} for key lookup",
                status
            ))),
        }
    }

    async fn publish_public_key(&self, owner_id: &str, public_key: &[u8]) -> Result<()> {
        let body = KeyBody {
            public_key: BASE64.encode(public_key),
        };

        let response = self
            .client
            .put(self.key_url(owner_id)?)
            .json(&body)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::TransportError(format!(
                "directory answered {} for key publication",
                status
            )));
        }

        tracing::debug!("Published public key for {}", owner_id);
        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
