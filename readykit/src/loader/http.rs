//! HTTP source loader backed by reqwest.
//!
//! The engine core is host-agnostic; this loader is the reference host
//! binding. It fetches a candidate URL, verifies the optional integrity
//! hash against the body, and records the install in an asset table keyed by
//! asset identifier. The table is the loader's single mutable resource and
//! stands in for the host's registration side effects.

use async_trait::async_trait;
use base64::Engine as _;
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::RwLock;
use std::time::Duration;

use crate::error::ReadinessError;
use crate::loader::{AssetKind, LoadRequest, SourceLoader};

/// A successfully installed asset.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstalledAsset {
    pub url: String,
    pub kind: AssetKind,
    pub bytes: usize,
}

pub struct HttpSourceLoader {
    client: reqwest::Client,
    installed: RwLock<HashMap<String, InstalledAsset>>,
}

impl HttpSourceLoader {
    pub fn new(client_timeout: Duration) -> Result<Self, ReadinessError> {
        let mut headers = reqwest::header::HeaderMap::new();
        headers.insert(
            reqwest::header::USER_AGENT,
            reqwest::header::HeaderValue::from_static("readykit/0.1"),
        );

        let client = reqwest::Client::builder()
            .timeout(client_timeout)
            .default_headers(headers)
            .build()
            .map_err(|e| ReadinessError::Config(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            installed: RwLock::new(HashMap::new()),
        })
    }

    /// The install recorded for an asset, if any source for it succeeded.
    pub fn installed(&self, asset: &str) -> Option<InstalledAsset> {
        self.installed
            .read()
            .expect("installed assets poisoned")
            .get(asset)
            .cloned()
    }

    async fn fetch(&self, request: &LoadRequest) -> Result<Vec<u8>, String> {
        let url = url::Url::parse(&request.url).map_err(|e| format!("invalid URL: {}", e))?;
        if url.scheme() != "http" && url.scheme() != "https" {
            return Err(format!("unsupported scheme '{}'", url.scheme()));
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| format!("request failed: {}", e))?;

        if !response.status().is_success() {
            return Err(format!("HTTP error: {}", response.status()));
        }

        let body = response
            .bytes()
            .await
            .map_err(|e| format!("failed to read body: {}", e))?;

        if let Some(integrity) = &request.integrity {
            if !integrity_matches(&body, integrity) {
                return Err(format!("integrity mismatch for '{}'", integrity));
            }
        }

        Ok(body.to_vec())
    }
}

#[async_trait]
impl SourceLoader for HttpSourceLoader {
    async fn load(&self, request: &LoadRequest) -> bool {
        match self.fetch(request).await {
            Ok(body) => {
                tracing::debug!(
                    asset = %request.asset,
                    url = %request.url,
                    kind = %request.kind,
                    bytes = body.len(),
                    "source loaded"
                );
                self.installed
                    .write()
                    .expect("installed assets poisoned")
                    .insert(
                        request.asset.clone(),
                        InstalledAsset {
                            url: request.url.clone(),
                            kind: request.kind,
                            bytes: body.len(),
                        },
                    );
                true
            }
            Err(reason) => {
                tracing::warn!(
                    asset = %request.asset,
                    url = %request.url,
                    "source load failed: {}",
                    reason
                );
                false
            }
        }
    }
}

/// Verify a body against an SRI-style `sha256-<base64 digest>` string.
fn integrity_matches(body: &[u8], integrity: &str) -> bool {
    let Some(encoded) = integrity.strip_prefix("sha256-") else {
        return false;
    };
    let expected = match base64::engine::general_purpose::STANDARD.decode(encoded) {
        Ok(bytes) => bytes,
        Err(_) => return false,
    };

    let mut hasher = Sha256::new();
    hasher.update(body);
    hasher.finalize().as_slice() == expected.as_slice()
}
