//! HTTP-backed provider speaking JSON-over-HTTP RPC to a full node.

use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use tracing::debug;

use lantern_core::{Evidence, SignedHeader, ValidatorSet};

use super::{Provider, ProviderError};

/// Default per-request timeout.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(10);

/// JSON envelope every RPC response arrives in.
#[derive(Deserialize)]
struct RpcEnvelope<T> {
    result: Option<T>,
    error: Option<RpcErrorBody>,
}

#[derive(Deserialize)]
struct RpcErrorBody {
    code: i64,
    message: String,
}

/// A provider that fetches signed headers and validator sets from a full
/// node's JSON RPC endpoint.
pub struct HttpProvider {
    chain_id: String,
    base_url: String,
    client: reqwest::Client,
}

impl HttpProvider {
    /// Create a provider for `chain_id` served at `base_url`.
    pub fn new(chain_id: impl Into<String>, base_url: impl Into<String>) -> Result<Self, ProviderError> {
        let client = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .map_err(|e| ProviderError::Unreliable(e.to_string()))?;
        let mut base_url = base_url.into();
        if !base_url.contains("://") {
            base_url = format!("http://{}", base_url);
        }
        Ok(Self {
            chain_id: chain_id.into(),
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    /// The node address this provider talks to.
    pub fn address(&self) -> &str {
        &self.base_url
    }

    async fn get<T: DeserializeOwned>(
        &self,
        endpoint: &str,
        height: u64,
    ) -> Result<T, ProviderError> {
        let url = format!("{}/{}?height={}", self.base_url, endpoint, height);
        debug!(%url, "fetching from provider");

        let response = self.client.get(&url).send().await.map_err(|e| {
            if e.is_timeout() || e.is_connect() {
                ProviderError::NoResponse
            } else {
                ProviderError::Unreliable(e.to_string())
            }
        })?;

        let envelope: RpcEnvelope<T> = response
            .json()
            .await
            .map_err(|e| ProviderError::Unreliable(e.to_string()))?;

        if let Some(err) = envelope.error {
            // The node's RPC maps missing heights to a distinct code.
            if err.code == -32603 && err.message.contains("not found") {
                return Err(ProviderError::NotFound { height });
            }
            return Err(ProviderError::Unreliable(format!(
                "rpc error {}: {}",
                err.code, err.message
            )));
        }

        envelope
            .result
            .ok_or_else(|| ProviderError::Unreliable("empty rpc result".to_string()))
    }
}

#[async_trait]
impl Provider for HttpProvider {
    fn chain_id(&self) -> &str {
        &self.chain_id
    }

    fn describe(&self) -> String {
        format!("http({})", self.base_url)
    }

    async fn signed_header(&self, height: u64) -> Result<SignedHeader, ProviderError> {
        let sh: SignedHeader = self.get("signed_header", height).await?;
        if sh.header.chain_id != self.chain_id {
            return Err(ProviderError::Unreliable(format!(
                "provider served chain {}, expected {}",
                sh.header.chain_id, self.chain_id
            )));
        }
        if height != super::LATEST_HEIGHT && sh.height() != height {
            return Err(ProviderError::Unreliable(format!(
                "asked for height {}, got {}",
                height,
                sh.height()
            )));
        }
        Ok(sh)
    }

    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, ProviderError> {
        let vs: ValidatorSet = self.get("validator_set", height).await?;
        if vs.is_empty() {
            return Err(ProviderError::Unreliable(
                "provider served empty validator set".to_string(),
            ));
        }
        Ok(vs)
    }

    async fn report_evidence(&self, evidence: Evidence) -> Result<(), ProviderError> {
        let url = format!("{}/broadcast_evidence", self.base_url);
        debug!(%url, height = evidence.height(), "reporting evidence");

        self.client
            .post(&url)
            .json(&evidence)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() || e.is_connect() {
                    ProviderError::NoResponse
                } else {
                    ProviderError::Unreliable(e.to_string())
                }
            })?
            .error_for_status()
            .map_err(|e| ProviderError::Unreliable(e.to_string()))?;
        Ok(())
    }
}
