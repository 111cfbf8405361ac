//! Trusted state snapshots for bootstrapping a node via state sync.
//!
//! Builds a complete state object at a height using the light client for
//! header verification and the verifying facade for consensus parameters.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;

use lantern_core::{BlockId, Commit, ConsensusParams, Hash, ValidatorSet, Version};
use lantern_light::{
    LightClientBuilder, LightClientError, MemoryStore, Provider, TrustOptions,
};

use crate::client::VerifyingClient;
use crate::error::{Result, RpcError};
use crate::transport::RpcTransport;

/// A complete state snapshot at a height, as the consensus engine needs it
/// to resume from a state-sync restore.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateSnapshot {
    /// Chain identifier.
    pub chain_id: String,
    /// Consensus versions.
    pub version: Version,
    /// The chain's first height.
    pub initial_height: u64,
    /// Height of the snapshot block.
    pub last_block_height: u64,
    /// Time of the snapshot block.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_block_time: DateTime<Utc>,
    /// Identifier of the snapshot block.
    pub last_block_id: BlockId,
    /// Application hash after the snapshot block.
    pub app_hash: Hash,
    /// Results hash after the snapshot block.
    pub last_results_hash: Hash,
    /// Validators of the snapshot block.
    pub last_validators: ValidatorSet,
    /// Validators of the next block.
    pub validators: ValidatorSet,
    /// Validators of the block after next, for the consensus lookahead.
    pub next_validators: ValidatorSet,
    /// Height at which the validator set last changed.
    pub last_height_validators_changed: u64,
    /// Consensus parameters, fetched through the verifying facade.
    pub consensus_params: ConsensusParams,
}

/// One RPC server: the light-client provider and the RPC transport built
/// over the same endpoint.
pub type Server = (Arc<dyn Provider>, Arc<dyn RpcTransport>);

/// A provider of trusted state data backed by the light client.
///
/// The light client is not safe for interleaving, and a snapshot issues
/// several engine calls that must appear atomic, so every method holds an
/// additional mutex for its whole duration.
pub struct StateProvider {
    mutex: Mutex<()>,
    light_client: Arc<lantern_light::LightClient>,
    servers: Vec<Server>,
    version: Version,
    initial_height: u64,
}

impl std::fmt::Debug for StateProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StateProvider")
            .field("version", &self.version)
            .field("initial_height", &self.initial_height)
            .field("servers", &self.servers.len())
            .finish()
    }
}

impl StateProvider {
    /// Create a state provider over at least two RPC servers (one primary
    /// and one witness).
    pub async fn new(
        version: Version,
        initial_height: u64,
        servers: Vec<Server>,
        trust_options: TrustOptions,
    ) -> Result<Self> {
        if servers.len() < 2 {
            return Err(RpcError::InvalidResponse(format!(
                "at least 2 RPC servers are required, got {}",
                servers.len()
            )));
        }

        let primary = servers[0].0.clone();
        let witnesses = servers[1..].iter().map(|(p, _)| p.clone()).collect();

        let light_client = LightClientBuilder::new()
            .max_retry_attempts(5)
            .build(
                trust_options,
                primary,
                witnesses,
                Arc::new(MemoryStore::new()),
            )
            .await?;

        Ok(Self {
            mutex: Mutex::new(()),
            light_client: Arc::new(light_client),
            servers,
            version,
            initial_height,
        })
    }

    /// The app hash after `height` has been committed.
    ///
    /// The hash lives in the *next* header, so that is the one verified.
    pub async fn app_hash(&self, height: u64) -> Result<Hash> {
        let _guard = self.mutex.lock().await;
        let next = self
            .light_client
            .verify_header_at_height(height + 1, Utc::now())
            .await?;
        Ok(next.header.app_hash)
    }

    /// The commit at `height`.
    pub async fn commit(&self, height: u64) -> Result<Commit> {
        let _guard = self.mutex.lock().await;
        let header = self
            .light_client
            .verify_header_at_height(height, Utc::now())
            .await?;
        Ok(header.commit)
    }

    /// A complete state snapshot at `height`.
    pub async fn state(&self, height: u64) -> Result<StateSnapshot> {
        let _guard = self.mutex.lock().await;
        let now = Utc::now();

        // Verify up to h + 2 first: the consensus engine looks one set
        // ahead, and this prefetches h and h + 1 in the common case.
        self.light_client
            .verify_header_at_height(height + 2, now)
            .await?;
        let header = self
            .light_client
            .verify_header_at_height(height, now)
            .await?;
        let next_header = self
            .light_client
            .verify_header_at_height(height + 1, now)
            .await?;

        let last_validators = self.validator_set_at(height).await?;
        let validators = self.validator_set_at(height + 1).await?;
        let next_validators = self.validator_set_at(height + 2).await?;

        // Consensus parameters come over RPC, through the verifying
        // facade, from the current primary's transport.
        let rpc = self.primary_rpc().await?;
        let params = rpc
            .consensus_params(Some(next_header.height()))
            .await?
            .consensus_params;

        Ok(StateSnapshot {
            chain_id: self.light_client.chain_id().to_string(),
            version: self.version,
            initial_height: if self.initial_height == 0 {
                1
            } else {
                self.initial_height
            },
            last_block_height: header.height(),
            last_block_time: header.time(),
            last_block_id: header.commit.block_id,
            app_hash: next_header.header.app_hash,
            last_results_hash: next_header.header.last_results_hash,
            last_validators,
            validators,
            next_validators,
            last_height_validators_changed: height,
            consensus_params: params,
        })
    }

    /// The validator set at `height`, from the trust store when present,
    /// otherwise fetched from the primary and checked against the trusted
    /// header's commitment.
    async fn validator_set_at(&self, height: u64) -> Result<ValidatorSet> {
        if let Some(set) = self.light_client.trusted_validator_set(height).await? {
            return Ok(set);
        }

        let trusted = self
            .light_client
            .trusted_header(height)
            .await?
            .ok_or_else(|| {
                RpcError::LightClient(LightClientError::store(format!(
                    "no trusted header at height {}",
                    height
                )))
            })?;

        let primary = self.light_client.primary().await;
        let set = primary.validator_set(height).await.map_err(|e| {
            RpcError::LightClient(LightClientError::Provider { height, source: e })
        })?;
        if set.hash() != trusted.header.validators_hash {
            return Err(RpcError::HashMismatch {
                height,
                reason: format!(
                    "validator set hash {} does not match trusted validators hash {}",
                    set.hash(),
                    trusted.header.validators_hash
                ),
            });
        }
        Ok(set)
    }

    /// A verifying client over the current primary's transport.
    async fn primary_rpc(&self) -> Result<VerifyingClient> {
        let primary = self.light_client.primary().await;
        let transport = self
            .servers
            .iter()
            .find(|(p, _)| Arc::ptr_eq(p, &primary))
            .map(|(_, t)| t.clone())
            .ok_or_else(|| {
                RpcError::InvalidResponse(
                    "could not find the transport for the primary provider".to_string(),
                )
            })?;
        Ok(VerifyingClient::new(transport, self.light_client.clone()))
    }
}

/// A conventional trust period for snapshot bootstraps: long enough to
/// cover operator-supplied anchors, short enough to bound validator churn.
pub fn default_trust_period() -> Duration {
    Duration::weeks(2)
}
