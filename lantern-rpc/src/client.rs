//! The verifying RPC client.
//!
//! Wraps an untrusted [`RpcTransport`] and refuses to surface any response
//! whose commitment cannot be tied back to a header verified by the light
//! client. Responses with nothing to prove (status, mempool, broadcasts,
//! subscriptions) pass through unmodified.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use chrono::Utc;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use lantern_core::{Hash, SignedHeader, ValidatorSet};
use lantern_light::LightClient;

use crate::error::{Result, RpcError};
use crate::path::{parse_query_store_path, KeyPath};
use crate::proof::{OpDecoder, ProofRuntime};
use crate::transport::{
    block_results_hash, AbciQueryOptions, AbciQueryResponse, BlockResponse,
    BlockResultsResponse, BlockchainInfoResponse, BroadcastTxResponse, CommitResponse,
    ConsensusParamsResponse, EventMessage, NetInfoResponse, RpcTransport, StatusResponse, Tx,
    TxResponse, UnconfirmedTxsResponse, ValidatorsResponse,
};

/// An RPC client that verifies every provable response against the light
/// client's trusted headers.
pub struct VerifyingClient {
    next: Arc<dyn RpcTransport>,
    light_client: Arc<LightClient>,
    proof_runtime: ProofRuntime,
    started_transport: AtomicBool,
}

impl VerifyingClient {
    /// Wrap a transport with verification driven by `light_client`.
    pub fn new(next: Arc<dyn RpcTransport>, light_client: Arc<LightClient>) -> Self {
        Self {
            next,
            light_client,
            proof_runtime: ProofRuntime::default_runtime(),
            started_transport: AtomicBool::new(false),
        }
    }

    /// Register an additional proof operator decoder.
    pub fn register_op_decoder(&mut self, op_type: impl Into<String>, decoder: OpDecoder) {
        self.proof_runtime.register_op_decoder(op_type, decoder);
    }

    /// The wrapped light client.
    pub fn light_client(&self) -> &Arc<LightClient> {
        &self.light_client
    }

    /// Start the underlying transport if it is not already running.
    pub async fn start(&self) -> Result<()> {
        if !self.next.is_running() {
            self.next.start().await?;
            self.started_transport.store(true, Ordering::SeqCst);
        }
        Ok(())
    }

    /// Stop the underlying transport, but only if this client started it.
    pub async fn stop(&self) -> Result<()> {
        if self.started_transport.swap(false, Ordering::SeqCst) && self.next.is_running() {
            self.next.stop().await?;
        }
        Ok(())
    }

    /// Drive the light client to `height` and return the trusted header.
    async fn trusted_header_at(&self, height: u64) -> Result<SignedHeader> {
        let header = self
            .light_client
            .verify_header_at_height(height, Utc::now())
            .await?;
        Ok(header)
    }

    // === pass-through endpoints ===

    /// Node status. Unverifiable; passed through.
    pub async fn status(&self) -> Result<StatusResponse> {
        Ok(self.next.status().await?)
    }

    /// Network info. Unverifiable; passed through.
    pub async fn net_info(&self) -> Result<NetInfoResponse> {
        Ok(self.next.net_info().await?)
    }

    /// Health check. Passed through.
    pub async fn health(&self) -> Result<()> {
        Ok(self.next.health().await?)
    }

    /// Mempool contents. Unverifiable; passed through.
    pub async fn unconfirmed_txs(&self, limit: Option<u64>) -> Result<UnconfirmedTxsResponse> {
        Ok(self.next.unconfirmed_txs(limit).await?)
    }

    /// Broadcast without waiting. Passed through.
    pub async fn broadcast_tx_async(&self, tx: Tx) -> Result<BroadcastTxResponse> {
        Ok(self.next.broadcast_tx_async(tx).await?)
    }

    /// Broadcast and wait for CheckTx. Passed through.
    pub async fn broadcast_tx_sync(&self, tx: Tx) -> Result<BroadcastTxResponse> {
        Ok(self.next.broadcast_tx_sync(tx).await?)
    }

    /// Broadcast and wait for commitment. Passed through.
    pub async fn broadcast_tx_commit(&self, tx: Tx) -> Result<BroadcastTxResponse> {
        Ok(self.next.broadcast_tx_commit(tx).await?)
    }

    /// Subscribe to events matching `query`.
    ///
    /// UNSAFE: streamed events are passed through without any
    /// verification. Callers must not treat subscription data as trusted.
    pub async fn subscribe(&self, query: String) -> Result<mpsc::Receiver<EventMessage>> {
        warn!(%query, "subscription events are not verified");
        Ok(self.next.subscribe(query).await?)
    }

    /// Cancel a subscription.
    pub async fn unsubscribe(&self, query: String) -> Result<()> {
        Ok(self.next.unsubscribe(query).await?)
    }

    // === verified endpoints ===

    /// Fetch a block and verify its hash against the trusted header at the
    /// block's height.
    pub async fn block(&self, height: Option<u64>) -> Result<BlockResponse> {
        let res = self.next.block(height).await?;
        self.verify_block_response(res).await
    }

    /// Fetch a block by hash and verify it the same way as [`block`](Self::block).
    pub async fn block_by_hash(&self, hash: Hash) -> Result<BlockResponse> {
        let res = self.next.block_by_hash(hash).await?;
        if res.block.hash() != hash {
            return Err(RpcError::InvalidResponse(format!(
                "asked for block {}, got {}",
                hash,
                res.block.hash()
            )));
        }
        self.verify_block_response(res).await
    }

    async fn verify_block_response(&self, res: BlockResponse) -> Result<BlockResponse> {
        res.block.validate_basic(self.light_client.chain_id())?;
        if res.block_id.hash != res.block.hash() {
            return Err(RpcError::InvalidResponse(format!(
                "block id {} does not match block hash {}",
                res.block_id.hash,
                res.block.hash()
            )));
        }

        let height = res.block.header.height;
        if height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }
        let trusted = self.trusted_header_at(height).await?;
        if res.block.hash() != trusted.hash() {
            return Err(RpcError::HashMismatch {
                height,
                reason: format!(
                    "block hash {} does not match trusted header hash {}",
                    res.block.hash(),
                    trusted.hash()
                ),
            });
        }
        Ok(res)
    }

    /// Fetch headers in a range and verify each against the trusted chain.
    pub async fn blockchain_info(
        &self,
        min_height: u64,
        max_height: u64,
    ) -> Result<BlockchainInfoResponse> {
        let res = self.next.blockchain_info(min_height, max_height).await?;

        for (i, meta) in res.block_metas.iter().enumerate() {
            meta.header
                .validate_basic(self.light_client.chain_id())
                .map_err(|e| {
                    RpcError::InvalidResponse(format!("invalid block meta {}: {}", i, e))
                })?;
        }

        if let Some(last) = res.block_metas.last() {
            self.trusted_header_at(last.header.height).await?;
        }

        for meta in &res.block_metas {
            let height = meta.header.height;
            let trusted = self.trusted_header_at(height).await?;
            if meta.header.hash() != trusted.hash() {
                return Err(RpcError::HashMismatch {
                    height,
                    reason: format!(
                        "block meta hash {} does not match trusted hash {}",
                        meta.header.hash(),
                        trusted.hash()
                    ),
                });
            }
        }

        Ok(res)
    }

    /// Fetch execution results and verify them against the *next* header's
    /// `last_results_hash`.
    ///
    /// With no height given, the results for the block before the latest
    /// are returned: the latest block's results are only committed by a
    /// header that does not exist yet.
    pub async fn block_results(&self, height: Option<u64>) -> Result<BlockResultsResponse> {
        let height = match height {
            Some(h) => h,
            None => {
                let status = self.next.status().await?;
                status
                    .latest_block_height
                    .checked_sub(1)
                    .ok_or(RpcError::NegOrZeroHeight)?
            }
        };

        let res = self.next.block_results(Some(height)).await?;
        if res.height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }
        if res.height != height {
            return Err(RpcError::InvalidResponse(format!(
                "asked for results at {}, got {}",
                height, res.height
            )));
        }

        // The results of height h are committed by header h + 1.
        let trusted = self.trusted_header_at(height + 1).await?;
        let computed = block_results_hash(&res);
        if computed != trusted.header.last_results_hash {
            return Err(RpcError::HashMismatch {
                height,
                reason: format!(
                    "results hash {} does not match trusted last results hash {}",
                    computed, trusted.header.last_results_hash
                ),
            });
        }

        Ok(res)
    }

    /// Fetch a commit and verify it is the trusted one for its height.
    pub async fn commit(&self, height: Option<u64>) -> Result<CommitResponse> {
        let res = self.next.commit(height).await?;

        res.signed_header
            .validate_basic(self.light_client.chain_id())
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        let res_height = res.signed_header.height();
        if res_height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }

        let trusted = self.trusted_header_at(res_height).await?;
        if res.signed_header.hash() != trusted.hash() {
            return Err(RpcError::HashMismatch {
                height: res_height,
                reason: format!(
                    "header {} does not match trusted header {}",
                    res.signed_header.hash(),
                    trusted.hash()
                ),
            });
        }

        Ok(res)
    }

    /// Fetch a transaction; when a proof was requested, verify it against
    /// the trusted data hash of the containing block.
    pub async fn tx(&self, hash: Hash, prove: bool) -> Result<TxResponse> {
        let res = self.next.tx(hash, prove).await?;
        if !prove {
            return Ok(res);
        }

        if res.height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }
        let proof = res
            .proof
            .as_ref()
            .ok_or_else(|| RpcError::InvalidResponse("proof requested but missing".into()))?;

        let trusted = self.trusted_header_at(res.height).await?;
        proof.validate(&trusted.header.data_hash)?;
        Ok(res)
    }

    /// Fetch validators at a height and verify the full set against the
    /// trusted commitment.
    ///
    /// Only complete sets are verifiable; a paginated partial result is
    /// rejected.
    pub async fn validators(
        &self,
        height: Option<u64>,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> Result<ValidatorsResponse> {
        let res = self.next.validators(height, page, per_page).await?;
        if res.block_height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }
        if res.count < res.total {
            return Err(RpcError::InvalidResponse(
                "partial validator sets cannot be verified".to_string(),
            ));
        }

        // The set for height h is committed by header h - 1, except at the
        // chain's first block, which commits its own set.
        let update_height = if res.block_height == 1 {
            1
        } else {
            res.block_height - 1
        };
        let trusted = self.trusted_header_at(update_height).await?;
        let trusted_hash = if res.block_height == 1 {
            trusted.header.validators_hash
        } else {
            trusted.header.next_validators_hash
        };

        let set_hash = ValidatorSet::new(res.validators.clone()).hash();
        if set_hash != trusted_hash {
            return Err(RpcError::HashMismatch {
                height: res.block_height,
                reason: format!(
                    "validator set hash {} does not match trusted hash {}",
                    set_hash, trusted_hash
                ),
            });
        }

        Ok(res)
    }

    /// Fetch consensus parameters and verify their hash against the
    /// trusted header.
    pub async fn consensus_params(&self, height: Option<u64>) -> Result<ConsensusParamsResponse> {
        let res = self.next.consensus_params(height).await?;

        res.consensus_params
            .validate_basic()
            .map_err(|e| RpcError::InvalidResponse(e.to_string()))?;
        if res.block_height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }

        let trusted = self.trusted_header_at(res.block_height).await?;
        let computed = lantern_core::hash_consensus_params(&res.consensus_params);
        if computed != trusted.header.consensus_hash {
            return Err(RpcError::HashMismatch {
                height: res.block_height,
                reason: format!(
                    "params hash {} does not match trusted consensus hash {}",
                    computed, trusted.header.consensus_hash
                ),
            });
        }

        Ok(res)
    }

    /// ABCI query with default options (latest height, with proof).
    pub async fn abci_query(&self, path: String, data: Vec<u8>) -> Result<AbciQueryResponse> {
        self.abci_query_with_options(path, data, AbciQueryOptions::default())
            .await
    }

    /// ABCI query; the proof is verified against the application hash
    /// committed by the header *after* the query height.
    pub async fn abci_query_with_options(
        &self,
        path: String,
        data: Vec<u8>,
        opts: AbciQueryOptions,
    ) -> Result<AbciQueryResponse> {
        let res = self
            .next
            .abci_query(path.clone(), data, opts)
            .await?;

        if res.code != 0 {
            return Err(RpcError::InvalidResponse(format!(
                "err response code: {}",
                res.code
            )));
        }
        let Some(proof_ops) = res.proof_ops.as_ref() else {
            return Err(RpcError::InvalidResponse("empty tree".to_string()));
        };
        if res.key.is_empty() {
            return Err(RpcError::InvalidResponse("empty tree".to_string()));
        }
        if res.height == 0 {
            return Err(RpcError::NegOrZeroHeight);
        }

        // The app hash for height h lives in header h + 1.
        let trusted = self.trusted_header_at(res.height + 1).await?;

        let store_name = parse_query_store_path(&path)?;
        let keypath = KeyPath::new()
            .append(store_name.as_bytes())
            .append(&res.key)
            .to_string();

        if !res.value.is_empty() {
            debug!(%keypath, height = res.height, "verifying value proof");
            self.proof_runtime
                .verify_value(proof_ops, &trusted.header.app_hash, &keypath, &res.value)?;
        } else {
            debug!(%keypath, height = res.height, "verifying absence proof");
            self.proof_runtime
                .verify_absence(proof_ops, &trusted.header.app_hash, &keypath)?;
        }

        Ok(res)
    }
}

impl Drop for VerifyingClient {
    fn drop(&mut self) {
        if self.started_transport.load(Ordering::SeqCst) {
            debug!("verifying client dropped with its transport still running");
        }
    }
}
