//! The untrusted RPC transport and its response types.
//!
//! [`RpcTransport`] models the full node's RPC surface the facade wraps.
//! Responses are plain data; every verifiable kind is checked by the
//! facade before being surfaced.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;

use lantern_core::{
    root_from_byte_slices, BlockId, ConsensusParams, Hash, Header, SignedHeader, Validator,
};

use crate::error::{Result, TransportError};
use crate::proof::ProofOps;

/// A raw transaction.
pub type Tx = Vec<u8>;

/// Node status summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusResponse {
    /// Chain the node serves.
    pub chain_id: String,
    /// The node's latest block height.
    pub latest_block_height: u64,
    /// Hash of the latest block.
    pub latest_block_hash: Hash,
    /// Time of the latest block.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub latest_block_time: DateTime<Utc>,
    /// Whether the node is still catching up.
    pub catching_up: bool,
}

/// A full block: header plus transactions.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Block {
    /// The block header.
    pub header: Header,
    /// The block's transactions.
    pub data: Vec<Tx>,
}

impl Block {
    /// The block hash (the hash of the header).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Check internal consistency: the header's data hash must commit the
    /// transactions.
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        self.header
            .validate_basic(chain_id)
            .map_err(|e| crate::error::RpcError::InvalidResponse(e.to_string()))?;
        let data_hash = root_from_byte_slices(&self.data);
        if data_hash != self.header.data_hash {
            return Err(crate::error::RpcError::InvalidResponse(format!(
                "data hash {} does not commit block transactions ({})",
                self.header.data_hash, data_hash
            )));
        }
        Ok(())
    }
}

/// `block` / `block_by_hash` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResponse {
    /// Claimed block id.
    pub block_id: BlockId,
    /// The block.
    pub block: Block,
}

/// One entry of a `blockchain_info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockMeta {
    /// Claimed block id.
    pub block_id: BlockId,
    /// The block header.
    pub header: Header,
}

/// `blockchain_info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockchainInfoResponse {
    /// The node's current height.
    pub last_height: u64,
    /// Headers in the requested range.
    pub block_metas: Vec<BlockMeta>,
}

/// An ABCI event emitted during block execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AbciEvent {
    /// Event type tag.
    pub kind: String,
    /// Key/value attributes.
    pub attributes: Vec<(String, String)>,
}

/// Execution result of one transaction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxResult {
    /// Result code; zero is success.
    pub code: u32,
    /// Result payload.
    pub data: Vec<u8>,
    /// Gas the transaction asked for.
    pub gas_wanted: i64,
    /// Gas the transaction consumed.
    pub gas_used: i64,
    /// Events emitted by the transaction.
    pub events: Vec<AbciEvent>,
}

impl TxResult {
    /// Canonical encoding hashed into the results root. Only the
    /// deterministic fields are committed.
    fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(self.code, &self.data, self.gas_wanted, self.gas_used))
            .expect("tx result serialization cannot fail")
    }
}

/// `block_results` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockResultsResponse {
    /// Height the results are for.
    pub height: u64,
    /// Per-transaction results, in block order.
    pub txs_results: Vec<TxResult>,
    /// Events from begin-block.
    pub begin_block_events: Vec<AbciEvent>,
    /// Events from end-block.
    pub end_block_events: Vec<AbciEvent>,
}

/// The results commitment the *next* header's `last_results_hash` carries.
pub fn block_results_hash(results: &BlockResultsResponse) -> Hash {
    let begin = bincode::serialize(&results.begin_block_events)
        .expect("event serialization cannot fail");
    let end =
        bincode::serialize(&results.end_block_events).expect("event serialization cannot fail");
    let tx_leaves: Vec<Vec<u8>> = results
        .txs_results
        .iter()
        .map(|r| r.canonical_bytes())
        .collect();
    let results_root = root_from_byte_slices(&tx_leaves);
    root_from_byte_slices(&[begin, results_root.as_bytes().to_vec(), end])
}

/// `commit` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommitResponse {
    /// The signed header at the requested height.
    pub signed_header: SignedHeader,
    /// Whether this commit is canonical.
    pub canonical: bool,
}

/// `validators` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidatorsResponse {
    /// Height the set is for.
    pub block_height: u64,
    /// The validators on this page.
    pub validators: Vec<Validator>,
    /// Number of validators in this response.
    pub count: u64,
    /// Total number of validators at this height.
    pub total: u64,
}

/// `consensus_params` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConsensusParamsResponse {
    /// Height the parameters are for.
    pub block_height: u64,
    /// The consensus parameters.
    pub consensus_params: ConsensusParams,
}

/// `abci_query` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AbciQueryResponse {
    /// Application result code; zero is success.
    pub code: u32,
    /// Log output.
    pub log: String,
    /// The queried key.
    pub key: Vec<u8>,
    /// The value, empty for absence results.
    pub value: Vec<u8>,
    /// Merkle proof for the value or its absence.
    pub proof_ops: Option<ProofOps>,
    /// State height the query executed against.
    pub height: u64,
}

/// Options for `abci_query`.
#[derive(Debug, Clone, Copy)]
pub struct AbciQueryOptions {
    /// State height to query; 0 for latest.
    pub height: u64,
    /// Whether to request a proof.
    pub prove: bool,
}

impl Default for AbciQueryOptions {
    fn default() -> Self {
        Self {
            height: 0,
            prove: true,
        }
    }
}

/// Merkle proof that a transaction is included in a block.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxProof {
    /// The raw transaction.
    pub data: Tx,
    /// Inclusion proof against the block's data hash.
    pub proof: lantern_core::Proof,
}

impl TxProof {
    /// Verify the proof against a trusted data hash.
    pub fn validate(&self, data_hash: &Hash) -> Result<()> {
        self.proof
            .verify(data_hash, &self.data)
            .map_err(|e| crate::error::RpcError::MerkleProofFailed(e.to_string()))
    }
}

/// `tx` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxResponse {
    /// Transaction hash.
    pub hash: Hash,
    /// Height of the block containing the transaction.
    pub height: u64,
    /// Index within the block.
    pub index: u32,
    /// Execution result.
    pub tx_result: TxResult,
    /// The raw transaction.
    pub tx: Tx,
    /// Inclusion proof, present when requested.
    pub proof: Option<TxProof>,
}

/// `broadcast_tx_*` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BroadcastTxResponse {
    /// CheckTx result code.
    pub code: u32,
    /// Result payload.
    pub data: Vec<u8>,
    /// Log output.
    pub log: String,
    /// Hash of the broadcast transaction.
    pub hash: Hash,
}

/// `net_info` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NetInfoResponse {
    /// Whether the node is listening for peers.
    pub listening: bool,
    /// Addresses of connected peers.
    pub peers: Vec<String>,
}

/// `unconfirmed_txs` response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnconfirmedTxsResponse {
    /// Number of transactions returned.
    pub count: u64,
    /// Total transactions in the mempool.
    pub total: u64,
    /// The transactions.
    pub txs: Vec<Tx>,
}

/// An event pushed over a subscription.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMessage {
    /// The query the event matched.
    pub query: String,
    /// Event payload, unverified.
    pub data: serde_json::Value,
}

/// The untrusted full-node RPC surface.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// Whether the transport is started.
    fn is_running(&self) -> bool;

    /// Start the transport.
    async fn start(&self) -> std::result::Result<(), TransportError>;

    /// Stop the transport.
    async fn stop(&self) -> std::result::Result<(), TransportError>;

    /// Node status.
    async fn status(&self) -> std::result::Result<StatusResponse, TransportError>;

    /// Network info.
    async fn net_info(&self) -> std::result::Result<NetInfoResponse, TransportError>;

    /// Health check.
    async fn health(&self) -> std::result::Result<(), TransportError>;

    /// Fetch a block by height (`None` for latest).
    async fn block(&self, height: Option<u64>)
        -> std::result::Result<BlockResponse, TransportError>;

    /// Fetch a block by hash.
    async fn block_by_hash(&self, hash: Hash)
        -> std::result::Result<BlockResponse, TransportError>;

    /// Headers in a height range.
    async fn blockchain_info(
        &self,
        min_height: u64,
        max_height: u64,
    ) -> std::result::Result<BlockchainInfoResponse, TransportError>;

    /// Execution results for a height (`None` for latest).
    async fn block_results(
        &self,
        height: Option<u64>,
    ) -> std::result::Result<BlockResultsResponse, TransportError>;

    /// Commit at a height (`None` for latest).
    async fn commit(&self, height: Option<u64>)
        -> std::result::Result<CommitResponse, TransportError>;

    /// Validators at a height (`None` for latest), paginated.
    async fn validators(
        &self,
        height: Option<u64>,
        page: Option<u64>,
        per_page: Option<u64>,
    ) -> std::result::Result<ValidatorsResponse, TransportError>;

    /// Consensus parameters at a height (`None` for latest).
    async fn consensus_params(
        &self,
        height: Option<u64>,
    ) -> std::result::Result<ConsensusParamsResponse, TransportError>;

    /// ABCI query.
    async fn abci_query(
        &self,
        path: String,
        data: Vec<u8>,
        opts: AbciQueryOptions,
    ) -> std::result::Result<AbciQueryResponse, TransportError>;

    /// Fetch a transaction by hash.
    async fn tx(&self, hash: Hash, prove: bool)
        -> std::result::Result<TxResponse, TransportError>;

    /// Broadcast a transaction without waiting.
    async fn broadcast_tx_async(
        &self,
        tx: Tx,
    ) -> std::result::Result<BroadcastTxResponse, TransportError>;

    /// Broadcast a transaction and wait for CheckTx.
    async fn broadcast_tx_sync(
        &self,
        tx: Tx,
    ) -> std::result::Result<BroadcastTxResponse, TransportError>;

    /// Broadcast a transaction and wait for it to be committed.
    async fn broadcast_tx_commit(
        &self,
        tx: Tx,
    ) -> std::result::Result<BroadcastTxResponse, TransportError>;

    /// Mempool contents.
    async fn unconfirmed_txs(
        &self,
        limit: Option<u64>,
    ) -> std::result::Result<UnconfirmedTxsResponse, TransportError>;

    /// Subscribe to events matching `query`. Streamed events are not
    /// verifiable.
    async fn subscribe(
        &self,
        query: String,
    ) -> std::result::Result<mpsc::Receiver<EventMessage>, TransportError>;

    /// Cancel a subscription.
    async fn unsubscribe(&self, query: String) -> std::result::Result<(), TransportError>;
}
