//! Verifying RPC facade for Lantern.
//!
//! Wraps an untrusted full-node RPC endpoint and checks every provable
//! response against headers verified by the light client:
//!
//! - blocks and commits against the trusted header hash
//! - execution results against the next header's results hash
//! - validator sets against the (next) validators hash
//! - consensus parameters against the consensus hash
//! - ABCI query results against the app hash, via Merkle proofs
//! - transactions against the data hash, via inclusion proofs
//!
//! Status, mempool, broadcast and subscription endpoints pass through
//! unverified; subscriptions are explicitly unsafe.

#![deny(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms)]

pub mod client;
pub mod error;
pub mod path;
pub mod proof;
pub mod state;
pub mod transport;

pub use client::VerifyingClient;
pub use error::{Result, RpcError, TransportError};
pub use path::{parse_query_store_path, KeyPath};
pub use proof::{
    AbsenceOp, KvTree, ProofOp, ProofOperator, ProofOps, ProofRuntime, ValueOp, PROOF_OP_ABSENCE,
    PROOF_OP_VALUE,
};
pub use state::{StateProvider, StateSnapshot};
pub use transport::{block_results_hash, RpcTransport};
