//! Lantern Core - Fundamental types for the Lantern light verification stack.
//!
//! This crate provides the data structures and cryptographic primitives the
//! light client and verifying RPC facade are built on:
//!
//! - [`crypto`] - Hashing (SHA-256) and signatures (Ed25519)
//! - [`merkle`] - The canonical simple Merkle tree and inclusion proofs
//! - [`header`] - Block headers and signed headers
//! - [`commit`] - Aggregated validator signatures over a block
//! - [`validators`] - Validator sets and commit verification
//! - [`params`] - Consensus parameters and their canonical hash
//! - [`evidence`] - Provable misbehaviour messages

pub mod commit;
pub mod crypto;
pub mod error;
pub mod evidence;
pub mod header;
pub mod merkle;
pub mod params;
pub mod validators;

#[cfg(test)]
mod proptest;

// Re-exports for convenience
pub use commit::{sign_vote, vote_sign_bytes, BlockIdFlag, Commit, CommitSig};
pub use crypto::{hash, Address, Hash, PublicKey, SecretKey, Signature};
pub use error::{Error, Result};
pub use evidence::Evidence;
pub use header::{BlockId, Header, SignedHeader, Version};
pub use merkle::{leaf_hash, proofs_from_byte_slices, root_from_byte_slices, Proof};
pub use params::{hash_consensus_params, ConsensusParams};
pub use validators::{TrustThreshold, Validator, ValidatorSet};
