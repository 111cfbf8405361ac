//! Block headers and signed headers.
//!
//! A header is the per-height commitment record: everything a light client
//! can check about a block is reachable from these fields. The header hash
//! is a Merkle root over the canonical encodings of the fields in order, so
//! it is byte-identical across implementations.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::commit::Commit;
use crate::crypto::{Address, Hash};
use crate::error::{Error, Result};
use crate::merkle::root_from_byte_slices;

/// Maximum length of a chain identifier.
pub const MAX_CHAIN_ID_LEN: usize = 50;

/// Consensus protocol versions committed in every header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    /// Block protocol version.
    pub block: u64,
    /// Application protocol version.
    pub app: u64,
}

/// Identifies a block by the hash of its header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockId {
    /// Hash of the block header.
    pub hash: Hash,
}

impl BlockId {
    /// The zero block ID (genesis parent).
    pub const ZERO: Self = Self { hash: Hash::ZERO };

    /// Create a block ID from a header hash.
    pub fn new(hash: Hash) -> Self {
        Self { hash }
    }
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.hash)
    }
}

/// A block header.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Header {
    /// Consensus versions.
    pub version: Version,
    /// Chain identifier.
    pub chain_id: String,
    /// Block height, starting at 1.
    pub height: u64,
    /// Block time as recorded by the proposer.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub time: DateTime<Utc>,
    /// Identifier of the previous block.
    pub last_block_id: BlockId,
    /// Hash of the previous block's commit.
    pub last_commit_hash: Hash,
    /// Merkle root of the block's transactions.
    pub data_hash: Hash,
    /// Hash of the validator set that signs this block.
    pub validators_hash: Hash,
    /// Hash of the validator set for the next block.
    pub next_validators_hash: Hash,
    /// Hash of the consensus parameters at this height.
    pub consensus_hash: Hash,
    /// Application state hash after the previous block.
    pub app_hash: Hash,
    /// Merkle root of the previous block's execution results.
    pub last_results_hash: Hash,
    /// Hash of pending evidence included in this block.
    pub evidence_hash: Hash,
    /// Address of the proposer of this block.
    pub proposer_address: Address,
}

impl Header {
    /// Compute the hash of this header.
    ///
    /// The hash is the Merkle root over the canonical encodings of the
    /// fields in declaration order.
    pub fn hash(&self) -> Hash {
        let fields: Vec<Vec<u8>> = vec![
            encode(&self.version),
            encode(&self.chain_id),
            encode(&self.height),
            encode(&self.time.timestamp_millis()),
            encode(&self.last_block_id),
            encode(&self.last_commit_hash),
            encode(&self.data_hash),
            encode(&self.validators_hash),
            encode(&self.next_validators_hash),
            encode(&self.consensus_hash),
            encode(&self.app_hash),
            encode(&self.last_results_hash),
            encode(&self.evidence_hash),
            encode(&self.proposer_address),
        ];
        root_from_byte_slices(&fields)
    }

    /// Basic structural validation independent of any trusted state.
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        if self.chain_id != chain_id {
            return Err(Error::invalid_header(format!(
                "chain id mismatch: got {}, expected {}",
                self.chain_id, chain_id
            )));
        }
        if self.chain_id.len() > MAX_CHAIN_ID_LEN {
            return Err(Error::invalid_header(format!(
                "chain id too long: {} > {}",
                self.chain_id.len(),
                MAX_CHAIN_ID_LEN
            )));
        }
        if self.height == 0 {
            return Err(Error::invalid_header("height must be at least 1"));
        }
        if self.height > 1 && self.last_block_id.hash.is_zero() {
            return Err(Error::invalid_header(
                "non-genesis header has zero last block id",
            ));
        }
        if self.validators_hash.is_zero() || self.next_validators_hash.is_zero() {
            return Err(Error::invalid_header("missing validator set hash"));
        }
        Ok(())
    }
}

fn encode<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("header field serialization cannot fail")
}

/// A header together with the commit that signs it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedHeader {
    /// The block header.
    pub header: Header,
    /// The commit for this exact header.
    pub commit: Commit,
}

impl SignedHeader {
    /// Get the header height.
    pub fn height(&self) -> u64 {
        self.header.height
    }

    /// Get the header time.
    pub fn time(&self) -> DateTime<Utc> {
        self.header.time
    }

    /// Hash of the header (also the block ID hash the commit signs).
    pub fn hash(&self) -> Hash {
        self.header.hash()
    }

    /// Validate the header/commit pairing.
    ///
    /// Checks the header fields, that the commit is for this height and
    /// that its block ID matches the header hash. Signature checks are the
    /// verifier's job.
    pub fn validate_basic(&self, chain_id: &str) -> Result<()> {
        self.header.validate_basic(chain_id)?;

        if self.commit.height != self.header.height {
            return Err(Error::InvalidCommitHeight {
                got: self.commit.height,
                expected: self.header.height,
            });
        }
        let header_hash = self.header.hash();
        if self.commit.block_id.hash != header_hash {
            return Err(Error::invalid_commit(format!(
                "commit signs block {}, header hashes to {}",
                self.commit.block_id.hash, header_hash
            )));
        }
        if self.commit.signatures.is_empty() {
            return Err(Error::invalid_commit("commit has no signatures"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::commit::{BlockIdFlag, CommitSig};
    use chrono::TimeZone;

    fn test_header() -> Header {
        Header {
            version: Version { block: 11, app: 1 },
            chain_id: "test-chain".to_string(),
            height: 5,
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            last_block_id: BlockId::new(crate::crypto::hash(b"parent")),
            last_commit_hash: crate::crypto::hash(b"last-commit"),
            data_hash: crate::crypto::hash(b"data"),
            validators_hash: crate::crypto::hash(b"vals"),
            next_validators_hash: crate::crypto::hash(b"next-vals"),
            consensus_hash: crate::crypto::hash(b"params"),
            app_hash: crate::crypto::hash(b"app"),
            last_results_hash: crate::crypto::hash(b"results"),
            evidence_hash: Hash::ZERO,
            proposer_address: Address::from_bytes([7u8; 20]),
        }
    }

    #[test]
    fn test_header_hash_deterministic() {
        let h = test_header();
        assert_eq!(h.hash(), h.hash());
    }

    #[test]
    fn test_header_hash_covers_every_field() {
        let base = test_header();

        let mut h = base.clone();
        h.height = 6;
        assert_ne!(base.hash(), h.hash());

        let mut h = base.clone();
        h.app_hash = crate::crypto::hash(b"other app");
        assert_ne!(base.hash(), h.hash());

        let mut h = base.clone();
        h.next_validators_hash = crate::crypto::hash(b"rotated");
        assert_ne!(base.hash(), h.hash());
    }

    #[test]
    fn test_validate_basic_rejects_wrong_chain() {
        let h = test_header();
        assert!(h.validate_basic("other-chain").is_err());
        assert!(h.validate_basic("test-chain").is_ok());
    }

    #[test]
    fn test_validate_basic_rejects_zero_height() {
        let mut h = test_header();
        h.height = 0;
        assert!(h.validate_basic("test-chain").is_err());
    }

    #[test]
    fn test_signed_header_pairing() {
        let header = test_header();
        let commit = Commit {
            height: header.height,
            round: 0,
            block_id: BlockId::new(header.hash()),
            signatures: vec![CommitSig {
                flag: BlockIdFlag::Absent,
                validator_address: Address::from_bytes([0u8; 20]),
                timestamp: header.time,
                signature: None,
            }],
        };
        let sh = SignedHeader { header, commit };
        assert!(sh.validate_basic("test-chain").is_ok());

        let mut bad = sh.clone();
        bad.commit.height = 6;
        assert!(matches!(
            bad.validate_basic("test-chain"),
            Err(Error::InvalidCommitHeight { .. })
        ));

        let mut bad = sh;
        bad.commit.block_id = BlockId::new(Hash::ZERO);
        assert!(bad.validate_basic("test-chain").is_err());
    }
}
