//! Consensus parameters and their canonical hash.

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::crypto::Hash;
use crate::error::{Error, Result};

/// Limits on block size and gas.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockParams {
    /// Maximum block size in bytes.
    pub max_bytes: u64,
    /// Maximum gas per block; -1 means unlimited.
    pub max_gas: i64,
}

/// Limits on how old submitted evidence may be.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EvidenceParams {
    /// Maximum age in blocks.
    pub max_age_num_blocks: u64,
    /// Maximum age in wall-clock time, as milliseconds.
    pub max_age_duration_ms: i64,
}

impl EvidenceParams {
    /// Maximum age as a chrono duration.
    pub fn max_age_duration(&self) -> Duration {
        Duration::milliseconds(self.max_age_duration_ms)
    }
}

/// Which key types validators may use.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidatorParams {
    /// Allowed public key type names.
    pub pub_key_types: Vec<String>,
}

/// The consensus parameters committed by a header's `consensus_hash`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConsensusParams {
    /// Block limits.
    pub block: BlockParams,
    /// Evidence limits.
    pub evidence: EvidenceParams,
    /// Validator key constraints.
    pub validator: ValidatorParams,
}

impl ConsensusParams {
    /// Structural validation.
    pub fn validate_basic(&self) -> Result<()> {
        if self.block.max_bytes == 0 {
            return Err(Error::invalid_header("block.max_bytes must be positive"));
        }
        if self.block.max_gas < -1 {
            return Err(Error::invalid_header("block.max_gas must be >= -1"));
        }
        if self.evidence.max_age_num_blocks == 0 {
            return Err(Error::invalid_header(
                "evidence.max_age_num_blocks must be positive",
            ));
        }
        if self.validator.pub_key_types.is_empty() {
            return Err(Error::invalid_header("no validator key types"));
        }
        Ok(())
    }
}

impl Default for ConsensusParams {
    fn default() -> Self {
        Self {
            block: BlockParams {
                max_bytes: 22_020_096,
                max_gas: -1,
            },
            evidence: EvidenceParams {
                max_age_num_blocks: 100_000,
                max_age_duration_ms: Duration::hours(48).num_milliseconds(),
            },
            validator: ValidatorParams {
                pub_key_types: vec!["ed25519".to_string()],
            },
        }
    }
}

/// Canonical hash of consensus parameters, as committed by headers.
pub fn hash_consensus_params(params: &ConsensusParams) -> Hash {
    let bytes = bincode::serialize(params).expect("params serialization cannot fail");
    crate::crypto::hash(&bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_params_valid() {
        assert!(ConsensusParams::default().validate_basic().is_ok());
    }

    #[test]
    fn test_hash_is_field_sensitive() {
        let a = ConsensusParams::default();
        let mut b = a.clone();
        b.block.max_bytes += 1;
        assert_ne!(hash_consensus_params(&a), hash_consensus_params(&b));
        assert_eq!(hash_consensus_params(&a), hash_consensus_params(&a));
    }

    #[test]
    fn test_validate_rejects_zero_block_size() {
        let mut p = ConsensusParams::default();
        p.block.max_bytes = 0;
        assert!(p.validate_basic().is_err());
    }
}
