//! Evidence of validator or network misbehaviour.
//!
//! A closed sum type: hashing and encoding dispatch on the tag, and every
//! consumer can match exhaustively.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Address, Hash};
use crate::header::SignedHeader;

/// Cryptographically provable misbehaviour.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Evidence {
    /// A validator signed two different blocks at the same height and round.
    DuplicateVote {
        /// Height of the offence.
        height: u64,
        /// Time of the offence.
        #[serde(with = "chrono::serde::ts_milliseconds")]
        time: DateTime<Utc>,
        /// The offending validator.
        validator_address: Address,
        /// First signed block hash.
        block_hash_a: Hash,
        /// Second signed block hash.
        block_hash_b: Hash,
    },

    /// A validator signed a header whose derived fields do not follow from
    /// the chain state.
    LunaticValidator {
        /// Height of the invalid header.
        height: u64,
        /// Hash of the invalid header.
        header_hash: Hash,
        /// The offending validator.
        validator_address: Address,
        /// Which header field was fabricated.
        invalid_field: String,
    },

    /// A validator voted for two blocks in different rounds of the same
    /// height without a justifying unlock.
    Amnesia {
        /// Height of the offence.
        height: u64,
        /// The offending validator.
        validator_address: Address,
        /// Earlier locked round.
        vote_a_round: u32,
        /// Later conflicting round.
        vote_b_round: u32,
    },

    /// Two votes in different rounds that may become [`Evidence::Amnesia`]
    /// once the proof-of-lock is examined.
    PotentialAmnesia {
        /// Height of the offence.
        height: u64,
        /// The offending validator.
        validator_address: Address,
        /// Earlier round.
        vote_a_round: u32,
        /// Later round.
        vote_b_round: u32,
    },

    /// Two verifiable signed headers at the same height with different
    /// hashes: the network (or a provider) has equivocated.
    ConflictingHeaders {
        /// Header from the first chain.
        h1: Box<SignedHeader>,
        /// Header from the second chain.
        h2: Box<SignedHeader>,
    },
}

impl Evidence {
    /// The height the evidence is anchored at.
    pub fn height(&self) -> u64 {
        match self {
            Evidence::DuplicateVote { height, .. }
            | Evidence::LunaticValidator { height, .. }
            | Evidence::Amnesia { height, .. }
            | Evidence::PotentialAmnesia { height, .. } => *height,
            Evidence::ConflictingHeaders { h1, .. } => h1.height(),
        }
    }

    /// Canonical hash, dispatching on the tag.
    pub fn hash(&self) -> Hash {
        let tag: u8 = match self {
            Evidence::DuplicateVote { .. } => 0,
            Evidence::LunaticValidator { .. } => 1,
            Evidence::Amnesia { .. } => 2,
            Evidence::PotentialAmnesia { .. } => 3,
            Evidence::ConflictingHeaders { .. } => 4,
        };
        let mut bytes = vec![tag];
        bytes.extend(bincode::serialize(self).expect("evidence serialization cannot fail"));
        crate::crypto::hash(&bytes)
    }

    /// Construct conflicting-headers evidence, ordering the two headers by
    /// hash so both observers build the identical message.
    pub fn conflicting_headers(a: SignedHeader, b: SignedHeader) -> Self {
        if a.hash().as_bytes() <= b.hash().as_bytes() {
            Evidence::ConflictingHeaders {
                h1: Box::new(a),
                h2: Box::new(b),
            }
        } else {
            Evidence::ConflictingHeaders {
                h1: Box::new(b),
                h2: Box::new(a),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn duplicate_vote(height: u64) -> Evidence {
        Evidence::DuplicateVote {
            height,
            time: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
            validator_address: Address::from_bytes([3u8; 20]),
            block_hash_a: crate::crypto::hash(b"a"),
            block_hash_b: crate::crypto::hash(b"b"),
        }
    }

    #[test]
    fn test_height_accessor() {
        assert_eq!(duplicate_vote(42).height(), 42);
    }

    #[test]
    fn test_hash_distinguishes_variants() {
        let dup = duplicate_vote(5);
        let amnesia = Evidence::Amnesia {
            height: 5,
            validator_address: Address::from_bytes([3u8; 20]),
            vote_a_round: 0,
            vote_b_round: 1,
        };
        assert_ne!(dup.hash(), amnesia.hash());
        assert_eq!(dup.hash(), duplicate_vote(5).hash());
    }

    #[test]
    fn test_serde_tag_roundtrip() {
        let ev = duplicate_vote(9);
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("duplicate_vote"));
        let back: Evidence = serde_json::from_str(&json).unwrap();
        assert_eq!(ev, back);
    }
}
