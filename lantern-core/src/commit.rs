//! Commits: aggregated validator signatures over a block.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::crypto::{Address, Hash, SecretKey, Signature};
use crate::header::BlockId;

/// What a commit signature attests to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockIdFlag {
    /// The validator did not sign.
    Absent,
    /// The validator signed the committed block.
    Commit,
    /// The validator signed nil.
    Nil,
}

/// A single validator's signature within a commit.
///
/// Signatures are positional: the signature at index `i` belongs to the
/// validator at index `i` of the validator set for that height.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommitSig {
    /// Whether the validator signed the block, nil, or not at all.
    pub flag: BlockIdFlag,
    /// Address of the signing validator.
    pub validator_address: Address,
    /// Time the vote was cast.
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub timestamp: DateTime<Utc>,
    /// The signature, absent iff the flag is `Absent`.
    pub signature: Option<Signature>,
}

impl CommitSig {
    /// An absent signature slot for the validator at the given address.
    pub fn absent(validator_address: Address) -> Self {
        Self {
            flag: BlockIdFlag::Absent,
            validator_address,
            timestamp: DateTime::<Utc>::MIN_UTC,
            signature: None,
        }
    }

    /// Whether this slot carries a signature at all.
    pub fn is_signed(&self) -> bool {
        !matches!(self.flag, BlockIdFlag::Absent)
    }

    /// Whether this signature counts toward the committed block.
    pub fn is_for_block(&self) -> bool {
        matches!(self.flag, BlockIdFlag::Commit)
    }
}

/// The aggregate of validator signatures for a block at a height and round.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Commit {
    /// Height the commit is for.
    pub height: u64,
    /// Consensus round the block was committed in.
    pub round: u32,
    /// The committed block.
    pub block_id: BlockId,
    /// One slot per validator, in validator-set order.
    pub signatures: Vec<CommitSig>,
}

impl Commit {
    /// Canonical hash of this commit, committed by the child header's
    /// `last_commit_hash`.
    pub fn hash(&self) -> Hash {
        let encoded: Vec<Vec<u8>> = self
            .signatures
            .iter()
            .map(|s| bincode::serialize(s).expect("commit sig serialization cannot fail"))
            .collect();
        crate::merkle::root_from_byte_slices(&encoded)
    }

    /// Number of non-absent signatures.
    pub fn signed_count(&self) -> usize {
        self.signatures.iter().filter(|s| s.is_signed()).count()
    }
}

/// The canonical byte encoding every commit signature signs over.
///
/// Deterministic by construction: fixed field order, millisecond times,
/// and the block ID reduced to its hash (nil votes sign the zero hash).
#[derive(Serialize)]
struct CanonicalVote<'a> {
    chain_id: &'a str,
    height: u64,
    round: u32,
    block_id_hash: Hash,
    timestamp_ms: i64,
}

/// Compute the sign-bytes for the signature slot at `index`.
pub fn vote_sign_bytes(chain_id: &str, commit: &Commit, index: usize) -> Vec<u8> {
    let sig = &commit.signatures[index];
    let block_id_hash = match sig.flag {
        BlockIdFlag::Commit => commit.block_id.hash,
        _ => Hash::ZERO,
    };
    let vote = CanonicalVote {
        chain_id,
        height: commit.height,
        round: commit.round,
        block_id_hash,
        timestamp_ms: sig.timestamp.timestamp_millis(),
    };
    bincode::serialize(&vote).expect("canonical vote serialization cannot fail")
}

/// Sign a for-block commit slot with the given key.
///
/// Used by the mock chain generator and by tests; real signatures arrive
/// over the wire.
pub fn sign_vote(
    chain_id: &str,
    height: u64,
    round: u32,
    block_id: BlockId,
    timestamp: DateTime<Utc>,
    key: &SecretKey,
) -> CommitSig {
    let vote = CanonicalVote {
        chain_id,
        height,
        round,
        block_id_hash: block_id.hash,
        timestamp_ms: timestamp.timestamp_millis(),
    };
    let bytes = bincode::serialize(&vote).expect("canonical vote serialization cannot fail");
    CommitSig {
        flag: BlockIdFlag::Commit,
        validator_address: key.public_key().address(),
        timestamp,
        signature: Some(key.sign(&bytes)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn test_commit(flag: BlockIdFlag) -> Commit {
        Commit {
            height: 7,
            round: 1,
            block_id: BlockId::new(crate::crypto::hash(b"block")),
            signatures: vec![CommitSig {
                flag,
                validator_address: Address::from_bytes([1u8; 20]),
                timestamp: Utc.timestamp_opt(1_700_000_000, 0).unwrap(),
                signature: None,
            }],
        }
    }

    #[test]
    fn test_sign_bytes_nil_uses_zero_hash() {
        let for_block = vote_sign_bytes("c", &test_commit(BlockIdFlag::Commit), 0);
        let nil = vote_sign_bytes("c", &test_commit(BlockIdFlag::Nil), 0);
        assert_ne!(for_block, nil);
    }

    #[test]
    fn test_sign_bytes_bind_chain_id() {
        let commit = test_commit(BlockIdFlag::Commit);
        assert_ne!(
            vote_sign_bytes("chain-a", &commit, 0),
            vote_sign_bytes("chain-b", &commit, 0)
        );
    }

    #[test]
    fn test_sign_vote_verifies() {
        let key = SecretKey::generate();
        let ts = Utc.timestamp_opt(1_700_000_000, 0).unwrap();
        let block_id = BlockId::new(crate::crypto::hash(b"block"));

        let sig = sign_vote("test-chain", 7, 0, block_id, ts, &key);
        assert_eq!(sig.flag, BlockIdFlag::Commit);

        let commit = Commit {
            height: 7,
            round: 0,
            block_id,
            signatures: vec![sig],
        };
        let bytes = vote_sign_bytes("test-chain", &commit, 0);
        let signature = commit.signatures[0].signature.clone().unwrap();
        assert!(key.public_key().verify(&bytes, &signature).is_ok());
    }

    #[test]
    fn test_commit_hash_changes_with_signatures() {
        let a = test_commit(BlockIdFlag::Commit);
        let b = test_commit(BlockIdFlag::Nil);
        assert_ne!(a.hash(), b.hash());
    }

    #[test]
    fn test_signed_count() {
        let mut commit = test_commit(BlockIdFlag::Commit);
        commit
            .signatures
            .push(CommitSig::absent(Address::from_bytes([2u8; 20])));
        assert_eq!(commit.signed_count(), 1);
    }
}
