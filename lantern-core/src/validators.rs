//! Validator sets and commit verification.
//!
//! Manages the ordered set of validators for a height:
//! - Canonical Merkle hash committed by headers
//! - Voting-power arithmetic with overflow checks
//! - Deterministic proposer rotation by priority
//! - The three commit-verification procedures light clients rely on

use std::collections::HashMap;

use serde::{Deserialize, Deserializer, Serialize};

use crate::commit::{vote_sign_bytes, Commit};
use crate::crypto::{Address, Hash, PublicKey};
use crate::error::{Error, Result};
use crate::merkle::root_from_byte_slices;

/// A single validator: public key plus voting power.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Validator {
    /// The validator's signing key.
    pub pub_key: PublicKey,
    /// Voting power.
    pub power: u64,
    /// Rotation priority; evolves as blocks are produced.
    #[serde(default)]
    pub proposer_priority: i64,
}

impl Validator {
    /// Create a validator with zero initial priority.
    pub fn new(pub_key: PublicKey, power: u64) -> Self {
        Self {
            pub_key,
            power,
            proposer_priority: 0,
        }
    }

    /// The validator's address.
    pub fn address(&self) -> Address {
        self.pub_key.address()
    }

    /// Canonical encoding hashed into the set hash.
    ///
    /// Only key and power are committed; priority is derived state.
    fn canonical_bytes(&self) -> Vec<u8> {
        bincode::serialize(&(self.pub_key.as_bytes(), self.power))
            .expect("validator serialization cannot fail")
    }
}

/// The fraction of trusted voting power that must re-sign a commit for
/// skipping verification to succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustThreshold {
    /// Numerator of the fraction.
    pub numerator: u64,
    /// Denominator of the fraction.
    pub denominator: u64,
}

impl TrustThreshold {
    /// The default 1/3 threshold.
    pub const ONE_THIRD: Self = Self {
        numerator: 1,
        denominator: 3,
    };

    /// Create a threshold, requiring 1/3 <= fraction <= 1.
    pub fn new(numerator: u64, denominator: u64) -> Result<Self> {
        if denominator == 0 || numerator * 3 < denominator || numerator > denominator {
            return Err(Error::invalid_commit(format!(
                "trust threshold {}/{} outside [1/3, 1]",
                numerator, denominator
            )));
        }
        Ok(Self {
            numerator,
            denominator,
        })
    }

    /// Whether `tallied` strictly exceeds this fraction of `total`.
    fn is_met(&self, tallied: u64, total: u64) -> bool {
        (tallied as u128) * (self.denominator as u128) > (total as u128) * (self.numerator as u128)
    }
}

impl Default for TrustThreshold {
    fn default() -> Self {
        Self::ONE_THIRD
    }
}

/// An ordered set of validators.
#[derive(Debug, Clone, Serialize)]
pub struct ValidatorSet {
    /// Ordered list of validators.
    validators: Vec<Validator>,
    /// Address index for O(1) lookup (rebuilt on deserialize).
    #[serde(skip)]
    by_address: HashMap<Address, usize>,
}

// Custom Deserialize to rebuild the address index
impl<'de> Deserialize<'de> for ValidatorSet {
    fn deserialize<D>(deserializer: D) -> std::result::Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        struct ValidatorSetData {
            validators: Vec<Validator>,
        }

        let data = ValidatorSetData::deserialize(deserializer)?;
        Ok(ValidatorSet::new(data.validators))
    }
}

impl ValidatorSet {
    /// Create a new validator set.
    pub fn new(validators: Vec<Validator>) -> Self {
        let by_address = validators
            .iter()
            .enumerate()
            .map(|(i, v)| (v.address(), i))
            .collect();
        Self {
            validators,
            by_address,
        }
    }

    /// Number of validators.
    pub fn len(&self) -> usize {
        self.validators.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.validators.is_empty()
    }

    /// Validator at a given index.
    pub fn get(&self, index: usize) -> Option<&Validator> {
        self.validators.get(index)
    }

    /// Look up a validator by address.
    pub fn by_address(&self, address: &Address) -> Option<&Validator> {
        self.by_address.get(address).map(|&i| &self.validators[i])
    }

    /// All validators in set order.
    pub fn validators(&self) -> &[Validator] {
        &self.validators
    }

    /// Canonical Merkle hash of the set, committed by headers.
    pub fn hash(&self) -> Hash {
        let encoded: Vec<Vec<u8>> = self.validators.iter().map(|v| v.canonical_bytes()).collect();
        root_from_byte_slices(&encoded)
    }

    /// Total voting power, with overflow detection.
    pub fn total_power(&self) -> Result<u64> {
        let mut total: u64 = 0;
        for v in &self.validators {
            total = total.checked_add(v.power).ok_or(Error::PowerOverflow)?;
        }
        Ok(total)
    }

    /// The current proposer: the validator with the highest priority,
    /// ties broken by set order.
    pub fn proposer(&self) -> Option<&Validator> {
        self.validators
            .iter()
            .enumerate()
            .max_by(|(ia, a), (ib, b)| {
                a.proposer_priority
                    .cmp(&b.proposer_priority)
                    .then(ib.cmp(ia))
            })
            .map(|(_, v)| v)
    }

    /// Advance the proposer rotation by `times` rounds.
    ///
    /// Each round adds every validator's power to its priority, then the
    /// proposer (highest priority) pays the total power back down. The
    /// rotation is deterministic and weight-proportional.
    pub fn increment_proposer_priority(&mut self, times: u64) -> Result<()> {
        let total = self.total_power()? as i64;
        for _ in 0..times {
            for v in &mut self.validators {
                v.proposer_priority = v
                    .proposer_priority
                    .checked_add(v.power as i64)
                    .ok_or(Error::PowerOverflow)?;
            }
            if let Some(idx) = self
                .validators
                .iter()
                .enumerate()
                .max_by(|(ia, a), (ib, b)| {
                    a.proposer_priority
                        .cmp(&b.proposer_priority)
                        .then(ib.cmp(ia))
                })
                .map(|(i, _)| i)
            {
                self.validators[idx].proposer_priority -= total;
            }
        }
        Ok(())
    }

    /// Verify that `commit` commits `block_id` at `height` with more than
    /// 2/3 of this set's voting power, checking every non-absent signature.
    pub fn verify_commit(
        &self,
        chain_id: &str,
        block_id: &crate::header::BlockId,
        height: u64,
        commit: &Commit,
    ) -> Result<()> {
        self.check_commit_shape(block_id, height, commit)?;

        let mut tallied: u64 = 0;
        for (idx, sig) in commit.signatures.iter().enumerate() {
            if !sig.is_signed() {
                continue;
            }
            let validator = self.validator_at(idx, &sig.validator_address)?;
            self.verify_vote_signature(chain_id, commit, idx, validator)?;
            if sig.is_for_block() {
                tallied = tallied
                    .checked_add(validator.power)
                    .ok_or(Error::PowerOverflow)?;
            }
        }

        self.check_two_thirds(tallied)
    }

    /// Like [`verify_commit`](Self::verify_commit), but only verifies
    /// for-block signatures and returns as soon as 2/3 is exceeded.
    pub fn verify_commit_light(
        &self,
        chain_id: &str,
        block_id: &crate::header::BlockId,
        height: u64,
        commit: &Commit,
    ) -> Result<()> {
        self.check_commit_shape(block_id, height, commit)?;

        let total = self.total_power()?;
        let needed = total * 2 / 3;
        let mut tallied: u64 = 0;
        for (idx, sig) in commit.signatures.iter().enumerate() {
            if !sig.is_for_block() {
                continue;
            }
            let validator = self.validator_at(idx, &sig.validator_address)?;
            self.verify_vote_signature(chain_id, commit, idx, validator)?;
            tallied = tallied
                .checked_add(validator.power)
                .ok_or(Error::PowerOverflow)?;
            if tallied > needed {
                return Ok(());
            }
        }

        Err(Error::InsufficientVotingPower { tallied, needed })
    }

    /// Verify that validators present in *this* (trusted) set contribute
    /// more than `trust_level` of this set's power to `commit`.
    ///
    /// Signatures from validators outside the set are skipped, not errors:
    /// the commit belongs to a newer set that may have rotated.
    pub fn verify_commit_trusting(
        &self,
        chain_id: &str,
        commit: &Commit,
        trust_level: TrustThreshold,
    ) -> Result<()> {
        let total = self.total_power()?;
        let mut tallied: u64 = 0;
        let mut seen: Vec<Address> = Vec::new();

        for (idx, sig) in commit.signatures.iter().enumerate() {
            if !sig.is_for_block() {
                continue;
            }
            let address = sig.validator_address;
            let Some(validator) = self.by_address(&address) else {
                continue;
            };
            // A commit may not carry two votes from the same validator.
            if seen.contains(&address) {
                return Err(Error::invalid_commit(format!(
                    "duplicate signature from {}",
                    address
                )));
            }
            seen.push(address);

            self.verify_vote_signature(chain_id, commit, idx, validator)?;
            tallied = tallied
                .checked_add(validator.power)
                .ok_or(Error::PowerOverflow)?;
            if trust_level.is_met(tallied, total) {
                return Ok(());
            }
        }

        Err(Error::InsufficientVotingPower {
            tallied,
            needed: total * trust_level.numerator / trust_level.denominator,
        })
    }

    fn check_commit_shape(
        &self,
        block_id: &crate::header::BlockId,
        height: u64,
        commit: &Commit,
    ) -> Result<()> {
        if commit.height != height {
            return Err(Error::InvalidCommitHeight {
                got: commit.height,
                expected: height,
            });
        }
        if &commit.block_id != block_id {
            return Err(Error::invalid_commit(format!(
                "commit is for block {}, expected {}",
                commit.block_id, block_id
            )));
        }
        if commit.signatures.len() != self.validators.len() {
            return Err(Error::invalid_commit(format!(
                "commit has {} signature slots, set has {} validators",
                commit.signatures.len(),
                self.validators.len()
            )));
        }
        Ok(())
    }

    fn validator_at(&self, index: usize, claimed: &Address) -> Result<&Validator> {
        let validator = self
            .validators
            .get(index)
            .ok_or_else(|| Error::ValidatorNotInSet {
                address: claimed.to_hex(),
                index,
            })?;
        if &validator.address() != claimed {
            return Err(Error::ValidatorNotInSet {
                address: claimed.to_hex(),
                index,
            });
        }
        Ok(validator)
    }

    fn verify_vote_signature(
        &self,
        chain_id: &str,
        commit: &Commit,
        index: usize,
        validator: &Validator,
    ) -> Result<()> {
        let sig = &commit.signatures[index];
        let signature = sig
            .signature
            .as_ref()
            .ok_or_else(|| Error::InvalidCommitSignature {
                address: sig.validator_address.to_hex(),
                index,
            })?;
        let sign_bytes = vote_sign_bytes(chain_id, commit, index);
        validator
            .pub_key
            .verify(&sign_bytes, signature)
            .map_err(|_| Error::InvalidCommitSignature {
                address: sig.validator_address.to_hex(),
                index,
            })
    }

    fn check_two_thirds(&self, tallied: u64) -> Result<()> {
        let total = self.total_power()?;
        let needed = total * 2 / 3;
        if tallied > needed {
            Ok(())
        } else {
            Err(Error::InsufficientVotingPower { tallied, needed })
        }
    }
}

impl PartialEq for ValidatorSet {
    fn eq(&self, other: &Self) -> bool {
        self.validators == other.validators
    }
}

impl Eq for ValidatorSet {}
