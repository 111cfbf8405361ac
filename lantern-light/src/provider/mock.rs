//! Deterministic mock provider for tests and scenario harnesses.
//!
//! Generates a fully signed chain in memory: per-height validator sets,
//! headers whose hashes link correctly, and commits signed by every
//! validator. Forked chains share a prefix and diverge from a chosen
//! height, which is what the witness-reconciliation tests need.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, TimeZone, Utc};
use parking_lot::Mutex;

use lantern_core::{
    hash, hash_consensus_params, sign_vote, BlockId, Commit, ConsensusParams, Evidence, Hash,
    Header, SecretKey, SignedHeader, Validator, ValidatorSet, Version,
};

use super::{Provider, ProviderError, LATEST_HEIGHT};

/// A validator keypair used by the generator.
#[derive(Clone)]
pub struct TestValidator {
    key: SecretKey,
    power: u64,
}

impl TestValidator {
    /// Create a fresh random validator with the given power.
    pub fn new(power: u64) -> Self {
        Self {
            key: SecretKey::generate(),
            power,
        }
    }

    /// The validator record.
    pub fn validator(&self) -> Validator {
        Validator::new(self.key.public_key(), self.power)
    }
}

/// A complete generated chain.
pub struct MockChain {
    chain_id: String,
    headers: BTreeMap<u64, SignedHeader>,
    valsets: BTreeMap<u64, ValidatorSet>,
}

impl MockChain {
    /// The chain identifier.
    pub fn chain_id(&self) -> &str {
        &self.chain_id
    }

    /// Highest generated height.
    pub fn latest_height(&self) -> u64 {
        self.headers.keys().next_back().copied().unwrap_or(0)
    }

    /// Signed header at a height, if generated.
    pub fn signed_header(&self, height: u64) -> Option<&SignedHeader> {
        self.headers.get(&height)
    }

    /// Validator set at a height, if generated.
    pub fn validator_set(&self, height: u64) -> Option<&ValidatorSet> {
        self.valsets.get(&height)
    }
}

/// Per-height commitment overrides, for tests that need headers to commit
/// real generated content (transactions, results, application state).
#[derive(Debug, Clone, Default)]
pub struct HeightCommitments {
    /// Override for the header's `data_hash`.
    pub data_hash: Option<Hash>,
    /// Override for the header's `app_hash`.
    pub app_hash: Option<Hash>,
    /// Override for the header's `last_results_hash`.
    pub last_results_hash: Option<Hash>,
}

/// Builder for [`MockChain`].
pub struct MockChainBuilder {
    chain_id: String,
    height: u64,
    start_time: DateTime<Utc>,
    block_interval: Duration,
    validators: Vec<TestValidator>,
    rotations: BTreeMap<u64, Vec<TestValidator>>,
    app_salt: String,
    salt_from: u64,
    commitments: BTreeMap<u64, HeightCommitments>,
}

impl MockChainBuilder {
    /// Start building a chain with the given id.
    pub fn new(chain_id: impl Into<String>) -> Self {
        Self {
            chain_id: chain_id.into(),
            height: 10,
            start_time: Utc.timestamp_opt(1_600_000_000, 0).unwrap(),
            block_interval: Duration::minutes(1),
            validators: Vec::new(),
            rotations: BTreeMap::new(),
            app_salt: String::new(),
            salt_from: 1,
            commitments: BTreeMap::new(),
        }
    }

    /// Number of blocks to generate.
    pub fn height(mut self, height: u64) -> Self {
        self.height = height;
        self
    }

    /// Time of the first block.
    pub fn start_time(mut self, time: DateTime<Utc>) -> Self {
        self.start_time = time;
        self
    }

    /// Time between consecutive blocks.
    pub fn block_interval(mut self, interval: Duration) -> Self {
        self.block_interval = interval;
        self
    }

    /// Initial validator set.
    pub fn validators(mut self, validators: Vec<TestValidator>) -> Self {
        self.validators = validators;
        self
    }

    /// Replace the validator set from `height` onward.
    pub fn rotate_at(mut self, height: u64, validators: Vec<TestValidator>) -> Self {
        self.rotations.insert(height, validators);
        self
    }

    /// Salt mixed into app hashes; two builders differing only in salt
    /// produce chains that diverge at the first salted height.
    pub fn app_salt(mut self, salt: impl Into<String>) -> Self {
        self.app_salt = salt.into();
        self
    }

    /// Apply the salt only from `height` onward: two builders with the
    /// same validators but different salts share the prefix below
    /// `height` and diverge there.
    pub fn diverge_at(mut self, height: u64, salt: impl Into<String>) -> Self {
        self.salt_from = height;
        self.app_salt = salt.into();
        self
    }

    /// Override selected commitments at one height.
    pub fn commitments_at(mut self, height: u64, commitments: HeightCommitments) -> Self {
        self.commitments.insert(height, commitments);
        self
    }

    /// Generate the chain.
    pub fn build(self) -> MockChain {
        let params_hash = hash_consensus_params(&ConsensusParams::default());

        let active = |h: u64| -> &[TestValidator] {
            self.rotations
                .range(..=h)
                .next_back()
                .map(|(_, v)| v.as_slice())
                .unwrap_or(&self.validators)
        };

        // Sets for heights 1..=n+1; n+1 is committed by header n.
        let mut valsets = BTreeMap::new();
        for h in 1..=self.height + 1 {
            let set = ValidatorSet::new(active(h).iter().map(|v| v.validator()).collect());
            valsets.insert(h, set);
        }

        let mut headers: BTreeMap<u64, SignedHeader> = BTreeMap::new();
        let mut last_hash = Hash::ZERO;
        for h in 1..=self.height {
            let salt = if h >= self.salt_from {
                self.app_salt.as_str()
            } else {
                ""
            };
            let time = self.start_time + self.block_interval * (h as i32 - 1);
            let overrides = self.commitments.get(&h).cloned().unwrap_or_default();
            let header = Header {
                version: Version { block: 11, app: 1 },
                chain_id: self.chain_id.clone(),
                height: h,
                time,
                last_block_id: BlockId::new(last_hash),
                last_commit_hash: hash(format!("commit-{}-{}", h, salt).as_bytes()),
                data_hash: overrides
                    .data_hash
                    .unwrap_or_else(|| hash(format!("data-{}-{}", h, salt).as_bytes())),
                validators_hash: valsets[&h].hash(),
                next_validators_hash: valsets[&(h + 1)].hash(),
                consensus_hash: params_hash,
                app_hash: overrides
                    .app_hash
                    .unwrap_or_else(|| hash(format!("app-{}-{}", h, salt).as_bytes())),
                last_results_hash: overrides
                    .last_results_hash
                    .unwrap_or_else(|| hash(format!("results-{}-{}", h, salt).as_bytes())),
                evidence_hash: Hash::ZERO,
                proposer_address: active(h)[0].key.public_key().address(),
            };
            last_hash = header.hash();

            let block_id = BlockId::new(last_hash);
            let signatures = active(h)
                .iter()
                .map(|v| sign_vote(&self.chain_id, h, 0, block_id, time, &v.key))
                .collect();
            let commit = Commit {
                height: h,
                round: 0,
                block_id,
                signatures,
            };
            headers.insert(h, SignedHeader { header, commit });
        }

        MockChain {
            chain_id: self.chain_id,
            headers,
            valsets,
        }
    }
}

/// A [`Provider`] serving a generated chain, with fetch counters and a
/// record of reported evidence for assertions.
pub struct MockProvider {
    chain: Arc<MockChain>,
    header_fetches: AtomicUsize,
    valset_fetches: AtomicUsize,
    evidence: Mutex<Vec<Evidence>>,
}

impl MockProvider {
    /// Create a provider over a chain.
    pub fn new(chain: Arc<MockChain>) -> Self {
        Self {
            chain,
            header_fetches: AtomicUsize::new(0),
            valset_fetches: AtomicUsize::new(0),
            evidence: Mutex::new(Vec::new()),
        }
    }

    /// The chain this provider serves.
    pub fn chain(&self) -> &MockChain {
        &self.chain
    }

    /// Number of signed-header fetches served so far.
    pub fn header_fetches(&self) -> usize {
        self.header_fetches.load(Ordering::SeqCst)
    }

    /// Number of validator-set fetches served so far.
    pub fn valset_fetches(&self) -> usize {
        self.valset_fetches.load(Ordering::SeqCst)
    }

    /// Evidence reported to this provider.
    pub fn reported_evidence(&self) -> Vec<Evidence> {
        self.evidence.lock().clone()
    }

    fn resolve(&self, height: u64) -> u64 {
        if height == LATEST_HEIGHT {
            self.chain.latest_height()
        } else {
            height
        }
    }
}

#[async_trait]
impl Provider for MockProvider {
    fn chain_id(&self) -> &str {
        self.chain.chain_id()
    }

    fn describe(&self) -> String {
        format!("mock({})", self.chain.chain_id())
    }

    async fn signed_header(&self, height: u64) -> Result<SignedHeader, ProviderError> {
        self.header_fetches.fetch_add(1, Ordering::SeqCst);
        let height = self.resolve(height);
        self.chain
            .signed_header(height)
            .cloned()
            .ok_or(ProviderError::NotFound { height })
    }

    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, ProviderError> {
        self.valset_fetches.fetch_add(1, Ordering::SeqCst);
        let height = self.resolve(height);
        self.chain
            .validator_set(height)
            .cloned()
            .ok_or(ProviderError::NotFound { height })
    }

    async fn report_evidence(&self, evidence: Evidence) -> Result<(), ProviderError> {
        self.evidence.lock().push(evidence);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn keys(n: usize) -> Vec<TestValidator> {
        (0..n).map(|_| TestValidator::new(10)).collect()
    }

    #[test]
    fn test_chain_links_and_commits() {
        let chain = MockChainBuilder::new("mock-chain")
            .validators(keys(3))
            .height(5)
            .build();

        assert_eq!(chain.latest_height(), 5);
        for h in 2..=5 {
            let parent = chain.signed_header(h - 1).unwrap();
            let child = chain.signed_header(h).unwrap();
            assert_eq!(child.header.last_block_id.hash, parent.hash());
            assert!(child.time() > parent.time());
        }

        // Every commit verifies under its own validator set.
        for h in 1..=5 {
            let sh = chain.signed_header(h).unwrap();
            let vs = chain.validator_set(h).unwrap();
            assert_eq!(vs.hash(), sh.header.validators_hash);
            vs.verify_commit_light("mock-chain", &sh.commit.block_id, h, &sh.commit)
                .unwrap();
        }
    }

    #[test]
    fn test_rotation_changes_set_hash() {
        let chain = MockChainBuilder::new("mock-chain")
            .validators(keys(3))
            .rotate_at(4, keys(3))
            .height(6)
            .build();

        let before = chain.signed_header(2).unwrap();
        let after = chain.signed_header(4).unwrap();
        assert_ne!(before.header.validators_hash, after.header.validators_hash);
        // Header 3 already commits to the rotated next set.
        assert_eq!(
            chain.signed_header(3).unwrap().header.next_validators_hash,
            after.header.validators_hash
        );
    }

    #[test]
    fn test_salted_chains_diverge() {
        let vals = keys(3);
        let a = MockChainBuilder::new("mock-chain")
            .validators(vals.clone())
            .height(4)
            .build();
        let b = MockChainBuilder::new("mock-chain")
            .validators(vals)
            .app_salt("fork")
            .height(4)
            .build();

        for h in 1..=4 {
            assert_ne!(
                a.signed_header(h).unwrap().hash(),
                b.signed_header(h).unwrap().hash()
            );
        }
    }

    #[test]
    fn test_diverge_at_shares_prefix() {
        let vals = keys(3);
        let a = MockChainBuilder::new("mock-chain")
            .validators(vals.clone())
            .height(8)
            .build();
        let b = MockChainBuilder::new("mock-chain")
            .validators(vals)
            .diverge_at(5, "fork")
            .height(8)
            .build();

        for h in 1..=4 {
            assert_eq!(
                a.signed_header(h).unwrap().hash(),
                b.signed_header(h).unwrap().hash()
            );
        }
        for h in 5..=8 {
            assert_ne!(
                a.signed_header(h).unwrap().hash(),
                b.signed_header(h).unwrap().hash()
            );
        }
    }

    #[tokio::test]
    async fn test_provider_counters_and_latest() {
        let chain = Arc::new(
            MockChainBuilder::new("mock-chain")
                .validators(keys(2))
                .height(3)
                .build(),
        );
        let provider = MockProvider::new(chain);

        let latest = provider.signed_header(LATEST_HEIGHT).await.unwrap();
        assert_eq!(latest.height(), 3);
        provider.validator_set(2).await.unwrap();
        assert_eq!(provider.header_fetches(), 1);
        assert_eq!(provider.valset_fetches(), 1);

        assert!(matches!(
            provider.signed_header(99).await,
            Err(ProviderError::NotFound { height: 99 })
        ));
    }
}
