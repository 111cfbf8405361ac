//! End-to-end scenarios for the light client engine over mock chains.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, TimeZone, Utc};

use lantern_core::{Evidence, SignedHeader, ValidatorSet};
use lantern_light::provider::dead::DeadProvider;
use lantern_light::provider::mock::{MockChain, MockChainBuilder, MockProvider, TestValidator};
use lantern_light::{
    LightClientBuilder, LightClientError, MemoryStore, Provider, ProviderError, TrustOptions,
    TrustStore,
};

fn start_time() -> chrono::DateTime<chrono::Utc> {
    Utc.timestamp_opt(1_600_000_000, 0).unwrap()
}

fn validators(n: usize) -> Vec<TestValidator> {
    (0..n).map(|_| TestValidator::new(10)).collect()
}

fn chain(height: u64) -> Arc<MockChain> {
    Arc::new(
        MockChainBuilder::new("scenario-chain")
            .validators(validators(4))
            .height(height)
            .start_time(start_time())
            .build(),
    )
}

fn trust_root(chain: &MockChain, height: u64, period: Duration) -> TrustOptions {
    TrustOptions::new(period, height, chain.signed_header(height).unwrap().hash()).unwrap()
}

/// A provider that can be switched off mid-test.
struct SwitchableProvider {
    inner: MockProvider,
    dead: AtomicBool,
}

impl SwitchableProvider {
    fn new(chain: Arc<MockChain>) -> Self {
        Self {
            inner: MockProvider::new(chain),
            dead: AtomicBool::new(false),
        }
    }

    fn kill(&self) {
        self.dead.store(true, Ordering::SeqCst);
    }

    fn check(&self) -> Result<(), ProviderError> {
        if self.dead.load(Ordering::SeqCst) {
            Err(ProviderError::NoResponse)
        } else {
            Ok(())
        }
    }
}

#[async_trait]
impl Provider for SwitchableProvider {
    fn chain_id(&self) -> &str {
        self.inner.chain_id()
    }

    fn describe(&self) -> String {
        "switchable".to_string()
    }

    async fn signed_header(&self, height: u64) -> Result<SignedHeader, ProviderError> {
        self.check()?;
        self.inner.signed_header(height).await
    }

    async fn validator_set(&self, height: u64) -> Result<ValidatorSet, ProviderError> {
        self.check()?;
        self.inner.validator_set(height).await
    }

    async fn report_evidence(&self, evidence: Evidence) -> Result<(), ProviderError> {
        self.check()?;
        self.inner.report_evidence(evidence).await
    }
}

#[tokio::test]
async fn sequential_all_adjacent() {
    let chain = chain(20);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .sequential_verification()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary.clone(),
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(10);
    let header = client.verify_header_at_height(10, now).await.unwrap();

    assert_eq!(header.height(), 10);
    assert_eq!(header.hash(), chain.signed_header(10).unwrap().hash());
    // Root plus nine newly written heights.
    assert_eq!(store.len(), 10);
    assert_eq!(store.last_signed_header_height().unwrap(), Some(10));
    for h in 1..=10 {
        assert!(client.trusted_header(h).await.unwrap().is_some());
    }
}

#[tokio::test]
async fn skipping_direct_with_stable_validators() {
    let chain = chain(1000);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(100)),
            primary.clone(),
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(1000);
    let header = client.verify_header_at_height(1000, now).await.unwrap();
    assert_eq!(header.height(), 1000);

    // One header fetch at bootstrap, one for the target.
    assert_eq!(primary.header_fetches(), 2);
    // Two validator-set fetches at bootstrap (h, h+1), two for the target.
    assert_eq!(primary.valset_fetches(), 4);

    // Store contains exactly the root and the target.
    assert_eq!(store.len(), 2);
    assert!(store.signed_header(1).unwrap().is_some());
    assert!(store.signed_header(1000).unwrap().is_some());
}

#[tokio::test]
async fn skipping_bisects_across_validator_rotation() {
    let chain = Arc::new(
        MockChainBuilder::new("scenario-chain")
            .validators(validators(4))
            .rotate_at(500, validators(4))
            .height(1000)
            .start_time(start_time())
            .build(),
    );
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(100)),
            primary,
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(1000);
    let header = client.verify_header_at_height(1000, now).await.unwrap();

    assert_eq!(header.height(), 1000);
    assert_eq!(header.hash(), chain.signed_header(1000).unwrap().hash());
    // Bisection left a trail of intermediate trusted heights.
    assert!(store.len() > 2);
    assert!(store.signed_header(500).unwrap().is_some());
    assert_eq!(store.last_signed_header_height().unwrap(), Some(1000));
}

#[tokio::test]
async fn backwards_hash_chain_walk() {
    let chain = chain(100);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 100, Duration::hours(10)),
            primary,
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(100);
    let header = client.verify_header_at_height(1, now).await.unwrap();

    assert_eq!(header.height(), 1);
    assert_eq!(header.hash(), chain.signed_header(1).unwrap().hash());
    // Every height between the target and the root was touched and stored.
    assert_eq!(store.len(), 100);
    assert_eq!(store.first_signed_header_height().unwrap(), Some(1));
}

#[tokio::test]
async fn conflicting_witness_produces_evidence() {
    let vals = validators(4);
    let chain_a = Arc::new(
        MockChainBuilder::new("scenario-chain")
            .validators(vals.clone())
            .height(10)
            .start_time(start_time())
            .build(),
    );
    let chain_b = Arc::new(
        MockChainBuilder::new("scenario-chain")
            .validators(vals)
            .diverge_at(5, "fork")
            .height(10)
            .start_time(start_time())
            .build(),
    );

    let primary = Arc::new(MockProvider::new(chain_a.clone()));
    let witness = Arc::new(MockProvider::new(chain_b));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain_a, 1, Duration::hours(10)),
            primary.clone(),
            vec![witness.clone()],
            store,
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(10);
    let err = client.verify_header_at_height(10, now).await.unwrap_err();
    assert!(matches!(
        err,
        LightClientError::ConflictingHeaders { height: 10, .. }
    ));

    // Every provider received the evidence exactly once.
    for provider in [&primary, &witness] {
        let reported = provider.reported_evidence();
        assert_eq!(reported.len(), 1);
        match &reported[0] {
            Evidence::ConflictingHeaders { h1, h2 } => {
                assert_eq!(h1.height(), h2.height());
                assert_ne!(h1.hash(), h2.hash());
            }
            other => panic!("unexpected evidence: {:?}", other),
        }
    }
}

#[tokio::test]
async fn expired_trust_root_is_rejected() {
    let chain = chain(1000);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(1)),
            primary,
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::hours(2);
    let err = client.verify_header_at_height(1000, now).await.unwrap_err();
    assert!(matches!(err, LightClientError::OldHeaderExpired { .. }));
}

#[tokio::test]
async fn idempotent_verification_uses_no_fetches() {
    let chain = chain(50);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary.clone(),
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(50);
    let first = client.verify_header_at_height(50, now).await.unwrap();

    let headers_before = primary.header_fetches();
    let valsets_before = primary.valset_fetches();

    let second = client.verify_header_at_height(50, now).await.unwrap();
    assert_eq!(first, second);
    assert_eq!(primary.header_fetches(), headers_before);
    assert_eq!(primary.valset_fetches(), valsets_before);
}

#[tokio::test]
async fn stored_commits_verify_under_stored_sets() {
    let chain = chain(20);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .sequential_verification()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(20);
    client.verify_header_at_height(15, now).await.unwrap();

    for h in 2..=15 {
        let sh = store.signed_header(h).unwrap().unwrap();
        let vs = store.validator_set(h).unwrap().unwrap();
        assert_eq!(vs.hash(), sh.header.validators_hash);
        vs.verify_commit_light("scenario-chain", &sh.commit.block_id, h, &sh.commit)
            .unwrap();
    }
}

#[tokio::test]
async fn dead_witness_is_removed() {
    let chain = chain(30);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let honest = Arc::new(MockProvider::new(chain.clone()));
    let dead = Arc::new(DeadProvider::new("scenario-chain"));

    let client = LightClientBuilder::new()
        .max_retry_attempts(1)
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![dead, honest],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(30);
    client.verify_header_at_height(30, now).await.unwrap();
    assert_eq!(client.witnesses().await.len(), 1);
}

#[tokio::test]
async fn all_witnesses_gone_fails_with_no_witnesses() {
    let chain = chain(30);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let dead = Arc::new(DeadProvider::new("scenario-chain"));

    let client = LightClientBuilder::new()
        .max_retry_attempts(1)
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![dead],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(30);
    let err = client.verify_header_at_height(30, now).await.unwrap_err();
    assert!(matches!(err, LightClientError::NoWitnesses));
}

#[tokio::test]
async fn primary_failure_promotes_witness() {
    let chain = chain(200);
    let primary = Arc::new(SwitchableProvider::new(chain.clone()));
    let witness_a = Arc::new(MockProvider::new(chain.clone()));
    let witness_b = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .max_retry_attempts(1)
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary.clone(),
            vec![witness_a, witness_b],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    primary.kill();

    let now = start_time() + Duration::minutes(200);
    let header = client.verify_header_at_height(200, now).await.unwrap();
    assert_eq!(header.height(), 200);

    // The first witness took over as primary; one witness remains.
    assert_eq!(client.primary().await.describe(), "mock(scenario-chain)");
    assert_eq!(client.witnesses().await.len(), 1);
}

#[tokio::test]
async fn confirmation_hook_can_veto_promotion() {
    let chain = chain(100);
    let primary = Arc::new(SwitchableProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .max_retry_attempts(1)
        .confirmation_function(Box::new(|_| false))
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary.clone(),
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    primary.kill();

    let now = start_time() + Duration::minutes(100);
    let err = client.verify_header_at_height(100, now).await.unwrap_err();
    assert!(matches!(err, LightClientError::NoWitnesses));
}

#[tokio::test]
async fn sequential_mode_rejects_heights_below_root() {
    let chain = chain(100);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .sequential_verification()
        .build(
            trust_root(&chain, 100, Duration::hours(10)),
            primary,
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(100);
    let err = client.verify_header_at_height(50, now).await.unwrap_err();
    assert!(matches!(
        err,
        LightClientError::TargetHeightBelowTrustRoot {
            height: 50,
            root: 100
        }
    ));
}

#[tokio::test]
async fn stopped_engine_rejects_work() {
    let chain = chain(10);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    client.stop();
    assert!(!client.is_running());

    let now = start_time() + Duration::minutes(10);
    let err = client.verify_header_at_height(5, now).await.unwrap_err();
    assert!(matches!(err, LightClientError::Stopped));
}

#[tokio::test]
async fn verify_caller_fetched_header() {
    let chain = chain(60);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![witness],
            Arc::new(MemoryStore::new()),
        )
        .await
        .unwrap();

    let sh = chain.signed_header(42).unwrap().clone();
    let vs = chain.validator_set(42).unwrap().clone();

    let now = start_time() + Duration::minutes(60);
    client.verify_header(&sh, &vs, now).await.unwrap();
    assert_eq!(
        client.trusted_header(42).await.unwrap().unwrap().hash(),
        sh.hash()
    );

    // Re-verifying the same header is a no-op.
    client.verify_header(&sh, &vs, now).await.unwrap();
}

#[tokio::test]
async fn cleanup_drops_all_state() {
    let chain = chain(10);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(10);
    client.verify_header_at_height(10, now).await.unwrap();
    assert!(!store.is_empty());

    client.cleanup().await.unwrap();
    assert!(store.is_empty());
    assert!(client.trusted_header(10).await.unwrap().is_none());
}

#[tokio::test]
async fn pruning_bounds_store_size() {
    let chain = chain(40);
    let primary = Arc::new(MockProvider::new(chain.clone()));
    let witness = Arc::new(MockProvider::new(chain.clone()));
    let store = Arc::new(MemoryStore::new());

    let client = LightClientBuilder::new()
        .sequential_verification()
        .pruning_size(5)
        .build(
            trust_root(&chain, 1, Duration::hours(10)),
            primary,
            vec![witness],
            store.clone(),
        )
        .await
        .unwrap();

    let now = start_time() + Duration::minutes(40);
    client.verify_header_at_height(40, now).await.unwrap();

    assert_eq!(store.len(), 5);
    assert_eq!(store.last_signed_header_height().unwrap(), Some(40));
    assert_eq!(store.first_signed_header_height().unwrap(), Some(36));
}
